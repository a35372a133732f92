//! Header search paths taken from compile arguments

use std::path::{Component, Path, PathBuf};

/// Directories searched when no `-isystem` flag covers the standard headers
pub const DEFAULT_SYSTEM_DIRS: &[&str] = &["/usr/local/include", "/usr/include"];

/// A resolved `#include`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInclude {
    pub path: PathBuf,
    pub is_system: bool,
}

/// Ordered header search directories, mirroring the compiler's lookup:
/// quoted includes try the includer's directory and `-iquote` first, then
/// everything tries `-I`, then `-isystem` and the default system dirs.
#[derive(Debug, Clone, Default)]
pub struct SearchPaths {
    quote: Vec<PathBuf>,
    user: Vec<PathBuf>,
    system: Vec<PathBuf>,
}

impl SearchPaths {
    pub fn from_args(args: &[String]) -> Self {
        let mut paths = SearchPaths::default();
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            for (flag, target) in [
                ("-iquote", &mut paths.quote),
                ("-isystem", &mut paths.system),
                ("-I", &mut paths.user),
            ] {
                if arg == flag {
                    if let Some(dir) = iter.next() {
                        target.push(PathBuf::from(dir));
                    }
                    break;
                }
                if let Some(dir) = arg.strip_prefix(flag) {
                    target.push(PathBuf::from(dir));
                    break;
                }
            }
        }
        paths
            .system
            .extend(DEFAULT_SYSTEM_DIRS.iter().map(PathBuf::from));
        paths
    }

    /// Resolve an include `name` written in `includer_dir`.
    ///
    /// `exists` decides whether a candidate file is present, so in-memory
    /// buffers can satisfy lookups.
    pub fn resolve(
        &self,
        name: &str,
        angled: bool,
        includer_dir: &Path,
        exists: impl Fn(&Path) -> bool,
    ) -> Option<ResolvedInclude> {
        let candidate = Path::new(name);
        if candidate.is_absolute() {
            let path = normalize(candidate);
            return exists(&path).then_some(ResolvedInclude {
                path,
                is_system: false,
            });
        }

        let local = (!angled)
            .then(|| includer_dir.to_path_buf())
            .into_iter()
            .chain(self.quote.iter().filter(|_| !angled).cloned())
            .chain(self.user.iter().cloned());
        for dir in local {
            let path = normalize(&dir.join(name));
            if exists(&path) {
                return Some(ResolvedInclude {
                    path,
                    is_system: false,
                });
            }
        }

        self.system.iter().find_map(|dir| {
            let path = normalize(&dir.join(name));
            exists(&path).then_some(ResolvedInclude {
                path,
                is_system: true,
            })
        })
    }
}

/// Lexically remove `.` and `..` components without touching the file system
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
