//! Compile-command database (`compile_commands.json`)
//!
//! Maps every C/C++ translation unit of the project to the argument vector
//! it is compiled with. The file is re-read whenever its modification time
//! advances.

use crate::parser::includes::normalize;
use crate::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::UNIX_EPOCH;
use tracing::{debug, info, warn};

pub const COMPILE_COMMANDS: &str = "compile_commands.json";

/// Modification time in whole unix seconds
pub fn file_mod_time(path: &Path) -> std::io::Result<i64> {
    let modified = std::fs::metadata(path)?.modified()?;
    Ok(modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0))
}

/// Walk up from `start` looking for `compile_commands.json`
pub fn find_upward(start: &Path) -> Result<PathBuf> {
    let start = if start.is_absolute() {
        start.to_path_buf()
    } else {
        std::env::current_dir()?.join(start)
    };
    let start = normalize(&start);

    let mut current = Some(start.as_path());
    while let Some(dir) = current {
        let candidate = dir.join(COMPILE_COMMANDS);
        if candidate.is_file() {
            return Ok(candidate);
        }
        current = dir.parent();
    }
    Err(Error::ProjectNotFound(start.display().to_string()))
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    directory: Option<String>,
    file: String,
    command: Option<String>,
    arguments: Option<Vec<String>>,
}

/// Whether the first argument of a command names a C/C++ compiler
pub fn is_compiler(program: &str) -> bool {
    let name = Path::new(program)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.contains("++") || name.contains("cc") || name.contains("clang")
}

const PATH_FLAGS: &[&str] = &["-I", "-isystem", "-iquote"];

/// Make include-path arguments absolute against `directory`
fn absolutize_include_args(args: Vec<String>, directory: &Path) -> Vec<String> {
    let resolve = |p: &str| -> String {
        let path = Path::new(p);
        if path.is_absolute() {
            p.to_string()
        } else {
            normalize(&directory.join(path)).to_string_lossy().into_owned()
        }
    };

    let mut out = Vec::with_capacity(args.len());
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        if PATH_FLAGS.contains(&arg.as_str()) {
            let value = iter.next();
            out.push(arg);
            if let Some(value) = value {
                out.push(resolve(&value));
            }
            continue;
        }
        match PATH_FLAGS.iter().find(|flag| arg.starts_with(**flag)) {
            Some(flag) => {
                let value = &arg[flag.len()..];
                out.push(format!("{}{}", flag, resolve(value)));
            }
            None => out.push(arg),
        }
    }
    out
}

/// Build the `file -> args` map from the raw JSON text
pub fn parse_entries(json: &str, builtin_include: &str) -> Result<BTreeMap<String, Vec<String>>> {
    let raw: Vec<RawEntry> = serde_json::from_str(json)?;
    let mut entries = BTreeMap::new();

    for entry in raw {
        let args = match (entry.arguments, entry.command) {
            (Some(arguments), _) => arguments,
            (None, Some(command)) => match shlex::split(&command) {
                Some(args) => args,
                None => {
                    warn!("Skipping {}: unbalanced quotes in its command", entry.file);
                    continue;
                }
            },
            (None, None) => continue,
        };
        match args.first() {
            Some(program) if is_compiler(program) => {}
            _ => continue,
        }

        let directory = entry.directory.map(PathBuf::from).unwrap_or_default();
        let file = Path::new(&entry.file);
        let file = if file.is_absolute() {
            normalize(file)
        } else {
            normalize(&directory.join(file))
        };

        let file_name = file.to_string_lossy().into_owned();
        if file_name.contains("/usr/include") || !file.exists() {
            continue;
        }

        let mut args = absolutize_include_args(args, &directory);
        args.push(format!("-I{}", builtin_include));
        entries.insert(file_name, args);
    }

    Ok(entries)
}

struct Loaded {
    mod_time: i64,
    entries: Arc<BTreeMap<String, Vec<String>>>,
}

/// Lazily loaded, auto-reloading view of one `compile_commands.json`
pub struct CompilationDatabase {
    path: PathBuf,
    builtin_include: String,
    loaded: Mutex<Option<Loaded>>,
}

impl CompilationDatabase {
    pub fn new(path: impl Into<PathBuf>, builtin_include: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            builtin_include: builtin_include.into(),
            loaded: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory holding the database; the project root
    pub fn root(&self) -> &Path {
        self.path.parent().unwrap_or(Path::new("/"))
    }

    pub fn builtin_include(&self) -> &str {
        &self.builtin_include
    }

    /// Current entries, re-read if the file changed since the last load
    pub fn entries(&self) -> Result<Arc<BTreeMap<String, Vec<String>>>> {
        let mut loaded = self
            .loaded
            .lock()
            .map_err(|e| Error::Lock(e.to_string()))?;
        let mod_time = file_mod_time(&self.path)?;

        if let Some(current) = loaded.as_ref() {
            if mod_time <= current.mod_time {
                return Ok(Arc::clone(&current.entries));
            }
        }

        let json = std::fs::read_to_string(&self.path)?;
        let entries = Arc::new(parse_entries(&json, &self.builtin_include)?);
        if loaded.is_some() {
            info!("Reloaded {} ({} files)", self.path.display(), entries.len());
        } else {
            debug!("Loaded {} ({} files)", self.path.display(), entries.len());
        }
        *loaded = Some(Loaded {
            mod_time,
            entries: Arc::clone(&entries),
        });
        Ok(entries)
    }

    /// Compile args of a listed translation unit
    pub fn args_for(&self, path: &str) -> Result<Option<Vec<String>>> {
        Ok(self.entries()?.get(path).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_compiler_filter() {
        for program in ["cc", "gcc", "g++", "c++", "clang", "clang++-17", "/usr/bin/x86_64-linux-gnu-g++-12", "ccache"] {
            assert!(is_compiler(program), "{}", program);
        }
        for program in ["python", "ld", "/usr/bin/ar", "nvlink"] {
            assert!(!is_compiler(program), "{}", program);
        }
    }

    #[test]
    fn test_command_quoting_follows_shell_rules() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("x.c"), "").unwrap();
        let json = serde_json::json!([
            {"directory": dir.path(), "file": "x.c", "command": r#"cc "-DDIR=a\b" -DNAME='a b' x\ y.c"#},
            {"directory": dir.path(), "file": "x.c", "command": "cc \"-DOPEN x.c"}
        ])
        .to_string();

        let entries = parse_entries(&json, "/builtin").unwrap();
        let file = dir.path().join("x.c").to_string_lossy().into_owned();
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[&file],
            vec!["cc", r"-DDIR=a\b", "-DNAME=a b", "x y.c", "-I/builtin"]
        );
    }

    #[test]
    fn test_parse_entries_filters_and_resolves() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::write(root.join("src/main.cpp"), "int main() {}\n").unwrap();
        std::fs::write(root.join("src/tool.c"), "int x;\n").unwrap();

        let json = serde_json::json!([
            {"directory": root.join("src"), "file": "main.cpp", "command": "clang++ -Iinc -I /abs -c main.cpp"},
            {"directory": root, "file": "src/tool.c", "arguments": ["gcc", "-isystem", "third", "-c", "src/tool.c"]},
            {"directory": root, "file": "src/gone.cpp", "command": "g++ -c src/gone.cpp"},
            {"directory": root, "file": "src/main.cpp", "command": "python gen.py"},
            {"directory": "/usr/include", "file": "stdio.h", "command": "cc stdio.h"}
        ])
        .to_string();

        let entries = parse_entries(&json, "/opt/clang/include").unwrap();
        assert_eq!(entries.len(), 2);

        let main = root.join("src/main.cpp").to_string_lossy().into_owned();
        let inc = format!("-I{}", root.join("src/inc").display());
        assert_eq!(
            entries[&main],
            vec!["clang++", inc.as_str(), "-I", "/abs", "-c", "main.cpp", "-I/opt/clang/include"]
        );

        let tool = root.join("src/tool.c").to_string_lossy().into_owned();
        assert_eq!(entries[&tool][2], root.join("third").to_string_lossy());
        assert_eq!(entries[&tool].last().unwrap(), "-I/opt/clang/include");
    }

    #[test]
    fn test_find_upward() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();
        assert!(matches!(find_upward(&nested), Err(Error::ProjectNotFound(_))));

        std::fs::write(dir.path().join("a").join(COMPILE_COMMANDS), "[]").unwrap();
        assert_eq!(find_upward(&nested).unwrap(), dir.path().join("a").join(COMPILE_COMMANDS));
    }

    #[test]
    fn test_reload_on_change() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("a.cpp");
        std::fs::write(&source, "").unwrap();
        let db_path = dir.path().join(COMPILE_COMMANDS);
        std::fs::write(&db_path, "[]").unwrap();

        let db = CompilationDatabase::new(&db_path, "/builtin");
        assert!(db.entries().unwrap().is_empty());

        let json = serde_json::json!([{"directory": dir.path(), "file": "a.cpp", "command": "c++ -c a.cpp"}]);
        std::fs::write(&db_path, json.to_string()).unwrap();
        let later = std::time::SystemTime::now() + std::time::Duration::from_secs(5);
        std::fs::File::options()
            .write(true)
            .open(&db_path)
            .unwrap()
            .set_modified(later)
            .unwrap();

        let args = db.args_for(&source.to_string_lossy()).unwrap().unwrap();
        assert_eq!(args.last().unwrap(), "-I/builtin");
        assert_eq!(db.root(), dir.path());
    }
}
