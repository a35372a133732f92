use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::path::Path;

/// Extensions the watcher forwards to the indexer
pub const SOURCE_EXTENSIONS: &[&str] = &[
    "c", "cc", "cpp", "cxx", "c++", "h", "hh", "hpp", "hxx", "h++", "inl", "ipp", "tcc",
];

pub struct IgnoreFilter {
    inner: Gitignore,
}

impl IgnoreFilter {
    pub fn new(root: &Path, extra_excludes: Option<&[String]>) -> Self {
        let mut builder = GitignoreBuilder::new(root);

        // 1. Load from .gitignore and .ignore
        builder.add(root.join(".gitignore"));
        builder.add(root.join(".ignore"));

        // 2. Add defaults (global)
        let defaults = [
            // Build and tool directories
            ".git/", ".symdex/", "build/", "cmake-build-*/", "out/", "_deps/",
            "CMakeFiles/", ".cache/", ".vscode/", ".idea/",

            // Build products
            "*.o", "*.obj", "*.a", "*.so", "*.dylib", "*.dll", "*.lib", "*.exe",
            "*.gch", "*.pch", "*.d",

            // Database files
            "*.db", "*.db-wal", "*.db-shm", "*.sqlite",
        ];

        for pattern in defaults {
            // Static patterns; a bad one only loses that pattern
            builder.add_line(None, pattern).ok();
        }

        // 3. Add user config excludes
        if let Some(excludes) = extra_excludes {
            for pattern in excludes {
                builder.add_line(None, pattern).ok();
            }
        }

        Self {
            inner: builder.build().unwrap_or_else(|_| Gitignore::empty()),
        }
    }

    pub fn is_ignored(&self, path: &Path, is_dir: bool) -> bool {
        let root = self.inner.path();
        // Parent matching requires a path under the matcher root
        if root.as_os_str().is_empty() || !path.starts_with(root) {
            return self.inner.matched(path, is_dir).is_ignore();
        }
        self.inner.matched_path_or_any_parents(path, is_dir).is_ignore()
    }

    /// A C/C++ source or header that is not ignored
    pub fn is_indexable(&self, path: &Path) -> bool {
        is_source_file(path) && !self.is_ignored(path, false)
    }
}

pub fn is_source_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SOURCE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
