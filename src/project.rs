//! Project coordinator
//!
//! Owns everything one registered project needs: the compile-command
//! database, the index store, the indexer and its worker pool. Sweeps run
//! in two passes: every translation unit first, then every recorded header
//! that changed since it was last indexed.

use crate::compile_db::{self, CompilationDatabase};
use crate::config::{self, SymdexConfig};
use crate::edge::DependencyEdge;
use crate::indexer::Indexer;
use crate::keys::{self, Namespace};
use crate::parser::includes::normalize;
use crate::parser::{TranslationUnitParser, UnsavedFile};
use crate::scheduler::{IndexJob, Scheduler};
use crate::storage::{SqliteStore, StoreHandle};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Lifecycle of the registered project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectState {
    /// No project registered yet
    Uninitialized,
    /// Opened, never swept
    Ready,
    Sweeping,
    Idle,
}

impl ProjectState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectState::Uninitialized => "uninitialized",
            ProjectState::Ready => "ready",
            ProjectState::Sweeping => "sweeping",
            ProjectState::Idle => "idle",
        }
    }
}

impl std::fmt::Display for ProjectState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What one sweep queued
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Another sweep was already running; nothing was done
    pub coalesced: bool,
    pub sources: usize,
    pub headers: usize,
    /// Includers queued again because a header they include changed
    pub cascaded: usize,
}

/// Directories that may hold the compiler's builtin headers, most specific first
pub fn builtin_candidates(library_path: &Path) -> Vec<PathBuf> {
    let bases = [
        library_path.join("../lib/clang"),
        library_path.join("../clang"),
        library_path.join("clang"),
        library_path.to_path_buf(),
        PathBuf::from("/usr/lib64/clang"),
        PathBuf::from("/usr/lib/clang"),
    ];

    bases
        .iter()
        .filter_map(|base| {
            let entries = std::fs::read_dir(base).ok()?;
            let mut versions: Vec<String> = entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect();
            versions.sort_by_key(|v| version_key(v));
            let dir = match versions.last() {
                Some(latest) => base.join(latest).join("include"),
                None => base.join("include"),
            };
            Some(normalize(&dir))
        })
        .collect()
}

/// Orders `9` before `17`; non-numeric names sort first
fn version_key(name: &str) -> (Vec<u64>, String) {
    let numbers = name
        .split(|c: char| !c.is_ascii_digit())
        .filter(|part| !part.is_empty())
        .filter_map(|part| part.parse().ok())
        .collect();
    (numbers, name.to_string())
}

/// Whether `#include "stddef.h"` resolves inside `candidate` with no errors
pub fn can_find_builtin_headers(parser: &dyn TranslationUnitParser, candidate: &Path) -> bool {
    let probe = Path::new("/symdex-probe/probe.c");
    let unsaved = [UnsavedFile::new(probe, "#include \"stddef.h\"\n")];
    let args = [format!("-I{}", candidate.display())];

    match parser.parse(probe, &args, &unsaved) {
        Ok(unit) => {
            unit.errors().next().is_none()
                && unit.includes.iter().any(|inc| inc.header.starts_with(candidate))
        }
        Err(e) => {
            debug!("Builtin probe failed for {}: {}", candidate.display(), e);
            false
        }
    }
}

/// First candidate derived from `library_path` that passes the probe
pub fn find_builtin_include(parser: &dyn TranslationUnitParser, library_path: &Path) -> Result<PathBuf> {
    builtin_candidates(library_path)
        .into_iter()
        .find(|candidate| can_find_builtin_headers(parser, candidate))
        .ok_or_else(|| Error::BuiltinHeadersNotFound(library_path.display().to_string()))
}

/// Resets the state to `Idle` when a sweep ends, however it ends
struct SweepGuard<'a> {
    state: &'a Mutex<ProjectState>,
}

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = ProjectState::Idle;
    }
}

/// One registered project
pub struct Project {
    root: PathBuf,
    builtin_include: String,
    compile_db: CompilationDatabase,
    store: Arc<StoreHandle>,
    indexer: Arc<Indexer>,
    scheduler: Scheduler,
    state: Mutex<ProjectState>,
}

impl Project {
    /// Locate `compile_commands.json` at or above `root`, find the builtin
    /// headers, and start the worker pool. The index lives in `.symdex/`
    /// next to the compile-command database.
    pub fn open(
        root: &Path,
        library_path: &Path,
        parser: Arc<dyn TranslationUnitParser>,
        config: &SymdexConfig,
    ) -> Result<Self> {
        let db_path = compile_db::find_upward(root)?;
        let project_root = db_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));

        let builtin = match &config.builtin_include {
            Some(dir) => PathBuf::from(dir),
            None => find_builtin_include(parser.as_ref(), library_path)?,
        };
        let builtin_include = builtin.to_string_lossy().into_owned();
        info!("Builtin headers at {}", builtin_include);

        let index_path = config::default_database_path_in(&project_root);
        if let Some(parent) = index_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let store = Arc::new(StoreHandle::new(index_path));
        let indexer = Arc::new(Indexer::new(Arc::clone(&store), parser));
        let workers = config.workers.unwrap_or_else(Scheduler::default_workers);
        let scheduler = Scheduler::new(indexer.clone(), workers);
        let compile_db = CompilationDatabase::new(db_path, builtin_include.clone());

        info!("Opened project {}", project_root.display());
        Ok(Self {
            root: project_root,
            builtin_include,
            compile_db,
            store,
            indexer,
            scheduler,
            state: Mutex::new(ProjectState::Ready),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether `path` lies inside this project
    pub fn contains(&self, path: &Path) -> bool {
        let path = if path.is_absolute() {
            normalize(path)
        } else {
            match std::env::current_dir() {
                Ok(cwd) => normalize(&cwd.join(path)),
                Err(_) => return false,
            }
        };
        path.starts_with(&self.root)
    }

    pub fn builtin_include(&self) -> &str {
        &self.builtin_include
    }

    pub fn compile_db(&self) -> &CompilationDatabase {
        &self.compile_db
    }

    pub fn store(&self) -> Result<Arc<SqliteStore>> {
        self.store.get()
    }

    pub fn parser(&self) -> Arc<dyn TranslationUnitParser> {
        Arc::clone(self.indexer.parser())
    }

    pub fn state(&self) -> ProjectState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn queue_size(&self) -> usize {
        self.scheduler.queue_depth()
    }

    pub fn index_status(&self) -> Vec<String> {
        self.scheduler.status()
    }

    pub fn wait_until_drained(&self) {
        self.scheduler.wait_until_drained();
    }

    pub fn wait_until_drained_timeout(&self, timeout: Duration) -> bool {
        self.scheduler.wait_until_drained_timeout(timeout)
    }

    /// Compile args for `path`: its own compile command, otherwise the args
    /// of a file that includes it
    pub fn file_args(&self, path: &str) -> Result<Option<Vec<String>>> {
        if let Some(args) = self.compile_db.args_for(path)? {
            return Ok(Some(args));
        }

        let store = self.store()?;
        for (key, _) in store.range_scan(&keys::includer_prefix(path))? {
            let (header, includer) = keys::parse_includer(&key)?;
            let dep_key = keys::dependency(&includer, &header);
            if let Some(value) = store.get(&dep_key)? {
                return Ok(Some(DependencyEdge::decode(&dep_key, &value)?.args));
            }
        }
        Ok(None)
    }

    /// Queue a reparse of one file. Returns `false` when the file has no
    /// known args or an equivalent job is already pending.
    pub fn parse_file(&self, path: &str) -> Result<bool> {
        let args = match self.file_args(path)? {
            Some(args) => args,
            None => {
                debug!("No compile args for {}", path);
                return Ok(false);
            }
        };
        let mod_time = compile_db::file_mod_time(Path::new(path))?;
        Ok(self.scheduler.enqueue(IndexJob::new(path, args, mod_time)))
    }

    /// Full two-pass sweep; blocks until both passes drain. A sweep
    /// requested while another runs returns at once with `coalesced` set.
    pub fn scan_and_index(&self) -> Result<SweepReport> {
        {
            let mut state = self.state.lock().map_err(|e| Error::Lock(e.to_string()))?;
            if *state == ProjectState::Sweeping {
                debug!("Sweep already running");
                return Ok(SweepReport {
                    coalesced: true,
                    ..Default::default()
                });
            }
            *state = ProjectState::Sweeping;
        }
        let _guard = SweepGuard { state: &self.state };

        let mut report = SweepReport::default();
        let entries = self.compile_db.entries()?;

        for (path, args) in entries.iter() {
            let mod_time = match compile_db::file_mod_time(Path::new(path)) {
                Ok(t) => t,
                Err(e) => {
                    debug!("Skipping {}: {}", path, e);
                    continue;
                }
            };
            if self.scheduler.enqueue(IndexJob::new(path.clone(), args.clone(), mod_time)) {
                report.sources += 1;
            }
        }
        info!("Sweep pass 1: {} translation units queued", report.sources);
        self.scheduler.wait_until_drained();

        self.sweep_headers(&mut report)?;
        info!(
            "Sweep pass 2: {} headers and {} includers queued",
            report.headers, report.cascaded
        );
        self.scheduler.wait_until_drained();

        Ok(report)
    }

    /// Queue every recorded header that changed since it was last indexed.
    /// Includers of a header that was indexed before are reparsed too; they
    /// keep their own modification time.
    fn sweep_headers(&self, report: &mut SweepReport) -> Result<()> {
        let store = self.store()?;
        let entries = self.compile_db.entries()?;
        let edges = store
            .range_scan(&Namespace::Dependency.prefix())?
            .into_iter()
            .map(|(key, value)| DependencyEdge::decode(&key, &value))
            .collect::<Result<Vec<_>>>()?;

        // Decided before anything is queued; workers update header times
        let mut changed: HashMap<String, (i64, bool)> = HashMap::new();
        for edge in &edges {
            if changed.contains_key(&edge.header) {
                continue;
            }
            let real = match compile_db::file_mod_time(Path::new(&edge.header)) {
                Ok(t) => t,
                Err(e) => {
                    debug!("Skipping header {}: {}", edge.header, e);
                    continue;
                }
            };
            match self.indexer.stored_mod_time(&edge.header)? {
                None => {
                    changed.insert(edge.header.clone(), (real, false));
                }
                Some(stored) if real > stored => {
                    changed.insert(edge.header.clone(), (real, true));
                }
                Some(_) => {}
            }
        }

        let mut headers_queued = HashSet::new();
        let mut includers_queued = HashSet::new();
        for edge in &edges {
            let Some(&(real, cascade)) = changed.get(&edge.header) else {
                continue;
            };
            if headers_queued.insert(edge.header.clone())
                && self
                    .scheduler
                    .enqueue(IndexJob::new(edge.header.clone(), edge.args.clone(), real))
            {
                report.headers += 1;
            }

            if !cascade || !includers_queued.insert(edge.includer.clone()) {
                continue;
            }
            let own = match compile_db::file_mod_time(Path::new(&edge.includer)) {
                Ok(t) => t,
                Err(e) => {
                    debug!("Skipping includer {}: {}", edge.includer, e);
                    continue;
                }
            };
            let args = entries
                .get(&edge.includer)
                .cloned()
                .unwrap_or_else(|| edge.args.clone());
            if self
                .scheduler
                .enqueue(IndexJob::forced(edge.includer.clone(), args, own))
            {
                report.cascaded += 1;
            }
        }
        Ok(())
    }

    /// Stop the worker pool after the running jobs finish
    pub fn shutdown(&self) {
        if !self.scheduler.is_drained() {
            warn!("Shutting down with {} jobs pending", self.queue_size());
        }
        self.scheduler.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::CppParser;
    use crate::query::QueryEngine;
    use crate::symbol::Location;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        library: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let library = dir.path().join("llvm/lib");
            let builtin = library.join("clang/17/include");
            std::fs::create_dir_all(&builtin).unwrap();
            std::fs::write(builtin.join("stddef.h"), "typedef unsigned long size_t;\n").unwrap();

            let root = dir.path().join("proj");
            std::fs::create_dir_all(root.join("src")).unwrap();
            Self { dir, library }
        }

        fn root(&self) -> PathBuf {
            self.dir.path().join("proj")
        }

        fn write(&self, rel: &str, content: &str) -> String {
            let path = self.root().join(rel);
            std::fs::write(&path, content).unwrap();
            path.to_string_lossy().into_owned()
        }

        fn compile_commands(&self, files: &[&str]) {
            let entries: Vec<_> = files
                .iter()
                .map(|f| {
                    serde_json::json!({
                        "directory": self.root(),
                        "file": f,
                        "command": format!("clang++ -std=c++17 -c {}", f),
                    })
                })
                .collect();
            std::fs::write(
                self.root().join(compile_db::COMPILE_COMMANDS),
                serde_json::Value::Array(entries).to_string(),
            )
            .unwrap();
        }

        fn open(&self) -> Project {
            let config = SymdexConfig {
                workers: Some(2),
                ..Default::default()
            };
            Project::open(&self.root().join("src"), &self.library, Arc::new(CppParser::new()), &config).unwrap()
        }
    }

    /// Move the modification time of `path` `secs` seconds into the future
    fn set_mtime(path: &str, secs: u64) {
        std::fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(std::time::SystemTime::now() + Duration::from_secs(secs))
            .unwrap();
    }

    #[test]
    fn test_builtin_probe() {
        let fixture = Fixture::new();
        let parser = CppParser::new();
        let found = find_builtin_include(&parser, &fixture.library).unwrap();
        assert_eq!(found, fixture.library.join("clang/17/include"));

        let empty = TempDir::new().unwrap();
        assert!(!can_find_builtin_headers(&parser, empty.path()));
    }

    #[test]
    fn test_version_ordering() {
        let mut versions = vec!["9.0.1".to_string(), "17".to_string(), "10".to_string()];
        versions.sort_by_key(|v| version_key(v));
        assert_eq!(versions, vec!["9.0.1", "10", "17"]);
    }

    #[test]
    fn test_open_requires_compile_commands() {
        let fixture = Fixture::new();
        let result = Project::open(
            &fixture.root(),
            &fixture.library,
            Arc::new(CppParser::new()),
            &SymdexConfig::default(),
        );
        assert!(matches!(result, Err(Error::ProjectNotFound(_))));
    }

    #[test]
    fn test_open_requires_builtin_headers() {
        let fixture = Fixture::new();
        fixture.compile_commands(&[]);
        let nowhere = fixture.dir.path().join("nowhere");
        let result = Project::open(&fixture.root(), &nowhere, Arc::new(CppParser::new()), &SymdexConfig::default());
        // Distribution clang installs may satisfy the probe on this machine
        if let Err(e) = result {
            assert!(matches!(e, Error::BuiltinHeadersNotFound(_)));
        }
    }

    #[test]
    fn test_end_to_end_sweep() {
        let fixture = Fixture::new();
        let util = fixture.write("src/util.h", "#pragma once\nvoid doWork() {}\n");
        let main = fixture.write("src/main.cpp", "#include \"util.h\"\nint main() {\n  doWork();\n  return 0;\n}\n");
        fixture.compile_commands(&["src/main.cpp"]);

        let project = fixture.open();
        assert_eq!(project.root(), fixture.root());
        assert_eq!(project.state(), ProjectState::Ready);

        let report = project.scan_and_index().unwrap();
        assert_eq!(report.sources, 1);
        assert_eq!(report.headers, 1);
        assert_eq!(project.queue_size(), 0);
        assert_eq!(project.state(), ProjectState::Idle);
        assert!(fixture.root().join(".symdex/index.db").exists());

        let store = project.store().unwrap();
        let results = QueryEngine::new(&store).match_prefix(Some("doWork"), 5).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results.labels[0], format!("doWork() - function DEFINITION from {} [0]", util));
        assert_eq!(results.resolve(0), Some(&Location::new(util.clone(), 2, 6)));

        let file_results = QueryEngine::new(&store).match_prefix(Some("util"), 5).unwrap();
        assert_eq!(file_results.labels[0], format!("util.h ({}) [0]", util));
        assert_eq!(file_results.resolve(0), Some(&Location::new(util.clone(), 1, 1)));

        let main_args = project.file_args(&main).unwrap().unwrap();
        assert_eq!(project.file_args(&util).unwrap(), Some(main_args.clone()));
        assert_eq!(main_args.last().unwrap(), &format!("-I{}", project.builtin_include()));
        assert_eq!(project.file_args("/elsewhere/x.h").unwrap(), None);

        // Nothing changed on disk: no header work, no writes
        let puts_before = store.stats().unwrap().puts;
        let again = project.scan_and_index().unwrap();
        assert_eq!(again.headers, 0);
        assert_eq!(again.cascaded, 0);
        assert_eq!(store.stats().unwrap().puts, puts_before);

        project.shutdown();
    }

    #[test]
    fn test_changed_header_cascades_to_includer() {
        let fixture = Fixture::new();
        let util = fixture.write("src/util.h", "void doWork() {}\n");
        let main = fixture.write("src/main.cpp", "#include \"util.h\"\nint main() { doWork(); }\n");
        fixture.compile_commands(&["src/main.cpp"]);

        let project = fixture.open();
        project.scan_and_index().unwrap();

        std::fs::write(&util, "void doWork() {}\nvoid doMore() {}\n").unwrap();
        set_mtime(&util, 30);

        let report = project.scan_and_index().unwrap();
        assert_eq!(report.headers, 1);
        assert_eq!(report.cascaded, 1);

        // The includer keeps its own modification time
        let main_time = compile_db::file_mod_time(Path::new(&main)).unwrap();
        let store = project.store().unwrap();
        assert_eq!(store.get(&keys::file_meta(&main)).unwrap(), Some(main_time.to_string()));

        let results = QueryEngine::new(&store).match_prefix(Some("doMore"), 5).unwrap();
        assert_eq!(results.len(), 1);
        project.shutdown();
    }

    #[test]
    fn test_includer_edit_after_future_dated_header() {
        let fixture = Fixture::new();
        let util = fixture.write("src/util.h", "void doWork() {}\n");
        let main = fixture.write("src/main.cpp", "#include \"util.h\"\nint main() { doWork(); }\n");
        fixture.compile_commands(&["src/main.cpp"]);

        let project = fixture.open();
        project.scan_and_index().unwrap();

        set_mtime(&util, 3600);
        let report = project.scan_and_index().unwrap();
        assert_eq!(report.cascaded, 1);

        // Edited well before the header's timestamp
        fixture.write("src/main.cpp", "#include \"util.h\"\nint entry() { doWork(); }\n");
        set_mtime(&main, 60);
        let report = project.scan_and_index().unwrap();
        assert_eq!(report.sources, 1);
        assert_eq!(report.cascaded, 0);

        let store = project.store().unwrap();
        let engine = QueryEngine::new(&store);
        assert_eq!(engine.match_prefix(Some("entry"), 5).unwrap().len(), 1);
        assert!(engine.match_prefix(Some("main"), 5).unwrap().labels.iter().all(|l| !l.starts_with("main()")));
        project.shutdown();
    }

    #[test]
    fn test_sweep_redoes_interrupted_index() {
        let fixture = Fixture::new();
        let main = fixture.write("src/main.cpp", "int oldName() { return 1; }\n");
        fixture.compile_commands(&["src/main.cpp"]);

        let project = fixture.open();
        project.scan_and_index().unwrap();
        let indexed_at = compile_db::file_mod_time(Path::new(&main)).unwrap();

        // New content under the same timestamp, and the sentinel an
        // interrupted rewrite leaves behind
        fixture.write("src/main.cpp", "int newName() { return 2; }\n");
        std::fs::File::options()
            .write(true)
            .open(&main)
            .unwrap()
            .set_modified(std::time::UNIX_EPOCH + Duration::from_secs(indexed_at as u64))
            .unwrap();
        let store = project.store().unwrap();
        store.put(&keys::file_meta(&main), "0").unwrap();

        let report = project.scan_and_index().unwrap();
        assert_eq!(report.sources, 1);
        assert_eq!(store.get(&keys::file_meta(&main)).unwrap(), Some(indexed_at.to_string()));

        let engine = QueryEngine::new(&store);
        assert!(engine.match_prefix(Some("oldName"), 5).unwrap().is_empty());
        assert_eq!(engine.match_prefix(Some("newName"), 5).unwrap().len(), 1);
        project.shutdown();
    }

    #[test]
    fn test_parse_file_and_contains() {
        let fixture = Fixture::new();
        let main = fixture.write("src/main.cpp", "int answer() { return 42; }\n");
        fixture.compile_commands(&["src/main.cpp"]);
        let project = fixture.open();

        assert!(project.contains(&fixture.root().join("src/main.cpp")));
        assert!(!project.contains(Path::new("/definitely/elsewhere")));

        assert!(project.parse_file(&main).unwrap());
        project.wait_until_drained();
        assert!(!project.parse_file("/definitely/elsewhere.cpp").unwrap());

        let store = project.store().unwrap();
        let results = QueryEngine::new(&store).match_prefix(Some("answer"), 5).unwrap();
        assert_eq!(results.len(), 1);
        project.shutdown();
    }
}
