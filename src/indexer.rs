//! Incremental Indexer - rewrites one file's records from a fresh parse
//!
//! Indexing a file is a sequence of store batches:
//! 1. file listing + `meta = 0` sentinel
//! 2. dependency edges (old ones dropped)
//! 3. invalidation of every record the previous version contributed
//! 4. spelling, membership, occurrence and search entries of the new tree
//! 5. `meta = observed modification time`
//!
//! A crash anywhere between 1 and 5 leaves the sentinel behind, so the next
//! sweep reparses the file.

use crate::edge::DependencyEdge;
use crate::keys::{self, SearchFamily, SearchKey};
use crate::parser::{Node, TranslationUnitParser};
use crate::storage::{BatchOp, SqliteStore, StoreHandle};
use crate::symbol::UseType;
use crate::Result;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of one [`Indexer::index`] call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOutcome {
    /// Stored modification time is at least the observed one; nothing written
    UpToDate,
    Indexed {
        /// Occurrence records written
        occurrences: usize,
        /// Diagnostics with severity error or fatal
        errors: usize,
        /// Dependency edges recorded
        headers: usize,
    },
    /// The parser produced nothing; the sentinel stays in place
    ParseFailed(String),
}

/// Drives the parser for one file and writes its records
pub struct Indexer {
    store: Arc<StoreHandle>,
    parser: Arc<dyn TranslationUnitParser>,
}

impl Indexer {
    pub fn new(store: Arc<StoreHandle>, parser: Arc<dyn TranslationUnitParser>) -> Self {
        Self { store, parser }
    }

    pub fn parser(&self) -> &Arc<dyn TranslationUnitParser> {
        &self.parser
    }

    /// Last indexed modification time; `None` if the file was never seen
    pub fn stored_mod_time(&self, path: &str) -> Result<Option<i64>> {
        let store = self.store.get()?;
        Ok(store
            .get(&keys::file_meta(path))?
            .map(|v| keys::decode_mod_time(&v)))
    }

    /// Reindex `path` if `observed_mod_time` is newer than what is stored
    pub fn index(&self, path: &str, args: &[String], observed_mod_time: i64) -> Result<IndexOutcome> {
        if let Some(stored) = self.stored_mod_time(path)? {
            if observed_mod_time <= stored {
                return Ok(IndexOutcome::UpToDate);
            }
        }
        self.reindex(path, args, observed_mod_time)
    }

    /// Rewrite the records of `path` regardless of the stored time
    pub fn reindex(&self, path: &str, args: &[String], observed_mod_time: i64) -> Result<IndexOutcome> {
        let store = self.store.get()?;
        store.write_batch(&[
            BatchOp::Put(keys::file_listing(path), "1".to_string()),
            BatchOp::Put(keys::file_meta(path), "0".to_string()),
        ])?;

        debug!("Parsing {} with {}", path, self.parser.name());
        let unit = match self.parser.parse(Path::new(path), args, &[]) {
            Ok(unit) => unit,
            Err(e) => {
                warn!("Failed to parse {}: {}", path, e);
                return Ok(IndexOutcome::ParseFailed(e.to_string()));
            }
        };

        let errors = unit.errors().count();
        for diagnostic in unit.errors() {
            debug!("{}", diagnostic);
        }
        if errors > 0 {
            warn!("{}: {} error diagnostics", path, errors);
        }

        let headers: BTreeSet<String> = unit
            .includes
            .iter()
            .filter(|inc| !inc.is_system)
            .map(|inc| inc.header.to_string_lossy().into_owned())
            .filter(|header| header != path)
            .collect();
        self.replace_dependencies(&store, path, args, &headers)?;

        self.invalidate(&store, path)?;

        let occurrences = self.write_records(&store, path, &unit.root)?;

        store.put(&keys::file_meta(path), &observed_mod_time.to_string())?;
        debug!(
            "Indexed {} ({} occurrences, {} headers, {} errors)",
            path,
            occurrences,
            headers.len(),
            errors
        );

        Ok(IndexOutcome::Indexed {
            occurrences,
            errors,
            headers: headers.len(),
        })
    }

    fn replace_dependencies(
        &self,
        store: &SqliteStore,
        path: &str,
        args: &[String],
        headers: &BTreeSet<String>,
    ) -> Result<()> {
        let dep_prefix = keys::dependency_prefix(path);
        let mut ops = Vec::new();
        for (key, _) in store.range_scan(&dep_prefix)? {
            let (_, header) = keys::parse_dependency(&key)?;
            ops.push(BatchOp::Delete(keys::includer(&header, path)));
        }
        ops.push(BatchOp::DeletePrefix(dep_prefix));

        for header in headers {
            let edge = DependencyEdge::new(path, header.as_str(), args.to_vec());
            ops.push(BatchOp::Put(edge.key(), edge.encode_args()?));
            ops.push(BatchOp::Put(edge.reverse_key(), "1".to_string()));
        }
        store.write_batch(&ops)
    }

    /// Remove every occurrence, search entry and membership record the
    /// previous version of `path` contributed
    fn invalidate(&self, store: &SqliteStore, path: &str) -> Result<()> {
        let mut ops = Vec::new();
        for (key, _) in store.range_scan(&keys::member_prefix(path))? {
            let (_, symbol_id) = keys::parse_member(&key)?;
            ops.push(BatchOp::DeletePrefix(keys::occurrence_file_prefix(&symbol_id, path)));

            if let Some(spelling) = store.get(&keys::spelling(&symbol_id))? {
                for family in [SearchFamily::Definition, SearchFamily::Declaration] {
                    for (namespace, term) in keys::search_terms(family, &spelling) {
                        ops.push(BatchOp::DeletePrefix(keys::search_file_prefix(
                            namespace, &term, &symbol_id, path,
                        )));
                    }
                }
            }
            ops.push(BatchOp::Delete(key));
        }
        store.write_batch(&ops)
    }

    fn write_records(&self, store: &SqliteStore, path: &str, root: &Node) -> Result<usize> {
        let file = Path::new(path);
        let mut ops = Vec::new();
        let mut occurrences = 0;

        for node in root.walk() {
            let Some(location) = node.location.as_ref().filter(|loc| loc.file == file) else {
                continue;
            };

            let (symbol_id, spelling, pass_through) =
                if !node.symbol_id.is_empty() && !node.spelling.is_empty() {
                    (node.symbol_id.as_str(), node.spelling.as_str(), false)
                } else {
                    match &node.referenced {
                        Some(r) if !r.symbol_id.is_empty() && !r.spelling.is_empty() => {
                            (r.symbol_id.as_str(), r.spelling.as_str(), true)
                        }
                        _ => continue,
                    }
                };

            let use_type = UseType::new(node.kind, node.is_definition).to_string();
            ops.push(BatchOp::Put(keys::spelling(symbol_id), spelling.to_string()));
            ops.push(BatchOp::Put(keys::member(path, symbol_id), "1".to_string()));
            ops.push(BatchOp::Put(
                keys::occurrence(symbol_id, path, location.line, location.col),
                use_type.clone(),
            ));
            occurrences += 1;

            if pass_through {
                continue;
            }
            let label = node.label();
            let family = SearchFamily::from_definition(node.is_definition && !node.kind.is_macro());
            for (namespace, term) in keys::search_terms(family, spelling) {
                let key = SearchKey {
                    namespace,
                    term,
                    symbol_id: symbol_id.to_string(),
                    path: path.to_string(),
                    line: location.line,
                    col: location.col,
                    label: label.clone(),
                };
                ops.push(BatchOp::Put(key.encode(), use_type.clone()));
            }
        }

        store.write_batch(&ops)?;
        Ok(occurrences)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::Namespace;
    use crate::symbol::CursorKind;
    use crate::testing::{self, FakeParser};

    const MAIN: &str = "/p/main.cpp";
    const UTIL: &str = "/p/util.h";

    fn setup() -> (Indexer, Arc<SqliteStore>, Arc<FakeParser>) {
        let store = StoreHandle::from_store(SqliteStore::open_in_memory().unwrap());
        let store = Arc::new(store);
        let parser = Arc::new(FakeParser::new());
        let indexer = Indexer::new(Arc::clone(&store), parser.clone());
        let sqlite = store.get().unwrap();
        (indexer, sqlite, parser)
    }

    fn main_unit() -> crate::parser::ParsedUnit {
        testing::unit(
            vec![
                testing::def(UTIL, 1, 6, CursorKind::FUNCTION_DECL, "doWork", "c:@F@doWork#"),
                testing::def(MAIN, 2, 5, CursorKind::FUNCTION_DECL, "main", "c:@F@main#"),
                testing::reference(MAIN, 3, 3, CursorKind::CALL_EXPR, "doWork", "c:@F@doWork#"),
            ],
            MAIN,
            &[UTIL],
        )
    }

    fn args() -> Vec<String> {
        vec!["clang++".into(), "-I/p".into()]
    }

    #[test]
    fn test_index_writes_all_namespaces() {
        let (indexer, store, parser) = setup();
        parser.set(MAIN, main_unit());

        let outcome = indexer.index(MAIN, &args(), 100).unwrap();
        assert_eq!(
            outcome,
            IndexOutcome::Indexed {
                occurrences: 2,
                errors: 0,
                headers: 1
            }
        );

        assert_eq!(store.get(&keys::file_meta(MAIN)).unwrap().as_deref(), Some("100"));
        assert_eq!(store.get(&keys::file_listing(MAIN)).unwrap().as_deref(), Some("1"));
        assert_eq!(store.get(&keys::spelling("c:@F@main#")).unwrap().as_deref(), Some("main"));
        assert_eq!(
            store
                .get(&keys::occurrence("c:@F@main#", MAIN, 2, 5))
                .unwrap()
                .as_deref(),
            Some("-8")
        );

        // Definition lands in def (whole word) and defsuf (every later offset)
        let defs = store.range_scan(&keys::search_prefix(Namespace::Definitions, "main")).unwrap();
        assert_eq!(defs.len(), 1);
        let sufs = store
            .range_scan(&Namespace::DefinitionSuffixes.prefix())
            .unwrap();
        assert_eq!(sufs.len(), 3);

        // The call is recorded but not searchable
        assert_eq!(
            store
                .get(&keys::occurrence("c:@F@doWork#", MAIN, 3, 3))
                .unwrap()
                .as_deref(),
            Some("103")
        );
        assert!(store
            .range_scan(&keys::search_prefix(Namespace::Definitions, "dowork"))
            .unwrap()
            .is_empty());

        // Nodes located in the header are left to the header's own parse
        assert!(store.range_scan(&keys::member_prefix(UTIL)).unwrap().is_empty());
    }

    #[test]
    fn test_dependency_edges_carry_args() {
        let (indexer, store, parser) = setup();
        parser.set(MAIN, main_unit());
        indexer.index(MAIN, &args(), 100).unwrap();

        let edges = store.range_scan(&keys::dependency_prefix(MAIN)).unwrap();
        assert_eq!(edges.len(), 1);
        let edge = DependencyEdge::decode(&edges[0].0, &edges[0].1).unwrap();
        assert_eq!(edge.header, UTIL);
        assert_eq!(edge.args, args());
        assert_eq!(store.range_scan(&keys::includer_prefix(UTIL)).unwrap().len(), 1);

        // A reparse without the include drops both directions
        parser.set(MAIN, testing::unit(vec![], MAIN, &[]));
        indexer.index(MAIN, &args(), 200).unwrap();
        assert!(store.range_scan(&keys::dependency_prefix(MAIN)).unwrap().is_empty());
        assert!(store.range_scan(&keys::includer_prefix(UTIL)).unwrap().is_empty());
    }

    #[test]
    fn test_unchanged_file_is_not_rewritten() {
        let (indexer, store, parser) = setup();
        parser.set(MAIN, main_unit());
        indexer.index(MAIN, &args(), 100).unwrap();

        let before = store.stats().unwrap();
        assert_eq!(indexer.index(MAIN, &args(), 100).unwrap(), IndexOutcome::UpToDate);
        assert_eq!(indexer.index(MAIN, &args(), 50).unwrap(), IndexOutcome::UpToDate);
        let after = store.stats().unwrap();

        assert_eq!(before, after);
        assert_eq!(parser.calls(), 1);
    }

    #[test]
    fn test_reparse_replaces_old_records() {
        let (indexer, store, parser) = setup();
        parser.set(
            MAIN,
            testing::unit(
                vec![testing::def(MAIN, 1, 5, CursorKind::VAR_DECL, "oldName", "c:@V@oldName")],
                MAIN,
                &[],
            ),
        );
        indexer.index(MAIN, &args(), 100).unwrap();

        parser.set(
            MAIN,
            testing::unit(
                vec![testing::def(MAIN, 4, 5, CursorKind::VAR_DECL, "newName", "c:@V@newName")],
                MAIN,
                &[],
            ),
        );
        indexer.index(MAIN, &args(), 200).unwrap();

        assert!(store.range_scan(&keys::occurrence_prefix("c:@V@oldName")).unwrap().is_empty());
        assert!(store
            .range_scan(&keys::search_prefix(Namespace::Definitions, "oldname"))
            .unwrap()
            .is_empty());
        assert!(store
            .range_scan(&keys::search_prefix(Namespace::DefinitionSuffixes, "ldname"))
            .unwrap()
            .is_empty());
        assert!(store.get(&keys::member(MAIN, "c:@V@oldName")).unwrap().is_none());
        // Spelling records outlive their occurrences
        assert!(store.get(&keys::spelling("c:@V@oldName")).unwrap().is_some());

        assert_eq!(store.range_scan(&keys::occurrence_prefix("c:@V@newName")).unwrap().len(), 1);
        assert_eq!(
            store
                .range_scan(&keys::search_prefix(Namespace::Definitions, "newname"))
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_reparse_keeps_other_files_records() {
        let (indexer, store, parser) = setup();
        let shared = "c:@F@doWork#";
        parser.set(
            UTIL,
            testing::unit(vec![testing::def(UTIL, 1, 6, CursorKind::FUNCTION_DECL, "doWork", shared)], UTIL, &[]),
        );
        parser.set(MAIN, main_unit());
        indexer.index(UTIL, &args(), 100).unwrap();
        indexer.index(MAIN, &args(), 100).unwrap();

        parser.set(MAIN, testing::unit(vec![], MAIN, &[]));
        indexer.index(MAIN, &args(), 200).unwrap();

        let occurrences = store.range_scan(&keys::occurrence_prefix(shared)).unwrap();
        assert_eq!(occurrences.len(), 1);
        assert!(occurrences[0].0.contains(UTIL));
    }

    #[test]
    fn test_parse_failure_leaves_sentinel() {
        let (indexer, store, parser) = setup();
        parser.fail(MAIN, "boom");

        let outcome = indexer.index(MAIN, &args(), 100).unwrap();
        assert_eq!(outcome, IndexOutcome::ParseFailed("Parse error: boom".to_string()));
        assert_eq!(store.get(&keys::file_meta(MAIN)).unwrap().as_deref(), Some("0"));
        assert_eq!(indexer.stored_mod_time(MAIN).unwrap(), Some(0));

        // The sentinel makes the next attempt with the same mtime reparse
        parser.set(MAIN, main_unit());
        assert!(matches!(
            indexer.index(MAIN, &args(), 100).unwrap(),
            IndexOutcome::Indexed { .. }
        ));
        assert_eq!(indexer.stored_mod_time(MAIN).unwrap(), Some(100));
    }

    #[test]
    fn test_interrupted_rewrite_is_redone() {
        let (indexer, store, parser) = setup();
        let old = testing::unit(
            vec![testing::def(MAIN, 1, 5, CursorKind::VAR_DECL, "oldName", "c:@V@oldName")],
            MAIN,
            &[],
        );
        parser.set(MAIN, old);
        indexer.index(MAIN, &args(), 100).unwrap();

        // Stopped right after the sentinel batch of a rewrite of the same version
        store.put(&keys::file_meta(MAIN), "0").unwrap();
        parser.set(
            MAIN,
            testing::unit(
                vec![testing::def(MAIN, 2, 5, CursorKind::VAR_DECL, "newName", "c:@V@newName")],
                MAIN,
                &[],
            ),
        );

        assert!(matches!(
            indexer.index(MAIN, &args(), 100).unwrap(),
            IndexOutcome::Indexed { occurrences: 1, .. }
        ));
        assert!(store.range_scan(&keys::occurrence_prefix("c:@V@oldName")).unwrap().is_empty());
        assert!(store.get(&keys::member(MAIN, "c:@V@oldName")).unwrap().is_none());
        assert_eq!(store.range_scan(&keys::occurrence_prefix("c:@V@newName")).unwrap().len(), 1);
        assert_eq!(indexer.stored_mod_time(MAIN).unwrap(), Some(100));
    }

    #[test]
    fn test_reindex_ignores_stored_time() {
        let (indexer, _store, parser) = setup();
        parser.set(MAIN, main_unit());
        indexer.index(MAIN, &args(), 100).unwrap();

        assert_eq!(indexer.index(MAIN, &args(), 100).unwrap(), IndexOutcome::UpToDate);
        assert!(matches!(
            indexer.reindex(MAIN, &args(), 100).unwrap(),
            IndexOutcome::Indexed { .. }
        ));
        assert_eq!(parser.calls(), 2);
        assert_eq!(indexer.stored_mod_time(MAIN).unwrap(), Some(100));
    }

    #[test]
    fn test_error_diagnostics_are_counted() {
        let (indexer, _store, parser) = setup();
        let mut unit = main_unit();
        unit.diagnostics.push(testing::error("'missing.h' file not found"));
        parser.set(MAIN, unit);

        match indexer.index(MAIN, &args(), 100).unwrap() {
            IndexOutcome::Indexed { errors, .. } => assert_eq!(errors, 1),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_declarations_use_decl_namespaces() {
        let (indexer, store, parser) = setup();
        parser.set(
            MAIN,
            testing::unit(
                vec![testing::decl(MAIN, 1, 6, CursorKind::FUNCTION_DECL, "ab", "c:@F@ab#")],
                MAIN,
                &[],
            ),
        );
        indexer.index(MAIN, &args(), 100).unwrap();

        let decls = store.range_scan(&Namespace::Declarations.prefix()).unwrap();
        assert_eq!(decls.len(), 1);
        assert_eq!(decls[0].1, "8");
        assert_eq!(store.range_scan(&Namespace::DeclarationSuffixes.prefix()).unwrap().len(), 1);
        assert!(store.range_scan(&Namespace::Definitions.prefix()).unwrap().is_empty());
    }
}
