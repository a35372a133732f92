//! Query engine implementation
//!
//! Provides the read-side operations over the index:
//! - Prefix search across file names and the four search namespaces
//! - Occurrence lookups for go-to-definition and find-references
//! - Raw range scans for debugging

use crate::keys::{self, Namespace, OccurrenceKey, SearchKey, SEARCH_NAMESPACES};
use crate::storage::SqliteStore;
use crate::symbol::{Location, Occurrence, SymbolKind, UseType};
use crate::Result;
use serde::{Deserialize, Serialize};

/// Label returned for an empty query
pub const SEARCH_HINT: &str = "Search for a function, class, variable, or file name.";

/// Ranked search results; `labels[n]` is resolved by `locations[n]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResults {
    pub labels: Vec<String>,
    pub locations: Vec<Location>,
}

impl MatchResults {
    /// The instructional result for an empty query
    pub fn hint() -> Self {
        Self {
            labels: vec![SEARCH_HINT.to_string()],
            locations: Vec::new(),
        }
    }

    /// Location of the result numbered `ordinal`
    pub fn resolve(&self, ordinal: usize) -> Option<&Location> {
        self.locations.get(ordinal)
    }

    /// Location of a rendered result line such as `main.cpp (/src/main.cpp) [0]`
    pub fn resolve_line(&self, line: &str) -> Option<&Location> {
        parse_ordinal(line).and_then(|n| self.resolve(n))
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    fn push(&mut self, label: String, location: Location) {
        let ordinal = self.locations.len();
        self.labels.push(format!("{} [{}]", label, ordinal));
        self.locations.push(location);
    }
}

/// Ordinal at the end of a rendered result line (`... [n]`)
pub fn parse_ordinal(line: &str) -> Option<usize> {
    let line = line.trim_end();
    let inner = line.strip_suffix(']')?;
    let open = inner.rfind('[')?;
    inner[open + 1..].trim().parse().ok()
}

/// One occurrence labelled for find-references
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub location: Location,
    pub use_type: UseType,
    pub kind: SymbolKind,
    /// Human-readable use, e.g. `function call` or `function DEFINITION`
    pub description: String,
}

impl From<Occurrence> for Reference {
    fn from(occurrence: Occurrence) -> Self {
        Self {
            kind: occurrence.kind(),
            description: occurrence.describe(),
            use_type: occurrence.use_type,
            location: occurrence.location,
        }
    }
}

/// Query engine over the index store
pub struct QueryEngine<'a> {
    store: &'a SqliteStore,
}

impl<'a> QueryEngine<'a> {
    /// Create a new query engine
    pub fn new(store: &'a SqliteStore) -> Self {
        Self { store }
    }

    /// Search file names, then definitions, definition suffixes,
    /// declarations and declaration suffixes for `prefix`, case-insensitively.
    ///
    /// Results are numbered across namespaces and capped at `limit` in total.
    /// An empty prefix yields the instructional hint.
    pub fn match_prefix(&self, prefix: Option<&str>, limit: usize) -> Result<MatchResults> {
        let prefix = match prefix {
            Some(p) if !p.is_empty() => p.to_lowercase(),
            _ => return Ok(MatchResults::hint()),
        };

        let mut results = MatchResults::default();
        if limit == 0 {
            return Ok(results);
        }

        for (key, _) in self
            .store
            .range_scan_limit(&keys::file_listing_prefix(&prefix), limit)?
        {
            let full_path = keys::parse_file_listing(&key)?;
            let label = format!("{} ({})", keys::base_name(&full_path), full_path);
            results.push(label, Location::new(full_path, 1, 1));
        }

        for namespace in SEARCH_NAMESPACES {
            let remaining = limit - results.len();
            if remaining == 0 {
                break;
            }
            let scan = self
                .store
                .range_scan_limit(&keys::search_prefix(namespace, &prefix), remaining)?;
            for (key, value) in scan {
                let entry = SearchKey::parse(namespace, &key)?;
                let use_type: UseType = value.parse()?;
                let label = format!("{} - {} from {}", entry.label, use_type.describe(), entry.path);
                results.push(label, Location::new(entry.path, entry.line, entry.col));
            }
        }

        Ok(results)
    }

    /// Every recorded occurrence of `symbol_id`, ordered by file and position
    pub fn occurrences(&self, symbol_id: &str) -> Result<Vec<Occurrence>> {
        let mut occurrences: Vec<Occurrence> = self
            .store
            .range_scan(&keys::occurrence_prefix(symbol_id))?
            .into_iter()
            .map(|(key, value)| {
                let parsed = OccurrenceKey::parse(&key)?;
                Ok(Occurrence {
                    symbol_id: parsed.symbol_id,
                    location: Location::new(parsed.path, parsed.line, parsed.col),
                    use_type: value.parse()?,
                })
            })
            .collect::<Result<_>>()?;
        // Keys sort line numbers as text
        occurrences.sort_by(|a, b| a.location.cmp(&b.location));
        Ok(occurrences)
    }

    /// The first occurrence recorded as a definition
    pub fn definition(&self, symbol_id: &str) -> Result<Option<Occurrence>> {
        Ok(self
            .occurrences(symbol_id)?
            .into_iter()
            .find(|o| o.use_type.is_definition()))
    }

    /// Every occurrence of `symbol_id` labelled with its use
    pub fn references(&self, symbol_id: &str) -> Result<Vec<Reference>> {
        Ok(self
            .occurrences(symbol_id)?
            .into_iter()
            .map(Reference::from)
            .collect())
    }

    /// Spelling recorded for `symbol_id`
    pub fn spelling(&self, symbol_id: &str) -> Result<Option<String>> {
        self.store.get(&keys::spelling(symbol_id))
    }

    /// Raw `(key, value)` pairs under `prefix`
    pub fn raw_range_search(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        self.store.range_scan(prefix)
    }

    /// Number of files that have been listed in the index
    pub fn file_count(&self) -> Result<usize> {
        Ok(self.store.range_scan(&Namespace::FileListing.prefix())?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::BatchOp;

    fn put_search(store: &SqliteStore, ns: Namespace, term: &str, id: &str, path: &str, line: u32, label: &str, use_type: i32) {
        let key = SearchKey {
            namespace: ns,
            term: term.to_string(),
            symbol_id: id.to_string(),
            path: path.to_string(),
            line,
            col: 6,
            label: label.to_string(),
        };
        store.put(&key.encode(), &use_type.to_string()).unwrap();
    }

    fn sample_store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put(&keys::file_listing("/p/work.cpp"), "1").unwrap();
        put_search(&store, Namespace::Definitions, "dowork", "c:@F@doWork#", "/p/util.h", 1, "doWork()", -8);
        put_search(&store, Namespace::DefinitionSuffixes, "work", "c:@F@doWork#", "/p/util.h", 1, "doWork()", -8);
        put_search(&store, Namespace::Declarations, "workers", "c:@V@workers", "/p/pool.h", 3, "workers", 9);
        put_search(&store, Namespace::DeclarationSuffixes, "orkers", "c:@V@workers", "/p/pool.h", 3, "workers", 9);
        store
    }

    #[test]
    fn test_empty_prefix_gives_hint() {
        let store = sample_store();
        let engine = QueryEngine::new(&store);
        for prefix in [None, Some("")] {
            let results = engine.match_prefix(prefix, 10).unwrap();
            assert_eq!(results.labels, vec![SEARCH_HINT.to_string()]);
            assert!(results.locations.is_empty());
        }
    }

    #[test]
    fn test_match_orders_namespaces_and_numbers_results() {
        let store = sample_store();
        let engine = QueryEngine::new(&store);
        let results = engine.match_prefix(Some("Work"), 10).unwrap();

        assert_eq!(
            results.labels,
            vec![
                "work.cpp (/p/work.cpp) [0]".to_string(),
                "doWork() - function DEFINITION from /p/util.h [1]".to_string(),
                "workers - variable declaration from /p/pool.h [2]".to_string(),
            ]
        );
        assert_eq!(results.resolve(0), Some(&Location::new("/p/work.cpp", 1, 1)));
        assert_eq!(results.resolve(1), Some(&Location::new("/p/util.h", 1, 6)));
        assert_eq!(results.resolve_line(&results.labels[2]), Some(&Location::new("/p/pool.h", 3, 6)));
    }

    #[test]
    fn test_match_limit_spans_namespaces() {
        let store = sample_store();
        let engine = QueryEngine::new(&store);
        let results = engine.match_prefix(Some("work"), 2).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.labels[1].contains("doWork()"));

        assert!(engine.match_prefix(Some("work"), 0).unwrap().is_empty());
        assert!(engine.match_prefix(Some("nothing"), 5).unwrap().is_empty());
    }

    #[test]
    fn test_suffix_and_whole_word_matches() {
        let store = sample_store();
        let engine = QueryEngine::new(&store);
        for query in ["doWork", "DOWORK", "dow"] {
            let results = engine.match_prefix(Some(query), 5).unwrap();
            assert_eq!(results.len(), 1, "query {}", query);
        }
        // "orkers" only lives in the declaration suffix namespace
        let results = engine.match_prefix(Some("orkers"), 5).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results.labels[0].starts_with("workers - variable declaration"));
    }

    #[test]
    fn test_parse_ordinal() {
        assert_eq!(parse_ordinal("main.cpp (/p/main.cpp) [12]"), Some(12));
        assert_eq!(parse_ordinal("x [0]  "), Some(0));
        assert_eq!(parse_ordinal("no ordinal"), None);
        assert_eq!(parse_ordinal("bad [x]"), None);
    }

    #[test]
    fn test_occurrence_lookups() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = "c:@F@doWork#";
        store
            .write_batch(&[
                BatchOp::Put(keys::occurrence(id, "/p/main.cpp", 10, 3), "103".into()),
                BatchOp::Put(keys::occurrence(id, "/p/main.cpp", 9, 3), "103".into()),
                BatchOp::Put(keys::occurrence(id, "/p/util.h", 1, 6), "-8".into()),
                BatchOp::Put(keys::occurrence("c:@F@other#", "/p/a.cpp", 1, 1), "-8".into()),
            ])
            .unwrap();
        let engine = QueryEngine::new(&store);

        let all = engine.occurrences(id).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].location, Location::new("/p/main.cpp", 9, 3));
        assert_eq!(all[1].location, Location::new("/p/main.cpp", 10, 3));

        let def = engine.definition(id).unwrap().unwrap();
        assert_eq!(def.location, Location::new("/p/util.h", 1, 6));

        let refs = engine.references(id).unwrap();
        assert_eq!(refs[0].description, "function call");
        assert_eq!(refs[0].kind, SymbolKind::Callable);
        assert_eq!(refs[2].description, "function DEFINITION");

        assert!(engine.definition("c:@F@missing#").unwrap().is_none());
    }
}
