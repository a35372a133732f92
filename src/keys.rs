//! Index keys - composite, sortable keys for every namespace in the store
//!
//! All keys are `%%%`-joined strings whose first part names the namespace:
//!
//! - `meta%%%<path>` => last indexed modification time (`0` while reparsing)
//! - `member%%%<path>%%%<symbol>` => `1`, symbols a file contributed
//! - `spelling%%%<symbol>` => spelling
//! - `occ%%%<symbol>%%%<path>%%%<line>%%%<col>` => use type
//! - `def|defsuf|decl|declsuf%%%<term>%%%<symbol>%%%<path>%%%<line>%%%<col>%%%<label>` => use type
//! - `file%%%<lowercase basename>%%%<path>` => `1`
//! - `dep%%%<includer>%%%<header>` => compile args (JSON)
//! - `includer%%%<header>%%%<includer>` => `1`
//!
//! Search terms are lowercased. The plain `def`/`decl` namespaces hold the
//! whole spelling, the `*suf` namespaces every later character offset, so a
//! prefix scan over them behaves like a "contains" search.

use crate::{Error, Result};

/// Separator between key parts
pub const DELIM: &str = "%%%";

/// Every namespace stored in the key space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    FileMeta,
    Member,
    Spelling,
    Occurrence,
    Definitions,
    DefinitionSuffixes,
    Declarations,
    DeclarationSuffixes,
    FileListing,
    Dependency,
    Includer,
}

impl Namespace {
    pub fn tag(&self) -> &'static str {
        match self {
            Namespace::FileMeta => "meta",
            Namespace::Member => "member",
            Namespace::Spelling => "spelling",
            Namespace::Occurrence => "occ",
            Namespace::Definitions => "def",
            Namespace::DefinitionSuffixes => "defsuf",
            Namespace::Declarations => "decl",
            Namespace::DeclarationSuffixes => "declsuf",
            Namespace::FileListing => "file",
            Namespace::Dependency => "dep",
            Namespace::Includer => "includer",
        }
    }

    /// Tag followed by the delimiter; the prefix of every key in the namespace
    pub fn prefix(&self) -> String {
        format!("{}{}", self.tag(), DELIM)
    }
}

/// The four search namespaces, in the order queries consume them
pub const SEARCH_NAMESPACES: [Namespace; 4] = [
    Namespace::Definitions,
    Namespace::DefinitionSuffixes,
    Namespace::Declarations,
    Namespace::DeclarationSuffixes,
];

/// Which pair of search namespaces an entry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchFamily {
    Definition,
    Declaration,
}

impl SearchFamily {
    pub fn from_definition(is_definition: bool) -> Self {
        if is_definition {
            SearchFamily::Definition
        } else {
            SearchFamily::Declaration
        }
    }

    /// Namespace for a term starting at character `offset` of the spelling
    pub fn namespace(&self, offset: usize) -> Namespace {
        match (self, offset) {
            (SearchFamily::Definition, 0) => Namespace::Definitions,
            (SearchFamily::Definition, _) => Namespace::DefinitionSuffixes,
            (SearchFamily::Declaration, 0) => Namespace::Declarations,
            (SearchFamily::Declaration, _) => Namespace::DeclarationSuffixes,
        }
    }
}

fn join(parts: &[&str]) -> String {
    parts.join(DELIM)
}

/// Split `key` into exactly `n` parts after checking its namespace tag.
/// The last part keeps any embedded delimiters.
fn split(key: &str, ns: Namespace, n: usize) -> Result<Vec<&str>> {
    let parts: Vec<&str> = key.splitn(n, DELIM).collect();
    if parts.len() != n || parts[0] != ns.tag() {
        return Err(Error::InvalidKey(format!(
            "expected {} parts in '{}' key: {}",
            n,
            ns.tag(),
            key
        )));
    }
    Ok(parts)
}

fn parse_u32(part: &str, key: &str) -> Result<u32> {
    part.parse()
        .map_err(|_| Error::InvalidKey(format!("invalid number '{}' in key: {}", part, key)))
}

/// Last path component, or the whole string when there is none
pub fn base_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(pos) if pos + 1 < path.len() => &path[pos + 1..],
        _ => path,
    }
}

// ========== File Metadata ==========

pub fn file_meta(path: &str) -> String {
    join(&[Namespace::FileMeta.tag(), path])
}

/// Decode a stored modification time; unreadable values count as never indexed
pub fn decode_mod_time(value: &str) -> i64 {
    value.trim().parse().unwrap_or(0)
}

// ========== Membership ==========

pub fn member(path: &str, symbol_id: &str) -> String {
    join(&[Namespace::Member.tag(), path, symbol_id])
}

/// Prefix of every membership record of `path`
pub fn member_prefix(path: &str) -> String {
    join(&[Namespace::Member.tag(), path, ""])
}

/// Decode a membership key into `(path, symbol_id)`
pub fn parse_member(key: &str) -> Result<(String, String)> {
    let parts = split(key, Namespace::Member, 3)?;
    Ok((parts[1].to_string(), parts[2].to_string()))
}

// ========== Spelling ==========

pub fn spelling(symbol_id: &str) -> String {
    join(&[Namespace::Spelling.tag(), symbol_id])
}

// ========== Occurrences ==========

pub fn occurrence(symbol_id: &str, path: &str, line: u32, col: u32) -> String {
    join(&[
        Namespace::Occurrence.tag(),
        symbol_id,
        path,
        &line.to_string(),
        &col.to_string(),
    ])
}

/// Prefix of every occurrence of a symbol, across files
pub fn occurrence_prefix(symbol_id: &str) -> String {
    join(&[Namespace::Occurrence.tag(), symbol_id, ""])
}

/// Prefix of the occurrences of a symbol inside one file
pub fn occurrence_file_prefix(symbol_id: &str, path: &str) -> String {
    join(&[Namespace::Occurrence.tag(), symbol_id, path, ""])
}

/// Decoded occurrence key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccurrenceKey {
    pub symbol_id: String,
    pub path: String,
    pub line: u32,
    pub col: u32,
}

impl OccurrenceKey {
    pub fn parse(key: &str) -> Result<Self> {
        let parts = split(key, Namespace::Occurrence, 5)?;
        Ok(Self {
            symbol_id: parts[1].to_string(),
            path: parts[2].to_string(),
            line: parse_u32(parts[3], key)?,
            col: parse_u32(parts[4], key)?,
        })
    }
}

// ========== Search ==========

/// One entry of a search namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchKey {
    pub namespace: Namespace,
    /// Lowercased spelling or spelling suffix
    pub term: String,
    pub symbol_id: String,
    pub path: String,
    pub line: u32,
    pub col: u32,
    /// Scope-qualified display name shown in search results
    pub label: String,
}

impl SearchKey {
    pub fn encode(&self) -> String {
        join(&[
            self.namespace.tag(),
            &self.term,
            &self.symbol_id,
            &self.path,
            &self.line.to_string(),
            &self.col.to_string(),
            &self.label,
        ])
    }

    pub fn parse(namespace: Namespace, key: &str) -> Result<Self> {
        let parts = split(key, namespace, 7)?;
        Ok(Self {
            namespace,
            term: parts[1].to_string(),
            symbol_id: parts[2].to_string(),
            path: parts[3].to_string(),
            line: parse_u32(parts[4], key)?,
            col: parse_u32(parts[5], key)?,
            label: parts[6].to_string(),
        })
    }
}

/// Scan prefix for a (lowercased) query term in a search namespace
pub fn search_prefix(namespace: Namespace, term: &str) -> String {
    join(&[namespace.tag(), term])
}

/// Prefix of every entry of one symbol in one file for a given term
pub fn search_file_prefix(namespace: Namespace, term: &str, symbol_id: &str, path: &str) -> String {
    join(&[namespace.tag(), term, symbol_id, path, ""])
}

/// Expand a spelling into its lowercased suffixes, one per character offset.
///
/// Offset 0 is the whole spelling.
pub fn suffixes(spelling: &str) -> Vec<(usize, String)> {
    let lowered = spelling.to_lowercase();
    lowered
        .char_indices()
        .enumerate()
        .map(|(offset, (byte_idx, _))| (offset, lowered[byte_idx..].to_string()))
        .collect()
}

/// `(namespace, term)` pairs an entry with this spelling is stored under
pub fn search_terms(family: SearchFamily, spelling: &str) -> Vec<(Namespace, String)> {
    suffixes(spelling)
        .into_iter()
        .map(|(offset, term)| (family.namespace(offset), term))
        .collect()
}

// ========== File Listing ==========

pub fn file_listing(path: &str) -> String {
    join(&[
        Namespace::FileListing.tag(),
        &base_name(path).to_lowercase(),
        path,
    ])
}

/// Scan prefix for a (lowercased) file name prefix
pub fn file_listing_prefix(lower_prefix: &str) -> String {
    join(&[Namespace::FileListing.tag(), lower_prefix])
}

/// Full path stored in a file listing key
pub fn parse_file_listing(key: &str) -> Result<String> {
    let parts = split(key, Namespace::FileListing, 3)?;
    Ok(parts[2].to_string())
}

// ========== Dependencies ==========

pub fn dependency(includer: &str, header: &str) -> String {
    join(&[Namespace::Dependency.tag(), includer, header])
}

/// Prefix of every dependency edge of an includer
pub fn dependency_prefix(includer: &str) -> String {
    join(&[Namespace::Dependency.tag(), includer, ""])
}

/// Decode a dependency key into `(includer, header)`
pub fn parse_dependency(key: &str) -> Result<(String, String)> {
    let parts = split(key, Namespace::Dependency, 3)?;
    Ok((parts[1].to_string(), parts[2].to_string()))
}

pub fn includer(header: &str, includer: &str) -> String {
    join(&[Namespace::Includer.tag(), header, includer])
}

/// Prefix of every includer recorded for a header
pub fn includer_prefix(header: &str) -> String {
    join(&[Namespace::Includer.tag(), header, ""])
}

/// Decode a reverse dependency key into `(header, includer)`
pub fn parse_includer(key: &str) -> Result<(String, String)> {
    let parts = split(key, Namespace::Includer, 3)?;
    Ok((parts[1].to_string(), parts[2].to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffix_expansion() {
        let terms = suffixes("doWork");
        assert_eq!(terms.len(), 6);
        assert_eq!(terms[0], (0, "dowork".to_string()));
        assert_eq!(terms[1], (1, "owork".to_string()));
        assert_eq!(terms[5], (5, "k".to_string()));
        assert!(suffixes("").is_empty());
    }

    #[test]
    fn test_search_terms_split_by_offset() {
        let terms = search_terms(SearchFamily::Definition, "Abc");
        assert_eq!(
            terms,
            vec![
                (Namespace::Definitions, "abc".to_string()),
                (Namespace::DefinitionSuffixes, "bc".to_string()),
                (Namespace::DefinitionSuffixes, "c".to_string()),
            ]
        );

        let terms = search_terms(SearchFamily::Declaration, "x");
        assert_eq!(terms, vec![(Namespace::Declarations, "x".to_string())]);
    }

    #[test]
    fn test_search_key_parse() {
        let key = SearchKey {
            namespace: Namespace::DefinitionSuffixes,
            term: "work".into(),
            symbol_id: "c:@F@doWork#".into(),
            path: "/src/util.h".into(),
            line: 3,
            col: 6,
            label: "ops::operator%(int)".into(),
        };
        let encoded = key.encode();
        assert!(encoded.starts_with("defsuf%%%work%%%c:@F@doWork#%%%/src/util.h%%%3%%%6%%%"));

        let parsed = SearchKey::parse(Namespace::DefinitionSuffixes, &encoded).unwrap();
        assert_eq!(parsed, key);
        assert!(SearchKey::parse(Namespace::Definitions, &encoded).is_err());
    }

    #[test]
    fn test_namespace_prefixes_do_not_overlap() {
        let def = search_prefix(Namespace::Definitions, "");
        let defsuf = keys_for(Namespace::DefinitionSuffixes);
        assert!(!defsuf.starts_with(&def));
    }

    fn keys_for(ns: Namespace) -> String {
        SearchKey {
            namespace: ns,
            term: "a".into(),
            symbol_id: "s".into(),
            path: "p".into(),
            line: 1,
            col: 1,
            label: "a".into(),
        }
        .encode()
    }

    #[test]
    fn test_file_listing_key() {
        let key = file_listing("/proj/include/Util.H");
        assert_eq!(key, "file%%%util.h%%%/proj/include/Util.H");
        assert!(key.starts_with(&file_listing_prefix("util")));
        assert_eq!(parse_file_listing(&key).unwrap(), "/proj/include/Util.H");
    }

    #[test]
    fn test_occurrence_and_member_keys() {
        let key = occurrence("c:@F@f#", "/a.cpp", 10, 4);
        assert!(key.starts_with(&occurrence_prefix("c:@F@f#")));
        assert!(key.starts_with(&occurrence_file_prefix("c:@F@f#", "/a.cpp")));
        let parsed = OccurrenceKey::parse(&key).unwrap();
        assert_eq!((parsed.line, parsed.col), (10, 4));

        let key = member("/a.cpp", "c:@F@f#");
        assert!(key.starts_with(&member_prefix("/a.cpp")));
        assert_eq!(
            parse_member(&key).unwrap(),
            ("/a.cpp".to_string(), "c:@F@f#".to_string())
        );
    }

    #[test]
    fn test_dependency_keys() {
        let key = dependency("/a.cpp", "/a.h");
        assert_eq!(parse_dependency(&key).unwrap(), ("/a.cpp".into(), "/a.h".into()));
        let key = includer("/a.h", "/a.cpp");
        assert_eq!(parse_includer(&key).unwrap(), ("/a.h".into(), "/a.cpp".into()));
        assert!(parse_dependency("dep%%%only").is_err());
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("/a/b/c.h"), "c.h");
        assert_eq!(base_name("c.h"), "c.h");
        assert_eq!(base_name("/a/b/"), "/a/b/");
    }
}
