//! Translation Unit Parser - the seam between the index and C/C++ parsing
//!
//! The index never inspects source text itself. A parser turns one file plus
//! its compile arguments into a [`ParsedUnit`]: a tree of [`Node`]s spanning
//! the file and every header it pulled in, the headers it resolved, and
//! diagnostics. [`CppParser`] is the bundled tree-sitter implementation.

pub mod cpp;
pub mod includes;

pub use cpp::CppParser;
pub use includes::SearchPaths;

use crate::symbol::CursorKind;
use crate::Result;
use std::path::{Path, PathBuf};

/// Diagnostic severity, ordered like libclang's `CXDiagnosticSeverity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Ignored,
    Note,
    Warning,
    Error,
    Fatal,
}

impl Severity {
    pub fn is_error(&self) -> bool {
        *self >= Severity::Error
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Ignored => "ignored",
            Severity::Note => "note",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    pub file: PathBuf,
    /// 1-indexed
    pub line: u32,
    /// 1-indexed, in bytes
    pub col: u32,
}

impl SourceLocation {
    pub fn new(file: impl Into<PathBuf>, line: u32, col: u32) -> Self {
        Self {
            file: file.into(),
            line,
            col,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub location: Option<SourceLocation>,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Some(loc) => write!(
                f,
                "{}:{}:{}: {}: {}",
                loc.file.display(),
                loc.line,
                loc.col,
                self.severity.as_str(),
                self.message
            ),
            None => write!(f, "{}: {}", self.severity.as_str(), self.message),
        }
    }
}

/// The declaration a reference node points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolRef {
    pub symbol_id: String,
    pub spelling: String,
    pub location: Option<SourceLocation>,
}

/// One node of the parsed tree.
///
/// Declarations carry their own `symbol_id`; pure references leave it empty
/// and point at their target through `referenced`.
#[derive(Debug, Clone, Default)]
pub struct Node {
    pub kind: CursorKind,
    pub location: Option<SourceLocation>,
    /// End of the node's extent in the same file, `(line, col)` exclusive
    pub extent_end: Option<(u32, u32)>,
    pub spelling: String,
    pub symbol_id: String,
    /// Name with signature, e.g. `norm()` or `Point`
    pub display_name: String,
    /// Display names of the semantic parents, outermost first
    pub scope: Vec<String>,
    pub is_definition: bool,
    pub children: Vec<Node>,
    pub referenced: Option<SymbolRef>,
}

impl Node {
    pub fn new(kind: CursorKind) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    /// Depth-first, pre-order traversal of this node and its descendants
    pub fn walk(&self) -> NodeWalk<'_> {
        NodeWalk { stack: vec![self] }
    }

    /// Whether `(line, col)` in `file` falls inside this node's extent
    pub fn contains(&self, file: &Path, line: u32, col: u32) -> bool {
        let (Some(loc), Some(end)) = (&self.location, self.extent_end) else {
            return false;
        };
        loc.file == file && (loc.line, loc.col) <= (line, col) && (line, col) < end
    }

    /// Nodes enclosing a position, outermost first, ending at the innermost
    pub fn path_to(&self, file: &Path, line: u32, col: u32) -> Vec<&Node> {
        let mut path = Vec::new();
        let mut current = self;
        loop {
            match current.children.iter().find(|c| c.contains(file, line, col)) {
                Some(child) => {
                    path.push(child);
                    current = child;
                }
                None => return path,
            }
        }
    }

    /// `symbol_id`, falling back to the referenced declaration's
    pub fn target_id(&self) -> Option<&str> {
        if !self.symbol_id.is_empty() {
            Some(&self.symbol_id)
        } else {
            self.referenced
                .as_ref()
                .map(|r| r.symbol_id.as_str())
                .filter(|id| !id.is_empty())
        }
    }

    /// Display label: semantic parents and display name joined with `::`
    pub fn label(&self) -> String {
        let name = if self.display_name.is_empty() {
            &self.spelling
        } else {
            &self.display_name
        };
        if self.scope.is_empty() {
            name.to_string()
        } else {
            format!("{}::{}", self.scope.join("::"), name)
        }
    }
}

/// Iterator returned by [`Node::walk`]
pub struct NodeWalk<'a> {
    stack: Vec<&'a Node>,
}

impl<'a> Iterator for NodeWalk<'a> {
    type Item = &'a Node;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

/// A header resolved while parsing a translation unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Include {
    pub header: PathBuf,
    pub includer: PathBuf,
    /// Found through a system search path; not indexed
    pub is_system: bool,
}

#[derive(Debug, Clone)]
pub struct ParsedUnit {
    pub diagnostics: Vec<Diagnostic>,
    pub root: Node,
    pub includes: Vec<Include>,
}

impl ParsedUnit {
    /// Diagnostics with severity error or fatal
    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.severity.is_error())
    }
}

/// In-memory content overriding a file on disk
#[derive(Debug, Clone)]
pub struct UnsavedFile {
    pub path: PathBuf,
    pub content: String,
}

impl UnsavedFile {
    pub fn new(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// Parses one translation unit.
///
/// Implementations must be shareable across worker threads.
pub trait TranslationUnitParser: Send + Sync {
    /// Parser name for logs
    fn name(&self) -> &str;

    /// Parse `path` with compile `args`, preferring `unsaved` content over
    /// the file system for any file it names.
    ///
    /// Returns an error only when no tree could be produced at all.
    fn parse(&self, path: &Path, args: &[String], unsaved: &[UnsavedFile]) -> Result<ParsedUnit>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn located(kind: CursorKind, line: u32, col: u32, end: (u32, u32)) -> Node {
        Node {
            location: Some(SourceLocation::new("/a.cpp", line, col)),
            extent_end: Some(end),
            ..Node::new(kind)
        }
    }

    #[test]
    fn test_walk_is_preorder() {
        let mut root = Node::new(CursorKind::TRANSLATION_UNIT);
        let mut func = located(CursorKind::FUNCTION_DECL, 1, 1, (3, 2));
        func.children.push(located(CursorKind::CALL_EXPR, 2, 5, (2, 12)));
        root.children.push(func);
        root.children.push(located(CursorKind::VAR_DECL, 4, 1, (4, 10)));

        let kinds: Vec<i32> = root.walk().map(|n| n.kind.0).collect();
        assert_eq!(kinds, vec![300, 8, 103, 9]);
    }

    #[test]
    fn test_path_to_finds_innermost() {
        let mut root = Node::new(CursorKind::TRANSLATION_UNIT);
        let mut func = located(CursorKind::FUNCTION_DECL, 1, 1, (3, 2));
        func.children.push(located(CursorKind::CALL_EXPR, 2, 5, (2, 12)));
        root.children.push(func);

        let path = root.path_to(Path::new("/a.cpp"), 2, 7);
        assert_eq!(path.len(), 2);
        assert_eq!(path[1].kind, CursorKind::CALL_EXPR);

        assert!(root.path_to(Path::new("/a.cpp"), 9, 1).is_empty());
        assert!(root.path_to(Path::new("/b.cpp"), 2, 7).is_empty());
    }

    #[test]
    fn test_label_and_target() {
        let mut node = Node::new(CursorKind::CXX_METHOD);
        node.spelling = "norm".into();
        node.display_name = "norm()".into();
        node.scope = vec!["geom".into(), "Point".into()];
        assert_eq!(node.label(), "geom::Point::norm()");
        assert_eq!(node.target_id(), None);

        node.referenced = Some(SymbolRef {
            symbol_id: "c:@geom@Point@F@norm#".into(),
            spelling: "norm".into(),
            location: None,
        });
        assert_eq!(node.target_id(), Some("c:@geom@Point@F@norm#"));
    }
}
