//! Symbol types - what the index records about C/C++ entities
//!
//! - `CursorKind`: the parser's node kind, numbered like libclang cursors
//! - `UseType`: a node kind at one occurrence, negated for definitions
//! - `SymbolKind`: coarse category used for display and filtering
//! - `Location`, `Occurrence`: the records built from them

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Parser node kind. Values follow libclang's `CXCursorKind` numbering so
/// an index written by any conforming parser reads the same.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CursorKind(pub i32);

impl CursorKind {
    pub const UNEXPOSED_DECL: CursorKind = CursorKind(1);
    pub const STRUCT_DECL: CursorKind = CursorKind(2);
    pub const UNION_DECL: CursorKind = CursorKind(3);
    pub const CLASS_DECL: CursorKind = CursorKind(4);
    pub const ENUM_DECL: CursorKind = CursorKind(5);
    pub const FIELD_DECL: CursorKind = CursorKind(6);
    pub const ENUM_CONSTANT_DECL: CursorKind = CursorKind(7);
    pub const FUNCTION_DECL: CursorKind = CursorKind(8);
    pub const VAR_DECL: CursorKind = CursorKind(9);
    pub const PARM_DECL: CursorKind = CursorKind(10);
    pub const TYPEDEF_DECL: CursorKind = CursorKind(20);
    pub const CXX_METHOD: CursorKind = CursorKind(21);
    pub const NAMESPACE: CursorKind = CursorKind(22);
    pub const CONSTRUCTOR: CursorKind = CursorKind(24);
    pub const DESTRUCTOR: CursorKind = CursorKind(25);
    pub const CONVERSION_FUNCTION: CursorKind = CursorKind(26);
    pub const TEMPLATE_TYPE_PARAMETER: CursorKind = CursorKind(27);
    pub const FUNCTION_TEMPLATE: CursorKind = CursorKind(30);
    pub const CLASS_TEMPLATE: CursorKind = CursorKind(31);
    pub const NAMESPACE_ALIAS: CursorKind = CursorKind(33);
    pub const TYPE_ALIAS_DECL: CursorKind = CursorKind(36);
    pub const TYPE_REF: CursorKind = CursorKind(43);
    pub const TEMPLATE_REF: CursorKind = CursorKind(45);
    pub const NAMESPACE_REF: CursorKind = CursorKind(46);
    pub const MEMBER_REF: CursorKind = CursorKind(47);
    pub const DECL_REF_EXPR: CursorKind = CursorKind(101);
    pub const MEMBER_REF_EXPR: CursorKind = CursorKind(102);
    pub const CALL_EXPR: CursorKind = CursorKind(103);
    pub const TRANSLATION_UNIT: CursorKind = CursorKind(300);
    pub const MACRO_DEFINITION: CursorKind = CursorKind(501);
    pub const MACRO_EXPANSION: CursorKind = CursorKind(502);
    pub const INCLUSION_DIRECTIVE: CursorKind = CursorKind(503);

    /// Human-readable description, `None` for kinds outside the table
    pub fn describe(&self) -> Option<&'static str> {
        let text = match self.0 {
            1..=5 => "type declaration",
            6 => "member declaration",
            7 => "enum declaration",
            8 => "function declaration",
            9 => "variable declaration",
            10 => "argument declaration",
            20 => "typedef declaration",
            21 => "method declaration",
            22 => "namespace declaration",
            24 => "constructor declaration",
            25 => "destructor declaration",
            26 => "conversion function declaration",
            27 => "template type parameter",
            28 => "non-type template parameter",
            29 => "template template parameter",
            30 => "function template declaration",
            31 => "class template declaration",
            32 => "class template partial specialization",
            33 => "namespace alias",
            36 => "type alias declaration",
            43 => "type reference",
            44 => "base specifier",
            45 => "template reference",
            46 => "namespace reference",
            47 => "member reference",
            48 => "label reference",
            49 => "overloaded declaration reference",
            100 => "expression",
            101 => "reference",
            102 => "member reference",
            103 => "function call",
            501 => "macro declaration",
            502 => "macro instantiation",
            _ => return None,
        };
        Some(text)
    }

    /// Macro-like nodes never report definitions
    pub fn is_macro(&self) -> bool {
        matches!(*self, CursorKind::MACRO_DEFINITION | CursorKind::MACRO_EXPANSION)
    }

    pub fn is_declaration(&self) -> bool {
        (1..=39).contains(&self.0)
    }

    pub fn is_reference(&self) -> bool {
        (40..=199).contains(&self.0) || self.0 == 502
    }
}

/// Coarse symbol categories used for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    /// Namespace or namespace alias
    Namespace,
    /// Class, struct, union, enum, typedef
    Container,
    /// Function, method, constructor, template function
    Callable,
    /// Field, variable, parameter, enumerator
    Value,
    /// Preprocessor macro
    Macro,
    /// Anything else the parser reports
    Other,
}

impl SymbolKind {
    /// Get the string representation of the symbol kind
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Namespace => "namespace",
            SymbolKind::Container => "container",
            SymbolKind::Callable => "callable",
            SymbolKind::Value => "value",
            SymbolKind::Macro => "macro",
            SymbolKind::Other => "other",
        }
    }

    /// Category of the entity a node of this kind names or refers to
    pub fn from_cursor(kind: CursorKind) -> Self {
        match kind.0 {
            22 | 33 | 46 => SymbolKind::Namespace,
            1..=5 | 20 | 31 | 32 | 36 | 43 | 45 => SymbolKind::Container,
            8 | 21 | 24..=26 | 30 | 103 => SymbolKind::Callable,
            6 | 7 | 9 | 10 | 47 | 101 | 102 => SymbolKind::Value,
            501 | 502 => SymbolKind::Macro,
            _ => SymbolKind::Other,
        }
    }
}

impl FromStr for SymbolKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "namespace" | "ns" => Ok(SymbolKind::Namespace),
            "container" | "class" | "struct" | "union" | "enum" | "type" => Ok(SymbolKind::Container),
            "callable" | "function" | "method" | "fn" => Ok(SymbolKind::Callable),
            "value" | "field" | "variable" | "var" => Ok(SymbolKind::Value),
            "macro" | "define" => Ok(SymbolKind::Macro),
            "other" => Ok(SymbolKind::Other),
            _ => Err(Error::Parse(format!("Unknown symbol kind: {}", s))),
        }
    }
}

impl std::fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Node kind at one occurrence, negated when the occurrence is a definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UseType(pub i32);

impl UseType {
    pub fn new(kind: CursorKind, is_definition: bool) -> Self {
        if is_definition && !kind.is_macro() {
            UseType(-kind.0.abs())
        } else {
            UseType(kind.0.abs())
        }
    }

    pub fn is_definition(&self) -> bool {
        self.0 < 0
    }

    pub fn kind(&self) -> CursorKind {
        CursorKind(self.0.abs())
    }

    /// Kind description with `declaration` upgraded to `DEFINITION` for
    /// definitions, `other` when the kind is unknown
    pub fn describe(&self) -> String {
        match self.kind().describe() {
            Some(text) if self.is_definition() => text.replace("declaration", "DEFINITION"),
            Some(text) => text.to_string(),
            None => "other".to_string(),
        }
    }
}

impl FromStr for UseType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse()
            .map(UseType)
            .map_err(|_| Error::Parse(format!("Invalid use type: {}", s)))
    }
}

impl std::fmt::Display for UseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A position in a file; serialized as `[path, line, col]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "(String, u32, u32)", from = "(String, u32, u32)")]
pub struct Location {
    pub path: String,
    /// 1-indexed
    pub line: u32,
    /// 1-indexed
    pub col: u32,
}

impl Location {
    pub fn new(path: impl Into<String>, line: u32, col: u32) -> Self {
        Self {
            path: path.into(),
            line,
            col,
        }
    }
}

impl From<Location> for (String, u32, u32) {
    fn from(loc: Location) -> Self {
        (loc.path, loc.line, loc.col)
    }
}

impl From<(String, u32, u32)> for Location {
    fn from((path, line, col): (String, u32, u32)) -> Self {
        Self { path, line, col }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.path, self.line, self.col)
    }
}

/// One use of a symbol at a location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurrence {
    pub symbol_id: String,
    pub location: Location,
    pub use_type: UseType,
}

impl Occurrence {
    pub fn kind(&self) -> SymbolKind {
        SymbolKind::from_cursor(self.use_type.kind())
    }

    pub fn describe(&self) -> String {
        self.use_type.describe()
    }
}
