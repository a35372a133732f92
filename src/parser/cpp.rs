//! C/C++ parser built on tree-sitter-cpp.
//!
//! The grammar is a superset covering both C and C++, so one parser handles
//! every source and header extension. Each translation unit is assembled by
//! following `#include` directives through the search paths in the compile
//! arguments; every file reached contributes its top-level nodes to the
//! unit's root.
//!
//! Symbol ids are scope-qualified, USR-like strings (`c:@geom@S@Point`,
//! `c:@F@add#int,int`) so a declaration in a header and its definition in a
//! source file share one id. References are resolved by name against the
//! declarations seen so far in the unit, preferring the innermost visible
//! scope. This is syntactic: overloads and templates resolve best-effort.

use super::includes::SearchPaths;
use super::{
    Diagnostic, Include, Node, ParsedUnit, Severity, SourceLocation, SymbolRef,
    TranslationUnitParser, UnsavedFile,
};
use crate::symbol::CursorKind;
use crate::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tree_sitter::{Language, Node as TsNode, Parser};

/// Tree-sitter C/C++ translation unit parser
pub struct CppParser {
    language: Language,
}

impl CppParser {
    pub fn new() -> Self {
        Self {
            language: tree_sitter_cpp::LANGUAGE.into(),
        }
    }
}

impl Default for CppParser {
    fn default() -> Self {
        Self::new()
    }
}

impl TranslationUnitParser for CppParser {
    fn name(&self) -> &str {
        "tree-sitter-cpp"
    }

    fn parse(&self, path: &Path, args: &[String], unsaved: &[UnsavedFile]) -> Result<ParsedUnit> {
        let mut parser = Parser::new();
        parser
            .set_language(&self.language)
            .map_err(|e| Error::Parse(format!("Failed to set language: {}", e)))?;

        let mut unit = UnitBuilder {
            parser,
            search: SearchPaths::from_args(args),
            unsaved,
            visited: HashSet::new(),
            includes: Vec::new(),
            diagnostics: Vec::new(),
            table: DeclTable::default(),
            root: Node::new(CursorKind::TRANSLATION_UNIT),
        };

        let source = unit
            .read(path)
            .map_err(|e| Error::Parse(format!("{}: {}", path.display(), e)))?;
        unit.process(path, &source, true)?;

        Ok(ParsedUnit {
            diagnostics: unit.diagnostics,
            root: unit.root,
            includes: unit.includes,
        })
    }
}

/// State for one translation unit
struct UnitBuilder<'a> {
    parser: Parser,
    search: SearchPaths,
    unsaved: &'a [UnsavedFile],
    visited: HashSet<PathBuf>,
    includes: Vec<Include>,
    diagnostics: Vec<Diagnostic>,
    table: DeclTable,
    root: Node,
}

impl UnitBuilder<'_> {
    fn read(&self, path: &Path) -> std::io::Result<String> {
        if let Some(file) = self.unsaved.iter().find(|f| f.path == path) {
            return Ok(file.content.clone());
        }
        let bytes = std::fs::read(path)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn exists(&self, path: &Path) -> bool {
        self.unsaved.iter().any(|f| f.path == path) || path.is_file()
    }

    fn process(&mut self, path: &Path, source: &str, is_main: bool) -> Result<()> {
        self.visited.insert(path.to_path_buf());
        let tree = self
            .parser
            .parse(source, None)
            .ok_or_else(|| Error::Parse(format!("Failed to parse {}", path.display())))?;
        let root = tree.root_node();
        let src = source.as_bytes();

        // Headers first so their declarations are visible to this file
        let dir = path.parent().unwrap_or(Path::new("")).to_path_buf();
        for directive in include_directives(root, src) {
            let resolved = self
                .search
                .resolve(&directive.name, directive.angled, &dir, |p| self.exists(p));
            match resolved {
                Some(found) => {
                    self.includes.push(Include {
                        header: found.path.clone(),
                        includer: path.to_path_buf(),
                        is_system: found.is_system,
                    });
                    if found.is_system || self.visited.contains(&found.path) {
                        continue;
                    }
                    match self.read(&found.path) {
                        Ok(text) => self.process(&found.path, &text, false)?,
                        Err(e) => self.diagnostics.push(Diagnostic {
                            severity: Severity::Error,
                            message: format!("cannot read '{}': {}", found.path.display(), e),
                            location: Some(directive.location(path)),
                        }),
                    }
                }
                None => self.diagnostics.push(Diagnostic {
                    // Toolchain-implicit system dirs are not modelled
                    severity: if directive.angled {
                        Severity::Warning
                    } else {
                        Severity::Error
                    },
                    message: format!("'{}' file not found", directive.name),
                    location: Some(directive.location(path)),
                }),
            }
        }

        let severity = if is_main {
            Severity::Error
        } else {
            Severity::Warning
        };
        syntax_errors(root, path, severity, &mut self.diagnostics);

        // First pass registers declarations, second builds nodes with
        // references resolved against them
        Walker::new(path, src, true).visit(root, &mut self.table);
        let nodes = Walker::new(path, src, false).visit(root, &mut self.table);
        self.root.children.extend(nodes);
        Ok(())
    }
}

// ========== Includes & diagnostics ==========

struct IncludeDirective {
    name: String,
    angled: bool,
    line: u32,
    col: u32,
}

impl IncludeDirective {
    fn location(&self, file: &Path) -> SourceLocation {
        SourceLocation::new(file, self.line, self.col)
    }
}

fn include_directives(root: TsNode, src: &[u8]) -> Vec<IncludeDirective> {
    let mut out = Vec::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.kind() == "preproc_include" {
            if let Some(path) = node.child_by_field_name("path") {
                let text = path.utf8_text(src).unwrap_or("");
                let angled = path.kind() == "system_lib_string";
                let name = text
                    .trim()
                    .trim_matches('"')
                    .trim_start_matches('<')
                    .trim_end_matches('>');
                if !name.is_empty() && matches!(path.kind(), "string_literal" | "system_lib_string") {
                    out.push(IncludeDirective {
                        name: name.to_string(),
                        angled,
                        line: node.start_position().row as u32 + 1,
                        col: node.start_position().column as u32 + 1,
                    });
                }
            }
            continue;
        }
        let mut cursor = node.walk();
        let children: Vec<TsNode> = node.named_children(&mut cursor).collect();
        stack.extend(children.into_iter().rev());
    }
    out
}

fn syntax_errors(node: TsNode, file: &Path, severity: Severity, out: &mut Vec<Diagnostic>) {
    let location = || {
        let pos = node.start_position();
        Some(SourceLocation::new(file, pos.row as u32 + 1, pos.column as u32 + 1))
    };
    if node.is_error() {
        out.push(Diagnostic {
            severity,
            message: "syntax error".to_string(),
            location: location(),
        });
        return;
    }
    if node.is_missing() {
        out.push(Diagnostic {
            severity,
            message: format!("expected '{}'", node.kind()),
            location: location(),
        });
        return;
    }
    if !node.has_error() {
        return;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        syntax_errors(child, file, severity, out);
    }
}

// ========== Declaration table ==========

/// A declaration visible to later references in the unit
#[derive(Debug, Clone)]
struct Declared {
    id: String,
    spelling: String,
    kind: CursorKind,
    /// Id scope segments, outermost first
    scope: Vec<String>,
    location: SourceLocation,
    is_definition: bool,
}

/// What a reference position can name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Want {
    Any,
    Type,
    Namespace,
    Member,
}

impl Want {
    fn accepts(&self, kind: CursorKind) -> bool {
        match self {
            Want::Any => true,
            Want::Type => matches!(kind.0, 1..=5 | 20 | 27 | 31 | 32 | 36),
            Want::Namespace => matches!(kind.0, 22 | 33),
            Want::Member => matches!(kind.0, 6 | 21 | 24..=26 | 30),
        }
    }
}

#[derive(Default)]
struct DeclTable {
    by_name: HashMap<String, Vec<Declared>>,
}

impl DeclTable {
    fn register(&mut self, decl: Declared) {
        let entries = self.by_name.entry(decl.spelling.clone()).or_default();
        match entries.iter_mut().find(|d| d.id == decl.id) {
            Some(existing) => {
                if decl.is_definition && !existing.is_definition {
                    existing.location = decl.location;
                    existing.is_definition = true;
                }
            }
            None => entries.push(decl),
        }
    }

    fn is_record(&self, name: &str) -> bool {
        self.by_name
            .get(name)
            .is_some_and(|ds| ds.iter().any(|d| matches!(d.kind.0, 2..=4 | 31 | 32)))
    }

    fn resolve(&self, name: &str, qualifier: &[String], scope: &[String], want: Want) -> Option<&Declared> {
        let candidates: Vec<&Declared> = self
            .by_name
            .get(name)?
            .iter()
            .filter(|d| want.accepts(d.kind))
            .collect();
        if candidates.is_empty() {
            return None;
        }

        let candidates = if qualifier.is_empty() {
            candidates
        } else {
            let qualified: Vec<&Declared> = candidates
                .iter()
                .copied()
                .filter(|d| d.scope.ends_with(qualifier))
                .collect();
            if qualified.is_empty() {
                candidates
            } else {
                qualified
            }
        };

        // Innermost lexically visible declaration, else the first seen
        candidates
            .iter()
            .copied()
            .filter(|d| scope.starts_with(&d.scope))
            .max_by_key(|d| d.scope.len())
            .or_else(|| candidates.first().copied())
    }
}

// ========== Tree conversion ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Namespace,
    Record,
    Function,
}

struct Frame {
    kind: FrameKind,
    name: String,
    id_segments: usize,
    display_segments: usize,
}

struct Walker<'s> {
    file: &'s Path,
    src: &'s [u8],
    /// Only register declarations, build no reference nodes
    collect: bool,
    id_scope: Vec<String>,
    display_scope: Vec<String>,
    frames: Vec<Frame>,
    /// Name nodes already consumed by their declaration
    skip: HashSet<usize>,
    template_pending: bool,
}

impl<'s> Walker<'s> {
    fn new(file: &'s Path, src: &'s [u8], collect: bool) -> Self {
        Self {
            file,
            src,
            collect,
            id_scope: Vec::new(),
            display_scope: Vec::new(),
            frames: Vec::new(),
            skip: HashSet::new(),
            template_pending: false,
        }
    }

    fn text(&self, node: TsNode) -> String {
        node.utf8_text(self.src).unwrap_or("").to_string()
    }

    fn location(&self, node: TsNode) -> SourceLocation {
        let pos = node.start_position();
        SourceLocation::new(self.file, pos.row as u32 + 1, pos.column as u32 + 1)
    }

    fn extent_end(node: TsNode) -> (u32, u32) {
        let end = node.end_position();
        (end.row as u32 + 1, end.column as u32 + 1)
    }

    fn push_scope(&mut self, kind: FrameKind, name: &str, id_segments: Vec<String>, display_segments: Vec<String>) {
        self.frames.push(Frame {
            kind,
            name: name.to_string(),
            id_segments: id_segments.len(),
            display_segments: display_segments.len(),
        });
        self.id_scope.extend(id_segments);
        self.display_scope.extend(display_segments);
    }

    fn pop_scope(&mut self) {
        if let Some(frame) = self.frames.pop() {
            let id_len = self.id_scope.len().saturating_sub(frame.id_segments);
            let display_len = self.display_scope.len().saturating_sub(frame.display_segments);
            self.id_scope.truncate(id_len);
            self.display_scope.truncate(display_len);
        }
    }

    fn current_record(&self) -> Option<&str> {
        self.frames
            .last()
            .filter(|f| f.kind == FrameKind::Record)
            .map(|f| f.name.as_str())
    }

    fn make_id(scope: &[String], tag: &str, name: &str) -> String {
        let mut id = String::from("c:");
        for segment in scope {
            id.push('@');
            id.push_str(segment);
        }
        id.push('@');
        id.push_str(tag);
        id.push('@');
        id.push_str(name);
        id
    }

    /// Build a declaration node and register it
    #[allow(clippy::too_many_arguments)]
    fn declare(
        &mut self,
        table: &mut DeclTable,
        kind: CursorKind,
        name_node: TsNode,
        extent: TsNode,
        spelling: String,
        id: String,
        display_name: String,
        display_scope: Vec<String>,
        id_scope: Vec<String>,
        is_definition: bool,
    ) -> Node {
        self.skip.insert(name_node.id());
        let location = self.location(name_node);
        table.register(Declared {
            id: id.clone(),
            spelling: spelling.clone(),
            kind,
            scope: id_scope,
            location: location.clone(),
            is_definition,
        });
        Node {
            kind,
            location: Some(location),
            extent_end: Some(Self::extent_end(extent)),
            spelling,
            symbol_id: id,
            display_name,
            scope: display_scope,
            is_definition,
            children: Vec::new(),
            referenced: None,
        }
    }

    fn children(&mut self, node: TsNode, table: &mut DeclTable) -> Vec<Node> {
        let mut cursor = node.walk();
        let kids: Vec<TsNode> = node.named_children(&mut cursor).collect();
        kids.into_iter()
            .flat_map(|child| self.visit(child, table))
            .collect()
    }

    fn visit(&mut self, node: TsNode, table: &mut DeclTable) -> Vec<Node> {
        match node.kind() {
            "comment" | "string_literal" | "raw_string_literal" | "char_literal"
            | "number_literal" | "system_lib_string" | "preproc_include" => Vec::new(),
            "function_definition" => self.function_definition(node, table),
            "declaration" | "field_declaration" => self.declaration(node, table),
            "class_specifier" | "struct_specifier" | "union_specifier" | "enum_specifier" => {
                self.record(node, table)
            }
            "namespace_definition" => self.namespace(node, table),
            "template_declaration" => self.template(node, table),
            "type_parameter_declaration" | "optional_type_parameter_declaration" => {
                self.simple_decl(node, table, CursorKind::TEMPLATE_TYPE_PARAMETER, "T", true)
            }
            "parameter_declaration" | "optional_parameter_declaration" => self.parameter(node, table),
            "enumerator" => self.simple_decl(node, table, CursorKind::ENUM_CONSTANT_DECL, "EC", true),
            "type_definition" => self.typedef(node, table),
            "alias_declaration" => self.simple_decl(node, table, CursorKind::TYPE_ALIAS_DECL, "T", false),
            "namespace_alias_definition" => {
                self.simple_decl(node, table, CursorKind::NAMESPACE_ALIAS, "NA", true)
            }
            "preproc_def" | "preproc_function_def" => self.macro_definition(node, table),
            "call_expression" => self.call(node, table),
            "identifier" | "field_identifier" | "type_identifier" | "namespace_identifier" => {
                self.reference(node, table)
            }
            _ => self.children(node, table),
        }
    }

    fn template(&mut self, node: TsNode, table: &mut DeclTable) -> Vec<Node> {
        let params = node.child_by_field_name("parameters");
        let mut out = Vec::new();
        if let Some(params) = params {
            out.extend(self.children(params, table));
        }
        self.template_pending = true;
        let mut cursor = node.walk();
        let rest: Vec<TsNode> = node
            .named_children(&mut cursor)
            .filter(|c| Some(c.id()) != params.map(|p| p.id()))
            .collect();
        for child in rest {
            out.extend(self.visit(child, table));
        }
        self.template_pending = false;
        out
    }

    fn function_definition(&mut self, node: TsNode, table: &mut DeclTable) -> Vec<Node> {
        let function = node
            .child_by_field_name("declarator")
            .and_then(find_function_declarator);
        match function {
            Some(declarator) => self.function(node, declarator, true, table).into_iter().collect(),
            None => self.children(node, table),
        }
    }

    /// Function, method, constructor or destructor declared by `declarator`
    fn function(&mut self, node: TsNode, declarator: TsNode, is_definition: bool, table: &mut DeclTable) -> Option<Node> {
        let name_node = declarator.child_by_field_name("declarator")?;
        let (qualifier, leaf) = split_qualified(name_node, self.src);
        let spelling = self.text(leaf);
        if spelling.is_empty() {
            return None;
        }

        let params = param_types(declarator.child_by_field_name("parameters"), self.src);
        let is_template = std::mem::take(&mut self.template_pending);
        let record = qualifier.last().map(String::as_str).or(self.current_record());
        let in_record = match qualifier.last() {
            Some(last) => table.is_record(last),
            None => self.current_record().is_some(),
        };
        let kind = if leaf.kind() == "destructor_name" || spelling.starts_with('~') {
            CursorKind::DESTRUCTOR
        } else if in_record && record == Some(spelling.as_str()) {
            CursorKind::CONSTRUCTOR
        } else if in_record && spelling.starts_with("operator ") {
            CursorKind::CONVERSION_FUNCTION
        } else if is_template {
            CursorKind::FUNCTION_TEMPLATE
        } else if in_record {
            CursorKind::CXX_METHOD
        } else {
            CursorKind::FUNCTION_DECL
        };

        let mut id_scope = self.id_scope.clone();
        id_scope.extend(qualifier.iter().cloned());
        let mut display_scope = self.display_scope.clone();
        display_scope.extend(qualifier.iter().cloned());
        let id = format!("{}#{}", Self::make_id(&id_scope, "F", &spelling), params.join(","));
        let display_name = format!("{}({})", spelling, params.join(", "));

        let mut decl = self.declare(
            table,
            kind,
            leaf,
            node,
            spelling.clone(),
            id,
            display_name.clone(),
            display_scope,
            id_scope,
            is_definition,
        );

        let mut id_segments = qualifier.clone();
        id_segments.push(spelling.clone());
        let mut display_segments = qualifier;
        display_segments.push(display_name);
        // Prototypes only contribute their parameters; the enclosing
        // declaration visits the return type
        let body = if is_definition { node } else { declarator };
        self.push_scope(FrameKind::Function, &spelling, id_segments, display_segments);
        decl.children = self.children(body, table);
        self.pop_scope();
        Some(decl)
    }

    fn declaration(&mut self, node: TsNode, table: &mut DeclTable) -> Vec<Node> {
        let is_field = node.kind() == "field_declaration";
        let is_extern = has_specifier(node, self.src, "extern");
        let mut out: Vec<Node> = Vec::new();

        let mut cursor = node.walk();
        let mut parts: Vec<(Option<&'static str>, TsNode)> = Vec::new();
        if cursor.goto_first_child() {
            loop {
                if cursor.node().is_named() {
                    parts.push((cursor.field_name(), cursor.node()));
                }
                if !cursor.goto_next_sibling() {
                    break;
                }
            }
        }

        let mut last_decl: Option<usize> = None;
        for (field, child) in parts {
            if field != Some("declarator") {
                let nodes = self.visit(child, table);
                match (field, last_decl) {
                    (Some("default_value"), Some(idx)) => out[idx].children.extend(nodes),
                    _ => out.extend(nodes),
                }
                continue;
            }

            if let Some(function) = find_function_declarator(child) {
                if let Some(decl) = self.function(node, function, false, table) {
                    out.push(decl);
                    last_decl = Some(out.len() - 1);
                }
                continue;
            }

            let (name_node, initializer) = match child.kind() {
                "init_declarator" => (
                    child.child_by_field_name("declarator").and_then(innermost_name),
                    child.child_by_field_name("value"),
                ),
                _ => (innermost_name(child), None),
            };
            let Some(name_node) = name_node else {
                out.extend(self.visit(child, table));
                continue;
            };

            let (qualifier, leaf) = split_qualified(name_node, self.src);
            let spelling = self.text(leaf);
            let (kind, tag) = if is_field {
                (CursorKind::FIELD_DECL, "FI")
            } else {
                (CursorKind::VAR_DECL, "V")
            };
            let is_definition = !is_field && !(is_extern && initializer.is_none());

            let mut id_scope = self.id_scope.clone();
            id_scope.extend(qualifier.iter().cloned());
            let mut display_scope = self.display_scope.clone();
            display_scope.extend(qualifier.iter().cloned());
            let id = Self::make_id(&id_scope, tag, &spelling);

            let mut decl = self.declare(
                table,
                kind,
                leaf,
                child,
                spelling.clone(),
                id,
                spelling,
                display_scope,
                id_scope,
                is_definition,
            );
            decl.children = self.children(child, table);
            out.push(decl);
            last_decl = Some(out.len() - 1);
        }
        self.template_pending = false;
        out
    }

    fn record(&mut self, node: TsNode, table: &mut DeclTable) -> Vec<Node> {
        let Some(name_node) = node.child_by_field_name("name") else {
            return self.children(node, table);
        };
        let body = node.child_by_field_name("body");
        let is_forward = body.is_none()
            && node.parent().is_some_and(|p| match p.kind() {
                "declaration" | "field_declaration" => p.child_by_field_name("declarator").is_none(),
                "translation_unit" | "declaration_list" | "field_declaration_list"
                | "template_declaration" => true,
                _ => false,
            });
        if body.is_none() && !is_forward {
            // Elaborated type specifier such as `struct Point p;`
            return self.children(node, table);
        }

        let (qualifier, leaf) = split_qualified(name_node, self.src);
        let spelling = self.text(leaf);
        let is_template = std::mem::take(&mut self.template_pending);
        let (kind, tag) = match node.kind() {
            "enum_specifier" => (CursorKind::ENUM_DECL, "E"),
            _ if is_template => (CursorKind::CLASS_TEMPLATE, "ST"),
            "union_specifier" => (CursorKind::UNION_DECL, "U"),
            "struct_specifier" => (CursorKind::STRUCT_DECL, "S"),
            _ => (CursorKind::CLASS_DECL, "S"),
        };

        let mut id_scope = self.id_scope.clone();
        id_scope.extend(qualifier.iter().cloned());
        let mut display_scope = self.display_scope.clone();
        display_scope.extend(qualifier.iter().cloned());
        let id = Self::make_id(&id_scope, tag, &spelling);

        let mut decl = self.declare(
            table,
            kind,
            leaf,
            node,
            spelling.clone(),
            id,
            spelling.clone(),
            display_scope,
            id_scope,
            body.is_some(),
        );

        let mut segments = qualifier;
        segments.push(spelling.clone());
        self.push_scope(FrameKind::Record, &spelling, segments.clone(), segments);
        decl.children = self.children(node, table);
        self.pop_scope();
        vec![decl]
    }

    fn namespace(&mut self, node: TsNode, table: &mut DeclTable) -> Vec<Node> {
        let name_node = node.child_by_field_name("name");
        let spelling = name_node
            .map(|n| self.text(n))
            .unwrap_or_else(|| "(anonymous)".to_string());
        let segments: Vec<String> = spelling.split("::").map(str::to_string).collect();

        let mut out = Vec::new();
        let mut decl = None;
        if let Some(name_node) = name_node {
            let id = Self::make_id(&self.id_scope, "N", &spelling);
            decl = Some(self.declare(
                table,
                CursorKind::NAMESPACE,
                name_node,
                node,
                spelling.clone(),
                id,
                spelling.clone(),
                self.display_scope.clone(),
                self.id_scope.clone(),
                true,
            ));
        }

        self.push_scope(FrameKind::Namespace, &spelling, segments.clone(), segments);
        let children = self.children(node, table);
        self.pop_scope();

        match decl {
            Some(mut decl) => {
                decl.children = children;
                out.push(decl);
            }
            None => out.extend(children),
        }
        out
    }

    /// Declaration whose name sits in the `name` field, or the first
    /// identifier-like child
    fn simple_decl(
        &mut self,
        node: TsNode,
        table: &mut DeclTable,
        kind: CursorKind,
        tag: &str,
        is_definition: bool,
    ) -> Vec<Node> {
        let name_node = node.child_by_field_name("name").or_else(|| {
            let mut cursor = node.walk();
            let found = node
                .named_children(&mut cursor)
                .find(|c| matches!(c.kind(), "identifier" | "type_identifier" | "namespace_identifier"));
            found
        });
        let Some(name_node) = name_node else {
            return self.children(node, table);
        };
        let spelling = self.text(name_node);
        let id = Self::make_id(&self.id_scope, tag, &spelling);
        let mut decl = self.declare(
            table,
            kind,
            name_node,
            node,
            spelling.clone(),
            id,
            spelling,
            self.display_scope.clone(),
            self.id_scope.clone(),
            is_definition,
        );
        decl.children = self.children(node, table);
        self.template_pending = false;
        vec![decl]
    }

    fn parameter(&mut self, node: TsNode, table: &mut DeclTable) -> Vec<Node> {
        let name_node = node
            .child_by_field_name("declarator")
            .and_then(innermost_name);
        match name_node {
            Some(name_node) => {
                let spelling = self.text(name_node);
                let id = Self::make_id(&self.id_scope, "P", &spelling);
                let mut decl = self.declare(
                    table,
                    CursorKind::PARM_DECL,
                    name_node,
                    node,
                    spelling.clone(),
                    id,
                    spelling,
                    self.display_scope.clone(),
                    self.id_scope.clone(),
                    true,
                );
                decl.children = self.children(node, table);
                vec![decl]
            }
            None => self.children(node, table),
        }
    }

    fn typedef(&mut self, node: TsNode, table: &mut DeclTable) -> Vec<Node> {
        let mut out = Vec::new();
        if let Some(ty) = node.child_by_field_name("type") {
            out.extend(self.visit(ty, table));
        }
        let mut cursor = node.walk();
        let declarators: Vec<TsNode> = node
            .children_by_field_name("declarator", &mut cursor)
            .collect();
        for declarator in declarators {
            let Some(name_node) = innermost_name(declarator) else {
                continue;
            };
            let spelling = self.text(name_node);
            let id = Self::make_id(&self.id_scope, "T", &spelling);
            out.push(self.declare(
                table,
                CursorKind::TYPEDEF_DECL,
                name_node,
                node,
                spelling.clone(),
                id,
                spelling,
                self.display_scope.clone(),
                self.id_scope.clone(),
                false,
            ));
        }
        out
    }

    fn macro_definition(&mut self, node: TsNode, table: &mut DeclTable) -> Vec<Node> {
        let Some(name_node) = node.child_by_field_name("name") else {
            return Vec::new();
        };
        let spelling = self.text(name_node);
        let id = format!("c:macro@{}", spelling);
        vec![self.declare(
            table,
            CursorKind::MACRO_DEFINITION,
            name_node,
            node,
            spelling.clone(),
            id,
            spelling,
            Vec::new(),
            Vec::new(),
            false,
        )]
    }

    fn call(&mut self, node: TsNode, table: &mut DeclTable) -> Vec<Node> {
        let Some(function) = node.child_by_field_name("function") else {
            return self.children(node, table);
        };
        let (qualifier, leaf, want) = match function.kind() {
            "field_expression" => match function.child_by_field_name("field") {
                Some(field) => (Vec::new(), field, Want::Member),
                None => return self.children(node, table),
            },
            "identifier" | "qualified_identifier" | "template_function" => {
                let (qualifier, leaf) = split_qualified(function, self.src);
                (qualifier, leaf, Want::Any)
            }
            _ => return self.children(node, table),
        };
        if self.collect {
            return self.children(node, table);
        }

        let spelling = self.text(leaf);
        let referenced = table
            .resolve(&spelling, &qualifier, &self.id_scope, want)
            .map(symbol_ref);
        self.skip.insert(leaf.id());
        let mut call = Node {
            kind: CursorKind::CALL_EXPR,
            location: Some(self.location(leaf)),
            extent_end: Some(Self::extent_end(node)),
            spelling,
            scope: self.display_scope.clone(),
            referenced,
            ..Node::default()
        };
        call.children = self.children(node, table);
        vec![call]
    }

    fn reference(&mut self, node: TsNode, table: &mut DeclTable) -> Vec<Node> {
        if self.collect || self.skip.contains(&node.id()) {
            return Vec::new();
        }
        let parent_kind = node.parent().map(|p| p.kind()).unwrap_or("");
        let (mut kind, want) = match node.kind() {
            "type_identifier" => (CursorKind::TYPE_REF, Want::Type),
            "namespace_identifier" => (CursorKind::NAMESPACE_REF, Want::Namespace),
            "field_identifier" if parent_kind == "field_expression" => {
                (CursorKind::MEMBER_REF_EXPR, Want::Member)
            }
            "field_identifier" => (CursorKind::MEMBER_REF, Want::Member),
            _ => (CursorKind::DECL_REF_EXPR, Want::Any),
        };

        let spelling = self.text(node);
        let qualifier = qualifier_of(node, self.src);
        let Some(target) = table.resolve(&spelling, &qualifier, &self.id_scope, want) else {
            return Vec::new();
        };
        if target.kind == CursorKind::MACRO_DEFINITION {
            kind = CursorKind::MACRO_EXPANSION;
        } else if target.kind == CursorKind::CLASS_TEMPLATE && parent_kind == "template_type" {
            kind = CursorKind::TEMPLATE_REF;
        }

        vec![Node {
            kind,
            location: Some(self.location(node)),
            extent_end: Some(Self::extent_end(node)),
            spelling,
            scope: self.display_scope.clone(),
            referenced: Some(symbol_ref(target)),
            ..Node::default()
        }]
    }
}

fn symbol_ref(decl: &Declared) -> SymbolRef {
    SymbolRef {
        symbol_id: decl.id.clone(),
        spelling: decl.spelling.clone(),
        location: Some(decl.location.clone()),
    }
}

// ========== Declarator helpers ==========

/// The `function_declarator` inside pointer/reference wrappers, if the
/// declarator declares a function rather than a function pointer
fn find_function_declarator(node: TsNode) -> Option<TsNode> {
    match node.kind() {
        "function_declarator" => {
            let inner = node.child_by_field_name("declarator")?;
            (inner.kind() != "parenthesized_declarator").then_some(node)
        }
        "pointer_declarator" | "reference_declarator" | "attributed_declarator" => {
            let inner = node
                .child_by_field_name("declarator")
                .or_else(|| node.named_child(0))?;
            find_function_declarator(inner)
        }
        _ => None,
    }
}

/// The name node a declarator introduces
fn innermost_name(node: TsNode) -> Option<TsNode> {
    match node.kind() {
        "identifier" | "field_identifier" | "type_identifier" | "destructor_name"
        | "operator_name" | "qualified_identifier" => Some(node),
        "pointer_declarator" | "reference_declarator" | "array_declarator" | "init_declarator"
        | "function_declarator" | "attributed_declarator" | "parenthesized_declarator" => {
            let inner = node
                .child_by_field_name("declarator")
                .or_else(|| node.named_child(0))?;
            innermost_name(inner)
        }
        _ => None,
    }
}

/// Split `a::b::name` into (`["a", "b"]`, name node)
fn split_qualified<'t>(node: TsNode<'t>, src: &[u8]) -> (Vec<String>, TsNode<'t>) {
    let mut qualifier = Vec::new();
    let mut current = node;
    loop {
        match current.kind() {
            "qualified_identifier" => {
                if let Some(scope) = current.child_by_field_name("scope") {
                    let scope = match scope.kind() {
                        "template_type" => scope.child_by_field_name("name").unwrap_or(scope),
                        _ => scope,
                    };
                    qualifier.push(scope.utf8_text(src).unwrap_or("").to_string());
                }
                match current.child_by_field_name("name") {
                    Some(name) => current = name,
                    None => break,
                }
            }
            "template_function" | "template_type" | "template_method" => {
                match current.child_by_field_name("name") {
                    Some(name) => current = name,
                    None => break,
                }
            }
            _ => break,
        }
    }
    (qualifier, current)
}

/// Qualifier written before a name used inside `a::b::name`
fn qualifier_of(node: TsNode, src: &[u8]) -> Vec<String> {
    let mut qualifier = Vec::new();
    let mut current = node;
    while let Some(parent) = current.parent() {
        let is_name = parent
            .child_by_field_name("name")
            .is_some_and(|n| n.id() == current.id());
        if !is_name {
            break;
        }
        match parent.kind() {
            "qualified_identifier" => {
                if let Some(scope) = parent.child_by_field_name("scope") {
                    qualifier.insert(0, scope.utf8_text(src).unwrap_or("").to_string());
                }
            }
            "template_type" | "template_function" | "template_method" => {}
            _ => break,
        }
        current = parent;
    }
    qualifier
}

fn has_specifier(node: TsNode, src: &[u8], keyword: &str) -> bool {
    let mut cursor = node.walk();
    let found = node
        .children(&mut cursor)
        .any(|c| c.kind() == "storage_class_specifier" && c.utf8_text(src).unwrap_or("") == keyword);
    found
}

/// Normalized parameter types: names and default values dropped,
/// whitespace collapsed, `(void)` treated as empty
fn param_types(params: Option<TsNode>, src: &[u8]) -> Vec<String> {
    let Some(params) = params else {
        return Vec::new();
    };
    let mut out = Vec::new();
    let mut cursor = params.walk();
    for param in params.named_children(&mut cursor) {
        match param.kind() {
            "parameter_declaration" | "optional_parameter_declaration" => {
                let start = param.start_byte();
                let end = param
                    .child_by_field_name("default_value")
                    .map(|d| d.start_byte())
                    .unwrap_or(param.end_byte());
                let mut text = String::from_utf8_lossy(&src[start..end]).into_owned();
                if let Some(name) = param
                    .child_by_field_name("declarator")
                    .and_then(innermost_name)
                {
                    let (s, e) = (name.start_byte() - start, name.end_byte() - start);
                    if e <= text.len() && text.is_char_boundary(s) && text.is_char_boundary(e) {
                        text.replace_range(s..e, "");
                    }
                }
                let collapsed = text
                    .trim_end_matches(|c: char| c == '=' || c.is_whitespace())
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ")
                    .replace(" *", "*")
                    .replace(" &", "&");
                out.push(collapsed);
            }
            "variadic_parameter_declaration" | "variadic_parameter" => out.push("...".to_string()),
            _ => {}
        }
    }
    if out.len() == 1 && out[0] == "void" {
        out.clear();
    }
    out
}
