//! Test helpers: a scripted parser and node builders

use crate::parser::{
    Diagnostic, Include, Node, ParsedUnit, Severity, SourceLocation, SymbolRef,
    TranslationUnitParser, UnsavedFile,
};
use crate::symbol::CursorKind;
use crate::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

enum Script {
    Unit(ParsedUnit),
    Fail(String),
}

/// Parser returning pre-built units per path
#[derive(Default)]
pub(crate) struct FakeParser {
    scripts: Mutex<HashMap<PathBuf, Script>>,
    calls: AtomicUsize,
    last_unsaved: Mutex<Vec<UnsavedFile>>,
}

impl FakeParser {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set(&self, path: impl Into<PathBuf>, unit: ParsedUnit) {
        self.scripts.lock().unwrap().insert(path.into(), Script::Unit(unit));
    }

    pub(crate) fn fail(&self, path: impl Into<PathBuf>, message: &str) {
        self.scripts
            .lock()
            .unwrap()
            .insert(path.into(), Script::Fail(message.to_string()));
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn last_unsaved(&self) -> Vec<UnsavedFile> {
        self.last_unsaved.lock().unwrap().clone()
    }
}

impl TranslationUnitParser for FakeParser {
    fn name(&self) -> &str {
        "fake"
    }

    fn parse(&self, path: &Path, _args: &[String], unsaved: &[UnsavedFile]) -> Result<ParsedUnit> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_unsaved.lock().unwrap() = unsaved.to_vec();
        match self.scripts.lock().unwrap().get(path) {
            Some(Script::Unit(unit)) => Ok(unit.clone()),
            Some(Script::Fail(message)) => Err(Error::Parse(message.clone())),
            None => Err(Error::Parse(format!("no script for {}", path.display()))),
        }
    }
}

fn located(file: &str, line: u32, col: u32, kind: CursorKind, spelling: &str) -> Node {
    Node {
        location: Some(SourceLocation::new(file, line, col)),
        extent_end: Some((line, col + spelling.len() as u32)),
        spelling: spelling.to_string(),
        display_name: spelling.to_string(),
        ..Node::new(kind)
    }
}

/// Declaration node owning `id`
pub(crate) fn decl(file: &str, line: u32, col: u32, kind: CursorKind, spelling: &str, id: &str) -> Node {
    Node {
        symbol_id: id.to_string(),
        ..located(file, line, col, kind, spelling)
    }
}

/// Definition node owning `id`
pub(crate) fn def(file: &str, line: u32, col: u32, kind: CursorKind, spelling: &str, id: &str) -> Node {
    Node {
        is_definition: true,
        ..decl(file, line, col, kind, spelling, id)
    }
}

/// Pure reference to `target_id`
pub(crate) fn reference(file: &str, line: u32, col: u32, kind: CursorKind, spelling: &str, target_id: &str) -> Node {
    Node {
        display_name: String::new(),
        referenced: Some(SymbolRef {
            symbol_id: target_id.to_string(),
            spelling: spelling.to_string(),
            location: None,
        }),
        ..located(file, line, col, kind, spelling)
    }
}

/// Unit whose root holds `nodes`, including `headers` from `includer`
pub(crate) fn unit(nodes: Vec<Node>, includer: &str, headers: &[&str]) -> ParsedUnit {
    let mut root = Node::new(CursorKind::TRANSLATION_UNIT);
    root.children = nodes;
    ParsedUnit {
        diagnostics: Vec::new(),
        root,
        includes: headers
            .iter()
            .map(|h| Include {
                header: PathBuf::from(h),
                includer: PathBuf::from(includer),
                is_system: false,
            })
            .collect(),
    }
}

pub(crate) fn error(message: &str) -> Diagnostic {
    Diagnostic {
        severity: Severity::Error,
        message: message.to_string(),
        location: None,
    }
}
