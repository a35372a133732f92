//! Live buffer session
//!
//! The editor reports the buffer it is showing, unsaved content included.
//! Requests go through a single-slot channel: a request arriving while a
//! parse runs replaces any request still waiting, so only the newest
//! snapshot is parsed. The resulting tree answers go-to-definition,
//! find-references and current-scope queries for that buffer.

use crate::parser::{Node, ParsedUnit, SourceLocation, SymbolRef, TranslationUnitParser, UnsavedFile};
use crate::project::Project;
use crate::query::{QueryEngine, Reference};
use crate::storage::SqliteStore;
use crate::symbol::Location;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Content of one editor buffer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferSnapshot {
    pub file_name: String,
    pub content: String,
}

impl BufferSnapshot {
    pub fn new(file_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            content: content.into(),
        }
    }
}

pub struct LiveSession {
    requests: watch::Sender<Option<BufferSnapshot>>,
    units: RwLock<HashMap<String, Arc<ParsedUnit>>>,
    status: Mutex<String>,
}

impl Default for LiveSession {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveSession {
    pub fn new() -> Self {
        let (requests, _) = watch::channel(None);
        Self {
            requests,
            units: RwLock::new(HashMap::new()),
            status: Mutex::new("Ready to parse".to_string()),
        }
    }

    /// Ask for `snapshot` to be parsed, replacing any request not yet started
    pub fn request_parse(&self, snapshot: BufferSnapshot) {
        debug!("Live parse requested for {}", snapshot.file_name);
        self.requests.send_replace(Some(snapshot));
    }

    pub fn status(&self) -> String {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_status(&self, status: String) {
        *self.status.lock().unwrap_or_else(|e| e.into_inner()) = status;
    }

    /// Latest parsed tree of `file_name`
    pub fn unit(&self, file_name: &str) -> Option<Arc<ParsedUnit>> {
        self.units
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(file_name)
            .cloned()
    }

    /// Forget the parsed tree of a closed buffer. Returns whether one existed.
    pub fn unload(&self, file_name: &str) -> bool {
        self.units
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(file_name)
            .is_some()
    }

    /// Parse one snapshot with the unit's compile `args`
    pub fn process(
        &self,
        snapshot: BufferSnapshot,
        parser: &dyn TranslationUnitParser,
        args: Option<Vec<String>>,
    ) {
        let Some(args) = args else {
            self.set_status("Can't find command line arguments".to_string());
            return;
        };

        let file_name = snapshot.file_name.clone();
        self.set_status(format!("Parsing {}", file_name));
        let unsaved = [UnsavedFile::new(&snapshot.file_name, snapshot.content)];

        match parser.parse(Path::new(&file_name), &args, &unsaved) {
            Ok(unit) => {
                self.units
                    .write()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(file_name.clone(), Arc::new(unit));
                self.set_status(format!("Parsed {}", file_name));
            }
            Err(e) => {
                warn!("Live parse of {} failed: {}", file_name, e);
                self.set_status(format!("Failed with {}", e));
            }
        }
    }

    /// Serve parse requests until `cancel` fires
    pub async fn run(self: Arc<Self>, project: Arc<Project>, cancel: CancellationToken) {
        let mut rx = self.requests.subscribe();
        // A request sent before the loop started still counts
        rx.mark_changed();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let Some(snapshot) = rx.borrow_and_update().clone() else {
                        continue;
                    };

                    let session = Arc::clone(&self);
                    let project = Arc::clone(&project);
                    let task = tokio::task::spawn_blocking(move || {
                        match project.file_args(&snapshot.file_name) {
                            Ok(args) => session.process(snapshot, project.parser().as_ref(), args),
                            Err(e) => session.set_status(format!("Failed with {}", e)),
                        }
                    });
                    if let Err(e) = task.await {
                        warn!("Live parse task failed: {}", e);
                    }
                }
            }
        }
        debug!("Live session stopped");
    }

    /// Symbol under the cursor: the innermost enclosing node that names or
    /// refers to a symbol
    pub fn symbol_at(&self, file_name: &str, line: u32, col: u32) -> Option<SymbolRef> {
        let unit = self.unit(file_name)?;
        let path = unit.root.path_to(Path::new(file_name), line, col);
        path.into_iter().rev().find_map(target_of)
    }

    /// Definition of the symbol under the cursor, falling back to the
    /// declaration visible from the buffer when the index has none
    pub fn goto_definition(
        &self,
        store: &SqliteStore,
        file_name: &str,
        line: u32,
        col: u32,
    ) -> Result<Option<Location>> {
        let Some(target) = self.symbol_at(file_name, line, col) else {
            return Ok(None);
        };
        if let Some(def) = QueryEngine::new(store).definition(&target.symbol_id)? {
            return Ok(Some(def.location));
        }
        Ok(target.location.as_ref().map(to_location))
    }

    /// Every indexed occurrence of the symbol under the cursor
    pub fn find_references(
        &self,
        store: &SqliteStore,
        file_name: &str,
        line: u32,
        col: u32,
    ) -> Result<Vec<Reference>> {
        match self.symbol_at(file_name, line, col) {
            Some(target) => QueryEngine::new(store).references(&target.symbol_id),
            None => Ok(Vec::new()),
        }
    }

    /// Names of the declarations enclosing `line`, joined with `::`
    pub fn current_scope(&self, file_name: &str, line: u32) -> Option<String> {
        let unit = self.unit(file_name)?;
        let mut names = Vec::new();
        scope_at(&unit.root, Path::new(file_name), line, &mut names);
        Some(names.join("::"))
    }
}

fn target_of(node: &Node) -> Option<SymbolRef> {
    match &node.referenced {
        Some(referenced) if !referenced.symbol_id.is_empty() => Some(referenced.clone()),
        _ if !node.symbol_id.is_empty() => Some(SymbolRef {
            symbol_id: node.symbol_id.clone(),
            spelling: node.spelling.clone(),
            location: node.location.clone(),
        }),
        _ => None,
    }
}

fn to_location(loc: &SourceLocation) -> Location {
    Location::new(loc.file.to_string_lossy(), loc.line, loc.col)
}

fn spans_line(node: &Node, file: &Path, line: u32) -> bool {
    match (&node.location, node.extent_end) {
        (Some(loc), Some((end_line, _))) => loc.file == file && loc.line <= line && line <= end_line,
        _ => false,
    }
}

fn scope_at(node: &Node, file: &Path, line: u32, names: &mut Vec<String>) {
    let enclosing = node
        .children
        .iter()
        .find(|child| child.kind.is_declaration() && spans_line(child, file, line));
    if let Some(child) = enclosing {
        if !child.spelling.is_empty() {
            names.push(child.spelling.clone());
        }
        scope_at(child, file, line, names);
    }
}
