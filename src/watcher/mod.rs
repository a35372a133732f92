use crate::ignore::IgnoreFilter;
use crate::project::Project;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEBOUNCE: Duration = Duration::from_millis(300);

/// Forwards modified C/C++ files under the project root to the indexer
pub struct Watcher {
    root: PathBuf,
    project: Arc<Project>,
    filter: IgnoreFilter,
}

impl Watcher {
    pub fn new(project: Arc<Project>, extra_excludes: Option<&[String]>) -> Self {
        let root = project.root().to_path_buf();
        let filter = IgnoreFilter::new(&root, extra_excludes);
        Self { root, project, filter }
    }

    pub async fn run(self, cancel: CancellationToken) -> crate::Result<()> {
        let (tx, mut rx) = mpsc::channel(256);
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let _ = tx.blocking_send(res);
            },
            notify::Config::default(),
        )?;
        watcher.watch(&self.root, RecursiveMode::Recursive)?;
        info!("Watching for changes in {}", self.root.display());

        let mut pending: HashMap<PathBuf, Instant> = HashMap::new();
        let mut tick = tokio::time::interval(DEBOUNCE);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(res) = rx.recv() => match res {
                    Ok(event) => {
                        for path in changed_paths(&event, &self.filter) {
                            pending.insert(path, Instant::now());
                        }
                    }
                    Err(e) => warn!("Watch error: {}", e),
                },
                _ = tick.tick() => {
                    for path in take_ready(&mut pending, DEBOUNCE) {
                        self.process_file(path).await;
                    }
                }
            }
        }

        debug!("Watcher stopped");
        Ok(())
    }

    async fn process_file(&self, path: PathBuf) {
        let project = Arc::clone(&self.project);
        let name = path.to_string_lossy().into_owned();
        let result = tokio::task::spawn_blocking(move || project.parse_file(&name)).await;
        match result {
            Ok(Ok(true)) => debug!("Queued {}", path.display()),
            Ok(Ok(false)) => debug!("Nothing to queue for {}", path.display()),
            Ok(Err(e)) => warn!("Failed to queue {}: {}", path.display(), e),
            Err(e) => warn!("Watcher task failed: {}", e),
        }
    }
}

/// Created or modified source files named by `event`; removals are ignored
pub fn changed_paths(event: &Event, filter: &IgnoreFilter) -> Vec<PathBuf> {
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) => event
            .paths
            .iter()
            .filter(|path| filter.is_indexable(path))
            .cloned()
            .collect(),
        _ => Vec::new(),
    }
}

/// Paths with no change for at least `quiet`
fn take_ready(pending: &mut HashMap<PathBuf, Instant>, quiet: Duration) -> Vec<PathBuf> {
    let now = Instant::now();
    let mut ready = Vec::new();
    pending.retain(|path, last| {
        if now.duration_since(*last) >= quiet {
            ready.push(path.clone());
            false
        } else {
            true
        }
    });
    ready.sort();
    ready
}
