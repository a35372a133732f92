use axum::{
    extract::{Request, State},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::SymdexConfig;
use crate::live::LiveSession;
use crate::parser::TranslationUnitParser;
use crate::project::Project;
use crate::watcher::Watcher;

pub mod routes;

pub use routes::{ApiError, ServiceStatus};

/// How often the reaper compares the idle window against the last request
const REAP_INTERVAL: Duration = Duration::from_secs(10);

/// Server state
pub struct AppState {
    project: RwLock<Option<Arc<Project>>>,
    /// Serializes registrations; opening a project probes the parser
    register_lock: tokio::sync::Mutex<()>,
    pub live: Arc<LiveSession>,
    pub parser: Arc<dyn TranslationUnitParser>,
    pub config: SymdexConfig,
    last_request: Mutex<Instant>,
    pub cancel: CancellationToken,
}

impl AppState {
    pub fn new(parser: Arc<dyn TranslationUnitParser>, config: SymdexConfig) -> Arc<Self> {
        Arc::new(Self {
            project: RwLock::new(None),
            register_lock: tokio::sync::Mutex::new(()),
            live: Arc::new(LiveSession::new()),
            parser,
            config,
            last_request: Mutex::new(Instant::now()),
            cancel: CancellationToken::new(),
        })
    }

    /// The registered project, if any
    pub fn project(&self) -> Option<Arc<Project>> {
        self.project.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_project(&self, project: Arc<Project>) {
        *self.project.write().unwrap_or_else(|e| e.into_inner()) = Some(project);
    }

    pub fn touch(&self) {
        *self.last_request.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_request
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed()
    }

    /// Start the tasks that live as long as the registered project
    fn start_project_tasks(&self, project: &Arc<Project>) {
        tokio::spawn(Arc::clone(&self.live).run(Arc::clone(project), self.cancel.child_token()));

        if self.config.watch_enabled() {
            let watcher = Watcher::new(Arc::clone(project), self.config.exclude.as_deref());
            let cancel = self.cancel.child_token();
            tokio::spawn(async move {
                if let Err(e) = watcher.run(cancel).await {
                    warn!("Watcher stopped: {}", e);
                }
            });
        }

        if let Some(interval) = self.config.sweep_interval() {
            tokio::spawn(sweep_loop(Arc::clone(project), interval, self.cancel.child_token()));
        }
    }

    /// Wait for the index queue to empty, then stop the service
    pub async fn drain_and_stop(&self) {
        if let Some(project) = self.project() {
            info!("Waiting for {} pending index jobs", project.queue_size());
            let drained = tokio::task::spawn_blocking(move || project.wait_until_drained()).await;
            if let Err(e) = drained {
                warn!("Drain task failed: {}", e);
            }
        }
        self.cancel.cancel();
    }
}

/// Build the service router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(routes::ping))
        .route("/register", get(routes::register))
        .route("/parse", get(routes::parse))
        .route("/queue_size", get(routes::queue_size))
        .route("/raw_range_search", get(routes::raw_range_search))
        .route("/match", get(routes::match_prefix))
        .route("/builtin_header_path", get(routes::builtin_header_path))
        .route("/file_args", get(routes::file_args))
        .route("/definition", get(routes::definition))
        .route("/references", get(routes::references))
        .route("/buffer", post(routes::buffer))
        .route("/goto_definition", get(routes::goto_definition))
        .route("/find_references", get(routes::find_references))
        .route("/current_scope", get(routes::current_scope))
        .route("/unload", get(routes::unload))
        .route("/status", get(routes::status))
        .layer(middleware::from_fn_with_state(Arc::clone(&state), track_activity))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn track_activity(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    state.touch();
    next.run(request).await
}

/// Stop the service once no request arrived for `idle`
async fn reaper(state: Arc<AppState>, idle: Duration) {
    let mut tick = tokio::time::interval(REAP_INTERVAL);
    loop {
        tokio::select! {
            _ = state.cancel.cancelled() => return,
            _ = tick.tick() => {
                if state.idle_for() > idle {
                    info!("Idle for {:?}, shutting down", idle);
                    state.drain_and_stop().await;
                    return;
                }
            }
        }
    }
}

/// Periodic full sweeps
async fn sweep_loop(project: Arc<Project>, interval: Duration, cancel: CancellationToken) {
    let mut tick = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tick.tick() => {
                let project = Arc::clone(&project);
                match tokio::task::spawn_blocking(move || project.scan_and_index()).await {
                    Ok(Ok(report)) if report.coalesced => debug!("Sweep already running"),
                    Ok(Ok(report)) => debug!("Background sweep done: {:?}", report),
                    Ok(Err(e)) => warn!("Background sweep failed: {}", e),
                    Err(e) => warn!("Sweep task failed: {}", e),
                }
            }
        }
    }
}

pub async fn start_server(parser: Arc<dyn TranslationUnitParser>, config: SymdexConfig) -> anyhow::Result<()> {
    let port = config.port();
    let idle = config.idle_timeout();
    let state = AppState::new(parser, config);
    let app = router(Arc::clone(&state));

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{} (idle timeout {:?})", addr, idle);

    tokio::spawn(reaper(Arc::clone(&state), idle));

    let interrupted = Arc::clone(&state);
    tokio::spawn(async move {
        tokio::select! {
            _ = interrupted.cancel.cancelled() => {}
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                    return;
                }
                info!("Interrupted, draining the index queue");
                interrupted.drain_and_stop().await;
            }
        }
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(state.cancel.clone().cancelled_owned())
        .await?;

    if let Some(project) = state.project() {
        tokio::task::spawn_blocking(move || project.shutdown()).await?;
    }
    info!("Server stopped");
    Ok(())
}
