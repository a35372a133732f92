use axum::{
    extract::{rejection::JsonRejection, FromRequestParts, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::live::BufferSnapshot;
use crate::project::{Project, ProjectState};
use crate::query::{MatchResults, QueryEngine, Reference};
use crate::server::AppState;
use crate::symbol::{Location, Occurrence};

const DEFAULT_MATCH_LIMIT: usize = 20;

#[derive(Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Error returned by every handler, rendered as `{"error": message}`
#[derive(Debug)]
pub enum ApiError {
    /// No project registered yet
    NotRegistered,
    BadRequest(String),
    Conflict(String),
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotRegistered => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::NotRegistered => write!(f, "{}", crate::Error::NotRegistered),
            ApiError::BadRequest(m) | ApiError::Conflict(m) | ApiError::Internal(m) => write!(f, "{}", m),
        }
    }
}

impl From<crate::Error> for ApiError {
    fn from(e: crate::Error) -> Self {
        match e {
            crate::Error::NotRegistered => ApiError::NotRegistered,
            crate::Error::ProjectConflict(..) => ApiError::Conflict(e.to_string()),
            crate::Error::ProjectNotFound(_) | crate::Error::BuiltinHeadersNotFound(_) => {
                ApiError::BadRequest(e.to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(ErrorResponse { error: self.to_string() })).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Query-string extractor whose rejection is an [`ApiError`]
pub struct Params<T>(pub T);

impl<S, T> FromRequestParts<S> for Params<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Query::<T>::from_request_parts(parts, state)
            .await
            .map(|Query(value)| Params(value))
            .map_err(|e| ApiError::BadRequest(e.body_text()))
    }
}

fn registered(state: &AppState) -> Result<Arc<Project>, ApiError> {
    state.project().ok_or(ApiError::NotRegistered)
}

/// Run store reads on the blocking pool
async fn blocking<T, F>(work: F) -> ApiResult<T>
where
    F: FnOnce() -> crate::Result<T> + Send + 'static,
    T: Send + 'static,
{
    Ok(Json(tokio::task::spawn_blocking(work).await??))
}

#[derive(Deserialize)]
pub struct RegisterParams {
    pub library_path: String,
    pub project_root: String,
}

#[derive(Deserialize)]
pub struct FileParams {
    pub file_name: String,
}

#[derive(Deserialize)]
pub struct OptionalFileParams {
    pub file_name: Option<String>,
}

#[derive(Deserialize)]
pub struct RangeParams {
    pub starts_with: String,
}

#[derive(Deserialize)]
pub struct MatchParams {
    pub prefix: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Deserialize)]
pub struct SymbolParams {
    pub symbol_id: String,
}

#[derive(Deserialize)]
pub struct CursorParams {
    pub file_name: String,
    pub line: u32,
    pub col: u32,
}

#[derive(Deserialize)]
pub struct LineParams {
    pub file_name: String,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub project_root: String,
}

/// Body of `/status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub project_root: Option<String>,
    pub state: ProjectState,
    pub queue_size: usize,
    pub index_status: Vec<String>,
    pub live_status: String,
}

pub async fn ping() -> &'static str {
    "symdex"
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    Params(params): Params<RegisterParams>,
) -> ApiResult<RegisterResponse> {
    let _guard = state.register_lock.lock().await;
    let requested = PathBuf::from(&params.project_root);

    if let Some(project) = state.project() {
        if project.contains(&requested) {
            return Ok(Json(RegisterResponse {
                project_root: project.root().display().to_string(),
            }));
        }
        return Err(crate::Error::ProjectConflict(
            params.project_root,
            project.root().display().to_string(),
        )
        .into());
    }

    let parser = Arc::clone(&state.parser);
    let config = state.config.clone();
    let library_path = PathBuf::from(&params.library_path);
    let project = tokio::task::spawn_blocking(move || {
        Project::open(&requested, &library_path, parser, &config)
    })
    .await?
    .map_err(|e| {
        warn!("Registration failed: {}", e);
        ApiError::from(e)
    })?;

    let project = Arc::new(project);
    info!("Registered {}", project.root().display());
    state.start_project_tasks(&project);
    state.set_project(Arc::clone(&project));

    Ok(Json(RegisterResponse {
        project_root: project.root().display().to_string(),
    }))
}

/// Reparse one file, or start a full sweep in the background
pub async fn parse(
    State(state): State<Arc<AppState>>,
    Params(params): Params<OptionalFileParams>,
) -> ApiResult<bool> {
    let project = registered(&state)?;
    match params.file_name {
        Some(file_name) => {
            let queued = tokio::task::spawn_blocking(move || project.parse_file(&file_name)).await??;
            Ok(Json(queued))
        }
        None => {
            tokio::task::spawn_blocking(move || match project.scan_and_index() {
                Ok(report) => info!("Sweep finished: {:?}", report),
                Err(e) => warn!("Sweep failed: {}", e),
            });
            Ok(Json(true))
        }
    }
}

pub async fn queue_size(State(state): State<Arc<AppState>>) -> ApiResult<usize> {
    Ok(Json(registered(&state)?.queue_size()))
}

pub async fn raw_range_search(
    State(state): State<Arc<AppState>>,
    Params(params): Params<RangeParams>,
) -> ApiResult<Vec<(String, String)>> {
    let project = registered(&state)?;
    blocking(move || {
        let store = project.store()?;
        QueryEngine::new(&store).raw_range_search(&params.starts_with)
    })
    .await
}

pub async fn match_prefix(
    State(state): State<Arc<AppState>>,
    Params(params): Params<MatchParams>,
) -> ApiResult<MatchResults> {
    let project = registered(&state)?;
    let limit = params.limit.unwrap_or(DEFAULT_MATCH_LIMIT);
    blocking(move || {
        let store = project.store()?;
        QueryEngine::new(&store).match_prefix(params.prefix.as_deref(), limit)
    })
    .await
}

pub async fn builtin_header_path(State(state): State<Arc<AppState>>) -> ApiResult<String> {
    Ok(Json(registered(&state)?.builtin_include().to_string()))
}

pub async fn file_args(
    State(state): State<Arc<AppState>>,
    Params(params): Params<FileParams>,
) -> ApiResult<Option<Vec<String>>> {
    let project = registered(&state)?;
    blocking(move || project.file_args(&params.file_name)).await
}

pub async fn definition(
    State(state): State<Arc<AppState>>,
    Params(params): Params<SymbolParams>,
) -> ApiResult<Option<Occurrence>> {
    let project = registered(&state)?;
    blocking(move || {
        let store = project.store()?;
        QueryEngine::new(&store).definition(&params.symbol_id)
    })
    .await
}

pub async fn references(
    State(state): State<Arc<AppState>>,
    Params(params): Params<SymbolParams>,
) -> ApiResult<Vec<Reference>> {
    let project = registered(&state)?;
    blocking(move || {
        let store = project.store()?;
        QueryEngine::new(&store).references(&params.symbol_id)
    })
    .await
}

/// Queue a live parse of an editor buffer
pub async fn buffer(
    State(state): State<Arc<AppState>>,
    body: Result<Json<BufferSnapshot>, JsonRejection>,
) -> ApiResult<bool> {
    registered(&state)?;
    let Json(snapshot) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    state.live.request_parse(snapshot);
    Ok(Json(true))
}

pub async fn goto_definition(
    State(state): State<Arc<AppState>>,
    Params(params): Params<CursorParams>,
) -> ApiResult<Option<Location>> {
    let project = registered(&state)?;
    let live = Arc::clone(&state.live);
    blocking(move || {
        let store = project.store()?;
        live.goto_definition(&store, &params.file_name, params.line, params.col)
    })
    .await
}

pub async fn find_references(
    State(state): State<Arc<AppState>>,
    Params(params): Params<CursorParams>,
) -> ApiResult<Vec<Reference>> {
    let project = registered(&state)?;
    let live = Arc::clone(&state.live);
    blocking(move || {
        let store = project.store()?;
        live.find_references(&store, &params.file_name, params.line, params.col)
    })
    .await
}

pub async fn current_scope(
    State(state): State<Arc<AppState>>,
    Params(params): Params<LineParams>,
) -> ApiResult<Option<String>> {
    Ok(Json(state.live.current_scope(&params.file_name, params.line)))
}

pub async fn unload(
    State(state): State<Arc<AppState>>,
    Params(params): Params<FileParams>,
) -> ApiResult<bool> {
    Ok(Json(state.live.unload(&params.file_name)))
}

pub async fn status(State(state): State<Arc<AppState>>) -> ApiResult<ServiceStatus> {
    let status = match state.project() {
        Some(project) => ServiceStatus {
            project_root: Some(project.root().display().to_string()),
            state: project.state(),
            queue_size: project.queue_size(),
            index_status: project.index_status(),
            live_status: state.live.status(),
        },
        None => ServiceStatus {
            project_root: None,
            state: ProjectState::Uninitialized,
            queue_size: 0,
            index_status: Vec::new(),
            live_status: state.live.status(),
        },
    };
    Ok(Json(status))
}
