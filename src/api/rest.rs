use crate::config::ApiConfig;
use crate::db::models::{DetectionItem, DetectionLabel, RecordingInfo};
use crate::error::Error;
use crate::feed::{FeedManager, ItemFilter, RawTransition};
use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use uuid::Uuid;

// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<FeedManager>,
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub message: String,
    pub status: u16,
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound(_) => ApiError {
                message: err.to_string(),
                status: StatusCode::NOT_FOUND.as_u16(),
            },
            Error::Api(_) | Error::Config(_) | Error::Mapping(_) | Error::MergeAnomaly(_) => {
                ApiError {
                    message: err.to_string(),
                    status: StatusCode::BAD_REQUEST.as_u16(),
                }
            }
            _ => ApiError {
                message: err.to_string(),
                status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            },
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(err) = err.downcast_ref::<Error>() {
            return err.clone().into();
        }

        ApiError {
            message: err.to_string(),
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(self);
        (status, body).into_response()
    }
}

pub struct RestApi {
    config: ApiConfig,
    manager: Arc<FeedManager>,
    media_root: PathBuf,
}

impl RestApi {
    pub fn new(config: &ApiConfig, manager: Arc<FeedManager>, media_root: PathBuf) -> Self {
        Self {
            config: config.clone(),
            manager,
            media_root,
        }
    }

    pub async fn run(&self) -> Result<()> {
        let state = AppState {
            manager: Arc::clone(&self.manager),
        };

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        let app = Router::new()
            .route("/api/items", get(list_items))
            .route("/api/items/:id", get(get_item).delete(delete_item))
            .route("/api/items/:id/resolve", post(resolve_recording))
            .route("/api/items/:id/recording/reset", post(reset_recording))
            .route("/api/transitions", post(ingest_transition))
            .route("/api/mock", post(create_mock_detection))
            .route("/api/rebuild", post(rebuild_from_history))
            .with_state(state)
            // Snapshot stills are served straight from the media root
            .nest_service("/media", ServeDir::new(&self.media_root))
            .layer(cors);

        let addr = self.config.address.clone() + ":" + &self.config.port.to_string();
        let addr: SocketAddr = addr.parse()?;

        info!("API server listening on {}", addr);

        let listener = TcpListener::bind(addr).await?;
        axum::Server::from_tcp(listener.into_std()?)?
            .serve(app.into_make_service())
            .await?;

        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ListParams {
    /// Comma-separated label filter, e.g. `person,pet`
    labels: Option<String>,
    since_hours: Option<u64>,
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ItemsResponse {
    items: Vec<DetectionItem>,
}

async fn list_items(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<ItemsResponse>> {
    let labels = match params.labels.as_deref() {
        None => None,
        Some(raw) => {
            let mut set = HashSet::new();
            for token in raw.split(',').filter(|t| !t.trim().is_empty()) {
                let label = DetectionLabel::parse(token).ok_or_else(|| ApiError {
                    message: format!("Unknown label: {}", token),
                    status: StatusCode::BAD_REQUEST.as_u16(),
                })?;
                set.insert(label);
            }
            Some(set)
        }
    };

    let filter = ItemFilter {
        labels,
        since_hours: params.since_hours,
        limit: params.limit,
    };
    let items = state.manager.list_items(&filter).await?;
    Ok(Json(ItemsResponse { items }))
}

async fn get_item(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DetectionItem>> {
    let item = state.manager.get_item(&id).await?;
    Ok(Json(item))
}

#[derive(Debug, Default, Deserialize)]
struct ResolveRequest {
    #[serde(default)]
    final_attempt: bool,
}

async fn resolve_recording(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<ResolveRequest>>,
) -> ApiResult<Json<RecordingInfo>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let recording = state
        .manager
        .resolve_recording(id, request.final_attempt)
        .await?;
    Ok(Json(recording))
}

async fn reset_recording(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<RecordingInfo>> {
    let recording = state.manager.reset_recording(id).await?;
    Ok(Json(recording))
}

#[derive(Debug, Serialize)]
struct DeleteResponse {
    deleted: bool,
}

async fn delete_item(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DeleteResponse>> {
    let deleted = state.manager.delete_item(id).await?;
    Ok(Json(DeleteResponse { deleted }))
}

async fn ingest_transition(
    State(state): State<AppState>,
    Json(transition): Json<RawTransition>,
) -> ApiResult<StatusCode> {
    state.manager.handle_transition(&transition).await?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Debug, Deserialize)]
struct MockDetectionRequest {
    entity_id: String,
    camera_name: String,
    #[serde(default = "default_mock_label")]
    label: String,
    #[serde(default = "default_mock_duration")]
    duration_s: i64,
    #[serde(default = "default_true")]
    create_snapshot: bool,
}

fn default_mock_label() -> String {
    "person".to_string()
}

fn default_mock_duration() -> i64 {
    8
}

fn default_true() -> bool {
    true
}

async fn create_mock_detection(
    State(state): State<AppState>,
    Json(request): Json<MockDetectionRequest>,
) -> ApiResult<Json<DetectionItem>> {
    let item = state
        .manager
        .create_mock_detection(
            &request.entity_id,
            &request.camera_name,
            &request.label,
            request.duration_s,
            request.create_snapshot,
        )
        .await?;
    Ok(Json(item))
}

#[derive(Debug, Default, Deserialize)]
struct RebuildRequest {
    lookback_hours: Option<u64>,
}

#[derive(Debug, Serialize)]
struct RebuildResponse {
    items: usize,
}

async fn rebuild_from_history(
    State(state): State<AppState>,
    body: Option<Json<RebuildRequest>>,
) -> ApiResult<Json<RebuildResponse>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let items = state
        .manager
        .rebuild_from_history(request.lookback_hours)
        .await?;
    Ok(Json(RebuildResponse { items }))
}
