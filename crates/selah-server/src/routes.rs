use std::sync::Arc;

use axum::extract::{Query, Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use selah_core::sync::protocol::{PullResponse, PushRequest, PushResponse};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{authenticate, extract_bearer_token, user_fingerprint, AuthenticatedUser};
use crate::config::AppConfig;
use crate::db::ServerDb;
use crate::error::AppError;
use crate::reconcile;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Arc<ServerDb>,
}

pub fn app_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/sync/push", post(sync_push))
        .route("/sync/pull", get(sync_pull))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/v1", protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
    })
}

async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(request.headers())?;
    let user = authenticate(&state.db, token)?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

async fn sync_push(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(request): Json<PushRequest>,
) -> Result<Json<PushResponse>, AppError> {
    let user_hash = user_fingerprint(&user.user_id);
    let response = reconcile::apply_push(&state.db, &user.user_id, &request)?;
    tracing::info!(
        endpoint = "sync_push",
        user = user_hash,
        highlights = response.synced.highlights,
        notes = response.synced.notes,
        bookmarks = response.synced.bookmarks,
        reading_logs = response.synced.reading_logs,
        "Applied pushed batch"
    );
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct PullParams {
    since: Option<DateTime<Utc>>,
}

async fn sync_pull(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(params): Query<PullParams>,
) -> Result<Json<PullResponse>, AppError> {
    let user_hash = user_fingerprint(&user.user_id);
    let response = reconcile::pull(&state.db, &user.user_id, params.since)?;
    tracing::info!(
        endpoint = "sync_pull",
        user = user_hash,
        records = response.record_count(),
        "Served pull delta"
    );
    Ok(Json(response))
}
