//! REST API for the content service
//!
//! Every request runs as one unit of work: the lifecycle middleware opens a
//! database session before the handler and returns its connection after the
//! response is computed, whatever the handler did.
//!
//! # Endpoints
//! - `GET /health` - Liveness check
//! - `GET /v1/content` - List stored content with pagination
//! - `GET /v1/content/{id}` - Get one content row
//! - `POST /v1/content` - Store content synchronously
//! - `POST /v1/content/ingest` - Queue content for the background worker
//! - `DELETE /v1/content?url=` - Queue removal of content for the background worker

use crate::db::{Session, content};
use crate::db::content::{ContentRow, MAX_URL_LEN};
use crate::error::{ApiError, ApiResult, panic_response};
use crate::state::AppState;
use crate::tasks::{Job, Task};
use axum::{
    Extension, Json, Router,
    extract::{
        Path, Query, Request, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Default number of items per page
const DEFAULT_PAGE_LIMIT: i64 = 50;
/// Maximum allowed items per page
const MAX_PAGE_LIMIT: i64 = 100;

// ============================================================================
// ROUTER
// ============================================================================

/// The full application: content routes wrapped in the request lifecycle.
pub fn app(state: AppState) -> Router {
    with_lifecycle(router(), state)
}

/// Creates the router with all content endpoints
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route(
            "/v1/content",
            get(list_content).post(create_content).delete(delete_content),
        )
        .route("/v1/content/ingest", post(ingest_content))
        .route("/v1/content/{id}", get(get_content))
        .fallback(route_not_found)
        .method_not_allowed_fallback(method_not_allowed)
}

/// Wraps `routes` so each request is a unit of work. Handler panics become a
/// 500 response inside the unit, so cleanup still runs for them.
pub fn with_lifecycle(routes: Router<AppState>, state: AppState) -> Router {
    routes
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(middleware::from_fn_with_state(state.clone(), unit_of_work))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// MIDDLEWARE
// ============================================================================

async fn unit_of_work(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let unit = match state.coordinator.begin() {
        Ok(unit) => unit,
        Err(err) => return ApiError::from(err).into_response(),
    };
    request.extensions_mut().insert(unit.session().clone());

    let response = next.run(request).await;

    match unit.finish() {
        Ok(()) => response,
        Err(err) if response.status().is_client_error() || response.status().is_server_error() => {
            tracing::warn!(
                error = %err,
                status = %response.status(),
                "cleanup failed after an error response; keeping the original response"
            );
            response
        }
        Err(err) => ApiError::from(err).into_response(),
    }
}

// ============================================================================
// REQUEST/RESPONSE TYPES
// ============================================================================

/// Query parameters for paginated lists
#[derive(Deserialize)]
struct PaginationQuery {
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Deserialize)]
struct NewContent {
    url: String,
    body: Option<String>,
}

/// Query parameters identifying content by url
#[derive(Deserialize)]
struct UrlQuery {
    url: String,
}

#[derive(Serialize)]
struct JobAccepted {
    job_id: Uuid,
    task: &'static str,
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /health
async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}

/// GET /v1/content - List content ordered by id
async fn list_content(
    Extension(session): Extension<Session>,
    params: Result<Query<PaginationQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<ContentRow>>> {
    let Query(params) = params.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    let limit = normalize_limit(params.limit)?;
    let offset = normalize_offset(params.offset)?;

    let mut conn = session.connection().await?;
    let rows = content::list(&mut conn, limit, offset).await?;
    Ok(Json(rows))
}

/// GET /v1/content/{id}
async fn get_content(
    Extension(session): Extension<Session>,
    id: Result<Path<i32>, PathRejection>,
) -> ApiResult<Json<ContentRow>> {
    let Path(id) = id.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;

    let mut conn = session.connection().await?;
    let Some(row) = content::get(&mut conn, id).await? else {
        return Err(ApiError::not_found("content not found"));
    };
    Ok(Json(row))
}

/// POST /v1/content - Insert a new row; a duplicate url is a conflict
async fn create_content(
    Extension(session): Extension<Session>,
    payload: Result<Json<NewContent>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ContentRow>)> {
    let Json(new) = payload.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    validate_url(&new.url)?;

    let mut conn = session.connection().await?;
    let row = content::insert(&mut conn, &new.url, new.body.as_deref()).await?;
    tracing::info!(content_id = row.id, url = %row.url, "content created");
    Ok((StatusCode::CREATED, Json(row)))
}

/// POST /v1/content/ingest - Hand the write to the background worker
async fn ingest_content(
    State(state): State<AppState>,
    payload: Result<Json<NewContent>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<JobAccepted>)> {
    let Json(new) = payload.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    validate_url(&new.url)?;

    let job = state.tasks.enqueue(Task::StoreContent {
        url: new.url,
        body: new.body,
    })?;
    Ok(accepted(&job))
}

/// DELETE /v1/content?url= - Hand the removal to the background worker
async fn delete_content(
    State(state): State<AppState>,
    params: Result<Query<UrlQuery>, QueryRejection>,
) -> ApiResult<(StatusCode, Json<JobAccepted>)> {
    let Query(params) = params.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    validate_url(&params.url)?;

    let job = state.tasks.enqueue(Task::DeleteContent { url: params.url })?;
    Ok(accepted(&job))
}

async fn route_not_found() -> ApiError {
    ApiError::not_found("route not found")
}

async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn accepted(job: &Job) -> (StatusCode, Json<JobAccepted>) {
    (
        StatusCode::ACCEPTED,
        Json(JobAccepted {
            job_id: job.id,
            task: job.task.name(),
        }),
    )
}

/// Normalizes pagination limit with bounds checking
fn normalize_limit(limit: Option<i64>) -> Result<i64, ApiError> {
    let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT);
    if limit <= 0 {
        return Err(ApiError::bad_request("limit must be positive"));
    }
    Ok(limit.min(MAX_PAGE_LIMIT))
}

/// Normalizes pagination offset with bounds checking
fn normalize_offset(offset: Option<i64>) -> Result<i64, ApiError> {
    let offset = offset.unwrap_or(0);
    if offset < 0 {
        return Err(ApiError::bad_request("offset must be >= 0"));
    }
    Ok(offset)
}

fn validate_url(url: &str) -> Result<(), ApiError> {
    if url.trim().is_empty() {
        return Err(ApiError::bad_request("url must not be empty"));
    }
    if url.len() > MAX_URL_LEN {
        return Err(ApiError::bad_request(format!(
            "url must be at most {MAX_URL_LEN} bytes"
        )));
    }
    Ok(())
}
