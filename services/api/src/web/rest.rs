//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.
//!
//! Every handler runs behind `require_user`, so the caller id is always present.

use crate::sync::{StreamSyncReport, SyncReport};
use crate::web::{middleware::CallerId, state::AppState};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
    Extension,
};
use chrono::{DateTime, NaiveDate, Utc};
use proscientia_core::domain::{
    Artifact, ArtifactId, ArtifactType, CatalogStream, DocumentId, Job, Snapshot, SyncAttempt,
};
use proscientia_core::ports::PortError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, warn};
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        submit_summary_handler,
        submit_report_handler,
        get_job_handler,
        list_artifacts_handler,
        get_artifact_handler,
        get_artifact_content_handler,
        delete_artifact_handler,
        sync_snapshots_handler,
        list_snapshots_handler,
        latest_snapshots_handler,
        get_snapshot_handler,
        snapshot_json_handler,
        sync_log_handler,
    ),
    components(
        schemas(
            SubmitJobRequest,
            SubmitJobResponse,
            JobView,
            ArtifactView,
            SnapshotView,
            SnapshotFileView,
            SyncAttemptView,
            SyncReport,
            StreamSyncReport,
        )
    ),
    tags(
        (name = "Proscientia API", description = "Background summaries, ERP/MES reports and snapshot sync.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

/// Optional body of a job submission.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct SubmitJobRequest {
    /// Opaque generation options: an object, a string or null.
    #[schema(value_type = Object)]
    #[serde(default)]
    pub scope: Option<Value>,
}

/// Returned as soon as a job is accepted; progress arrives over the WebSocket.
#[derive(Serialize, ToSchema)]
pub struct SubmitJobResponse {
    job_id: Uuid,
    websocket_url: String,
}

impl SubmitJobResponse {
    fn new(job_id: Uuid) -> Self {
        Self {
            job_id,
            websocket_url: format!("/ws?job_id={}", job_id),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct JobView {
    id: Uuid,
    kind: String,
    owner_id: i64,
    subject_id: Option<i64>,
    /// One of `queued`, `started`, `completed`, `error`.
    status: String,
    created_at: DateTime<Utc>,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            kind: format!("{:?}", job.kind).to_lowercase(),
            owner_id: job.owner_id,
            subject_id: job.subject_id,
            status: job.state.as_status().to_string(),
            created_at: job.created_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ArtifactView {
    id: i64,
    artifact_type: String,
    subject_id: Option<i64>,
    owner_id: i64,
    payload_ref: String,
    title: String,
    #[schema(value_type = Object)]
    metadata: Value,
    created_at: DateTime<Utc>,
}

impl From<Artifact> for ArtifactView {
    fn from(artifact: Artifact) -> Self {
        Self {
            id: artifact.id,
            artifact_type: artifact.artifact_type.as_str().to_string(),
            subject_id: artifact.subject_id,
            owner_id: artifact.owner_id,
            payload_ref: artifact.payload_ref,
            title: artifact.title,
            metadata: artifact.metadata,
            created_at: artifact.created_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct SnapshotFileView {
    name: String,
    size: u64,
}

#[derive(Serialize, ToSchema)]
pub struct SnapshotView {
    id: i64,
    stream: String,
    version_date: NaiveDate,
    is_latest: bool,
    files_count: usize,
    files: Vec<SnapshotFileView>,
    updated_at: DateTime<Utc>,
}

impl From<Snapshot> for SnapshotView {
    fn from(snapshot: Snapshot) -> Self {
        Self {
            id: snapshot.id,
            stream: snapshot.stream.as_str().to_string(),
            version_date: snapshot.version_date,
            is_latest: snapshot.is_latest,
            files_count: snapshot.files.len(),
            files: snapshot
                .files
                .into_iter()
                .map(|f| SnapshotFileView {
                    name: f.name,
                    size: f.size,
                })
                .collect(),
            updated_at: snapshot.updated_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct SyncAttemptView {
    id: i64,
    stream: String,
    version_date: NaiveDate,
    snapshot_id: Option<i64>,
    status: String,
    message: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<SyncAttempt> for SyncAttemptView {
    fn from(attempt: SyncAttempt) -> Self {
        Self {
            id: attempt.id,
            stream: attempt.stream.as_str().to_string(),
            version_date: attempt.version_date,
            snapshot_id: attempt.snapshot_id,
            status: attempt.status.as_str().to_string(),
            message: attempt.message,
            created_at: attempt.timestamp,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ArtifactQuery {
    #[serde(rename = "type")]
    pub artifact_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub stream: Option<String>,
}

//=========================================================================================
// Error and Parameter Mapping
//=========================================================================================

type HandlerError = (StatusCode, String);

fn port_error(e: PortError) -> HandlerError {
    let status = match &e {
        PortError::NotFound(_) => StatusCode::NOT_FOUND,
        PortError::Forbidden(_) => StatusCode::FORBIDDEN,
        PortError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        PortError::QuotaExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
        PortError::CatalogUnavailable(_) | PortError::GenerationFailure(_) => {
            StatusCode::BAD_GATEWAY
        }
        PortError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!("Request failed: {:?}", e);
    } else {
        warn!("Request rejected: {}", e);
    }
    (status, e.to_string())
}

fn parse_stream(raw: &str) -> Result<CatalogStream, HandlerError> {
    raw.parse::<CatalogStream>()
        .map_err(|e| (StatusCode::BAD_REQUEST, e))
}

fn parse_snapshot_stream(raw: &str) -> Result<CatalogStream, HandlerError> {
    let stream = parse_stream(raw)?;
    if !stream.is_versioned() {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("Stream {} has no snapshots", stream),
        ));
    }
    Ok(stream)
}

fn parse_date(raw: &str) -> Result<NaiveDate, HandlerError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            format!("Invalid date '{}' (expected YYYY-MM-DD)", raw),
        )
    })
}

//=========================================================================================
// Job Handlers
//=========================================================================================

/// Request a summary of one document.
///
/// Returns immediately; the summary is generated in the background.
#[utoipa::path(
    post,
    path = "/documents/{document_id}/summaries",
    request_body(content = SubmitJobRequest, description = "Optional generation scope."),
    responses(
        (status = 202, description = "Job accepted", body = SubmitJobResponse),
        (status = 400, description = "Malformed scope"),
        (status = 403, description = "Document belongs to another user"),
        (status = 404, description = "Document not found"),
        (status = 429, description = "Summary quota for this document reached")
    ),
    params(
        ("document_id" = i64, Path, description = "The document to summarize."),
        ("x-user-id" = i64, Header, description = "The calling user.")
    )
)]
pub async fn submit_summary_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(CallerId(user_id)): Extension<CallerId>,
    Path(document_id): Path<DocumentId>,
    body: Option<Json<SubmitJobRequest>>,
) -> Result<impl IntoResponse, HandlerError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let job_id = app_state
        .dispatcher
        .submit_summary(document_id, user_id, request.scope)
        .await
        .map_err(port_error)?;
    Ok((StatusCode::ACCEPTED, Json(SubmitJobResponse::new(job_id))))
}

/// Request a report over the latest ERP and MES snapshots.
#[utoipa::path(
    post,
    path = "/reports/erp-mes",
    request_body(content = SubmitJobRequest, description = "Optional generation scope."),
    responses(
        (status = 202, description = "Job accepted", body = SubmitJobResponse),
        (status = 400, description = "Malformed scope")
    ),
    params(
        ("x-user-id" = i64, Header, description = "The calling user.")
    )
)]
pub async fn submit_report_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(CallerId(user_id)): Extension<CallerId>,
    body: Option<Json<SubmitJobRequest>>,
) -> Result<impl IntoResponse, HandlerError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let job_id = app_state
        .dispatcher
        .submit_report(user_id, request.scope)
        .await
        .map_err(port_error)?;
    Ok((StatusCode::ACCEPTED, Json(SubmitJobResponse::new(job_id))))
}

/// Look up the current state of one of the caller's jobs.
#[utoipa::path(
    get,
    path = "/jobs/{job_id}",
    responses(
        (status = 200, description = "The job", body = JobView),
        (status = 404, description = "Unknown job")
    ),
    params(
        ("job_id" = Uuid, Path, description = "The job id returned at submission."),
        ("x-user-id" = i64, Header, description = "The calling user.")
    )
)]
pub async fn get_job_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(CallerId(user_id)): Extension<CallerId>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, HandlerError> {
    match app_state.dispatcher.job(job_id) {
        Some(job) if job.owner_id == user_id => Ok(Json(JobView::from(job))),
        _ => Err((StatusCode::NOT_FOUND, format!("Job {} not found", job_id))),
    }
}

//=========================================================================================
// Artifact Handlers
//=========================================================================================

/// List the caller's artifacts, newest first.
#[utoipa::path(
    get,
    path = "/artifacts",
    responses(
        (status = 200, description = "The caller's artifacts", body = [ArtifactView]),
        (status = 400, description = "Unknown artifact type")
    ),
    params(
        ("type" = Option<String>, Query, description = "Filter by type: summary or quiz."),
        ("x-user-id" = i64, Header, description = "The calling user.")
    )
)]
pub async fn list_artifacts_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(CallerId(user_id)): Extension<CallerId>,
    Query(query): Query<ArtifactQuery>,
) -> Result<impl IntoResponse, HandlerError> {
    let artifact_type = query
        .artifact_type
        .as_deref()
        .map(|raw| raw.parse::<ArtifactType>())
        .transpose()
        .map_err(|e| (StatusCode::BAD_REQUEST, e))?;

    let artifacts = app_state
        .artifacts
        .list(user_id, artifact_type)
        .await
        .map_err(port_error)?;
    let views: Vec<ArtifactView> = artifacts.into_iter().map(ArtifactView::from).collect();
    Ok(Json(views))
}

#[utoipa::path(
    get,
    path = "/artifacts/{artifact_id}",
    responses(
        (status = 200, description = "The artifact", body = ArtifactView),
        (status = 404, description = "Not found for this user")
    ),
    params(
        ("artifact_id" = i64, Path, description = "The artifact id."),
        ("x-user-id" = i64, Header, description = "The calling user.")
    )
)]
pub async fn get_artifact_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(CallerId(user_id)): Extension<CallerId>,
    Path(artifact_id): Path<ArtifactId>,
) -> Result<impl IntoResponse, HandlerError> {
    let artifact = app_state
        .artifacts
        .get(artifact_id, user_id)
        .await
        .map_err(port_error)?;
    Ok(Json(ArtifactView::from(artifact)))
}

/// Download the generated text of an artifact.
#[utoipa::path(
    get,
    path = "/artifacts/{artifact_id}/content",
    responses(
        (status = 200, description = "The payload as plain text", content_type = "text/plain"),
        (status = 404, description = "Not found for this user")
    ),
    params(
        ("artifact_id" = i64, Path, description = "The artifact id."),
        ("x-user-id" = i64, Header, description = "The calling user.")
    )
)]
pub async fn get_artifact_content_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(CallerId(user_id)): Extension<CallerId>,
    Path(artifact_id): Path<ArtifactId>,
) -> Result<impl IntoResponse, HandlerError> {
    let bytes = app_state
        .artifacts
        .read_payload(artifact_id, user_id)
        .await
        .map_err(port_error)?;
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], bytes))
}

#[utoipa::path(
    delete,
    path = "/artifacts/{artifact_id}",
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Owned by another user"),
        (status = 404, description = "Not found")
    ),
    params(
        ("artifact_id" = i64, Path, description = "The artifact id."),
        ("x-user-id" = i64, Header, description = "The calling user.")
    )
)]
pub async fn delete_artifact_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(CallerId(user_id)): Extension<CallerId>,
    Path(artifact_id): Path<ArtifactId>,
) -> Result<impl IntoResponse, HandlerError> {
    app_state
        .artifacts
        .delete(artifact_id, user_id)
        .await
        .map_err(port_error)?;
    Ok(StatusCode::NO_CONTENT)
}

//=========================================================================================
// Snapshot Handlers
//=========================================================================================

/// Sync the local snapshot table with the catalog manifest.
#[utoipa::path(
    post,
    path = "/snapshots/sync",
    responses(
        (status = 200, description = "Sync completed", body = SyncReport),
        (status = 502, description = "Catalog manifest unavailable")
    ),
    params(
        ("x-user-id" = i64, Header, description = "The calling user.")
    )
)]
pub async fn sync_snapshots_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, HandlerError> {
    let report = app_state
        .synchronizer
        .sync_all()
        .await
        .map_err(port_error)?;
    Ok(Json(report))
}

#[utoipa::path(
    get,
    path = "/snapshots",
    responses(
        (status = 200, description = "Snapshots ordered by stream and date", body = [SnapshotView]),
        (status = 400, description = "Unknown stream")
    ),
    params(
        ("stream" = Option<String>, Query, description = "Restrict to erp or mes."),
        ("x-user-id" = i64, Header, description = "The calling user.")
    )
)]
pub async fn list_snapshots_handler(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<StreamQuery>,
) -> Result<impl IntoResponse, HandlerError> {
    let stream = query.stream.as_deref().map(parse_snapshot_stream).transpose()?;
    let snapshots = app_state
        .snapshots
        .list_snapshots(stream)
        .await
        .map_err(port_error)?;
    let views: Vec<SnapshotView> = snapshots.into_iter().map(SnapshotView::from).collect();
    Ok(Json(views))
}

#[utoipa::path(
    get,
    path = "/snapshots/latest",
    responses(
        (status = 200, description = "The latest snapshot of each stream", body = [SnapshotView])
    ),
    params(
        ("x-user-id" = i64, Header, description = "The calling user.")
    )
)]
pub async fn latest_snapshots_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, HandlerError> {
    let snapshots = app_state
        .snapshots
        .latest_snapshots(&CatalogStream::SNAPSHOT_STREAMS)
        .await
        .map_err(port_error)?;
    let views: Vec<SnapshotView> = snapshots.into_iter().map(SnapshotView::from).collect();
    Ok(Json(views))
}

#[utoipa::path(
    get,
    path = "/snapshots/{stream}/{date}",
    responses(
        (status = 200, description = "The snapshot", body = SnapshotView),
        (status = 400, description = "Invalid stream or date"),
        (status = 404, description = "Not synced")
    ),
    params(
        ("stream" = String, Path, description = "erp or mes."),
        ("date" = String, Path, description = "Version date, YYYY-MM-DD."),
        ("x-user-id" = i64, Header, description = "The calling user.")
    )
)]
pub async fn get_snapshot_handler(
    State(app_state): State<Arc<AppState>>,
    Path((stream, date)): Path<(String, String)>,
) -> Result<impl IntoResponse, HandlerError> {
    let stream = parse_snapshot_stream(&stream)?;
    let date = parse_date(&date)?;
    let snapshot = app_state
        .snapshots
        .get_snapshot(stream, date)
        .await
        .map_err(port_error)?;
    Ok(Json(SnapshotView::from(snapshot)))
}

/// Fetch one JSON file of a snapshot from the catalog.
#[utoipa::path(
    get,
    path = "/snapshots/{stream}/{date}/files/{name}",
    responses(
        (status = 200, description = "The parsed file", content_type = "application/json"),
        (status = 400, description = "Invalid stream or date"),
        (status = 502, description = "Catalog unavailable or file is not JSON")
    ),
    params(
        ("stream" = String, Path, description = "erp or mes."),
        ("date" = String, Path, description = "Version date, YYYY-MM-DD."),
        ("name" = String, Path, description = "File name within the snapshot."),
        ("x-user-id" = i64, Header, description = "The calling user.")
    )
)]
pub async fn snapshot_json_handler(
    State(app_state): State<Arc<AppState>>,
    Path((stream, date, name)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, HandlerError> {
    let stream = parse_stream(&stream)?;
    let date = parse_date(&date)?;
    let value = app_state
        .synchronizer
        .snapshot_json(stream, date, &name)
        .await
        .map_err(port_error)?;
    Ok(Json(value))
}

#[utoipa::path(
    get,
    path = "/snapshots/sync-log",
    responses(
        (status = 200, description = "Sync attempts, oldest first", body = [SyncAttemptView]),
        (status = 400, description = "Unknown stream")
    ),
    params(
        ("stream" = Option<String>, Query, description = "Restrict to erp or mes."),
        ("x-user-id" = i64, Header, description = "The calling user.")
    )
)]
pub async fn sync_log_handler(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<StreamQuery>,
) -> Result<impl IntoResponse, HandlerError> {
    let stream = query.stream.as_deref().map(parse_snapshot_stream).transpose()?;
    let attempts = app_state
        .snapshots
        .list_sync_attempts(stream)
        .await
        .map_err(port_error)?;
    let views: Vec<SyncAttemptView> = attempts.into_iter().map(SyncAttemptView::from).collect();
    Ok(Json(views))
}
