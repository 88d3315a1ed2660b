//! Submission endpoints: query, ingest, mutate, history, delete

use crate::api::identity::AdminIdentity;
use crate::error::ApiResult;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use intake_common::api::{
    BulkChangeRequest, BulkDeleteRequest, BulkDeleteResponse, CreateSubmissionRequest,
};
use intake_common::audit::{AuditEntry, HistoryOrder};
use intake_common::bulk::BulkReport;
use intake_common::change::{ChangeRequest, SubmissionChange};
use intake_common::model::Submission;
use intake_common::view::{SortKey, ViewFilters};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
pub struct SortQuery {
    #[serde(default)]
    pub sort: Option<SortKey>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub order: Option<HistoryOrder>,
}

/// GET /api/submissions
pub async fn list_submissions(
    State(state): State<AppState>,
    Query(filters): Query<ViewFilters>,
    Query(sort): Query<SortQuery>,
) -> ApiResult<Json<Vec<Submission>>> {
    let submissions = state
        .engine
        .list(&filters, sort.sort.unwrap_or_default())
        .await?;
    Ok(Json(submissions))
}

/// POST /api/submissions
///
/// Ingestion boundary: the form collector posts here, no admin identity.
pub async fn create_submission(
    State(state): State<AppState>,
    Json(req): Json<CreateSubmissionRequest>,
) -> ApiResult<(StatusCode, Json<Submission>)> {
    let submission = state
        .engine
        .create_submission(&req.form_type, req.fields)
        .await?;
    Ok((StatusCode::CREATED, Json(submission)))
}

/// GET /api/submissions/:id
pub async fn get_submission(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Submission>> {
    Ok(Json(state.engine.get(id).await?))
}

/// PATCH /api/submissions/:id
pub async fn update_submission(
    State(state): State<AppState>,
    admin: AdminIdentity,
    Path(id): Path<Uuid>,
    Json(req): Json<ChangeRequest>,
) -> ApiResult<Json<Submission>> {
    let change = SubmissionChange::try_from(req)?;
    let submission = state.engine.apply_mutation(id, &change, &admin.id).await?;
    Ok(Json(submission))
}

/// POST /api/submissions/bulk
pub async fn bulk_update(
    State(state): State<AppState>,
    admin: AdminIdentity,
    Json(req): Json<BulkChangeRequest>,
) -> ApiResult<Json<BulkReport>> {
    let change = SubmissionChange::try_from(req.change)?;
    let report = state.engine.bulk_apply(&req.ids, &change, &admin.id).await?;
    Ok(Json(report))
}

/// POST /api/submissions/bulk-delete
pub async fn bulk_delete(
    State(state): State<AppState>,
    admin: AdminIdentity,
    Json(req): Json<BulkDeleteRequest>,
) -> ApiResult<Json<BulkDeleteResponse>> {
    let deleted = state.engine.bulk_delete(&req.ids, &admin.id).await?;
    Ok(Json(BulkDeleteResponse { deleted }))
}

/// GET /api/submissions/:id/history?order=oldest|newest
pub async fn get_history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<AuditEntry>>> {
    let entries = state
        .engine
        .history(id, query.order.unwrap_or_default())
        .await?;
    Ok(Json(entries))
}

pub fn submission_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/submissions",
            get(list_submissions).post(create_submission),
        )
        .route("/api/submissions/bulk", post(bulk_update))
        .route("/api/submissions/bulk-delete", post(bulk_delete))
        .route(
            "/api/submissions/:id",
            get(get_submission).patch(update_submission),
        )
        .route("/api/submissions/:id/history", get(get_history))
}
