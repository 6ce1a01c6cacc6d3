use axum::{
    extract::{Path, State},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;
use crate::{
    AppState,
    error::AppError,
    models::{ImportStats, PreviewSummary, StagedRow},
    routes::{upload::PreviewData, ApiResponse},
    services::{orchestrator::CommitState, preview_store::RowPatch},
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sessions/:id", get(session_status))
        .route("/sessions/:id/preview", get(current_preview))
        .route("/sessions/:id/rows/:temp_id", delete(delete_row))
        .route("/sessions/:id/rows/:temp_id/edit", post(start_edit))
        .route("/sessions/:id/edit", axum::routing::patch(update_edit))
        .route("/sessions/:id/edit/save", post(save_edit))
        .route("/sessions/:id/edit/cancel", post(cancel_edit))
        .route("/sessions/:id/reclassify", post(reclassify))
        .route("/sessions/:id/reset", post(reset))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    session_id: Uuid,
    file_name: Option<String>,
    selected_sheet: Option<String>,
    state: &'static str,
    resume_token: Option<Uuid>,
    editing: Option<u32>,
    stats: Option<ImportStats>,
    failure: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeletedRow {
    deleted: StagedRow,
    summary: PreviewSummary,
}

async fn session_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<SessionStatus>>, AppError> {
    let session = state.sessions.get(id)?;
    let session = session.lock();
    let commit = session.state();

    Ok(ApiResponse::ok(SessionStatus {
        session_id: session.id,
        file_name: session.file_name().map(str::to_string),
        selected_sheet: session.selected_sheet().map(str::to_string),
        state: commit.label(),
        resume_token: commit.token(),
        editing: session.store().ok().and_then(|store| store.editing()),
        stats: match commit {
            CommitState::Completed { stats, .. } => Some(*stats),
            _ => None,
        },
        failure: match commit {
            CommitState::Failed { reason, .. } => Some(reason.clone()),
            _ => None,
        },
    }))
}

async fn current_preview(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<PreviewData>>, AppError> {
    let session = state.sessions.get(id)?;
    let session = session.lock();
    Ok(ApiResponse::ok(PreviewData::from_store(session.store()?)))
}

async fn delete_row(
    State(state): State<Arc<AppState>>,
    Path((id, temp_id)): Path<(Uuid, u32)>,
) -> Result<Json<ApiResponse<DeletedRow>>, AppError> {
    let session = state.sessions.get(id)?;
    let mut session = session.lock();
    let store = session.store_mut()?;

    let deleted = store.delete_row(temp_id)?;
    tracing::debug!("Session {}: row {} removed from preview", id, temp_id);
    Ok(ApiResponse::ok(DeletedRow {
        deleted,
        summary: store.summary(),
    }))
}

async fn start_edit(
    State(state): State<Arc<AppState>>,
    Path((id, temp_id)): Path<(Uuid, u32)>,
) -> Result<Json<ApiResponse<StagedRow>>, AppError> {
    let session = state.sessions.get(id)?;
    let mut session = session.lock();
    let row = session.store_mut()?.start_edit(temp_id)?.clone();
    Ok(ApiResponse::ok(row))
}

async fn update_edit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(patch): Json<RowPatch>,
) -> Result<Json<ApiResponse<StagedRow>>, AppError> {
    let session = state.sessions.get(id)?;
    let mut session = session.lock();
    let row = session.store_mut()?.update_edit(patch)?.clone();
    Ok(ApiResponse::ok(row))
}

async fn save_edit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<StagedRow>>, AppError> {
    let session = state.sessions.get(id)?;
    let mut session = session.lock();
    let row = session.store_mut()?.save_edit()?.clone();
    Ok(ApiResponse::ok(row))
}

async fn cancel_edit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<StagedRow>>, AppError> {
    let session = state.sessions.get(id)?;
    let mut session = session.lock();
    let row = session.store_mut()?.cancel_edit()?.clone();
    Ok(ApiResponse::ok(row))
}

async fn reclassify(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<PreviewData>>, AppError> {
    let session = state.sessions.get(id)?;
    let mut session = session.lock();
    let store = session.store_mut()?;
    store.reclassify_all()?;
    Ok(ApiResponse::ok(PreviewData::from_store(store)))
}

async fn reset(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<PreviewData>>, AppError> {
    let session = state.sessions.get(id)?;
    let mut session = session.lock();
    let store = session.store_mut()?;
    store.reset_to_original();
    Ok(ApiResponse::ok(PreviewData::from_store(store)))
}
