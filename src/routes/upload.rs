use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    routing::post,
    Json, Router,
};
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use crate::{
    AppState,
    error::AppError,
    models::{PreviewSummary, StagedRow, WorkbookAnalysis},
    routes::ApiResponse,
    services::{
        duplicate_resolver::CatalogSnapshot,
        excel::{decoder, WorkbookAnalyzer},
        preview_store::PreviewStore,
        session::ImportSession,
    },
};

pub fn routes(max_file_size: usize) -> Router<Arc<AppState>> {
    Router::new()
        .route("/upload-excel/analyze", post(analyze_excel))
        .route("/upload-excel/preview", post(preview_excel))
        // headroom so the analyzer, not the body limit, reports oversize files
        .layer(DefaultBodyLimit::max(max_file_size.saturating_mul(2)))
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeQuery {
    session_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeData {
    session_id: Uuid,
    #[serde(flatten)]
    analysis: WorkbookAnalysis,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResponse {
    success: bool,
    data: AnalyzeData,
    file_size_mb: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewData {
    preview_rows: Vec<StagedRow>,
    columns: Vec<String>,
    #[serde(flatten)]
    summary: PreviewSummary,
}

impl PreviewData {
    pub fn from_store(store: &PreviewStore) -> Self {
        Self {
            preview_rows: store.rows().to_vec(),
            columns: store.columns().to_vec(),
            summary: store.summary(),
        }
    }
}

#[axum::debug_handler]
async fn analyze_excel(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AnalyzeQuery>,
    mut multipart: Multipart,
) -> Result<Json<AnalyzeResponse>, AppError> {
    let start = std::time::Instant::now();

    let (file_name, file_data) = read_upload(&mut multipart, &state.analyzer).await?;
    let file_size = file_data.len();
    tracing::info!("Received {} ({}KB)", file_name, file_size / 1024);

    let workbook = tokio::task::spawn_blocking(move || decoder::decode_workbook(file_data))
        .await
        .map_err(|e| AppError::Internal(format!("Workbook decoding task failed: {}", e)))??;
    let analysis = state.analyzer.analyze(&workbook);

    if let Some(previous) = query.session_id {
        state.sessions.replace(previous)?;
    }
    let session = ImportSession::from_upload(file_name, workbook, analysis.clone());
    let session_id = session.id;
    state.sessions.insert(session);

    tracing::info!("Analysis for session {} completed in {:?}", session_id, start.elapsed());

    Ok(Json(AnalyzeResponse {
        success: true,
        data: AnalyzeData { session_id, analysis },
        file_size_mb: (file_size as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0,
    }))
}

/// Pulls the `file` field, checking the extension before reading and the size
/// while reading, so an oversized upload is refused without being decoded.
async fn read_upload(multipart: &mut Multipart, analyzer: &WorkbookAnalyzer) -> Result<(String, Bytes), AppError> {
    while let Some(mut field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| AppError::InvalidInput("the file field has no file name".to_string()))?;
        analyzer.validate(&file_name, 0)?;

        let mut buffer = BytesMut::new();
        while let Some(chunk) = field.chunk().await? {
            buffer.extend_from_slice(&chunk);
            analyzer.validate(&file_name, buffer.len())?;
        }
        return Ok((file_name, buffer.freeze()));
    }

    Err(AppError::InvalidInput("multipart field 'file' is required".to_string()))
}

#[derive(Debug, Deserialize)]
pub struct PreviewQuery {
    session_id: Uuid,
    sheet_name: Option<String>,
}

async fn preview_excel(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PreviewQuery>,
) -> Result<Json<ApiResponse<PreviewData>>, AppError> {
    let session = state.sessions.get(query.session_id)?;
    let snapshot = CatalogSnapshot::new(state.catalog.entries()?);

    let mut session = session.lock();
    let store = session.select_sheet(query.sheet_name.as_deref(), snapshot)?;
    Ok(ApiResponse::ok(PreviewData::from_store(store)))
}
