use axum::{
    response::{IntoResponse, Response},
    http::StatusCode,
};
use serde_json::json;
use axum::Json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Unsupported file format: {0}")]
    FormatError(String),
    #[error("File of {size} bytes exceeds the limit of {limit} bytes")]
    SizeLimitError { size: usize, limit: usize },
    #[error("Invalid sheet: {0}")]
    SchemaError(String),
    #[error("Row {temp_id}: {reason}")]
    RowCoercionError { temp_id: u32, reason: String },
    #[error("Row {temp_id}: catalog entry {existing_id} no longer exists")]
    DuplicateTargetMissingError { temp_id: u32, existing_id: i64 },
    #[error("Row {temp_id}: no catalog entry is named '{name}'")]
    DuplicateTargetUnmatchedError { temp_id: u32, name: String },
    #[error("Persistence error: {0}")]
    PersistenceError(String),
    #[error("A commit is already running for this session")]
    ConcurrentCommitError,
    #[error("Channel error: {0}")]
    ChannelError(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        AppError::PersistenceError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::ParseError(err.to_string())
    }
}

impl From<axum::extract::multipart::MultipartError> for AppError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        AppError::InvalidInput(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::FormatError(_)
            | AppError::SizeLimitError { .. }
            | AppError::SchemaError(_)
            | AppError::RowCoercionError { .. }
            | AppError::InvalidInput(_)
            | AppError::ParseError(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_)
            | AppError::DuplicateTargetMissingError { .. }
            | AppError::DuplicateTargetUnmatchedError { .. } => StatusCode::NOT_FOUND,
            AppError::ConcurrentCommitError => StatusCode::CONFLICT,
            AppError::ChannelError(_) => StatusCode::BAD_GATEWAY,
            AppError::PersistenceError(_) | AppError::IoError(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_limit_maps_to_bad_request() {
        let response = AppError::SizeLimitError { size: 20, limit: 10 }.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn concurrent_commit_maps_to_conflict() {
        let response = AppError::ConcurrentCommitError.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn row_messages_name_the_row() {
        let err = AppError::DuplicateTargetMissingError { temp_id: 4, existing_id: 9 };
        assert_eq!(err.to_string(), "Row 4: catalog entry 9 no longer exists");
    }
}
