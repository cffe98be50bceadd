use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    StateConflict(&'static str),

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("storage unavailable")]
    StorageUnavailable,

    #[error("internal server error")]
    Internal,
}

impl From<tokio_postgres::Error> for AppError {
    fn from(e: tokio_postgres::Error) -> Self {
        AppError::Storage(e.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for AppError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        AppError::Storage(e.to_string())
    }
}

impl AppError {
    /// Returns HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::InvalidInput(_) => 400,
            AppError::NotFound(_) => 404,
            AppError::StateConflict(_) => 409,
            AppError::StorageUnavailable => 503,
            _ => 500,
        }
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let status = StatusCode::from_u16(self.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        HttpResponse::build(status).json(serde_json::json!({
            "success": false,
            "error": self.to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::InvalidInput("bad".into()).status_code(), 400);
        assert_eq!(AppError::NotFound("conversation").status_code(), 404);
        assert_eq!(AppError::StateConflict("conversation is closed").status_code(), 409);
        assert_eq!(AppError::StorageUnavailable.status_code(), 503);
        assert_eq!(AppError::Storage("boom".into()).status_code(), 500);
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            AppError::NotFound("conversation").to_string(),
            "conversation not found"
        );
        assert_eq!(AppError::StorageUnavailable.to_string(), "storage unavailable");
    }
}
