use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Image fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Vision model error: {0}")]
    Vision(#[from] VisionError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Item not found: {item_id}")]
    ItemNotFound { item_id: i64 },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Image download errors. Transient by design: every variant except
/// `Exhausted` is retried before it surfaces.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Download failed for {url}: HTTP {status}")]
    BadStatus { url: String, status: u16 },

    #[error("Download failed after {attempts} attempts for {url}: {message}")]
    Exhausted {
        url: String,
        attempts: u32,
        message: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Vision model invocation errors. Never retried: a repeated model call has
/// nondeterministic cost, so the item fails instead.
#[derive(Debug, Error)]
pub enum VisionError {
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Empty reply from model {model}")]
    EmptyReply { model: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for image fetches
pub type FetchResult<T> = Result<T, FetchError>;

/// Result type alias for vision model calls
pub type VisionResult<T> = Result<T, VisionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_display() {
        let err = AppError::Config {
            message: "missing key".to_string(),
        };
        assert_eq!(err.to_string(), "Configuration error: missing key");

        let err = AppError::Internal {
            message: "unexpected".to_string(),
        };
        assert_eq!(err.to_string(), "Internal error: unexpected");
    }

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::Connection {
            message: "failed to connect".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Database connection failed: failed to connect"
        );

        let err = StorageError::ItemNotFound { item_id: 42 };
        assert_eq!(err.to_string(), "Item not found: 42");

        let err = StorageError::Query {
            message: "syntax error".to_string(),
        };
        assert_eq!(err.to_string(), "Query failed: syntax error");

        let err = StorageError::Migration {
            message: "version mismatch".to_string(),
        };
        assert_eq!(err.to_string(), "Migration failed: version mismatch");
    }

    #[test]
    fn test_fetch_error_display() {
        let err = FetchError::BadStatus {
            url: "https://cdn.example.com/img.jpg".to_string(),
            status: 503,
        };
        assert_eq!(
            err.to_string(),
            "Download failed for https://cdn.example.com/img.jpg: HTTP 503"
        );

        let err = FetchError::Exhausted {
            url: "https://cdn.example.com/img.jpg".to_string(),
            attempts: 3,
            message: "connection reset".to_string(),
        };
        assert!(err.to_string().contains("after 3 attempts"));
    }

    #[test]
    fn test_vision_error_display() {
        let err = VisionError::Api {
            status: 401,
            message: "unauthorized".to_string(),
        };
        assert_eq!(err.to_string(), "API error: 401 - unauthorized");

        let err = VisionError::Timeout { timeout_ms: 120000 };
        assert_eq!(err.to_string(), "Request timeout after 120000ms");

        let err = VisionError::EmptyReply {
            model: "gpt-4o".to_string(),
        };
        assert_eq!(err.to_string(), "Empty reply from model gpt-4o");
    }

    #[test]
    fn test_storage_error_conversion_to_app_error() {
        let storage_err = StorageError::ItemNotFound { item_id: 7 };
        let app_err: AppError = storage_err.into();
        assert!(matches!(app_err, AppError::Storage(_)));
    }

    #[test]
    fn test_vision_error_conversion_to_app_error() {
        let vision_err = VisionError::Timeout { timeout_ms: 1000 };
        let app_err: AppError = vision_err.into();
        assert!(matches!(app_err, AppError::Vision(_)));
    }

    #[test]
    fn test_fetch_error_conversion_to_app_error() {
        let fetch_err = FetchError::Exhausted {
            url: "u".to_string(),
            attempts: 3,
            message: "m".to_string(),
        };
        let app_err: AppError = fetch_err.into();
        assert!(matches!(app_err, AppError::Fetch(_)));
    }
}
