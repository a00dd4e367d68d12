use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration could not be loaded.
    #[error("Configuration error: {message}")]
    Config {
        /// What was wrong.
        message: String,
    },

    /// Storage failure.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Language model backend failure.
    #[error("Langbase error: {0}")]
    Langbase(#[from] LangbaseError),

    /// Session lifecycle failure.
    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    /// Anything else.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Opening the database failed.
    #[error("Database connection failed: {message}")]
    Connection {
        /// Underlying error text.
        message: String,
    },

    /// A query failed or returned malformed rows.
    #[error("Query failed: {message}")]
    Query {
        /// Underlying error text.
        message: String,
    },

    /// No stored session with this id.
    #[error("Session not found: {session_id}")]
    SessionNotFound {
        /// The requested id.
        session_id: String,
    },

    /// Schema migration failed.
    #[error("Migration failed: {message}")]
    Migration {
        /// Underlying error text.
        message: String,
    },

    /// Raw driver error.
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Langbase API errors
#[derive(Debug, Error)]
pub enum LangbaseError {
    /// Retries or the call budget ran out.
    #[error("Langbase unavailable: {message} (retries: {retries})")]
    Unavailable {
        /// The last failure seen.
        message: String,
        /// Attempts made before giving up.
        retries: u32,
    },

    /// Non-success HTTP status.
    #[error("API error: {status} - {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body.
        message: String,
    },

    /// The body could not be decoded or reported failure.
    #[error("Invalid response: {message}")]
    InvalidResponse {
        /// What was wrong with it.
        message: String,
    },

    /// A single request exceeded its timeout.
    #[error("Request timeout after {timeout_ms}ms")]
    Timeout {
        /// Timeout applied to the request.
        timeout_ms: u64,
    },

    /// Transport-level failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl LangbaseError {
    /// Whether repeating the same request could succeed.
    ///
    /// Client-side rejections (4xx other than 408/429) are final.
    pub fn is_retryable(&self) -> bool {
        match self {
            LangbaseError::Api { status, .. } => {
                !(400..500).contains(status) || *status == 408 || *status == 429
            }
            _ => true,
        }
    }
}

/// Errors raised while a single stage processor runs.
#[derive(Debug, Error)]
pub enum StageError {
    /// The model call failed.
    #[error("LLM generation failed: {0}")]
    Model(#[from] LangbaseError),

    /// The model reply held no usable JSON.
    #[error("Failed to parse {stage} response: {message}")]
    Parse {
        /// Display name of the stage.
        stage: String,
        /// Decoder error.
        message: String,
    },

    /// A required earlier result is missing.
    #[error("Missing input for {stage}: {message}")]
    MissingInput {
        /// Display name of the stage.
        stage: String,
        /// What was missing.
        message: String,
    },

    /// The stage overran its timeout.
    #[error("Stage timed out after {timeout_ms}ms")]
    Timeout {
        /// The per-stage timeout.
        timeout_ms: u64,
    },
}

/// Session lifecycle errors surfaced by the analysis controller
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// No registered session with this id.
    #[error("Session not found: {session_id}")]
    SessionNotFound {
        /// The requested id.
        session_id: String,
    },

    /// The session config was rejected before starting.
    #[error("Invalid analysis configuration: {message}")]
    InvalidConfig {
        /// Which setting was out of range.
        message: String,
    },

    /// A stage failed and ended the session.
    #[error("Stage {stage} failed: {source}")]
    StageFailed {
        /// 1-based stage number.
        stage: usize,
        /// Why the stage failed.
        #[source]
        source: StageError,
    },

    /// The session did not finish within the wait.
    #[error("Timed out waiting for session {session_id}")]
    WaitTimeout {
        /// The awaited session.
        session_id: String,
    },
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for Langbase operations
pub type LangbaseResult<T> = Result<T, LangbaseError>;

/// Result type alias for stage processing
pub type StageResult<T> = Result<T, StageError>;

/// Result type alias for controller operations
pub type AnalysisResult<T> = Result<T, AnalysisError>;

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
        let err = StorageError::SessionNotFound {
            session_id: "sess-123".to_string(),
        };
        assert_eq!(err.to_string(), "Session not found: sess-123");

        let err = StorageError::Migration {
            message: "version mismatch".to_string(),
        };
        assert_eq!(err.to_string(), "Migration failed: version mismatch");
    }

    #[test]
    fn test_langbase_error_display() {
        let err = LangbaseError::Unavailable {
            message: "server down".to_string(),
            retries: 3,
        };
        assert_eq!(err.to_string(), "Langbase unavailable: server down (retries: 3)");

        let err = LangbaseError::Api {
            status: 401,
            message: "unauthorized".to_string(),
        };
        assert_eq!(err.to_string(), "API error: 401 - unauthorized");

        let err = LangbaseError::Timeout { timeout_ms: 5000 };
        assert_eq!(err.to_string(), "Request timeout after 5000ms");
    }

    #[test]
    fn test_langbase_error_retryable() {
        let bad_request = LangbaseError::Api {
            status: 400,
            message: "bad".to_string(),
        };
        assert!(!bad_request.is_retryable());

        let rate_limited = LangbaseError::Api {
            status: 429,
            message: "slow down".to_string(),
        };
        assert!(rate_limited.is_retryable());

        let server = LangbaseError::Api {
            status: 503,
            message: "down".to_string(),
        };
        assert!(server.is_retryable());
        assert!(LangbaseError::Timeout { timeout_ms: 10 }.is_retryable());
    }

    #[test]
    fn test_stage_error_display() {
        let err = StageError::Parse {
            stage: "Deep Analysis".to_string(),
            message: "expected value".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to parse Deep Analysis response: expected value"
        );

        let err = StageError::Timeout { timeout_ms: 250 };
        assert_eq!(err.to_string(), "Stage timed out after 250ms");

        let err: StageError = LangbaseError::InvalidResponse {
            message: "empty".to_string(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "LLM generation failed: Invalid response: empty"
        );
    }

    #[test]
    fn test_stage_failed_names_stage_number() {
        let err = AnalysisError::StageFailed {
            stage: 2,
            source: StageError::Timeout { timeout_ms: 100 },
        };
        assert_eq!(err.to_string(), "Stage 2 failed: Stage timed out after 100ms");
    }

    #[test]
    fn test_analysis_error_conversion_to_app_error() {
        let err = AnalysisError::SessionNotFound {
            session_id: "abc".to_string(),
        };
        let app_err: AppError = err.into();
        assert!(matches!(app_err, AppError::Analysis(_)));
        assert!(app_err.to_string().contains("Session not found: abc"));
    }

    #[test]
    fn test_storage_error_conversion_to_app_error() {
        let storage_err = StorageError::SessionNotFound {
            session_id: "test-123".to_string(),
        };
        let app_err: AppError = storage_err.into();
        assert!(matches!(app_err, AppError::Storage(_)));
    }

    #[test]
    fn test_langbase_error_conversion_to_app_error() {
        let langbase_err = LangbaseError::Timeout { timeout_ms: 1000 };
        let app_err: AppError = langbase_err.into();
        assert!(matches!(app_err, AppError::Langbase(_)));
    }
}
