use serde_json::json;
use thiserror::Error;

/// Domain error shared by the data layer, the aggregation engine and the
/// reminder sweep. Handlers turn it into the wire error envelope.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadParams(String),

    #[error("{message}")]
    Validation {
        field: Option<&'static str>,
        message: String,
    },

    #[error("{message}")]
    Conflict {
        field: Option<&'static str>,
        message: String,
    },

    #[error("{0}")]
    Forbidden(String),

    #[error("select a workspace first")]
    NoWorkspace,

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn not_found(what: impl Into<String>) -> Self {
        AppError::NotFound(what.into())
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        AppError::BadParams(message.into())
    }

    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: Some(field),
            message: message.into(),
        }
    }

    pub fn conflict(field: &'static str, message: impl Into<String>) -> Self {
        AppError::Conflict {
            field: Some(field),
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        AppError::Forbidden(message.into())
    }

    /// Stable code carried in the `error.code` field of a response.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::BadParams(_) => "bad_params",
            AppError::Validation { .. } => "validation_failed",
            AppError::Conflict { .. } => "conflict",
            AppError::Forbidden(_) => "forbidden",
            AppError::NoWorkspace => "no_workspace",
            AppError::Db(_) => "db_error",
            AppError::Io(_) => "io_error",
            AppError::Config(_) => "config_invalid",
            AppError::Internal(_) => "internal",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            AppError::Validation {
                field: Some(field), ..
            }
            | AppError::Conflict {
                field: Some(field), ..
            } => Some(json!({ "field": field })),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::Internal(format!("{e:#}"))
    }
}
