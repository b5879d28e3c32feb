use crate::types::MessageStatus;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage holds invalid json")]
    Json(#[from] serde_json::Error),
    #[error("OS keychain/secret service is unavailable")]
    Keyring(#[from] keyring::Error),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("request was rejected as unauthorized")]
    Unauthorized,
    #[error("session expired, please log in again")]
    SessionExpired,
    #[error("not logged in")]
    NotAuthenticated,
    #[error("backend error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid json")]
    Decode(#[from] serde_json::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("thread {0} not found")]
    ThreadNotFound(String),
    #[error("no active thread")]
    NoActiveThread,
    #[error("message is empty")]
    EmptyMessage,
    #[error("thread title is empty")]
    EmptyTitle,
    #[error("message status cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        from: MessageStatus,
        to: MessageStatus,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidCredentials,
    SessionExpired,
    Unauthorized,
    Network,
    Backend,
    Storage,
    NotFound,
    Validation,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "invalid_credentials",
            Self::SessionExpired => "session_expired",
            Self::Unauthorized => "unauthorized",
            Self::Network => "network",
            Self::Backend => "backend",
            Self::Storage => "storage",
            Self::NotFound => "not_found",
            Self::Validation => "validation",
        }
    }
}

/// Error shape handed to UIs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

impl ClientError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidCredentials => ErrorCode::InvalidCredentials,
            Self::SessionExpired => ErrorCode::SessionExpired,
            Self::Unauthorized | Self::NotAuthenticated => ErrorCode::Unauthorized,
            Self::Network(_) => ErrorCode::Network,
            Self::Api { .. } | Self::Decode(_) => ErrorCode::Backend,
            Self::Storage(_) => ErrorCode::Storage,
            Self::ThreadNotFound(_) | Self::NoActiveThread => ErrorCode::NotFound,
            Self::EmptyMessage | Self::EmptyTitle | Self::InvalidTransition { .. } => {
                ErrorCode::Validation
            }
        }
    }

    /// Whether the session is gone and the UI should route to login.
    pub fn requires_login(&self) -> bool {
        matches!(
            self,
            Self::SessionExpired | Self::NotAuthenticated | Self::Unauthorized
        )
    }

    pub fn payload(&self) -> ErrorPayload {
        ErrorPayload {
            code: self.code().as_str().to_string(),
            message: crate::redact::redact_secrets(&self.to_string()).into_owned(),
        }
    }
}
