//! Client SDK for the insurance brokerage copilot: session state, chat
//! threads and quotes over the backend REST API, with transparent access
//! token refresh.

pub mod api;
mod app;
pub mod config;
pub mod error;
mod quotes;
mod redact;
mod refresh;
pub mod state;
pub mod storage;
pub mod types;

#[cfg(test)]
mod testing;

pub use app::Copilot;
pub use config::ClientConfig;
pub use error::{ClientError, ErrorCode, ErrorPayload, StorageError};
pub use quotes::QuoteService;
pub use refresh::AuthRefreshGate;
pub use state::{
    CredentialManager, KeyringStore, LogoutReason, SessionEvent, SessionStore, CHAT_ERROR_NOTICE,
};
pub use types::*;
