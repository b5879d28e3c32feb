mod credentials;
mod secret_manager;
mod session_store;
mod threads;

pub use credentials::{CredentialManager, LogoutReason, SessionEvent};
pub use secret_manager::KeyringStore;
pub use session_store::{SessionStore, CHAT_ERROR_NOTICE};
