use crate::api::{HttpTransport, Transport};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::quotes::QuoteService;
use crate::refresh::AuthRefreshGate;
use crate::state::{CredentialManager, KeyringStore, SessionStore};
use crate::storage::{FileStore, KeyValueStore};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// The assembled client: one credential manager and one refresh gate
/// shared by the session store and the quote service.
pub struct Copilot {
    pub session: SessionStore,
    pub quotes: QuoteService,
    follower: Option<JoinHandle<()>>,
}

impl Copilot {
    pub fn build(config: &ClientConfig) -> Result<Self, ClientError> {
        let transport = HttpTransport::new(config.clone())?;
        let profile: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(&config.profile_path));
        let secrets = secret_store(config, profile.clone());
        info!(base_url = %config.base_url, "copilot client configured");
        Ok(Self::with_transport(Arc::new(transport), secrets, profile))
    }

    pub fn with_transport(
        transport: Arc<dyn Transport>,
        secrets: Arc<dyn KeyValueStore>,
        profile: Arc<dyn KeyValueStore>,
    ) -> Self {
        let credentials = CredentialManager::new(secrets, profile);
        let gate = AuthRefreshGate::new(transport, credentials);
        Self {
            session: SessionStore::new(gate.clone()),
            quotes: QuoteService::new(gate),
            follower: None,
        }
    }

    /// Restores the persisted session and starts following session events.
    /// Must run inside a tokio runtime.
    pub async fn start(&mut self) -> Result<(), ClientError> {
        if self.follower.is_none() {
            self.follower = Some(self.session.follow_events());
        }
        if let Some(user) = self.session.restore().await? {
            info!(user_id = %user.id, "resuming session");
            self.session.load_threads().await?;
        }
        Ok(())
    }
}

impl Drop for Copilot {
    fn drop(&mut self) {
        if let Some(follower) = self.follower.take() {
            follower.abort();
        }
    }
}

fn secret_store(config: &ClientConfig, fallback: Arc<dyn KeyValueStore>) -> Arc<dyn KeyValueStore> {
    if !config.use_keyring {
        return fallback;
    }
    let keyring = KeyringStore::new(&config.keyring_service);
    if keyring.is_available() {
        Arc::new(keyring)
    } else {
        warn!("OS keyring unavailable, storing tokens in the session file");
        fallback
    }
}
