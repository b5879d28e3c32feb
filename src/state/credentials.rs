use crate::error::{ClientError, StorageError};
use crate::storage::{KeyValueStore, KEY_ACCESS_TOKEN, KEY_REFRESH_TOKEN, KEY_USER};
use crate::types::{AuthenticatedUser, Credential};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutReason {
    UserRequested,
    SessionExpired,
}

/// Navigation-level notifications. `LoggedOut` means the UI should show the
/// login surface.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    LoggedIn(AuthenticatedUser),
    LoggedOut { reason: LogoutReason },
}

#[derive(Default)]
struct Session {
    credential: Option<Credential>,
    user: Option<AuthenticatedUser>,
}

/// Owns the credential and the authenticated user, in memory and in
/// durable storage. Written only by login, refresh and logout.
#[derive(Clone)]
pub struct CredentialManager {
    secrets: Arc<dyn KeyValueStore>,
    profile: Arc<dyn KeyValueStore>,
    session: Arc<RwLock<Session>>,
    events: broadcast::Sender<SessionEvent>,
}

impl CredentialManager {
    pub fn new(secrets: Arc<dyn KeyValueStore>, profile: Arc<dyn KeyValueStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            secrets,
            profile,
            session: Arc::new(RwLock::new(Session::default())),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Loads the persisted session into memory. Returns the credential when
    /// one was found; the user may still be missing.
    pub async fn restore(&self) -> Option<Credential> {
        let access = match self.secrets.get(KEY_ACCESS_TOKEN) {
            Ok(Some(t)) => t,
            Ok(None) => return None,
            Err(e) => {
                warn!("cannot read persisted token: {e}");
                return None;
            }
        };
        let refresh = self.secrets.get(KEY_REFRESH_TOKEN).ok().flatten();
        let user = self
            .profile
            .get(KEY_USER)
            .ok()
            .flatten()
            .and_then(|raw| serde_json::from_str::<AuthenticatedUser>(&raw).ok());

        let credential = Credential::new(access, refresh);
        let mut guard = self.session.write().await;
        guard.credential = Some(credential.clone());
        guard.user = user;
        debug!(has_user = guard.user.is_some(), "restored persisted session");
        Some(credential)
    }

    pub async fn access_token(&self) -> Option<String> {
        self.session
            .read()
            .await
            .credential
            .as_ref()
            .map(|c| c.access_token.clone())
    }

    pub async fn refresh_token(&self) -> Option<String> {
        self.session
            .read()
            .await
            .credential
            .as_ref()
            .and_then(|c| c.refresh_token.clone())
    }

    pub async fn user(&self) -> Option<AuthenticatedUser> {
        self.session.read().await.user.clone()
    }

    pub async fn is_logged_in(&self) -> bool {
        self.session.read().await.credential.is_some()
    }

    fn persist_credential(&self, credential: &Credential) -> Result<(), StorageError> {
        self.secrets.set(KEY_ACCESS_TOKEN, &credential.access_token)?;
        match &credential.refresh_token {
            Some(refresh) => self.secrets.set(KEY_REFRESH_TOKEN, refresh),
            None => self.secrets.remove(KEY_REFRESH_TOKEN),
        }
    }

    fn persist_user(&self, user: &AuthenticatedUser) -> Result<(), StorageError> {
        let raw = serde_json::to_string(user)?;
        self.profile.set(KEY_USER, &raw)
    }

    /// Installs a fresh login. Persistence failures leave a working
    /// in-memory session.
    pub async fn establish(&self, credential: Credential, user: AuthenticatedUser) {
        if let Err(e) = self.persist_credential(&credential) {
            warn!("session token not persisted: {e}");
        }
        if let Err(e) = self.persist_user(&user) {
            warn!("session user not persisted: {e}");
        }
        {
            let mut guard = self.session.write().await;
            guard.credential = Some(credential);
            guard.user = Some(user.clone());
        }
        info!(user_id = %user.id, "logged in");
        self.emit(SessionEvent::LoggedIn(user));
    }

    pub async fn set_user(&self, user: AuthenticatedUser) {
        if let Err(e) = self.persist_user(&user) {
            warn!("session user not persisted: {e}");
        }
        self.session.write().await.user = Some(user);
    }

    /// Replaces the token pair after a refresh. A missing refresh token in
    /// the new pair keeps the previous one.
    pub async fn replace_credential(&self, mut credential: Credential) -> Result<(), ClientError> {
        let mut guard = self.session.write().await;
        if guard.credential.is_none() {
            return Err(ClientError::SessionExpired);
        }
        if credential.refresh_token.is_none() {
            credential.refresh_token = guard
                .credential
                .as_ref()
                .and_then(|c| c.refresh_token.clone());
        }
        if let Err(e) = self.persist_credential(&credential) {
            warn!("refreshed token not persisted: {e}");
        }
        guard.credential = Some(credential);
        Ok(())
    }

    /// Drops the in-memory and persisted session.
    pub async fn clear(&self, reason: LogoutReason) {
        {
            let mut guard = self.session.write().await;
            guard.credential = None;
            guard.user = None;
        }
        for (store, key) in [
            (&self.secrets, KEY_ACCESS_TOKEN),
            (&self.secrets, KEY_REFRESH_TOKEN),
            (&self.profile, KEY_USER),
        ] {
            if let Err(e) = store.remove(key) {
                warn!("failed to clear persisted {key}: {e}");
            }
        }
        info!(?reason, "logged out");
        self.emit(SessionEvent::LoggedOut { reason });
    }
}
