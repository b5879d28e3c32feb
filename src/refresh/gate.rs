use super::policy::{decide_when_idle, should_refresh, IdleDecision};
use crate::api::{endpoints, ApiRequest, ApiResponse, Transport};
use crate::error::ClientError;
use crate::state::{CredentialManager, LogoutReason};
use crate::types::TokenResponse;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

type Waiter = oneshot::Sender<Option<String>>;

enum GateState {
    Idle,
    /// Waiters are released in arrival order.
    Refreshing { waiters: Vec<Waiter> },
}

/// Attaches the bearer token to outgoing requests and runs at most one
/// token refresh at a time, parking every other 401 behind it.
#[derive(Clone)]
pub struct AuthRefreshGate {
    transport: Arc<dyn Transport>,
    credentials: CredentialManager,
    state: Arc<Mutex<GateState>>,
    refreshes: Arc<AtomicU64>,
}

impl AuthRefreshGate {
    pub fn new(transport: Arc<dyn Transport>, credentials: CredentialManager) -> Self {
        Self {
            transport,
            credentials,
            state: Arc::new(Mutex::new(GateState::Idle)),
            refreshes: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn credentials(&self) -> &CredentialManager {
        &self.credentials
    }

    /// Requests currently parked behind a running refresh.
    pub async fn queued_requests(&self) -> usize {
        match &*self.state.lock().await {
            GateState::Idle => 0,
            GateState::Refreshing { waiters } => waiters.len(),
        }
    }

    /// Number of refresh calls issued so far.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::SeqCst)
    }

    /// Sends with an explicit token, outside the refresh protocol. Used
    /// while a login is still being assembled.
    pub async fn send_with_token(
        &self,
        request: &ApiRequest,
        token: &str,
    ) -> Result<ApiResponse, ClientError> {
        self.transport.send(request, Some(token)).await
    }

    pub async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, ClientError> {
        if request.is_anonymous() {
            return self.transport.send(request, None).await;
        }

        let token = self.credentials.access_token().await;
        let response = self.transport.send(request, token.as_deref()).await?;
        if !should_refresh(request, &response) {
            return Ok(response);
        }
        let Some(used) = token else {
            return Err(ClientError::NotAuthenticated);
        };

        let fresh = self.fresh_token(&used).await?;
        debug!(path = %request.path, "replaying request with refreshed token");
        // A second 401 is not refreshed again; callers see it as Unauthorized.
        self.transport.send(request, Some(&fresh)).await
    }

    pub async fn execute_ok(&self, request: &ApiRequest) -> Result<ApiResponse, ClientError> {
        self.execute(request).await?.ensure_success()
    }

    pub async fn execute_json<T: DeserializeOwned>(
        &self,
        request: &ApiRequest,
    ) -> Result<T, ClientError> {
        self.execute_ok(request).await?.json()
    }

    async fn fresh_token(&self, used: &str) -> Result<String, ClientError> {
        let waiter = {
            let mut state = self.state.lock().await;
            match &mut *state {
                GateState::Refreshing { waiters } => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    debug!(queued = waiters.len(), "request queued behind token refresh");
                    Some(rx)
                }
                GateState::Idle => {
                    let current = self.credentials.access_token().await;
                    match decide_when_idle(current.as_deref(), used) {
                        IdleDecision::ReplayWith(token) => return Ok(token),
                        IdleDecision::LoggedOut => return Err(ClientError::SessionExpired),
                        IdleDecision::StartRefresh => {
                            *state = GateState::Refreshing { waiters: vec![] };
                            None
                        }
                    }
                }
            }
        };

        match waiter {
            Some(rx) => match rx.await {
                Ok(Some(token)) => Ok(token),
                _ => Err(ClientError::SessionExpired),
            },
            None => self.run_refresh().await,
        }
    }

    async fn run_refresh(&self) -> Result<String, ClientError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        info!("access token rejected, refreshing");
        let result = self.refresh_once().await;

        if let Err(e) = &result {
            warn!("token refresh failed: {e}");
            // Cleared before going idle so late 401s see a logged-out gate.
            self.credentials.clear(LogoutReason::SessionExpired).await;
        }

        let waiters = {
            let mut state = self.state.lock().await;
            match std::mem::replace(&mut *state, GateState::Idle) {
                GateState::Refreshing { waiters } => waiters,
                GateState::Idle => vec![],
            }
        };

        match result {
            Ok(token) => {
                debug!(released = waiters.len(), "token refreshed");
                for waiter in waiters {
                    let _ = waiter.send(Some(token.clone()));
                }
                Ok(token)
            }
            Err(_) => {
                for waiter in waiters {
                    let _ = waiter.send(None);
                }
                Err(ClientError::SessionExpired)
            }
        }
    }

    async fn refresh_once(&self) -> Result<String, ClientError> {
        let Some(refresh_token) = self.credentials.refresh_token().await else {
            return Err(ClientError::SessionExpired);
        };
        let request = endpoints::refresh(&refresh_token)?;
        let tokens: TokenResponse = self
            .transport
            .send(&request, None)
            .await?
            .ensure_success()?
            .json()?;
        let access = tokens.access_token.clone();
        self.credentials.replace_credential(tokens.into()).await?;
        Ok(access)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SessionEvent;
    use crate::testing::{FakeBackend, TestSession};
    use tokio::sync::Notify;

    async fn wait_for_queue(gate: &AuthRefreshGate, expected: usize) {
        while gate.queued_requests().await < expected {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn attaches_current_token() {
        let t = TestSession::logged_in().await;
        let res = t.gate.execute_ok(&endpoints::list_threads()).await.unwrap();
        assert!(res.is_success());
        let calls = t.backend.calls();
        assert_eq!(calls.last().unwrap().bearer.as_deref(), Some(FakeBackend::INITIAL_ACCESS));
        assert_eq!(t.gate.refresh_count(), 0);
    }

    #[tokio::test]
    async fn concurrent_401s_trigger_a_single_refresh() {
        let t = TestSession::logged_in().await;
        let release = Arc::new(Notify::new());
        t.backend.hold_refresh(release.clone());
        t.backend.expire_access_token();

        let (threads, me) = (endpoints::list_threads(), endpoints::me());
        let first = t.gate.execute_ok(&threads);
        let second = t.gate.execute_ok(&me);
        let releaser = async {
            wait_for_queue(&t.gate, 1).await;
            release.notify_one();
        };
        let (first, second, ()) = tokio::join!(first, second, releaser);

        assert!(first.is_ok());
        assert!(second.is_ok());
        assert_eq!(t.gate.refresh_count(), 1);
        assert_eq!(t.backend.refresh_calls(), 1);

        let fresh = t.gate.credentials().access_token().await.unwrap();
        assert_ne!(fresh, FakeBackend::INITIAL_ACCESS);
        let replays: Vec<_> = t
            .backend
            .calls()
            .into_iter()
            .filter(|c| c.path != endpoints::REFRESH && c.bearer.as_deref() == Some(fresh.as_str()))
            .collect();
        assert_eq!(replays.len(), 2);
        assert_eq!(t.gate.queued_requests().await, 0);
    }

    #[tokio::test]
    async fn refresh_failure_logs_out_and_fails_queued_requests() {
        let t = TestSession::logged_in().await;
        let mut events = t.gate.credentials().subscribe();
        let release = Arc::new(Notify::new());
        t.backend.hold_refresh(release.clone());
        t.backend.expire_access_token();
        t.backend.revoke_refresh_token();

        let (a, b) = (endpoints::list_threads(), endpoints::list_threads());
        let first = t.gate.execute_ok(&a);
        let second = t.gate.execute_ok(&b);
        let releaser = async {
            wait_for_queue(&t.gate, 1).await;
            release.notify_one();
        };
        let (first, second, ()) = tokio::join!(first, second, releaser);

        assert!(matches!(first, Err(ClientError::SessionExpired)));
        assert!(matches!(second, Err(ClientError::SessionExpired)));
        assert_eq!(t.backend.refresh_calls(), 1);
        assert!(!t.gate.credentials().is_logged_in().await);
        assert!(t.storage.is_empty());
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::LoggedOut {
                reason: LogoutReason::SessionExpired
            }
        );
    }

    #[tokio::test]
    async fn anonymous_requests_are_never_refreshed() {
        let t = TestSession::logged_in().await;
        let res = t
            .gate
            .execute(&endpoints::login("ana@broker.pe", "wrong"))
            .await
            .unwrap();
        assert_eq!(res.status, 401);
        assert_eq!(t.backend.refresh_calls(), 0);
        assert_eq!(t.backend.calls().last().unwrap().bearer, None);
    }

    #[tokio::test]
    async fn missing_refresh_token_expires_session() {
        let t = TestSession::logged_in_without_refresh_token().await;
        t.backend.expire_access_token();
        let err = t.gate.execute_ok(&endpoints::list_threads()).await.unwrap_err();
        assert!(matches!(err, ClientError::SessionExpired));
        assert_eq!(t.backend.refresh_calls(), 0);
        assert!(!t.gate.credentials().is_logged_in().await);
    }

    #[tokio::test]
    async fn replayed_401_is_not_refreshed_twice() {
        let t = TestSession::logged_in().await;
        t.backend.expire_access_token();
        t.backend.reject_all_tokens();
        let err = t.gate.execute_ok(&endpoints::list_threads()).await.unwrap_err();
        assert!(matches!(err, ClientError::Unauthorized));
        assert_eq!(t.backend.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn stale_401_after_refresh_replays_without_new_refresh() {
        let t = TestSession::logged_in().await;
        // Simulate a refresh that already completed after this request went out.
        t.backend.expire_access_token();
        let rotated = t.backend.issue_access_token();
        t.gate
            .credentials()
            .replace_credential(crate::types::Credential::new(rotated.clone(), None))
            .await
            .unwrap();

        let fresh = t.gate.fresh_token(FakeBackend::INITIAL_ACCESS).await.unwrap();
        assert_eq!(fresh, rotated);
        assert_eq!(t.gate.refresh_count(), 0);
    }
}
