use super::threads;
use super::{CredentialManager, LogoutReason, SessionEvent};
use crate::api::{endpoints, ApiRequest};
use crate::error::ClientError;
use crate::refresh::AuthRefreshGate;
use crate::types::{
    AuthenticatedUser, ChatResponse, Message, MessageRecord, MessageStatus, RegisterRequest,
    SessionSnapshot, Thread, ThreadRecord, TokenResponse, UserRecord, DEFAULT_THREAD_TITLE,
};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Assistant notice shown in place of a reply when the chat call fails.
pub const CHAT_ERROR_NOTICE: &str =
    "No pude procesar tu mensaje en este momento. Por favor, intenta nuevamente.";

/// Who is logged in and which conversation is active. Every mutation is
/// published on a `watch` channel; clones share the same state.
#[derive(Clone)]
pub struct SessionStore {
    gate: AuthRefreshGate,
    state: Arc<watch::Sender<SessionSnapshot>>,
}

impl SessionStore {
    pub fn new(gate: AuthRefreshGate) -> Self {
        let (state, _) = watch::channel(SessionSnapshot::default());
        Self {
            gate,
            state: Arc::new(state),
        }
    }

    pub fn gate(&self) -> &AuthRefreshGate {
        &self.gate
    }

    fn credentials(&self) -> &CredentialManager {
        self.gate.credentials()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.credentials().subscribe()
    }

    pub async fn current_user(&self) -> Option<AuthenticatedUser> {
        self.credentials().user().await
    }

    pub async fn is_logged_in(&self) -> bool {
        self.credentials().is_logged_in().await
    }

    fn reset(&self) {
        self.state.send_replace(SessionSnapshot::default());
    }

    fn publish_user(&self, user: AuthenticatedUser) {
        self.state.send_replace(SessionSnapshot {
            user: Some(user),
            ..SessionSnapshot::default()
        });
    }

    /// Clears published state whenever the session ends outside this store,
    /// e.g. a failed refresh triggered by another service.
    pub fn follow_events(&self) -> JoinHandle<()> {
        let state = self.state.clone();
        let credentials = self.credentials().clone();
        let mut events = self.events();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SessionEvent::LoggedOut { reason }) => {
                        // A new login may already be in place.
                        if !credentials.is_logged_in().await {
                            debug!(?reason, "session ended, clearing published state");
                            state.send_replace(SessionSnapshot::default());
                        }
                    }
                    Ok(SessionEvent::LoggedIn(_)) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "session events lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    fn note_failure(&self, error: &ClientError) {
        if matches!(
            error,
            ClientError::SessionExpired | ClientError::NotAuthenticated
        ) {
            self.reset();
        }
    }

    async fn call<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T, ClientError> {
        let result = self.gate.execute_json(request).await;
        if let Err(e) = &result {
            self.note_failure(e);
        }
        result
    }

    async fn call_ok(&self, request: &ApiRequest) -> Result<(), ClientError> {
        match self.gate.execute_ok(request).await {
            Ok(_) => Ok(()),
            Err(e) => {
                self.note_failure(&e);
                Err(e)
            }
        }
    }

    /// Loads the persisted session. Returns `None` when there is nothing to
    /// restore or the stored session is no longer accepted.
    pub async fn restore(&self) -> Result<Option<AuthenticatedUser>, ClientError> {
        if self.credentials().restore().await.is_none() {
            self.reset();
            return Ok(None);
        }

        let user = match self.credentials().user().await {
            Some(user) => user,
            None => match self.gate.execute_json::<UserRecord>(&endpoints::me()).await {
                Ok(record) => {
                    let user = AuthenticatedUser::from(record);
                    self.credentials().set_user(user.clone()).await;
                    user
                }
                Err(e) if e.requires_login() => {
                    warn!("persisted session rejected: {e}");
                    if self.credentials().is_logged_in().await {
                        self.credentials().clear(LogoutReason::SessionExpired).await;
                    }
                    self.reset();
                    return Ok(None);
                }
                Err(e) => return Err(e),
            },
        };

        info!(user_id = %user.id, "session restored");
        self.publish_user(user.clone());
        Ok(Some(user))
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthenticatedUser, ClientError> {
        let response = self
            .gate
            .execute(&endpoints::login(email.trim(), password))
            .await?;
        if matches!(response.status, 400 | 401 | 403) {
            debug!(status = response.status, "login rejected");
            return Err(ClientError::InvalidCredentials);
        }
        let tokens: TokenResponse = response.ensure_success()?.json()?;

        let record: UserRecord = self
            .gate
            .send_with_token(&endpoints::me(), &tokens.access_token)
            .await?
            .ensure_success()?
            .json()?;
        let user = AuthenticatedUser::from(record);

        self.credentials().establish(tokens.into(), user.clone()).await;
        self.publish_user(user.clone());
        Ok(user)
    }

    /// Creates an account. The caller still has to log in.
    pub async fn register(&self, request: &RegisterRequest) -> Result<AuthenticatedUser, ClientError> {
        let record: UserRecord = self
            .gate
            .execute_json(&endpoints::register(request)?)
            .await?;
        info!(email = %record.email, "account registered");
        Ok(record.into())
    }

    pub async fn logout(&self) {
        self.credentials().clear(LogoutReason::UserRequested).await;
        self.reset();
    }

    /// Refreshes the thread list. When nothing valid is selected, the first
    /// thread becomes current and its messages are loaded.
    pub async fn load_threads(&self) -> Result<Vec<Thread>, ClientError> {
        let records: Vec<ThreadRecord> = self.call(&endpoints::list_threads()).await?;
        let incoming: Vec<Thread> = records.into_iter().map(Thread::from).collect();
        debug!(count = incoming.len(), "threads loaded");

        let mut to_load = None;
        self.state.send_modify(|s| {
            threads::merge_list(&mut s.threads, incoming);
            let selected = threads::reconcile_selection(&s.threads, s.current_thread_id.as_deref());
            if selected != s.current_thread_id {
                to_load = selected.clone();
            }
            s.current_thread_id = selected;
        });

        if let Some(id) = to_load {
            self.load_thread(&id).await?;
        }
        Ok(self.snapshot().threads)
    }

    pub async fn create_thread(&self, title: &str) -> Result<Thread, ClientError> {
        let title = match title.trim() {
            "" => DEFAULT_THREAD_TITLE,
            t => t,
        };
        let record: ThreadRecord = self.call(&endpoints::create_thread(title)?).await?;
        let mut thread = Thread::from(record);
        thread.messages_loaded = true;

        self.state.send_modify(|s| {
            s.threads.retain(|t| t.id != thread.id);
            s.threads.insert(0, thread.clone());
            s.current_thread_id = Some(thread.id.clone());
        });
        info!(thread_id = %thread.id, "thread created");
        Ok(thread)
    }

    /// Fetches a thread's history and makes it current.
    pub async fn load_thread(&self, id: &str) -> Result<Thread, ClientError> {
        if !threads::contains(&self.state.borrow().threads, id) {
            return Err(ClientError::ThreadNotFound(id.to_string()));
        }
        let records: Vec<MessageRecord> = self.call(&endpoints::thread_messages(id)).await?;
        let server: Vec<Message> = records.into_iter().map(Message::from).collect();

        let mut loaded = None;
        self.state.send_if_modified(|s| {
            let Some(thread) = threads::find_mut(&mut s.threads, id) else {
                return false;
            };
            let local = std::mem::take(&mut thread.messages);
            thread.messages = threads::merge_messages(local, server);
            thread.messages_loaded = true;
            loaded = Some(thread.clone());
            s.current_thread_id = Some(id.to_string());
            true
        });
        loaded.ok_or_else(|| ClientError::ThreadNotFound(id.to_string()))
    }

    /// Sends `text` to the assistant in the current thread, creating one
    /// first if needed. The user message is published as `Sending` before
    /// the backend is called. Returns the assistant reply.
    pub async fn send_message(&self, text: &str) -> Result<Message, ClientError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ClientError::EmptyMessage);
        }

        let current = self.state.borrow().current_thread_id.clone();
        let thread_id = match current {
            Some(id) => id,
            None => self.create_thread(DEFAULT_THREAD_TITLE).await?.id,
        };

        let outgoing = Message::outgoing(text);
        let message_id = outgoing.id.clone();
        self.state.send_if_modified(|s| match threads::find_mut(&mut s.threads, &thread_id) {
            Some(thread) => {
                thread.messages.push(outgoing);
                true
            }
            None => false,
        });

        let result = match endpoints::chat(text, Some(&thread_id)) {
            Ok(request) => self.call::<ChatResponse>(&request).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(reply) => {
                if reply.thread_id.as_deref().is_some_and(|id| id != thread_id) {
                    debug!(thread_id = %thread_id, "backend answered for a different thread");
                }
                let answer = Message::assistant_reply(&reply);
                self.settle(&thread_id, &message_id, MessageStatus::Sent, answer.clone());
                Ok(answer)
            }
            Err(e) => {
                warn!(thread_id = %thread_id, "chat request failed: {e}");
                let notice = Message::assistant_error(CHAT_ERROR_NOTICE);
                self.settle(&thread_id, &message_id, MessageStatus::Error, notice);
                Err(e)
            }
        }
    }

    fn settle(&self, thread_id: &str, message_id: &str, status: MessageStatus, follow_up: Message) {
        self.state.send_if_modified(|s| {
            let Some(thread) = threads::find_mut(&mut s.threads, thread_id) else {
                return false;
            };
            if let Some(message) = thread.messages.iter_mut().find(|m| m.id == message_id) {
                if let Err(e) = message.settle(status) {
                    warn!("{e}");
                }
            }
            if status == MessageStatus::Sent {
                thread.updated_at = follow_up.timestamp;
            }
            thread.messages.push(follow_up);
            true
        });
    }

    pub async fn delete_thread(&self, id: &str) -> Result<(), ClientError> {
        if !threads::contains(&self.state.borrow().threads, id) {
            return Err(ClientError::ThreadNotFound(id.to_string()));
        }
        match self.call_ok(&endpoints::delete_thread(id)).await {
            Ok(()) => {}
            Err(ClientError::Api { status: 404, .. }) => {
                debug!(thread_id = %id, "thread already gone on the backend");
            }
            Err(e) => return Err(e),
        }

        let mut fallback = None;
        self.state.send_modify(|s| {
            s.threads.retain(|t| t.id != id);
            if s.current_thread_id.as_deref() == Some(id) {
                s.current_thread_id = s.threads.first().map(|t| t.id.clone());
                fallback = s.current_thread_id.clone();
            }
        });
        info!(thread_id = %id, "thread deleted");

        if let Some(next) = fallback {
            self.load_thread(&next).await?;
        }
        Ok(())
    }

    pub async fn rename_thread(&self, id: &str, title: &str) -> Result<Thread, ClientError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(ClientError::EmptyTitle);
        }
        if !threads::contains(&self.state.borrow().threads, id) {
            return Err(ClientError::ThreadNotFound(id.to_string()));
        }
        let record: ThreadRecord = self.call(&endpoints::rename_thread(id, title)?).await?;

        let mut renamed = None;
        self.state.send_if_modified(|s| {
            let Some(thread) = threads::find_mut(&mut s.threads, id) else {
                return false;
            };
            thread.title = record.title;
            thread.updated_at = record.updated_at;
            renamed = Some(thread.clone());
            true
        });
        renamed.ok_or_else(|| ClientError::ThreadNotFound(id.to_string()))
    }
}
