//! In-process backend used by unit tests. Behaves like the FastAPI service
//! for the routes the client uses, with knobs for token expiry and failures.

use crate::api::{endpoints, ApiRequest, ApiResponse, Method, RequestBody, Transport};
use crate::error::ClientError;
use crate::refresh::AuthRefreshGate;
use crate::state::{CredentialManager, SessionStore};
use crate::storage::MemoryStore;
use async_trait::async_trait;
use chrono::{Duration, NaiveDateTime, Utc};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

pub(crate) const EMAIL: &str = "ana@broker.pe";
pub(crate) const PASSWORD: &str = "secret";

#[derive(Debug, Clone)]
pub(crate) struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub bearer: Option<String>,
    pub body: RequestBody,
}

struct FakeMessage {
    id: String,
    role: &'static str,
    content: String,
    metadata: Option<Value>,
    created_at: NaiveDateTime,
}

struct FakeThread {
    id: String,
    title: String,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
    messages: Vec<FakeMessage>,
}

struct BackendState {
    valid_access: HashSet<String>,
    valid_refresh: Option<String>,
    issued: u64,
    next_thread: u64,
    reject_all: bool,
    omit_refresh_token: bool,
    refresh_calls: usize,
    holds: Vec<(String, Arc<Notify>)>,
    fail_chat: bool,
    chat_table: Option<Value>,
    pdf_body: Vec<u8>,
    threads: Vec<FakeThread>,
    clock: NaiveDateTime,
    calls: Vec<RecordedCall>,
}

pub(crate) struct FakeBackend {
    state: Mutex<BackendState>,
}

fn stamp(at: NaiveDateTime) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

fn detail(status: u16, message: &str) -> ApiResponse {
    ApiResponse::json_body(status, &json!({ "detail": message }))
}

fn json_field(body: &RequestBody, key: &str) -> Option<String> {
    match body {
        RequestBody::Json(value) => value.get(key).and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

fn form_field(body: &RequestBody, key: &str) -> Option<String> {
    match body {
        RequestBody::Form(fields) => fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone()),
        _ => None,
    }
}

impl FakeThread {
    fn record(&self) -> Value {
        json!({
            "id": self.id,
            "title": self.title,
            "created_at": stamp(self.created_at),
            "updated_at": stamp(self.updated_at),
            "messages": self.messages.iter().map(FakeMessage::record).collect::<Vec<_>>(),
        })
    }
}

impl FakeMessage {
    fn record(&self) -> Value {
        json!({
            "id": self.id,
            "role": self.role,
            "content": self.content,
            "metadata_json": self.metadata,
            "created_at": stamp(self.created_at),
        })
    }
}

impl BackendState {
    fn tick(&mut self) -> NaiveDateTime {
        self.clock += Duration::seconds(1);
        self.clock
    }

    fn issue_access(&mut self) -> String {
        self.issued += 1;
        let token = format!("access-{}", self.issued);
        self.valid_access.insert(token.clone());
        token
    }

    fn token_pair(&mut self) -> Value {
        let access = self.issue_access();
        let refresh = if self.omit_refresh_token {
            None
        } else {
            let refresh = format!("refresh-{}", self.issued);
            self.valid_refresh = Some(refresh.clone());
            Some(refresh)
        };
        json!({
            "access_token": access,
            "refresh_token": refresh,
            "token_type": "bearer",
        })
    }

    fn authorized(&self, bearer: Option<&str>) -> bool {
        !self.reject_all && bearer.is_some_and(|b| self.valid_access.contains(b))
    }

    fn thread_mut(&mut self, id: &str) -> Option<&mut FakeThread> {
        self.threads.iter_mut().find(|t| t.id == id)
    }

    fn add_thread(&mut self, title: &str) -> &FakeThread {
        let now = self.tick();
        self.next_thread += 1;
        let id = format!("thread-{}", self.next_thread);
        self.threads.insert(
            0,
            FakeThread {
                id,
                title: title.to_string(),
                created_at: now,
                updated_at: now,
                messages: vec![],
            },
        );
        &self.threads[0]
    }

    fn push_message(&mut self, thread_id: &str, role: &'static str, content: &str, metadata: Option<Value>) {
        let now = self.tick();
        if let Some(thread) = self.thread_mut(thread_id) {
            let id = format!("{}-m{}", thread.id, thread.messages.len() + 1);
            thread.messages.push(FakeMessage {
                id,
                role,
                content: content.to_string(),
                metadata,
                created_at: now,
            });
            thread.updated_at = now;
        }
    }

    fn route(&mut self, request: &ApiRequest, bearer: Option<&str>) -> ApiResponse {
        match (request.method, request.path.as_str()) {
            (Method::Post, endpoints::TOKEN) => {
                let username = form_field(&request.body, "username");
                let password = form_field(&request.body, "password");
                if username.as_deref() == Some(EMAIL) && password.as_deref() == Some(PASSWORD) {
                    let pair = self.token_pair();
                    ApiResponse::json_body(200, &pair)
                } else {
                    detail(401, "Incorrect username or password")
                }
            }
            (Method::Post, endpoints::REFRESH) => {
                self.refresh_calls += 1;
                let presented = json_field(&request.body, "refresh_token");
                if presented.is_some() && presented == self.valid_refresh {
                    let pair = self.token_pair();
                    ApiResponse::json_body(200, &pair)
                } else {
                    detail(401, "Invalid refresh token")
                }
            }
            (Method::Post, endpoints::REGISTER) => {
                let email = json_field(&request.body, "email").unwrap_or_default();
                if email == EMAIL {
                    return detail(400, "Email already registered");
                }
                ApiResponse::json_body(
                    200,
                    &json!({
                        "id": 8,
                        "email": email,
                        "username": json_field(&request.body, "username"),
                        "role": json_field(&request.body, "role"),
                        "is_active": true,
                    }),
                )
            }
            _ if !self.authorized(bearer) => detail(401, "Could not validate credentials"),
            (Method::Get, endpoints::ME) => ApiResponse::json_body(
                200,
                &json!({
                    "id": 7,
                    "email": EMAIL,
                    "username": "Ana",
                    "role": "broker",
                    "is_active": true,
                }),
            ),
            (Method::Get, endpoints::THREADS) => {
                let list: Vec<Value> = self.threads.iter().map(FakeThread::record).collect();
                ApiResponse::json_body(200, &Value::Array(list))
            }
            (Method::Post, endpoints::THREADS) => {
                let title = json_field(&request.body, "title").unwrap_or_default();
                let record = self.add_thread(&title).record();
                ApiResponse::json_body(200, &record)
            }
            (Method::Post, endpoints::CHAT) => self.chat(&request.body),
            (Method::Post, endpoints::PDF_SLIP) => ApiResponse::new(200, self.pdf_body.clone()),
            (Method::Post, endpoints::QUOTE_CALCULATE) => ApiResponse::json_body(
                200,
                &json!([
                    {"insurer": "Rimac", "plan_name": "Auto Total", "price": 1250.5, "coverage_summary": "Todo riesgo"},
                    {"insurer": "Pacifico", "plan_name": "Auto Basico", "price": 890.0, "coverage_summary": "Responsabilidad civil"},
                ]),
            ),
            (method, path) => self.thread_route(method, path, &request.body),
        }
    }

    fn thread_route(&mut self, method: Method, path: &str, body: &RequestBody) -> ApiResponse {
        let Some(rest) = path.strip_prefix("/threads/") else {
            return detail(404, "Not Found");
        };
        let (id, messages) = match rest.strip_suffix("/messages") {
            Some(id) => (id.to_string(), true),
            None => (rest.to_string(), false),
        };
        let Some(index) = self.threads.iter().position(|t| t.id == id) else {
            return detail(404, "Thread not found");
        };
        match (method, messages) {
            (Method::Get, true) => {
                let list: Vec<Value> = self.threads[index]
                    .messages
                    .iter()
                    .map(FakeMessage::record)
                    .collect();
                ApiResponse::json_body(200, &Value::Array(list))
            }
            (Method::Put, false) => {
                let now = self.tick();
                let thread = &mut self.threads[index];
                thread.title = json_field(body, "title").unwrap_or_default();
                thread.updated_at = now;
                ApiResponse::json_body(200, &thread.record())
            }
            (Method::Delete, false) => {
                self.threads.remove(index);
                ApiResponse::json_body(200, &json!({ "status": "success" }))
            }
            _ => detail(405, "Method Not Allowed"),
        }
    }

    fn chat(&mut self, body: &RequestBody) -> ApiResponse {
        if self.fail_chat {
            return detail(500, "LLM unavailable");
        }
        let message = json_field(body, "message").unwrap_or_default();
        let thread_id = match json_field(body, "thread_id") {
            Some(id) if self.threads.iter().any(|t| t.id == id) => id,
            _ => self.add_thread(&message).id.clone(),
        };
        let answer = format!("Respuesta a: {message}");
        let table = self.chat_table.clone();
        self.push_message(&thread_id, "user", &message, None);
        self.push_message(&thread_id, "assistant", &answer, table.clone());
        ApiResponse::json_body(
            200,
            &json!({
                "answer": answer,
                "thread_id": thread_id,
                "sources": ["Agent Generated"],
                "data_table": table,
            }),
        )
    }
}

impl FakeBackend {
    pub const INITIAL_ACCESS: &'static str = "access-1";

    pub fn new() -> Self {
        let clock = NaiveDateTime::parse_from_str("2025-03-01T09:00:00", "%Y-%m-%dT%H:%M:%S")
            .unwrap_or_else(|_| Utc::now().naive_utc());
        Self {
            state: Mutex::new(BackendState {
                valid_access: HashSet::new(),
                valid_refresh: None,
                issued: 0,
                next_thread: 0,
                reject_all: false,
                omit_refresh_token: false,
                refresh_calls: 0,
                holds: vec![],
                fail_chat: false,
                chat_table: None,
                pdf_body: b"%PDF-1.4\n% slip\n".to_vec(),
                threads: vec![],
                clock,
                calls: vec![],
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state().calls.clone()
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.state().calls.iter().filter(|c| c.path == path).count()
    }

    pub fn refresh_calls(&self) -> usize {
        self.state().refresh_calls
    }

    /// The next request to `path` waits for `release` before answering.
    pub fn hold(&self, path: &str, release: Arc<Notify>) {
        self.state().holds.push((path.to_string(), release));
    }

    pub fn hold_refresh(&self, release: Arc<Notify>) {
        self.hold(endpoints::REFRESH, release);
    }

    pub fn expire_access_token(&self) {
        self.state().valid_access.clear();
    }

    pub fn revoke_refresh_token(&self) {
        self.state().valid_refresh = None;
    }

    pub fn reject_all_tokens(&self) {
        self.state().reject_all = true;
    }

    pub fn omit_refresh_token(&self) {
        self.state().omit_refresh_token = true;
    }

    pub fn issue_access_token(&self) -> String {
        self.state().issue_access()
    }

    pub fn fail_chat(&self, fail: bool) {
        self.state().fail_chat = fail;
    }

    pub fn answer_with_table(&self, table: Value) {
        self.state().chat_table = Some(table);
    }

    pub fn serve_pdf(&self, body: &[u8]) {
        self.state().pdf_body = body.to_vec();
    }

    /// Creates a thread server-side with the given messages, oldest first.
    pub fn seed_thread(&self, title: &str, messages: &[(&'static str, &str)]) -> String {
        let mut state = self.state();
        let id = state.add_thread(title).id.clone();
        for (role, content) in messages {
            state.push_message(&id, *role, content, None);
        }
        id
    }

    pub fn thread_titles(&self) -> Vec<String> {
        self.state().threads.iter().map(|t| t.title.clone()).collect()
    }
}

#[async_trait]
impl Transport for FakeBackend {
    async fn send(
        &self,
        request: &ApiRequest,
        bearer: Option<&str>,
    ) -> Result<ApiResponse, ClientError> {
        let hold = {
            let mut state = self.state();
            state.calls.push(RecordedCall {
                method: request.method,
                path: request.path.clone(),
                bearer: bearer.map(str::to_string),
                body: request.body.clone(),
            });
            state
                .holds
                .iter()
                .position(|(path, _)| *path == request.path)
                .map(|i| state.holds.remove(i).1)
        };
        if let Some(release) = hold {
            release.notified().await;
        }
        Ok(self.state().route(request, bearer))
    }
}

/// A client stack wired to a fresh `FakeBackend` over in-memory storage.
pub(crate) struct TestSession {
    pub backend: Arc<FakeBackend>,
    pub storage: MemoryStore,
    pub gate: AuthRefreshGate,
    pub store: SessionStore,
}

impl TestSession {
    pub fn logged_out() -> Self {
        Self::over(Arc::new(FakeBackend::new()), MemoryStore::new())
    }

    /// Another client sharing this session's backend and storage, as after
    /// an app restart.
    pub fn reopen(&self) -> Self {
        Self::over(self.backend.clone(), self.storage.clone())
    }

    fn over(backend: Arc<FakeBackend>, storage: MemoryStore) -> Self {
        let credentials =
            CredentialManager::new(Arc::new(storage.clone()), Arc::new(storage.clone()));
        let gate = AuthRefreshGate::new(backend.clone(), credentials);
        let store = SessionStore::new(gate.clone());
        Self {
            backend,
            storage,
            gate,
            store,
        }
    }

    pub async fn logged_in() -> Self {
        let session = Self::logged_out();
        session
            .store
            .login(EMAIL, PASSWORD)
            .await
            .expect("fake login succeeds");
        session
    }

    pub async fn logged_in_without_refresh_token() -> Self {
        let session = Self::logged_out();
        session.backend.omit_refresh_token();
        session
            .store
            .login(EMAIL, PASSWORD)
            .await
            .expect("fake login succeeds");
        session
    }
}
