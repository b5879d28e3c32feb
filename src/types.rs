use crate::error::ClientError;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use ts_rs::TS;

pub const DEFAULT_THREAD_TITLE: &str = "Nueva Sesión";

/// Access/refresh token pair used to authenticate backend calls.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

impl Credential {
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"REDACTED")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "REDACTED"),
            )
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum UserRole {
    Broker,
    Admin,
    User,
    #[default]
    Viewer,
}

impl UserRole {
    /// Unknown roles fall back to the least privileged one.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "broker" => Self::Broker,
            "admin" => Self::Admin,
            "user" => Self::User,
            _ => Self::Viewer,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Broker => "broker",
            Self::Admin => "admin",
            Self::User => "user",
            Self::Viewer => "viewer",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct AuthenticatedUser {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub role: UserRole,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum MessageRole {
    User,
    Assistant,
}

/// Delivery status of a message. Only `Sending` may change, and only to
/// one of the two terminal states.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum MessageStatus {
    Sending,
    Sent,
    Error,
}

impl MessageStatus {
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Sending => false,
            Self::Sent | Self::Error => true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum MetadataKind {
    Text,
    Table,
    Quote,
    Analysis,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct MessageMetadata {
    #[serde(rename = "type")]
    pub kind: MetadataKind,
    pub data: Option<Value>,
}

impl MessageMetadata {
    pub fn table(rows: Value) -> Self {
        Self {
            kind: MetadataKind::Table,
            data: Some(rows),
        }
    }

    /// Decodes the comparison table carried by table metadata. Rows that are
    /// not objects are skipped.
    pub fn comparison_rows(&self) -> Option<Vec<ComparisonRow>> {
        if self.kind != MetadataKind::Table {
            return None;
        }
        let rows = self.data.as_ref()?.as_array()?;
        Some(
            rows.iter()
                .filter(|row| row.is_object())
                .filter_map(|row| serde_json::from_value(row.clone()).ok())
                .collect(),
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase", default)]
#[ts(export)]
pub struct ComparisonRow {
    pub insurer: String,
    pub premium: String,
    pub coverage: String,
    pub special_clause: String,
    pub advantages: Vec<String>,
    pub disadvantages: Vec<String>,
    pub responsiveness: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Message {
    pub id: String,
    pub content: String,
    pub role: MessageRole,
    pub timestamp: DateTime<Utc>,
    pub status: MessageStatus,
    pub metadata: Option<MessageMetadata>,
    #[serde(default)]
    pub sources: Vec<String>,
}

impl Message {
    fn local_id(prefix: &str) -> String {
        format!("{prefix}-{}", uuid::Uuid::new_v4())
    }

    /// Optimistic user message, shown before the backend answers.
    pub fn outgoing(content: impl Into<String>) -> Self {
        Self {
            id: Self::local_id("msg-user"),
            content: content.into(),
            role: MessageRole::User,
            timestamp: Utc::now(),
            status: MessageStatus::Sending,
            metadata: None,
            sources: vec![],
        }
    }

    pub fn assistant_reply(reply: &ChatResponse) -> Self {
        let metadata = match reply.data_table.as_ref().filter(|v| !v.is_null()) {
            Some(rows) => MessageMetadata::table(rows.clone()),
            None => MessageMetadata {
                kind: MetadataKind::Text,
                data: None,
            },
        };
        Self {
            id: Self::local_id("msg-assistant"),
            content: reply.answer.clone(),
            role: MessageRole::Assistant,
            timestamp: Utc::now(),
            status: MessageStatus::Sent,
            metadata: Some(metadata),
            sources: reply.sources.clone(),
        }
    }

    pub fn assistant_error(notice: &str) -> Self {
        Self {
            id: Self::local_id("msg-error"),
            content: notice.to_string(),
            role: MessageRole::Assistant,
            timestamp: Utc::now(),
            status: MessageStatus::Error,
            metadata: None,
            sources: vec![],
        }
    }

    pub fn settle(&mut self, next: MessageStatus) -> Result<(), ClientError> {
        if self.status.is_terminal() || !next.is_terminal() {
            return Err(ClientError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Thread {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub messages_loaded: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SessionSnapshot {
    pub user: Option<AuthenticatedUser>,
    pub threads: Vec<Thread>,
    pub current_thread_id: Option<String>,
}

impl SessionSnapshot {
    pub fn current_thread(&self) -> Option<&Thread> {
        let id = self.current_thread_id.as_deref()?;
        self.threads.iter().find(|t| t.id == id)
    }
}

// ---- wire types ----

fn de_flexible_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(i64),
        Text(String),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Number(n) => n.to_string(),
        RawId::Text(s) => s,
    })
}

/// Parses backend timestamps. Values without an offset are taken as UTC.
pub(crate) fn parse_backend_time(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn de_backend_time<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_backend_time(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl From<TokenResponse> for Credential {
    fn from(value: TokenResponse) -> Self {
        Credential::new(value.access_token, value.refresh_token)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshTokenRequest<'a> {
    pub refresh_token: &'a str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub role: UserRole,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserRecord {
    #[serde(deserialize_with = "de_flexible_id")]
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, deserialize_with = "de_role")]
    pub role: UserRole,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn de_role<'de, D>(deserializer: D) -> Result<UserRole, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().map(UserRole::parse_lenient).unwrap_or_default())
}

fn default_active() -> bool {
    true
}

impl From<UserRecord> for AuthenticatedUser {
    fn from(value: UserRecord) -> Self {
        Self {
            id: value.id,
            email: value.email,
            name: value.username.filter(|n| !n.trim().is_empty()),
            role: value.role,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(default)]
    pub metadata_json: Option<Value>,
    #[serde(deserialize_with = "de_backend_time")]
    pub created_at: DateTime<Utc>,
}

impl From<MessageRecord> for Message {
    fn from(value: MessageRecord) -> Self {
        let metadata = value.metadata_json.filter(|v| !v.is_null()).map(|v| {
            serde_json::from_value::<MessageMetadata>(v.clone()).unwrap_or(MessageMetadata {
                kind: if v.is_array() {
                    MetadataKind::Table
                } else {
                    MetadataKind::Analysis
                },
                data: Some(v),
            })
        });
        Self {
            id: value.id,
            content: value.content,
            role: value.role,
            timestamp: value.created_at,
            status: MessageStatus::Sent,
            metadata,
            sources: vec![],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThreadRecord {
    pub id: String,
    pub title: String,
    #[serde(deserialize_with = "de_backend_time")]
    pub created_at: DateTime<Utc>,
    #[serde(deserialize_with = "de_backend_time")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<MessageRecord>,
}

impl From<ThreadRecord> for Thread {
    fn from(value: ThreadRecord) -> Self {
        let messages_loaded = !value.messages.is_empty();
        Self {
            id: value.id,
            title: value.title,
            created_at: value.created_at,
            updated_at: value.updated_at,
            messages: value.messages.into_iter().map(Message::from).collect(),
            messages_loaded,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ThreadTitle<'a> {
    pub title: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest<'a> {
    pub message: &'a str,
    pub thread_id: Option<&'a str>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub answer: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub data_table: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VehicleInfo {
    pub brand: String,
    pub model: String,
    pub year: u16,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuoteRequest {
    pub age: u8,
    pub vehicle: VehicleInfo,
    pub usage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dni: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QuoteOffer {
    pub insurer: String,
    pub plan_name: String,
    pub price: f64,
    pub coverage_summary: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PdfSlipRequest {
    pub title: String,
    pub content: String,
    pub table_data: Option<Vec<Value>>,
}

impl PdfSlipRequest {
    pub fn from_message(title: impl Into<String>, message: &Message) -> Self {
        let table_data = message
            .metadata
            .as_ref()
            .filter(|m| m.kind == MetadataKind::Table)
            .and_then(|m| m.data.as_ref())
            .and_then(|d| d.as_array())
            .cloned();
        Self {
            title: title.into(),
            content: message.content.clone(),
            table_data,
        }
    }
}
