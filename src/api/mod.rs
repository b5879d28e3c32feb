//! Backend request model and the transport seam.

pub mod endpoints;
mod http;

pub use http::HttpTransport;

use crate::error::ClientError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// How a request is authenticated. Only `Bearer` requests take part in the
/// token refresh protocol; `Anonymous` ones are the login/refresh flow
/// itself and are sent without a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScope {
    Bearer,
    Anonymous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(Value),
    Form(Vec<(String, String)>),
}

#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: RequestBody,
    pub scope: AuthScope,
}

impl ApiRequest {
    fn new(method: Method, path: impl Into<String>, body: RequestBody) -> Self {
        Self {
            method,
            path: path.into(),
            body,
            scope: AuthScope::Bearer,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path, RequestBody::Empty)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path, RequestBody::Empty)
    }

    pub fn post_json<T: Serialize>(path: impl Into<String>, body: &T) -> Result<Self, ClientError> {
        Ok(Self::new(
            Method::Post,
            path,
            RequestBody::Json(serde_json::to_value(body)?),
        ))
    }

    pub fn put_json<T: Serialize>(path: impl Into<String>, body: &T) -> Result<Self, ClientError> {
        Ok(Self::new(
            Method::Put,
            path,
            RequestBody::Json(serde_json::to_value(body)?),
        ))
    }

    pub fn post_form(path: impl Into<String>, fields: &[(&str, &str)]) -> Self {
        let fields = fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self::new(Method::Post, path, RequestBody::Form(fields))
    }

    pub fn anonymous(mut self) -> Self {
        self.scope = AuthScope::Anonymous;
        self
    }

    pub fn is_anonymous(&self) -> bool {
        self.scope == AuthScope::Anonymous
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpErrorStatus {
    Unauthorized,
    Forbidden,
    NotFound,
    RateLimited,
    Error,
}

pub fn map_http_status(status_code: u16) -> HttpErrorStatus {
    match status_code {
        401 => HttpErrorStatus::Unauthorized,
        403 => HttpErrorStatus::Forbidden,
        404 => HttpErrorStatus::NotFound,
        429 => HttpErrorStatus::RateLimited,
        _ => HttpErrorStatus::Error,
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn json_body(status: u16, value: &Value) -> Self {
        Self::new(status, value.to_string())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_unauthorized(&self) -> bool {
        map_http_status(self.status) == HttpErrorStatus::Unauthorized
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// FastAPI puts the reason in `detail`; fall back to the raw body.
    pub fn error_message(&self) -> String {
        let detail = serde_json::from_slice::<Value>(&self.body)
            .ok()
            .and_then(|v| v.get("detail").cloned())
            .map(|d| match d {
                Value::String(s) => s,
                other => other.to_string(),
            });
        let message = detail.unwrap_or_else(|| String::from_utf8_lossy(&self.body).trim().to_string());
        if message.is_empty() {
            format!("HTTP {}", self.status)
        } else {
            crate::redact::redact_secrets(&message).into_owned()
        }
    }

    /// Converts a non-2xx response into the matching error.
    pub fn ensure_success(self) -> Result<Self, ClientError> {
        if self.is_success() {
            return Ok(self);
        }
        Err(match map_http_status(self.status) {
            HttpErrorStatus::Unauthorized => ClientError::Unauthorized,
            _ => ClientError::Api {
                status: self.status,
                message: self.error_message(),
            },
        })
    }
}

/// Sends one request to the backend. Implementations report network
/// failures as `ClientError::Network` and return every HTTP response,
/// including error statuses, as `Ok`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: &ApiRequest,
        bearer: Option<&str>,
    ) -> Result<ApiResponse, ClientError>;
}
