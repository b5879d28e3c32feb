use super::{ApiRequest, ApiResponse, Method, RequestBody, Transport};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::redact::redact_secrets;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use tracing::debug;

fn build_headers(bearer: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json, application/pdf"));
    headers.insert(
        USER_AGENT,
        HeaderValue::from_static(concat!("insurance-copilot/", env!("CARGO_PKG_VERSION"))),
    );
    if let Some(token) = bearer.map(str::trim).filter(|t| !t.is_empty()) {
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
            headers.insert(AUTHORIZATION, value);
        }
    }
    headers
}

fn encode_form(fields: &[(String, String)]) -> String {
    fields
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn network_error(e: reqwest::Error) -> ClientError {
    ClientError::Network(redact_secrets(&e.to_string()).into_owned())
}

/// reqwest-backed transport talking to the real backend.
pub struct HttpTransport {
    http: reqwest::Client,
    config: ClientConfig,
}

impl HttpTransport {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(network_error)?;
        Ok(Self { http, config })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        request: &ApiRequest,
        bearer: Option<&str>,
    ) -> Result<ApiResponse, ClientError> {
        let url = self.config.url(&request.path);
        let builder = match request.method {
            Method::Get => self.http.get(&url),
            Method::Post => self.http.post(&url),
            Method::Put => self.http.put(&url),
            Method::Delete => self.http.delete(&url),
        };
        let builder = builder.headers(build_headers(bearer));
        let builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Form(fields) => builder
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(encode_form(fields)),
        };

        let res = builder.send().await.map_err(network_error)?;
        let status = res.status().as_u16();
        debug!(method = request.method.as_str(), path = %request.path, status, "backend call");
        let body = res.bytes().await.map_err(network_error)?;
        Ok(ApiResponse::new(status, body.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_headers_skips_blank_bearer() {
        assert!(build_headers(None).get(AUTHORIZATION).is_none());
        assert!(build_headers(Some("  ")).get(AUTHORIZATION).is_none());
        assert_eq!(
            build_headers(Some("tok")).get(AUTHORIZATION).unwrap(),
            "Bearer tok"
        );
    }

    #[test]
    fn encode_form_escapes_values() {
        let fields = vec![
            ("username".to_string(), "ana@broker.pe".to_string()),
            ("password".to_string(), "a b&c".to_string()),
        ];
        assert_eq!(
            encode_form(&fields),
            "username=ana%40broker.pe&password=a%20b%26c"
        );
    }
}
