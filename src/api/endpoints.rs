use super::ApiRequest;
use crate::error::ClientError;
use crate::types::{
    ChatRequest, PdfSlipRequest, QuoteRequest, RefreshTokenRequest, RegisterRequest, ThreadTitle,
};

pub const TOKEN: &str = "/auth/token";
pub const REFRESH: &str = "/auth/refresh";
pub const REGISTER: &str = "/auth/register";
pub const ME: &str = "/auth/me";
pub const THREADS: &str = "/threads";
pub const CHAT: &str = "/chat";
pub const PDF_SLIP: &str = "/files/pdf/slip";
pub const QUOTE_CALCULATE: &str = "/quotes/calculate";

pub fn thread_path(id: &str) -> String {
    format!("{THREADS}/{}", urlencoding::encode(id))
}

pub fn thread_messages_path(id: &str) -> String {
    format!("{}/messages", thread_path(id))
}

/// OAuth2 password form; the backend reads the email from `username`.
pub fn login(email: &str, password: &str) -> ApiRequest {
    ApiRequest::post_form(TOKEN, &[("username", email), ("password", password)]).anonymous()
}

pub fn refresh(refresh_token: &str) -> Result<ApiRequest, ClientError> {
    Ok(ApiRequest::post_json(REFRESH, &RefreshTokenRequest { refresh_token })?.anonymous())
}

pub fn register(request: &RegisterRequest) -> Result<ApiRequest, ClientError> {
    Ok(ApiRequest::post_json(REGISTER, request)?.anonymous())
}

pub fn me() -> ApiRequest {
    ApiRequest::get(ME)
}

pub fn list_threads() -> ApiRequest {
    ApiRequest::get(THREADS)
}

pub fn create_thread(title: &str) -> Result<ApiRequest, ClientError> {
    ApiRequest::post_json(THREADS, &ThreadTitle { title })
}

pub fn rename_thread(id: &str, title: &str) -> Result<ApiRequest, ClientError> {
    ApiRequest::put_json(thread_path(id), &ThreadTitle { title })
}

pub fn delete_thread(id: &str) -> ApiRequest {
    ApiRequest::delete(thread_path(id))
}

pub fn thread_messages(id: &str) -> ApiRequest {
    ApiRequest::get(thread_messages_path(id))
}

pub fn chat(message: &str, thread_id: Option<&str>) -> Result<ApiRequest, ClientError> {
    ApiRequest::post_json(CHAT, &ChatRequest { message, thread_id })
}

pub fn pdf_slip(request: &PdfSlipRequest) -> Result<ApiRequest, ClientError> {
    ApiRequest::post_json(PDF_SLIP, request)
}

pub fn calculate_quotes(request: &QuoteRequest) -> Result<ApiRequest, ClientError> {
    ApiRequest::post_json(QUOTE_CALCULATE, request)
}
