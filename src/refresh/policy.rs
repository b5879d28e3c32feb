use crate::api::{ApiRequest, ApiResponse, AuthScope};

/// Only authenticated calls that came back 401 go through the refresh
/// protocol. Login, refresh and registration are `Anonymous` and never do.
pub(crate) fn should_refresh(request: &ApiRequest, response: &ApiResponse) -> bool {
    request.scope == AuthScope::Bearer && response.is_unauthorized()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum IdleDecision {
    /// The token was rotated after the failing request went out.
    ReplayWith(String),
    StartRefresh,
    /// Nobody is logged in anymore.
    LoggedOut,
}

/// What a request that saw a 401 does while no refresh is running.
pub(crate) fn decide_when_idle(current: Option<&str>, used: &str) -> IdleDecision {
    match current {
        None => IdleDecision::LoggedOut,
        Some(current) if current != used => IdleDecision::ReplayWith(current.to_string()),
        Some(_) => IdleDecision::StartRefresh,
    }
}
