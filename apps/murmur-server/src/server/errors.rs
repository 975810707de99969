use axum::{
    extract::rejection::JsonRejection, http::StatusCode, response::IntoResponse, Json,
};

use super::{
    metrics::{record_auth_failure, record_rate_limit_hit},
    types::AuthError,
};

#[derive(Debug)]
pub(crate) enum AuthFailure {
    InvalidRequest,
    CaptchaFailed,
    Unauthorized,
    Forbidden,
    PrivateProfile,
    NotConnected,
    NotFound,
    RateLimited,
    PayloadTooLarge,
    Internal,
}

impl AuthFailure {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::InvalidRequest => (StatusCode::BAD_REQUEST, "invalid_request"),
            Self::CaptchaFailed => (StatusCode::FORBIDDEN, "captcha_failed"),
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "invalid_credentials"),
            Self::Forbidden => (StatusCode::FORBIDDEN, "forbidden"),
            Self::PrivateProfile => (StatusCode::FORBIDDEN, "private_profile"),
            Self::NotConnected => (StatusCode::FORBIDDEN, "not_connected"),
            Self::NotFound => (StatusCode::NOT_FOUND, "not_found"),
            Self::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
            Self::PayloadTooLarge => (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large"),
            Self::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl From<JsonRejection> for AuthFailure {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            tracing::info!(event = "http.body", outcome = "too_large");
            return Self::PayloadTooLarge;
        }
        Self::InvalidRequest
    }
}

impl std::fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl IntoResponse for AuthFailure {
    fn into_response(self) -> axum::response::Response {
        match self {
            Self::Unauthorized => record_auth_failure("unauthorized"),
            Self::Forbidden => record_auth_failure("forbidden"),
            Self::CaptchaFailed => record_auth_failure("captcha"),
            Self::RateLimited => record_rate_limit_hit("http", "auth_failure"),
            Self::InvalidRequest
            | Self::PrivateProfile
            | Self::NotConnected
            | Self::NotFound
            | Self::PayloadTooLarge
            | Self::Internal => {}
        }

        let (status, error) = self.status_and_code();
        (status, Json(AuthError { error })).into_response()
    }
}

pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_current_span(true)
        .with_span_list(true)
        .init();
}
