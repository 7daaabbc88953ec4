use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde::Serialize;

/// Error kinds surfaced to callers. Signature/format/rate-limit errors are
/// terminal for the request and never reach the Evaluator.
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: signature mismatch")]
    Unauthorized,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited")]
    RateLimited,

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("notifier failure: {0}")]
    NotifierFailure(String),

    #[error("invalid sms format: {0}")]
    InvalidFormat(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    detail: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // NotifierFailure and InvalidFormat are never routed through here in
        // practice (they're logged at the call site instead), but the mapping
        // is kept complete so the enum stays uniform end to end.
        let (status, tag, detail) = match &self {
            AppError::BadRequest(d) => (StatusCode::BAD_REQUEST, "bad_request", d.clone()),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", self.to_string()),
            AppError::NotFound(d) => (StatusCode::NOT_FOUND, "not_found", d.clone()),
            AppError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "rate_limited", self.to_string()),
            AppError::StoreUnavailable(d) => (StatusCode::INTERNAL_SERVER_ERROR, "store_unavailable", d.clone()),
            AppError::NotifierFailure(d) => (StatusCode::INTERNAL_SERVER_ERROR, "notifier_failure", d.clone()),
            AppError::InvalidFormat(d) => (StatusCode::OK, "invalid_format", d.clone()),
        };
        (status, Json(ErrorBody { error: tag.to_string(), detail })).into_response()
    }
}

/// Errors returned by the Store capability trait.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Errors returned by the StateCache capability trait.
#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// Errors returned by a single Notifier send attempt (collected, not fatal).
#[derive(thiserror::Error, Debug, Clone)]
pub enum NotifierError {
    #[error("sms send failed for {phone}: {reason}")]
    Sms { phone: String, reason: String },
    #[error("whatsapp send failed for {phone}: {reason}")]
    WhatsApp { phone: String, reason: String },
    #[error("push send failed: {0}")]
    Push(String),
    #[error("no push token on file")]
    NoPushToken,
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => AppError::NotFound("resource not found".into()),
            StoreError::Unavailable(d) => AppError::StoreUnavailable(d),
        }
    }
}

impl From<CacheError> for AppError {
    fn from(e: CacheError) -> Self {
        AppError::StoreUnavailable(e.to_string())
    }
}
