use axum::{
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// Failures raised by a document store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Lock poisoned: {0}")]
    Poisoned(&'static str),

    #[error("Corrupt document in collection '{collection}': {message}")]
    Corrupt { collection: String, message: String },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    #[error("Invalid route: {0}")]
    InvalidRoute(String),

    #[error("API rate-limited. Please wait {retry_after_secs}s to make another request.")]
    RateLimited { retry_after_secs: u64 },
}

pub type Result<T> = std::result::Result<T, GatewayError>;

/// Errors reported by the parameter extractor. The route decides how to
/// surface them; the default rendering is a 400 with the message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParamError {
    #[error("method {0} not supported")]
    UnsupportedMethod(Method),

    #[error("missing parameter `{0}`")]
    MissingParameter(String),

    #[error("malformed request body: {0}")]
    MalformedBody(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: u16,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, code: u16) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            code,
        }
    }

    pub fn from_gateway_error(err: &GatewayError) -> Self {
        match err {
            GatewayError::StoreUnavailable(e) => {
                Self::new("service_unavailable", &e.to_string(), 503)
            }
            GatewayError::InvalidRoute(msg) => Self::new("invalid_route", msg, 500),
            GatewayError::RateLimited { .. } => {
                Self::new("rate_limit_exceeded", &err.to_string(), 429)
            }
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match self {
            // Plain `{"error": ...}` body with a 200 status.
            GatewayError::RateLimited { retry_after_secs } => {
                let mut resp = Json(json!({ "error": self.to_string() })).into_response();
                resp.headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
                resp
            }
            other => {
                tracing::error!(target: "route_gateway::error", error = %other, "Request failed");
                let body = ErrorResponse::from_gateway_error(&other);
                let status = StatusCode::from_u16(body.code)
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                (status, Json(body)).into_response()
            }
        }
    }
}

impl IntoResponse for ParamError {
    fn into_response(self) -> Response {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}
