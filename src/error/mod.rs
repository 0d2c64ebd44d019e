use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::delivery::DeliveryErrorCode;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{message}")]
    Delivery {
        code: DeliveryErrorCode,
        message: String,
    },

    #[error("Too many requests, please retry after {retry_after} seconds")]
    RateLimited { retry_after: u64, limit: u32 },

    #[error("Connection limit reached: {0}")]
    ConnectionLimit(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

/// Check if running in production mode (based on RUN_MODE env var)
fn is_production() -> bool {
    std::env::var("RUN_MODE")
        .map(|m| m == "production" || m == "prod")
        .unwrap_or(false)
}

fn hide_in_production(detail: String, public: &str) -> String {
    if is_production() {
        public.to_string()
    } else {
        detail
    }
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Auth(_) => "UNAUTHORIZED",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Delivery { code, .. } => code.as_str(),
            AppError::RateLimited { .. } => "RATE_LIMITED",
            AppError::ConnectionLimit(_) => "CONNECTION_LIMIT",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Delivery { code, .. } if code.is_validation() => StatusCode::BAD_REQUEST,
            AppError::Delivery { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::ConnectionLimit(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let log_message = self.to_string();

        let client_message = match &self {
            AppError::Internal(_) => hide_in_production(log_message.clone(), "Internal server error"),
            _ => log_message.clone(),
        };

        // Always log the detailed error server-side
        if status.is_server_error() {
            tracing::error!(code = %code, status = %status.as_u16(), message = %log_message, "API error");
        } else {
            tracing::debug!(code = %code, status = %status.as_u16(), message = %log_message, "API error");
        }

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: client_message,
            },
        };

        let mut response = (status, Json(body)).into_response();

        if let AppError::RateLimited { retry_after, limit } = self {
            let headers = response.headers_mut();
            if let Ok(v) = HeaderValue::from_str(&retry_after.to_string()) {
                headers.insert("Retry-After", v);
            }
            if let Ok(v) = HeaderValue::from_str(&limit.to_string()) {
                headers.insert("X-RateLimit-Limit", v);
            }
            headers.insert("X-RateLimit-Remaining", HeaderValue::from_static("0"));
        }

        response
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
