//! Request extractors

use axum::{
    extract::{FromRequestParts, Query},
    http::{header, request::Parts, HeaderMap, Uri},
};
use serde::Deserialize;

use super::AppState;
use crate::error::AppError;

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Token from the `token` query parameter, then the `Authorization: Bearer` header
pub fn extract_token(uri: &Uri, headers: &HeaderMap) -> Option<String> {
    if let Ok(Query(TokenQuery { token: Some(token) })) = Query::<TokenQuery>::try_from_uri(uri) {
        if !token.is_empty() {
            return Some(token);
        }
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

/// Recipient identified by a verified token
#[derive(Debug, Clone)]
pub struct AuthenticatedRecipient(pub String);

impl FromRequestParts<AppState> for AuthenticatedRecipient {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = extract_token(&parts.uri, &parts.headers)
            .ok_or_else(|| AppError::Auth("Missing authentication token".to_string()))?;

        let recipient_id = state.token_verifier.verify(&token).map_err(|e| {
            tracing::warn!(error = %e, "Token verification failed");
            e
        })?;

        Ok(Self(recipient_id))
    }
}
