//! Token verification for client-facing endpoints.
//!
//! Identity is consumed as an opaque "verify token -> recipient id" capability.

mod claims;
mod jwt;

pub use claims::Claims;
pub use jwt::JwtValidator;

use crate::error::AppError;

/// Resolves a bearer token to the recipient it identifies
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<String, AppError>;
}
