//! Auth contract (§6): tokens are opaque. Verification returns `{userId}` or
//! fails; no token content is ever interpreted by the core itself — that
//! interpretation is an external collaborator's job (§1 Out of scope).

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid or expired token")]
    InvalidToken,
}

#[async_trait]
pub trait AuthVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<String, AuthError>;
}

/// Accepts any non-empty token and derives the user id from it directly.
/// Stands in for the real device-registration/token-issuance collaborator
/// (§1 Out of scope) in tests and local runs.
pub struct StaticTokenVerifier;

#[async_trait]
impl AuthVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Result<String, AuthError> {
        if token.is_empty() {
            return Err(AuthError::InvalidToken);
        }
        Ok(format!("user:{token}"))
    }
}
