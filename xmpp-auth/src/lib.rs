//! Pluggable verification of SASL PLAIN credentials.
//!
//! The stream engine decodes the PLAIN payload into `(authzid, authn,
//! credential)` and hands `(authn, credential)` to whichever [`AuthVerifier`]
//! the server was configured with. Nothing downstream of this trait cares
//! whether the credential was an OAuth2 password, a JWT, or a locally
//! hashed password.

pub mod jwt;
pub mod local;
pub mod oauth2;

use async_trait::async_trait;

/// Outcome of a verification attempt that completed without a transport or
/// configuration failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Credentials accepted. `localpart`, when absent, tells the stream
    /// engine to fall back to the SASL PLAIN authn segment itself.
    /// `resource`, when present, is a resource the verifier itself wants to
    /// assign (most verifiers leave this to the resource-bind step instead).
    Accepted {
        localpart: Option<String>,
        resource: Option<String>,
    },
    /// Credentials were well-formed but rejected by the back-end.
    Rejected { reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("authentication gateway error: {0}")]
    Gateway(String),
    #[error("malformed credential: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait AuthVerifier: Send + Sync {
    async fn verify(&self, username: &str, credential: &str) -> Result<VerifyOutcome, AuthError>;
}
