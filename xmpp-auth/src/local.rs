//! Local Argon2 password verification against a pluggable credential store.
//!
//! This is the verifier the bundled server binary wires up when no
//! external OAuth2/JWT identity provider is configured: self-contained
//! deployments and integration tests authenticate against locally-hashed
//! passwords instead.

use argon2::password_hash::PasswordHash;
use argon2::{Argon2, PasswordVerifier};
use async_trait::async_trait;

use crate::{AuthError, AuthVerifier, VerifyOutcome};

/// Capability the local verifier needs: look up the stored Argon2 hash for
/// a bare JID's localpart. Kept separate from any particular storage engine
/// so this crate never depends on `sqlx` directly.
#[async_trait]
pub trait PasswordLookup: Send + Sync {
    async fn stored_hash(&self, localpart: &str) -> Result<Option<String>, AuthError>;
}

pub struct LocalVerifier<S: PasswordLookup> {
    store: S,
}

impl<S: PasswordLookup> LocalVerifier<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: PasswordLookup> AuthVerifier for LocalVerifier<S> {
    async fn verify(&self, username: &str, credential: &str) -> Result<VerifyOutcome, AuthError> {
        let Some(stored) = self.store.stored_hash(username).await? else {
            return Ok(VerifyOutcome::Rejected {
                reason: "no such user".to_string(),
            });
        };

        let hash = PasswordHash::new(&stored).map_err(|err| AuthError::Gateway(err.to_string()))?;
        match Argon2::default().verify_password(credential.as_bytes(), &hash) {
            Ok(()) => Ok(VerifyOutcome::Accepted {
                localpart: Some(username.to_string()),
                resource: None,
            }),
            Err(_) => Ok(VerifyOutcome::Rejected {
                reason: "incorrect password".to_string(),
            }),
        }
    }
}
