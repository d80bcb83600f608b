//! JWT claim decoder.
//!
//! Treats the SASL PLAIN credential as a compact JWS and reads the `sub`
//! claim out of its payload. Deliberately does not verify the signature —
//! see the module-level warning below — so this is authentication-in-name-
//! only until a signature check is added; prefer [`crate::oauth2::OAuth2Verifier`]
//! for a production identity provider.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;
use tracing::warn;

use crate::{AuthError, AuthVerifier, VerifyOutcome};

#[derive(Deserialize)]
struct Claims {
    sub: Option<String>,
}

/// Decodes the `sub` claim from a compact JWS without checking its
/// signature. The `username` SASL segment is ignored: the claim is the
/// sole source of truth for `localpart`.
pub struct JwtVerifier;

impl JwtVerifier {
    pub fn new() -> Self {
        warn!("JWT verifier does not validate signatures; this authenticates the claim, not the signer");
        Self
    }
}

impl Default for JwtVerifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthVerifier for JwtVerifier {
    async fn verify(&self, _username: &str, credential: &str) -> Result<VerifyOutcome, AuthError> {
        let mut segments = credential.split('.');
        let (Some(_header), Some(payload)) = (segments.next(), segments.next()) else {
            return Err(AuthError::Malformed("JWT must have at least header.payload segments".to_string()));
        };

        let decoded = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|err| AuthError::Malformed(format!("invalid base64url JWT payload: {err}")))?;

        let claims: Claims = serde_json::from_slice(&decoded)
            .map_err(|err| AuthError::Malformed(format!("invalid JWT payload JSON: {err}")))?;

        match claims.sub.filter(|sub| !sub.is_empty()) {
            Some(sub) => Ok(VerifyOutcome::Accepted {
                localpart: Some(sub),
                resource: None,
            }),
            None => Ok(VerifyOutcome::Rejected {
                reason: "JWT is missing a non-empty `sub` claim".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_payload(json: &str) -> String {
        URL_SAFE_NO_PAD.encode(json.as_bytes())
    }

    #[tokio::test]
    async fn accepts_token_with_sub_claim() {
        let token = format!("header.{}.signature", encode_payload(r#"{"sub":"alice"}"#));
        let verifier = JwtVerifier::new();
        let outcome = verifier.verify("ignored", &token).await.unwrap();
        assert_eq!(
            outcome,
            VerifyOutcome::Accepted {
                localpart: Some("alice".to_string()),
                resource: None
            }
        );
    }

    #[tokio::test]
    async fn rejects_token_missing_sub() {
        let token = format!("header.{}.signature", encode_payload(r#"{"iss":"idp"}"#));
        let verifier = JwtVerifier::new();
        let outcome = verifier.verify("ignored", &token).await.unwrap();
        assert!(matches!(outcome, VerifyOutcome::Rejected { .. }));
    }

    #[tokio::test]
    async fn rejects_malformed_token() {
        let verifier = JwtVerifier::new();
        assert!(verifier.verify("ignored", "not-a-jwt").await.is_err());
    }
}
