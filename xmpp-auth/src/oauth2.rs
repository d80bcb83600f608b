//! OAuth2 resource-owner password-grant verifier.
//!
//! POSTs `grant_type=password` to a configured token endpoint, authenticating
//! the client with HTTP Basic. 2xx means the grant succeeded; 4xx means the
//! credentials were rejected; 5xx is a gateway error distinct from rejection
//! so callers can tell "bad password" from "identity provider is down".

use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use tracing::{instrument, warn};

use crate::{AuthError, AuthVerifier, VerifyOutcome};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct PasswordGrantRequest<'a> {
    grant_type: &'static str,
    username: &'a str,
    password: &'a str,
}

pub struct OAuth2Verifier {
    client: Client,
    token_endpoint: String,
    client_id: String,
    client_secret: String,
}

impl OAuth2Verifier {
    pub fn new(token_endpoint: impl Into<String>, client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client: Client::builder().timeout(DEFAULT_TIMEOUT).build().expect("reqwest client"),
            token_endpoint: token_endpoint.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

#[async_trait::async_trait]
impl AuthVerifier for OAuth2Verifier {
    #[instrument(skip(self, credential), fields(username))]
    async fn verify(&self, username: &str, credential: &str) -> Result<VerifyOutcome, AuthError> {
        let body = PasswordGrantRequest {
            grant_type: "password",
            username,
            password: credential,
        };

        let response = self
            .client
            .post(&self.token_endpoint)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&body)
            .send()
            .await
            .map_err(|err| AuthError::Gateway(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(VerifyOutcome::Accepted {
                localpart: Some(username.to_string()),
                resource: None,
            });
        }

        if status.is_client_error() {
            let reason = response.text().await.unwrap_or_default();
            return Ok(VerifyOutcome::Rejected {
                reason: if reason.is_empty() {
                    format!("token endpoint rejected credentials: {status}")
                } else {
                    reason
                },
            });
        }

        warn!(%status, "oauth2 token endpoint returned a server error");
        Err(AuthError::Gateway(format!("token endpoint returned {status}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_uses_password_grant() {
        let body = PasswordGrantRequest {
            grant_type: "password",
            username: "alice",
            password: "secret",
        };
        let encoded = serde_urlencoded::to_string(&body).unwrap();
        assert_eq!(encoded, "grant_type=password&username=alice&password=secret");
    }
}
