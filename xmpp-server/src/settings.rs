//! Layered configuration: `config/defaults.yaml` under an optional
//! `config/overrides.yaml` under `XMPP_SERVER__`-prefixed environment
//! variables, deserialized into a typed [`Settings`].

use anyhow::{anyhow, Error};
use serde::{Deserialize, Deserializer};

use xmpp_core::jid::Jid;

/// TLS is advertised only as an accepted configuration shape; the engine
/// never negotiates STARTTLS on the wire (see `xmpp-stream`'s feature
/// list). This section exists so deployments can describe their intended
/// certificate material without the core depending on a TLS stack.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TlsSettings {
    #[serde(default)]
    pub enabled: bool,
    pub certificate_chain_path: Option<String>,
    pub private_key_path: Option<String>,
}

/// Which `AuthVerifier` the server wires up. `Local` authenticates against
/// the bundled Argon2 credential store; `OAuth2` and `Jwt` delegate to the
/// external identity provider configured below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuthBackend {
    #[default]
    Local,
    OAuth2,
    Jwt,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub name: String,
    #[serde(deserialize_with = "deserialize_domain")]
    pub domain: Jid,
    pub port: u16,
    pub database_url: String,
    #[serde(default)]
    pub auth_backend: AuthBackend,
    #[serde(default)]
    pub token_endpoint: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub tls: TlsSettings,
}

impl Settings {
    /// Loads `config/defaults.yaml`, layers an optional
    /// `config/overrides.yaml` on top, then environment variables prefixed
    /// `XMPP_SERVER__` (double underscore separates nested keys, e.g.
    /// `XMPP_SERVER__PORT`).
    pub fn load() -> Result<Self, Error> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("config/defaults"))
            .add_source(config::File::with_name("config/overrides").required(false))
            .add_source(config::Environment::with_prefix("XMPP_SERVER").separator("__"))
            .build()?;

        settings.try_deserialize().map_err(|err| anyhow!(err))
    }
}

fn deserialize_domain<'d, D: Deserializer<'d>>(deserializer: D) -> Result<Jid, D::Error> {
    let raw = String::deserialize(deserializer)?;
    Ok(Jid::domain_only(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_local_auth_backend() {
        assert_eq!(AuthBackend::default(), AuthBackend::Local);
    }
}
