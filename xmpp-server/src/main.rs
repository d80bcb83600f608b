//! Binary entry point: a `serve` default action plus an administrative
//! `add-user`/`remove-user` CLI for the local credential store.

mod settings;
mod store;
mod supervisor;

use std::sync::Arc;

use anyhow::{Context, Error};
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHasher, SaltString};
use argon2::Argon2;
use clap::{Parser, Subcommand};
use tracing::info;

use settings::{AuthBackend, Settings};
use store::sqlite::SqliteStore;
use store::{StoreBackend as _, StoreHandle};
use xmpp_auth::jwt::JwtVerifier;
use xmpp_auth::local::LocalVerifier;
use xmpp_auth::oauth2::OAuth2Verifier;
use xmpp_auth::AuthVerifier;
use xmpp_registry::SessionRegistry;
use xmpp_stream::engine::{EngineConfig, ServerIdentity};

#[derive(Parser)]
#[command(name = "xmpp-server", about = "A client-facing XMPP stream server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Creates or updates a local user's Argon2 password hash.
    AddUser {
        bare_jid: String,
        password: String,
    },
    /// Deletes a local user's credential row.
    RemoveUser {
        bare_jid: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let settings = Settings::load().context("loading configuration")?;

    match cli.command {
        Some(Command::AddUser { bare_jid, password }) => add_user(&settings, &bare_jid, &password).await,
        Some(Command::RemoveUser { bare_jid }) => remove_user(&settings, &bare_jid).await,
        None => serve(settings).await,
    }
}

async fn add_user(settings: &Settings, bare_jid: &str, password: &str) -> Result<(), Error> {
    let backend = SqliteStore::connect(&settings.database_url).await?;
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| anyhow::anyhow!("failed to hash password: {err}"))?
        .to_string();
    backend.upsert(bare_jid, &hash).await?;
    println!("added user {bare_jid}");
    Ok(())
}

async fn remove_user(settings: &Settings, bare_jid: &str) -> Result<(), Error> {
    let backend = SqliteStore::connect(&settings.database_url).await?;
    if backend.remove(bare_jid).await? {
        println!("removed user {bare_jid}");
    } else {
        println!("no such user: {bare_jid}");
    }
    Ok(())
}

async fn serve(settings: Settings) -> Result<(), Error> {
    let domain = settings.domain.clone();
    let auth: Arc<dyn AuthVerifier> = match settings.auth_backend {
        AuthBackend::Local => {
            let backend = SqliteStore::connect(&settings.database_url).await?;
            let handle = StoreHandle::spawn(domain.domain.clone(), backend);
            Arc::new(LocalVerifier::new(handle))
        }
        AuthBackend::OAuth2 => {
            Arc::new(OAuth2Verifier::new(settings.token_endpoint.clone(), settings.client_id.clone(), settings.client_secret.clone()))
        }
        AuthBackend::Jwt => Arc::new(JwtVerifier::new()),
    };

    let config = EngineConfig {
        server: ServerIdentity { name: settings.name.clone(), domain },
        registry: Arc::new(SessionRegistry::new()),
        auth,
    };

    let sup = supervisor::Supervisor::bind(("0.0.0.0", settings.port), config).await?;
    info!(port = settings.port, "listening");
    let handle = supervisor::spawn(sup);

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutdown requested");
    handle.stop();
    handle.done().await;
    info!(uptime = ?handle.uptime(), "shutdown complete");

    Ok(())
}
