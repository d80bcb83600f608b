//! Actor-style credential store: one task owns the backend exclusively and
//! every caller talks to it through a cloneable [`StoreHandle`] over an mpsc
//! channel with a oneshot reply per request. Mirrors the request/response
//! shape of the session registry's `SessionHandle`, applied to a resource
//! that needs serialized access to a single database connection pool
//! instead of fan-out broadcast.

pub mod fake;
pub mod sqlite;

use anyhow::Error;
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::error;

use xmpp_auth::{AuthError, local::PasswordLookup};
use xmpp_core::jid::Jid;

const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// What a storage engine must support. Implemented by [`sqlite::SqliteStore`]
/// for real deployments and [`fake::FakeStore`] for tests.
#[async_trait]
pub trait StoreBackend: Send + Sync + 'static {
    async fn stored_hash(&self, bare_jid: &str) -> Result<Option<String>, Error>;
    async fn upsert(&self, bare_jid: &str, password_hash: &str) -> Result<(), Error>;
    async fn remove(&self, bare_jid: &str) -> Result<bool, Error>;
}

enum Command {
    StoredHash { bare_jid: String, reply: oneshot::Sender<Result<Option<String>, Error>> },
    Upsert { bare_jid: String, password_hash: String, reply: oneshot::Sender<Result<(), Error>> },
    Remove { bare_jid: String, reply: oneshot::Sender<Result<bool, Error>> },
}

/// A cloneable front for the store actor task. `domain` is carried here
/// (not in the backend) so the [`PasswordLookup`] impl can turn the bare
/// localpart the SASL layer hands it into the `local@domain` key the store
/// is keyed on.
#[derive(Clone)]
pub struct StoreHandle {
    domain: String,
    commands: mpsc::Sender<Command>,
}

impl StoreHandle {
    /// Spawns the actor task owning `backend` and returns a handle to it.
    pub fn spawn(domain: impl Into<String>, backend: impl StoreBackend) -> Self {
        let (tx, mut rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    Command::StoredHash { bare_jid, reply } => {
                        let _ = reply.send(backend.stored_hash(&bare_jid).await);
                    }
                    Command::Upsert { bare_jid, password_hash, reply } => {
                        let _ = reply.send(backend.upsert(&bare_jid, &password_hash).await);
                    }
                    Command::Remove { bare_jid, reply } => {
                        let _ = reply.send(backend.remove(&bare_jid).await);
                    }
                }
            }
        });
        Self { domain: domain.into(), commands: tx }
    }

    fn bare_jid_for(&self, local: &str) -> String {
        Jid::new(local, self.domain.clone(), "").to_bare_string()
    }

    pub async fn stored_hash(&self, bare_jid: &str) -> Result<Option<String>, Error> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::StoredHash { bare_jid: bare_jid.to_string(), reply })
            .await
            .map_err(|_| anyhow::anyhow!("credential store actor has shut down"))?;
        rx.await.map_err(|_| anyhow::anyhow!("credential store actor dropped the reply channel"))?
    }

    pub async fn upsert(&self, bare_jid: &str, password_hash: &str) -> Result<(), Error> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Upsert { bare_jid: bare_jid.to_string(), password_hash: password_hash.to_string(), reply })
            .await
            .map_err(|_| anyhow::anyhow!("credential store actor has shut down"))?;
        rx.await.map_err(|_| anyhow::anyhow!("credential store actor dropped the reply channel"))?
    }

    pub async fn remove(&self, bare_jid: &str) -> Result<bool, Error> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Remove { bare_jid: bare_jid.to_string(), reply })
            .await
            .map_err(|_| anyhow::anyhow!("credential store actor has shut down"))?;
        rx.await.map_err(|_| anyhow::anyhow!("credential store actor dropped the reply channel"))?
    }
}

#[async_trait]
impl PasswordLookup for StoreHandle {
    async fn stored_hash(&self, localpart: &str) -> Result<Option<String>, AuthError> {
        let bare_jid = self.bare_jid_for(localpart);
        StoreHandle::stored_hash(self, &bare_jid).await.map_err(|err| {
            error!(error = %err, "credential store lookup failed");
            AuthError::Gateway(err.to_string())
        })
    }
}
