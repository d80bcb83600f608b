//! Accept-loop lifecycle: binds a listener, spawns one [`StreamEngine`] task
//! per connection, and drives an orderly shutdown on request.
//!
//! Grounded on the accept/stop/done surface of a conventional Go network
//! server (`startTime`/`stopCh`/`doneCh`, `Uptime()`, `Stopped()`), rebuilt
//! with `tokio::sync::watch` instead of closed channels: a `watch` always
//! has a current value, so a caller that calls `done()` after shutdown has
//! already finished observes it immediately rather than racing a
//! `Notify`-style wakeup.

use std::time::{Duration, Instant};

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};

use xmpp_stream::engine::{self, EngineConfig};

pub struct Supervisor {
    listener: TcpListener,
    config: EngineConfig,
    started_at: Instant,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

impl Supervisor {
    pub async fn bind(addr: impl tokio::net::ToSocketAddrs, config: EngineConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let (stop_tx, stop_rx) = watch::channel(false);
        let (done_tx, done_rx) = watch::channel(false);
        Ok(Self {
            listener,
            config,
            started_at: Instant::now(),
            stop_tx,
            stop_rx,
            done_tx,
            done_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Requests shutdown. Idempotent: a second call is a no-op.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Resolves once shutdown has fully drained (every connection closed).
    /// Resolves immediately if shutdown already completed before this was
    /// called.
    pub async fn done(&self) {
        let mut rx = self.done_rx.clone();
        if *rx.borrow() {
            return;
        }
        let _ = rx.changed().await;
    }

    /// Runs the accept loop until [`Self::stop`] is called, then sends a
    /// shutdown notice to every live session and waits for their tasks to
    /// finish before signaling [`Self::done`].
    #[instrument(name = "supervisor", skip(self))]
    pub async fn serve(mut self) {
        let mut tasks = JoinSet::new();
        let mut stop_rx = self.stop_rx.clone();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((socket, peer)) => {
                            info!(%peer, "accepted connection");
                            let config = self.config.clone();
                            tasks.spawn(engine::handle_connection(socket, config));
                        }
                        Err(err) => warn!(error = %err, "accept failed"),
                    }
                }
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        break;
                    }
                }
            }
        }

        info!("shutting down: notifying active sessions");
        let mut handles = Vec::new();
        self.config.registry.for_each_active(|handle| handles.push(handle.clone())).await;
        for handle in handles {
            let _ = handle.send_shutdown().await;
        }

        while tasks.join_next().await.is_some() {}

        let _ = self.done_tx.send(true);
    }
}

/// Spawns [`Supervisor::serve`] on the current runtime, returning a handle
/// the caller can use to request shutdown independently of the accept loop.
pub fn spawn(supervisor: Supervisor) -> SupervisorHandle {
    let stop_tx = supervisor.stop_tx.clone();
    let done_rx = supervisor.done_rx.clone();
    let started_at = supervisor.started_at;
    tokio::spawn(supervisor.serve());
    SupervisorHandle {
        stop_tx,
        done_rx,
        started_at,
    }
}

/// A cloneable remote control for a running [`Supervisor`], for use once the
/// accept loop has been moved into its own task.
#[derive(Clone)]
pub struct SupervisorHandle {
    stop_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
    started_at: Instant,
}

impl SupervisorHandle {
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    pub async fn done(&self) {
        let mut rx = self.done_rx.clone();
        if *rx.borrow() {
            return;
        }
        let _ = rx.changed().await;
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use xmpp_auth::{AuthError, AuthVerifier, VerifyOutcome};
    use xmpp_registry::SessionRegistry;
    use xmpp_stream::engine::ServerIdentity;

    use super::*;

    struct FakeVerifier;

    #[async_trait]
    impl AuthVerifier for FakeVerifier {
        async fn verify(&self, _username: &str, _credential: &str) -> Result<VerifyOutcome, AuthError> {
            Ok(VerifyOutcome::Rejected { reason: "no clients in this test".to_string() })
        }
    }

    fn test_config() -> EngineConfig {
        EngineConfig {
            server: ServerIdentity { name: "xmppd".to_string(), domain: "localhost".parse().unwrap() },
            registry: Arc::new(SessionRegistry::new()),
            auth: Arc::new(FakeVerifier),
        }
    }

    #[tokio::test]
    async fn stop_then_done_resolves_with_no_connections() {
        let supervisor = Supervisor::bind("127.0.0.1:0", test_config()).await.unwrap();
        let handle = spawn(supervisor);
        handle.stop();
        handle.done().await;
    }

    #[tokio::test]
    async fn done_called_after_shutdown_already_completed_resolves_immediately() {
        let supervisor = Supervisor::bind("127.0.0.1:0", test_config()).await.unwrap();
        let handle = spawn(supervisor);
        handle.stop();
        handle.done().await;
        handle.done().await;
    }

    #[tokio::test]
    async fn uptime_grows_monotonically() {
        let supervisor = Supervisor::bind("127.0.0.1:0", test_config()).await.unwrap();
        let first = supervisor.uptime();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(supervisor.uptime() >= first);
    }
}
