//! The authenticated-client directory used for message delivery and
//! graceful shutdown.
//!
//! A stream engine owns and mutates its own connection state exclusively;
//! the registry only ever holds a [`SessionHandle`] — a clone of the
//! engine's outbox sender — so other tasks can hand it stanzas (or a
//! shutdown notice) without ever touching the socket themselves. The
//! owning engine task is the only task that calls into its [`StreamWriter`],
//! which is what keeps concurrent fan-out from interleaving writes: see
//! `xmpp-stream`'s engine loop, which drains the outbox in the same
//! `select!` as the inbound XML stream.
//!
//! [`StreamWriter`]: xmpp_core::xml::stream_writer::StreamWriter

use std::collections::HashMap;

use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::warn;
use xmpp_core::xml::Element;

/// A message queued for delivery to a session's owning engine task.
#[derive(Debug)]
pub enum Outbound {
    /// A top-level stanza or stream-error frame to write verbatim.
    Stanza(Element),
    /// Server is shutting down: write the system-shutdown stream error and
    /// close.
    Shutdown,
}

#[derive(Debug, Error)]
#[error("session is no longer accepting outbound frames")]
pub struct SessionGone;

/// A cheap, cloneable handle to a live session's outbox. Registry entries
/// are exactly this: nothing here can mutate the session's protocol state.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub stream_id: String,
    outbox: mpsc::Sender<Outbound>,
}

impl SessionHandle {
    pub fn new(stream_id: impl Into<String>, outbox: mpsc::Sender<Outbound>) -> Self {
        Self {
            stream_id: stream_id.into(),
            outbox,
        }
    }

    pub async fn send_stanza(&self, element: Element) -> Result<(), SessionGone> {
        self.outbox.send(Outbound::Stanza(element)).await.map_err(|_| SessionGone)
    }

    pub async fn send_shutdown(&self) -> Result<(), SessionGone> {
        self.outbox.send(Outbound::Shutdown).await.map_err(|_| SessionGone)
    }
}

#[derive(Default)]
struct Inner {
    negotiating: HashMap<String, SessionHandle>,
    authenticated: HashMap<String, HashMap<String, SessionHandle>>,
}

/// Two maps under one reader-writer lock: pre-auth streams keyed by
/// stream-id, and post-auth streams keyed by `localpart -> resource`.
///
/// A session appears in exactly one of the two maps at any instant (or
/// neither, transiently, while `promote` moves it from one to the other).
pub struct SessionRegistry {
    inner: RwLock<Inner>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Called at accept, before stream negotiation starts.
    pub async fn insert_negotiating(&self, handle: SessionHandle) {
        let mut inner = self.inner.write().await;
        inner.negotiating.insert(handle.stream_id.clone(), handle);
    }

    /// Called at SASL success: removes the session from `negotiating` and
    /// inserts it into `authenticated[local][resource]` under its rotated
    /// stream-id. `resource` may be empty here — bind hasn't necessarily
    /// run yet — in which case the caller MUST follow up with
    /// [`Self::rekey_resource`] once a real resource is assigned.
    pub async fn promote(&self, old_stream_id: &str, local: String, resource: String, handle: SessionHandle) {
        let mut inner = self.inner.write().await;
        inner.negotiating.remove(old_stream_id);
        inner.authenticated.entry(local).or_default().insert(resource, handle);
    }

    /// Called at resource bind, once the real resource is known: moves the
    /// session from its SASL-time placeholder key to its bound resource.
    pub async fn rekey_resource(&self, local: &str, old_resource: &str, new_resource: String) {
        if old_resource == new_resource {
            return;
        }
        let mut inner = self.inner.write().await;
        let Some(resources) = inner.authenticated.get_mut(local) else {
            warn!(local, "rekey_resource: no authenticated entry for local");
            return;
        };
        let Some(handle) = resources.remove(old_resource) else {
            warn!(local, old_resource, "rekey_resource: no session at old resource");
            return;
        };
        resources.insert(new_resource, handle);
    }

    /// Called at disconnect while still pre-auth.
    pub async fn remove_negotiating(&self, stream_id: &str) -> Option<SessionHandle> {
        self.inner.write().await.negotiating.remove(stream_id)
    }

    /// Called at disconnect once authenticated.
    pub async fn remove_authenticated(&self, local: &str, resource: &str) -> Option<SessionHandle> {
        let mut inner = self.inner.write().await;
        let handle = inner.authenticated.get_mut(local).and_then(|resources| resources.remove(resource));
        if inner.authenticated.get(local).is_some_and(HashMap::is_empty) {
            inner.authenticated.remove(local);
        }
        handle
    }

    /// Every authenticated `(resource, session)` pair for `local`, used for
    /// bare-JID message fan-out where each recipient needs its own full JID.
    pub async fn recipients(&self, local: &str) -> Vec<(String, SessionHandle)> {
        let inner = self.inner.read().await;
        inner
            .authenticated
            .get(local)
            .map(|resources| resources.iter().map(|(resource, handle)| (resource.clone(), handle.clone())).collect())
            .unwrap_or_default()
    }

    /// The single session for `local/resource`, used for directed message
    /// delivery.
    pub async fn recipient(&self, local: &str, resource: &str) -> Option<SessionHandle> {
        let inner = self.inner.read().await;
        inner.authenticated.get(local).and_then(|resources| resources.get(resource)).cloned()
    }

    /// Every live session, negotiating or authenticated. Used only at
    /// shutdown.
    pub async fn for_each_active(&self, mut f: impl FnMut(&SessionHandle)) {
        let inner = self.inner.read().await;
        for handle in inner.negotiating.values() {
            f(handle);
        }
        for resources in inner.authenticated.values() {
            for handle in resources.values() {
                f(handle);
            }
        }
    }

    #[cfg(test)]
    async fn negotiating_len(&self) -> usize {
        self.inner.read().await.negotiating.len()
    }

    #[cfg(test)]
    async fn authenticated_len(&self) -> usize {
        self.inner.read().await.authenticated.values().map(HashMap::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(stream_id: &str) -> (SessionHandle, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(8);
        (SessionHandle::new(stream_id, tx), rx)
    }

    #[tokio::test]
    async fn insert_then_promote_moves_session_between_maps() {
        let registry = SessionRegistry::new();
        let (h, _rx) = handle("stream-1");
        registry.insert_negotiating(h.clone()).await;
        assert_eq!(registry.negotiating_len().await, 1);

        registry.promote("stream-1", "alice".to_string(), String::new(), h).await;
        assert_eq!(registry.negotiating_len().await, 0);
        assert_eq!(registry.authenticated_len().await, 1);
        assert!(registry.recipient("alice", "").await.is_some());
    }

    #[tokio::test]
    async fn rekey_resource_moves_session_to_new_key() {
        let registry = SessionRegistry::new();
        let (h, _rx) = handle("stream-1");
        registry.insert_negotiating(h.clone()).await;
        registry.promote("stream-1", "alice".to_string(), String::new(), h).await;

        registry.rekey_resource("alice", "", "home".to_string()).await;
        assert!(registry.recipient("alice", "").await.is_none());
        assert!(registry.recipient("alice", "home").await.is_some());
    }

    #[tokio::test]
    async fn recipients_returns_every_resource_for_local() {
        let registry = SessionRegistry::new();
        let (phone, _rx1) = handle("s1");
        let (desktop, _rx2) = handle("s2");
        registry.insert_negotiating(phone.clone()).await;
        registry.insert_negotiating(desktop.clone()).await;
        registry.promote("s1", "bob".to_string(), "phone".to_string(), phone).await;
        registry.promote("s2", "bob".to_string(), "desktop".to_string(), desktop).await;

        let recipients = registry.recipients("bob").await;
        assert_eq!(recipients.len(), 2);
        let mut resources: Vec<_> = recipients.iter().map(|(resource, _)| resource.as_str()).collect();
        resources.sort_unstable();
        assert_eq!(resources, ["desktop", "phone"]);
    }

    #[tokio::test]
    async fn remove_authenticated_drops_empty_local_entry() {
        let registry = SessionRegistry::new();
        let (h, _rx) = handle("s1");
        registry.insert_negotiating(h.clone()).await;
        registry.promote("s1", "alice".to_string(), "home".to_string(), h).await;

        let removed = registry.remove_authenticated("alice", "home").await;
        assert!(removed.is_some());
        assert_eq!(registry.authenticated_len().await, 0);
        assert!(registry.recipient("alice", "home").await.is_none());
    }

    #[tokio::test]
    async fn for_each_active_visits_negotiating_and_authenticated() {
        let registry = SessionRegistry::new();
        let (pre_auth, _rx1) = handle("s1");
        let (post_auth, _rx2) = handle("s2");
        registry.insert_negotiating(pre_auth).await;
        registry.insert_negotiating(post_auth.clone()).await;
        registry.promote("s2", "alice".to_string(), "home".to_string(), post_auth).await;

        let mut seen = 0;
        registry.for_each_active(|_| seen += 1).await;
        assert_eq!(seen, 2);
    }
}
