//! Message stanza routing (RFC 6121 §5): fan-out to every resource of a
//! bare-JID recipient, or direct delivery to one full JID.

use tracing::debug;
use xmpp_core::jid::Jid;
use xmpp_core::stanza;
use xmpp_core::xml::Element;
use xmpp_registry::SessionRegistry;

/// Relays `element` (a `<message>` the sender already addressed) to every
/// session that should receive it, rewriting `from`/`to` per recipient.
/// Silently drops the stanza if `to` is missing/empty or no session
/// matches — message delivery has no error path back to the sender.
pub async fn route(registry: &SessionRegistry, element: &Element, sender: &Jid) {
    let Some(to_attr) = element.attribute("to") else {
        debug!("dropping message with no 'to' attribute");
        return;
    };
    let to: Jid = to_attr.parse().unwrap();
    if to.local.is_empty() {
        debug!("dropping message addressed to an empty localpart");
        return;
    }
    if !to.domain.is_empty() && to.domain != sender.domain {
        debug!(to = %to, "dropping message addressed to a foreign domain");
        return;
    }

    let id = element.attribute("id").unwrap_or("");
    let msg_type = element.attribute("type");
    let payload: Vec<Element> = element.child_elements().cloned().collect();
    let from = sender.bare();

    let recipients = if to.resource.is_empty() {
        registry.recipients(&to.local).await
    } else {
        registry
            .recipient(&to.local, &to.resource)
            .await
            .into_iter()
            .map(|handle| (to.resource.clone(), handle))
            .collect()
    };

    if recipients.is_empty() {
        debug!(to = %to, "message dropped: no authenticated session for recipient");
        return;
    }

    for (resource, handle) in recipients {
        let full_to = to.with_resource(resource);
        let outgoing = stanza::message(id, &from, &full_to, msg_type, payload.clone());
        let _ = handle.send_stanza(outgoing).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xmpp_registry::{Outbound, SessionHandle};

    fn message_to(to: &str) -> Element {
        let to_jid: Jid = to.parse().unwrap();
        let sender: Jid = "alice@localhost/home".parse().unwrap();
        stanza::message("m1", &sender, &to_jid, Some("chat"), vec![Element::new("body", None::<String>).with_text("hi")])
    }

    async fn authenticate(registry: &SessionRegistry, stream_id: &str, local: &str, resource: &str) -> tokio::sync::mpsc::Receiver<Outbound> {
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        let handle = SessionHandle::new(stream_id, tx);
        registry.insert_negotiating(handle.clone()).await;
        registry.promote(stream_id, local.to_string(), resource.to_string(), handle).await;
        rx
    }

    #[tokio::test]
    async fn fans_out_to_every_resource_of_a_bare_recipient() {
        let registry = SessionRegistry::new();
        let mut phone_rx = authenticate(&registry, "s1", "bob", "phone").await;
        let mut desktop_rx = authenticate(&registry, "s2", "bob", "desktop").await;

        let sender: Jid = "alice@localhost/home".parse().unwrap();
        route(&registry, &message_to("bob@localhost"), &sender).await;

        for rx in [&mut phone_rx, &mut desktop_rx] {
            match rx.recv().await.unwrap() {
                Outbound::Stanza(el) => {
                    assert_eq!(el.attribute("from"), Some("alice@localhost"));
                    assert!(el.attribute("to").unwrap().starts_with("bob@localhost/"));
                }
                Outbound::Shutdown => panic!("expected a stanza"),
            }
        }
    }

    #[tokio::test]
    async fn directed_message_only_reaches_named_resource() {
        let registry = SessionRegistry::new();
        let mut phone_rx = authenticate(&registry, "s1", "bob", "phone").await;
        let mut desktop_rx = authenticate(&registry, "s2", "bob", "desktop").await;

        let sender: Jid = "alice@localhost/home".parse().unwrap();
        route(&registry, &message_to("bob@localhost/phone"), &sender).await;

        match phone_rx.recv().await.unwrap() {
            Outbound::Stanza(el) => assert_eq!(el.attribute("to"), Some("bob@localhost/phone")),
            Outbound::Shutdown => panic!("expected a stanza"),
        }
        assert!(desktop_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn drops_message_with_no_matching_session() {
        let registry = SessionRegistry::new();
        let sender: Jid = "alice@localhost/home".parse().unwrap();
        route(&registry, &message_to("nobody@localhost"), &sender).await;
    }

    #[tokio::test]
    async fn drops_message_addressed_to_a_foreign_domain() {
        let registry = SessionRegistry::new();
        let mut bob_rx = authenticate(&registry, "s1", "bob", "phone").await;

        let sender: Jid = "alice@localhost/home".parse().unwrap();
        route(&registry, &message_to("bob@example.org"), &sender).await;

        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn drops_message_with_missing_to() {
        let registry = SessionRegistry::new();
        let sender: Jid = "alice@localhost/home".parse().unwrap();
        let element = stanza::message("m1", &sender, &sender, None, vec![]);
        let mut element = element;
        element.attributes.remove(&("to".to_string(), None));
        route(&registry, &element, &sender).await;
    }
}
