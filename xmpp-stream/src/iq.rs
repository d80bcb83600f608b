//! The non-bind IQ dispatch table (RFC 6120 §8, plus the synthetic
//! discovery/vcard/roster/ping results this server answers with instead of
//! owning real persistence for them).

use xmpp_core::jid::Jid;
use xmpp_core::stanza::{self, StanzaErrorCondition, StanzaErrorType, IQ_TYPE_GET, IQ_TYPE_SET};
use xmpp_core::xml::namespaces;
use xmpp_core::xml::Element;

/// Builds the reply for every IQ child element except `{bind}bind`, which
/// the engine handles separately because it needs mutable access to the
/// session's state and the registry.
pub fn dispatch(child: &Element, iq_type: &str, id: &str, server: &Jid, client: &Jid, server_name: &str) -> Element {
    if child.validate("session", namespaces::XMPP_SESSION) && iq_type == IQ_TYPE_SET {
        stanza::iq_empty_result(id, server, client)
    } else if child.validate("vCard", namespaces::VCARD_TEMP) {
        stanza::vcard_empty_result(id, server, client)
    } else if child.validate("query", namespaces::DISCO_INFO) && iq_type == IQ_TYPE_GET {
        stanza::disco_info_result(id, server, client, server_name)
    } else if child.validate("query", namespaces::DISCO_ITEMS) && iq_type == IQ_TYPE_GET {
        stanza::disco_items_empty_result(id, server, client)
    } else if child.validate("query", namespaces::ROSTER) && iq_type == IQ_TYPE_GET {
        stanza::roster_empty_result(id, server, client)
    } else if child.validate("ping", namespaces::PING) && iq_type == IQ_TYPE_GET {
        stanza::iq_empty_result(id, server, client)
    } else {
        stanza::iq_stanza_error(id, server, client, StanzaErrorType::Cancel, StanzaErrorCondition::FeatureNotImplemented)
    }
}
