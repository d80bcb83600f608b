//! Resource-bind IQ handling (RFC 6120 §7).

use xmpp_core::xml::namespaces;
use xmpp_core::xml::Element;

/// Pulls the client-requested resource out of a `bind` IQ-set payload, if
/// one was supplied and non-empty. Normalization of the requested resource
/// (stripping whitespace, collapsing length) is left for a later revision.
pub fn requested_resource(bind_element: &Element) -> Option<String> {
    let resource = bind_element.find_child("resource", namespaces::XMPP_BIND)?.text();
    if resource.is_empty() {
        None
    } else {
        Some(resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_requested_resource() {
        let bind = Element::new("bind", Some(namespaces::XMPP_BIND.to_string()))
            .with_child(Element::new("resource", Some(namespaces::XMPP_BIND.to_string())).with_text("home"));
        assert_eq!(requested_resource(&bind), Some("home".to_string()));
    }

    #[test]
    fn empty_or_missing_resource_is_none() {
        let bind = Element::new("bind", Some(namespaces::XMPP_BIND.to_string()));
        assert_eq!(requested_resource(&bind), None);

        let bind_with_empty = Element::new("bind", Some(namespaces::XMPP_BIND.to_string()))
            .with_child(Element::new("resource", Some(namespaces::XMPP_BIND.to_string())).with_text(""));
        assert_eq!(requested_resource(&bind_with_empty), None);
    }
}
