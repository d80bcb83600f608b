use std::collections::HashMap;

pub mod namespaces;
pub mod stream_parser;
pub mod stream_writer;

/// A minimal DOM element, namespace-qualified, with ordered children.
///
/// Attribute keys are `(name, namespace)` pairs so that two attributes with
/// the same local name but different namespaces don't collide.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    pub name: String,
    pub namespace: Option<String>,
    pub attributes: HashMap<(String, Option<String>), String>,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
    CData(String),
    Comment(String),
    ProcessingInstruction(String),
}

impl Element {
    pub fn new(name: impl Into<String>, namespace: Option<impl Into<String>>) -> Self {
        Element {
            name: name.into(),
            namespace: namespace.map(Into::into),
            attributes: HashMap::new(),
            children: Vec::new(),
        }
    }

    /// True if this element's local name and namespace match.
    pub fn validate(&self, name: &str, namespace: &str) -> bool {
        self.name == name && self.namespace.as_deref() == Some(namespace)
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|((n, _), _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.attributes.insert((name.into(), None), value.into());
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attribute(name, value);
        self
    }

    pub fn find_child(&self, name: &str, namespace: &str) -> Option<&Element> {
        self.children.iter().find_map(|node| match node {
            Node::Element(el) if el.validate(name, namespace) => Some(el),
            _ => None,
        })
    }

    /// Returns the concatenated text of all direct text/CDATA children.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                Node::Text(t) | Node::CData(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn add_child(&mut self, child: Element) -> &mut Self {
        self.children.push(Node::Element(child));
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.add_child(child);
        self
    }

    pub fn add_text(&mut self, text: impl Into<String>) -> &mut Self {
        self.children.push(Node::Text(text.into()));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.add_text(text);
        self
    }

    /// Number of direct child elements (ignoring text/cdata/comments).
    pub fn child_element_count(&self) -> usize {
        self.children
            .iter()
            .filter(|n| matches!(n, Node::Element(_)))
            .count()
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(el) => Some(el),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_checks_name_and_namespace() {
        let el = Element::new("iq", Some("jabber:client"));
        assert!(el.validate("iq", "jabber:client"));
        assert!(!el.validate("iq", "jabber:server"));
        assert!(!el.validate("message", "jabber:client"));
    }

    #[test]
    fn attribute_round_trip() {
        let mut el = Element::new("iq", Some("jabber:client"));
        el.set_attribute("id", "abc123");
        assert_eq!(el.attribute("id"), Some("abc123"));
        assert_eq!(el.attribute("missing"), None);
    }

    #[test]
    fn find_child_matches_name_and_namespace() {
        let bind = Element::new("bind", Some(namespaces::XMPP_BIND));
        let iq = Element::new("iq", Some(namespaces::XMPP_CLIENT)).with_child(bind);
        assert!(iq.find_child("bind", namespaces::XMPP_BIND).is_some());
        assert!(iq.find_child("session", namespaces::XMPP_BIND).is_none());
    }

    #[test]
    fn text_concatenates_text_nodes() {
        let el = Element::new("auth", Some(namespaces::XMPP_SASL)).with_text("AGFsaWNl");
        assert_eq!(el.text(), "AGFsaWNl");
    }

    #[test]
    fn child_element_count_ignores_text() {
        let iq = Element::new("iq", Some(namespaces::XMPP_CLIENT))
            .with_child(Element::new("bind", Some(namespaces::XMPP_BIND)))
            .with_text("\n");
        assert_eq!(iq.child_element_count(), 1);
    }
}
