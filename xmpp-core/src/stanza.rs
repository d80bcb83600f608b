use crate::jid::Jid;
use crate::xml::namespaces;
use crate::xml::Element;

pub const IQ_TYPE_GET: &str = "get";
pub const IQ_TYPE_SET: &str = "set";
pub const IQ_TYPE_RESULT: &str = "result";
pub const IQ_TYPE_ERROR: &str = "error";

/// RFC 6120 8.3.2 stanza error types used by this server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StanzaErrorType {
    Cancel,
    Modify,
}

impl StanzaErrorType {
    fn as_str(self) -> &'static str {
        match self {
            StanzaErrorType::Cancel => "cancel",
            StanzaErrorType::Modify => "modify",
        }
    }
}

/// RFC 6120 8.3.3 stanza error conditions used by this server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StanzaErrorCondition {
    BadRequest,
    FeatureNotImplemented,
    ServiceUnavailable,
}

impl StanzaErrorCondition {
    fn as_str(self) -> &'static str {
        match self {
            StanzaErrorCondition::BadRequest => "bad-request",
            StanzaErrorCondition::FeatureNotImplemented => "feature-not-implemented",
            StanzaErrorCondition::ServiceUnavailable => "service-unavailable",
        }
    }
}

/// RFC 6120 4.9.3 stream error conditions used by this server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamErrorCondition {
    BadFormat,
    HostUnknown,
    InvalidFrom,
    NotAuthorized,
    PolicyViolation,
    SystemShutdown,
    InternalServerError,
}

impl StreamErrorCondition {
    fn as_str(self) -> &'static str {
        match self {
            StreamErrorCondition::BadFormat => "bad-format",
            StreamErrorCondition::HostUnknown => "host-unknown",
            StreamErrorCondition::InvalidFrom => "invalid-from",
            StreamErrorCondition::NotAuthorized => "not-authorized",
            StreamErrorCondition::PolicyViolation => "policy-violation",
            StreamErrorCondition::SystemShutdown => "system-shutdown",
            StreamErrorCondition::InternalServerError => "internal-server-error",
        }
    }
}

fn condition_element(name: &'static str, namespace: &str) -> Element {
    Element::new(name, Some(namespace.to_string()))
}

/// Builds `<stream:error><CONDITION/></stream:error>`.
pub fn stream_error(condition: StreamErrorCondition) -> Element {
    Element::new("error", Some(namespaces::JABBER_STREAMS.to_string()))
        .with_child(condition_element(condition.as_str(), namespaces::XMPP_STREAM_ERRORS))
}

/// Builds a stanza-error IQ reply: type `error`, echoing `id`, carrying the
/// given error type/condition. `from`/`to` follow the same server-jid /
/// client-jid convention as every other server-originated stanza.
pub fn iq_stanza_error(id: &str, from: &Jid, to: &Jid, error_type: StanzaErrorType, condition: StanzaErrorCondition) -> Element {
    let error = Element::new("error", Some(namespaces::XMPP_CLIENT.to_string()))
        .with_attribute("type", error_type.as_str())
        .with_child(condition_element(condition.as_str(), namespaces::XMPP_STANZAS));

    let mut iq = Element::new("iq", Some(namespaces::XMPP_CLIENT.to_string()))
        .with_attribute("type", IQ_TYPE_ERROR)
        .with_attribute("from", from.to_full_string())
        .with_attribute("to", to.to_full_string());
    if !id.is_empty() {
        iq.set_attribute("id", id);
    }
    iq.with_child(error)
}

pub fn iq_result(id: &str, from: &Jid, to: &Jid) -> Element {
    let mut iq = Element::new("iq", Some(namespaces::XMPP_CLIENT.to_string()))
        .with_attribute("type", IQ_TYPE_RESULT)
        .with_attribute("from", from.to_full_string())
        .with_attribute("to", to.to_full_string());
    if !id.is_empty() {
        iq.set_attribute("id", id);
    }
    iq
}

/// `<mechanisms xmlns='...sasl'><mechanism>PLAIN</mechanism></mechanisms>`
pub fn sasl_mechanisms(mechanisms: &[&str]) -> Element {
    let mut el = Element::new("mechanisms", Some(namespaces::XMPP_SASL.to_string()));
    for mechanism in mechanisms {
        el.add_child(Element::new("mechanism", None::<String>).with_text(*mechanism));
    }
    el
}

pub fn sasl_success() -> Element {
    Element::new("success", Some(namespaces::XMPP_SASL.to_string()))
}

pub fn sasl_failure(condition: &'static str, text: &str) -> Element {
    let mut el = Element::new("failure", Some(namespaces::XMPP_SASL.to_string()))
        .with_child(Element::new(condition, None::<String>));
    if !text.is_empty() {
        el.add_child(Element::new("text", None::<String>).with_text(text));
    }
    el
}

pub fn bind_feature() -> Element {
    Element::new("bind", Some(namespaces::XMPP_BIND.to_string()))
}

pub fn bind_result(id: &str, from: &Jid, jid: &Jid) -> Element {
    let bind = Element::new("bind", Some(namespaces::XMPP_BIND.to_string()))
        .with_child(Element::new("jid", Some(namespaces::XMPP_BIND.to_string())).with_text(jid.to_full_string()));

    let mut iq = Element::new("iq", Some(namespaces::XMPP_CLIENT.to_string()))
        .with_attribute("type", IQ_TYPE_RESULT)
        .with_attribute("from", from.to_full_string())
        .with_attribute("to", jid.to_full_string());
    if !id.is_empty() {
        iq.set_attribute("id", id);
    }
    iq.with_child(bind)
}

pub fn stream_features(authenticated: bool, mechanisms: &[&str]) -> Element {
    let mut features = Element::new("features", Some(namespaces::JABBER_STREAMS.to_string()));
    if authenticated {
        features.add_child(bind_feature());
    } else {
        features.add_child(sasl_mechanisms(mechanisms));
    }
    features
}

/// Empty-result IQ for `{session}session`, `{ping}ping` and similar
/// "acknowledge, no payload" requests.
pub fn iq_empty_result(id: &str, from: &Jid, to: &Jid) -> Element {
    iq_result(id, from, to)
}

/// Synthetic empty vCard, enough for clients to complete login without a
/// real vcard-temp store behind it.
pub fn vcard_empty_result(id: &str, from: &Jid, to: &Jid) -> Element {
    iq_result(id, from, to).with_child(Element::new("vCard", Some(namespaces::VCARD_TEMP.to_string())))
}

/// `disco#info` result: a single `server`/`im` identity and the `iq` feature.
pub fn disco_info_result(id: &str, from: &Jid, to: &Jid, server_name: &str) -> Element {
    let query = Element::new("query", Some(namespaces::DISCO_INFO.to_string()))
        .with_child(
            Element::new("identity", Some(namespaces::DISCO_INFO.to_string()))
                .with_attribute("category", "server")
                .with_attribute("type", "im")
                .with_attribute("name", server_name),
        )
        .with_child(
            Element::new("feature", Some(namespaces::DISCO_INFO.to_string())).with_attribute("var", "iq"),
        );
    iq_result(id, from, to).with_child(query)
}

pub fn disco_items_empty_result(id: &str, from: &Jid, to: &Jid) -> Element {
    iq_result(id, from, to).with_child(Element::new("query", Some(namespaces::DISCO_ITEMS.to_string())))
}

pub fn roster_empty_result(id: &str, from: &Jid, to: &Jid) -> Element {
    iq_result(id, from, to).with_child(Element::new("query", Some(namespaces::ROSTER.to_string())))
}

/// Builds an outbound `<message>` relaying a sender's payload verbatim.
pub fn message(id: &str, from: &Jid, to: &Jid, msg_type: Option<&str>, payload: Vec<Element>) -> Element {
    let mut message = Element::new("message", Some(namespaces::XMPP_CLIENT.to_string()))
        .with_attribute("from", from.to_full_string())
        .with_attribute("to", to.to_full_string());
    if !id.is_empty() {
        message.set_attribute("id", id);
    }
    if let Some(msg_type) = msg_type {
        message.set_attribute("type", msg_type);
    }
    for child in payload {
        message.add_child(child);
    }
    message
}
