use std::collections::HashMap;

use anyhow::{anyhow, Error};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::jid::Jid;
use crate::xml::namespaces;
use crate::xml::{Element, Node};

/// Attributes of an outgoing `<stream:stream>` open tag. Unlike a parsed
/// [`super::stream_parser::StreamHeader`], `id` is mandatory here: the
/// caller (the stream engine) owns stream-id lifecycle and always supplies
/// one, whether freshly generated or rotated after authentication.
pub struct OutgoingStreamHeader<'a> {
    pub from: &'a Jid,
    pub id: &'a str,
    pub language: &'a str,
}

pub struct StreamWriter<W: AsyncWrite + Unpin> {
    writer: W,
    namespaces: Vec<HashMap<String, String>>,
}

impl<W: AsyncWrite + Unpin> StreamWriter<W> {
    pub fn new(writer: W) -> Self {
        let mut root = HashMap::new();
        root.insert(namespaces::XML.to_string(), "xml".to_string());
        root.insert(namespaces::XMLNS.to_string(), "xmlns".to_string());

        Self {
            writer,
            namespaces: vec![root],
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    pub async fn write_xml_declaration(&mut self) -> Result<(), Error> {
        self.write_str("<?xml version='1.0'?>").await
    }

    pub async fn write_stream_header(&mut self, header: &OutgoingStreamHeader<'_>) -> Result<(), Error> {
        let mut attributes = HashMap::new();
        attributes.insert(("from".to_string(), None), header.from.to_full_string());
        attributes.insert(("id".to_string(), None), header.id.to_string());
        attributes.insert(("version".to_string(), None), "1.0".to_string());
        attributes.insert(
            ("lang".to_string(), Some(namespaces::XML.to_string())),
            header.language.to_string(),
        );
        attributes.insert(("xmlns".to_string(), None), namespaces::XMPP_CLIENT.to_string());
        attributes.insert(
            ("stream".to_string(), Some(namespaces::XMLNS.to_string())),
            namespaces::JABBER_STREAMS.to_string(),
        );

        let stream_element = Element {
            name: "stream".to_string(),
            namespace: Some(namespaces::JABBER_STREAMS.to_string()),
            attributes,
            children: vec![],
        };

        let opening_tag = self.build_opening_tag(&stream_element, false);
        self.write_str(&opening_tag).await
    }

    pub async fn write_stream_close(&mut self) -> Result<(), Error> {
        let stream_element = Element {
            name: "stream".to_string(),
            namespace: Some(namespaces::JABBER_STREAMS.to_string()),
            attributes: HashMap::new(),
            children: vec![],
        };

        let closing_tag = self.build_closing_tag(&stream_element);
        self.write_str(&closing_tag).await
    }

    pub async fn write_xml_element(&mut self, element: &Element) -> Result<(), Error> {
        let xml = self.build_xml_element(element);
        self.write_str(&xml).await
    }

    async fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.writer.write_all(bytes).await.map_err(|err| anyhow!(err))?;
        self.writer.flush().await.map_err(|err| anyhow!(err))
    }

    async fn write_str(&mut self, string: &str) -> Result<(), Error> {
        tracing::trace!(xml = string, "writing stream bytes");
        self.write_bytes(string.as_bytes()).await
    }

    fn lookup_namespace_prefix(&self, namespace: &str) -> Option<&str> {
        self.namespaces
            .iter()
            .rev()
            .find_map(|scope| scope.get(namespace))
            .map(String::as_str)
    }

    fn build_xml_element(&mut self, element: &Element) -> String {
        let mut xml = String::new();

        if !element.children.is_empty() {
            xml.push_str(&self.build_opening_tag(element, false));
            xml.push_str(&self.build_children(element));
            xml.push_str(&self.build_closing_tag(element));
        } else {
            xml.push_str(&self.build_opening_tag(element, true));
        }

        xml
    }

    fn build_opening_tag(&mut self, element: &Element, self_closing: bool) -> String {
        let mut xml = String::new();

        let mut scope = HashMap::new();
        for ((attribute, namespace), value) in &element.attributes {
            match namespace {
                Some(namespace) if namespace == namespaces::XMLNS => {
                    scope.insert(value.clone(), attribute.clone());
                }
                None if attribute == "xmlns" => {
                    scope.insert(value.clone(), String::new());
                }
                _ => {}
            }
        }
        self.namespaces.push(scope);

        match &element.namespace {
            Some(namespace) => match self.lookup_namespace_prefix(namespace) {
                Some("") => xml.push_str(&format!("<{}{}", element.name, self.build_attributes(element))),
                Some(prefix) => xml.push_str(&format!("<{}:{}{}", prefix, element.name, self.build_attributes(element))),
                None => {
                    // First use of this namespace in the current scope: declare it inline
                    // as this element's default namespace, the way minidom-style writers do.
                    self.namespaces
                        .last_mut()
                        .expect("root scope always present")
                        .insert(namespace.clone(), String::new());
                    xml.push_str(&format!(
                        r#"<{} xmlns="{}"{}"#,
                        element.name,
                        escape_attribute(namespace),
                        self.build_attributes(element)
                    ));
                }
            },
            None => xml.push_str(&format!("<{}{}", element.name, self.build_attributes(element))),
        }

        if self_closing {
            self.namespaces.pop();
            xml.push_str("/>");
        } else {
            xml.push('>');
        }

        xml
    }

    fn build_attributes(&self, element: &Element) -> String {
        let mut xml = String::new();

        for ((attribute, namespace), value) in &element.attributes {
            let escaped = escape_attribute(value);
            match namespace {
                Some(namespace) => match self.lookup_namespace_prefix(namespace) {
                    Some("") => debug_assert!(false, "cannot use default namespace for attribute"),
                    Some(prefix) => xml.push_str(&format!(r#" {prefix}:{attribute}="{escaped}""#)),
                    None => debug_assert!(false, "namespace not declared: {namespace}"),
                },
                None => xml.push_str(&format!(r#" {attribute}="{escaped}""#)),
            }
        }

        xml
    }

    fn build_children(&mut self, element: &Element) -> String {
        let mut xml = String::new();

        for child in &element.children {
            match child {
                Node::Element(child_element) => xml.push_str(&self.build_xml_element(child_element)),
                Node::Text(text) => xml.push_str(&escape_text(text)),
                Node::CData(cdata) => xml.push_str(&format!("<![CDATA[{cdata}]]>")),
                Node::Comment(comment) => xml.push_str(&format!("<!--{comment}-->")),
                Node::ProcessingInstruction(pi) => xml.push_str(&format!("<?{pi}?>")),
            }
        }

        xml
    }

    fn build_closing_tag(&mut self, element: &Element) -> String {
        let mut xml = String::new();

        match &element.namespace {
            Some(namespace) => match self.lookup_namespace_prefix(namespace) {
                Some("") => xml.push_str(&format!("</{}>", element.name)),
                Some(prefix) => xml.push_str(&format!("</{}:{}>", prefix, element.name)),
                None => debug_assert!(false, "namespace not declared: {namespace}"),
            },
            None => xml.push_str(&format!("</{}>", element.name)),
        }

        self.namespaces.pop();
        xml
    }
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn escape_attribute(value: &str) -> String {
    escape_text(value).replace('"', "&quot;")
}
