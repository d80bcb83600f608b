//! The per-connection stream engine: the state machine that drives one
//! client from TCP accept through stream negotiation, SASL PLAIN
//! authentication, resource bind, and into ordinary stanza routing.
//!
//! One engine owns one connection exclusively — it is the only task that
//! ever calls into its [`StreamWriter`]. Other tasks reach it only through
//! the [`SessionHandle`] clone held in the registry, which hands stanzas
//! over a channel this engine drains in the same `select!` as its inbound
//! XML stream.

use std::sync::Arc;

use anyhow::Error;
use base64::Engine as _;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::{debug, instrument, warn};

use xmpp_auth::{AuthVerifier, VerifyOutcome};
use xmpp_core::jid::Jid;
use xmpp_core::stanza::{self, StanzaErrorCondition, StanzaErrorType, StreamErrorCondition};
use xmpp_core::stream_id;
use xmpp_core::xml::namespaces;
use xmpp_core::xml::stream_parser::rusty_xml::StreamParser as RustyXmlStreamParser;
use xmpp_core::xml::stream_parser::{Frame, StanzaTooLarge, StreamHeader, StreamParser as _};
use xmpp_core::xml::stream_writer::{OutgoingStreamHeader, StreamWriter};
use xmpp_core::xml::Element;
use xmpp_registry::{Outbound, SessionHandle, SessionRegistry};

use crate::{bind, iq, message};

const SASL_MECHANISMS: &[&str] = &["PLAIN"];
const OUTBOX_CHANNEL_CAPACITY: usize = 16;

/// The engine's view of its own connection lifecycle. All states also
/// transition directly to `Closed` on I/O failure. There is no separate
/// "closing" state: the outbound `</stream:stream>` handshake is tracked by
/// `closing_stream` instead, since a connection can reach `Closed` either
/// through that handshake or through an abrupt I/O failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    AwaitStreamOpen,
    AwaitAuth,
    AwaitStreamReopen,
    AwaitBind,
    Active,
    Closed,
}

/// The server's own identity, fixed at boot.
#[derive(Debug, Clone)]
pub struct ServerIdentity {
    pub name: String,
    pub domain: Jid,
}

/// Everything an engine needs that isn't specific to one connection.
#[derive(Clone)]
pub struct EngineConfig {
    pub server: ServerIdentity,
    pub registry: Arc<SessionRegistry>,
    pub auth: Arc<dyn AuthVerifier>,
}

pub struct StreamEngine<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> {
    reader: RustyXmlStreamParser<R>,
    writer: StreamWriter<W>,
    outbox_tx: mpsc::Sender<Outbound>,
    outbox_rx: mpsc::Receiver<Outbound>,
    config: EngineConfig,
    state: State,
    jid: Jid,
    /// Current registry key for this session: a stream-id pre-auth, then
    /// `(local, resource)` post-auth. `resource` here tracks the `R` half
    /// of that key so bind can re-key it once the real resource is known.
    stream_id: String,
    resource_key: String,
    authenticated: bool,
    closing_stream: bool,
}

/// Splits `socket` and runs a [`StreamEngine`] to completion. Intended to
/// be spawned by the server supervisor's accept loop, one task per
/// connection.
pub async fn handle_connection<S>(socket: S, config: EngineConfig)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(socket);
    StreamEngine::new(read_half, write_half, config).run().await;
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> StreamEngine<R, W> {
    pub fn new(reader: R, writer: W, config: EngineConfig) -> Self {
        let (outbox_tx, outbox_rx) = mpsc::channel(OUTBOX_CHANNEL_CAPACITY);
        let jid = Jid::domain_only(config.server.domain.domain.clone());
        Self {
            reader: RustyXmlStreamParser::new(reader),
            writer: StreamWriter::new(writer),
            outbox_tx,
            outbox_rx,
            config,
            state: State::AwaitStreamOpen,
            jid,
            stream_id: stream_id::generate(),
            resource_key: String::new(),
            authenticated: false,
            closing_stream: false,
        }
    }

    #[instrument(name = "stream_engine", skip(self), fields(stream_id = %self.stream_id))]
    pub async fn run(mut self) {
        self.config
            .registry
            .insert_negotiating(SessionHandle::new(self.stream_id.clone(), self.outbox_tx.clone()))
            .await;

        loop {
            tokio::select! {
                frame = self.reader.next() => {
                    match frame {
                        Some(Ok(frame)) => self.handle_frame(frame).await,
                        Some(Err(err)) => {
                            self.handle_decode_error(err).await;
                            break;
                        }
                        None => {
                            debug!("connection closed without a stream end tag");
                            break;
                        }
                    }
                }
                outbound = self.outbox_rx.recv() => {
                    match outbound {
                        Some(Outbound::Stanza(element)) => {
                            if self.writer.write_xml_element(&element).await.is_err() {
                                break;
                            }
                        }
                        Some(Outbound::Shutdown) => {
                            self.fatal_stream_error(StreamErrorCondition::SystemShutdown).await;
                            break;
                        }
                        None => unreachable!("engine holds its own outbox sender for its whole lifetime"),
                    }
                }
            }

            if self.state == State::Closed {
                break;
            }
        }

        self.cleanup().await;
    }

    async fn cleanup(&mut self) {
        if self.authenticated {
            self.config.registry.remove_authenticated(&self.jid.local, &self.resource_key).await;
        } else {
            self.config.registry.remove_negotiating(&self.stream_id).await;
        }
    }

    async fn handle_frame(&mut self, frame: Frame) {
        match frame {
            Frame::StreamStart(header) => self.handle_stream_start(header).await,
            Frame::XmlFragment(element) => self.handle_element(element).await,
            Frame::StreamEnd => self.handle_stream_end().await,
        }
    }

    async fn handle_decode_error(&mut self, err: Error) {
        if err.downcast_ref::<StanzaTooLarge>().is_some() {
            warn!(error = %err, "stanza exceeded the size limit before closing");
            self.fatal_stream_error(StreamErrorCondition::PolicyViolation).await;
        } else {
            warn!(error = %err, "closing stream after a decode error");
            self.fatal_stream_error(StreamErrorCondition::BadFormat).await;
        }
    }

    async fn handle_stream_end(&mut self) {
        if !self.closing_stream {
            let _ = self.writer.write_stream_close().await;
            self.closing_stream = true;
        }
        self.state = State::Closed;
    }

    async fn fatal_stream_error(&mut self, condition: StreamErrorCondition) {
        let _ = self.writer.write_xml_element(&stanza::stream_error(condition)).await;
        let _ = self.writer.write_stream_close().await;
        self.closing_stream = true;
        self.state = State::Closed;
    }

    async fn handle_stream_start(&mut self, header: StreamHeader) {
        match self.state {
            State::AwaitStreamOpen | State::AwaitStreamReopen => {
                let host_ok = header.to.as_ref().is_some_and(|to| to.domain == self.config.server.domain.domain);
                if !host_ok {
                    self.fatal_stream_error(StreamErrorCondition::HostUnknown).await;
                    return;
                }
                if let Some(from) = &header.from {
                    if !from.domain.is_empty() && from.domain != self.config.server.domain.domain {
                        self.fatal_stream_error(StreamErrorCondition::InvalidFrom).await;
                        return;
                    }
                }

                if self.state == State::AwaitStreamOpen {
                    if self.writer.write_xml_declaration().await.is_err() {
                        self.state = State::Closed;
                        return;
                    }
                }

                let header = OutgoingStreamHeader {
                    from: &self.config.server.domain,
                    id: &self.stream_id,
                    language: "en",
                };
                if self.writer.write_stream_header(&header).await.is_err() {
                    self.state = State::Closed;
                    return;
                }
                let features = stanza::stream_features(self.authenticated, SASL_MECHANISMS);
                if self.writer.write_xml_element(&features).await.is_err() {
                    self.state = State::Closed;
                    return;
                }

                self.state = if self.authenticated { State::AwaitBind } else { State::AwaitAuth };
            }
            _ => self.fatal_stream_error(StreamErrorCondition::BadFormat).await,
        }
    }

    async fn handle_element(&mut self, element: Element) {
        match self.state {
            State::AwaitStreamOpen | State::AwaitStreamReopen => {
                self.fatal_stream_error(StreamErrorCondition::BadFormat).await;
            }
            State::AwaitAuth => self.handle_sasl_auth(element).await,
            State::AwaitBind => {
                if element.validate("iq", namespaces::XMPP_CLIENT) {
                    self.handle_iq(element).await;
                } else {
                    warn!(stanza = %element.name, "ignoring non-IQ stanza before resource bind");
                }
            }
            State::Active => self.handle_active_element(element).await,
            State::Closed => {}
        }
    }

    async fn handle_active_element(&mut self, element: Element) {
        if element.validate("iq", namespaces::XMPP_CLIENT) {
            self.handle_iq(element).await;
        } else if element.validate("presence", namespaces::XMPP_CLIENT) {
            debug!("presence received; subscription storage is out of scope");
        } else if element.validate("message", namespaces::XMPP_CLIENT) {
            message::route(&self.config.registry, &element, &self.jid).await;
        } else {
            warn!(stanza = %element.name, "ignoring unrecognized top-level stanza");
        }
    }

    async fn handle_sasl_auth(&mut self, element: Element) {
        if !element.validate("auth", namespaces::XMPP_SASL) {
            warn!(stanza = %element.name, "ignoring non-auth stanza before authentication");
            return;
        }

        let decoded = match base64::engine::general_purpose::STANDARD.decode(element.text()) {
            Ok(bytes) => bytes,
            Err(_) => {
                self.fatal_stream_error(StreamErrorCondition::NotAuthorized).await;
                return;
            }
        };

        let mut segments = decoded.split(|&b| b == 0).map(|segment| String::from_utf8_lossy(segment).into_owned());
        let (Some(_authzid), Some(authn), Some(credential), None) =
            (segments.next(), segments.next(), segments.next(), segments.next())
        else {
            self.fatal_stream_error(StreamErrorCondition::NotAuthorized).await;
            return;
        };

        match self.config.auth.verify(&authn, &credential).await {
            Ok(VerifyOutcome::Accepted { localpart, resource }) => {
                self.complete_authentication(localpart.unwrap_or(authn), resource).await;
            }
            Ok(VerifyOutcome::Rejected { reason }) => {
                debug!(reason, "SASL PLAIN credentials rejected");
                self.send_sasl_failure().await;
            }
            Err(err) => {
                warn!(error = %err, "auth verifier failed");
                self.send_sasl_failure().await;
            }
        }
    }

    async fn send_sasl_failure(&mut self) {
        let failure = stanza::sasl_failure("not-authorized", "Invalid username or password");
        if self.writer.write_xml_element(&failure).await.is_err() {
            self.state = State::Closed;
        }
    }

    async fn complete_authentication(&mut self, local: String, resource: Option<String>) {
        if self.writer.write_xml_element(&stanza::sasl_success()).await.is_err() {
            self.state = State::Closed;
            return;
        }

        self.authenticated = true;
        self.jid.local = local;
        self.resource_key = resource.unwrap_or_default();
        self.jid.resource = self.resource_key.clone();

        let new_stream_id = stream_id::generate();
        let handle = SessionHandle::new(new_stream_id.clone(), self.outbox_tx.clone());
        self.config
            .registry
            .promote(&self.stream_id, self.jid.local.clone(), self.resource_key.clone(), handle)
            .await;
        self.stream_id = new_stream_id;
        self.state = State::AwaitStreamReopen;
    }

    async fn handle_iq(&mut self, element: Element) {
        let id = element.attribute("id").unwrap_or("").to_string();
        let iq_type = element.attribute("type").unwrap_or("").to_string();

        if let Some(from_attr) = element.attribute("from") {
            let from: Jid = from_attr.parse().unwrap();
            if from != self.jid {
                self.fatal_stream_error(StreamErrorCondition::InvalidFrom).await;
                return;
            }
        }

        if element.child_element_count() != 1 {
            let error = stanza::iq_stanza_error(&id, &self.server_jid(), &self.jid, StanzaErrorType::Modify, StanzaErrorCondition::BadRequest);
            let _ = self.writer.write_xml_element(&error).await;
            return;
        }

        if let Some(to_attr) = element.attribute("to") {
            let to: Jid = to_attr.parse().unwrap();
            if !to.domain.is_empty() && to.domain != self.config.server.domain.domain {
                let error =
                    stanza::iq_stanza_error(&id, &self.server_jid(), &self.jid, StanzaErrorType::Cancel, StanzaErrorCondition::ServiceUnavailable);
                let _ = self.writer.write_xml_element(&error).await;
                return;
            }
        }

        let child = element.child_elements().next().expect("child_element_count confirmed exactly one").clone();

        if child.validate("bind", namespaces::XMPP_BIND) && iq_type == stanza::IQ_TYPE_SET {
            self.handle_bind(&id, child).await;
            return;
        }

        let reply = iq::dispatch(&child, &iq_type, &id, &self.server_jid(), &self.jid, &self.config.server.name);
        let _ = self.writer.write_xml_element(&reply).await;
    }

    async fn handle_bind(&mut self, id: &str, bind_element: Element) {
        let old_resource = self.resource_key.clone();
        let resource = bind::requested_resource(&bind_element).unwrap_or_else(|| self.stream_id.clone());
        self.jid.resource = resource.clone();

        self.config.registry.rekey_resource(&self.jid.local, &old_resource, resource.clone()).await;
        self.resource_key = resource;

        let reply = stanza::bind_result(id, &self.server_jid(), &self.jid);
        if self.writer.write_xml_element(&reply).await.is_err() {
            self.state = State::Closed;
            return;
        }
        self.state = State::Active;
    }

    fn server_jid(&self) -> Jid {
        self.config.server.domain.clone()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use xmpp_auth::AuthError;

    use super::*;

    struct FakeVerifier;

    #[async_trait]
    impl AuthVerifier for FakeVerifier {
        async fn verify(&self, username: &str, credential: &str) -> Result<VerifyOutcome, AuthError> {
            if username == "alice" && credential == "secret" {
                Ok(VerifyOutcome::Accepted { localpart: None, resource: None })
            } else {
                Ok(VerifyOutcome::Rejected { reason: "bad credentials".to_string() })
            }
        }
    }

    fn test_config() -> EngineConfig {
        EngineConfig {
            server: ServerIdentity { name: "xmppd".to_string(), domain: "localhost".parse().unwrap() },
            registry: Arc::new(SessionRegistry::new()),
            auth: Arc::new(FakeVerifier),
        }
    }

    fn spawn_engine(config: EngineConfig) -> tokio::io::DuplexStream {
        let (client, server) = tokio::io::duplex(8192);
        tokio::spawn(handle_connection(server, config));
        client
    }

    async fn open_stream(client: &mut tokio::io::DuplexStream, to: &str) -> String {
        client
            .write_all(
                format!(
                    "<?xml version='1.0'?><stream:stream xmlns:stream='http://etherx.jabber.org/streams' xmlns='jabber:client' to='{to}' version='1.0'>"
                )
                .as_bytes(),
            )
            .await
            .unwrap();
        let mut buf = vec![0u8; 8192];
        let n = client.read(&mut buf).await.unwrap();
        String::from_utf8_lossy(&buf[..n]).into_owned()
    }

    #[tokio::test]
    async fn happy_login_through_bind() {
        let mut client = spawn_engine(test_config());

        let response = open_stream(&mut client, "localhost").await;
        assert!(response.contains("<stream:stream"));
        assert!(response.contains("PLAIN"));

        let auth_payload = base64::engine::general_purpose::STANDARD.encode(b"\0alice\0secret");
        client
            .write_all(format!("<auth xmlns='urn:ietf:params:xml:ns:xmpp-sasl' mechanism='PLAIN'>{auth_payload}</auth>").as_bytes())
            .await
            .unwrap();
        let mut buf = vec![0u8; 8192];
        let n = client.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).contains("<success"));

        client
            .write_all(b"<stream:stream xmlns:stream='http://etherx.jabber.org/streams' xmlns='jabber:client' to='localhost' version='1.0'>")
            .await
            .unwrap();
        let n = client.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).contains("<bind"));

        client
            .write_all(b"<iq type='set' id='bind1'><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'><resource>home</resource></bind></iq>")
            .await
            .unwrap();
        let n = client.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).contains("alice@localhost/home"));
    }

    #[tokio::test]
    async fn wrong_password_keeps_stream_open() {
        let mut client = spawn_engine(test_config());
        open_stream(&mut client, "localhost").await;

        let auth_payload = base64::engine::general_purpose::STANDARD.encode(b"\0alice\0wrong");
        client
            .write_all(format!("<auth xmlns='urn:ietf:params:xml:ns:xmpp-sasl' mechanism='PLAIN'>{auth_payload}</auth>").as_bytes())
            .await
            .unwrap();
        let mut buf = vec![0u8; 8192];
        let n = client.read(&mut buf).await.unwrap();
        let response = String::from_utf8_lossy(&buf[..n]);
        assert!(response.contains("<failure"));
        assert!(response.contains("not-authorized"));
    }

    #[tokio::test]
    async fn unknown_host_closes_the_stream() {
        let mut client = spawn_engine(test_config());
        let response = open_stream(&mut client, "example.org").await;
        assert!(response.contains("host-unknown"));
        assert!(response.contains("</stream:stream>"));
    }

    #[tokio::test]
    async fn malformed_sasl_payload_closes_without_authenticating() {
        let mut client = spawn_engine(test_config());
        open_stream(&mut client, "localhost").await;

        let bad_payload = base64::engine::general_purpose::STANDARD.encode(b"only-one-segment");
        client
            .write_all(format!("<auth xmlns='urn:ietf:params:xml:ns:xmpp-sasl' mechanism='PLAIN'>{bad_payload}</auth>").as_bytes())
            .await
            .unwrap();
        let mut buf = vec![0u8; 8192];
        let n = client.read(&mut buf).await.unwrap();
        let response = String::from_utf8_lossy(&buf[..n]);
        assert!(response.contains("not-authorized"));
        assert!(response.contains("</stream:stream>"));
    }

    #[tokio::test]
    async fn graceful_shutdown_sends_system_shutdown_and_closes() {
        let registry = Arc::new(SessionRegistry::new());
        let config = EngineConfig { registry: registry.clone(), ..test_config() };
        let mut client = spawn_engine(config);
        open_stream(&mut client, "localhost").await;

        let mut handles = Vec::new();
        registry.for_each_active(|h| handles.push(h.clone())).await;
        assert_eq!(handles.len(), 1);
        handles[0].send_shutdown().await.unwrap();

        let mut buf = vec![0u8; 8192];
        let n = client.read(&mut buf).await.unwrap();
        let response = String::from_utf8_lossy(&buf[..n]);
        assert!(response.contains("system-shutdown"));
    }
}
