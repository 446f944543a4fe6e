//! Async IMAP client.
//!
//! A [`Client`] is a cheap handle to one connection. Every operation queues
//! a command on the connection task and awaits its completion, so handles
//! can be cloned and used from several tasks; commands still go out one at
//! a time in the order they were queued.
//!
//! Message operations address messages by UID. The same operations by
//! sequence number live on [`Client::seq`].
//!
//! # Example
//!
//! ```ignore
//! use postline_imap::{Client, Config, FetchOptions, LoggingHandler, OpenOptions, SequenceSet};
//!
//! let config = Config::builder("imap.example.com").login("user", "secret").build();
//! let client = Client::connect(config, LoggingHandler).await?;
//!
//! client.open_box("INBOX", OpenOptions::read_only()).await?;
//! let messages = client
//!     .fetch(&SequenceSet::parse("1:10")?, &FetchOptions::new().headers())?
//!     .all()
//!     .await?;
//! client.end().await?;
//! ```

#![allow(clippy::missing_errors_doc)]

mod mailbox;
mod message;
mod server;

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, timeout, timeout_at};

pub use self::mailbox::{OpenOptions, QresyncParams};
pub use self::message::{AppendOptions, AppendUid, CopyUid, EsearchReturn, Messages, SearchResults};
pub use self::server::IdFields;
use crate::command::{Command, CommandKind};
use crate::connection::driver::{Driver, Shared};
use crate::connection::{AutoTls, Config, Credentials, ImapStream, Transport, connect};
use crate::error::TimeoutSource;
use crate::fetch::FetchMessage;
use crate::handler::{EventHandler, Notification};
use crate::parser::{Namespaces, quote};
use crate::protocol::{Completion, Mailbox, Protocol, SessionState};
use crate::types::Capabilities;
use crate::{Error, Result};

/// Handle to one IMAP connection.
#[derive(Debug, Clone)]
pub struct Client {
    shared: Arc<Shared>,
}

impl Client {
    /// Connects, negotiates TLS and logs in.
    ///
    /// The whole sequence is limited by [`Config::conn_timeout`]. On
    /// failure the connection is torn down and `handler` sees the error.
    pub async fn connect(config: Config, handler: impl EventHandler + 'static) -> Result<Self> {
        let deadline = Instant::now() + config.conn_timeout;
        let stream = timeout_at(deadline, connect(&config))
            .await
            .map_err(|_| Error::Timeout(TimeoutSource::Connect))??;
        Self::start(stream, config, Box::new(handler), deadline).await
    }

    /// Runs the session over an already open transport.
    ///
    /// The transport is treated as plaintext: STARTTLS follows
    /// [`Config::starttls_policy`]. Pass a TLS stream with
    /// [`Security::Implicit`](crate::Security::Implicit) to skip it.
    pub async fn from_transport(
        transport: impl Transport,
        config: Config,
        handler: impl EventHandler + 'static,
    ) -> Result<Self> {
        let deadline = Instant::now() + config.conn_timeout;
        Self::start(ImapStream::plain(transport), config, Box::new(handler), deadline).await
    }

    async fn start(
        stream: ImapStream,
        config: Config,
        handler: Box<dyn EventHandler>,
        deadline: Instant,
    ) -> Result<Self> {
        let mut protocol = Protocol::new(config.settings());
        let (greeting_tx, greeting) = oneshot::channel();
        protocol.await_greeting(greeting_tx);

        let shared = Shared::new(protocol);
        let secure = stream.is_tls() || config.starttls_policy() == AutoTls::Never;
        let driver = Driver {
            shared: Arc::clone(&shared),
            stream,
            handler,
            host: config.host.clone(),
            tls: config.tls.clone(),
            socket_timeout: config.socket_timeout,
        };
        tokio::spawn(driver.run());

        let client = Self { shared };
        let outcome = match timeout_at(deadline, client.login(&config, greeting, secure)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::Timeout(TimeoutSource::Connect)),
        };
        match outcome {
            Ok(()) => Ok(client),
            Err(err) => {
                tracing::warn!(%err, "login failed");
                client.teardown(Some(err.duplicate()));
                Err(err)
            }
        }
    }

    async fn login(
        &self,
        config: &Config,
        greeting: oneshot::Receiver<Result<bool>>,
        mut secure: bool,
    ) -> Result<()> {
        let preauth = greeting.await.map_err(|_| Error::Closed)??;

        loop {
            self.exec(Command::builder("CAPABILITY").kind(CommandKind::Capability).build())
                .await?;
            if secure || preauth {
                break;
            }
            if self.server_supports("STARTTLS") {
                self.exec(Command::builder("STARTTLS").kind(CommandKind::StartTls).build())
                    .await?;
                secure = true;
            } else if config.starttls_policy() == AutoTls::Required {
                return Err(Error::capability("STARTTLS"));
            } else {
                break;
            }
        }

        if !preauth {
            let command = self.auth_command(&config.credentials)?;
            self.shared.lock().set_state(SessionState::Authenticating);
            timeout(config.auth_timeout, self.exec(command))
                .await
                .map_err(|_| Error::Timeout(TimeoutSource::Auth))??;
            tracing::info!(host = %config.host, "authenticated");
        }

        if self.capabilities().is_empty() {
            self.exec(Command::builder("CAPABILITY").kind(CommandKind::Capability).build())
                .await?;
        }
        if self.server_supports("QRESYNC") {
            self.exec(Command::builder("ENABLE").atom("QRESYNC").build()).await?;
        }
        if self.server_supports("NAMESPACE") {
            self.exec(Command::builder("NAMESPACE").build()).await?;
        }
        self.exec(Command::builder("LIST").atom("\"\" \"\"").kind(CommandKind::Delimiter).build())
            .await?;

        {
            let mut protocol = self.shared.lock();
            protocol.set_state(SessionState::Authenticated);
            protocol.notify(Notification::Ready);
        }
        self.shared.wake();
        Ok(())
    }

    fn auth_command(&self, credentials: &Credentials) -> Result<Command> {
        let caps = self.capabilities();
        let command = match credentials {
            Credentials::XOAuth(token) if caps.has_auth("XOAUTH") => {
                Command::builder("AUTHENTICATE XOAUTH")
                    .atom(token)
                    .kind(CommandKind::Authenticate)
                    .redact("AUTHENTICATE XOAUTH ***")
            }
            Credentials::XOAuth2(token) if caps.has_auth("XOAUTH2") => {
                Command::builder("AUTHENTICATE XOAUTH2")
                    .atom(token)
                    .kind(CommandKind::Authenticate)
                    .redact("AUTHENTICATE XOAUTH2 ***")
            }
            Credentials::Login { user, password } => {
                if caps.has("LOGINDISABLED") {
                    return Err(Error::Negotiation(
                        "Logging in is disabled on this server".to_string(),
                    ));
                }
                Command::builder("LOGIN")
                    .string(user)
                    .string(password)
                    .kind(CommandKind::Login)
                    .redact(&format!("LOGIN {} ***", quote(user)))
            }
            _ => {
                return Err(Error::Negotiation(
                    "No supported authentication method(s) available. Unable to login.".to_string(),
                ));
            }
        };
        Ok(command.build())
    }

    // === Session ===

    /// Logs out and closes the connection.
    pub async fn end(&self) -> Result<()> {
        let result = self
            .exec(Command::builder("LOGOUT").kind(CommandKind::Logout).build())
            .await;
        self.destroy();
        result.map(|_| ())
    }

    /// Closes the connection at once, failing every pending command.
    pub fn destroy(&self) {
        self.teardown(None);
    }

    fn teardown(&self, error: Option<Error>) {
        self.shared.lock().transport_closed(error);
        self.shared.wake();
    }

    /// Returns the session state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.shared.lock().state()
    }

    /// Returns the server capabilities.
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        self.shared.lock().capabilities().clone()
    }

    /// Checks if the server advertises a capability.
    #[must_use]
    pub fn server_supports(&self, capability: &str) -> bool {
        self.shared.lock().capabilities().has(capability)
    }

    /// Returns the hierarchy delimiter learned during login.
    #[must_use]
    pub fn delimiter(&self) -> Option<String> {
        self.shared.lock().delimiter().map(str::to_string)
    }

    /// Returns the namespaces, when the server supports NAMESPACE.
    #[must_use]
    pub fn namespaces(&self) -> Option<Namespaces> {
        self.shared.lock().namespaces().cloned()
    }

    /// Returns a snapshot of the selected mailbox.
    #[must_use]
    pub fn mailbox(&self) -> Option<Mailbox> {
        self.shared.lock().mailbox().cloned()
    }

    /// Sequence-number forms of the message operations.
    #[must_use]
    pub const fn seq(&self) -> Messages<'_> {
        Messages::new(self, false)
    }

    /// UID forms of the message operations, also available on the client
    /// itself.
    #[must_use]
    pub const fn uid(&self) -> Messages<'_> {
        Messages::new(self, true)
    }

    // === Command execution ===

    /// Queues a raw command and waits for its completion.
    ///
    /// Use this for extensions the client does not model. Untagged data
    /// received meanwhile is returned in [`Completion::data`].
    pub async fn exec(&self, command: Command) -> Result<Completion> {
        let (tx, rx) = oneshot::channel();
        self.submit(command, tx)?;
        rx.await.map_err(|_| Error::Closed)?
    }

    fn submit(&self, command: Command, reply: oneshot::Sender<Result<Completion>>) -> Result<()> {
        {
            let mut protocol = self.shared.lock();
            if protocol.state() == SessionState::Disconnected {
                return Err(Error::Closed);
            }
            protocol.submit(command, reply);
        }
        self.shared.wake();
        Ok(())
    }

    fn submit_fetch(
        &self,
        command: Command,
        reply: oneshot::Sender<Result<Completion>>,
        sink: mpsc::UnboundedSender<FetchMessage>,
    ) -> Result<()> {
        {
            let mut protocol = self.shared.lock();
            if protocol.state() == SessionState::Disconnected {
                return Err(Error::Closed);
            }
            protocol.submit_fetch(command, reply, sink);
        }
        self.shared.wake();
        Ok(())
    }

    fn require(&self, capability: &'static str) -> Result<()> {
        if self.server_supports(capability) {
            Ok(())
        } else {
            Err(Error::capability(capability))
        }
    }

    fn require_authenticated(&self) -> Result<()> {
        if self.state().is_authenticated() {
            Ok(())
        } else {
            Err(Error::validation("Not authenticated"))
        }
    }

    fn require_mailbox(&self) -> Result<Mailbox> {
        self.mailbox()
            .ok_or_else(|| Error::validation("No mailbox is currently selected"))
    }

    /// Encodes a mailbox name for the wire.
    fn encode_name(&self, name: &str) -> String {
        self.shared.lock().codec().encode(name).into_owned()
    }

    /// Decodes a mailbox name received from the server.
    fn decode_name(&self, name: &str) -> String {
        self.shared.lock().codec().decode(name).into_owned()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use std::time::Duration;

    use tokio::io::{
        AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf,
    };

    use super::*;
    use crate::connection::Security;
    use crate::handler::ChannelHandler;

    pub(super) struct Server {
        pub(super) lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
        pub(super) write: WriteHalf<DuplexStream>,
    }

    impl Server {
        pub(super) async fn expect(&mut self, line: &str) {
            assert_eq!(self.lines.next_line().await.unwrap().unwrap(), line);
        }

        pub(super) async fn send(&mut self, text: &str) {
            self.write.write_all(text.as_bytes()).await.unwrap();
        }

        pub(super) async fn exchange(&mut self, line: &str, reply: &str) {
            self.expect(line).await;
            self.send(reply).await;
        }
    }

    pub(super) fn config() -> Config {
        Config::builder("localhost")
            .security(Security::None)
            .login("foo", "bar")
            .keepalive(None)
            .build()
    }

    /// Starts a client on a duplex pipe and runs the login exchange for
    /// the given capability list. Returns the next free tag number.
    pub(super) async fn logged_in(caps: &str) -> (Client, Server, usize) {
        let (client_end, server_end) = tokio::io::duplex(4096);
        let (read, write) = tokio::io::split(server_end);
        let mut server = Server {
            lines: BufReader::new(read).lines(),
            write,
        };
        let login =
            tokio::spawn(Client::from_transport(client_end, config(), crate::handler::NoopHandler));

        server.send("* OK ready\r\n").await;
        server
            .exchange("A0 CAPABILITY", &format!("* CAPABILITY IMAP4rev1 {caps}\r\nA0 OK done\r\n"))
            .await;
        server.exchange("A1 LOGIN \"foo\" \"bar\"", "A1 OK logged in\r\n").await;
        server
            .exchange("A2 CAPABILITY", &format!("* CAPABILITY IMAP4rev1 {caps}\r\nA2 OK done\r\n"))
            .await;
        let mut tag = 3;
        if caps.split(' ').any(|c| c == "QRESYNC") {
            server
                .exchange(
                    &format!("A{tag} ENABLE QRESYNC"),
                    &format!("* ENABLED QRESYNC\r\nA{tag} OK done\r\n"),
                )
                .await;
            tag += 1;
        }
        if caps.split(' ').any(|c| c == "NAMESPACE") {
            server
                .exchange(
                    &format!("A{tag} NAMESPACE"),
                    &format!("* NAMESPACE ((\"\" \"/\")) NIL NIL\r\nA{tag} OK done\r\n"),
                )
                .await;
            tag += 1;
        }
        server
            .exchange(
                &format!("A{tag} LIST \"\" \"\""),
                &format!("* LIST (\\Noselect) \"/\" \"\"\r\nA{tag} OK done\r\n"),
            )
            .await;
        let client = login.await.unwrap().unwrap();
        (client, server, tag + 1)
    }

    #[tokio::test]
    async fn test_login_learns_delimiter() {
        let (client, _server, _) = logged_in("IDLE NAMESPACE").await;
        assert_eq!(client.state(), SessionState::Authenticated);
        assert_eq!(client.delimiter().as_deref(), Some("/"));
        assert!(client.server_supports("IDLE"));
        assert!(client.mailbox().is_none());
        assert_eq!(client.namespaces().unwrap().personal.unwrap()[0].prefix, "");
    }

    #[tokio::test]
    async fn test_preauth_skips_login() {
        let (client_end, mut server_end) = tokio::io::duplex(4096);
        let (handler, mut notes) = ChannelHandler::new();
        let login = tokio::spawn(Client::from_transport(client_end, config(), handler));

        server_end
            .write_all(b"* PREAUTH [CAPABILITY IMAP4rev1] hi\r\n")
            .await
            .unwrap();
        let mut server = BufReader::new(server_end);
        let mut line = String::new();
        server.read_line(&mut line).await.unwrap();
        assert_eq!(line, "A0 CAPABILITY\r\n");
        server
            .get_mut()
            .write_all(b"* CAPABILITY IMAP4rev1\r\nA0 OK done\r\n")
            .await
            .unwrap();
        line.clear();
        server.read_line(&mut line).await.unwrap();
        assert_eq!(line, "A1 LIST \"\" \"\"\r\n");
        server.get_mut().write_all(b"A1 OK done\r\n").await.unwrap();

        let client = login.await.unwrap().unwrap();
        assert!(client.state().is_authenticated());
        assert!(matches!(notes.recv().await.unwrap(), Notification::Ready));
    }

    #[tokio::test]
    async fn test_login_disabled_fails() {
        let (client_end, mut server_end) = tokio::io::duplex(4096);
        let (handler, mut notes) = ChannelHandler::new();
        let login = tokio::spawn(Client::from_transport(client_end, config(), handler));

        server_end.write_all(b"* OK ready\r\n").await.unwrap();
        let mut server = BufReader::new(server_end);
        let mut line = String::new();
        server.read_line(&mut line).await.unwrap();
        server
            .get_mut()
            .write_all(b"* CAPABILITY IMAP4rev1 LOGINDISABLED\r\nA0 OK done\r\n")
            .await
            .unwrap();

        let err = login.await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "Logging in is disabled on this server");
        assert!(matches!(notes.recv().await.unwrap(), Notification::Error(Error::Negotiation(_))));
        assert!(matches!(notes.recv().await.unwrap(), Notification::Close { had_error: true }));
    }

    #[tokio::test]
    async fn test_negative_greeting() {
        let (client_end, mut server_end) = tokio::io::duplex(4096);
        let login =
            tokio::spawn(Client::from_transport(client_end, config(), crate::handler::NoopHandler));
        server_end.write_all(b"* BAD go away\r\n").await.unwrap();

        let err = login.await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "Received negative welcome: go away");
    }

    #[tokio::test]
    async fn test_starttls_required_but_missing() {
        let (client_end, mut server_end) = tokio::io::duplex(4096);
        let config = Config::builder("localhost")
            .security(Security::StartTls)
            .login("foo", "bar")
            .keepalive(None)
            .build();
        let login =
            tokio::spawn(Client::from_transport(client_end, config, crate::handler::NoopHandler));

        server_end.write_all(b"* OK ready\r\n").await.unwrap();
        let mut server = BufReader::new(server_end);
        let mut line = String::new();
        server.read_line(&mut line).await.unwrap();
        server
            .get_mut()
            .write_all(b"* CAPABILITY IMAP4rev1\r\nA0 OK done\r\n")
            .await
            .unwrap();

        let err = login.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Capability(ref name) if name == "STARTTLS"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout() {
        let (client_end, _server_end) = tokio::io::duplex(64);
        let config = Config::builder("localhost")
            .security(Security::None)
            .login("foo", "bar")
            .conn_timeout(Duration::from_secs(2))
            .build();
        let err = Client::from_transport(client_end, config, crate::handler::NoopHandler)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(TimeoutSource::Connect)));
    }

    #[tokio::test]
    async fn test_commands_after_destroy_fail() {
        let (client, _server, _) = logged_in("").await;
        client.destroy();
        assert_eq!(client.state(), SessionState::Disconnected);
        let err = client.exec(Command::builder("NOOP").build()).await.unwrap_err();
        assert!(matches!(err, Error::Closed));
    }

    #[tokio::test]
    async fn test_end_sends_logout() {
        let (client, mut server, tag) = logged_in("").await;
        let end = tokio::spawn({
            let client = client.clone();
            async move { client.end().await }
        });
        server
            .exchange(&format!("A{tag} LOGOUT"), &format!("* BYE bye\r\nA{tag} OK done\r\n"))
            .await;
        end.await.unwrap().unwrap();
        assert_eq!(client.state(), SessionState::Disconnected);
    }
}
