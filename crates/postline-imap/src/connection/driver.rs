//! The connection task.
//!
//! One task owns the socket. It writes whatever the [`Protocol`] queued,
//! feeds everything it reads through the [`WireParser`], hands
//! notifications to the [`EventHandler`] and runs the keepalive timer.
//! Callers never touch the socket; they lock the protocol, queue a command
//! and wake the task.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Notify;
use tokio::time::{Instant, sleep_until};

use super::stream::ImapStream;
use crate::error::TimeoutSource;
use crate::handler::EventHandler;
use crate::parser::{WireEvent, WireParser};
use crate::protocol::{Protocol, SessionState};
use crate::{Error, Result};

const READ_BUFFER: usize = 8192;

/// State shared between the client handles and the connection task.
#[derive(Debug)]
pub(crate) struct Shared {
    protocol: Mutex<Protocol>,
    wake: Notify,
}

impl Shared {
    pub(crate) fn new(protocol: Protocol) -> Arc<Self> {
        Arc::new(Self {
            protocol: Mutex::new(protocol),
            wake: Notify::new(),
        })
    }

    /// Locks the protocol. Never held across an await.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Protocol> {
        self.protocol.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wakes the connection task after the protocol changed.
    pub(crate) fn wake(&self) {
        self.wake.notify_one();
    }
}

/// Everything the connection task needs besides the shared state.
pub(crate) struct Driver {
    pub(crate) shared: Arc<Shared>,
    pub(crate) stream: ImapStream,
    pub(crate) handler: Box<dyn EventHandler>,
    pub(crate) host: String,
    pub(crate) tls: Option<Arc<rustls::ClientConfig>>,
    pub(crate) socket_timeout: Option<Duration>,
}

enum Step {
    Continue,
    Closed(Option<Error>),
}

impl Driver {
    /// Runs until the transport closes.
    pub(crate) async fn run(self) {
        let Self {
            shared,
            mut stream,
            mut handler,
            host,
            tls,
            socket_timeout,
        } = self;
        let mut parser = WireParser::new();
        let mut buf = BytesMut::with_capacity(READ_BUFFER);
        let mut last_read = Instant::now();

        let outcome = loop {
            if let Err(err) = flush(&shared, &mut stream).await {
                break Some(err);
            }
            dispatch_notifications(&shared, handler.as_mut());

            let upgrade = shared.lock().take_upgrade();
            if upgrade {
                let leftover = parser.buffered();
                parser.reset();
                buf.clear();
                if leftover > 0 || shared.lock().upgrade_tainted() {
                    let err = Error::Negotiation(
                        "Server sent plaintext data after the STARTTLS response".into(),
                    );
                    finish(&shared, handler.as_mut(), Some(err));
                    return;
                }
                stream = match stream.upgrade_to_tls(&host, tls.clone()).await {
                    Ok(upgraded) => upgraded,
                    Err(err) => {
                        finish(&shared, handler.as_mut(), Some(err));
                        return;
                    }
                };
                shared.lock().upgraded();
                continue;
            }

            if shared.lock().needs_resume() {
                // Lets the task awaiting the completion queue its next
                // command before keepalive claims the connection.
                tokio::task::yield_now().await;
                shared.lock().resume(Instant::now());
                continue;
            }

            let (state, busy, deadline) = {
                let protocol = shared.lock();
                (protocol.state(), protocol.is_busy(), protocol.poll_timeout())
            };
            match state {
                SessionState::Disconnected => break None,
                SessionState::Closing if !busy => break None,
                _ => {}
            }

            let inactive = socket_timeout.map(|limit| last_read + limit);
            let step = tokio::select! {
                () = shared.wake.notified() => Step::Continue,
                read = stream.read_buf(&mut buf) => match read {
                    Ok(0) => Step::Closed(None),
                    Ok(n) => {
                        last_read = Instant::now();
                        tracing::trace!(bytes = n, "<= read");
                        parser.feed(&buf);
                        buf.clear();
                        process_events(&shared, &mut parser).await;
                        Step::Continue
                    }
                    Err(err) => Step::Closed(Some(err.into())),
                },
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    shared.lock().handle_timeout(Instant::now());
                    Step::Continue
                }
                () = sleep_until(inactive.unwrap_or_else(Instant::now)), if inactive.is_some() => {
                    Step::Closed(Some(Error::Timeout(TimeoutSource::Socket)))
                }
            };
            if let Step::Closed(error) = step {
                break error;
            }
        };

        if let Err(err) = stream.shutdown().await {
            tracing::debug!(%err, "shutdown failed");
        }
        finish(&shared, handler.as_mut(), outcome);
    }
}

async fn flush(shared: &Shared, stream: &mut ImapStream) -> Result<()> {
    let transmits: Vec<_> = {
        let mut protocol = shared.lock();
        std::iter::from_fn(|| protocol.poll_transmit()).collect()
    };
    if transmits.is_empty() {
        return Ok(());
    }
    for transmit in &transmits {
        tracing::trace!("=> {}", transmit.log);
        stream.write_all(&transmit.data).await?;
    }
    stream.flush().await?;
    Ok(())
}

async fn process_events(shared: &Shared, parser: &mut WireParser) {
    while let Some(event) = parser.next_event() {
        match event {
            WireEvent::BodyData(bytes) => {
                let sink = shared.lock().body_sink();
                let Some(sink) = sink else {
                    continue;
                };
                // Waiting here stops socket reads until the reader catches up.
                if sink.send(bytes).await.is_err() {
                    tracing::debug!("body reader dropped, discarding section");
                    shared.lock().discard_body();
                }
            }
            WireEvent::Response(response) => {
                tracing::trace!(?response, "<=");
                shared.lock().handle_event(WireEvent::Response(response), Instant::now());
            }
            event => shared.lock().handle_event(event, Instant::now()),
        }
    }
}

fn dispatch_notifications(shared: &Shared, handler: &mut dyn EventHandler) {
    loop {
        let Some(notification) = shared.lock().poll_notification() else {
            return;
        };
        handler.dispatch(notification);
    }
}

fn finish(shared: &Shared, handler: &mut dyn EventHandler, error: Option<Error>) {
    shared.lock().transport_closed(error);
    dispatch_notifications(shared, handler);
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
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::sync::{mpsc, oneshot};

    use super::*;
    use crate::command::{Command, CommandKind};
    use crate::fetch::MessageEvent;
    use crate::handler::{ChannelHandler, Notification};
    use crate::protocol::{Settings, section_key};

    fn spawn(
        settings: Settings,
    ) -> (Arc<Shared>, tokio::io::DuplexStream, mpsc::UnboundedReceiver<Notification>) {
        let (client, server) = tokio::io::duplex(1024);
        let mut protocol = Protocol::new(settings);
        protocol.set_state(SessionState::Authenticated);
        let shared = Shared::new(protocol);
        let (handler, notes) = ChannelHandler::new();
        let driver = Driver {
            shared: Arc::clone(&shared),
            stream: ImapStream::plain(client),
            handler: Box::new(handler),
            host: "localhost".into(),
            tls: None,
            socket_timeout: None,
        };
        tokio::spawn(driver.run());
        (shared, server, notes)
    }

    fn no_keepalive() -> Settings {
        Settings {
            keepalive: None,
            ..Settings::default()
        }
    }

    async fn next_note(notes: &mut mpsc::UnboundedReceiver<Notification>) -> Notification {
        // Fails the test rather than hanging it when nothing is notified.
        tokio::time::timeout(Duration::from_secs(5), notes.recv()).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_command_round_trip() {
        let (shared, server, mut notes) = spawn(no_keepalive());
        let (read, mut write) = tokio::io::split(server);
        let mut lines = BufReader::new(read).lines();

        let (tx, rx) = oneshot::channel();
        let select = Command::builder("SELECT")
            .quoted("INBOX")
            .kind(CommandKind::Select {
                name: "INBOX".into(),
            })
            .build();
        shared.lock().submit(select, tx);
        shared.wake();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "A0 SELECT \"INBOX\"");
        write.write_all(b"* 5 EXISTS\r\nA0 OK [READ-WRITE] done\r\n").await.unwrap();
        rx.await.unwrap().unwrap();

        let (tx, rx) = oneshot::channel();
        shared.lock().submit(Command::builder("NOOP").build(), tx);
        shared.wake();

        assert_eq!(lines.next_line().await.unwrap().unwrap(), "A1 NOOP");
        write.write_all(b"* 3 EXPUNGE\r\nA1 OK done\r\n").await.unwrap();
        let completion = rx.await.unwrap().unwrap();
        assert_eq!(completion.text, "done");
        assert!(matches!(next_note(&mut notes).await, Notification::Expunge(3)));
        assert_eq!(shared.lock().mailbox().unwrap().messages.total, 4);
    }

    #[tokio::test]
    async fn test_expunge_without_mailbox_is_not_notified() {
        let (shared, server, mut notes) = spawn(no_keepalive());
        let (read, mut write) = tokio::io::split(server);
        let mut lines = BufReader::new(read).lines();

        let (tx, rx) = oneshot::channel();
        shared.lock().submit(Command::builder("NOOP").build(), tx);
        shared.wake();

        assert_eq!(lines.next_line().await.unwrap().unwrap(), "A0 NOOP");
        write.write_all(b"* 3 EXPUNGE\r\nA0 OK done\r\n").await.unwrap();
        assert_eq!(rx.await.unwrap().unwrap().text, "done");

        drop(write);
        drop(lines);
        assert!(matches!(next_note(&mut notes).await, Notification::Close { .. }));
    }

    #[tokio::test]
    async fn test_fragmented_reads_reassemble() {
        use tokio_test::io::Builder;

        let mock = Builder::new()
            .write(b"A0 NOOP\r\n")
            .read(b"* 1 FETCH (UID 7 FLA")
            .read(b"GS (\\Seen))\r\nA0 O")
            .read(b"K done\r\n")
            .build();
        let mut protocol = Protocol::new(no_keepalive());
        protocol.set_state(SessionState::Authenticated);
        let shared = Shared::new(protocol);
        let (handler, mut notes) = ChannelHandler::new();
        let driver = Driver {
            shared: Arc::clone(&shared),
            stream: ImapStream::plain(mock),
            handler: Box::new(handler),
            host: "localhost".into(),
            tls: None,
            socket_timeout: None,
        };

        let (tx, rx) = oneshot::channel();
        shared.lock().submit(Command::builder("NOOP").build(), tx);
        tokio::spawn(driver.run());

        assert_eq!(rx.await.unwrap().unwrap().text, "done");
        match next_note(&mut notes).await {
            Notification::Update { seqno, attributes } => {
                assert_eq!(seqno, 1);
                assert_eq!(attributes.uid, Some(7));
                assert_eq!(attributes.flags, Some(vec!["\\Seen".to_string()]));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_plaintext_after_starttls_aborts_upgrade() {
        let (shared, server, mut notes) = spawn(no_keepalive());
        let (read, mut write) = tokio::io::split(server);
        let mut lines = BufReader::new(read).lines();

        let (tx, rx) = oneshot::channel();
        let starttls = Command::builder("STARTTLS").kind(CommandKind::StartTls).build();
        shared.lock().submit(starttls, tx);
        shared.wake();

        assert_eq!(lines.next_line().await.unwrap().unwrap(), "A0 STARTTLS");
        write
            .write_all(b"A0 OK Begin TLS\r\n* CAPABILITY IMAP4rev1 INJECTED\r\n* OK [ALERT] pa")
            .await
            .unwrap();
        assert!(rx.await.unwrap().is_ok());

        let mut negotiation = false;
        loop {
            match next_note(&mut notes).await {
                Notification::Error(Error::Negotiation(text)) => {
                    negotiation = text.contains("STARTTLS");
                }
                Notification::Close { had_error } => {
                    assert!(had_error);
                    break;
                }
                _ => {}
            }
        }
        assert!(negotiation);
        assert!(!shared.lock().capabilities().has("INJECTED"));
        assert_eq!(shared.lock().state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_server_close_fails_pending() {
        let (shared, server, mut notes) = spawn(no_keepalive());
        let (tx, rx) = oneshot::channel();
        shared.lock().submit(Command::builder("NOOP").build(), tx);
        shared.wake();

        let mut lines = BufReader::new(server).lines();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "A0 NOOP");
        drop(lines);

        assert!(matches!(rx.await.unwrap(), Err(Error::Closed)));
        assert!(matches!(next_note(&mut notes).await, Notification::Close { had_error: false }));
        assert_eq!(shared.lock().state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_body_backpressure_pauses_reading() {
        let settings = Settings {
            keepalive: None,
            body_buffer: 1,
            ..Settings::default()
        };
        let (shared, server, _notes) = spawn(settings);
        let (read, mut write) = tokio::io::split(server);
        let mut lines = BufReader::new(read).lines();

        let command = Command::builder("FETCH")
            .atom("1 (BODY.PEEK[TEXT])")
            .kind(CommandKind::Fetch {
                items: Vec::new(),
                bodies: vec![section_key("TEXT")],
            })
            .build();
        let (tx, mut done) = oneshot::channel();
        let (sink, mut messages) = mpsc::unbounded_channel();
        shared.lock().submit_fetch(command, tx, sink);
        shared.wake();
        lines.next_line().await.unwrap().unwrap();

        write.write_all(b"* 1 FETCH (BODY[TEXT] {12}\r\nhello").await.unwrap();
        let mut message = messages.recv().await.unwrap();
        let Some(MessageEvent::Body(body, _)) = message.next_event().await else {
            panic!("expected body");
        };

        // "hello" fills the channel, so the rest of the literal and the
        // completion behind it wait until the body is read.
        write.write_all(b" world!)\r\nA0 OK done\r\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(done.try_recv().is_err());

        assert_eq!(&body.collect().await[..], b"hello world!");
        assert!(done.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_socket_timeout_closes_with_error() {
        let (client, _server) = tokio::io::duplex(64);
        let shared = Shared::new(Protocol::new(no_keepalive()));
        let (handler, mut notes) = ChannelHandler::new();
        let driver = Driver {
            shared: Arc::clone(&shared),
            stream: ImapStream::plain(client),
            handler: Box::new(handler),
            host: "localhost".into(),
            tls: None,
            socket_timeout: Some(Duration::from_secs(30)),
        };
        let task = tokio::spawn(driver.run());
        task.await.unwrap();

        match next_note(&mut notes).await {
            Notification::Error(Error::Timeout(TimeoutSource::Socket)) => {}
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(next_note(&mut notes).await, Notification::Close { had_error: true }));
    }
}
