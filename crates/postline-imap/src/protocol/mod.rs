//! Sans-I/O command queue and response correlator.
//!
//! [`Protocol`] is a pure state machine. It never touches a socket or a
//! clock: the connection driver feeds it [`WireEvent`]s and the current
//! time, and drains what it produces.
//!
//! - [`Protocol::poll_transmit`] yields bytes to write, in order.
//! - [`Protocol::poll_notification`] yields connection-level events.
//! - [`Protocol::poll_timeout`] reports when the keepalive timer fires;
//!   [`Protocol::handle_timeout`] runs it.
//! - [`Protocol::body_sink`] hands out the channel for the body section
//!   being streamed, so the driver can await capacity before reading more.
//!
//! At most one command is in flight. Commands leave the queue in FIFO order;
//! the internal IDLE and NOOP only ever run when the queue is empty.
//!
//! # Example
//!
//! ```ignore
//! let mut protocol = Protocol::new(Settings::default());
//! let (tx, rx) = tokio::sync::oneshot::channel();
//! protocol.submit(Command::builder("NOOP").build(), tx);
//!
//! while let Some(transmit) = protocol.poll_transmit() {
//!     socket.write_all(&transmit.data).await?;
//! }
//! parser.feed(&bytes_from_server);
//! while let Some(event) = parser.next_event() {
//!     protocol.handle_event(event, Instant::now());
//! }
//! let completion = rx.await??;
//! ```
#![allow(clippy::missing_const_for_fn)]

mod fetch;
mod keepalive;
mod mailbox;
mod state;
mod transmit;

use std::collections::VecDeque;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

pub(crate) use fetch::section_key;
pub use keepalive::{IdlePhase, KEEPALIVE_INTERVAL, Keepalive, MAX_IDLE_WAIT};
pub use mailbox::{Mailbox, MessageCounts};
pub use state::SessionState;
pub use transmit::Transmit;

use self::fetch::FetchAccumulator;
use self::keepalive::{IdleState, KeepaliveAction};
use crate::command::{Command, CommandKind, TagGenerator};
use crate::error::ProtocolErrorKind;
use crate::fetch::{FetchMessage, MessageAttributes};
use crate::handler::Notification;
use crate::mailbox_name::{MailboxNameCodec, ModifiedUtf7};
use crate::parser::{
    Namespaces, Response, Status, StatusText, Tagged, TextCode, Untagged, WireEvent,
};
use crate::types::{Capabilities, SequenceSet};
use crate::{Error, Result};

/// Default capacity, in chunks, of each body stream channel.
pub const DEFAULT_BODY_BUFFER: usize = 16;

/// Outcome of a command that completed with `OK`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    /// Response code of the tagged `OK`, e.g. `APPENDUID`.
    pub code: Option<TextCode>,
    /// Human-readable text.
    pub text: String,
    /// Untagged data received while the command was in flight.
    pub data: Vec<Untagged>,
}

impl Completion {
    /// Returns the response code if its key matches.
    #[must_use]
    pub fn code(&self, key: &str) -> Option<&TextCode> {
        self.code.as_ref().filter(|c| c.key.eq_ignore_ascii_case(key))
    }
}

/// Sender side of a command's result.
pub type Reply = oneshot::Sender<Result<Completion>>;

/// Outcome of the server greeting: `true` for PREAUTH.
pub type Greeting = oneshot::Sender<Result<bool>>;

/// Tunables for a [`Protocol`].
#[derive(Debug, Clone)]
pub struct Settings {
    /// Keepalive scheduling; `None` disables it.
    pub keepalive: Option<Keepalive>,
    /// Capacity, in chunks, of each body stream channel.
    pub body_buffer: usize,
    /// Mailbox-name codec.
    pub codec: Arc<dyn MailboxNameCodec>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            keepalive: Some(Keepalive::default()),
            body_buffer: DEFAULT_BODY_BUFFER,
            codec: Arc::new(ModifiedUtf7),
        }
    }
}

#[derive(Debug)]
struct Pending {
    command: Command,
    reply: Option<Reply>,
    fetch: Option<mpsc::UnboundedSender<FetchMessage>>,
}

#[derive(Debug)]
struct InFlight {
    tag: String,
    kind: CommandKind,
    segments: VecDeque<Vec<u8>>,
    reply: Option<Reply>,
    fetch: Option<FetchAccumulator>,
    data: Vec<Untagged>,
    oauth_error: Option<String>,
}

impl InFlight {
    fn collects(untagged: &Untagged) -> bool {
        matches!(
            untagged,
            Untagged::Capability(_)
                | Untagged::Enabled(_)
                | Untagged::List(_)
                | Untagged::Lsub(_)
                | Untagged::Xlist(_)
                | Untagged::Search { .. }
                | Untagged::Sort(_)
                | Untagged::Thread(_)
                | Untagged::Esearch(_)
                | Untagged::Status(_)
                | Untagged::Namespace(_)
                | Untagged::Quota(_)
                | Untagged::QuotaRoot { .. }
                | Untagged::Metadata(_)
                | Untagged::Id(_)
        )
    }
}

/// Sans-I/O IMAP client state machine.
#[derive(Debug)]
pub struct Protocol {
    state: SessionState,
    tags: TagGenerator,
    queue: VecDeque<Pending>,
    current: Option<InFlight>,
    outbound: VecDeque<Transmit>,
    notifications: VecDeque<Notification>,
    capabilities: Capabilities,
    namespaces: Option<Namespaces>,
    delimiter: Option<String>,
    mailbox: Option<Mailbox>,
    qresync: bool,
    settings: Settings,
    idle: IdleState,
    greeting: Option<Greeting>,
    bye: Option<String>,
    body: Option<mpsc::Sender<Bytes>>,
    upgrade_pending: bool,
    upgrade_tainted: bool,
    resume_pending: bool,
}

impl Protocol {
    /// Creates a protocol for a freshly opened transport.
    #[must_use]
    pub fn new(settings: Settings) -> Self {
        Self {
            state: SessionState::Connected,
            tags: TagGenerator::new(),
            queue: VecDeque::new(),
            current: None,
            outbound: VecDeque::new(),
            notifications: VecDeque::new(),
            capabilities: Capabilities::default(),
            namespaces: None,
            delimiter: None,
            mailbox: None,
            qresync: false,
            settings,
            idle: IdleState::default(),
            greeting: None,
            bye: None,
            body: None,
            upgrade_pending: false,
            upgrade_tainted: false,
            resume_pending: false,
        }
    }

    // === Accessors ===

    /// Returns the session state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns the capabilities learned so far.
    #[must_use]
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Returns the NAMESPACE data, if the server sent it.
    #[must_use]
    pub fn namespaces(&self) -> Option<&Namespaces> {
        self.namespaces.as_ref()
    }

    /// Returns the hierarchy delimiter learned at login.
    #[must_use]
    pub fn delimiter(&self) -> Option<&str> {
        self.delimiter.as_deref()
    }

    /// Returns the selected mailbox.
    #[must_use]
    pub fn mailbox(&self) -> Option<&Mailbox> {
        self.mailbox.as_ref()
    }

    /// Returns the mailbox-name codec.
    #[must_use]
    pub fn codec(&self) -> &Arc<dyn MailboxNameCodec> {
        &self.settings.codec
    }

    /// Whether `ENABLE QRESYNC` succeeded.
    #[must_use]
    pub fn qresync_enabled(&self) -> bool {
        self.qresync
    }

    /// Returns the IDLE progress.
    #[must_use]
    pub fn idle_phase(&self) -> IdlePhase {
        self.idle.phase
    }

    /// Whether a command is in flight.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.current.is_some()
    }

    // === Session mutation used by the client ===

    /// Registers the waiter for the server greeting.
    pub fn await_greeting(&mut self, waiter: Greeting) {
        self.greeting = Some(waiter);
    }

    /// Moves the session to `state`. Becoming authenticated lets the
    /// keepalive scheduler start.
    pub fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            tracing::debug!(from = %self.state, to = %state, "session state");
        }
        if state.is_authenticated() && !self.state.is_authenticated() {
            self.resume_pending = true;
        }
        if !state.is_authenticated() {
            self.idle.reset();
        }
        self.state = state;
    }

    /// Forgets the selected mailbox.
    pub fn clear_mailbox(&mut self) {
        self.mailbox = None;
    }

    /// Renames the selected mailbox record.
    pub fn rename_mailbox(&mut self, name: &str) {
        if let Some(mailbox) = self.mailbox.as_mut() {
            mailbox.name = name.to_string();
        }
    }

    /// Queues a notification for the handler.
    pub fn notify(&mut self, notification: Notification) {
        self.notifications.push_back(notification);
    }

    // === Queue ===

    /// Queues a command; `reply` receives its outcome.
    pub fn submit(&mut self, command: Command, reply: Reply) {
        self.enqueue(
            Pending {
                command,
                reply: Some(reply),
                fetch: None,
            },
            false,
        );
    }

    /// Queues a FETCH whose messages stream into `sink`.
    pub fn submit_fetch(
        &mut self,
        command: Command,
        reply: Reply,
        sink: mpsc::UnboundedSender<FetchMessage>,
    ) {
        self.enqueue(
            Pending {
                command,
                reply: Some(reply),
                fetch: Some(sink),
            },
            false,
        );
    }

    fn enqueue(&mut self, pending: Pending, priority: bool) {
        if priority {
            self.queue.push_front(pending);
        } else {
            self.queue.push_back(pending);
            // Any caller command stops the keepalive scheduler. An IDLE that
            // the server already accepted is ended now; one still waiting
            // for its continuation is ended when the continuation arrives.
            if self.idle.interrupt() {
                tracing::debug!("ending IDLE for queued command");
                self.outbound.push_back(Transmit::line("DONE"));
            }
        }
        self.process_queue();
    }

    fn process_queue(&mut self) {
        if self.current.is_some() || self.upgrade_pending || !self.state.is_writable() {
            return;
        }
        let Some(Pending { command, reply, fetch }) = self.queue.pop_front() else {
            return;
        };

        let log = command.log_text();
        let (kind, segments, nonsync) = command.into_parts();
        let tag = kind.fixed_tag().map_or_else(|| self.tags.next_tag(), str::to_string);
        let mut segments = VecDeque::from(segments);

        let first = segments.pop_front().unwrap_or_default();
        let mut line = Vec::with_capacity(tag.len() + 1 + first.len());
        line.extend_from_slice(tag.as_bytes());
        line.push(b' ');
        line.extend_from_slice(&first);
        tracing::debug!(%tag, command = %log, "dispatch");
        self.outbound.push_back(Transmit::segment(&line, format!("{tag} {log}")));
        if nonsync {
            while let Some(segment) = segments.pop_front() {
                self.outbound.push_back(literal_transmit(&segment));
            }
        }

        let fetch = match (&kind, fetch) {
            (CommandKind::Fetch { items, bodies }, Some(sink)) => {
                Some(FetchAccumulator::new(items.clone(), bodies.clone(), sink))
            }
            _ => None,
        };
        match &kind {
            CommandKind::Select { name } => self.mailbox = Some(Mailbox::new(name)),
            // Servers usually resend capabilities after authentication.
            CommandKind::Login | CommandKind::Authenticate => {
                self.capabilities = Capabilities::default();
            }
            _ => {}
        }

        self.current = Some(InFlight {
            tag,
            kind,
            segments,
            reply,
            fetch,
            data: Vec::new(),
            oauth_error: None,
        });
    }

    // === Output ===

    /// Returns the next bytes to write.
    pub fn poll_transmit(&mut self) -> Option<Transmit> {
        self.outbound.pop_front()
    }

    /// Returns the next notification for the handler.
    pub fn poll_notification(&mut self) -> Option<Notification> {
        self.notifications.pop_front()
    }

    /// Returns the channel of the body section being streamed.
    #[must_use]
    pub fn body_sink(&self) -> Option<mpsc::Sender<Bytes>> {
        self.body.clone()
    }

    /// Drops the rest of the current body section; its reader went away.
    pub fn discard_body(&mut self) {
        self.body = None;
    }

    // === Dispatch pacing ===

    /// Whether a tagged completion is waiting for [`Protocol::resume`].
    ///
    /// The driver yields to the scheduler first, so the task that awaited
    /// the completion can queue its next command before the keepalive
    /// scheduler claims the idle connection.
    #[must_use]
    pub fn needs_resume(&self) -> bool {
        self.resume_pending
    }

    /// Restarts dispatch after a completion.
    pub fn resume(&mut self, now: Instant) {
        self.resume_pending = false;
        if self.queue.is_empty()
            && self.current.is_none()
            && self.state.is_authenticated()
            && !self.idle.enabled
        {
            if let Some(settings) = self.settings.keepalive {
                if self.idle.start(&settings, true, now) {
                    self.keepalive_tick(now);
                }
            }
        }
        self.process_queue();
    }

    /// Whether STARTTLS succeeded and the transport must be upgraded now.
    #[must_use]
    pub fn take_upgrade(&self) -> bool {
        self.upgrade_pending && self.outbound.is_empty()
    }

    /// Whether the server sent anything after its STARTTLS completion.
    ///
    /// Such data arrived in plaintext and was dropped; the upgrade must not
    /// go ahead.
    #[must_use]
    pub fn upgrade_tainted(&self) -> bool {
        self.upgrade_tainted
    }

    /// The transport now runs over TLS; dispatch continues.
    pub fn upgraded(&mut self) {
        tracing::info!("STARTTLS upgraded");
        self.upgrade_pending = false;
        self.process_queue();
    }

    // === Keepalive ===

    /// Returns when the keepalive timer fires next.
    #[must_use]
    pub fn poll_timeout(&self) -> Option<Instant> {
        self.settings.keepalive.and(self.idle.deadline)
    }

    /// Runs the keepalive timer if it is due.
    pub fn handle_timeout(&mut self, now: Instant) {
        if self.idle.deadline.is_some_and(|deadline| deadline <= now) {
            self.keepalive_tick(now);
        }
    }

    fn keepalive_tick(&mut self, now: Instant) {
        let Some(settings) = self.settings.keepalive else {
            return;
        };
        let idle_supported = self.capabilities.has("IDLE");
        match self.idle.tick(&settings, idle_supported, now) {
            KeepaliveAction::None => {}
            KeepaliveAction::Noop => {
                let command = Command::builder("NOOP").kind(CommandKind::Noop).build();
                self.enqueue_internal(command);
            }
            KeepaliveAction::Idle => {
                let command = Command::builder("IDLE").kind(CommandKind::Idle).build();
                self.enqueue_internal(command);
            }
            KeepaliveAction::Done => {
                tracing::debug!("renewing IDLE");
                self.outbound.push_back(Transmit::line("DONE"));
            }
        }
    }

    fn enqueue_internal(&mut self, command: Command) {
        let pending = Pending {
            command,
            reply: None,
            fetch: None,
        };
        self.enqueue(pending, true);
    }

    // === Input ===

    /// Applies one parser event.
    ///
    /// Between the STARTTLS completion and the TLS upgrade nothing is
    /// applied.
    pub fn handle_event(&mut self, event: WireEvent, now: Instant) {
        if self.upgrade_pending {
            tracing::warn!(?event, "dropping plaintext received after STARTTLS");
            self.upgrade_tainted = true;
            return;
        }
        match event {
            WireEvent::Response(Response::Tagged(tagged)) => self.on_tagged(tagged),
            WireEvent::Response(Response::Untagged(untagged)) => self.on_untagged(untagged),
            WireEvent::Response(Response::Continuation(text)) => self.on_continuation(&text, now),
            WireEvent::Response(Response::Other(line)) => self.on_other(&line, now),
            WireEvent::BodyStart { seqno, section, size } => {
                let buffer = self.settings.body_buffer;
                self.body = self
                    .current
                    .as_mut()
                    .and_then(|c| c.fetch.as_mut())
                    .and_then(|acc| acc.body_start(seqno, section, size, buffer));
            }
            WireEvent::BodyData(_) => {}
            WireEvent::BodyEnd => self.body = None,
        }
    }

    fn on_tagged(&mut self, tagged: Tagged) {
        let Some(current) = self.current.take_if(|c| c.tag == tagged.tag) else {
            tracing::warn!(tag = %tagged.tag, "completion for unknown tag");
            return;
        };
        tracing::debug!(tag = %tagged.tag, status = ?tagged.status, "completed");

        if let Some(acc) = current.fetch {
            acc.finish();
        }
        self.body = None;
        self.apply_capability_code(tagged.code.as_ref());

        let result = match tagged.status {
            Status::Ok => {
                match &current.kind {
                    CommandKind::Select { name } => {
                        let read_only = tagged.code.as_ref().is_some_and(|c| c.key == "READ-ONLY");
                        let mailbox = self.mailbox.get_or_insert_with(|| Mailbox::new(name));
                        mailbox.read_only = read_only;
                    }
                    CommandKind::StartTls => {
                        self.capabilities = Capabilities::default();
                        self.upgrade_pending = true;
                    }
                    CommandKind::Close => self.mailbox = None,
                    CommandKind::Logout => self.state = SessionState::Closing,
                    _ => {}
                }
                Ok(Completion {
                    code: tagged.code,
                    text: tagged.text,
                    data: current.data,
                })
            }
            Status::No | Status::Bad => {
                if matches!(current.kind, CommandKind::Select { .. }) {
                    self.mailbox = None;
                }
                let kind = if tagged.status == Status::No {
                    ProtocolErrorKind::No
                } else {
                    ProtocolErrorKind::Bad
                };
                let text = match current.oauth_error {
                    Some(detail) if tagged.text.is_empty() => detail,
                    _ => tagged.text,
                };
                Err(Error::Protocol {
                    kind,
                    code: tagged.code,
                    text,
                })
            }
        };

        if let Some(reply) = current.reply {
            // The caller may have stopped waiting.
            let _ = reply.send(result);
        }
        self.resume_pending = true;
    }

    fn on_continuation(&mut self, text: &StatusText, now: Instant) {
        let Some(current) = self.current.as_mut() else {
            tracing::warn!(text = %text.text, "continuation with nothing in flight");
            return;
        };
        match current.kind {
            CommandKind::Idle => {
                if self.idle.accepted(!self.queue.is_empty(), now) {
                    tracing::debug!("ending IDLE for queued command");
                    self.outbound.push_back(Transmit::line("DONE"));
                }
            }
            CommandKind::Authenticate => {
                let detail = STANDARD
                    .decode(text.text.trim())
                    .map_or_else(
                        |_| text.text.clone(),
                        |raw| String::from_utf8_lossy(&raw).into_owned(),
                    );
                current.oauth_error = Some(detail);
                self.outbound.push_back(Transmit::line(""));
            }
            _ => match current.segments.pop_front() {
                Some(segment) => self.outbound.push_back(literal_transmit(&segment)),
                None => tracing::warn!(tag = %current.tag, "unexpected continuation"),
            },
        }
    }

    fn on_other(&mut self, line: &str, now: Instant) {
        let keepalive_done = line.starts_with("IDLE ") || line.starts_with("NOOP ");
        let internal = self
            .current
            .as_ref()
            .is_some_and(|c| matches!(c.kind, CommandKind::Idle | CommandKind::Noop));
        if !(keepalive_done && internal) {
            tracing::warn!(line, "unrecognized response");
            return;
        }

        let was_noop = self.current.take().is_some_and(|c| c.kind == CommandKind::Noop);
        self.idle.reset();
        if self.queue.is_empty() && self.state.is_authenticated() {
            if let Some(settings) = self.settings.keepalive {
                if self.idle.start(&settings, !was_noop, now) {
                    self.keepalive_tick(now);
                }
            }
        }
        self.process_queue();
    }

    fn selecting(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|c| matches!(c.kind, CommandKind::Select { .. }))
    }

    #[allow(clippy::too_many_lines)]
    fn on_untagged(&mut self, untagged: Untagged) {
        if let Some(current) = self.current.as_mut() {
            if InFlight::collects(&untagged) {
                current.data.push(untagged.clone());
            }
        }

        match untagged {
            Untagged::Ok(text) => self.on_untagged_ok(text),
            Untagged::No(text) | Untagged::Bad(text) => {
                if self.state == SessionState::Connected && self.current.is_none() {
                    if let Some(waiter) = self.greeting.take() {
                        let message = format!("Received negative welcome: {}", text.text);
                        let _ = waiter.send(Err(Error::Negotiation(message.clone())));
                        self.notify(Notification::Error(Error::Negotiation(message)));
                        return;
                    }
                }
                if text.code.as_ref().is_some_and(|c| c.key == "ALERT") {
                    tracing::warn!(alert = %text.text, "server ALERT");
                    self.notify(Notification::Alert(text.text));
                } else {
                    tracing::warn!(text = %text.text, "untagged NO/BAD");
                }
            }
            Untagged::Bye(text) => {
                let expected = self
                    .current
                    .as_ref()
                    .is_some_and(|c| c.kind == CommandKind::Logout);
                if let Some(waiter) = self.greeting.take() {
                    let _ = waiter.send(Err(Error::Bye(text.text.clone())));
                }
                if expected {
                    tracing::debug!(text = %text.text, "BYE");
                } else {
                    tracing::warn!(text = %text.text, "server closing connection");
                    self.notify(Notification::Error(Error::Bye(text.text.clone())));
                }
                self.bye = Some(text.text);
                self.state = SessionState::Closing;
            }
            Untagged::Preauth(text) => {
                if self.state != SessionState::Connected
                    || self.current.is_some()
                    || self.greeting.is_none()
                {
                    tracing::warn!(text = %text.text, "ignoring PREAUTH outside the greeting");
                    return;
                }
                self.apply_capability_code(text.code.as_ref());
                self.state = SessionState::Authenticated;
                if let Some(waiter) = self.greeting.take() {
                    let _ = waiter.send(Ok(true));
                }
            }
            Untagged::Capability(atoms) => self.capabilities = Capabilities::new(atoms),
            Untagged::Enabled(atoms) => {
                if atoms.iter().any(|a| a.eq_ignore_ascii_case("QRESYNC")) {
                    self.qresync = true;
                }
            }
            Untagged::Namespace(namespaces) => self.namespaces = Some(namespaces),
            Untagged::List(entry) => {
                let learning = self
                    .current
                    .as_ref()
                    .is_some_and(|c| c.kind == CommandKind::Delimiter);
                if learning {
                    self.delimiter = entry.delimiter;
                }
            }
            Untagged::Flags(flags) => {
                if let Some(mailbox) = self.mailbox.as_mut() {
                    mailbox.flags = flags;
                }
            }
            Untagged::Recent(count) => {
                if let Some(mailbox) = self.mailbox.as_mut() {
                    mailbox.messages.new = count;
                }
            }
            Untagged::Exists(count) => {
                let announce = self.state.is_authenticated() && !self.selecting();
                let mailbox = self.mailbox.as_mut();
                if let Some(new) = mailbox.and_then(|m| m.apply_exists(count, announce)) {
                    self.notify(Notification::Mail(new));
                }
            }
            Untagged::Expunge(seqno) => {
                let Some(mailbox) = self.mailbox.as_mut() else {
                    tracing::debug!(seqno, "EXPUNGE without a selected mailbox");
                    return;
                };
                mailbox.apply_expunge();
                self.notify(Notification::Expunge(seqno));
            }
            Untagged::Vanished { earlier, uids } => {
                if !earlier {
                    let count = SequenceSet::from_items(&uids).map_or(0, |set| set.cardinality());
                    if let Some(mailbox) = self.mailbox.as_mut() {
                        mailbox.apply_vanished(count);
                    }
                }
                self.notify(Notification::Vanished { uids, earlier });
            }
            Untagged::Fetch { seqno, items } => {
                match self.current.as_mut().and_then(|c| c.fetch.as_mut()) {
                    Some(acc) => acc.fetch_line(seqno, items),
                    None => self.notify(Notification::Update {
                        seqno,
                        attributes: Box::new(MessageAttributes::from_items(items)),
                    }),
                }
            }
            Untagged::Other { name, .. } => tracing::debug!(%name, "unhandled untagged response"),
            _ => {}
        }
    }

    fn on_untagged_ok(&mut self, text: StatusText) {
        self.apply_capability_code(text.code.as_ref());

        if self.state == SessionState::Connected && self.current.is_none() {
            if let Some(waiter) = self.greeting.take() {
                tracing::info!(text = %text.text, "greeting");
                let _ = waiter.send(Ok(false));
                return;
            }
        }

        let Some(code) = text.code else {
            return;
        };
        if code.key == "ALERT" {
            tracing::warn!(alert = %text.text, "server ALERT");
            self.notify(Notification::Alert(text.text));
            return;
        }
        if self.selecting() {
            if let Some(mailbox) = self.mailbox.as_mut() {
                mailbox.apply_code(&code);
            }
        } else if code.key == "UIDVALIDITY" {
            let value = code.item(0).and_then(crate::parser::Value::as_number);
            if let Some(value) = value.and_then(|v| u32::try_from(v).ok()) {
                if let Some(mailbox) = self.mailbox.as_mut() {
                    mailbox.uidvalidity = value;
                }
                self.notify(Notification::UidValidity(value));
            }
        }
    }

    fn apply_capability_code(&mut self, code: Option<&TextCode>) {
        if let Some(code) = code.filter(|c| c.key == "CAPABILITY") {
            let items = code.items().iter().filter_map(crate::parser::Value::to_text);
            self.capabilities = Capabilities::new(items);
        }
    }

    // === Teardown ===

    /// The transport closed or failed. Every pending command is rejected;
    /// `error` is `None` for an orderly close.
    pub fn transport_closed(&mut self, error: Option<Error>) {
        if self.state == SessionState::Disconnected {
            return;
        }
        let had_error = error.is_some();
        let error = error.unwrap_or_else(|| self.bye.clone().map_or(Error::Closed, Error::Bye));
        if had_error {
            tracing::warn!(%error, "connection failed");
            self.notify(Notification::Error(error.duplicate()));
        } else {
            tracing::info!("connection closed");
        }
        self.fail_all(&error);
        self.notify(Notification::Close { had_error });
    }

    /// Rejects every pending command with `error` and disconnects.
    pub fn fail_all(&mut self, error: &Error) {
        self.state = SessionState::Disconnected;
        self.mailbox = None;
        self.body = None;
        self.idle.reset();
        self.upgrade_pending = false;
        self.upgrade_tainted = false;
        self.resume_pending = false;
        self.outbound.clear();

        if let Some(waiter) = self.greeting.take() {
            let _ = waiter.send(Err(error.duplicate()));
        }
        if let Some(current) = self.current.take() {
            if let Some(acc) = current.fetch {
                acc.finish();
            }
            if let Some(reply) = current.reply {
                let _ = reply.send(Err(error.duplicate()));
            }
        }
        for pending in self.queue.drain(..) {
            if let Some(reply) = pending.reply {
                let _ = reply.send(Err(error.duplicate()));
            }
        }
    }
}

fn literal_transmit(segment: &[u8]) -> Transmit {
    Transmit::segment(segment, format!("<{} literal bytes>", segment.len()))
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

    use super::*;
    use crate::fetch::MessageEvent;
    use crate::parser::WireParser;

    struct Harness {
        protocol: Protocol,
        parser: WireParser,
        now: Instant,
    }

    impl Harness {
        fn new(keepalive: Option<Keepalive>) -> Self {
            let settings = Settings {
                keepalive,
                ..Settings::default()
            };
            Self {
                protocol: Protocol::new(settings),
                parser: WireParser::new(),
                now: Instant::now(),
            }
        }

        fn authenticated(keepalive: Option<Keepalive>, caps: &[&str]) -> Self {
            let mut h = Self::new(keepalive);
            h.protocol.capabilities = Capabilities::new(caps);
            h.protocol.set_state(SessionState::Authenticated);
            h.protocol.resume_pending = false;
            h
        }

        fn submit(&mut self, command: Command) -> oneshot::Receiver<Result<Completion>> {
            let (tx, rx) = oneshot::channel();
            self.protocol.submit(command, tx);
            rx
        }

        fn feed(&mut self, lines: &str) {
            self.parser.feed(lines.as_bytes());
            while let Some(event) = self.parser.next_event() {
                match event {
                    WireEvent::BodyData(bytes) => {
                        if let Some(sink) = self.protocol.body_sink() {
                            sink.try_send(bytes).unwrap();
                        }
                    }
                    event => self.protocol.handle_event(event, self.now),
                }
            }
            if self.protocol.needs_resume() {
                self.protocol.resume(self.now);
            }
        }

        fn sent(&mut self) -> Vec<String> {
            std::iter::from_fn(|| self.protocol.poll_transmit())
                .map(|t| String::from_utf8_lossy(&t.data).trim_end_matches("\r\n").to_string())
                .collect()
        }

        fn notifications(&mut self) -> Vec<Notification> {
            std::iter::from_fn(|| self.protocol.poll_notification()).collect()
        }
    }

    fn cmd(text: &str) -> Command {
        Command::builder(text).build()
    }

    #[test]
    fn test_commands_dispatch_in_fifo_order() {
        let mut h = Harness::authenticated(None, &[]);
        let mut first = h.submit(cmd("CAPABILITY"));
        let _second = h.submit(cmd("NAMESPACE"));
        assert_eq!(h.sent(), vec!["A0 CAPABILITY"]);

        h.feed("* CAPABILITY IMAP4rev1 IDLE\r\nA0 OK done\r\n");
        assert_eq!(h.sent(), vec!["A1 NAMESPACE"]);
        let completion = first.try_recv().unwrap().unwrap();
        assert_eq!(completion.text, "done");
        assert_eq!(completion.data.len(), 1);
        assert!(h.protocol.capabilities().has("IDLE"));
    }

    #[test]
    fn test_tagged_no_rejects_only_that_command() {
        let mut h = Harness::authenticated(None, &[]);
        let mut failed = h.submit(cmd("DELETE \"x\""));
        let mut ok = h.submit(cmd("NOOP"));
        h.feed("A0 NO [NONEXISTENT] No such mailbox\r\n");
        let err = failed.try_recv().unwrap().unwrap_err();
        match err {
            Error::Protocol { kind, code, text } => {
                assert_eq!(kind, ProtocolErrorKind::No);
                assert_eq!(code.unwrap().key, "NONEXISTENT");
                assert_eq!(text, "No such mailbox");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(h.sent(), vec!["A0 DELETE \"x\"", "A1 NOOP"]);
        h.feed("A1 OK\r\n");
        assert!(ok.try_recv().unwrap().is_ok());
    }

    #[test]
    fn test_select_projects_mailbox() {
        let mut h = Harness::authenticated(None, &[]);
        let select = Command::builder("EXAMINE")
            .quoted("INBOX")
            .kind(CommandKind::Select { name: "INBOX".into() })
            .build();
        let mut rx = h.submit(select);
        h.feed(concat!(
            "* FLAGS (\\Answered \\Flagged \\Draft \\Deleted \\Seen)\r\n",
            "* OK [PERMANENTFLAGS ()] Flags permitted.\r\n",
            "* OK [UIDVALIDITY 2] UIDs valid.\r\n",
            "* 685 EXISTS\r\n",
            "* 0 RECENT\r\n",
            "* OK [UIDNEXT 4422] Predicted next UID.\r\n",
            "A0 OK [READ-ONLY] INBOX selected. (Success)\r\n",
        ));
        assert!(rx.try_recv().unwrap().is_ok());
        let mailbox = h.protocol.mailbox().unwrap();
        assert_eq!(mailbox.name, "INBOX");
        assert!(mailbox.read_only);
        assert_eq!(mailbox.uidvalidity, 2);
        assert_eq!(mailbox.uidnext, 4422);
        assert_eq!(mailbox.messages.total, 685);
        assert!(mailbox.perm_flags.is_empty());
        assert!(mailbox.allows_deletion());
        assert!(h.notifications().is_empty());

        h.feed("* 687 EXISTS\r\n* 3 EXPUNGE\r\n");
        let notes = h.notifications();
        assert!(matches!(notes[0], Notification::Mail(2)));
        assert!(matches!(notes[1], Notification::Expunge(3)));
        assert_eq!(h.protocol.mailbox().unwrap().messages.total, 686);
    }

    #[test]
    fn test_expunge_needs_selected_mailbox() {
        let mut h = Harness::authenticated(None, &[]);
        h.feed("* 3 EXPUNGE\r\n* 4 EXISTS\r\n");
        assert!(h.notifications().is_empty());

        h.protocol.mailbox = Some(Mailbox::new("INBOX"));
        h.protocol.mailbox.as_mut().unwrap().messages.total = 4;
        h.feed("* 3 EXPUNGE\r\n");
        assert!(matches!(h.notifications()[..], [Notification::Expunge(3)]));
        assert_eq!(h.protocol.mailbox().unwrap().messages.total, 3);
    }

    #[test]
    fn test_failed_select_clears_mailbox() {
        let mut h = Harness::authenticated(None, &[]);
        let select = Command::builder("SELECT")
            .quoted("Nope")
            .kind(CommandKind::Select { name: "Nope".into() })
            .build();
        let mut rx = h.submit(select);
        h.feed("A0 NO Mailbox doesn't exist\r\n");
        assert!(rx.try_recv().unwrap().is_err());
        assert!(h.protocol.mailbox().is_none());
    }

    #[test]
    fn test_vanished_and_unsolicited_fetch() {
        let mut h = Harness::authenticated(None, &[]);
        h.protocol.mailbox = Some(Mailbox::new("INBOX"));
        h.protocol.mailbox.as_mut().unwrap().messages.total = 100;

        h.feed(
            "* VANISHED (EARLIER) 300:310,405,411\r\n\
             * VANISHED 1:3,8\r\n\
             * 5 FETCH (FLAGS (\\Seen) UID 50)\r\n",
        );
        let notes = h.notifications();
        match &notes[0] {
            Notification::Vanished { uids, earlier } => {
                assert_eq!(uids, &["300:310", "405", "411"]);
                assert!(*earlier);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(&notes[1], Notification::Vanished { earlier: false, .. }));
        match &notes[2] {
            Notification::Update { seqno, attributes } => {
                assert_eq!(*seqno, 5);
                assert_eq!(attributes.uid, Some(50));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(h.protocol.mailbox().unwrap().messages.total, 96);
    }

    #[test]
    fn test_sync_literal_waits_for_continuation() {
        let mut h = Harness::authenticated(None, &[]);
        let command = Command::builder("UID SEARCH")
            .atom("CHARSET UTF-8 SUBJECT")
            .string("größe")
            .build();
        let _rx = h.submit(command);
        assert_eq!(h.sent(), vec!["A0 UID SEARCH CHARSET UTF-8 SUBJECT {7}"]);
        h.feed("+ Ready for literal data\r\n");
        assert_eq!(h.sent(), vec!["größe"]);
    }

    #[test]
    fn test_nonsync_literal_sent_at_once() {
        let mut h = Harness::authenticated(None, &["LITERAL+"]);
        let command = Command::builder("APPEND")
            .quoted("INBOX")
            .literal(b"Subject: hi\r\n\r\nbody", true)
            .build();
        let _rx = h.submit(command);
        let sent = h.sent();
        assert_eq!(sent[0], "A0 APPEND \"INBOX\" {19+}");
        assert_eq!(sent[1], "Subject: hi\r\n\r\nbody");
    }

    #[test]
    fn test_authenticate_keeps_server_detail() {
        let mut h = Harness::new(None);
        let command = Command::builder("AUTHENTICATE XOAUTH2")
            .atom("dG9rZW4=")
            .kind(CommandKind::Authenticate)
            .redact("AUTHENTICATE XOAUTH2 ***")
            .build();
        let mut rx = h.submit(command);
        let transmit = h.protocol.poll_transmit().unwrap();
        assert_eq!(transmit.log, "A0 AUTHENTICATE XOAUTH2 ***");

        let detail = STANDARD.encode(r#"{"status":"401"}"#);
        h.feed(&format!("+ {detail}\r\n"));
        assert_eq!(h.sent(), vec![""]);
        h.feed("A0 NO\r\n");
        match rx.try_recv().unwrap().unwrap_err() {
            Error::Protocol { text, .. } => assert_eq!(text, r#"{"status":"401"}"#),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_starttls_pauses_dispatch() {
        let mut h = Harness::new(None);
        let _tls = h.submit(Command::builder("STARTTLS").kind(CommandKind::StartTls).build());
        let _caps = h.submit(cmd("CAPABILITY"));
        assert_eq!(h.sent(), vec!["A0 STARTTLS"]);
        h.protocol.capabilities = Capabilities::new(["STARTTLS"]);

        h.feed("A0 OK Begin TLS negotiation now\r\n");
        assert!(h.protocol.take_upgrade());
        assert!(h.protocol.capabilities().is_empty());
        assert!(h.sent().is_empty());

        h.protocol.upgraded();
        assert!(!h.protocol.take_upgrade());
        assert_eq!(h.sent(), vec!["A1 CAPABILITY"]);
    }

    #[test]
    fn test_plaintext_after_starttls_is_dropped() {
        let mut h = Harness::new(None);
        let _tls = h.submit(Command::builder("STARTTLS").kind(CommandKind::StartTls).build());
        assert_eq!(h.sent(), vec!["A0 STARTTLS"]);

        h.feed("A0 OK Begin TLS\r\n* CAPABILITY IMAP4rev1 INJECTED\r\n* PREAUTH x\r\n");
        assert!(h.protocol.take_upgrade());
        assert!(h.protocol.upgrade_tainted());
        assert!(!h.protocol.capabilities().has("INJECTED"));
        assert_eq!(h.protocol.state(), SessionState::Connected);
    }

    #[test]
    fn test_preauth_only_counts_as_greeting() {
        let mut h = Harness::new(None);
        let (tx, mut rx) = oneshot::channel();
        h.protocol.await_greeting(tx);
        h.feed("* OK ready\r\n");
        assert!(!rx.try_recv().unwrap().unwrap());

        let _caps = h.submit(cmd("CAPABILITY"));
        h.feed("* PREAUTH [CAPABILITY IMAP4rev1 FAKE] sneaky\r\nA0 OK done\r\n");
        assert_eq!(h.protocol.state(), SessionState::Connected);
        assert!(!h.protocol.capabilities().has("FAKE"));

        h.feed("* PREAUTH late\r\n");
        assert_eq!(h.protocol.state(), SessionState::Connected);
    }

    #[test]
    fn test_greeting_outcomes() {
        let mut h = Harness::new(None);
        let (tx, mut rx) = oneshot::channel();
        h.protocol.await_greeting(tx);
        h.feed("* OK [CAPABILITY IMAP4rev1 IDLE] ready\r\n");
        assert!(!rx.try_recv().unwrap().unwrap());
        assert!(h.protocol.capabilities().has("IDLE"));

        let mut h = Harness::new(None);
        let (tx, mut rx) = oneshot::channel();
        h.protocol.await_greeting(tx);
        h.feed("* PREAUTH welcome back\r\n");
        assert!(rx.try_recv().unwrap().unwrap());
        assert_eq!(h.protocol.state(), SessionState::Authenticated);

        let mut h = Harness::new(None);
        let (tx, mut rx) = oneshot::channel();
        h.protocol.await_greeting(tx);
        h.feed("* NO go away\r\n");
        let err = rx.try_recv().unwrap().unwrap_err();
        assert_eq!(err.to_string(), "Received negative welcome: go away");
        assert!(matches!(h.notifications()[0], Notification::Error(_)));
    }

    #[test]
    fn test_idle_starts_after_completion_and_done_waits_for_continuation() {
        let mut h = Harness::authenticated(Some(Keepalive::default()), &["IDLE"]);
        let mut rx = h.submit(cmd("NOOP"));
        assert_eq!(h.sent(), vec!["A0 NOOP"]);
        h.feed("A0 OK\r\n");
        assert!(rx.try_recv().unwrap().is_ok());
        assert_eq!(h.sent(), vec!["IDLE IDLE"]);
        assert_eq!(h.protocol.idle_phase(), IdlePhase::Requested);

        let _status = h.submit(cmd("STATUS \"test\" (MESSAGES)"));
        assert!(h.sent().is_empty());
        h.feed("+ idling\r\n");
        assert_eq!(h.sent(), vec!["DONE"]);
        h.feed("IDLE OK IDLE terminated\r\n");
        assert_eq!(h.sent(), vec!["A1 STATUS \"test\" (MESSAGES)"]);
    }

    #[test]
    fn test_done_sent_immediately_once_idling() {
        let mut h = Harness::authenticated(Some(Keepalive::default()), &["IDLE"]);
        h.protocol.resume_pending = true;
        h.feed("");
        assert_eq!(h.sent(), vec!["IDLE IDLE"]);
        h.feed("+ idling\r\n");
        assert!(matches!(h.protocol.idle_phase(), IdlePhase::Since(_)));
        assert!(h.sent().is_empty());

        let _rx = h.submit(cmd("NOOP"));
        assert_eq!(h.sent(), vec!["DONE"]);
        h.feed("IDLE OK done\r\n");
        assert_eq!(h.sent(), vec!["A0 NOOP"]);
    }

    #[test]
    fn test_idle_renewed_after_max_wait() {
        let settings = Keepalive::default();
        let mut h = Harness::authenticated(Some(settings), &["IDLE"]);
        h.protocol.resume(h.now);
        assert_eq!(h.sent(), vec!["IDLE IDLE"]);
        h.feed("+ idling\r\n");

        h.now += settings.interval;
        h.protocol.handle_timeout(h.now);
        assert!(h.sent().is_empty());

        h.now += settings.idle_interval;
        h.protocol.handle_timeout(h.now);
        assert_eq!(h.sent(), vec!["DONE"]);
        assert_eq!(h.protocol.poll_timeout(), None);
        h.feed("IDLE OK done\r\n");
        assert_eq!(h.sent(), vec!["IDLE IDLE"]);
    }

    #[test]
    fn test_noop_keepalive_without_idle() {
        let settings = Keepalive {
            interval: Duration::from_secs(5),
            ..Keepalive::default()
        };
        let mut h = Harness::authenticated(Some(settings), &[]);
        h.protocol.resume(h.now);
        assert_eq!(h.sent(), vec!["NOOP NOOP"]);
        h.feed("NOOP OK NOOP completed\r\n");
        assert!(h.sent().is_empty());
        let deadline = h.protocol.poll_timeout().unwrap();
        assert_eq!(deadline, h.now + Duration::from_secs(5));

        h.now = deadline;
        h.protocol.handle_timeout(h.now);
        assert_eq!(h.sent(), vec!["NOOP NOOP"]);
    }

    #[tokio::test]
    async fn test_fetch_streams_bodies() {
        let mut h = Harness::authenticated(None, &[]);
        let command = Command::builder("FETCH")
            .atom("1 (UID FLAGS INTERNALDATE BODY.PEEK[TEXT])")
            .kind(CommandKind::Fetch {
                items: vec!["UID".into(), "FLAGS".into(), "INTERNALDATE".into()],
                bodies: vec![section_key("TEXT")],
            })
            .build();
        let (tx, mut rx) = oneshot::channel();
        let (sink, mut messages) = mpsc::unbounded_channel();
        h.protocol.submit_fetch(command, tx, sink);
        h.sent();

        h.feed(concat!(
            "* 1 FETCH (UID 1)\r\n",
            "* 1 FETCH (INTERNALDATE \"05-Sep-2004 00:38:03 +0000\" UID 1000)\r\n",
            "* 1 FETCH (BODY[TEXT] \"IMAP is terrible\")\r\n",
            "* 1 FETCH (FLAGS (\\Seen))\r\n",
            "A0 OK Success\r\n",
        ));
        assert!(rx.try_recv().unwrap().is_ok());

        let mut message = messages.try_recv().unwrap();
        assert!(messages.try_recv().is_err());
        let Some(MessageEvent::Body(body, info)) = message.next_event().await else {
            panic!("expected body");
        };
        assert_eq!((info.seqno, info.section.as_str(), info.size), (1, "TEXT", 16));
        assert_eq!(&body.collect().await[..], b"IMAP is terrible");
        let Some(MessageEvent::Attributes(attrs)) = message.next_event().await else {
            panic!("expected attributes");
        };
        assert_eq!(attrs.uid, Some(1));
        assert_eq!(attrs.flags, Some(vec!["\\Seen".to_string()]));
        assert!(attrs.date.is_some());
    }

    #[test]
    fn test_transport_close_fails_everything() {
        let mut h = Harness::authenticated(None, &[]);
        let mut first = h.submit(cmd("NOOP"));
        let mut second = h.submit(cmd("NOOP"));
        h.feed("* BYE shutting down\r\n");
        h.protocol.transport_closed(None);

        let first = first.try_recv().unwrap();
        assert!(matches!(first, Err(Error::Bye(text)) if text == "shutting down"));
        assert!(matches!(second.try_recv().unwrap(), Err(Error::Bye(_))));
        assert_eq!(h.protocol.state(), SessionState::Disconnected);
        let notes = h.notifications();
        assert!(matches!(notes[0], Notification::Error(Error::Bye(_))));
        assert!(matches!(notes.last(), Some(Notification::Close { had_error: false })));
    }

    #[test]
    fn test_logout_bye_is_expected() {
        let mut h = Harness::authenticated(None, &[]);
        let mut rx = h.submit(Command::builder("LOGOUT").kind(CommandKind::Logout).build());
        h.feed("* BYE LOGOUT Requested\r\nA0 OK good day\r\n");
        assert!(rx.try_recv().unwrap().is_ok());
        assert!(h.notifications().is_empty());
        assert_eq!(h.protocol.state(), SessionState::Closing);
    }

    #[test]
    fn test_alert_and_uidvalidity_notifications() {
        let mut h = Harness::authenticated(None, &[]);
        h.feed("* OK [ALERT] Mailbox is almost full\r\n* OK [UIDVALIDITY 77] changed\r\n");
        let notes = h.notifications();
        assert!(matches!(&notes[0], Notification::Alert(text) if text == "Mailbox is almost full"));
        assert!(matches!(notes[1], Notification::UidValidity(77)));
    }

    #[test]
    fn test_delimiter_learned_from_list() {
        let mut h = Harness::new(None);
        let list = Command::builder("LIST \"\" \"\"").kind(CommandKind::Delimiter).build();
        let _rx = h.submit(list);
        h.feed("* LIST (\\Noselect) \"/\" \"/\"\r\nA0 OK Success\r\n");
        assert_eq!(h.protocol.delimiter(), Some("/"));
    }
}
