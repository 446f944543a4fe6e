//! Connection-level notifications.
//!
//! IMAP servers send data nobody asked for: new mail, expunges, flag changes
//! made by other clients, alerts. The connection turns those into
//! [`Notification`]s and hands them to an [`EventHandler`] in order, on the
//! connection task.
//!
//! # Example
//!
//! ```ignore
//! use postline_imap::handler::EventHandler;
//!
//! struct Counter {
//!     arrived: u32,
//! }
//!
//! impl EventHandler for Counter {
//!     fn on_mail(&mut self, new: u32) {
//!         self.arrived += new;
//!     }
//! }
//! ```

use tokio::sync::mpsc;

use crate::Error;
use crate::fetch::MessageAttributes;

/// A connection-level event.
#[derive(Debug)]
pub enum Notification {
    /// Login finished; the session is authenticated.
    Ready,
    /// Messages arrived in the selected mailbox.
    Mail(u32),
    /// A message was expunged; later sequence numbers shift down by one.
    Expunge(u32),
    /// Messages vanished (QRESYNC). UID ranges are kept as sent.
    Vanished {
        /// Raw UID set tokens such as `300:310`.
        uids: Vec<String>,
        /// True for `VANISHED (EARLIER)`, which reports past expunges.
        earlier: bool,
    },
    /// Attributes of a message changed outside a fetch.
    Update {
        /// Message sequence number.
        seqno: u32,
        /// The changed attributes.
        attributes: Box<MessageAttributes>,
    },
    /// UIDVALIDITY changed outside a mailbox open.
    UidValidity(u32),
    /// The server sent an ALERT that must be shown to the user.
    Alert(String),
    /// A connection-level failure.
    Error(Error),
    /// The connection closed.
    Close {
        /// Whether the close followed an error.
        had_error: bool,
    },
}

/// Receiver of [`Notification`]s.
///
/// Every method has a no-op default; implement the ones you need. Calls
/// happen on the connection task, so keep them short.
pub trait EventHandler: Send {
    /// Login finished.
    fn on_ready(&mut self) {}

    /// `new` messages arrived in the selected mailbox.
    fn on_mail(&mut self, new: u32) {
        let _ = new;
    }

    /// The message with this sequence number was expunged.
    fn on_expunge(&mut self, seqno: u32) {
        let _ = seqno;
    }

    /// Messages vanished.
    fn on_vanished(&mut self, uids: &[String], earlier: bool) {
        let _ = (uids, earlier);
    }

    /// Attributes changed outside a fetch, typically flags set by another
    /// client.
    fn on_update(&mut self, seqno: u32, attributes: &MessageAttributes) {
        let _ = (seqno, attributes);
    }

    /// UIDVALIDITY changed; cached UIDs are no longer valid.
    fn on_uidvalidity(&mut self, value: u32) {
        let _ = value;
    }

    /// The server sent an ALERT. RFC 3501 requires showing it to the user.
    fn on_alert(&mut self, text: &str) {
        let _ = text;
    }

    /// A connection-level error occurred.
    fn on_error(&mut self, error: &Error) {
        let _ = error;
    }

    /// The connection closed.
    fn on_close(&mut self, had_error: bool) {
        let _ = had_error;
    }

    /// Routes a notification to the matching method.
    fn dispatch(&mut self, notification: Notification) {
        match notification {
            Notification::Ready => self.on_ready(),
            Notification::Mail(new) => self.on_mail(new),
            Notification::Expunge(seqno) => self.on_expunge(seqno),
            Notification::Vanished { uids, earlier } => self.on_vanished(&uids, earlier),
            Notification::Update { seqno, attributes } => self.on_update(seqno, &attributes),
            Notification::UidValidity(value) => self.on_uidvalidity(value),
            Notification::Alert(text) => self.on_alert(&text),
            Notification::Error(error) => self.on_error(&error),
            Notification::Close { had_error } => self.on_close(had_error),
        }
    }
}

/// Ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl EventHandler for NoopHandler {}

/// Logs notifications with `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_ready(&mut self) {
        tracing::info!("session ready");
    }

    fn on_mail(&mut self, new: u32) {
        tracing::debug!(new, "new mail");
    }

    fn on_expunge(&mut self, seqno: u32) {
        tracing::debug!(seqno, "EXPUNGE");
    }

    fn on_vanished(&mut self, uids: &[String], earlier: bool) {
        tracing::debug!(?uids, earlier, "VANISHED");
    }

    fn on_update(&mut self, seqno: u32, attributes: &MessageAttributes) {
        tracing::debug!(seqno, flags = ?attributes.flags, "message updated");
    }

    fn on_uidvalidity(&mut self, value: u32) {
        tracing::info!(value, "UIDVALIDITY changed");
    }

    fn on_alert(&mut self, text: &str) {
        // RFC 3501: ALERT must be shown to the user
        tracing::warn!(alert = text, "server ALERT");
    }

    fn on_error(&mut self, error: &Error) {
        tracing::warn!(%error, "connection error");
    }

    fn on_close(&mut self, had_error: bool) {
        tracing::info!(had_error, "connection closed");
    }
}

/// Forwards notifications over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelHandler {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelHandler {
    /// Creates the handler and the receiving end.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventHandler for ChannelHandler {
    fn dispatch(&mut self, notification: Notification) {
        // The receiver may be gone; notifications are then dropped.
        let _ = self.tx.send(notification);
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
    use super::*;

    #[derive(Default)]
    struct Recorder {
        mail: Vec<u32>,
        expunged: Vec<u32>,
        vanished: Vec<(Vec<String>, bool)>,
        alerts: Vec<String>,
        closed: Option<bool>,
    }

    impl EventHandler for Recorder {
        fn on_mail(&mut self, new: u32) {
            self.mail.push(new);
        }

        fn on_expunge(&mut self, seqno: u32) {
            self.expunged.push(seqno);
        }

        fn on_vanished(&mut self, uids: &[String], earlier: bool) {
            self.vanished.push((uids.to_vec(), earlier));
        }

        fn on_alert(&mut self, text: &str) {
            self.alerts.push(text.to_string());
        }

        fn on_close(&mut self, had_error: bool) {
            self.closed = Some(had_error);
        }
    }

    #[test]
    fn test_dispatch_routes_to_methods() {
        let mut recorder = Recorder::default();
        recorder.dispatch(Notification::Mail(3));
        recorder.dispatch(Notification::Expunge(7));
        recorder.dispatch(Notification::Vanished {
            uids: vec!["300:310".into(), "405".into()],
            earlier: true,
        });
        recorder.dispatch(Notification::Alert("Disk almost full".into()));
        recorder.dispatch(Notification::Ready);
        recorder.dispatch(Notification::Close { had_error: false });

        assert_eq!(recorder.mail, vec![3]);
        assert_eq!(recorder.expunged, vec![7]);
        assert_eq!(recorder.vanished, vec![(vec!["300:310".to_string(), "405".to_string()], true)]);
        assert_eq!(recorder.alerts, vec!["Disk almost full"]);
        assert_eq!(recorder.closed, Some(false));
    }

    #[test]
    fn test_noop_and_logging_handlers_accept_everything() {
        let mut noop = NoopHandler;
        noop.dispatch(Notification::UidValidity(42));
        let mut logging = LoggingHandler;
        logging.dispatch(Notification::Error(Error::Closed));
        logging.dispatch(Notification::Update {
            seqno: 1,
            attributes: Box::default(),
        });
    }

    #[test]
    fn test_channel_handler_forwards() {
        let (mut handler, mut rx) = ChannelHandler::new();
        handler.dispatch(Notification::Mail(1));
        handler.dispatch(Notification::Close { had_error: true });
        assert!(matches!(rx.try_recv().unwrap(), Notification::Mail(1)));
        assert!(matches!(rx.try_recv().unwrap(), Notification::Close { had_error: true }));
        drop(rx);
        handler.dispatch(Notification::Ready);
    }
}
