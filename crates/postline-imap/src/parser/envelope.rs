//! ENVELOPE decoding.

use postline_mime::encoding::decode_words;

use super::date::ImapDate;
use super::expr::Value;

/// A single envelope address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Address {
    /// Display name, with encoded words decoded.
    pub name: Option<String>,
    /// Local part.
    pub mailbox: Option<String>,
    /// Domain.
    pub host: Option<String>,
}

/// An entry of an envelope address list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressEntry {
    /// A plain address.
    Mailbox(Address),
    /// An RFC 2822 named group.
    Group {
        /// Group display name.
        name: String,
        /// Group members.
        addresses: Vec<Address>,
    },
}

/// Decoded ENVELOPE structure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    /// Date header.
    pub date: Option<ImapDate>,
    /// Subject, with encoded words decoded.
    pub subject: Option<String>,
    /// From addresses.
    pub from: Option<Vec<AddressEntry>>,
    /// Sender addresses.
    pub sender: Option<Vec<AddressEntry>>,
    /// Reply-To addresses.
    pub reply_to: Option<Vec<AddressEntry>>,
    /// To addresses.
    pub to: Option<Vec<AddressEntry>>,
    /// Cc addresses.
    pub cc: Option<Vec<AddressEntry>>,
    /// Bcc addresses.
    pub bcc: Option<Vec<AddressEntry>>,
    /// In-Reply-To header.
    pub in_reply_to: Option<String>,
    /// Message-ID header.
    pub message_id: Option<String>,
}

impl Envelope {
    /// Decodes the ten-field envelope list. Missing fields stay empty.
    #[must_use]
    pub fn from_values(fields: &[Value]) -> Self {
        let text = |i: usize| fields.get(i).and_then(Value::to_text);
        let addresses = |i: usize| fields.get(i).and_then(Value::as_list).map(parse_addresses);

        Self {
            date: text(0).map(|d| ImapDate::rfc2822(&d)),
            subject: text(1).map(|s| decode_words(&s)),
            from: addresses(2),
            sender: addresses(3),
            reply_to: addresses(4),
            to: addresses(5),
            cc: addresses(6),
            bcc: addresses(7),
            in_reply_to: text(8),
            message_id: text(9),
        }
    }
}

/// Decodes an address list, folding group markers into [`AddressEntry::Group`].
///
/// `(NIL NIL name NIL)` opens a group and `(NIL NIL NIL NIL)` closes it. A
/// group left open ends with the list; a close marker without an open group
/// is dropped.
#[must_use]
pub fn parse_addresses(list: &[Value]) -> Vec<AddressEntry> {
    let mut out = Vec::new();
    let mut group: Option<(String, Vec<Address>)> = None;

    for item in list {
        let Some(fields) = item.as_list() else {
            continue;
        };
        let field = |i: usize| fields.get(i).and_then(Value::to_text);
        let (mailbox, host) = (field(2), field(3));

        if host.is_none() {
            if let Some(name) = mailbox {
                if let Some((name, addresses)) = group.take() {
                    out.push(AddressEntry::Group { name, addresses });
                }
                group = Some((name, Vec::new()));
            } else if let Some((name, addresses)) = group.take() {
                out.push(AddressEntry::Group { name, addresses });
            }
            continue;
        }

        let address = Address {
            name: field(0).map(|n| decode_words(&n)),
            mailbox,
            host,
        };
        match group.as_mut() {
            Some((_, members)) => members.push(address),
            None => out.push(AddressEntry::Mailbox(address)),
        }
    }

    if let Some((name, addresses)) = group {
        out.push(AddressEntry::Group { name, addresses });
    }
    out
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
    use crate::parser::parse_expr;

    fn addresses(input: &str) -> Vec<AddressEntry> {
        parse_addresses(&parse_expr(input.as_bytes()).unwrap())
    }

    fn terry() -> Address {
        Address {
            name: Some("Terry Gray".into()),
            mailbox: Some("gray".into()),
            host: Some("cac.washington.edu".into()),
        }
    }

    fn imap() -> Address {
        Address {
            name: None,
            mailbox: Some("imap".into()),
            host: Some("cac.washington.edu".into()),
        }
    }

    #[test]
    fn test_named_address() {
        assert_eq!(
            addresses(r#"("Terry Gray" NIL "gray" "cac.washington.edu")"#),
            vec![AddressEntry::Mailbox(terry())]
        );
    }

    #[test]
    fn test_unnamed_address() {
        assert_eq!(
            addresses(r#"(NIL NIL "imap" "cac.washington.edu")"#),
            vec![AddressEntry::Mailbox(imap())]
        );
    }

    #[test]
    fn test_encoded_name() {
        let parsed = addresses(r#"("=?utf-8?Q?=C2=A9=C2=AEAZ=C2=A5?=" NIL "crazy" "example.org")"#);
        let AddressEntry::Mailbox(address) = &parsed[0] else {
            panic!("expected mailbox");
        };
        assert_eq!(address.name.as_deref(), Some("©®AZ¥"));
    }

    #[test]
    fn test_empty_group() {
        assert_eq!(
            addresses(r#"(NIL NIL "imap" NIL)(NIL NIL NIL NIL)"#),
            vec![AddressEntry::Group {
                name: "imap".into(),
                addresses: vec![],
            }]
        );
    }

    #[test]
    fn test_group_then_address() {
        assert_eq!(
            addresses(concat!(
                r#"(NIL NIL "imap" NIL)"#,
                r#"("Terry Gray" NIL "gray" "cac.washington.edu")"#,
                r#"(NIL NIL NIL NIL)"#,
                r#"(NIL NIL "imap" "cac.washington.edu")"#
            )),
            vec![
                AddressEntry::Group {
                    name: "imap".into(),
                    addresses: vec![terry()],
                },
                AddressEntry::Mailbox(imap()),
            ]
        );
    }

    #[test]
    fn test_implicit_group_end() {
        assert_eq!(
            addresses(r#"(NIL NIL "imap" NIL)("Terry Gray" NIL "gray" "cac.washington.edu")"#),
            vec![AddressEntry::Group {
                name: "imap".into(),
                addresses: vec![terry()],
            }]
        );
    }

    #[test]
    fn test_group_end_without_start() {
        assert_eq!(
            addresses(r#"("Terry Gray" NIL "gray" "cac.washington.edu")(NIL NIL NIL NIL)"#),
            vec![AddressEntry::Mailbox(terry())]
        );
    }

    #[test]
    fn test_full_envelope() {
        let values = parse_expr(
            br#"("Wed, 17 Jul 1996 02:23:25 -0700 (PDT)" "IMAP4rev1 WG mtg summary and minutes" (("Terry Gray" NIL "gray" "cac.washington.edu")) (("Terry Gray" NIL "gray" "cac.washington.edu")) (("Terry Gray" NIL "gray" "cac.washington.edu")) ((NIL NIL "imap" "cac.washington.edu")) ((NIL NIL "minutes" "CNRI.Reston.VA.US")("John Klensin" NIL "KLENSIN" "MIT.EDU")) NIL NIL "<B27397-0100000@cac.washington.edu>")"#,
        )
        .unwrap();
        let envelope = Envelope::from_values(values[0].as_list().unwrap());

        assert_eq!(
            envelope.date.as_ref().unwrap().parsed,
            ImapDate::internal("17-Jul-1996 02:23:25 -0700").parsed
        );
        assert_eq!(envelope.subject.as_deref(), Some("IMAP4rev1 WG mtg summary and minutes"));
        assert_eq!(envelope.from, Some(vec![AddressEntry::Mailbox(terry())]));
        assert_eq!(envelope.to, Some(vec![AddressEntry::Mailbox(imap())]));
        assert_eq!(envelope.cc.as_ref().unwrap().len(), 2);
        assert_eq!(envelope.bcc, None);
        assert_eq!(envelope.in_reply_to, None);
        assert_eq!(
            envelope.message_id.as_deref(),
            Some("<B27397-0100000@cac.washington.edu>")
        );
    }
}
