//! Mailbox lifecycle, listing and status.

use std::time::{SystemTime, UNIX_EPOCH};

use super::Client;
use crate::command::{Command, CommandKind};
use crate::error::ProtocolErrorKind;
use crate::parser::{Untagged, Value};
use crate::protocol::{Completion, Mailbox};
use crate::types::{MailboxStatus, MailboxTree, SequenceSet, insert_listed};
use crate::{Error, Result};

/// How to open a mailbox.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenOptions {
    /// Use EXAMINE instead of SELECT.
    pub read_only: bool,
    /// Resynchronize from a known state (needs QRESYNC enabled).
    pub qresync: Option<QresyncParams>,
}

impl OpenOptions {
    /// Opens for reading and writing.
    #[must_use]
    pub fn read_write() -> Self {
        Self::default()
    }

    /// Opens with EXAMINE.
    #[must_use]
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            qresync: None,
        }
    }

    /// Adds QRESYNC parameters.
    #[must_use]
    pub fn qresync(mut self, params: QresyncParams) -> Self {
        self.qresync = Some(params);
        self
    }
}

/// Last known state of a mailbox, for `SELECT ... (QRESYNC ...)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QresyncParams {
    /// UIDVALIDITY the client last saw.
    pub uidvalidity: u32,
    /// Highest MODSEQ the client last saw.
    pub modseq: u64,
    /// UIDs the client knows about.
    pub known_uids: Option<SequenceSet>,
}

impl Client {
    /// Opens a mailbox and returns its state once the server confirms.
    pub async fn open_box(&self, name: &str, options: OpenOptions) -> Result<Mailbox> {
        self.require_authenticated()?;
        let verb = if options.read_only { "EXAMINE" } else { "SELECT" };
        let mut builder = Command::builder(verb)
            .quoted(&self.encode_name(name))
            .kind(CommandKind::Select { name: name.to_string() });

        if let Some(params) = &options.qresync {
            if !self.shared.lock().qresync_enabled() {
                return Err(Error::capability("QRESYNC"));
            }
            let mut args = format!("{} {}", params.uidvalidity, params.modseq);
            if let Some(uids) = &params.known_uids {
                args.push(' ');
                args.push_str(&uids.to_string());
            }
            builder = builder.atom(&format!("(QRESYNC ({args}))"));
        } else if self.server_supports("CONDSTORE") {
            builder = builder.atom("(CONDSTORE)");
        }

        self.exec(builder.build()).await?;
        self.require_mailbox()
    }

    /// Closes the selected mailbox.
    ///
    /// With `expunge`, messages flagged `\Deleted` are removed (CLOSE).
    /// Otherwise UNSELECT is used, or, when the server lacks it, a SELECT
    /// of a mailbox that cannot exist. That fallback is racy: a mailbox
    /// created under the same name in between would be selected.
    pub async fn close_box(&self, expunge: bool) -> Result<()> {
        self.require_mailbox()?;
        let fallback = !expunge && !self.server_supports("UNSELECT");
        let builder = if expunge {
            Command::builder("CLOSE")
        } else if fallback {
            let stamp = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or_default();
            Command::builder("SELECT").quoted(&format!("POSTLINECLOSINGBOX{stamp}"))
        } else {
            Command::builder("UNSELECT")
        };

        match self.exec(builder.kind(CommandKind::Close).build()).await {
            Ok(_) => {}
            Err(Error::Protocol {
                kind: ProtocolErrorKind::No,
                ..
            }) if fallback => {}
            Err(err) => return Err(err),
        }
        self.shared.lock().clear_mailbox();
        Ok(())
    }

    /// Creates a mailbox.
    pub async fn add_box(&self, name: &str) -> Result<()> {
        self.simple_box_command("CREATE", name).await
    }

    /// Deletes a mailbox.
    pub async fn del_box(&self, name: &str) -> Result<()> {
        self.simple_box_command("DELETE", name).await
    }

    /// Subscribes to a mailbox.
    pub async fn subscribe_box(&self, name: &str) -> Result<()> {
        self.simple_box_command("SUBSCRIBE", name).await
    }

    /// Unsubscribes from a mailbox.
    pub async fn unsubscribe_box(&self, name: &str) -> Result<()> {
        self.simple_box_command("UNSUBSCRIBE", name).await
    }

    async fn simple_box_command(&self, verb: &str, name: &str) -> Result<()> {
        self.require_authenticated()?;
        let command = Command::builder(verb).quoted(&self.encode_name(name)).build();
        self.exec(command).await.map(|_| ())
    }

    /// Renames a mailbox. Renaming INBOX moves its messages and leaves an
    /// empty INBOX, so the selected record keeps its name then.
    pub async fn rename_box(&self, old: &str, new: &str) -> Result<()> {
        self.require_authenticated()?;
        let command = Command::builder("RENAME")
            .quoted(&self.encode_name(old))
            .quoted(&self.encode_name(new))
            .build();
        self.exec(command).await?;

        let mut protocol = self.shared.lock();
        let selected = protocol.mailbox().is_some_and(|m| m.name == old);
        if selected && !old.eq_ignore_ascii_case("INBOX") {
            protocol.rename_mailbox(new);
        }
        Ok(())
    }

    /// Lists every mailbox under `namespace` as a tree.
    pub async fn get_boxes(&self, namespace: &str) -> Result<MailboxTree> {
        self.list_tree("LIST", namespace).await
    }

    /// Lists subscribed mailboxes under `namespace` as a tree.
    pub async fn get_subscribed_boxes(&self, namespace: &str) -> Result<MailboxTree> {
        self.list_tree("LSUB", namespace).await
    }

    /// Lists mailboxes with their special-use attributes (XLIST).
    pub async fn get_special_use_boxes(&self) -> Result<MailboxTree> {
        self.require("XLIST")?;
        self.list_tree("XLIST", "").await
    }

    async fn list_tree(&self, verb: &str, namespace: &str) -> Result<MailboxTree> {
        self.require_authenticated()?;
        let command = Command::builder(verb)
            .quoted(&self.encode_name(namespace))
            .quoted("*")
            .build();
        let completion = self.exec(command).await?;
        Ok(self.tree_from(&completion))
    }

    fn tree_from(&self, completion: &Completion) -> MailboxTree {
        let mut tree = MailboxTree::new();
        for untagged in &completion.data {
            if let Untagged::List(entry) | Untagged::Lsub(entry) | Untagged::Xlist(entry) = untagged
            {
                let name = self.decode_name(&entry.name);
                insert_listed(&mut tree, &name, entry.delimiter.as_deref(), entry.flags.clone());
            }
        }
        tree
    }

    /// Queries a mailbox that is not the selected one.
    pub async fn status(&self, name: &str) -> Result<MailboxStatus> {
        self.require_authenticated()?;
        if self.mailbox().is_some_and(|m| m.name == name) {
            return Err(Error::validation("Cannot call status on currently selected mailbox"));
        }

        let mut attrs = String::from("MESSAGES RECENT UNSEEN UIDVALIDITY UIDNEXT");
        if self.server_supports("CONDSTORE") {
            attrs.push_str(" HIGHESTMODSEQ");
        }
        let command = Command::builder("STATUS")
            .quoted(&self.encode_name(name))
            .atom(&format!("({attrs})"))
            .build();
        let completion = self.exec(command).await?;

        let mut status = MailboxStatus {
            name: name.to_string(),
            ..MailboxStatus::default()
        };
        for untagged in completion.data {
            let Untagged::Status(data) = untagged else {
                continue;
            };
            let number = |key: &str| {
                data.attrs
                    .get(key)
                    .and_then(Value::as_number)
                    .and_then(|n| u32::try_from(n).ok())
            };
            status.messages = number("messages");
            status.recent = number("recent");
            status.unseen = number("unseen");
            status.uidnext = number("uidnext");
            status.uidvalidity = number("uidvalidity");
            status.highestmodseq = data.attrs.get("highestmodseq").and_then(Value::to_text);
        }
        Ok(status)
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
    use super::super::tests::logged_in;
    use super::*;

    #[tokio::test]
    async fn test_open_box_projects_state() {
        let (client, mut server, tag) = logged_in("").await;
        let open = tokio::spawn({
            let client = client.clone();
            async move { client.open_box("INBOX", OpenOptions::read_write()).await }
        });
        server
            .exchange(
                &format!("A{tag} SELECT \"INBOX\""),
                &format!(
                    "* FLAGS (\\Seen \\Deleted)\r\n\
                     * OK [PERMANENTFLAGS (\\Seen \\Deleted \\*)] ok\r\n\
                     * 12 EXISTS\r\n\
                     * OK [UIDVALIDITY 3857529045] ok\r\n\
                     * OK [UIDNEXT 4392] ok\r\n\
                     A{tag} OK [READ-WRITE] done\r\n"
                ),
            )
            .await;
        let mailbox = open.await.unwrap().unwrap();
        assert_eq!(mailbox.name, "INBOX");
        assert_eq!(mailbox.messages.total, 12);
        assert_eq!(mailbox.uidvalidity, 3857529045);
        assert_eq!(mailbox.uidnext, 4392);
        assert!(mailbox.new_keywords);
        assert!(!mailbox.read_only);
        assert!(mailbox.allows_deletion());
    }

    #[tokio::test]
    async fn test_open_box_encodes_name() {
        let (client, mut server, tag) = logged_in("").await;
        let open = tokio::spawn({
            let client = client.clone();
            async move { client.open_box("Entwürfe", OpenOptions::read_only()).await }
        });
        server
            .exchange(
                &format!("A{tag} EXAMINE \"Entw&APw-rfe\""),
                &format!("A{tag} OK [READ-ONLY] done\r\n"),
            )
            .await;
        let mailbox = open.await.unwrap().unwrap();
        assert_eq!(mailbox.name, "Entwürfe");
        assert!(mailbox.read_only);
    }

    #[tokio::test]
    async fn test_qresync_needs_enable() {
        let (client, _server, _) = logged_in("").await;
        let params = QresyncParams {
            uidvalidity: 1,
            modseq: 2,
            known_uids: None,
        };
        let err = client
            .open_box("INBOX", OpenOptions::read_write().qresync(params))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Capability(ref c) if c == "QRESYNC"));
    }

    #[tokio::test]
    async fn test_close_falls_back_to_bogus_select() {
        let (client, mut server, tag) = logged_in("").await;
        let open = tokio::spawn({
            let client = client.clone();
            async move { client.open_box("INBOX", OpenOptions::read_write()).await }
        });
        server
            .exchange(&format!("A{tag} SELECT \"INBOX\""), &format!("A{tag} OK done\r\n"))
            .await;
        open.await.unwrap().unwrap();

        let close = tokio::spawn({
            let client = client.clone();
            async move { client.close_box(false).await }
        });
        let next = tag + 1;
        let line = server.lines.next_line().await.unwrap().unwrap();
        assert!(line.starts_with(&format!("A{next} SELECT \"POSTLINECLOSINGBOX")));
        server.send(&format!("A{next} NO no such mailbox\r\n")).await;
        close.await.unwrap().unwrap();
        assert!(client.mailbox().is_none());
    }

    #[tokio::test]
    async fn test_close_requires_selection() {
        let (client, _server, _) = logged_in("UNSELECT").await;
        let err = client.close_box(true).await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid argument: No mailbox is currently selected");
    }

    #[tokio::test]
    async fn test_get_boxes_builds_tree() {
        let (client, mut server, tag) = logged_in("").await;
        let list = tokio::spawn({
            let client = client.clone();
            async move { client.get_boxes("").await }
        });
        server
            .exchange(
                &format!("A{tag} LIST \"\" \"*\""),
                &format!(
                    "* LIST (\\HasChildren) \"/\" \"INBOX\"\r\n\
                     * LIST (\\HasNoChildren) \"/\" \"INBOX/Entw&APw-rfe\"\r\n\
                     * LIST (\\HasNoChildren \\Sent) \"/\" \"Sent\"\r\n\
                     A{tag} OK done\r\n"
                ),
            )
            .await;
        let tree = list.await.unwrap().unwrap();
        assert_eq!(tree.len(), 2);
        let inbox = &tree["INBOX"];
        assert_eq!(inbox.delimiter.as_deref(), Some("/"));
        assert!(inbox.children.contains_key("Entwürfe"));
        assert_eq!(tree["Sent"].special_use.as_deref(), Some("\\Sent"));
    }

    #[tokio::test]
    async fn test_status() {
        let (client, mut server, tag) = logged_in("CONDSTORE").await;
        let status = tokio::spawn({
            let client = client.clone();
            async move { client.status("blurdybloop").await }
        });
        server
            .exchange(
                &format!(
                    "A{tag} STATUS \"blurdybloop\" \
                     (MESSAGES RECENT UNSEEN UIDVALIDITY UIDNEXT HIGHESTMODSEQ)"
                ),
                &format!(
                    "* STATUS blurdybloop (MESSAGES 231 UIDNEXT 44292 HIGHESTMODSEQ 7011231777)\r\n\
                     A{tag} OK done\r\n"
                ),
            )
            .await;
        let status = status.await.unwrap().unwrap();
        assert_eq!(status.messages, Some(231));
        assert_eq!(status.uidnext, Some(44292));
        assert_eq!(status.recent, None);
        assert_eq!(status.highestmodseq.as_deref(), Some("7011231777"));
    }

    #[tokio::test]
    async fn test_rename_selected_box() {
        let (client, mut server, tag) = logged_in("").await;
        let open = tokio::spawn({
            let client = client.clone();
            async move { client.open_box("Old", OpenOptions::read_write()).await }
        });
        server
            .exchange(&format!("A{tag} SELECT \"Old\""), &format!("A{tag} OK done\r\n"))
            .await;
        open.await.unwrap().unwrap();

        let rename = tokio::spawn({
            let client = client.clone();
            async move { client.rename_box("Old", "New").await }
        });
        let next = tag + 1;
        server
            .exchange(&format!("A{next} RENAME \"Old\" \"New\""), &format!("A{next} OK done\r\n"))
            .await;
        rename.await.unwrap().unwrap();
        assert_eq!(client.mailbox().unwrap().name, "New");
    }
}
