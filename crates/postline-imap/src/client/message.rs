//! Message operations: append, search, fetch, store, copy, move, expunge.

use chrono::{DateTime, FixedOffset};
use tokio::sync::{mpsc, oneshot};

use super::Client;
use crate::command::{
    Command, CommandBuilder, CommandKind, SearchKey, SortKey, append_flag, has_non_ascii,
    normalize_flag, validate_keyword,
};
use crate::fetch::{FetchOptions, FetchStream};
use crate::parser::{Esearch, TextCode, Untagged, Value, format_date_time, quote};
use crate::protocol::{Completion, section_key};
use crate::types::SequenceSet;
use crate::{Error, Result};

/// Where and how to append a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendOptions {
    /// Target mailbox; the selected one when `None`.
    pub mailbox: Option<String>,
    /// Flags to set, e.g. `Seen` or `$Forwarded`.
    pub flags: Vec<String>,
    /// Internal date.
    pub date: Option<DateTime<FixedOffset>>,
}

/// `APPENDUID` response code (UIDPLUS).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendUid {
    /// UIDVALIDITY of the target mailbox.
    pub uidvalidity: u32,
    /// UID assigned to the message.
    pub uid: u32,
}

/// `COPYUID` response code (UIDPLUS).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyUid {
    /// UIDVALIDITY of the target mailbox.
    pub uidvalidity: u32,
    /// Source UIDs.
    pub source: SequenceSet,
    /// UIDs assigned in the target mailbox, in the same order.
    pub destination: SequenceSet,
}

/// Result of SEARCH.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchResults {
    /// Matching UIDs or sequence numbers.
    pub ids: Vec<u32>,
    /// Highest MODSEQ among the matches, when a MODSEQ key was used.
    pub modseq: Option<String>,
}

/// Result options of ESEARCH.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EsearchReturn {
    /// `MIN`.
    Min,
    /// `MAX`.
    Max,
    /// `ALL`.
    All,
    /// `COUNT`.
    Count,
}

impl EsearchReturn {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::All => "ALL",
            Self::Count => "COUNT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreMode {
    Add,
    Remove,
    Replace,
}

impl StoreMode {
    const fn prefix(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Remove => "-",
            Self::Replace => "",
        }
    }
}

/// Message operations in one addressing mode.
///
/// [`Client::uid`] addresses messages by UID, [`Client::seq`] by sequence
/// number. The client's own message methods use UIDs.
#[derive(Debug, Clone, Copy)]
pub struct Messages<'a> {
    client: &'a Client,
    by_uid: bool,
}

impl<'a> Messages<'a> {
    pub(super) const fn new(client: &'a Client, by_uid: bool) -> Self {
        Self { client, by_uid }
    }

    fn command(&self, verb: &str) -> CommandBuilder {
        if self.by_uid {
            Command::builder(&format!("UID {verb}"))
        } else {
            Command::builder(verb)
        }
    }

    /// Searches the selected mailbox.
    pub async fn search(&self, criteria: &[SearchKey]) -> Result<SearchResults> {
        self.client.require_mailbox()?;
        let mut builder = self.command("SEARCH");
        if has_non_ascii(criteria) {
            builder = builder.atom("CHARSET UTF-8");
        }
        let command = builder.search(criteria, &self.client.capabilities())?.build();

        let completion = self.client.exec(command).await?;
        let mut results = SearchResults::default();
        for untagged in completion.data {
            if let Untagged::Search { results: ids, modseq } = untagged {
                results.ids.extend(ids);
                if modseq.is_some() {
                    results.modseq = modseq;
                }
            }
        }
        Ok(results)
    }

    /// Searches with ESEARCH result options.
    pub async fn esearch(
        &self,
        criteria: &[SearchKey],
        options: &[EsearchReturn],
    ) -> Result<Esearch> {
        self.client.require("ESEARCH")?;
        self.client.require_mailbox()?;
        let options = options.iter().map(|o| o.as_str()).collect::<Vec<_>>().join(" ");
        let mut builder = self.command("SEARCH").atom(&format!("RETURN ({options})"));
        if has_non_ascii(criteria) {
            builder = builder.atom("CHARSET UTF-8");
        }
        let command = builder.search(criteria, &self.client.capabilities())?.build();

        let completion = self.client.exec(command).await?;
        Ok(completion
            .data
            .into_iter()
            .filter_map(|u| match u {
                Untagged::Esearch(esearch) => Some(esearch),
                _ => None,
            })
            .last()
            .unwrap_or_default())
    }

    /// Searches and orders the matches (SORT).
    pub async fn sort(&self, order: &[SortKey], criteria: &[SearchKey]) -> Result<Vec<u32>> {
        self.client.require("SORT")?;
        self.client.require_mailbox()?;
        if order.is_empty() {
            return Err(Error::validation("Expected at least one sort criterion"));
        }
        let order = order.iter().map(ToString::to_string).collect::<Vec<_>>().join(" ");
        let charset = if has_non_ascii(criteria) { "UTF-8" } else { "US-ASCII" };
        let command = self
            .command("SORT")
            .atom(&format!("({order})"))
            .atom(charset)
            .search(criteria, &self.client.capabilities())?
            .build();

        let completion = self.client.exec(command).await?;
        Ok(completion
            .data
            .into_iter()
            .flat_map(|u| match u {
                Untagged::Sort(ids) => ids,
                _ => Vec::new(),
            })
            .collect())
    }

    /// Searches and groups the matches into threads (THREAD).
    ///
    /// Each thread is a nested list of ids as the server sent it.
    pub async fn thread(&self, algorithm: &str, criteria: &[SearchKey]) -> Result<Vec<Value>> {
        let algorithm = algorithm.to_ascii_uppercase();
        let capability = format!("THREAD={algorithm}");
        if !self.client.server_supports(&capability) {
            return Err(Error::capability(capability));
        }
        self.client.require_mailbox()?;
        let charset = if has_non_ascii(criteria) { "UTF-8" } else { "US-ASCII" };
        let command = self
            .command("THREAD")
            .atom(&algorithm)
            .atom(charset)
            .search(criteria, &self.client.capabilities())?
            .build();

        let completion = self.client.exec(command).await?;
        Ok(completion
            .data
            .into_iter()
            .flat_map(|u| match u {
                Untagged::Thread(threads) => threads,
                _ => Vec::new(),
            })
            .collect())
    }

    /// Starts a fetch and returns its message stream.
    ///
    /// The command is queued at once. Messages arrive as the server sends
    /// them; body sections should be read promptly because an unread body
    /// stops the connection from reading.
    pub fn fetch(&self, ids: &SequenceSet, options: &FetchOptions) -> Result<FetchStream> {
        let mailbox = self.client.require_mailbox()?;
        let caps = self.client.capabilities();

        let mut items: Vec<String> = Vec::new();
        if caps.has("X-GM-EXT-1") {
            items.extend(["X-GM-THRID", "X-GM-MSGID", "X-GM-LABELS"].map(String::from));
        }
        items.extend(["UID", "FLAGS", "INTERNALDATE"].map(String::from));
        if options.envelope {
            items.push("ENVELOPE".into());
        }
        if options.structure {
            items.push("BODYSTRUCTURE".into());
        }
        if options.size {
            items.push("RFC822.SIZE".into());
        }
        if options.modseq {
            if !caps.has("CONDSTORE") {
                return Err(Error::capability("CONDSTORE"));
            }
            items.push("MODSEQ".into());
        }
        items.extend(options.extensions.iter().map(|e| e.to_ascii_uppercase()));

        let peek = if options.mark_seen { "BODY" } else { "BODY.PEEK" };
        let mut text = items.join(" ");
        for section in &options.bodies {
            text.push_str(&format!(" {peek}[{section}]"));
        }

        let mut builder = self.command("FETCH").atom(&ids.to_string()).atom(&format!("({text})"));
        let qresync = self.client.shared.lock().qresync_enabled();
        if options.vanished {
            if !qresync {
                return Err(Error::capability("QRESYNC"));
            }
            if !self.by_uid {
                return Err(Error::validation("VANISHED needs UID FETCH"));
            }
            if options.changed_since.is_none() {
                return Err(Error::validation("VANISHED needs CHANGEDSINCE"));
            }
        }
        if let Some(modseq) = options.changed_since {
            if caps.has("CONDSTORE") && !mailbox.nomodseq {
                let vanished = if qresync && self.by_uid { " VANISHED" } else { "" };
                builder = builder.atom(&format!("(CHANGEDSINCE {modseq}{vanished})"));
            } else {
                tracing::debug!("CHANGEDSINCE ignored without CONDSTORE");
            }
        }

        let command = builder
            .kind(CommandKind::Fetch {
                items,
                bodies: options.bodies.iter().map(|s| section_key(s)).collect(),
            })
            .build();

        let (reply, done) = oneshot::channel();
        let (sink, messages) = mpsc::unbounded_channel();
        self.client.submit_fetch(command, reply, sink)?;
        Ok(FetchStream::new(messages, done))
    }

    // === Flags, keywords and labels ===

    /// Adds system flags, e.g. `Seen` or `\Deleted`.
    pub async fn add_flags(
        &self,
        ids: &SequenceSet,
        flags: &[&str],
        unchanged_since: Option<u64>,
    ) -> Result<()> {
        self.store_flags(ids, StoreMode::Add, flags, unchanged_since).await
    }

    /// Removes system flags.
    pub async fn del_flags(
        &self,
        ids: &SequenceSet,
        flags: &[&str],
        unchanged_since: Option<u64>,
    ) -> Result<()> {
        self.store_flags(ids, StoreMode::Remove, flags, unchanged_since).await
    }

    /// Replaces the flags; an empty list clears them.
    pub async fn set_flags(
        &self,
        ids: &SequenceSet,
        flags: &[&str],
        unchanged_since: Option<u64>,
    ) -> Result<()> {
        self.store_flags(ids, StoreMode::Replace, flags, unchanged_since).await
    }

    /// Adds keywords.
    pub async fn add_keywords(
        &self,
        ids: &SequenceSet,
        keywords: &[&str],
        unchanged_since: Option<u64>,
    ) -> Result<()> {
        self.store_keywords(ids, StoreMode::Add, keywords, unchanged_since).await
    }

    /// Removes keywords.
    pub async fn del_keywords(
        &self,
        ids: &SequenceSet,
        keywords: &[&str],
        unchanged_since: Option<u64>,
    ) -> Result<()> {
        self.store_keywords(ids, StoreMode::Remove, keywords, unchanged_since).await
    }

    /// Replaces the keywords.
    pub async fn set_keywords(
        &self,
        ids: &SequenceSet,
        keywords: &[&str],
        unchanged_since: Option<u64>,
    ) -> Result<()> {
        self.store_keywords(ids, StoreMode::Replace, keywords, unchanged_since).await
    }

    /// Adds Gmail labels.
    pub async fn add_labels(&self, ids: &SequenceSet, labels: &[&str]) -> Result<()> {
        self.store_labels(ids, StoreMode::Add, labels).await
    }

    /// Removes Gmail labels.
    pub async fn del_labels(&self, ids: &SequenceSet, labels: &[&str]) -> Result<()> {
        self.store_labels(ids, StoreMode::Remove, labels).await
    }

    /// Replaces the Gmail labels.
    pub async fn set_labels(&self, ids: &SequenceSet, labels: &[&str]) -> Result<()> {
        self.store_labels(ids, StoreMode::Replace, labels).await
    }

    async fn store_flags(
        &self,
        ids: &SequenceSet,
        mode: StoreMode,
        flags: &[&str],
        unchanged_since: Option<u64>,
    ) -> Result<()> {
        if flags.is_empty() && mode != StoreMode::Replace {
            return Err(Error::validation("Empty flag list"));
        }
        let values = flags.iter().map(|f| normalize_flag(f)).collect::<Vec<_>>();
        self.store(ids, mode, "FLAGS", &values, unchanged_since).await
    }

    async fn store_keywords(
        &self,
        ids: &SequenceSet,
        mode: StoreMode,
        keywords: &[&str],
        unchanged_since: Option<u64>,
    ) -> Result<()> {
        if keywords.is_empty() && mode != StoreMode::Replace {
            return Err(Error::validation("Empty keyword list"));
        }
        for keyword in keywords {
            validate_keyword(keyword)?;
        }
        let values = keywords.iter().map(|k| (*k).to_string()).collect::<Vec<_>>();
        self.store(ids, mode, "FLAGS", &values, unchanged_since).await
    }

    async fn store_labels(
        &self,
        ids: &SequenceSet,
        mode: StoreMode,
        labels: &[&str],
    ) -> Result<()> {
        self.client.require("X-GM-EXT-1")?;
        if labels.is_empty() && mode != StoreMode::Replace {
            return Err(Error::validation("Empty label list"));
        }
        let values = labels.iter().map(|l| quote(l)).collect::<Vec<_>>();
        self.store(ids, mode, "X-GM-LABELS", &values, None).await
    }

    async fn store(
        &self,
        ids: &SequenceSet,
        mode: StoreMode,
        item: &str,
        values: &[String],
        unchanged_since: Option<u64>,
    ) -> Result<()> {
        let mailbox = self.client.require_mailbox()?;
        let mut builder = self.command("STORE").atom(&ids.to_string());
        if let Some(modseq) = unchanged_since {
            if mailbox.nomodseq {
                tracing::debug!("UNCHANGEDSINCE ignored for a NOMODSEQ mailbox");
            } else {
                builder = builder.atom(&format!("(UNCHANGEDSINCE {modseq})"));
            }
        }
        let command = builder
            .atom(&format!("{}{item}.SILENT", mode.prefix()))
            .atom(&format!("({})", values.join(" ")))
            .build();
        self.client.exec(command).await.map(|_| ())
    }

    // === Copy and move ===

    /// Copies messages to another mailbox.
    pub async fn copy(&self, ids: &SequenceSet, destination: &str) -> Result<Option<CopyUid>> {
        self.client.require_mailbox()?;
        let command = self
            .command("COPY")
            .atom(&ids.to_string())
            .quoted(&self.client.encode_name(destination))
            .build();
        let completion = self.client.exec(command).await?;
        Ok(copy_uid(&completion))
    }

    /// Moves messages to another mailbox.
    ///
    /// Without MOVE this copies, flags the originals `\Deleted` and
    /// expunges. Without UIDPLUS the expunge cannot be limited to the moved
    /// messages, so messages already flagged `\Deleted` are unflagged for
    /// the duration and flagged again afterwards.
    pub async fn move_messages(&self, ids: &SequenceSet, destination: &str) -> Result<()> {
        let mailbox = self.client.require_mailbox()?;
        if self.client.server_supports("MOVE") {
            let command = self
                .command("MOVE")
                .atom(&ids.to_string())
                .quoted(&self.client.encode_name(destination))
                .build();
            return self.client.exec(command).await.map(|_| ());
        }
        if !mailbox.allows_deletion() {
            return Err(Error::validation(
                "Cannot move message: server does not allow deletion of messages",
            ));
        }

        self.copy(ids, destination).await?;
        let uids = self.client.uid();
        if self.by_uid && self.client.server_supports("UIDPLUS") {
            self.add_flags(ids, &["\\Deleted"], None).await?;
            return self.client.expunge(Some(ids)).await;
        }

        let deleted = uids.search(&[SearchKey::Deleted]).await?.ids;
        let deleted = if deleted.is_empty() {
            None
        } else {
            Some(SequenceSet::from_items(deleted.iter().map(u32::to_string))?)
        };
        if let Some(deleted) = &deleted {
            uids.del_flags(deleted, &["\\Deleted"], None).await?;
        }
        self.add_flags(ids, &["\\Deleted"], None).await?;
        self.client.expunge(None).await?;
        if let Some(deleted) = &deleted {
            uids.add_flags(deleted, &["\\Deleted"], None).await?;
        }
        Ok(())
    }
}

fn copy_uid(completion: &Completion) -> Option<CopyUid> {
    let code = completion.code("COPYUID")?;
    let set = |i: usize| {
        code.item(i)
            .and_then(Value::to_text)
            .and_then(|t| SequenceSet::parse(&t).ok())
    };
    Some(CopyUid {
        uidvalidity: code_number(code, 0)?,
        source: set(1)?,
        destination: set(2)?,
    })
}

fn code_number(code: &TextCode, index: usize) -> Option<u32> {
    code.item(index)
        .and_then(Value::as_number)
        .and_then(|n| u32::try_from(n).ok())
}

impl Client {
    /// Appends a message to a mailbox.
    ///
    /// Returns the assigned UID when the server reports APPENDUID.
    pub async fn append(&self, data: &[u8], options: AppendOptions) -> Result<Option<AppendUid>> {
        self.require_authenticated()?;
        let mailbox = match options.mailbox {
            Some(name) => name,
            None => self
                .mailbox()
                .map(|m| m.name)
                .ok_or_else(|| Error::validation("No mailbox specified or currently selected"))?,
        };

        let mut builder = Command::builder("APPEND").quoted(&self.encode_name(&mailbox));
        if !options.flags.is_empty() {
            let flags = options.flags.iter().map(|f| append_flag(f)).collect::<Vec<_>>();
            builder = builder.atom(&format!("({})", flags.join(" ")));
        }
        if let Some(date) = &options.date {
            builder = builder.quoted(&format_date_time(date));
        }
        let command = builder.literal(data, self.capabilities().literal_plus()).build();

        let completion = self.exec(command).await?;
        Ok(completion.code("APPENDUID").and_then(|code| {
            Some(AppendUid {
                uidvalidity: code_number(code, 0)?,
                uid: code_number(code, 1)?,
            })
        }))
    }

    /// Removes messages flagged `\Deleted`.
    ///
    /// With `uids`, only those messages are removed (UID EXPUNGE, needs
    /// UIDPLUS).
    pub async fn expunge(&self, uids: Option<&SequenceSet>) -> Result<()> {
        self.require_mailbox()?;
        let command = match uids {
            Some(uids) => {
                self.require("UIDPLUS")?;
                Command::builder("UID EXPUNGE").atom(&uids.to_string()).build()
            }
            None => Command::builder("EXPUNGE").build(),
        };
        self.exec(command).await.map(|_| ())
    }

    /// Searches by UID.
    pub async fn search(&self, criteria: &[SearchKey]) -> Result<SearchResults> {
        self.uid().search(criteria).await
    }

    /// ESEARCH by UID.
    pub async fn esearch(
        &self,
        criteria: &[SearchKey],
        options: &[EsearchReturn],
    ) -> Result<Esearch> {
        self.uid().esearch(criteria, options).await
    }

    /// SORT by UID.
    pub async fn sort(&self, order: &[SortKey], criteria: &[SearchKey]) -> Result<Vec<u32>> {
        self.uid().sort(order, criteria).await
    }

    /// THREAD by UID.
    pub async fn thread(&self, algorithm: &str, criteria: &[SearchKey]) -> Result<Vec<Value>> {
        self.uid().thread(algorithm, criteria).await
    }

    /// Fetches by UID.
    pub fn fetch(&self, uids: &SequenceSet, options: &FetchOptions) -> Result<FetchStream> {
        self.uid().fetch(uids, options)
    }

    /// Adds flags by UID.
    pub async fn add_flags(
        &self,
        uids: &SequenceSet,
        flags: &[&str],
        unchanged_since: Option<u64>,
    ) -> Result<()> {
        self.uid().add_flags(uids, flags, unchanged_since).await
    }

    /// Removes flags by UID.
    pub async fn del_flags(
        &self,
        uids: &SequenceSet,
        flags: &[&str],
        unchanged_since: Option<u64>,
    ) -> Result<()> {
        self.uid().del_flags(uids, flags, unchanged_since).await
    }

    /// Replaces flags by UID.
    pub async fn set_flags(
        &self,
        uids: &SequenceSet,
        flags: &[&str],
        unchanged_since: Option<u64>,
    ) -> Result<()> {
        self.uid().set_flags(uids, flags, unchanged_since).await
    }

    /// Adds keywords by UID.
    pub async fn add_keywords(
        &self,
        uids: &SequenceSet,
        keywords: &[&str],
        unchanged_since: Option<u64>,
    ) -> Result<()> {
        self.uid().add_keywords(uids, keywords, unchanged_since).await
    }

    /// Removes keywords by UID.
    pub async fn del_keywords(
        &self,
        uids: &SequenceSet,
        keywords: &[&str],
        unchanged_since: Option<u64>,
    ) -> Result<()> {
        self.uid().del_keywords(uids, keywords, unchanged_since).await
    }

    /// Replaces keywords by UID.
    pub async fn set_keywords(
        &self,
        uids: &SequenceSet,
        keywords: &[&str],
        unchanged_since: Option<u64>,
    ) -> Result<()> {
        self.uid().set_keywords(uids, keywords, unchanged_since).await
    }

    /// Adds Gmail labels by UID.
    pub async fn add_labels(&self, uids: &SequenceSet, labels: &[&str]) -> Result<()> {
        self.uid().add_labels(uids, labels).await
    }

    /// Removes Gmail labels by UID.
    pub async fn del_labels(&self, uids: &SequenceSet, labels: &[&str]) -> Result<()> {
        self.uid().del_labels(uids, labels).await
    }

    /// Replaces Gmail labels by UID.
    pub async fn set_labels(&self, uids: &SequenceSet, labels: &[&str]) -> Result<()> {
        self.uid().set_labels(uids, labels).await
    }

    /// Copies by UID.
    pub async fn copy(&self, uids: &SequenceSet, destination: &str) -> Result<Option<CopyUid>> {
        self.uid().copy(uids, destination).await
    }

    /// Moves by UID.
    pub async fn move_messages(&self, uids: &SequenceSet, destination: &str) -> Result<()> {
        self.uid().move_messages(uids, destination).await
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
    use chrono::TimeZone;

    use super::super::OpenOptions;
    use super::super::tests::{Server, logged_in};
    use super::*;

    async fn selected(caps: &str) -> (Client, Server, usize) {
        let (client, mut server, tag) = logged_in(caps).await;
        let open = tokio::spawn({
            let client = client.clone();
            async move { client.open_box("INBOX", OpenOptions::read_write()).await }
        });
        let condstore = if caps.split(' ').any(|c| c == "CONDSTORE") {
            " (CONDSTORE)"
        } else {
            ""
        };
        server
            .exchange(
                &format!("A{tag} SELECT \"INBOX\"{condstore}"),
                &format!(
                    "* FLAGS (\\Seen \\Deleted)\r\n\
                     * OK [PERMANENTFLAGS (\\Seen \\Deleted)] ok\r\n\
                     * 10 EXISTS\r\n\
                     A{tag} OK [READ-WRITE] done\r\n"
                ),
            )
            .await;
        open.await.unwrap().unwrap();
        (client, server, tag + 1)
    }

    #[tokio::test]
    async fn test_search_by_uid_and_seq() {
        let (client, mut server, tag) = selected("").await;
        let search = tokio::spawn({
            let client = client.clone();
            async move { client.search(&[SearchKey::Unseen, SearchKey::Larger(1000)]).await }
        });
        server
            .exchange(
                &format!("A{tag} UID SEARCH UNSEEN LARGER 1000"),
                &format!("* SEARCH 3 7 9\r\nA{tag} OK done\r\n"),
            )
            .await;
        assert_eq!(search.await.unwrap().unwrap().ids, vec![3, 7, 9]);

        let search = tokio::spawn({
            let client = client.clone();
            async move { client.seq().search(&[SearchKey::All]).await }
        });
        let next = tag + 1;
        server
            .exchange(&format!("A{next} SEARCH ALL"), &format!("* SEARCH\r\nA{next} OK done\r\n"))
            .await;
        assert!(search.await.unwrap().unwrap().ids.is_empty());
    }

    #[tokio::test]
    async fn test_search_requires_selection() {
        let (client, _server, _) = logged_in("").await;
        let err = client.search(&[SearchKey::All]).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_sort_command() {
        let (client, mut server, tag) = selected("SORT").await;
        let sort = tokio::spawn({
            let client = client.clone();
            async move {
                let order = ["-date".parse().unwrap(), "subject".parse().unwrap()];
                client.sort(&order, &[SearchKey::All]).await
            }
        });
        server
            .exchange(
                &format!("A{tag} UID SORT (REVERSE DATE SUBJECT) US-ASCII ALL"),
                &format!("* SORT 5 3 4\r\nA{tag} OK done\r\n"),
            )
            .await;
        assert_eq!(sort.await.unwrap().unwrap(), vec![5, 3, 4]);
    }

    #[tokio::test]
    async fn test_sort_needs_capability() {
        let (client, _server, _) = selected("").await;
        let err = client.sort(&["date".parse().unwrap()], &[SearchKey::All]).await.unwrap_err();
        assert!(matches!(err, Error::Capability(ref c) if c == "SORT"));
    }

    #[tokio::test]
    async fn test_store_with_unchanged_since() {
        let (client, mut server, tag) = selected("CONDSTORE").await;
        let store = tokio::spawn({
            let client = client.clone();
            async move {
                client
                    .add_flags(&SequenceSet::parse("1:5").unwrap(), &["Seen"], Some(12345))
                    .await
            }
        });
        server
            .exchange(
                &format!("A{tag} UID STORE 1:5 (UNCHANGEDSINCE 12345) +FLAGS.SILENT (\\Seen)"),
                &format!("A{tag} OK done\r\n"),
            )
            .await;
        store.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_invalid_keyword_rejected_before_sending() {
        let (client, _server, _) = selected("").await;
        let err = client
            .seq()
            .add_keywords(&SequenceSet::parse("1").unwrap(), &["bad word"], None)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid argument: The keyword \"bad word\" contains invalid characters"
        );
    }

    #[tokio::test]
    async fn test_copy_returns_copyuid() {
        let (client, mut server, tag) = selected("UIDPLUS").await;
        let copy = tokio::spawn({
            let client = client.clone();
            async move { client.copy(&SequenceSet::parse("2:4").unwrap(), "Archive").await }
        });
        server
            .exchange(
                &format!("A{tag} UID COPY 2:4 \"Archive\""),
                &format!("A{tag} OK [COPYUID 38505 2:4 3956:3958] done\r\n"),
            )
            .await;
        let copied = copy.await.unwrap().unwrap().unwrap();
        assert_eq!(copied.uidvalidity, 38505);
        assert_eq!(copied.destination.to_string(), "3956:3958");
    }

    #[tokio::test]
    async fn test_append_with_literal_plus() {
        let (client, mut server, tag) = selected("LITERAL+ UIDPLUS").await;
        let date = FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2024, 3, 7, 9, 30, 0)
            .unwrap();
        let append = tokio::spawn({
            let client = client.clone();
            async move {
                let options = AppendOptions {
                    mailbox: Some("Sent".into()),
                    flags: vec!["Seen".into(), "$Forwarded".into()],
                    date: Some(date),
                };
                client.append(b"Subject: hi\r\n\r\nbody", options).await
            }
        });
        server
            .expect(&format!(
                "A{tag} APPEND \"Sent\" (\\Seen $Forwarded) \"07-Mar-2024 09:30:00 +0100\" {{19+}}"
            ))
            .await;
        server.expect("Subject: hi").await;
        server.expect("").await;
        server.expect("body").await;
        server
            .send(&format!("A{tag} OK [APPENDUID 38505 3955] done\r\n"))
            .await;
        let uid = append.await.unwrap().unwrap().unwrap();
        assert_eq!(uid, AppendUid { uidvalidity: 38505, uid: 3955 });
    }

    #[tokio::test]
    async fn test_fetch_streams_messages() {
        let (client, mut server, tag) = selected("").await;
        let mut stream = client
            .seq()
            .fetch(&SequenceSet::parse("1").unwrap(), &FetchOptions::new().body("TEXT").size())
            .unwrap();
        server
            .exchange(
                &format!("A{tag} FETCH 1 (UID FLAGS INTERNALDATE RFC822.SIZE BODY.PEEK[TEXT])"),
                &format!(
                    "* 1 FETCH (UID 42 FLAGS (\\Seen) INTERNALDATE \"07-Mar-2024 09:30:00 +0100\" \
                     RFC822.SIZE 99 BODY[TEXT] {{5}}\r\nhello)\r\nA{tag} OK done\r\n"
                ),
            )
            .await;
        let mut message = stream.next().await.unwrap();
        assert_eq!(message.seqno, 1);
        let mut attrs = None;
        let mut body = Vec::new();
        while let Some(event) = message.next_event().await {
            match event {
                crate::fetch::MessageEvent::Body(stream, info) => {
                    assert_eq!(info.section, "TEXT");
                    body = stream.collect().await.to_vec();
                }
                crate::fetch::MessageEvent::Attributes(a) => attrs = Some(a),
            }
        }
        assert_eq!(body, b"hello");
        let attrs = attrs.unwrap();
        assert_eq!(attrs.uid, Some(42));
        assert_eq!(attrs.size, Some(99));
        stream.finish().await.unwrap();
    }

    #[tokio::test]
    async fn test_fetch_vanished_needs_qresync() {
        let (client, _server, _) = selected("CONDSTORE").await;
        let options = FetchOptions::new().changed_since(5).vanished();
        let err = client.fetch(&SequenceSet::all(), &options).unwrap_err();
        assert!(matches!(err, Error::Capability(ref c) if c == "QRESYNC"));
    }

    #[tokio::test]
    async fn test_move_needs_deletion() {
        let (client, mut server, tag) = logged_in("").await;
        let open = tokio::spawn({
            let client = client.clone();
            async move { client.open_box("INBOX", OpenOptions::read_only()).await }
        });
        server
            .exchange(
                &format!("A{tag} EXAMINE \"INBOX\""),
                &format!("* FLAGS (\\Seen)\r\nA{tag} OK [READ-ONLY] done\r\n"),
            )
            .await;
        open.await.unwrap().unwrap();
        let err = client
            .move_messages(&SequenceSet::parse("1").unwrap(), "Other")
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid argument: Cannot move message: server does not allow deletion of messages"
        );
    }
}
