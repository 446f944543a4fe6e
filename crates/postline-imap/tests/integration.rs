//! End-to-end sessions against a scripted server.
//!
//! The server answers every client line with the next canned reply and
//! records what it received, so each test checks both the client's view
//! and the exact command transcript.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::unreadable_literal,
    clippy::too_many_lines
)]

use std::collections::VecDeque;
use std::time::Duration;

use postline_imap::parser::AddressEntry;
use postline_imap::{
    ChannelHandler, Client, Config, FetchOptions, Keepalive, MessageEvent, MetadataDepth,
    NoopHandler, Notification, OpenOptions, QresyncParams, Security, SequenceSet,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::task::JoinHandle;

const THREE_EXPUNGES: &[&str] = &["* 1 EXPUNGE", "* 1 EXPUNGE", "* 1 EXPUNGE"];
const CAPS: &str = "* CAPABILITY IMAP4rev1 UNSELECT IDLE NAMESPACE QUOTA CHILDREN";

const EXAMINE_INBOX: &[&str] = &[
    "* FLAGS (\\Answered \\Flagged \\Draft \\Deleted \\Seen)",
    "* OK [PERMANENTFLAGS ()] Flags permitted.",
    "* OK [UIDVALIDITY 2] UIDs valid.",
    "* 685 EXISTS",
    "* 0 RECENT",
    "* OK [UIDNEXT 4422] Predicted next UID.",
];

/// Joins response lines with CRLF.
fn reply(lines: &[&str]) -> String {
    lines.iter().map(|l| format!("{l}\r\n")).collect()
}

fn tagged(tag: usize, untagged: &[&str], status: &str) -> String {
    format!("{}A{tag} {status}\r\n", reply(untagged))
}

/// Replies for the login sequence without QRESYNC: tags A0 to A3.
fn plain_login(extra_caps: &str) -> Vec<String> {
    vec![
        tagged(0, &[CAPS], "OK Thats all she wrote!"),
        tagged(1, &[&format!("{CAPS} {extra_caps}")], "OK authenticated (Success)"),
        tagged(2, &["* NAMESPACE ((\"\" \"/\")) NIL NIL"], "OK Success"),
        tagged(3, &["* LIST (\\Noselect) \"/\" \"/\""], "OK Success"),
    ]
}

/// Replies for the login sequence with QRESYNC: tags A0 to A4.
fn qresync_login() -> Vec<String> {
    vec![
        tagged(
            0,
            &["* CAPABILITY IMAP4rev1 UNSELECT IDLE NAMESPACE ENABLE"],
            "OK Thats all she wrote!",
        ),
        tagged(
            1,
            &["* CAPABILITY IMAP4rev1 UNSELECT IDLE NAMESPACE QRESYNC CONDSTORE ENABLE"],
            "OK authenticated (Success)",
        ),
        tagged(2, &["* ENABLED QRESYNC"], "OK Enabled (0.001 + 0.000 secs)."),
        tagged(3, &["* NAMESPACE ((\"\" \"/\")) NIL NIL"], "OK Success"),
        tagged(4, &["* LIST (\\Noselect) \"/\" \"/\""], "OK Success"),
    ]
}

fn logout(tag: usize) -> String {
    tagged(tag, &["* BYE LOGOUT Requested"], "OK good day (Success)")
}

const fn login_lines() -> [&'static str; 2] {
    ["A0 CAPABILITY", "A1 LOGIN \"foo\" \"bar\""]
}

/// Serves canned replies in order and returns every line the client sent.
///
/// `IDLE` and `DONE` are answered out of band; a client line written while
/// the IDLE continuation is still pending fails the test.
async fn serve(stream: DuplexStream, replies: Vec<String>) -> Vec<String> {
    let mut replies = VecDeque::from(replies);
    let (read, mut write) = tokio::io::split(stream);
    let mut lines = BufReader::new(read).lines();
    let mut seen = Vec::new();

    write.write_all(b"* OK asdf\r\n").await.unwrap();
    while let Ok(Some(line)) = lines.next_line().await {
        let answer = match line.as_str() {
            "IDLE IDLE" => {
                tokio::select! {
                    early = lines.next_line() => {
                        panic!("client wrote {early:?} before the IDLE continuation")
                    }
                    () = tokio::time::sleep(Duration::from_millis(100)) => {}
                }
                "+ idling\r\n".to_string()
            }
            "DONE" => "IDLE ok\r\n".to_string(),
            _ => match replies.pop_front() {
                Some(answer) => answer,
                None => panic!("unexpected client line: {line}"),
            },
        };
        seen.push(line);
        if write.write_all(answer.as_bytes()).await.is_err() {
            break;
        }
    }
    seen
}

fn config(keepalive: Option<Keepalive>) -> Config {
    Config::builder("127.0.0.1")
        .security(Security::None)
        .login("foo", "bar")
        .keepalive(keepalive)
        .build()
}

fn spawn_server(replies: Vec<String>) -> (DuplexStream, JoinHandle<Vec<String>>) {
    let (client_end, server_end) = tokio::io::duplex(4096);
    (client_end, tokio::spawn(serve(server_end, replies)))
}

async fn transcript(server: JoinHandle<Vec<String>>) -> Vec<String> {
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server did not see the connection close")
        .unwrap()
}

fn drain(notes: &mut tokio::sync::mpsc::UnboundedReceiver<Notification>) -> Vec<Notification> {
    let mut out = Vec::new();
    while let Ok(note) = notes.try_recv() {
        out.push(note);
    }
    out
}

#[tokio::test]
async fn test_idle_waits_for_continuation_before_done() {
    let mut replies = plain_login("UIDPLUS MOVE");
    replies.push(tagged(4, EXAMINE_INBOX, "OK [READ-ONLY] INBOX selected. (Success)"));
    replies.push(tagged(
        5,
        &[
            "* 1 FETCH (UID 1)",
            "* 1 FETCH (INTERNALDATE \"05-Sep-2004 00:38:03 +0000\" UID 1000)",
            "* 1 FETCH (BODY[TEXT] \"IMAP is terrible\")",
            "* 1 FETCH (FLAGS (\\Seen))",
        ],
        "OK Success",
    ));
    replies.push(tagged(
        6,
        &["* STATUS test (MESSAGES 231 RECENT 0 UNSEEN 0 UIDVALIDITY 123 UIDNEXT 442)"],
        "OK STATUS completed",
    ));
    replies.push(logout(7));
    let (stream, server) = spawn_server(replies);

    let client = Client::from_transport(stream, config(Some(Keepalive::default())), NoopHandler)
        .await
        .unwrap();
    client.open_box("INBOX", OpenOptions::read_only()).await.unwrap();

    let messages = client
        .seq()
        .fetch(&SequenceSet::from(1), &FetchOptions::new().body("TEXT"))
        .unwrap()
        .all()
        .await
        .unwrap();
    assert_eq!(messages.len(), 1);
    let text = messages[0].body("TEXT").unwrap();
    assert_eq!(&text.data[..], b"IMAP is terrible");
    assert_eq!((text.info.seqno, text.info.section.as_str(), text.info.size), (1, "TEXT", 16));
    assert_eq!(messages[0].attributes.uid, Some(1));
    assert_eq!(messages[0].attributes.flags, Some(vec!["\\Seen".to_string()]));

    tokio::time::sleep(Duration::from_millis(100)).await;
    let status = client.status("test").await.unwrap();
    assert_eq!(status.messages, Some(231));
    assert_eq!(status.uidnext, Some(442));
    client.end().await.unwrap();

    let mut expected = login_lines().to_vec();
    expected.extend([
        "A2 NAMESPACE",
        "A3 LIST \"\" \"\"",
        "A4 EXAMINE \"INBOX\"",
        "A5 FETCH 1 (UID FLAGS INTERNALDATE BODY.PEEK[TEXT])",
        "IDLE IDLE",
        "DONE",
        "A6 STATUS \"test\" (MESSAGES RECENT UNSEEN UIDVALIDITY UIDNEXT)",
        "A7 LOGOUT",
    ]);
    assert_eq!(transcript(server).await, expected);
}

#[tokio::test]
async fn test_unread_body_pauses_reading() {
    let body: String = (0..10240u32).map(|i| format!("{:02x}", (i * 7 + 3) % 256)).collect();
    let second = &body[..200];

    let mut replies = plain_login("UIDPLUS MOVE");
    replies.push(tagged(4, EXAMINE_INBOX, "OK [READ-ONLY] INBOX selected. (Success)"));
    replies.push(format!(
        "* 1 FETCH (UID 1000 FLAGS (\\Seen) INTERNALDATE \"05-Sep-2004 00:38:03 +0000\" \
         BODY[TEXT] {{{}}}\r\n{body})\r\n\
         * 2 FETCH (UID 1001 FLAGS (\\Seen) INTERNALDATE \"05-Sep-2004 00:38:13 +0000\" \
         BODY[TEXT] {{200}}\r\n{second})\r\n\
         A5 OK Success\r\n",
        body.len()
    ));
    replies.push(logout(6));
    let (stream, server) = spawn_server(replies);

    let client = Client::from_transport(stream, config(None), NoopHandler).await.unwrap();
    client.open_box("INBOX", OpenOptions::read_only()).await.unwrap();

    let ids = SequenceSet::from_ids(&[1, 2]).unwrap();
    let mut fetch = client.seq().fetch(&ids, &FetchOptions::new().body("TEXT")).unwrap();
    let mut bodies = Vec::new();
    let mut attributes = Vec::new();
    while let Some(mut message) = fetch.next().await {
        while let Some(event) = message.next_event().await {
            match event {
                MessageEvent::Body(stream, info) => {
                    if info.seqno == 1 {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                    bodies.push((info, stream.collect().await));
                }
                MessageEvent::Attributes(attrs) => attributes.push(*attrs),
            }
        }
    }
    fetch.finish().await.unwrap();

    assert_eq!(bodies.len(), 2);
    assert_eq!((bodies[0].0.seqno, bodies[0].0.size), (1, 20480));
    assert_eq!(&bodies[0].1[..], body.as_bytes());
    assert_eq!((bodies[1].0.seqno, bodies[1].0.size), (2, 200));
    assert_eq!(&bodies[1].1[..], second.as_bytes());
    assert_eq!(
        attributes.iter().map(|a| a.uid).collect::<Vec<_>>(),
        vec![Some(1000), Some(1001)]
    );
    assert_eq!(
        attributes[1].date.as_ref().unwrap().parsed.unwrap().to_rfc3339(),
        "2004-09-05T00:38:13+00:00"
    );
    client.end().await.unwrap();

    let transcript = transcript(server).await;
    assert_eq!(transcript[5], "A5 FETCH 1:2 (UID FLAGS INTERNALDATE BODY.PEEK[TEXT])");
    assert_eq!(transcript[6], "A6 LOGOUT");
}

#[tokio::test]
async fn test_move_with_move_capability() {
    let mut replies = plain_login("UIDPLUS MOVE");
    replies.push(tagged(4, EXAMINE_INBOX, "OK [READ-ONLY] INBOX selected. (Success)"));
    replies.push(tagged(
        5,
        &[
            "* OK [COPYUID 1 1:3 4:6] Moved UIDs.",
            "* 1 EXPUNGE",
            "* 1 EXPUNGE",
            "* 1 EXPUNGE",
        ],
        "OK Move completed (0.001 + 0.000 secs).",
    ));
    replies.push(logout(6));
    let (stream, server) = spawn_server(replies);

    let client = Client::from_transport(stream, config(None), NoopHandler).await.unwrap();
    client.open_box("INBOX", OpenOptions::read_only()).await.unwrap();
    client
        .uid()
        .move_messages(&SequenceSet::parse("1:3").unwrap(), "Other")
        .await
        .unwrap();
    assert_eq!(client.mailbox().unwrap().messages.total, 682);
    client.end().await.unwrap();

    let transcript = transcript(server).await;
    assert_eq!(
        &transcript[4..],
        ["A4 EXAMINE \"INBOX\"", "A5 UID MOVE 1:3 \"Other\"", "A6 LOGOUT"]
    );
}

#[tokio::test]
async fn test_move_with_uidplus() {
    let mut replies = plain_login("UIDPLUS");
    replies.push(tagged(
        4,
        &[
            "* FLAGS (\\Answered \\Flagged \\Draft \\Deleted \\Seen)",
            "* OK [PERMANENTFLAGS (\\Answered \\Flagged \\Draft \\Deleted \\Seen \\*)] Flags permitted.",
            "* OK [UIDVALIDITY 2] UIDs valid.",
            "* 685 EXISTS",
            "* 0 RECENT",
            "* OK [UIDNEXT 4422] Predicted next UID.",
        ],
        "OK [READ-WRITE] INBOX selected. (Success)",
    ));
    replies.push(tagged(5, &[], "OK [COPYUID 1 1:3 4:6] Copy completed."));
    replies.push(tagged(6, &[], "OK Store completed."));
    replies.push(tagged(7, THREE_EXPUNGES, "OK Expunge completed."));
    replies.push(logout(8));
    let (stream, server) = spawn_server(replies);

    let client = Client::from_transport(stream, config(None), NoopHandler).await.unwrap();
    client.open_box("INBOX", OpenOptions::read_write()).await.unwrap();
    client
        .uid()
        .move_messages(&SequenceSet::parse("1:3").unwrap(), "Other")
        .await
        .unwrap();
    client.end().await.unwrap();

    let transcript = transcript(server).await;
    assert_eq!(
        &transcript[4..],
        [
            "A4 SELECT \"INBOX\"",
            "A5 UID COPY 1:3 \"Other\"",
            "A6 UID STORE 1:3 +FLAGS.SILENT (\\Deleted)",
            "A7 UID EXPUNGE 1:3",
            "A8 LOGOUT",
        ]
    );
}

#[tokio::test]
async fn test_move_restores_deleted_flags() {
    let mut replies = plain_login("");
    replies.push(tagged(
        4,
        &[
            "* FLAGS (\\Answered \\Flagged \\Draft \\Deleted \\Seen)",
            "* OK [PERMANENTFLAGS (\\Answered \\Flagged \\Draft \\Deleted \\Seen \\*)] Flags permitted.",
            "* OK [UIDVALIDITY 2] UIDs valid.",
            "* 685 EXISTS",
            "* 0 RECENT",
            "* OK [UIDNEXT 4422] Predicted next UID.",
        ],
        "OK [READ-WRITE] INBOX selected. (Success)",
    ));
    replies.push(tagged(5, &[], "OK Copy completed."));
    replies.push(tagged(6, &["* SEARCH 4 5"], "OK Search completed."));
    replies.push(tagged(7, &[], "OK Store completed."));
    replies.push(tagged(8, &[], "OK Store completed."));
    replies.push(tagged(9, THREE_EXPUNGES, "OK Expunge completed."));
    replies.push(tagged(10, &[], "OK Store completed."));
    replies.push(logout(11));
    let (stream, server) = spawn_server(replies);

    let client = Client::from_transport(stream, config(None), NoopHandler).await.unwrap();
    client.open_box("INBOX", OpenOptions::read_write()).await.unwrap();
    client
        .uid()
        .move_messages(&SequenceSet::parse("1:3").unwrap(), "Other")
        .await
        .unwrap();
    client.end().await.unwrap();

    let transcript = transcript(server).await;
    assert_eq!(
        &transcript[4..],
        [
            "A4 SELECT \"INBOX\"",
            "A5 UID COPY 1:3 \"Other\"",
            "A6 UID SEARCH DELETED",
            "A7 UID STORE 4,5 -FLAGS.SILENT (\\Deleted)",
            "A8 UID STORE 1:3 +FLAGS.SILENT (\\Deleted)",
            "A9 EXPUNGE",
            "A10 UID STORE 4,5 +FLAGS.SILENT (\\Deleted)",
            "A11 LOGOUT",
        ]
    );
}

#[tokio::test]
async fn test_qresync_select_reports_changes() {
    let mut replies = qresync_login();
    replies.push(tagged(
        5,
        &[
            "* OK [CLOSED]",
            "* 100 EXISTS",
            "* 11 RECENT",
            "* OK [UIDVALIDITY 67890007] UIDVALIDITY",
            "* OK [UIDNEXT 600] Predicted next UID",
            "* OK [HIGHESTMODSEQ 90060115205545359] Highest mailbox mod-sequence",
            "* OK [UNSEEN 7] There are some unseen messages in the mailbox",
            "* FLAGS (\\Answered \\Flagged \\Draft \\Deleted \\Seen)",
            "* OK [PERMANENTFLAGS (\\Answered \\Flagged \\Draft \\Deleted \\Seen \\*)] Permanent flags",
            "* VANISHED (EARLIER) 41,43:116,118,120:211,214:540",
            "* 49 FETCH (UID 117 FLAGS (\\Seen \\Answered) MODSEQ (90060115194045001))",
            "* 50 FETCH (UID 119 FLAGS (\\Draft $MDNSent) MODSEQ (90060115194045308))",
            "* 51 FETCH (UID 541 FLAGS (\\Seen $Forwarded) MODSEQ (90060115194045001))",
        ],
        "OK [READ-WRITE] mailbox selected",
    ));
    replies.push(logout(6));
    let (stream, server) = spawn_server(replies);
    let (handler, mut notes) = ChannelHandler::new();

    let client = Client::from_transport(stream, config(None), handler).await.unwrap();
    let params = QresyncParams {
        uidvalidity: 67890007,
        modseq: 90060115194045000,
        known_uids: Some(SequenceSet::parse("41:211,214:541").unwrap()),
    };
    let mailbox = client
        .open_box("INBOX", OpenOptions::read_write().qresync(params))
        .await
        .unwrap();

    let flags = ["\\Answered", "\\Flagged", "\\Draft", "\\Deleted", "\\Seen"];
    assert_eq!(mailbox.name, "INBOX");
    assert_eq!(mailbox.flags, flags);
    assert_eq!(mailbox.perm_flags, flags);
    assert!(mailbox.keywords.is_empty());
    assert!(mailbox.new_keywords);
    assert!(!mailbox.read_only);
    assert!(mailbox.persistent_uids);
    assert!(!mailbox.nomodseq);
    assert_eq!(mailbox.uidvalidity, 67890007);
    assert_eq!(mailbox.uidnext, 600);
    assert_eq!(mailbox.highestmodseq.as_deref(), Some("90060115205545359"));
    assert_eq!((mailbox.messages.total, mailbox.messages.new), (100, 11));
    client.end().await.unwrap();

    let notes = drain(&mut notes);
    let vanished: Vec<_> = notes
        .iter()
        .filter_map(|n| match n {
            Notification::Vanished { uids, earlier } => Some((uids.clone(), *earlier)),
            _ => None,
        })
        .collect();
    assert_eq!(
        vanished,
        vec![(
            vec!["41", "43:116", "118", "120:211", "214:540"]
                .into_iter()
                .map(String::from)
                .collect::<Vec<_>>(),
            true
        )]
    );
    let updates: Vec<_> = notes
        .iter()
        .filter_map(|n| match n {
            Notification::Update { seqno, attributes } => Some((
                *seqno,
                attributes.uid,
                attributes.flags.clone().unwrap_or_default(),
                attributes.modseq.clone(),
            )),
            _ => None,
        })
        .collect();
    assert_eq!(updates.len(), 3);
    assert_eq!(
        updates[0],
        (
            49,
            Some(117),
            vec!["\\Seen".to_string(), "\\Answered".to_string()],
            Some("90060115194045001".to_string())
        )
    );
    assert_eq!((updates[1].0, updates[1].1), (50, Some(119)));
    assert_eq!(updates[2].3.as_deref(), Some("90060115194045001"));

    let transcript = transcript(server).await;
    assert_eq!(
        &transcript[2..],
        [
            "A2 ENABLE QRESYNC",
            "A3 NAMESPACE",
            "A4 LIST \"\" \"\"",
            "A5 SELECT \"INBOX\" (QRESYNC (67890007 90060115194045000 41:211,214:541))",
            "A6 LOGOUT",
        ]
    );
}

#[tokio::test]
async fn test_vanished_adjusts_message_total() {
    let mut replies = qresync_login();
    replies.push(tagged(5, EXAMINE_INBOX, "OK [READ-ONLY] INBOX selected. (Success)"));
    replies.push(tagged(
        6,
        &["* VANISHED 405,407,410,425:510"],
        "OK [HIGHESTMODSEQ 20010715194045319] expunged",
    ));
    replies.push(logout(7));
    let (stream, server) = spawn_server(replies);
    let (handler, mut notes) = ChannelHandler::new();

    let client = Client::from_transport(stream, config(None), handler).await.unwrap();
    let mailbox = client.open_box("INBOX", OpenOptions::read_only()).await.unwrap();
    assert_eq!(mailbox.messages.total, 685);

    client.expunge(None).await.unwrap();
    assert_eq!(client.mailbox().unwrap().messages.total, 596);
    client.end().await.unwrap();

    let vanished = drain(&mut notes).into_iter().find_map(|n| match n {
        Notification::Vanished { uids, earlier } => Some((uids, earlier)),
        _ => None,
    });
    assert_eq!(
        vanished,
        Some((vec!["405".into(), "407".into(), "410".into(), "425:510".into()], false))
    );

    let transcript = transcript(server).await;
    assert_eq!(&transcript[5..], ["A5 EXAMINE \"INBOX\" (CONDSTORE)", "A6 EXPUNGE", "A7 LOGOUT"]);
}

#[tokio::test]
async fn test_changed_since_fetch_requests_vanished() {
    let mut replies = qresync_login();
    replies.push(tagged(5, EXAMINE_INBOX, "OK [READ-ONLY] INBOX selected. (Success)"));
    replies.push(tagged(
        6,
        &[
            "* VANISHED (EARLIER) 300:310,405,411",
            "* 1 FETCH (UID 404 MODSEQ (65402) FLAGS (\\Seen) INTERNALDATE \"05-Sep-2004 00:38:03 +0000\" UID 1000)",
            "* 2 FETCH (UID 406 MODSEQ (75403) FLAGS (\\Deleted) INTERNALDATE \"05-Sep-2004 00:38:03 +0000\" UID 1000)",
            "* 4 FETCH (UID 408 MODSEQ (29738) FLAGS ($NoJunk $AutoJunk $MDNSent) INTERNALDATE \"05-Sep-2004 00:38:03 +0000\" UID 1000)",
        ],
        "OK FETCH completed",
    ));
    replies.push(logout(7));
    let (stream, server) = spawn_server(replies);
    let (handler, mut notes) = ChannelHandler::new();

    let client = Client::from_transport(stream, config(None), handler).await.unwrap();
    client.open_box("INBOX", OpenOptions::read_only()).await.unwrap();

    let messages = client
        .uid()
        .fetch(&SequenceSet::parse("300:500").unwrap(), &FetchOptions::new().changed_since(12345))
        .unwrap()
        .all()
        .await
        .unwrap();
    assert_eq!(messages.len(), 3);
    assert_eq!(
        messages.iter().map(|m| (m.seqno, m.attributes.uid)).collect::<Vec<_>>(),
        vec![(1, Some(404)), (2, Some(406)), (4, Some(408))]
    );
    client.end().await.unwrap();

    let vanished = drain(&mut notes).into_iter().find_map(|n| match n {
        Notification::Vanished { uids, earlier } => Some((uids, earlier)),
        _ => None,
    });
    assert_eq!(
        vanished,
        Some((vec!["300:310".into(), "405".into(), "411".into()], true))
    );

    let transcript = transcript(server).await;
    assert_eq!(
        transcript[6],
        "A6 UID FETCH 300:500 (UID FLAGS INTERNALDATE) (CHANGEDSINCE 12345 VANISHED)"
    );
}

fn metadata_login() -> Vec<String> {
    let caps = "* CAPABILITY IMAP4rev1 UNSELECT IDLE NAMESPACE QUOTA CHILDREN METADATA";
    vec![
        tagged(0, &[caps], "OK Thats all she wrote!"),
        tagged(1, &[&format!("{caps} UIDPLUS MOVE")], "OK authenticated (Success)"),
        tagged(2, &["* NAMESPACE ((\"\" \"/\")) NIL NIL"], "OK Success"),
        tagged(3, &["* LIST (\\Noselect) \"/\" \"/\""], "OK Success"),
    ]
}

#[tokio::test]
async fn test_metadata_with_depth() {
    let mut replies = metadata_login();
    replies.push(tagged(
        4,
        &[
            "* METADATA \"INBOX\" (/private/filters/values/small \"SMALLER 5000\" /private/filters/values/boss \"FROM \\\"boss@example.com\\\"\")",
        ],
        "OK GETMETADATA complete",
    ));
    replies.push(logout(5));
    let (stream, server) = spawn_server(replies);

    let client = Client::from_transport(stream, config(None), NoopHandler).await.unwrap();
    let entries = client
        .get_metadata("INBOX", &["/private/filters/values"], Some(MetadataDepth::One))
        .await
        .unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries["/private/filters/values/small"].as_deref(), Some("SMALLER 5000"));
    assert_eq!(
        entries["/private/filters/values/boss"].as_deref(),
        Some("FROM \"boss@example.com\"")
    );
    client.end().await.unwrap();

    let transcript = transcript(server).await;
    assert_eq!(transcript[4], "A4 GETMETADATA (DEPTH 1) \"INBOX\" (/private/filters/values)");
}

#[tokio::test]
async fn test_metadata_multiple_entries() {
    let mut replies = metadata_login();
    replies.push(tagged(
        4,
        &[
            "* METADATA \"INBOX\" \
             (/shared/comment \"Shared comment\" /private/comment \"My own comment\")",
        ],
        "OK GETMETADATA complete",
    ));
    replies.push(logout(5));
    let (stream, server) = spawn_server(replies);

    let client = Client::from_transport(stream, config(None), NoopHandler).await.unwrap();
    let entries = client
        .get_metadata("INBOX", &["/shared/comment", "/private/comment"], None)
        .await
        .unwrap();
    assert_eq!(entries["/shared/comment"].as_deref(), Some("Shared comment"));
    assert_eq!(entries["/private/comment"].as_deref(), Some("My own comment"));
    client.end().await.unwrap();

    let transcript = transcript(server).await;
    assert_eq!(transcript[4], "A4 GETMETADATA \"INBOX\" (/shared/comment /private/comment)");
}

#[tokio::test]
async fn test_metadata_set_single() {
    let mut replies = metadata_login();
    replies.push(tagged(4, &[], "OK SETMETADATA complete"));
    replies.push(logout(5));
    let (stream, server) = spawn_server(replies);

    let client = Client::from_transport(stream, config(None), NoopHandler).await.unwrap();
    client
        .set_metadata("INBOX", &[("/shared/comment", Some("Shared comment"))])
        .await
        .unwrap();
    client.end().await.unwrap();

    let transcript = transcript(server).await;
    assert_eq!(transcript[4], "A4 SETMETADATA INBOX (/shared/comment \"Shared comment\")");
}

#[tokio::test]
async fn test_fetch_multiple_bodies() {
    let headers = "Date: Wed, 1 Apr 2020 17:52:41 +0200 (CEST)\r\n\
                   From: Test User <user@localhost>\r\n\
                   To: Test User <user@localhost>\r\n\
                   Subject: Test\r\n\r\n";
    let mut replies = plain_login("UIDPLUS MOVE");
    replies.push(tagged(4, EXAMINE_INBOX, "OK [READ-ONLY] INBOX selected. (Success)"));
    replies.push(format!(
        "* 1 FETCH (UID 1 FLAGS (\\Seen) INTERNALDATE \"01-Apr-2020 15:52:41 +0000\" \
         ENVELOPE (\"Wed, 1 Apr 2020 17:52:41 +0200 (CEST)\" \"Test\" \
         ((\"Test User\" NIL \"user\" \"localhost\")) \
         ((\"Test User\" NIL \"user\" \"localhost\")) \
         ((\"Test User\" NIL \"user\" \"localhost\")) \
         ((\"Test User\" NIL \"user\" \"localhost\")) \
         NIL NIL NIL \"<608275564.8.1585756361537@localhost>\") \
         BODYSTRUCTURE (\"text\" \"plain\" (\"charset\" \"UTF-8\") NIL NIL \"7bit\" 15 2 \
         NIL NIL NIL NIL) \
         BODY[TEXT] {{15}}\r\nHello\r\nWorld!\r\n \
         BODY[HEADER.FIELDS (FROM TO SUBJECT DATE)] {{{}}}\r\n{headers})\r\n\
         A5 OK Success\r\n",
        headers.len()
    ));
    replies.push(logout(6));
    let (stream, server) = spawn_server(replies);

    let client = Client::from_transport(stream, config(None), NoopHandler).await.unwrap();
    client.open_box("INBOX", OpenOptions::read_only()).await.unwrap();

    let options = FetchOptions::new()
        .envelope()
        .structure()
        .body("TEXT")
        .header_fields(&["FROM", "TO", "SUBJECT", "DATE"]);
    let messages =
        client.seq().fetch(&SequenceSet::from(1), &options).unwrap().all().await.unwrap();
    assert_eq!(messages.len(), 1);
    let message = &messages[0];

    assert_eq!(message.attributes.uid, Some(1));
    assert_eq!(message.attributes.flags, Some(vec!["\\Seen".to_string()]));
    let envelope = message.attributes.envelope.as_ref().unwrap();
    assert_eq!(envelope.subject.as_deref(), Some("Test"));
    assert_eq!(
        envelope.message_id.as_deref(),
        Some("<608275564.8.1585756361537@localhost>")
    );
    match &envelope.from.as_ref().unwrap()[0] {
        AddressEntry::Mailbox(address) => {
            assert_eq!(address.name.as_deref(), Some("Test User"));
            assert_eq!(address.mailbox.as_deref(), Some("user"));
            assert_eq!(address.host.as_deref(), Some("localhost"));
        }
        other => panic!("expected a mailbox, got {other:?}"),
    }
    assert!(message.attributes.structure.is_some());

    assert_eq!(&message.body("TEXT").unwrap().data[..], b"Hello\r\nWorld!\r\n");
    let header = message
        .body("HEADER.FIELDS (FROM TO SUBJECT DATE)")
        .unwrap()
        .headers()
        .unwrap();
    assert_eq!(header.get("subject"), Some("Test"));
    assert_eq!(header.get("from"), Some("Test User <user@localhost>"));
    assert_eq!(header.get("to"), Some("Test User <user@localhost>"));
    assert_eq!(header.get("date"), Some("Wed, 1 Apr 2020 17:52:41 +0200 (CEST)"));
    client.end().await.unwrap();

    let transcript = transcript(server).await;
    assert_eq!(
        transcript[5],
        "A5 FETCH 1 (UID FLAGS INTERNALDATE ENVELOPE BODYSTRUCTURE BODY.PEEK[TEXT] \
         BODY.PEEK[HEADER.FIELDS (FROM TO SUBJECT DATE)])"
    );
}
