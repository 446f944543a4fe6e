//! Server-level data: identification, quotas and metadata.

use std::collections::BTreeMap;

use super::Client;
use crate::command::{Command, MetadataDepth, validate_id_params};
use crate::parser::{Quota, QuotaResource, Untagged, quote};
use crate::{Error, Result};

/// Field/value pairs of an ID exchange; a `None` value is `NIL`.
pub type IdFields = BTreeMap<String, Option<String>>;

impl Client {
    /// Exchanges client and server identification (RFC 2971).
    ///
    /// Returns what the server sent about itself, `None` for `NIL`.
    pub async fn id(&self, fields: Option<&[(&str, &str)]>) -> Result<Option<IdFields>> {
        self.require("ID")?;
        let fields = fields.filter(|f| !f.is_empty());
        let builder = match fields {
            None => Command::builder("ID").atom("NIL"),
            Some(fields) => {
                validate_id_params(fields.iter().copied())?;
                let list = fields
                    .iter()
                    .map(|(key, value)| format!("{} {}", quote(key), quote(value)))
                    .collect::<Vec<_>>()
                    .join(" ");
                Command::builder("ID").atom(&format!("({list})"))
            }
        };

        let completion = self.exec(builder.build()).await?;
        Ok(completion
            .data
            .into_iter()
            .filter_map(|u| match u {
                Untagged::Id(fields) => Some(fields),
                _ => None,
            })
            .last()
            .flatten())
    }

    /// Reads the resources of a quota root.
    pub async fn get_quota(&self, root: &str) -> Result<Quota> {
        self.require("QUOTA")?;
        let command = Command::builder("GETQUOTA").quoted(&self.encode_name(root)).build();
        let completion = self.exec(command).await?;
        Ok(quotas(completion.data).next().unwrap_or_else(|| Quota {
            root: root.to_string(),
            resources: BTreeMap::new(),
        }))
    }

    /// Reads every quota root of a mailbox with its resources.
    pub async fn get_quota_root(
        &self,
        mailbox: &str,
    ) -> Result<BTreeMap<String, BTreeMap<String, QuotaResource>>> {
        self.require("QUOTA")?;
        let command = Command::builder("GETQUOTAROOT").quoted(&self.encode_name(mailbox)).build();
        let completion = self.exec(command).await?;
        Ok(quotas(completion.data).map(|q| (q.root, q.resources)).collect())
    }

    /// Sets resource limits on a quota root, e.g. `[("STORAGE", 512)]`.
    ///
    /// Returns the quota the server reported back, if any.
    pub async fn set_quota(&self, root: &str, limits: &[(&str, u64)]) -> Result<Option<Quota>> {
        self.require("QUOTA")?;
        let limits = limits
            .iter()
            .map(|(resource, limit)| format!("{} {limit}", resource.to_ascii_uppercase()))
            .collect::<Vec<_>>()
            .join(" ");
        let command = Command::builder("SETQUOTA")
            .quoted(&self.encode_name(root))
            .atom(&format!("({limits})"))
            .build();
        let completion = self.exec(command).await?;
        Ok(quotas(completion.data).next())
    }

    /// Reads metadata entries of `mailbox`, or server annotations for an
    /// empty name.
    pub async fn get_metadata(
        &self,
        mailbox: &str,
        keys: &[&str],
        depth: Option<MetadataDepth>,
    ) -> Result<BTreeMap<String, Option<String>>> {
        self.require("METADATA")?;
        if keys.is_empty() {
            return Err(Error::validation("Expected at least one metadata entry"));
        }
        for key in keys {
            validate_entry(key)?;
        }

        let mut builder = Command::builder("GETMETADATA");
        if let Some(depth) = depth {
            builder = builder.atom(&format!("(DEPTH {depth})"));
        }
        let command = builder
            .quoted(&self.encode_name(mailbox))
            .atom(&format!("({})", keys.join(" ")))
            .build();

        let completion = self.exec(command).await?;
        let mut entries = BTreeMap::new();
        for untagged in completion.data {
            if let Untagged::Metadata(metadata) = untagged {
                entries.extend(metadata.entries);
            }
        }
        Ok(entries)
    }

    /// Writes metadata entries; a `None` value removes the entry.
    pub async fn set_metadata(
        &self,
        mailbox: &str,
        entries: &[(&str, Option<&str>)],
    ) -> Result<()> {
        self.require("METADATA")?;
        if entries.is_empty() {
            return Err(Error::validation("Expected at least one metadata entry"));
        }

        let mut builder = Command::builder("SETMETADATA")
            .atom(&astring(&self.encode_name(mailbox)))
            .raw(" (");
        for (index, (key, value)) in entries.iter().enumerate() {
            validate_entry(key)?;
            if index > 0 {
                builder = builder.raw(" ");
            }
            builder = builder.raw(key);
            builder = match value {
                Some(value) => builder.string(value),
                None => builder.atom("NIL"),
            };
        }
        self.exec(builder.raw(")").build()).await.map(|_| ())
    }
}

fn quotas(data: Vec<Untagged>) -> impl Iterator<Item = Quota> {
    data.into_iter().filter_map(|u| match u {
        Untagged::Quota(quota) => Some(quota),
        _ => None,
    })
}

fn validate_entry(key: &str) -> Result<()> {
    if key.is_empty() || !key.bytes().all(is_astring_char) {
        return Err(Error::validation(format!("Invalid metadata entry name: {key}")));
    }
    Ok(())
}

const fn is_astring_char(b: u8) -> bool {
    b.is_ascii_graphic() && !matches!(b, b'(' | b')' | b'{' | b'%' | b'*' | b'"' | b'\\')
}

/// Writes an atom when the text allows it, a quoted string otherwise.
fn astring(text: &str) -> String {
    if !text.is_empty() && text.bytes().all(is_astring_char) {
        text.to_string()
    } else {
        quote(text)
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

    #[test]
    fn test_astring() {
        assert_eq!(astring("INBOX"), "INBOX");
        assert_eq!(astring(""), "\"\"");
        assert_eq!(astring("My Box"), "\"My Box\"");
    }

    #[tokio::test]
    async fn test_id_exchange() {
        let (client, mut server, tag) = logged_in("ID").await;
        let id = tokio::spawn({
            let client = client.clone();
            async move { client.id(Some(&[("name", "postline")][..])).await }
        });
        server
            .exchange(
                &format!("A{tag} ID (\"name\" \"postline\")"),
                &format!("* ID (\"name\" \"Dovecot\" \"support-url\" NIL)\r\nA{tag} OK done\r\n"),
            )
            .await;
        let fields = id.await.unwrap().unwrap().unwrap();
        assert_eq!(fields["name"].as_deref(), Some("Dovecot"));
        assert_eq!(fields["support-url"], None);
    }

    #[tokio::test]
    async fn test_id_limits() {
        let (client, _server, _) = logged_in("ID").await;
        let key = "k".repeat(31);
        let err = client.id(Some(&[(key.as_str(), "v")][..])).await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid argument: Max allowed key length is 30");
    }

    #[tokio::test]
    async fn test_quota_root() {
        let (client, mut server, tag) = logged_in("QUOTA").await;
        let quota = tokio::spawn({
            let client = client.clone();
            async move { client.get_quota_root("INBOX").await }
        });
        server
            .exchange(
                &format!("A{tag} GETQUOTAROOT \"INBOX\""),
                &format!(
                    "* QUOTAROOT INBOX \"\"\r\n\
                     * QUOTA \"\" (STORAGE 10 512)\r\n\
                     A{tag} OK done\r\n"
                ),
            )
            .await;
        let roots = quota.await.unwrap().unwrap();
        assert_eq!(roots[""]["storage"], QuotaResource { usage: 10, limit: 512 });
    }

    #[tokio::test]
    async fn test_set_metadata_nil_and_literal() {
        let (client, mut server, tag) = logged_in("METADATA").await;
        let set = tokio::spawn({
            let client = client.clone();
            async move {
                let entries = [("/private/comment", None), ("/shared/comment", Some("Grüße"))];
                client.set_metadata("", &entries).await
            }
        });
        server
            .expect(&format!("A{tag} SETMETADATA \"\" (/private/comment NIL /shared/comment {{7}}"))
            .await;
        server.send("+ go ahead\r\n").await;
        server.expect("Grüße)").await;
        server.send(&format!("A{tag} OK done\r\n")).await;
        set.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_metadata_needs_capability() {
        let (client, _server, _) = logged_in("").await;
        let err = client.get_metadata("INBOX", &["/shared/comment"], None).await.unwrap_err();
        assert!(matches!(err, Error::Capability(ref c) if c == "METADATA"));
    }
}
