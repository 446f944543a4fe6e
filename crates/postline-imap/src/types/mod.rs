//! Core value types shared by the command and protocol layers.

mod capability;
mod mailbox;
mod sequence;

pub use capability::Capabilities;
pub use mailbox::{MailboxNode, MailboxStatus, MailboxTree, insert_listed};
pub use sequence::{SeqItem, SequenceSet};
