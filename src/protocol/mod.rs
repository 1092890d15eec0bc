//! Protocol Connection (§4.2): one logical IMAP session per service, issuing
//! commands strictly in order and accumulating untagged responses into a
//! `MailboxProperties` structure visible to the strategy between commands.

pub mod capability;
pub mod connection;
pub mod folders;
pub mod mime;

pub use capability::{CapabilityDetector, CapabilityInfo, ServerCapability};
pub use connection::{CommandCompletion, MailboxProperties, MaybeTlsStream, ProtocolConnection};
pub use folders::{find_sent_folder, folders_to_sync, FolderInfo, FolderPriority};
pub use mime::{decode_body, encoding_to_string, find_eligible_parts, part_to_section_path};

/// Outcome of a tagged IMAP command completion (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagStatus {
    Ok,
    No,
    Bad,
}
