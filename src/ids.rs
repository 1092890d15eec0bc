//! Opaque, totally-ordered identifiers for accounts, folders, and messages.
//!
//! Equality on these types is identity: two ids compare equal iff they were
//! assigned the same underlying value, never by looking at what they name.

use std::fmt;

macro_rules! opaque_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(String);

        impl $name {
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            pub fn invalid() -> Self {
                Self(String::new())
            }

            pub fn is_valid(&self) -> bool {
                !self.0.is_empty()
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(raw: String) -> Self {
                Self(raw)
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self(raw.to_string())
            }
        }
    };
}

opaque_id!(AccountId);
opaque_id!(FolderId);

/// A message identity within the local store. Distinct from the server UID:
/// a message keeps its `MessageId` across moves/copies even though its
/// `ServerUid` changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(u64);

impl MessageId {
    pub const INVALID: MessageId = MessageId(0);

    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An IMAP UID, carried locally with an optional folder qualifier
/// (`"<folder>|<uid>"`) so a server UID can be disambiguated when a message
/// has been reassigned to a different mailbox than the one it was fetched
/// from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerUid {
    folder: Option<String>,
    uid: u32,
}

impl ServerUid {
    pub fn bare(uid: u32) -> Self {
        Self { folder: None, uid }
    }

    pub fn qualified(folder: impl Into<String>, uid: u32) -> Self {
        Self {
            folder: Some(folder.into()),
            uid,
        }
    }

    /// Parse `"<folder>|<uid>"` or a bare `"<uid>"`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.rsplit_once('|') {
            Some((folder, uid)) => uid.parse().ok().map(|uid| Self {
                folder: Some(folder.to_string()),
                uid,
            }),
            None => raw.parse().ok().map(Self::bare),
        }
    }

    pub fn numeric_uid(&self) -> u32 {
        self.uid
    }

    pub fn folder_qualifier(&self) -> Option<&str> {
        self.folder.as_deref()
    }
}

impl fmt::Display for ServerUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.folder {
            Some(folder) => write!(f, "{}|{}", folder, self.uid),
            None => write!(f, "{}", self.uid),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_id_equality_is_identity() {
        let a = AccountId::new("alice@example.com");
        let b = AccountId::new("alice@example.com");
        assert_eq!(a, b);
        assert!(a.is_valid());
        assert!(!AccountId::invalid().is_valid());
    }

    #[test]
    fn server_uid_strips_folder_qualifier() {
        let uid = ServerUid::parse("INBOX.Sent|482").unwrap();
        assert_eq!(uid.numeric_uid(), 482);
        assert_eq!(uid.folder_qualifier(), Some("INBOX.Sent"));
    }

    #[test]
    fn server_uid_bare_round_trips() {
        let uid = ServerUid::parse("17").unwrap();
        assert_eq!(uid.numeric_uid(), 17);
        assert_eq!(uid.folder_qualifier(), None);
        assert_eq!(uid.to_string(), "17");
    }

    #[test]
    fn message_id_invalid_sentinel() {
        assert!(!MessageId::INVALID.is_valid());
        assert!(MessageId::new(1).is_valid());
    }
}
