//! IMAP server capability detection, carried over from the source
//! codebase's `sync/capability.rs` (§4.2's `CapabilityState`).

use serde::{Deserialize, Serialize};

/// Best available sync strategy given a server's advertised capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerCapability {
    /// QRESYNC (Dovecot, Cyrus): flag changes and deletions in one round-trip.
    Qresync,
    /// CONDSTORE only (Gmail): incremental flag changes, separate deletion detection.
    Condstore,
    /// Bare IMAP (Exchange): full flag comparison against the cache.
    Bare,
}

impl ServerCapability {
    pub fn description(&self) -> &'static str {
        match self {
            Self::Qresync => "QRESYNC (optimal sync with VANISHED responses)",
            Self::Condstore => "CONDSTORE (incremental flag sync)",
            Self::Bare => "basic IMAP (full flag comparison)",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityInfo {
    pub sync_capability: ServerCapability,
    pub supports_idle: bool,
    pub supports_compress: bool,
    pub supports_move: bool,
    pub supports_special_use: bool,
    pub supports_uidplus: bool,
    pub raw_capabilities: Vec<String>,
}

impl Default for CapabilityInfo {
    fn default() -> Self {
        Self {
            sync_capability: ServerCapability::Bare,
            supports_idle: false,
            supports_compress: false,
            supports_move: false,
            supports_special_use: false,
            supports_uidplus: false,
            raw_capabilities: Vec::new(),
        }
    }
}

pub struct CapabilityDetector;

impl CapabilityDetector {
    pub fn detect(capabilities: &[String]) -> CapabilityInfo {
        let caps_upper: Vec<String> = capabilities.iter().map(|c| c.to_uppercase()).collect();

        let has_qresync = caps_upper.iter().any(|c| c == "QRESYNC");
        let has_condstore = caps_upper.iter().any(|c| c == "CONDSTORE");
        let has_enable = caps_upper.iter().any(|c| c == "ENABLE");

        let sync_capability = if has_qresync && has_condstore && has_enable {
            ServerCapability::Qresync
        } else if has_condstore {
            ServerCapability::Condstore
        } else {
            ServerCapability::Bare
        };

        CapabilityInfo {
            sync_capability,
            supports_idle: caps_upper.iter().any(|c| c == "IDLE"),
            supports_compress: caps_upper.iter().any(|c| c.starts_with("COMPRESS")),
            supports_move: caps_upper.iter().any(|c| c == "MOVE"),
            supports_special_use: caps_upper.iter().any(|c| c == "SPECIAL-USE"),
            supports_uidplus: caps_upper.iter().any(|c| c == "UIDPLUS"),
            raw_capabilities: capabilities.to_vec(),
        }
    }

    /// Parse a `CAPABILITY` response line, whether untagged, tagged, or
    /// embedded in an `OK [CAPABILITY ...]` response code.
    pub fn parse_capability_line(line: &str) -> Vec<String> {
        let line = line.trim();

        let caps_str = if line.starts_with("* CAPABILITY ") {
            &line[13..]
        } else if line.starts_with("CAPABILITY ") {
            &line[11..]
        } else if line.contains("[CAPABILITY ") {
            if let Some(start) = line.find("[CAPABILITY ") {
                let after_cap = &line[start + 12..];
                match after_cap.find(']') {
                    Some(end) => &after_cap[..end],
                    None => return Vec::new(),
                }
            } else {
                return Vec::new();
            }
        } else {
            line
        };

        caps_str.split_whitespace().map(|s| s.to_string()).collect()
    }
}

pub mod profiles {
    use super::*;

    pub fn gmail() -> CapabilityInfo {
        CapabilityInfo {
            sync_capability: ServerCapability::Condstore,
            supports_idle: true,
            supports_compress: true,
            supports_move: true,
            supports_special_use: true,
            supports_uidplus: true,
            raw_capabilities: vec![
                "IMAP4rev1".into(),
                "CONDSTORE".into(),
                "IDLE".into(),
                "COMPRESS=DEFLATE".into(),
                "MOVE".into(),
                "SPECIAL-USE".into(),
                "UIDPLUS".into(),
            ],
        }
    }

    pub fn dovecot() -> CapabilityInfo {
        CapabilityInfo {
            sync_capability: ServerCapability::Qresync,
            supports_idle: true,
            supports_compress: true,
            supports_move: true,
            supports_special_use: true,
            supports_uidplus: true,
            raw_capabilities: vec![
                "IMAP4rev1".into(),
                "QRESYNC".into(),
                "CONDSTORE".into(),
                "ENABLE".into(),
                "IDLE".into(),
                "MOVE".into(),
                "SPECIAL-USE".into(),
                "UIDPLUS".into(),
            ],
        }
    }

    pub fn exchange() -> CapabilityInfo {
        CapabilityInfo {
            sync_capability: ServerCapability::Bare,
            supports_idle: true,
            supports_compress: false,
            supports_move: true,
            supports_special_use: true,
            supports_uidplus: true,
            raw_capabilities: vec![
                "IMAP4rev1".into(),
                "IDLE".into(),
                "MOVE".into(),
                "SPECIAL-USE".into(),
                "UIDPLUS".into(),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_qresync_requires_condstore_and_enable() {
        let caps = vec!["IMAP4rev1".into(), "QRESYNC".into(), "CONDSTORE".into(), "ENABLE".into()];
        assert_eq!(CapabilityDetector::detect(&caps).sync_capability, ServerCapability::Qresync);

        let caps = vec!["IMAP4rev1".into(), "QRESYNC".into()];
        assert_eq!(CapabilityDetector::detect(&caps).sync_capability, ServerCapability::Bare);
    }

    #[test]
    fn detect_condstore_without_qresync() {
        let caps = vec!["IMAP4rev1".into(), "CONDSTORE".into(), "IDLE".into()];
        assert_eq!(CapabilityDetector::detect(&caps).sync_capability, ServerCapability::Condstore);
    }

    #[test]
    fn parse_capability_from_ok_response_code() {
        let line = "A001 OK [CAPABILITY IMAP4rev1 IDLE CONDSTORE] Logged in";
        let caps = CapabilityDetector::parse_capability_line(line);
        assert_eq!(caps, vec!["IMAP4rev1", "IDLE", "CONDSTORE"]);
    }
}
