//! Account/service configuration shapes consumed at registration time.
//!
//! Loading these from disk, a keychain, or an account-editor UI is out of
//! scope; this module only specifies the shape the orchestrator consumes.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub imap: ImapConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImapConfig {
    pub host: String,
    #[serde(default = "default_imap_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub tls: bool,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthConfig {
    Password { user: String, password: String },
}

fn default_imap_port() -> u16 {
    993
}

fn default_true() -> bool {
    true
}
