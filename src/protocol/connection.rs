//! `MaybeTlsStream` and `ProtocolConnection`: carried over near-verbatim from
//! the source codebase's `adapters/imap/connection.rs`, generalized with a
//! `MailboxProperties` accumulator and typed command methods that each
//! return a `CommandCompletion` (§4.2).

use std::pin::Pin;
use std::task::{Context, Poll};

use async_imap::types::Mailbox;
use async_imap::Session;
use async_native_tls::TlsStream;
use futures::io::{AsyncRead, AsyncWrite};
use futures::{StreamExt, TryStreamExt};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};
use tracing::info;

use super::{CapabilityDetector, CapabilityInfo, TagStatus};
use crate::error::{OrchestratorError, Result};
use crate::ids::FolderId;

/// Wire-level command failure (SELECT/SEARCH/FETCH/etc). Transient by
/// construction: a strategy decides whether to retry a narrower query or
/// fall back to `Inconclusive` (§7 propagation policy) rather than letting
/// this escape as an `OrchestratorError`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct WireError(pub String);

pub type WireResult<T> = std::result::Result<T, WireError>;

/// A stream that can be either TLS-encrypted or plain TCP.
#[derive(Debug)]
pub enum MaybeTlsStream {
    Tls(TlsStream<Compat<TcpStream>>),
    Plain(Compat<TcpStream>),
}

impl AsyncRead for MaybeTlsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            MaybeTlsStream::Tls(s) => Pin::new(s).poll_read(cx, buf),
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTlsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            MaybeTlsStream::Tls(s) => Pin::new(s).poll_write(cx, buf),
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Tls(s) => Pin::new(s).poll_flush(cx),
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Tls(s) => Pin::new(s).poll_close(cx),
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_close(cx),
        }
    }
}

pub type ImapSession = Session<MaybeTlsStream>;

/// Untagged mailbox state accumulated between commands (§4.2).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailboxProperties {
    pub exists: u32,
    pub uid_next: u32,
    pub uid_validity: u32,
    pub uid_list: Vec<u32>,
    pub selected: bool,
    pub selected_folder: Option<FolderId>,
}

impl MailboxProperties {
    fn absorb_mailbox(&mut self, folder: &FolderId, read_only: bool, mailbox: &Mailbox) {
        self.exists = mailbox.exists;
        self.uid_next = mailbox.uid_next.unwrap_or(0);
        self.uid_validity = mailbox.uid_validity.unwrap_or(0);
        self.selected = true;
        self.selected_folder = Some(folder.clone());
        let _ = read_only;
    }

    fn unselect(&mut self) {
        self.selected = false;
        self.selected_folder = None;
    }
}

#[derive(Debug, Clone)]
pub struct CommandCompletion {
    pub tag_status: TagStatus,
    pub mailbox_properties: MailboxProperties,
}

pub struct ProtocolConnection {
    pub session: ImapSession,
    pub has_gmail_ext: bool,
    pub read_only: bool,
    pub mailbox: MailboxProperties,
    pub capability: CapabilityInfo,
}

impl ProtocolConnection {
    /// SELECT (or EXAMINE, in read-only mode) a folder. Skipped if the
    /// folder is already selected on the connection (§4.3 "Folder
    /// selection").
    pub async fn select(&mut self, folder: &FolderId, read_only: bool) -> WireResult<CommandCompletion> {
        if self.mailbox.selected && self.mailbox.selected_folder.as_ref() == Some(folder) {
            return Ok(CommandCompletion {
                tag_status: TagStatus::Ok,
                mailbox_properties: self.mailbox.clone(),
            });
        }

        let mailbox = if read_only {
            self.session.examine(folder.as_str()).await
        } else {
            self.session.select(folder.as_str()).await
        }
        .map_err(|e| WireError(format!("SELECT failed: {}", e)))?;

        self.read_only = read_only;
        self.mailbox.absorb_mailbox(folder, read_only, &mailbox);
        Ok(CommandCompletion {
            tag_status: TagStatus::Ok,
            mailbox_properties: self.mailbox.clone(),
        })
    }

    pub async fn examine(&mut self, folder: &FolderId) -> WireResult<CommandCompletion> {
        self.select(folder, true).await
    }

    /// CLOSE unselects the current mailbox, expunging any `\Deleted`
    /// messages, without returning per-message status (§4.3 "Folder
    /// selection").
    pub async fn close(&mut self) -> WireResult<CommandCompletion> {
        self.session
            .close()
            .await
            .map_err(|e| WireError(format!("CLOSE failed: {}", e)))?;
        self.mailbox.unselect();
        Ok(CommandCompletion {
            tag_status: TagStatus::Ok,
            mailbox_properties: self.mailbox.clone(),
        })
    }

    pub async fn expunge(&mut self) -> WireResult<CommandCompletion> {
        let stream = self
            .session
            .expunge()
            .await
            .map_err(|e| WireError(format!("EXPUNGE failed: {}", e)))?;
        let expunged: Vec<u32> = stream
            .try_collect()
            .await
            .map_err(|e| WireError(format!("EXPUNGE collect failed: {}", e)))?;
        self.mailbox.exists = self.mailbox.exists.saturating_sub(expunged.len() as u32);
        Ok(CommandCompletion {
            tag_status: TagStatus::Ok,
            mailbox_properties: self.mailbox.clone(),
        })
    }

    pub async fn uid_search(&mut self, query: &str) -> WireResult<Vec<u32>> {
        let uids = self
            .session
            .uid_search(query)
            .await
            .map_err(|e| WireError(format!("SEARCH failed: {}", e)))?;
        let mut uids: Vec<u32> = uids.into_iter().collect();
        uids.sort_unstable();
        Ok(uids)
    }

    /// Issue a `UID FETCH`, tolerantly: individual untagged responses that
    /// fail to parse (e.g. an IMAP literal the parser chokes on) are
    /// logged and skipped rather than failing the whole command, matching
    /// the source codebase's `collect_tolerant` (`adapters/imap/historical.rs`).
    pub async fn uid_fetch(
        &mut self,
        uid_set: &str,
        query: &str,
    ) -> WireResult<Vec<async_imap::types::Fetch>> {
        let stream = self
            .session
            .uid_fetch(uid_set, query)
            .await
            .map_err(|e| WireError(format!("FETCH failed: {}", e)))?;
        futures::pin_mut!(stream);
        let mut items = Vec::new();
        while let Some(result) = stream.next().await {
            match result {
                Ok(fetch) => items.push(fetch),
                Err(e) => {
                    tracing::warn!(error = %e, uid_set, "skipping unparseable FETCH response");
                }
            }
        }
        Ok(items)
    }

    pub async fn uid_copy(&mut self, uid_set: &str, destination: &FolderId) -> WireResult<()> {
        self.session
            .uid_copy(uid_set, destination.as_str())
            .await
            .map_err(|e| WireError(format!("COPY failed: {}", e)))?;
        Ok(())
    }

    pub async fn uid_store(&mut self, uid_set: &str, query: &str) -> WireResult<()> {
        let stream = self
            .session
            .uid_store(uid_set, query)
            .await
            .map_err(|e| WireError(format!("STORE failed: {}", e)))?;
        stream
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| WireError(format!("STORE collect failed: {}", e)))?;
        Ok(())
    }

    pub fn capability_profile(&self) -> &CapabilityInfo {
        &self.capability
    }

    async fn refresh_capability(&mut self) -> Result<()> {
        let caps: Vec<String> = self
            .session
            .capabilities()
            .await
            .map_err(|e| OrchestratorError::NoConnection(format!("CAPABILITY failed: {}", e)))?
            .iter()
            .map(|c| format!("{:?}", c))
            .collect();
        self.capability = CapabilityDetector::detect(&caps);
        Ok(())
    }
}

pub async fn connect_with_tls(
    host: &str,
    port: u16,
    use_tls: bool,
    username: &str,
    password: &str,
) -> Result<ProtocolConnection> {
    info!(host = %host, port = port, tls = use_tls, "connecting to IMAP server");

    let tcp = TcpStream::connect((host, port))
        .await
        .map_err(|e| OrchestratorError::NoConnection(format!("TCP connection failed: {}", e)))?;

    let stream = if use_tls {
        let tcp = tcp.compat();
        let tls = async_native_tls::TlsConnector::new();
        let tls_stream = tls
            .connect(host, tcp)
            .await
            .map_err(|e| OrchestratorError::NoConnection(format!("TLS handshake failed: {}", e)))?;
        MaybeTlsStream::Tls(tls_stream)
    } else {
        MaybeTlsStream::Plain(tcp.compat())
    };

    let client = async_imap::Client::new(stream);

    let session = client
        .login(username, password)
        .await
        .map_err(|(e, _)| OrchestratorError::NoConnection(format!("login failed: {}", e)))?;

    let has_gmail_ext = host.contains("gmail.com") || host.contains("googlemail.com");

    let mut connection = ProtocolConnection {
        session,
        has_gmail_ext,
        read_only: true,
        mailbox: MailboxProperties::default(),
        capability: CapabilityInfo::default(),
    };
    connection.refresh_capability().await?;
    Ok(connection)
}
