//! Message Service (§4.4): a per-account, per-kind façade owning one IMAP
//! connection and driving whichever `Strategy` a dispatched action names.
//! Generalizes the source codebase's "one engine per account"
//! (`state/sync_manager.rs`) to "one connection per (account, kind)",
//! matching §5's "one IMAP connection per service, shared only by actions
//! on that service".

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::ImapConfig;
use crate::error::{OrchestratorError, Result};
use crate::ids::AccountId;
use crate::protocol::connection::connect_with_tls;
use crate::protocol::{decode_body, ProtocolConnection};
use crate::status::MessageStatus;
use crate::store::{MailStore, SortKey, StoreKey};
use crate::strategy::{
    CopyMessages, DeleteMessages, ExportUpdates, FetchRequest, FetchSelectedStrategy,
    FolderListStrategy, MoveMessages, RetrieveMessageList, Strategy, StrategyContext,
    SynchronizeAll, SynchronizeOptions, UpdateMessagesFlags,
};

use super::action::{Action, RequestType, ServiceKind};

/// Owns the IMAP session for one `(account, kind)` pair across its
/// lifetime, reconnecting lazily the first time an action needs it.
pub struct ServiceWorker {
    pub account: AccountId,
    pub kind: ServiceKind,
    imap: ImapConfig,
    connection: Option<ProtocolConnection>,
}

impl ServiceWorker {
    pub fn new(account: AccountId, kind: ServiceKind, imap: ImapConfig) -> Self {
        Self {
            account,
            kind,
            imap,
            connection: None,
        }
    }

    async fn ensure_connection(&mut self) -> Result<()> {
        if self.connection.is_some() {
            return Ok(());
        }
        let crate::config::AuthConfig::Password { user, password } = &self.imap.auth;
        let connection =
            connect_with_tls(&self.imap.host, self.imap.port, self.imap.tls, user, password).await?;
        self.connection = Some(connection);
        Ok(())
    }

    /// Run the strategy implied by `action.request_type` against this
    /// service's connection, reusing it across calls (§4.3 "Folder
    /// selection" already skips a redundant SELECT within one connection).
    /// Returns the matching message ids for a `SearchMessages` action,
    /// empty for everything else.
    pub async fn execute(&mut self, store: Arc<dyn MailStore>, action: &Action) -> Result<Vec<u64>> {
        self.ensure_connection().await?;
        let connection = self.connection.take().expect("just ensured");
        let mut ctx = StrategyContext::new(store, connection, self.account.clone());

        let outcome = self.run_strategy(action, &mut ctx).await;
        self.connection = Some(ctx.connection);
        outcome
    }

    async fn run_strategy(&self, action: &Action, ctx: &mut StrategyContext) -> Result<Vec<u64>> {
        let p = &action.params;
        match action.request_type {
            RequestType::RetrieveFolderList | RequestType::RetrieveAll if self.kind == ServiceKind::Source => {
                let base = p.folder.as_ref().map(|f| f.as_str().to_string()).unwrap_or_default();
                let mut strategy = FolderListStrategy::new(base, true);
                strategy.run(ctx).await?;
                if action.request_type == RequestType::RetrieveAll {
                    let mut sync = SynchronizeAll::new(SynchronizeOptions {
                        export_changes: true,
                        retrieve_mail: true,
                    });
                    sync.run(ctx).await?;
                }
                Ok(Vec::new())
            }
            RequestType::RetrieveMessageList => {
                let folder = require_folder(p)?;
                let mut strategy = RetrieveMessageList::new(folder, None, None);
                strategy.run(ctx).await.map(|_| Vec::new())
            }
            RequestType::RetrieveMessages
            | RequestType::RetrieveMessagePart
            | RequestType::RetrieveMessageRange
            | RequestType::RetrieveMessagePartRange => {
                let folder = require_folder(p)?;
                let stored = ctx.store.messages_metadata(&StoreKey::and([
                    StoreKey::account(ctx.account.clone()),
                    StoreKey::folder(folder.clone()),
                    StoreKey::server_uid_in(p.uids.clone()),
                ]))?;
                let sizes: std::collections::HashMap<u32, u64> = stored
                    .iter()
                    .map(|m| (m.server_uid.numeric_uid(), m.size))
                    .collect();
                let requests = p
                    .uids
                    .iter()
                    .map(|&uid| FetchRequest {
                        folder: folder.clone(),
                        uid,
                        part: p.part.clone(),
                        min_bytes: p.min_bytes,
                        indicative_size: sizes.get(&uid).copied().unwrap_or_else(|| p.min_bytes.unwrap_or(0)),
                    })
                    .collect();
                let mut strategy = FetchSelectedStrategy::new(requests);
                strategy.run(ctx).await.map(|_| Vec::new())
            }
            RequestType::ExportUpdates => {
                let mut strategy = ExportUpdates::new();
                strategy.run(ctx).await.map(|_| Vec::new())
            }
            RequestType::Synchronize => {
                let mut strategy = SynchronizeAll::new(SynchronizeOptions {
                    export_changes: true,
                    retrieve_mail: true,
                });
                strategy.run(ctx).await.map(|_| Vec::new())
            }
            RequestType::CopyMessages => {
                let folder = require_folder(p)?;
                let destination = p
                    .destination_folder
                    .clone()
                    .ok_or_else(|| OrchestratorError::InvalidData("CopyMessages needs a destination".into()))?;
                let mut strategy = CopyMessages::new(folder, destination, p.uids.clone());
                strategy.run(ctx).await.map(|_| Vec::new())
            }
            RequestType::MoveMessages => {
                let folder = require_folder(p)?;
                let destination = p
                    .destination_folder
                    .clone()
                    .ok_or_else(|| OrchestratorError::InvalidData("MoveMessages needs a destination".into()))?;
                let mut strategy = MoveMessages::new(folder, destination, p.uids.clone());
                strategy.run(ctx).await.map(|_| Vec::new())
            }
            RequestType::DeleteMessages => {
                let folder = require_folder(p)?;
                let mut strategy = DeleteMessages::new(folder, p.uids.clone());
                strategy.run(ctx).await.map(|_| Vec::new())
            }
            RequestType::FlagMessages => {
                let folder = require_folder(p)?;
                apply_flags_on_wire(ctx, &folder, &p.uids, p.flags_to_set, p.flags_to_clear).await?;
                let mut strategy = UpdateMessagesFlags::new(p.uids.iter().map(|&uid| (folder.clone(), uid)));
                strategy.run(ctx).await.map(|_| Vec::new())
            }
            RequestType::CreateFolder => {
                let folder = require_folder(p)?;
                ctx.connection
                    .session
                    .create(folder.as_str())
                    .await
                    .map_err(|e| OrchestratorError::FrameworkFault(format!("CREATE failed: {}", e)))
                    .map(|_| Vec::new())
            }
            RequestType::RenameFolder => {
                let folder = require_folder(p)?;
                let destination = p
                    .destination_folder
                    .clone()
                    .ok_or_else(|| OrchestratorError::InvalidData("RenameFolder needs a destination name".into()))?;
                ctx.connection
                    .session
                    .rename(folder.as_str(), destination.as_str())
                    .await
                    .map_err(|e| OrchestratorError::FrameworkFault(format!("RENAME failed: {}", e)))
                    .map(|_| Vec::new())
            }
            RequestType::DeleteFolder => {
                let folder = require_folder(p)?;
                ctx.connection
                    .session
                    .delete(folder.as_str())
                    .await
                    .map_err(|e| OrchestratorError::FrameworkFault(format!("DELETE failed: {}", e)))?;
                ctx.store.remove_folder(&ctx.account, &folder)?;
                Ok(Vec::new())
            }
            RequestType::SearchMessages => {
                let folder = require_folder(p)?;
                let query = p
                    .query
                    .clone()
                    .ok_or_else(|| OrchestratorError::InvalidData("SearchMessages needs a query".into()))?;
                search_folder_body_text(ctx, &folder, &query).await
            }
            RequestType::ProtocolRequest => {
                let command = p
                    .query
                    .clone()
                    .ok_or_else(|| OrchestratorError::InvalidData("ProtocolRequest needs a command".into()))?;
                debug!(command = %command, "issuing raw protocol request");
                Err(OrchestratorError::FrameworkFault(
                    "raw protocol passthrough is not wired to a response channel".into(),
                ))
            }
            RequestType::TransmitMessages | RequestType::RetrieveFolderList | RequestType::RetrieveAll => {
                warn!(kind = ?action.request_type, service = ?self.kind, "request not handled by this service kind");
                Err(OrchestratorError::InvalidData(format!(
                    "{:?} is not valid for a {:?} service",
                    action.request_type, self.kind
                )))
            }
        }
    }
}

/// Local body-text search (§4.4 "Search"): SELECT the folder, page through
/// its stored messages in batches of 10, fetch `BODY[TEXT]`, and match
/// case-insensitively. A full per-MIME-part walk (as the preview pipeline
/// does) would need a BODYSTRUCTURE round trip per batch; this searches the
/// message's overall text section instead, which covers the common
/// single-part case the spec names (`text/*` parts) without the extra
/// fetch.
async fn search_folder_body_text(ctx: &mut StrategyContext, folder: &crate::ids::FolderId, query: &str) -> Result<Vec<u64>> {
    ctx.connection
        .select(folder, true)
        .await
        .map_err(|e| OrchestratorError::NoConnection(e.0))?;

    let key = StoreKey::and([StoreKey::account(ctx.account.clone()), StoreKey::folder(folder.clone())]);
    let ids = ctx.store.query_messages(&key, SortKey::ServerUidAscending)?;
    let metadata = ctx.store.messages_metadata(&key)?;
    let by_id: std::collections::HashMap<_, _> = metadata.iter().map(|m| (m.id, m)).collect();

    let needle = query.to_lowercase();
    let mut matches = Vec::new();

    for batch in ids.chunks(10) {
        let uid_set = batch
            .iter()
            .filter_map(|id| by_id.get(id).map(|m| m.server_uid.numeric_uid().to_string()))
            .collect::<Vec<_>>()
            .join(",");
        if uid_set.is_empty() {
            continue;
        }
        let fetches = ctx
            .connection
            .uid_fetch(&uid_set, "(UID BODY.PEEK[TEXT])")
            .await
            .map_err(|e| OrchestratorError::FrameworkFault(e.0))?;
        for fetch in fetches {
            let Some(uid) = fetch.uid else { continue };
            let Some(body) = fetch.body() else { continue };
            let text = decode_body(body, "7bit").to_lowercase();
            if text.contains(&needle) {
                if let Some(m) = metadata.iter().find(|m| m.server_uid.numeric_uid() == uid) {
                    matches.push(m.id.value());
                }
            }
        }
        ctx.bump_progress(batch.len() as u64);
    }

    Ok(matches)
}

fn require_folder(p: &super::action::ActionParams) -> Result<crate::ids::FolderId> {
    p.folder
        .clone()
        .ok_or_else(|| OrchestratorError::InvalidData("request needs a folder".into()))
}

/// Translate a `FlagMessages` action's bitmask onto the wire before the
/// local metadata update (§4.3.7 mentions only copy/move/delete explicitly;
/// flag propagation follows the same UID STORE idiom as those strategies).
async fn apply_flags_on_wire(
    ctx: &mut StrategyContext,
    folder: &crate::ids::FolderId,
    uids: &[u32],
    flags_to_set: u32,
    flags_to_clear: u32,
) -> Result<()> {
    if uids.is_empty() {
        return Ok(());
    }
    ctx.connection
        .select(folder, false)
        .await
        .map_err(|e| OrchestratorError::NoConnection(e.0))?;
    let uid_set = uids.iter().map(|u| u.to_string()).collect::<Vec<_>>().join(",");

    let set_flags = wire_flags(flags_to_set);
    if !set_flags.is_empty() {
        ctx.connection
            .uid_store(&uid_set, &format!("+FLAGS ({})", set_flags.join(" ")))
            .await
            .map_err(|e| OrchestratorError::FrameworkFault(e.0))?;
    }
    let clear_flags = wire_flags(flags_to_clear);
    if !clear_flags.is_empty() {
        ctx.connection
            .uid_store(&uid_set, &format!("-FLAGS ({})", clear_flags.join(" ")))
            .await
            .map_err(|e| OrchestratorError::FrameworkFault(e.0))?;
    }
    Ok(())
}

fn wire_flags(bits: u32) -> Vec<&'static str> {
    let mut flags = Vec::new();
    if bits & MessageStatus::READ != 0 {
        flags.push("\\Seen");
    }
    if bits & MessageStatus::TRASH != 0 {
        flags.push("\\Deleted");
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_flags_maps_known_bits_only() {
        let flags = wire_flags(MessageStatus::READ | MessageStatus::TRASH | MessageStatus::NEW);
        assert_eq!(flags, vec!["\\Seen", "\\Deleted"]);
    }

    #[test]
    fn wire_flags_empty_for_unmapped_bits() {
        assert!(wire_flags(MessageStatus::NEW | MessageStatus::OUTBOX).is_empty());
    }

    #[test]
    fn require_folder_errors_without_one() {
        let params = super::super::action::ActionParams::default();
        assert!(require_folder(&params).is_err());
    }
}
