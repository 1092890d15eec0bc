//! Synchronize-Base strategy (§4.3.3, abstract): reconciles one mailbox's
//! reported UIDs against the store. Shared by `SynchronizeAll` (whole
//! folder) and `UpdateMessagesFlags` (a UID-restricted subset).

use crate::error::{OrchestratorError, Result};
use crate::ids::FolderId;
use crate::status::MessageStatus;
use crate::store::StoreKey;

use super::{Strategy, StrategyContext};

#[derive(Debug, Clone, Default)]
pub struct ReconciliationOutcome {
    pub additions: Vec<u32>,
    pub removals: Vec<u32>,
    pub reappearances: Vec<u32>,
    pub read_elsewhere: Vec<u32>,
    pub inconclusive: bool,
}

/// Strategies built on the same mailbox-reconciliation rules (§4.3.3).
/// Concrete strategies implement this as a marker (`impl SynchronizeBaseStrategy
/// for X {}`) to inherit the default `reconcile_folder`/`apply_reconciliation`.
#[async_trait::async_trait]
pub trait SynchronizeBaseStrategy: Strategy {
    /// SELECT `folder`, search SEEN/UNSEEN (optionally restricted to
    /// `uid_filter`), and compute the reconciliation outcome. When
    /// `exists_check` is set and SEEN ∪ UNSEEN disagrees with EXISTS,
    /// falls back to `UID SEARCH ALL`; if that still disagrees, the
    /// result is `Inconclusive` and only additions are populated.
    async fn reconcile_folder(
        &self,
        ctx: &mut StrategyContext,
        folder: &FolderId,
        uid_filter: Option<&[u32]>,
        exists_check: bool,
    ) -> Result<ReconciliationOutcome> {
        let completion = ctx
            .connection
            .select(folder, true)
            .await
            .map_err(|e| OrchestratorError::NoConnection(e.0))?;
        ctx.touch();
        let exists = completion.mailbox_properties.exists;

        let filter_clause = match uid_filter {
            Some(uids) if !uids.is_empty() => format!(
                " UID {}",
                uids.iter().map(|u| u.to_string()).collect::<Vec<_>>().join(",")
            ),
            _ => String::new(),
        };

        let seen = ctx
            .connection
            .uid_search(&format!("SEEN{}", filter_clause))
            .await
            .map_err(|e| OrchestratorError::NoConnection(e.0))?;
        let unseen = ctx
            .connection
            .uid_search(&format!("UNSEEN{}", filter_clause))
            .await
            .map_err(|e| OrchestratorError::NoConnection(e.0))?;
        ctx.touch();

        let mut reported: Vec<u32> = seen.iter().chain(unseen.iter()).copied().collect();
        reported.sort_unstable();
        reported.dedup();

        let mut inconclusive = false;
        if exists_check && reported.len() as u32 != exists {
            let all = ctx
                .connection
                .uid_search(&format!("ALL{}", filter_clause))
                .await
                .map_err(|e| OrchestratorError::NoConnection(e.0))?;
            ctx.touch();
            if all.len() as u32 != exists {
                inconclusive = true;
            }
            reported = all;
        }

        let stored = ctx.store.messages_metadata(&StoreKey::and([
            StoreKey::account(ctx.account.clone()),
            StoreKey::folder(folder.clone()),
        ]))?;

        let additions: Vec<u32> = reported
            .iter()
            .filter(|uid| !stored.iter().any(|m| &m.server_uid.numeric_uid() == *uid))
            .copied()
            .collect();

        if inconclusive {
            return Ok(ReconciliationOutcome {
                additions,
                inconclusive: true,
                ..Default::default()
            });
        }

        let removals: Vec<u32> = stored
            .iter()
            .filter(|m| {
                !m.status.contains(MessageStatus::REMOVED)
                    && !reported.contains(&m.server_uid.numeric_uid())
            })
            .map(|m| m.server_uid.numeric_uid())
            .collect();

        let reappearances: Vec<u32> = stored
            .iter()
            .filter(|m| {
                m.status.contains(MessageStatus::REMOVED)
                    && reported.contains(&m.server_uid.numeric_uid())
            })
            .map(|m| m.server_uid.numeric_uid())
            .collect();

        let read_elsewhere: Vec<u32> = stored
            .iter()
            .filter(|m| {
                seen.contains(&m.server_uid.numeric_uid())
                    && !m.status.contains(MessageStatus::READ_ELSEWHERE)
            })
            .map(|m| m.server_uid.numeric_uid())
            .collect();

        Ok(ReconciliationOutcome {
            additions,
            removals,
            reappearances,
            read_elsewhere,
            inconclusive: false,
        })
    }

    /// Apply everything in `outcome` except additions, which the caller
    /// schedules as preview fetches via `FetchSelectedStrategy` (§4.3.5).
    async fn apply_reconciliation(
        &self,
        ctx: &mut StrategyContext,
        folder: &FolderId,
        outcome: &ReconciliationOutcome,
    ) -> Result<()> {
        if !outcome.removals.is_empty() {
            ctx.store.remove_messages(
                &StoreKey::and([
                    StoreKey::account(ctx.account.clone()),
                    StoreKey::folder(folder.clone()),
                    StoreKey::server_uid_in(outcome.removals.clone()),
                ]),
                crate::store::RemovalRecordPolicy::KeepRemovalRecord,
            )?;
            ctx.store
                .purge_message_removal_records(&ctx.account, &outcome.removals)?;
        }

        if !outcome.reappearances.is_empty() {
            ctx.store.update_messages_metadata(
                &StoreKey::and([
                    StoreKey::account(ctx.account.clone()),
                    StoreKey::folder(folder.clone()),
                    StoreKey::server_uid_in(outcome.reappearances.clone()),
                ]),
                MessageStatus::REMOVED,
                false,
            )?;
        }

        if !outcome.read_elsewhere.is_empty() {
            ctx.store.update_messages_metadata(
                &StoreKey::and([
                    StoreKey::account(ctx.account.clone()),
                    StoreKey::folder(folder.clone()),
                    StoreKey::server_uid_in(outcome.read_elsewhere.clone()),
                ]),
                MessageStatus::READ_ELSEWHERE,
                true,
            )?;
        }

        ctx.touch();
        Ok(())
    }
}
