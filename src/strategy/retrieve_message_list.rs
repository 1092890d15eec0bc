//! Retrieve-Message-List strategy (§4.3.6): incrementally discover new
//! UIDs in a mailbox using cached `UIDNEXT`/`EXISTS`, falling back to a
//! full `UID SEARCH ALL` when the cache is stale or absent, and filling
//! any gap between the client's newest known UID and the server's
//! oldest reported UID with a second, narrower search.

use crate::error::{OrchestratorError, Result};
use crate::ids::{FolderId, MessageId, ServerUid};
use crate::status::MessageStatus;
use crate::store::{MessageMetadata, StoreKey};

use super::{Strategy, StrategyContext};

pub struct RetrieveMessageList {
    folder: FolderId,
    previous_uid_next: Option<u32>,
    previous_exists: Option<u32>,
}

impl RetrieveMessageList {
    pub fn new(folder: FolderId, previous_uid_next: Option<u32>, previous_exists: Option<u32>) -> Self {
        Self {
            folder,
            previous_uid_next,
            previous_exists,
        }
    }

    /// `UIDNEXT`/`EXISTS` pair to cache for the next run.
    pub fn watermark(&self) -> (Option<u32>, Option<u32>) {
        (self.previous_uid_next, self.previous_exists)
    }
}

#[async_trait::async_trait]
impl Strategy for RetrieveMessageList {
    async fn run(&mut self, ctx: &mut StrategyContext) -> Result<()> {
        let completion = ctx
            .connection
            .select(&self.folder, true)
            .await
            .map_err(|e| OrchestratorError::NoConnection(e.0))?;
        ctx.touch();

        let uid_next = completion.mailbox_properties.uid_next;
        let exists = completion.mailbox_properties.exists;

        let stored = ctx.store.messages_metadata(&StoreKey::and([
            StoreKey::account(ctx.account.clone()),
            StoreKey::folder(self.folder.clone()),
        ]))?;
        let newest_client = stored
            .iter()
            .map(|m| m.server_uid.numeric_uid())
            .max()
            .unwrap_or(0);

        let cache_fresh = self.previous_uid_next == Some(uid_next) && self.previous_exists.is_some();

        let mut reported: Vec<u32> = if cache_fresh && newest_client + 1 < uid_next {
            ctx.connection
                .uid_search(&format!("UID {}:*", newest_client + 1))
                .await
                .map_err(|e| OrchestratorError::NoConnection(e.0))?
        } else {
            ctx.connection
                .uid_search("ALL")
                .await
                .map_err(|e| OrchestratorError::NoConnection(e.0))?
        };
        ctx.touch();

        if let Some(&oldest_server) = reported.iter().min() {
            if newest_client + 1 < oldest_server {
                let gap = ctx
                    .connection
                    .uid_search(&format!("UID {}:{}", newest_client + 1, oldest_server - 1))
                    .await
                    .map_err(|e| OrchestratorError::NoConnection(e.0))?;
                ctx.touch();
                reported.extend(gap);
            }
        }

        let additions: Vec<u32> = reported
            .iter()
            .filter(|uid| !stored.iter().any(|m| &m.server_uid.numeric_uid() == *uid))
            .copied()
            .collect();

        for uid in additions {
            ctx.store.add_message(MessageMetadata {
                id: MessageId::INVALID,
                account: ctx.account.clone(),
                folder: self.folder.clone(),
                previous_folder: None,
                server_uid: ServerUid::bare(uid),
                size: 0,
                status: MessageStatus::from_bits(MessageStatus::NEW),
                message_id_header: String::new(),
                in_response_to: None,
            })?;
        }

        self.previous_uid_next = Some(uid_next);
        self.previous_exists = Some(exists);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watermark_reflects_constructor_args() {
        let strategy = RetrieveMessageList::new(FolderId::new("INBOX"), Some(10), Some(5));
        assert_eq!(strategy.watermark(), (Some(10), Some(5)));
    }
}
