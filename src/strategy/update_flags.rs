//! Update-Messages-Flags strategy (§4.3.8): reconcile a cross-folder set
//! of messages against the server, restricted to their own UIDs. Reuses
//! `SynchronizeBaseStrategy`'s reconciliation with a `uid_filter` so an
//! unrelated message landing in the same folder never gets swept in.

use std::collections::HashMap;

use crate::error::Result;
use crate::ids::FolderId;

use super::synchronize_base::SynchronizeBaseStrategy;
use super::{Strategy, StrategyContext};

pub struct UpdateMessagesFlags {
    by_folder: HashMap<FolderId, Vec<u32>>,
}

impl UpdateMessagesFlags {
    pub fn new(messages: impl IntoIterator<Item = (FolderId, u32)>) -> Self {
        let mut by_folder: HashMap<FolderId, Vec<u32>> = HashMap::new();
        for (folder, uid) in messages {
            by_folder.entry(folder).or_default().push(uid);
        }
        Self { by_folder }
    }
}

impl SynchronizeBaseStrategy for UpdateMessagesFlags {}

#[async_trait::async_trait]
impl Strategy for UpdateMessagesFlags {
    async fn run(&mut self, ctx: &mut StrategyContext) -> Result<()> {
        for (folder, uids) in &self.by_folder {
            let outcome = self.reconcile_folder(ctx, folder, Some(uids), false).await?;
            self.apply_reconciliation(ctx, folder, &outcome).await?;
        }
        Ok(())
    }
}
