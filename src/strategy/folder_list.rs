//! Folder-List strategy (§4.3.2): breadth-first `LIST` with a `%`
//! wildcard from a configurable base folder. `\Noselect`/`\Noinferiors`
//! prune descent; folders gone from the server (when recursively
//! descending the whole account) are removed locally after purging any
//! pending removal records.

use std::collections::VecDeque;

use crate::error::{OrchestratorError, Result};
use crate::ids::FolderId;
use crate::store::{FolderRecord, StoreKey};

use super::{Strategy, StrategyContext};

pub struct FolderListStrategy {
    base: String,
    recursive: bool,
}

impl FolderListStrategy {
    pub fn new(base: impl Into<String>, recursive: bool) -> Self {
        Self {
            base: base.into(),
            recursive,
        }
    }
}

#[async_trait::async_trait]
impl Strategy for FolderListStrategy {
    async fn run(&mut self, ctx: &mut StrategyContext) -> Result<()> {
        let mut discovered: Vec<(String, Vec<String>)> = Vec::new();
        let mut queue = VecDeque::new();
        queue.push_back(self.base.clone());

        while let Some(prefix) = queue.pop_front() {
            let names = ctx
                .connection
                .session
                .list(Some(&prefix), Some("%"))
                .await
                .map_err(|e| OrchestratorError::NoConnection(format!("LIST failed: {}", e)))?;

            use futures::TryStreamExt;
            let entries: Vec<_> = names
                .try_collect()
                .await
                .map_err(|e| OrchestratorError::NoConnection(format!("LIST collect failed: {}", e)))?;
            ctx.touch();

            for entry in entries {
                let name = entry.name().to_string();
                let attributes: Vec<String> =
                    entry.attributes().iter().map(|a| format!("{:?}", a)).collect();

                let has_children = !attributes
                    .iter()
                    .any(|a| a.contains("NoInferiors") || a.contains("HasNoChildren"));

                discovered.push((name.clone(), attributes));

                if self.recursive && has_children {
                    queue.push_back(format!("{}%", name));
                }
            }

            if !self.recursive {
                break;
            }
        }

        let discovered_ids: Vec<FolderId> =
            discovered.iter().map(|(name, _)| FolderId::new(name.clone())).collect();

        for (name, attributes) in &discovered {
            ctx.store.add_folder(FolderRecord {
                account: ctx.account.clone(),
                id: FolderId::new(name.clone()),
                attributes: attributes.clone(),
                synchronization_enabled: !attributes.iter().any(|a| a.contains("NoSelect")),
            })?;
        }

        if self.recursive {
            let stored = ctx.store.folders(&ctx.account)?;
            for record in stored {
                if !discovered_ids.contains(&record.id) {
                    let messages = ctx.store.messages_metadata(&StoreKey::and([
                        StoreKey::account(ctx.account.clone()),
                        StoreKey::folder(record.id.clone()),
                    ]))?;
                    let uids: Vec<u32> = messages.iter().map(|m| m.server_uid.numeric_uid()).collect();
                    ctx.store.purge_message_removal_records(&ctx.account, &uids)?;
                    ctx.store.remove_folder(&ctx.account, &record.id)?;
                }
            }
        }

        ctx.touch();
        Ok(())
    }
}
