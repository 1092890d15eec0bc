//! Copy/Move/Delete strategies (§4.3.7).
//!
//! Servers without `UIDPLUS` give no reliable way to learn the UIDs a
//! `COPY` created. The workaround: re-select the destination and read
//! back `RECENT`, matching the copied message count in order. Move
//! layers deletion of the source on top of copy; delete alone just
//! flags and expunges.

use crate::error::{OrchestratorError, Result};
use crate::ids::{FolderId, MessageId, ServerUid};
use crate::status::MessageStatus;
use crate::store::{MessageMetadata, RemovalRecordPolicy, StoreKey};

use super::{Strategy, StrategyContext};

pub struct CopyMessages {
    pub source: FolderId,
    pub destination: FolderId,
    pub uids: Vec<u32>,
}

impl CopyMessages {
    pub fn new(source: FolderId, destination: FolderId, uids: Vec<u32>) -> Self {
        Self {
            source,
            destination,
            uids,
        }
    }

    async fn copy(&self, ctx: &mut StrategyContext) -> Result<Vec<MessageMetadata>> {
        if self.uids.is_empty() {
            return Ok(Vec::new());
        }

        ctx.connection
            .select(&self.source, true)
            .await
            .map_err(|e| OrchestratorError::NoConnection(e.0))?;
        ctx.touch();

        let uid_list = self.uids.iter().map(|u| u.to_string()).collect::<Vec<_>>().join(",");
        ctx.connection
            .uid_copy(&uid_list, &self.destination)
            .await
            .map_err(|e| OrchestratorError::NoConnection(e.0))?;
        ctx.touch();

        let source_metadata = ctx.store.messages_metadata(&StoreKey::and([
            StoreKey::account(ctx.account.clone()),
            StoreKey::folder(self.source.clone()),
            StoreKey::server_uid_in(self.uids.clone()),
        ]))?;

        ctx.connection
            .select(&self.destination, true)
            .await
            .map_err(|e| OrchestratorError::NoConnection(e.0))?;
        ctx.touch();

        let mut recent = ctx
            .connection
            .uid_search("RECENT")
            .await
            .map_err(|e| OrchestratorError::NoConnection(e.0))?;
        ctx.touch();
        recent.sort_unstable();

        let take = recent.len().min(source_metadata.len());
        let new_uids = &recent[recent.len() - take..];

        let mut created = Vec::with_capacity(take);
        for (new_uid, original) in new_uids.iter().zip(source_metadata.iter().rev().take(take).rev()) {
            let mut status = original.status;
            status.remove(MessageStatus::REMOVED);
            let metadata = MessageMetadata {
                id: MessageId::INVALID,
                account: ctx.account.clone(),
                folder: self.destination.clone(),
                previous_folder: Some(self.source.clone()),
                server_uid: ServerUid::bare(*new_uid),
                size: original.size,
                status,
                message_id_header: original.message_id_header.clone(),
                in_response_to: original.in_response_to.clone(),
            };
            ctx.store.add_message(metadata.clone())?;
            created.push(metadata);
        }

        Ok(created)
    }
}

#[async_trait::async_trait]
impl Strategy for CopyMessages {
    async fn run(&mut self, ctx: &mut StrategyContext) -> Result<()> {
        self.copy(ctx).await?;
        Ok(())
    }
}

pub struct MoveMessages {
    copy: CopyMessages,
}

impl MoveMessages {
    pub fn new(source: FolderId, destination: FolderId, uids: Vec<u32>) -> Self {
        Self {
            copy: CopyMessages::new(source, destination, uids),
        }
    }
}

#[async_trait::async_trait]
impl Strategy for MoveMessages {
    async fn run(&mut self, ctx: &mut StrategyContext) -> Result<()> {
        if self.copy.uids.is_empty() {
            return Ok(());
        }
        self.copy.copy(ctx).await?;

        // `copy()` leaves the source folder deselected (destination is
        // selected last); re-select it to flag and expunge the originals.
        ctx.connection
            .select(&self.copy.source, false)
            .await
            .map_err(|e| OrchestratorError::NoConnection(e.0))?;
        ctx.touch();

        let uid_list = self
            .copy
            .uids
            .iter()
            .map(|u| u.to_string())
            .collect::<Vec<_>>()
            .join(",");
        ctx.connection
            .uid_store(&uid_list, "+FLAGS (\\Deleted)")
            .await
            .map_err(|e| OrchestratorError::NoConnection(e.0))?;
        ctx.touch();

        ctx.connection
            .close()
            .await
            .map_err(|e| OrchestratorError::NoConnection(e.0))?;
        ctx.connection
            .examine(&self.copy.source)
            .await
            .map_err(|e| OrchestratorError::NoConnection(e.0))?;
        ctx.touch();

        ctx.store.remove_messages(
            &StoreKey::and([
                StoreKey::account(ctx.account.clone()),
                StoreKey::folder(self.copy.source.clone()),
                StoreKey::server_uid_in(self.copy.uids.clone()),
            ]),
            RemovalRecordPolicy::NoRemovalRecord,
        )?;

        Ok(())
    }
}

pub struct DeleteMessages {
    pub folder: FolderId,
    pub uids: Vec<u32>,
}

impl DeleteMessages {
    pub fn new(folder: FolderId, uids: Vec<u32>) -> Self {
        Self { folder, uids }
    }
}

#[async_trait::async_trait]
impl Strategy for DeleteMessages {
    async fn run(&mut self, ctx: &mut StrategyContext) -> Result<()> {
        if self.uids.is_empty() {
            return Ok(());
        }

        ctx.connection
            .select(&self.folder, false)
            .await
            .map_err(|e| OrchestratorError::NoConnection(e.0))?;
        ctx.touch();

        let uid_list = self.uids.iter().map(|u| u.to_string()).collect::<Vec<_>>().join(",");
        ctx.connection
            .uid_store(&uid_list, "+FLAGS (\\Deleted)")
            .await
            .map_err(|e| OrchestratorError::NoConnection(e.0))?;
        ctx.touch();

        ctx.connection
            .close()
            .await
            .map_err(|e| OrchestratorError::NoConnection(e.0))?;
        ctx.connection
            .examine(&self.folder)
            .await
            .map_err(|e| OrchestratorError::NoConnection(e.0))?;
        ctx.touch();

        ctx.store.remove_messages(
            &StoreKey::and([
                StoreKey::account(ctx.account.clone()),
                StoreKey::folder(self.folder.clone()),
                StoreKey::server_uid_in(self.uids.clone()),
            ]),
            RemovalRecordPolicy::NoRemovalRecord,
        )?;

        Ok(())
    }
}
