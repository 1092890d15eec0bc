//! In-memory `MailStore`, used by strategy and orchestrator unit tests so
//! they don't need a filesystem (§2.1 ambient test tooling).

use std::sync::Mutex;

use super::key::StoreKey;
use super::{FolderRecord, MailStore, MessageMetadata, RemovalRecordPolicy, SortKey};
use crate::error::Result;
use crate::ids::{AccountId, FolderId, MessageId};
use crate::status::MessageStatus;

#[derive(Default)]
struct Inner {
    messages: Vec<MessageMetadata>,
    folders: Vec<FolderRecord>,
    next_id: u64,
    retrieval_in_progress: Vec<AccountId>,
    transmission_in_progress: Vec<AccountId>,
}

#[derive(Default)]
pub struct MemoryMailStore {
    inner: Mutex<Inner>,
}

impl MemoryMailStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MailStore for MemoryMailStore {
    fn query_messages(&self, key: &StoreKey, sort: SortKey) -> Result<Vec<MessageId>> {
        let inner = self.inner.lock().unwrap();
        let mut matched: Vec<&MessageMetadata> =
            inner.messages.iter().filter(|m| key.matches(m)).collect();
        match sort {
            SortKey::ServerUidAscending => {
                matched.sort_by_key(|m| m.server_uid.numeric_uid());
            }
            SortKey::DateDescending => {
                matched.sort_by(|a, b| b.id.value().cmp(&a.id.value()));
            }
        }
        Ok(matched.into_iter().map(|m| m.id.clone()).collect())
    }

    fn messages_metadata(&self, key: &StoreKey) -> Result<Vec<MessageMetadata>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .messages
            .iter()
            .filter(|m| key.matches(m))
            .cloned()
            .collect())
    }

    fn add_message(&self, mut metadata: MessageMetadata) -> Result<MessageId> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let id = MessageId::new(inner.next_id);
        metadata.id = id.clone();
        inner.messages.push(metadata);
        Ok(id)
    }

    fn update_message(&self, metadata: MessageMetadata) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(slot) = inner.messages.iter_mut().find(|m| m.id == metadata.id) {
            *slot = metadata;
        }
        Ok(())
    }

    fn remove_messages(&self, key: &StoreKey, policy: RemovalRecordPolicy) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        match policy {
            RemovalRecordPolicy::NoRemovalRecord => {
                inner.messages.retain(|m| !key.matches(m));
            }
            RemovalRecordPolicy::KeepRemovalRecord => {
                for message in inner.messages.iter_mut() {
                    if key.matches(message) {
                        message.status.insert(MessageStatus::REMOVED);
                    }
                }
            }
        }
        Ok(())
    }

    fn update_messages_metadata(&self, key: &StoreKey, bit: u32, value: bool) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        for message in inner.messages.iter_mut() {
            if key.matches(message) {
                message.status.set(bit, value);
            }
        }
        Ok(())
    }

    fn purge_message_removal_records(&self, account: &AccountId, uids: &[u32]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        for message in inner.messages.iter_mut() {
            if &message.account == account && uids.contains(&message.server_uid.numeric_uid()) {
                message.status.remove(MessageStatus::REMOVED);
            }
        }
        Ok(())
    }

    fn add_folder(&self, folder: FolderRecord) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(slot) = inner
            .folders
            .iter_mut()
            .find(|f| f.account == folder.account && f.id == folder.id)
        {
            *slot = folder;
        } else {
            inner.folders.push(folder);
        }
        Ok(())
    }

    fn update_folder(&self, folder: FolderRecord) -> Result<()> {
        self.add_folder(folder)
    }

    fn remove_folder(&self, account: &AccountId, folder: &FolderId) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .folders
            .retain(|f| !(&f.account == account && &f.id == folder));
        Ok(())
    }

    fn folders(&self, account: &AccountId) -> Result<Vec<FolderRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .folders
            .iter()
            .filter(|f| &f.account == account)
            .cloned()
            .collect())
    }

    fn set_retrieval_in_progress(&self, accounts: &[AccountId], in_progress: bool) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        for account in accounts {
            inner.retrieval_in_progress.retain(|a| a != account);
            if in_progress {
                inner.retrieval_in_progress.push(account.clone());
            }
        }
        Ok(())
    }

    fn set_transmission_in_progress(
        &self,
        accounts: &[AccountId],
        in_progress: bool,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        for account in accounts {
            inner.transmission_in_progress.retain(|a| a != account);
            if in_progress {
                inner.transmission_in_progress.push(account.clone());
            }
        }
        Ok(())
    }

    fn is_retrieval_in_progress(&self, account: &AccountId) -> Result<bool> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.retrieval_in_progress.contains(account))
    }

    fn is_transmission_in_progress(&self, account: &AccountId) -> Result<bool> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.transmission_in_progress.contains(account))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ServerUid;

    fn metadata(account: &AccountId, folder: &FolderId, uid: u32) -> MessageMetadata {
        MessageMetadata {
            id: MessageId::INVALID,
            account: account.clone(),
            folder: folder.clone(),
            previous_folder: None,
            server_uid: ServerUid::bare(uid),
            size: 10,
            status: MessageStatus::empty(),
            message_id_header: format!("<{}@example.com>", uid),
            in_response_to: None,
        }
    }

    #[test]
    fn query_messages_orders_by_uid_ascending() {
        let store = MemoryMailStore::new();
        let account = AccountId::new("a@example.com");
        let folder = FolderId::new("INBOX");
        store.add_message(metadata(&account, &folder, 5)).unwrap();
        store.add_message(metadata(&account, &folder, 1)).unwrap();
        store.add_message(metadata(&account, &folder, 3)).unwrap();

        let ids = store
            .query_messages(&StoreKey::folder(folder), SortKey::ServerUidAscending)
            .unwrap();
        let uids: Vec<u32> = ids
            .iter()
            .map(|id| {
                store
                    .messages_metadata(&StoreKey::account(account.clone()))
                    .unwrap()
                    .into_iter()
                    .find(|m| &m.id == id)
                    .unwrap()
                    .server_uid
                    .numeric_uid()
            })
            .collect();
        assert_eq!(uids, vec![1, 3, 5]);
    }

    #[test]
    fn remove_with_keep_policy_sets_removed_bit_instead_of_deleting() {
        let store = MemoryMailStore::new();
        let account = AccountId::new("a@example.com");
        let folder = FolderId::new("INBOX");
        let id = store.add_message(metadata(&account, &folder, 1)).unwrap();

        store
            .remove_messages(
                &StoreKey::folder(folder.clone()),
                RemovalRecordPolicy::KeepRemovalRecord,
            )
            .unwrap();

        let rows = store
            .messages_metadata(&StoreKey::account(account))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, id);
        assert!(rows[0].status.contains(MessageStatus::REMOVED));
    }
}
