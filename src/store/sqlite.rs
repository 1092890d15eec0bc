//! `rusqlite`/`r2d2`-backed `MailStore` implementation.
//!
//! Grounded on `adapters/sqlite/pool.rs` and `adapters/sqlite/schema.rs` of
//! the source codebase (WAL pragma tuning, connection-pool-per-store idiom);
//! the query surface itself is new, built directly from §4.1's operation
//! list rather than adapted from a source-codebase analog (the source's
//! `messages` table has no equivalent of the composite `StoreKey` queries
//! the engine needs).

use rusqlite::types::Value;
use rusqlite::{params_from_iter, OptionalExtension};

use super::key::StoreKey;
use super::pool::DbPool;
use super::{FolderRecord, MailStore, MessageMetadata, RemovalRecordPolicy, SortKey};
use crate::error::Result;
use crate::ids::{AccountId, FolderId, MessageId, ServerUid};
use crate::status::MessageStatus;

pub struct SqliteMailStore {
    pool: DbPool,
}

impl SqliteMailStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn row_to_metadata(row: &rusqlite::Row) -> rusqlite::Result<MessageMetadata> {
        let server_uid_folder: Option<String> = row.get("server_uid_folder")?;
        let server_uid: u32 = row.get("server_uid")?;
        let server_uid = match server_uid_folder {
            Some(folder) => ServerUid::qualified(folder, server_uid),
            None => ServerUid::bare(server_uid),
        };

        Ok(MessageMetadata {
            id: MessageId::new(row.get::<_, i64>("id")? as u64),
            account: AccountId::new(row.get::<_, String>("account_id")?),
            folder: FolderId::new(row.get::<_, String>("folder_id")?),
            previous_folder: row
                .get::<_, Option<String>>("previous_folder_id")?
                .map(FolderId::new),
            server_uid,
            size: row.get::<_, i64>("size_bytes")? as u64,
            status: MessageStatus::from_bits(row.get::<_, i64>("status")? as u32),
            message_id_header: row.get("message_id_header")?,
            in_response_to: row.get("in_response_to")?,
        })
    }
}

impl MailStore for SqliteMailStore {
    fn query_messages(&self, key: &StoreKey, sort: SortKey) -> Result<Vec<MessageId>> {
        let conn = self.pool.get()?;
        let (where_sql, params) = key.to_sql();
        let order = match sort {
            SortKey::ServerUidAscending => "server_uid ASC",
            SortKey::DateDescending => "id DESC",
        };
        let sql = format!(
            "SELECT id FROM messages WHERE {} ORDER BY {}",
            where_sql, order
        );
        let mut stmt = conn.prepare(&sql)?;
        let ids = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                Ok(MessageId::new(row.get::<_, i64>(0)? as u64))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    fn messages_metadata(&self, key: &StoreKey) -> Result<Vec<MessageMetadata>> {
        let conn = self.pool.get()?;
        let (where_sql, params) = key.to_sql();
        let sql = format!("SELECT * FROM messages WHERE {}", where_sql);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(params.iter()), Self::row_to_metadata)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn add_message(&self, metadata: MessageMetadata) -> Result<MessageId> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO messages
                (account_id, folder_id, previous_folder_id, server_uid, server_uid_folder,
                 size_bytes, status, message_id_header, in_response_to)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                metadata.account.as_str(),
                metadata.folder.as_str(),
                metadata.previous_folder.as_ref().map(|f| f.as_str()),
                metadata.server_uid.numeric_uid(),
                metadata.server_uid.folder_qualifier(),
                metadata.size as i64,
                metadata.status.bits() as i64,
                metadata.message_id_header,
                metadata.in_response_to,
            ],
        )?;
        Ok(MessageId::new(conn.last_insert_rowid() as u64))
    }

    fn update_message(&self, metadata: MessageMetadata) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE messages SET
                folder_id = ?1, previous_folder_id = ?2, server_uid = ?3, server_uid_folder = ?4,
                size_bytes = ?5, status = ?6, message_id_header = ?7, in_response_to = ?8
             WHERE id = ?9",
            rusqlite::params![
                metadata.folder.as_str(),
                metadata.previous_folder.as_ref().map(|f| f.as_str()),
                metadata.server_uid.numeric_uid(),
                metadata.server_uid.folder_qualifier(),
                metadata.size as i64,
                metadata.status.bits() as i64,
                metadata.message_id_header,
                metadata.in_response_to,
                metadata.id.value() as i64,
            ],
        )?;
        Ok(())
    }

    fn remove_messages(&self, key: &StoreKey, policy: RemovalRecordPolicy) -> Result<()> {
        let conn = self.pool.get()?;
        let (where_sql, params) = key.to_sql();
        match policy {
            RemovalRecordPolicy::NoRemovalRecord => {
                let sql = format!("DELETE FROM messages WHERE {}", where_sql);
                conn.execute(&sql, params_from_iter(params.iter()))?;
            }
            RemovalRecordPolicy::KeepRemovalRecord => {
                let sql = format!(
                    "UPDATE messages SET status = status | {} WHERE {}",
                    MessageStatus::REMOVED,
                    where_sql
                );
                conn.execute(&sql, params_from_iter(params.iter()))?;
            }
        }
        Ok(())
    }

    fn update_messages_metadata(&self, key: &StoreKey, bit: u32, value: bool) -> Result<()> {
        let conn = self.pool.get()?;
        let (where_sql, params) = key.to_sql();
        let sql = if value {
            format!("UPDATE messages SET status = status | ? WHERE {}", where_sql)
        } else {
            format!("UPDATE messages SET status = status & ~? WHERE {}", where_sql)
        };
        let mut all_params = vec![Value::Integer(bit as i64)];
        all_params.extend(params);
        conn.execute(&sql, params_from_iter(all_params.iter()))?;
        Ok(())
    }

    fn purge_message_removal_records(&self, account: &AccountId, uids: &[u32]) -> Result<()> {
        if uids.is_empty() {
            return Ok(());
        }
        let conn = self.pool.get()?;
        let placeholders = uids.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let sql = format!(
            "UPDATE messages SET status = status & ~{} WHERE account_id = ? AND server_uid IN ({})",
            MessageStatus::REMOVED,
            placeholders
        );
        let mut params: Vec<Value> = vec![Value::Text(account.to_string())];
        params.extend(uids.iter().map(|u| Value::Integer(*u as i64)));
        conn.execute(&sql, params_from_iter(params.iter()))?;
        Ok(())
    }

    fn add_folder(&self, folder: FolderRecord) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO accounts (id) VALUES (?1) ON CONFLICT(id) DO NOTHING",
            rusqlite::params![folder.account.as_str()],
        )?;
        conn.execute(
            "INSERT INTO folders (account_id, folder_id, attributes, sync_enabled)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(account_id, folder_id) DO UPDATE SET
                attributes = excluded.attributes, sync_enabled = excluded.sync_enabled",
            rusqlite::params![
                folder.account.as_str(),
                folder.id.as_str(),
                serde_json::to_string(&folder.attributes)?,
                folder.synchronization_enabled,
            ],
        )?;
        Ok(())
    }

    fn update_folder(&self, folder: FolderRecord) -> Result<()> {
        self.add_folder(folder)
    }

    fn remove_folder(&self, account: &AccountId, folder: &FolderId) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "DELETE FROM folders WHERE account_id = ?1 AND folder_id = ?2",
            rusqlite::params![account.as_str(), folder.as_str()],
        )?;
        Ok(())
    }

    fn folders(&self, account: &AccountId) -> Result<Vec<FolderRecord>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT folder_id, attributes, sync_enabled FROM folders WHERE account_id = ?1",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![account.as_str()], |row| {
                let attributes: String = row.get(1)?;
                Ok(FolderRecord {
                    account: account.clone(),
                    id: FolderId::new(row.get::<_, String>(0)?),
                    attributes: serde_json::from_str(&attributes).unwrap_or_default(),
                    synchronization_enabled: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn set_retrieval_in_progress(&self, accounts: &[AccountId], in_progress: bool) -> Result<()> {
        let conn = self.pool.get()?;
        for account in accounts {
            conn.execute(
                "INSERT INTO accounts (id, retrieval_in_progress) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET retrieval_in_progress = excluded.retrieval_in_progress",
                rusqlite::params![account.as_str(), in_progress],
            )?;
        }
        Ok(())
    }

    fn set_transmission_in_progress(
        &self,
        accounts: &[AccountId],
        in_progress: bool,
    ) -> Result<()> {
        let conn = self.pool.get()?;
        for account in accounts {
            conn.execute(
                "INSERT INTO accounts (id, transmission_in_progress) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET transmission_in_progress = excluded.transmission_in_progress",
                rusqlite::params![account.as_str(), in_progress],
            )?;
        }
        Ok(())
    }

    fn is_retrieval_in_progress(&self, account: &AccountId) -> Result<bool> {
        let conn = self.pool.get()?;
        let result: Option<bool> = conn
            .query_row(
                "SELECT retrieval_in_progress FROM accounts WHERE id = ?1",
                rusqlite::params![account.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(result.unwrap_or(false))
    }

    fn is_transmission_in_progress(&self, account: &AccountId) -> Result<bool> {
        let conn = self.pool.get()?;
        let result: Option<bool> = conn
            .query_row(
                "SELECT transmission_in_progress FROM accounts WHERE id = ?1",
                rusqlite::params![account.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(result.unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::schema::initialize_schema;

    fn fresh_store() -> SqliteMailStore {
        let pool = super::super::pool::create_in_memory_pool().unwrap();
        initialize_schema(&pool.get().unwrap()).unwrap();
        SqliteMailStore::new(pool)
    }

    #[test]
    fn add_then_read_round_trips_every_field() {
        let store = fresh_store();
        let account = AccountId::new("a@example.com");
        store
            .add_folder(FolderRecord {
                account: account.clone(),
                id: FolderId::new("INBOX"),
                attributes: vec![],
                synchronization_enabled: true,
            })
            .unwrap();

        let metadata = MessageMetadata {
            id: MessageId::INVALID,
            account: account.clone(),
            folder: FolderId::new("INBOX"),
            previous_folder: None,
            server_uid: ServerUid::bare(42),
            size: 1234,
            status: MessageStatus::from_bits(MessageStatus::READ | MessageStatus::NEW),
            message_id_header: "<abc@example.com>".into(),
            in_response_to: Some("<parent@example.com>".into()),
        };

        let id = store.add_message(metadata.clone()).unwrap();
        let fetched = store
            .messages_metadata(&StoreKey::account(account.clone()))
            .unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].id, id);
        assert_eq!(fetched[0].server_uid, metadata.server_uid);
        assert_eq!(fetched[0].status, metadata.status);
        assert_eq!(fetched[0].message_id_header, metadata.message_id_header);
        assert_eq!(fetched[0].in_response_to, metadata.in_response_to);
    }

    #[test]
    fn retrieval_in_progress_tracks_exactly_what_was_set() {
        let store = fresh_store();
        let account = AccountId::new("a@example.com");
        assert!(!store.is_retrieval_in_progress(&account).unwrap());
        store
            .set_retrieval_in_progress(&[account.clone()], true)
            .unwrap();
        assert!(store.is_retrieval_in_progress(&account).unwrap());
        store
            .set_retrieval_in_progress(&[account.clone()], false)
            .unwrap();
        assert!(!store.is_retrieval_in_progress(&account).unwrap());
    }

    #[test]
    fn update_messages_metadata_sets_and_clears_a_bit() {
        let store = fresh_store();
        let account = AccountId::new("a@example.com");
        store
            .add_folder(FolderRecord {
                account: account.clone(),
                id: FolderId::new("INBOX"),
                attributes: vec![],
                synchronization_enabled: true,
            })
            .unwrap();

        let metadata = MessageMetadata {
            id: MessageId::INVALID,
            account: account.clone(),
            folder: FolderId::new("INBOX"),
            previous_folder: None,
            server_uid: ServerUid::bare(7),
            size: 10,
            status: MessageStatus::empty(),
            message_id_header: "<a@example.com>".into(),
            in_response_to: None,
        };
        store.add_message(metadata).unwrap();

        let key = StoreKey::account(account.clone());
        store.update_messages_metadata(&key, MessageStatus::READ, true).unwrap();
        let fetched = store.messages_metadata(&key).unwrap();
        assert_eq!(fetched.len(), 1);
        assert!(fetched[0].status.contains(MessageStatus::READ));

        store.update_messages_metadata(&key, MessageStatus::READ, false).unwrap();
        let fetched = store.messages_metadata(&key).unwrap();
        assert!(!fetched[0].status.contains(MessageStatus::READ));
    }
}
