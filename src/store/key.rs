//! Composite query keys consumed by the Mail Store Interface (§4.1).
//!
//! `StoreKey` is a small expression tree supporting conjunction, disjunction
//! and negation over the projections the engine actually needs. `SqliteMailStore`
//! lowers a key to a parameterized `WHERE` clause; `MemoryMailStore` evaluates
//! it directly against each row.

use crate::ids::{AccountId, FolderId};
use crate::status::MessageStatus;

#[derive(Debug, Clone)]
pub enum StoreKey {
    Account(AccountId),
    Folder(FolderId),
    ServerUidIn(Vec<u32>),
    StatusBit { bit: u32, set: bool },
    And(Vec<StoreKey>),
    Or(Vec<StoreKey>),
    Not(Box<StoreKey>),
}

impl StoreKey {
    pub fn account(id: AccountId) -> Self {
        StoreKey::Account(id)
    }

    pub fn folder(id: FolderId) -> Self {
        StoreKey::Folder(id)
    }

    pub fn and(clauses: impl IntoIterator<Item = StoreKey>) -> Self {
        StoreKey::And(clauses.into_iter().collect())
    }

    pub fn or(clauses: impl IntoIterator<Item = StoreKey>) -> Self {
        StoreKey::Or(clauses.into_iter().collect())
    }

    pub fn not(clause: StoreKey) -> Self {
        StoreKey::Not(Box::new(clause))
    }

    pub fn status_bit(bit: u32, set: bool) -> Self {
        StoreKey::StatusBit { bit, set }
    }

    pub fn server_uid_in(uids: Vec<u32>) -> Self {
        StoreKey::ServerUidIn(uids)
    }

    /// Evaluate the key against one row. Used by `MemoryMailStore` and by
    /// the test suite to cross-check `SqliteMailStore`'s SQL lowering.
    pub fn matches(&self, row: &super::MessageMetadata) -> bool {
        match self {
            StoreKey::Account(id) => &row.account == id,
            StoreKey::Folder(id) => &row.folder == id,
            StoreKey::ServerUidIn(uids) => uids.contains(&row.server_uid.numeric_uid()),
            StoreKey::StatusBit { bit, set } => row.status.contains(*bit) == *set,
            StoreKey::And(clauses) => clauses.iter().all(|c| c.matches(row)),
            StoreKey::Or(clauses) => clauses.iter().any(|c| c.matches(row)),
            StoreKey::Not(inner) => !inner.matches(row),
        }
    }

    /// Lower to a SQL `WHERE` fragment plus positional parameters, for
    /// `SqliteMailStore`. Parameters are returned as boxed `ToSql` values
    /// in the order they appear in the fragment.
    pub fn to_sql(&self) -> (String, Vec<rusqlite::types::Value>) {
        use rusqlite::types::Value;
        match self {
            StoreKey::Account(id) => ("account_id = ?".into(), vec![Value::Text(id.to_string())]),
            StoreKey::Folder(id) => ("folder_id = ?".into(), vec![Value::Text(id.to_string())]),
            StoreKey::ServerUidIn(uids) => {
                if uids.is_empty() {
                    return ("0".into(), vec![]);
                }
                let placeholders = uids.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
                let params = uids.iter().map(|u| Value::Integer(*u as i64)).collect();
                (format!("server_uid IN ({})", placeholders), params)
            }
            StoreKey::StatusBit { bit, set } => {
                let op = if *set { "=" } else { "!=" };
                (
                    format!("(status & ?) {} ?", op),
                    vec![Value::Integer(*bit as i64), Value::Integer(*bit as i64)],
                )
            }
            StoreKey::And(clauses) => combine(clauses, " AND "),
            StoreKey::Or(clauses) => combine(clauses, " OR "),
            StoreKey::Not(inner) => {
                let (sql, params) = inner.to_sql();
                (format!("NOT ({})", sql), params)
            }
        }
    }
}

fn combine(clauses: &[StoreKey], joiner: &str) -> (String, Vec<rusqlite::types::Value>) {
    if clauses.is_empty() {
        return ("1".into(), vec![]);
    }
    let mut sql_parts = Vec::with_capacity(clauses.len());
    let mut params = Vec::new();
    for clause in clauses {
        let (sql, mut clause_params) = clause.to_sql();
        sql_parts.push(format!("({})", sql));
        params.append(&mut clause_params);
    }
    (sql_parts.join(joiner), params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{AccountId, FolderId, MessageId};
    use crate::store::MessageMetadata;

    fn row() -> MessageMetadata {
        MessageMetadata {
            id: MessageId::new(1),
            account: AccountId::new("a@example.com"),
            folder: FolderId::new("INBOX"),
            previous_folder: None,
            server_uid: crate::ids::ServerUid::bare(42),
            size: 100,
            status: MessageStatus::from_bits(MessageStatus::READ),
            message_id_header: "<m1@example.com>".into(),
            in_response_to: None,
        }
    }

    #[test]
    fn and_or_not_compose() {
        let row = row();
        let key = StoreKey::and([
            StoreKey::account(AccountId::new("a@example.com")),
            StoreKey::status_bit(MessageStatus::READ, true),
        ]);
        assert!(key.matches(&row));

        let key = StoreKey::not(StoreKey::status_bit(MessageStatus::READ, true));
        assert!(!key.matches(&row));
    }
}
