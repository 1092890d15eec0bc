//! On-disk schema for the sqlite-backed Mail Store.

use rusqlite::Connection;

use crate::error::Result;

pub fn initialize_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS accounts (
            id                  TEXT PRIMARY KEY,
            retrieval_in_progress    INTEGER NOT NULL DEFAULT 0,
            transmission_in_progress INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS folders (
            account_id      TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
            folder_id       TEXT NOT NULL,
            attributes      TEXT NOT NULL DEFAULT '[]',
            sync_enabled    INTEGER NOT NULL DEFAULT 1,
            PRIMARY KEY (account_id, folder_id)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id                  INTEGER PRIMARY KEY,
            account_id          TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
            folder_id           TEXT NOT NULL,
            previous_folder_id  TEXT,
            server_uid          INTEGER NOT NULL,
            server_uid_folder   TEXT,
            size_bytes          INTEGER NOT NULL DEFAULT 0,
            status              INTEGER NOT NULL DEFAULT 0,
            message_id_header   TEXT NOT NULL DEFAULT '',
            in_response_to      TEXT,

            UNIQUE(account_id, folder_id, server_uid)
        );

        CREATE INDEX IF NOT EXISTS idx_messages_account_folder ON messages(account_id, folder_id);
        CREATE INDEX IF NOT EXISTS idx_messages_message_id     ON messages(message_id_header);

        CREATE TABLE IF NOT EXISTS conversation_mirror (
            account_id          TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
            message_id          INTEGER NOT NULL,
            parent_message_id   INTEGER,
            PRIMARY KEY (account_id, message_id)
        );
        ",
    )?;

    Ok(())
}
