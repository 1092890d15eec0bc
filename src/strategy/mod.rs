//! IMAP Strategy Engine (§4.3, §9).
//!
//! The source codebase has no single analog for this layer — its
//! `sync/engine.rs` hardcodes one incremental-sync routine per account.
//! This module generalizes that into a hierarchy of strategies specialized
//! by operation, matching §9's "capability-composed design": trait-like
//! interfaces `Strategy`, `MessageListStrategy`, `FetchSelectedStrategy`,
//! `FolderListStrategy`, `SynchronizeBaseStrategy`, and tagged-union
//! dispatch over the concrete variants rather than open polymorphism.
//! Shared state lives in `StrategyContext`, passed to every transition.

pub mod context;
pub mod copy_move_delete;
pub mod export_updates;
pub mod fetch_selected;
pub mod folder_list;
pub mod retrieve_message_list;
pub mod synchronize_all;
pub mod synchronize_base;
pub mod update_flags;

pub use context::{SelectionCursor, StrategyContext};
pub use copy_move_delete::{CopyMessages, DeleteMessages, MoveMessages};
pub use export_updates::ExportUpdates;
pub use fetch_selected::{FetchRequest, FetchSelectedStrategy};
pub use folder_list::FolderListStrategy;
pub use retrieve_message_list::RetrieveMessageList;
pub use synchronize_all::{SynchronizeAll, SynchronizeOptions};
pub use synchronize_base::{ReconciliationOutcome, SynchronizeBaseStrategy};
pub use update_flags::UpdateMessagesFlags;

use crate::error::Result;

/// Untagged data a strategy may receive mid-command, beyond the
/// `MailboxProperties` the connection already accumulates (§4.3).
#[derive(Debug, Clone)]
pub enum StrategyEvent {
    MessageFetched { uid: u32 },
    DataFetched { uid: u32, bytes: usize },
    NonexistentUid { uid: u32 },
    MessageStored { uid: u32 },
    MessageCopied { source_uid: u32, dest_uid: u32 },
    DownloadSize { uid: u32, size: u64 },
    MailboxListed { name: String, attributes: Vec<String> },
}

/// Every strategy presents this contract to the Source that drives it
/// (§4.3): `new_connection` arms initial state, `transition` advances the
/// state machine on each command completion, and `handle_event` receives
/// untagged data pushed in between commands.
#[async_trait::async_trait]
pub trait Strategy: Send {
    /// Drive the strategy to completion against the given context. Returns
    /// once the strategy reaches a terminal state (success or a
    /// strategy-terminal error per §7's propagation policy).
    async fn run(&mut self, ctx: &mut StrategyContext) -> Result<()>;
}

/// A strategy whose unit of work is an ordered list of (folder, message)
/// pairs, walked folder-by-folder, UID-ascending within each folder
/// (§4.3 "Message-list selection").
pub trait MessageListStrategy: Strategy {
    fn selection(&self) -> &SelectionCursor;
}

/// A strategy that fetches requested content (whole messages, parts, or
/// partial ranges) into the store, tracking weighted progress (§4.3.1).
pub trait FetchSelectedStrategyMarker: MessageListStrategy {}

/// A strategy that enumerates the folder hierarchy (§4.3.2).
pub trait FolderListStrategyMarker: FetchSelectedStrategyMarker {}

/// A strategy that reconciles one or more mailboxes' message sets against
/// the server's reported UIDs (§4.3.3).
pub trait SynchronizeBaseStrategyMarker: FolderListStrategyMarker {}
