//! Action records and the public request/event surface (§3 "Action record",
//! §4.4, §6). Generalizes the source codebase's `ActionType`/`QueuedAction`
//! (`sync/action_queue.rs`) from a per-account offline-replay queue into a
//! process-wide action table keyed by a client-assigned 64-bit id.

use std::collections::HashSet;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::ids::{AccountId, FolderId};

/// Stable IPC surface identifying which public operation an action performs
/// (§6 "IPC surface").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestType {
    TransmitMessages,
    RetrieveFolderList,
    RetrieveMessageList,
    RetrieveMessages,
    RetrieveMessagePart,
    RetrieveMessageRange,
    RetrieveMessagePartRange,
    RetrieveAll,
    ExportUpdates,
    Synchronize,
    DeleteMessages,
    CopyMessages,
    MoveMessages,
    FlagMessages,
    CreateFolder,
    RenameFolder,
    DeleteFolder,
    SearchMessages,
    ProtocolRequest,
}

/// The kind of service a request needs: a Source (reads) or a Sink
/// (writes). Mirrors §4.4 "Message Service" and §9's "service handle =
/// account-id + kind".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceKind {
    Source,
    Sink,
}

/// `account-id + kind`: the single source of truth for service lookups
/// (§9 "smart-pointer weak references to services").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceHandle {
    pub account: AccountId,
    pub kind: ServiceKind,
}

impl ServiceHandle {
    pub fn new(account: AccountId, kind: ServiceKind) -> Self {
        Self { account, kind }
    }
}

/// Completion kind an active action counts against in the store's
/// "retrieval/transmission in progress" sets (§3 invariants).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionKind {
    Retrieval,
    Transmission,
    StorageAction,
    Search,
    ProtocolRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Pending,
    InProgress,
    Successful,
    Failed,
}

/// Parameters carried by a request, enough to dispatch it without a second
/// round trip to the caller. Not every `RequestType` needs every field.
#[derive(Debug, Clone, Default)]
pub struct ActionParams {
    pub folder: Option<FolderId>,
    pub destination_folder: Option<FolderId>,
    pub uids: Vec<u32>,
    pub part: Option<Vec<u32>>,
    pub min_bytes: Option<u64>,
    pub flags_to_set: u32,
    pub flags_to_clear: u32,
    pub query: Option<String>,
}

/// A client-submitted request with a unique id whose lifecycle the
/// orchestrator tracks end-to-end (§3 "Action record").
#[derive(Debug, Clone)]
pub struct Action {
    pub id: u64,
    pub request_type: RequestType,
    pub account: AccountId,
    pub params: ActionParams,
    /// Services this action needs attached before it can run.
    pub services: HashSet<ServiceHandle>,
    /// Services whose preconditions (e.g. reference resolution before a
    /// send) must complete first (§4.4 "Precondition chaining").
    pub preconditions: HashSet<ServiceHandle>,
    pub completion_kind: CompletionKind,
    pub activity: Activity,
    /// At-most-once success reporting (§7 "Successful is fired at most
    /// once per action").
    pub reported: bool,
    pub last_progress: Instant,
}

impl Action {
    pub fn new(
        id: u64,
        request_type: RequestType,
        account: AccountId,
        params: ActionParams,
        services: HashSet<ServiceHandle>,
        preconditions: HashSet<ServiceHandle>,
        completion_kind: CompletionKind,
    ) -> Self {
        Self {
            id,
            request_type,
            account,
            params,
            services,
            preconditions,
            completion_kind,
            activity: Activity::Pending,
            reported: false,
            last_progress: Instant::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_progress = Instant::now();
    }

    /// All services that must be available before this action dispatches:
    /// its own services plus its preconditions' (§4.4 "Dispatcher").
    pub fn required_services(&self) -> impl Iterator<Item = &ServiceHandle> {
        self.services.iter().chain(self.preconditions.iter())
    }
}

/// Event variants reported back to clients (§6 "Responses"). Delivered over
/// a `flume::Receiver<OrchestratorEvent>` per action, matching the source
/// codebase's `(SyncEngine, Receiver<SyncEvent>)` idiom (`sync/engine.rs`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OrchestratorEvent {
    ActionStarted { action: u64, kind: RequestType },
    ActivityChanged { action: u64, activity: ActivityWire },
    ProgressChanged { action: u64, done: u64, total: u64 },
    StatusChanged { action: u64, code: String, text: String, account: String, folder: Option<String> },
    ConnectivityChanged { account: String, online: bool },
    MatchingMessageIds { action: u64, ids: Vec<u64> },
    ProtocolResponse { action: u64, payload: String },
    RetrievalCompleted { action: u64 },
    TransmissionCompleted { action: u64 },
    StorageActionCompleted { action: u64 },
    SearchCompleted { action: u64 },
    ProtocolRequestCompleted { action: u64 },
}

/// Wire form of `Activity` (serde-friendly, kept distinct so the in-process
/// `Activity` enum is free to stay `Copy`/non-serde).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityWire {
    Pending,
    InProgress,
    Successful,
    Failed,
}

impl From<Activity> for ActivityWire {
    fn from(a: Activity) -> Self {
        match a {
            Activity::Pending => ActivityWire::Pending,
            Activity::InProgress => ActivityWire::InProgress,
            Activity::Successful => ActivityWire::Successful,
            Activity::Failed => ActivityWire::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_services_includes_preconditions() {
        let account = AccountId::new("a@example.com");
        let mut services = HashSet::new();
        services.insert(ServiceHandle::new(account.clone(), ServiceKind::Sink));
        let mut preconditions = HashSet::new();
        preconditions.insert(ServiceHandle::new(account.clone(), ServiceKind::Source));

        let action = Action::new(
            1,
            RequestType::TransmitMessages,
            account,
            ActionParams::default(),
            services,
            preconditions,
            CompletionKind::Transmission,
        );

        assert_eq!(action.required_services().count(), 2);
    }
}
