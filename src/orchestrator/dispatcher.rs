//! Dispatcher (§4.4): registry of services by account, request queue,
//! availability-gated dispatch, expiry, and cancellation. Generalizes the
//! source codebase's per-account `ActionQueue` (`sync/action_queue.rs`)
//! into a process-wide registry with precondition chaining; the
//! service-availability bookkeeping is modeled after the source's
//! per-account engine map (`state/sync_manager.rs`-style "one engine per
//! account", here widened to "one service-state entry per (account, kind)").

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use flume::{Receiver, Sender};
use tracing::{debug, info, warn};

use crate::error::{OrchestratorError, Result};
use crate::ids::{AccountId, FolderId};
use crate::status::MessageStatus;
use crate::store::{MailStore, StoreKey};

use super::action::{
    Action, ActionParams, Activity, CompletionKind, OrchestratorEvent, RequestType, ServiceHandle,
    ServiceKind,
};
use super::journal::Journal;

/// One entry per `(account, kind)` service. Binding is exclusive unless the
/// service advertises concurrent actions (§4.4 "Dispatcher").
#[derive(Debug, Clone, Default)]
struct ServiceState {
    bound_to: HashSet<u64>,
    supports_concurrent: bool,
    unavailable: bool,
}

impl ServiceState {
    fn is_available(&self) -> bool {
        !self.unavailable && (self.supports_concurrent || self.bound_to.is_empty())
    }
}

/// A registered account's services, plus an optional "master account" this
/// account's services stand in for (§4.4 "Registration").
#[derive(Debug, Clone)]
struct Registration {
    alias_of: Option<AccountId>,
}

pub struct Dispatcher {
    store: std::sync::Arc<dyn MailStore>,
    journal: Journal,
    registrations: HashMap<AccountId, Registration>,
    services: HashMap<ServiceHandle, ServiceState>,
    queue: VecDeque<Action>,
    active: HashMap<u64, Action>,
    event_txs: HashMap<u64, Sender<OrchestratorEvent>>,
    next_action_id: u64,
    expiry: Duration,
    /// The one non-inbox folder currently registered for IDLE/poll
    /// monitoring across the whole process (§4.3.8).
    folder_monitor: Option<(AccountId, FolderId)>,
}

impl Dispatcher {
    pub fn new(store: std::sync::Arc<dyn MailStore>, journal: Journal, expiry: Duration) -> Self {
        Self {
            store,
            journal,
            registrations: HashMap::new(),
            services: HashMap::new(),
            queue: VecDeque::new(),
            active: HashMap::new(),
            event_txs: HashMap::new(),
            next_action_id: 1,
            expiry,
            folder_monitor: None,
        }
    }

    /// Register `folder` as the single non-inbox folder under active
    /// IDLE/poll monitoring (§4.3.8). Registering the same slot again is a
    /// no-op; registering a different one while a slot is already occupied
    /// drops both (the source codebase's `IdleMonitor`/`PollMonitor` split
    /// generalized to this multi-account registry — a conflicting register
    /// tears down the existing monitor rather than silently replacing it).
    pub fn register_folder_monitor(&mut self, account: AccountId, folder: FolderId) {
        match &self.folder_monitor {
            Some((a, f)) if *a == account && *f == folder => {}
            Some(_) => self.folder_monitor = None,
            None => self.folder_monitor = Some((account, folder)),
        }
    }

    pub fn folder_monitor(&self) -> Option<&(AccountId, FolderId)> {
        self.folder_monitor.as_ref()
    }

    pub fn clear_folder_monitor(&mut self) {
        self.folder_monitor = None;
    }

    /// Instantiate services for a newly enabled account. `alias_of` models
    /// the "master account" mapping: lookups for `account`'s services
    /// transparently resolve to `alias_of`'s (§4.4 "Registration").
    pub fn register(&mut self, account: AccountId, alias_of: Option<AccountId>, supports_concurrent: bool) {
        let resolved = alias_of.clone().unwrap_or_else(|| account.clone());
        for kind in [ServiceKind::Source, ServiceKind::Sink] {
            self.services
                .entry(ServiceHandle::new(resolved.clone(), kind))
                .or_insert_with(|| ServiceState {
                    supports_concurrent,
                    ..Default::default()
                });
        }
        self.registrations.insert(account, Registration { alias_of });
    }

    /// Tear down an account's services: cancel every active action bound to
    /// them with `InternalStateReset`, drop their queued requests, remove
    /// the service-state entries (§3 "Lifecycles").
    pub async fn deregister(&mut self, account: &AccountId) {
        let resolved = self.resolve(account);
        let handles = [
            ServiceHandle::new(resolved.clone(), ServiceKind::Source),
            ServiceHandle::new(resolved.clone(), ServiceKind::Sink),
        ];

        let affected: Vec<u64> = self
            .active
            .values()
            .filter(|a| a.services.iter().any(|h| handles.contains(h)))
            .map(|a| a.id)
            .collect();
        for id in affected {
            self.fail_action(id, OrchestratorError::InternalStateReset).await;
        }

        self.queue.retain(|a| !a.services.iter().any(|h| handles.contains(h)));
        for handle in handles {
            self.services.remove(&handle);
        }
        self.registrations.remove(account);
    }

    fn resolve(&self, account: &AccountId) -> AccountId {
        self.registrations
            .get(account)
            .and_then(|r| r.alias_of.clone())
            .unwrap_or_else(|| account.clone())
    }

    /// Submit a request. Returns the assigned action-id and a per-action
    /// event receiver, mirroring the source codebase's
    /// `(SyncEngine, Receiver<SyncEvent>)` idiom (`sync/engine.rs::new`).
    /// Fails immediately with `NoConnection` if no service is configured
    /// for the account (§4.4 "computes the set of needed services; if
    /// empty, fails immediately").
    pub fn submit(
        &mut self,
        request_type: RequestType,
        account: AccountId,
        params: ActionParams,
        needs: &[ServiceKind],
        preconditions: &[ServiceKind],
        completion_kind: CompletionKind,
    ) -> Result<(u64, Receiver<OrchestratorEvent>)> {
        let resolved = self.resolve(&account);
        let services: HashSet<ServiceHandle> = needs
            .iter()
            .map(|k| ServiceHandle::new(resolved.clone(), *k))
            .filter(|h| self.services.contains_key(h))
            .collect();

        let (tx, rx) = flume::unbounded();

        if services.is_empty() {
            let _ = tx.send(OrchestratorEvent::StatusChanged {
                action: 0,
                code: "no_service".into(),
                text: "unconfigured account".into(),
                account: account.to_string(),
                folder: None,
            });
            return Err(OrchestratorError::NoConnection(format!(
                "unconfigured account: {}",
                account
            )));
        }

        let preconditions: HashSet<ServiceHandle> = preconditions
            .iter()
            .map(|k| ServiceHandle::new(resolved.clone(), *k))
            .collect();

        let id = self.next_action_id;
        self.next_action_id += 1;

        let action = Action::new(
            id,
            request_type,
            account,
            params,
            services,
            preconditions,
            completion_kind,
        );

        self.event_txs.insert(id, tx.clone());
        let _ = tx.send(OrchestratorEvent::ActionStarted { action: id, kind: request_type });
        self.queue.push_back(action);

        Ok((id, rx))
    }

    /// Scan the queue for requests whose `required_services()` are all
    /// available and bind them (§4.4 "Dispatcher"). Call after every
    /// submission, completion, cancellation, or re-registration.
    pub async fn dispatch(&mut self) -> Result<Vec<u64>> {
        let mut dispatched = Vec::new();
        let mut remaining = VecDeque::new();

        while let Some(action) = self.queue.pop_front() {
            let available = action
                .required_services()
                .all(|h| self.services.get(h).map(|s| s.is_available()).unwrap_or(false));

            if available {
                for handle in action.services.iter().chain(action.preconditions.iter()) {
                    if let Some(state) = self.services.get_mut(handle) {
                        state.bound_to.insert(action.id);
                    }
                }
                if action.completion_kind == CompletionKind::Retrieval {
                    self.store.set_retrieval_in_progress(&[action.account.clone()], true)?;
                } else if action.completion_kind == CompletionKind::Transmission {
                    self.store
                        .set_transmission_in_progress(&[action.account.clone()], true)?;
                }

                self.journal.record(action.id).await?;
                self.emit(action.id, OrchestratorEvent::ActivityChanged {
                    action: action.id,
                    activity: Activity::InProgress.into(),
                });
                dispatched.push(action.id);

                let mut action = action;
                action.activity = Activity::InProgress;
                action.touch();
                self.active.insert(action.id, action);
            } else {
                remaining.push_back(action);
            }
        }

        self.queue = remaining;
        Ok(dispatched)
    }

    /// Record forward progress on an active action (§4.4 "Expiry").
    pub fn touch(&mut self, id: u64) {
        if let Some(action) = self.active.get_mut(&id) {
            action.touch();
        }
    }

    fn unbind(&mut self, action: &Action) {
        for handle in action.services.iter().chain(action.preconditions.iter()) {
            if let Some(state) = self.services.get_mut(handle) {
                state.bound_to.remove(&action.id);
            }
        }
    }

    /// Complete an action successfully. `reported` guarantees at most one
    /// `Successful` event per action (§7).
    pub async fn complete_action(&mut self, id: u64) -> Result<()> {
        let Some(mut action) = self.active.remove(&id) else {
            return Ok(());
        };
        self.unbind(&action);

        if action.completion_kind == CompletionKind::Retrieval {
            self.store.set_retrieval_in_progress(&[action.account.clone()], false)?;
        } else if action.completion_kind == CompletionKind::Transmission {
            self.store
                .set_transmission_in_progress(&[action.account.clone()], false)?;
        }

        self.journal.clear(&[id]).await?;

        if !action.reported {
            action.reported = true;
            self.emit(id, OrchestratorEvent::ActivityChanged {
                action: id,
                activity: Activity::Successful.into(),
            });
            self.emit(id, completion_event(&action));
        }

        if action.completion_kind == CompletionKind::Transmission {
            self.enqueue_post_transmit_bookkeeping(&action);
        }

        self.event_txs.remove(&id);
        Ok(())
    }

    /// Report matching message ids for a `SearchMessages` action (§4.4
    /// "Search"). Does not complete the action — a search dispatched to a
    /// service still runs its course through `complete_action` afterwards.
    pub fn report_matching_ids(&self, id: u64, ids: Vec<u64>) {
        self.emit(id, OrchestratorEvent::MatchingMessageIds { action: id, ids });
    }

    /// Fail an action. Only the first failure is reported; later service
    /// successes on the same action do not re-report (§7).
    pub async fn fail_action(&mut self, id: u64, error: OrchestratorError) {
        let Some(mut action) = self.active.remove(&id).or_else(|| {
            let pos = self.queue.iter().position(|a| a.id == id)?;
            self.queue.remove(pos)
        }) else {
            return;
        };
        self.unbind(&action);

        let kind = action.completion_kind;
        let account = action.account.clone();
        match kind {
            CompletionKind::Retrieval => {
                let _ = self.store.set_retrieval_in_progress(&[account], false);
            }
            CompletionKind::Transmission => {
                let _ = self.store.set_transmission_in_progress(&[account], false);
            }
            _ => {}
        }

        let _ = self.journal.clear(&[id]).await;

        if !action.reported {
            action.reported = true;
            self.emit(id, OrchestratorEvent::StatusChanged {
                action: id,
                code: "failed".into(),
                text: error.to_string(),
                account: action.account.to_string(),
                folder: action.params.folder.as_ref().map(|f| f.to_string()),
            });
            self.emit(id, OrchestratorEvent::ActivityChanged {
                action: id,
                activity: Activity::Failed.into(),
            });
        }

        self.event_txs.remove(&id);
    }

    /// Per-action cooperative cancellation (§5 "Cancellation is
    /// cooperative"). The orchestrator does not wait for acknowledgement;
    /// it clears the record immediately.
    pub async fn cancel(&mut self, id: u64) {
        self.fail_action(id, OrchestratorError::Cancel).await;
    }

    /// Fail every active action whose `last_progress` exceeds `self.expiry`
    /// (§4.4 "Expiry"). Returns the ids that were expired so the caller can
    /// re-run `dispatch()`.
    pub async fn check_expiry(&mut self) -> Vec<u64> {
        let now = Instant::now();
        let expired: Vec<u64> = self
            .active
            .values()
            .filter(|a| now.duration_since(a.last_progress) >= self.expiry)
            .map(|a| a.id)
            .collect();

        for id in &expired {
            warn!(action = id, "action expired with no progress, re-registering services");
            self.fail_action(*id, OrchestratorError::Timeout).await;
        }
        expired
    }

    /// Clear journal entries with no in-memory `Action` behind them —
    /// the ids a crashed previous process left outstanding (§4.4 "On
    /// startup, any ids in the file are reported as failed").
    pub async fn discard_stale_journal_entries(&mut self, ids: &[u64]) -> Result<()> {
        self.journal.clear(ids).await
    }

    fn emit(&self, id: u64, event: OrchestratorEvent) {
        if let Some(tx) = self.event_txs.get(&id) {
            let _ = tx.send(event);
        }
    }

    /// Enqueue a follow-up flag-update action clearing `Outbox|Draft|
    /// LocalOnly` and setting `Sent` after a successful transmission
    /// (§4.4 "Post-transmit bookkeeping").
    fn enqueue_post_transmit_bookkeeping(&mut self, action: &Action) {
        let mut params = ActionParams::default();
        params.folder = action.params.folder.clone();
        params.uids = action.params.uids.clone();
        params.flags_to_set = MessageStatus::SENT;
        params.flags_to_clear = MessageStatus::OUTBOX | MessageStatus::DRAFT | MessageStatus::LOCAL_ONLY;

        match self.submit(
            RequestType::FlagMessages,
            action.account.clone(),
            params,
            &[ServiceKind::Sink],
            &[],
            CompletionKind::StorageAction,
        ) {
            Ok((id, _rx)) => {
                debug!(action = id, "queued post-transmit flag bookkeeping");
            }
            Err(e) => {
                warn!(error = %e, "could not queue post-transmit bookkeeping, service deregistered mid-flight");
            }
        }
    }

    /// Apply a `FlagMessages` action directly against the store (used both
    /// for user-submitted flag changes and the post-transmit bookkeeping
    /// action above).
    pub fn apply_flag_change(&self, action: &Action) -> Result<()> {
        let Some(folder) = &action.params.folder else {
            return Err(OrchestratorError::InvalidData("FlagMessages needs a folder".into()));
        };
        let key = StoreKey::and([
            StoreKey::account(action.account.clone()),
            StoreKey::folder(folder.clone()),
            StoreKey::server_uid_in(action.params.uids.clone()),
        ]);

        let mut bit = action.params.flags_to_set;
        while bit != 0 {
            let lowest = bit & bit.wrapping_neg();
            self.store.update_messages_metadata(&key, lowest, true)?;
            bit &= !lowest;
        }

        let mut bit = action.params.flags_to_clear;
        while bit != 0 {
            let lowest = bit & bit.wrapping_neg();
            self.store.update_messages_metadata(&key, lowest, false)?;
            bit &= !lowest;
        }

        Ok(())
    }

    /// A clone of a dispatched action's record, for the caller that
    /// actually drives it against a service connection (`ServiceWorker`
    /// lives outside the dispatcher so each service's connection is owned
    /// by its own task, per §5).
    pub fn active_action(&self, id: u64) -> Option<Action> {
        self.active.get(&id).cloned()
    }

    pub fn store(&self) -> std::sync::Arc<dyn MailStore> {
        self.store.clone()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn queued_count(&self) -> usize {
        self.queue.len()
    }
}

fn completion_event(action: &Action) -> OrchestratorEvent {
    match action.completion_kind {
        CompletionKind::Retrieval => OrchestratorEvent::RetrievalCompleted { action: action.id },
        CompletionKind::Transmission => OrchestratorEvent::TransmissionCompleted { action: action.id },
        CompletionKind::StorageAction => OrchestratorEvent::StorageActionCompleted { action: action.id },
        CompletionKind::Search => OrchestratorEvent::SearchCompleted { action: action.id },
        CompletionKind::ProtocolRequest => OrchestratorEvent::ProtocolRequestCompleted { action: action.id },
    }
}

/// Dispatch helper for `RetrieveMessagePartRange` (§9 open question,
/// Testable Properties item 7). Every other `dispatch*` routine sets the
/// "retrieval in progress" flag on submission and clears it once the
/// action's terminal outcome is known; this one historically cleared it
/// on the *failure* branch instead, leaving the flag stuck set after a
/// successful retrieval. Corrected here: the flag is cleared on success,
/// matching every sibling `dispatch*` function.
pub async fn dispatch_retrieve_message_part_range(
    store: &dyn MailStore,
    account: &AccountId,
    fetch: impl std::future::Future<Output = Result<()>>,
) -> Result<()> {
    store.set_retrieval_in_progress(&[account.clone()], true)?;
    let outcome = fetch.await;
    if outcome.is_ok() {
        store.set_retrieval_in_progress(&[account.clone()], false)?;
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryMailStore;
    use std::sync::Arc;

    fn store() -> Arc<dyn MailStore> {
        Arc::new(MemoryMailStore::new())
    }

    #[tokio::test]
    async fn submit_without_registration_fails_immediately() {
        let mut dispatcher = Dispatcher::new(store(), test_journal("no-registration").await, Duration::from_secs(60));
        let err = dispatcher
            .submit(
                RequestType::RetrieveMessageList,
                AccountId::new("nobody@example.com"),
                ActionParams::default(),
                &[ServiceKind::Source],
                &[],
                CompletionKind::Retrieval,
            )
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::NoConnection(_)));
    }

    #[tokio::test]
    async fn available_service_dispatches_and_binds_exclusively() {
        let mut dispatcher = Dispatcher::new(store(), test_journal("exclusive-bind").await, Duration::from_secs(60));
        let account = AccountId::new("a@example.com");
        dispatcher.register(account.clone(), None, false);

        let (id, _rx) = dispatcher
            .submit(
                RequestType::RetrieveMessageList,
                account.clone(),
                ActionParams::default(),
                &[ServiceKind::Source],
                &[],
                CompletionKind::Retrieval,
            )
            .unwrap();

        let dispatched = dispatcher.dispatch().await.unwrap();
        assert_eq!(dispatched, vec![id]);
        assert_eq!(dispatcher.active_count(), 1);

        let (second_id, _rx2) = dispatcher
            .submit(
                RequestType::RetrieveMessageList,
                account,
                ActionParams::default(),
                &[ServiceKind::Source],
                &[],
                CompletionKind::Retrieval,
            )
            .unwrap();
        let dispatched = dispatcher.dispatch().await.unwrap();
        assert!(dispatched.is_empty());
        assert_eq!(dispatcher.queued_count(), 1);

        dispatcher.complete_action(id).await.unwrap();
        let dispatched = dispatcher.dispatch().await.unwrap();
        assert_eq!(dispatched, vec![second_id]);
    }

    #[tokio::test]
    async fn retrieve_message_part_range_clears_flag_on_success_not_failure() {
        let store = store();
        let account = AccountId::new("a@example.com");

        dispatch_retrieve_message_part_range(store.as_ref(), &account, async { Ok(()) })
            .await
            .unwrap();
        assert!(!store.is_retrieval_in_progress(&account).unwrap());

        let err = dispatch_retrieve_message_part_range(
            store.as_ref(),
            &account,
            async { Err(OrchestratorError::Timeout) },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, OrchestratorError::Timeout));
        // Regression: under the inverted (buggy) behavior this would be
        // `false` here because the clear fired on the failure branch.
        assert!(store.is_retrieval_in_progress(&account).unwrap());
    }

    #[tokio::test]
    async fn registering_a_second_folder_monitor_drops_both() {
        let mut dispatcher = Dispatcher::new(store(), test_journal("folder-monitor").await, Duration::from_secs(60));
        let account = AccountId::new("a@example.com");
        let archive = crate::ids::FolderId::new("Archive");
        let work = crate::ids::FolderId::new("Work");

        dispatcher.register_folder_monitor(account.clone(), archive.clone());
        assert_eq!(dispatcher.folder_monitor(), Some(&(account.clone(), archive.clone())));

        dispatcher.register_folder_monitor(account.clone(), archive.clone());
        assert_eq!(dispatcher.folder_monitor(), Some(&(account.clone(), archive)));

        dispatcher.register_folder_monitor(account, work);
        assert_eq!(dispatcher.folder_monitor(), None);
    }

    /// A `Journal` against a per-test temp path; a `Dispatcher` needs one
    /// to construct, journal I/O itself is covered by `journal`'s own tests.
    async fn test_journal(name: &str) -> Journal {
        let path = std::env::temp_dir().join(format!(
            "corvid-dispatcher-test-{}-{}",
            std::process::id(),
            name
        ));
        let _ = tokio::fs::remove_file(&path).await;
        let _ = tokio::fs::remove_file(format!("{}.lock", path.display())).await;
        Journal::open(&path).await.unwrap()
    }
}
