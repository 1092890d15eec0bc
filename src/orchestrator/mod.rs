//! Service Orchestrator (§4.4): registers per-account services, accepts
//! requests, dispatches them to whichever service becomes available, and
//! reports their outcome back over per-action event channels.

pub mod action;
pub mod dispatcher;
pub mod journal;
pub mod service;

pub use action::{
    Action, ActionParams, Activity, ActivityWire, CompletionKind, OrchestratorEvent, RequestType,
    ServiceHandle, ServiceKind,
};
pub use dispatcher::Dispatcher;
pub use journal::{Journal, STARTUP_SETTLE_DELAY};
pub use service::ServiceWorker;
