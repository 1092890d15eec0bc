use std::collections::HashMap;
use std::path::PathBuf;

use tracing::{error, info, warn};

use corvid_mail::config::AccountConfig;
use corvid_mail::error::OrchestratorError;
use corvid_mail::ids::AccountId;
use corvid_mail::orchestrator::{ServiceHandle, ServiceKind, ServiceWorker};
use corvid_mail::{bootstrap, init_tracing, SCHEDULER_TICK};

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("corvid-mail")
}

fn load_accounts(dir: &std::path::Path) -> Vec<AccountConfig> {
    let path = dir.join("accounts.json");
    match std::fs::read_to_string(&path) {
        Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
            warn!(error = %e, path = %path.display(), "could not parse accounts config, starting with none");
            Vec::new()
        }),
        Err(_) => {
            info!(path = %path.display(), "no accounts config found, starting with none");
            Vec::new()
        }
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let dir = data_dir();
    if let Err(e) = std::fs::create_dir_all(&dir) {
        error!(error = %e, "could not create data directory");
        return;
    }

    let mut dispatcher = match bootstrap(&dir.join("store.sqlite3"), &dir.join("journal.txt")).await {
        Ok(d) => d,
        Err(e) => {
            error!(error = %e, "failed to bootstrap orchestrator");
            return;
        }
    };

    let mut workers: HashMap<ServiceHandle, ServiceWorker> = HashMap::new();
    for account in load_accounts(&dir) {
        let account_id = AccountId::new(account.id.clone());
        dispatcher.register(account_id.clone(), None, false);
        workers.insert(
            ServiceHandle::new(account_id.clone(), ServiceKind::Source),
            ServiceWorker::new(account_id.clone(), ServiceKind::Source, account.imap.clone()),
        );
        workers.insert(
            ServiceHandle::new(account_id.clone(), ServiceKind::Sink),
            ServiceWorker::new(account_id, ServiceKind::Sink, account.imap),
        );
    }
    info!(count = workers.len() / 2, "registered accounts");

    loop {
        dispatcher.check_expiry().await;

        let dispatched = match dispatcher.dispatch().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "dispatch pass failed");
                Vec::new()
            }
        };

        for id in dispatched {
            let Some(action) = dispatcher.active_action(id) else { continue };
            let Some(handle) = action.services.iter().next().cloned() else { continue };

            let Some(worker) = workers.get_mut(&handle) else {
                warn!(action = id, "dispatched action has no registered service worker");
                dispatcher
                    .fail_action(id, OrchestratorError::NoConnection("service worker missing".into()))
                    .await;
                continue;
            };

            match worker.execute(dispatcher.store(), &action).await {
                Ok(matching_ids) => {
                    if !matching_ids.is_empty() {
                        dispatcher.report_matching_ids(id, matching_ids);
                    }
                    if action.request_type == corvid_mail::orchestrator::RequestType::FlagMessages {
                        if let Some(folder) = action.params.folder.clone() {
                            if folder.as_str() != "INBOX" {
                                dispatcher.register_folder_monitor(action.account.clone(), folder);
                            }
                        }
                    }
                    if let Err(e) = dispatcher.complete_action(id).await {
                        warn!(action = id, error = %e, "could not record action completion");
                    }
                }
                Err(e) => {
                    warn!(action = id, error = %e, "action failed");
                    dispatcher.fail_action(id, e).await;
                }
            }
        }

        tokio::time::sleep(SCHEDULER_TICK).await;
    }
}
