//! Synchronize-All strategy (§4.3.4): extends Synchronize-Base with
//! export-then-retrieve semantics. Export runs strictly before retrieval
//! so the server's view is canonical when preview metadata is fetched.

use crate::error::{OrchestratorError, Result};
use crate::ids::FolderId;
use crate::status::MessageStatus;
use crate::store::{MessageMetadata, StoreKey};

use super::synchronize_base::SynchronizeBaseStrategy;
use super::{Strategy, StrategyContext};

#[derive(Debug, Clone, Copy, Default)]
pub struct SynchronizeOptions {
    pub export_changes: bool,
    pub retrieve_mail: bool,
}

pub struct SynchronizeAll {
    options: SynchronizeOptions,
}

impl SynchronizeAll {
    pub fn new(options: SynchronizeOptions) -> Self {
        Self { options }
    }

    async fn export_folder_changes(&self, ctx: &mut StrategyContext, folder: &FolderId) -> Result<()> {
        let unseen = ctx
            .connection
            .uid_search("UNSEEN")
            .await
            .map_err(|e| OrchestratorError::NoConnection(e.0))?;
        ctx.touch();

        let stored = ctx.store.messages_metadata(&StoreKey::and([
            StoreKey::account(ctx.account.clone()),
            StoreKey::folder(folder.clone()),
        ]))?;

        for message in &stored {
            let uid = message.server_uid.numeric_uid();
            if message.status.contains(MessageStatus::READ) && unseen.contains(&uid) {
                ctx.connection
                    .uid_store(&uid.to_string(), "+FLAGS (\\Seen)")
                    .await
                    .map_err(|e| OrchestratorError::NoConnection(e.0))?;
                ctx.touch();
            }
        }

        let deletion_candidates: Vec<u32> = stored
            .iter()
            .filter(|m| m.status.contains(MessageStatus::TRASH))
            .map(|m| m.server_uid.numeric_uid())
            .collect();

        if !deletion_candidates.is_empty() {
            let uid_list = deletion_candidates
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
                .expunge()
                .await
                .map_err(|e| OrchestratorError::NoConnection(e.0))?;
            ctx.touch();
        }

        Ok(())
    }

    /// Preview-fetch newly reported UIDs: `UID DATE RFC822.SIZE
    /// RFC822.HEADER BODYSTRUCTURE` (§4.3.3 "Additions"), storing each as
    /// a new record with no content yet available.
    async fn schedule_additions(&self, ctx: &mut StrategyContext, folder: &FolderId, uids: &[u32]) -> Result<()> {
        if uids.is_empty() {
            return Ok(());
        }
        let uid_list = uids.iter().map(|u| u.to_string()).collect::<Vec<_>>().join(",");
        let fetches = ctx
            .connection
            .uid_fetch(&uid_list, "(UID INTERNALDATE RFC822.SIZE RFC822.HEADER)")
            .await
            .map_err(|e| OrchestratorError::NoConnection(e.0))?;
        ctx.touch();

        for fetch in &fetches {
            let Some(uid) = fetch.uid else { continue };
            let size = fetch.size.unwrap_or(0) as u64;
            let header_bytes = fetch.header().unwrap_or(&[]);
            let header_text = String::from_utf8_lossy(header_bytes);
            let message_id_header = extract_header_value(&header_text, "message-id")
                .unwrap_or_default();
            let in_response_to = extract_header_value(&header_text, "in-reply-to")
                .or_else(|| parse_references_value(&header_text).into_iter().last());

            ctx.store.add_message(MessageMetadata {
                id: crate::ids::MessageId::INVALID,
                account: ctx.account.clone(),
                folder: folder.clone(),
                previous_folder: None,
                server_uid: crate::ids::ServerUid::bare(uid),
                size,
                status: MessageStatus::from_bits(MessageStatus::NEW),
                message_id_header,
                in_response_to,
            })?;
        }

        Ok(())
    }
}

fn extract_header_value(header_text: &str, name: &str) -> Option<String> {
    let fake = format!("X-Probe: 1\r\n{}", header_text);
    let (headers, _) = mailparse::parse_headers(fake.as_bytes()).ok()?;
    headers
        .iter()
        .find(|h| h.get_key_ref().eq_ignore_ascii_case(name))
        .map(|h| h.get_value().trim_matches(|c| c == '<' || c == '>').to_string())
}

/// Parse the folded `References:` header value into an ordered list of
/// message ids, stripped of angle brackets.
fn parse_references_value(header_text: &str) -> Vec<String> {
    let unfolded = header_text.lines().fold(String::new(), |mut acc, line| {
        if line.starts_with(' ') || line.starts_with('\t') {
            acc.push(' ');
            acc.push_str(line.trim());
        } else if !acc.is_empty() {
            acc.push(' ');
            acc.push_str(line);
        } else {
            acc.push_str(line);
        }
        acc
    });

    if let Some(pos) = unfolded.to_lowercase().find("references:") {
        let value = &unfolded[pos + "references:".len()..];
        value
            .split_whitespace()
            .filter(|s| s.starts_with('<') && s.ends_with('>'))
            .map(|s| s[1..s.len() - 1].to_string())
            .collect()
    } else {
        vec![]
    }
}

impl SynchronizeBaseStrategy for SynchronizeAll {}

#[async_trait::async_trait]
impl Strategy for SynchronizeAll {
    async fn run(&mut self, ctx: &mut StrategyContext) -> Result<()> {
        let folders: Vec<FolderId> = ctx
            .store
            .folders(&ctx.account)?
            .into_iter()
            .filter(|f| f.synchronization_enabled)
            .map(|f| f.id)
            .collect();

        for folder in folders {
            let outcome = self.reconcile_folder(ctx, &folder, None, true).await?;

            if outcome.inconclusive {
                if self.options.retrieve_mail {
                    self.schedule_additions(ctx, &folder, &outcome.additions).await?;
                }
                continue;
            }

            if self.options.export_changes {
                self.export_folder_changes(ctx, &folder).await?;
            }

            self.apply_reconciliation(ctx, &folder, &outcome).await?;

            if self.options.retrieve_mail {
                self.schedule_additions(ctx, &folder, &outcome.additions).await?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn references_header_unfolds_continuation_lines() {
        let raw = "References: <a@x>\r\n <b@x> <c@x>\r\n";
        let refs = parse_references_value(raw);
        assert_eq!(refs, vec!["a@x", "b@x", "c@x"]);
    }

    #[test]
    fn references_header_absent_yields_empty() {
        assert!(parse_references_value("Subject: hi\r\n").is_empty());
    }
}
