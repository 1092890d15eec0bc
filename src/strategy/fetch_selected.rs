//! Fetch-Selected strategy (§4.3.1): given a set of
//! (folder, uid, optional-part, optional-minimum-bytes) triples, deliver
//! the requested content into the store and report progress weighted by
//! indicative size.

use std::collections::HashMap;

use imap_proto::types::BodyStructure;

use crate::error::{OrchestratorError, Result};
use crate::ids::FolderId;
use crate::protocol::mime::part_to_string;
use crate::protocol::{decode_body, find_eligible_parts, part_to_section_path};
use crate::store::StoreKey;

use super::context::RetrievalProgress;
use super::{Strategy, StrategyContext};

/// One requested fetch: either the whole message, a named MIME part, or a
/// partial byte range of the root `text/plain` body.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub folder: FolderId,
    pub uid: u32,
    pub part: Option<Vec<u32>>,
    pub min_bytes: Option<u64>,
    pub indicative_size: u64,
}

pub struct FetchSelectedStrategy {
    requests: Vec<FetchRequest>,
    progress: HashMap<u32, RetrievalProgress>,
}

impl FetchSelectedStrategy {
    pub fn new(requests: Vec<FetchRequest>) -> Self {
        let progress = requests
            .iter()
            .map(|r| {
                (
                    r.uid,
                    RetrievalProgress {
                        indicative_size: r.indicative_size,
                        ..Default::default()
                    },
                )
            })
            .collect();
        Self { requests, progress }
    }

    fn complete_uid(&mut self, ctx: &mut StrategyContext, uid: u32) {
        if let Some(p) = self.progress.get_mut(&uid) {
            let remaining = p.indicative_size as f64 * (1.0 - p.percent_done);
            p.percent_done = 1.0;
            ctx.bump_progress(remaining.round() as u64);
        }
    }

    /// Records the largest byte count observed for `uid` so far and bumps
    /// overall progress by the proportional share of `indicative_size` that
    /// newly-observed byte count represents (ground truth: `downloadSize`/
    /// `itemFetched`'s `percentage = min(length*100/totalBytes, 100)`).
    fn bump_partial(&mut self, ctx: &mut StrategyContext, uid: u32, observed_bytes: u64) {
        if let Some(p) = self.progress.get_mut(&uid) {
            p.byte_size = p.byte_size.max(observed_bytes);
            let fraction = if p.indicative_size > 0 {
                (p.byte_size as f64 / p.indicative_size as f64).min(1.0)
            } else {
                1.0
            };
            let delta_fraction = (fraction - p.percent_done).max(0.0);
            p.percent_done = p.percent_done.max(fraction);
            let delta_bytes = (p.indicative_size as f64 * delta_fraction).round() as u64;
            ctx.bump_progress(delta_bytes);
        }
    }
}

#[async_trait::async_trait]
impl Strategy for FetchSelectedStrategy {
    async fn run(&mut self, ctx: &mut StrategyContext) -> Result<()> {
        ctx.total_retrieval_size = self.requests.iter().map(|r| r.indicative_size).sum();

        // Group requests by folder, preserving insertion order, to drive
        // one SELECT per folder (§4.3 "Folder selection").
        let mut by_folder: Vec<(FolderId, Vec<usize>)> = Vec::new();
        for (idx, req) in self.requests.iter().enumerate() {
            match by_folder.iter_mut().find(|(f, _)| f == &req.folder) {
                Some((_, idxs)) => idxs.push(idx),
                None => by_folder.push((req.folder.clone(), vec![idx])),
            }
        }

        for (folder, idxs) in by_folder {
            ctx.connection
                .select(&folder, true)
                .await
                .map_err(|e| OrchestratorError::NoConnection(e.0))?;
            ctx.touch();

            let mut i = 0;
            while i < idxs.len() {
                let req = self.requests[idxs[i]].clone();
                if req.part.is_some() || req.min_bytes.is_some() {
                    self.fetch_one(ctx, &folder, idxs[i]).await?;
                    i += 1;
                } else {
                    let mut batch = vec![idxs[i]];
                    i += 1;
                    while i < idxs.len() && batch.len() < ctx.batch_size {
                        let next = &self.requests[idxs[i]];
                        if next.part.is_some() || next.min_bytes.is_some() {
                            break;
                        }
                        batch.push(idxs[i]);
                        i += 1;
                    }
                    self.fetch_whole_batch(ctx, &folder, &batch).await?;
                }
            }
        }

        Ok(())
    }
}

impl FetchSelectedStrategy {
    /// Split `batch` by the retrieval budget (§4.3.5 "Preview + Completion
    /// pipeline"): messages under `header_limit` are fetched whole, larger
    /// ones get a BODYSTRUCTURE-driven preview.
    async fn fetch_whole_batch(
        &mut self,
        ctx: &mut StrategyContext,
        folder: &FolderId,
        batch: &[usize],
    ) -> Result<()> {
        let (small, large): (Vec<usize>, Vec<usize>) = batch
            .iter()
            .copied()
            .partition(|&i| self.requests[i].indicative_size < ctx.header_limit);

        if !small.is_empty() {
            self.fetch_whole_small(ctx, folder, &small).await?;
        }
        for i in large {
            self.fetch_preview(ctx, folder, i).await?;
        }

        Ok(())
    }

    async fn fetch_whole_small(
        &mut self,
        ctx: &mut StrategyContext,
        folder: &FolderId,
        batch: &[usize],
    ) -> Result<()> {
        let uid_list = batch
            .iter()
            .map(|&i| self.requests[i].uid.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let fetches = ctx
            .connection
            .uid_fetch(&uid_list, "(UID RFC822)")
            .await
            .map_err(|e| OrchestratorError::NoConnection(e.0))?;
        ctx.touch();

        for fetch in &fetches {
            let Some(uid) = fetch.uid else { continue };
            let Some(body) = fetch.body() else { continue };
            let content = String::from_utf8_lossy(body).to_string();

            let existing = ctx
                .store
                .messages_metadata(&StoreKey::and([
                    StoreKey::account(ctx.account.clone()),
                    StoreKey::folder(folder.clone()),
                    StoreKey::server_uid_in(vec![uid]),
                ]))?;
            if let Some(mut metadata) = existing.into_iter().next() {
                metadata.size = content.len() as u64;
                metadata
                    .status
                    .insert(crate::status::MessageStatus::CONTENT_AVAILABLE);
                metadata
                    .status
                    .remove(crate::status::MessageStatus::PARTIAL_CONTENT_AVAILABLE);
                ctx.store.update_message(metadata)?;
            }

            self.complete_uid(ctx, uid);
        }

        let fetched_uids: Vec<u32> = fetches.iter().filter_map(|f| f.uid).collect();
        for &i in batch {
            let uid = self.requests[i].uid;
            if !fetched_uids.contains(&uid) {
                tracing::debug!(uid, folder = %folder, "nonexistent UID in fetch-selected batch");
            }
        }

        Ok(())
    }

    /// Preview a single oversized message: BODYSTRUCTURE first, then either
    /// a partial-range fetch of the root `text/plain` body, or a walk over
    /// eligible inline-text parts splitting `header_limit` among them
    /// (§4.3.5).
    async fn fetch_preview(&mut self, ctx: &mut StrategyContext, folder: &FolderId, idx: usize) -> Result<()> {
        let uid = self.requests[idx].uid;

        let fetches = ctx
            .connection
            .uid_fetch(&uid.to_string(), "(UID BODYSTRUCTURE)")
            .await
            .map_err(|e| OrchestratorError::NoConnection(e.0))?;
        ctx.touch();

        let Some(fetch) = fetches.first() else {
            tracing::debug!(uid, folder = %folder, "nonexistent UID in fetch-selected batch");
            return Ok(());
        };
        let Some(body) = fetch.bodystructure() else {
            self.complete_uid(ctx, uid);
            return Ok(());
        };

        if let Some(encoding) = root_text_plain_encoding(body) {
            let limit = ctx.header_limit;
            self.fetch_partial_range(ctx, folder, uid, &[1], &encoding, limit).await?;
            return Ok(());
        }

        let parts = find_eligible_parts(body);
        if parts.is_empty() {
            self.complete_uid(ctx, uid);
            return Ok(());
        }
        let share = (ctx.header_limit / parts.len() as u64).max(1);

        let mut combined = String::new();
        let mut observed_bytes = 0u64;
        for part in &parts {
            let query = format!("(UID BODY.PEEK[{}]<0.{}>)", part_to_string(&part.path), share);
            let part_fetches = ctx
                .connection
                .uid_fetch(&uid.to_string(), &query)
                .await
                .map_err(|e| OrchestratorError::NoConnection(e.0))?;
            ctx.touch();

            if let Some(pf) = part_fetches.first() {
                if let Some(section) = pf.section(&part_to_section_path(&part.path)) {
                    let decoded = decode_body(section, &part.encoding);
                    observed_bytes += decoded.len() as u64;
                    if !combined.is_empty() {
                        combined.push('\n');
                    }
                    combined.push_str(&decoded);
                }
            }
        }

        let partial = observed_bytes >= ctx.header_limit;
        self.store_partial(ctx, folder, uid, &combined, partial)?;
        self.bump_partial(ctx, uid, observed_bytes);
        Ok(())
    }

    async fn fetch_partial_range(
        &mut self,
        ctx: &mut StrategyContext,
        folder: &FolderId,
        uid: u32,
        path: &[u32],
        encoding: &str,
        limit: u64,
    ) -> Result<()> {
        let query = format!("(UID BODY.PEEK[{}]<0.{}>)", part_to_string(path), limit);
        let fetches = ctx
            .connection
            .uid_fetch(&uid.to_string(), &query)
            .await
            .map_err(|e| OrchestratorError::NoConnection(e.0))?;
        ctx.touch();

        if let Some(fetch) = fetches.first() {
            if let Some(section) = fetch.section(&part_to_section_path(path)) {
                let decoded = decode_body(section, encoding);
                let observed = decoded.len() as u64;
                let partial = observed >= limit;
                self.store_partial(ctx, folder, uid, &decoded, partial)?;
                self.bump_partial(ctx, uid, observed);
                return Ok(());
            }
        }
        self.complete_uid(ctx, uid);
        Ok(())
    }

    async fn fetch_one(&mut self, ctx: &mut StrategyContext, folder: &FolderId, idx: usize) -> Result<()> {
        let req = self.requests[idx].clone();
        let mut observed_bytes = 0u64;

        if let Some(part) = &req.part {
            let fetches = ctx
                .connection
                .uid_fetch(&req.uid.to_string(), &format!("(UID BODY.PEEK[{}])", crate::protocol::mime::part_to_string(part)))
                .await
                .map_err(|e| OrchestratorError::NoConnection(e.0))?;
            ctx.touch();

            if let Some(fetch) = fetches.first() {
                if let Some(section) = fetch.section(&part_to_section_path(part)) {
                    let decoded = decode_body(section, "");
                    observed_bytes = decoded.len() as u64;
                    self.store_partial(ctx, folder, req.uid, &decoded, true)?;
                }
            }
        } else if let Some(min_bytes) = req.min_bytes {
            let query = format!("(UID BODY.PEEK[1]<0.{}>)", min_bytes);
            let fetches = ctx
                .connection
                .uid_fetch(&req.uid.to_string(), &query)
                .await
                .map_err(|e| OrchestratorError::NoConnection(e.0))?;
            ctx.touch();

            if let Some(fetch) = fetches.first() {
                if let Some(section) = fetch.section(&part_to_section_path(&[1])) {
                    let decoded = decode_body(section, "");
                    observed_bytes = decoded.len() as u64;
                    let complete = (decoded.len() as u64) < min_bytes;
                    self.store_partial(ctx, folder, req.uid, &decoded, !complete)?;
                }
            }
        }

        self.bump_partial(ctx, req.uid, observed_bytes);
        Ok(())
    }

    fn store_partial(
        &self,
        ctx: &mut StrategyContext,
        folder: &FolderId,
        uid: u32,
        content: &str,
        partial: bool,
    ) -> Result<()> {
        let existing = ctx.store.messages_metadata(&StoreKey::and([
            StoreKey::account(ctx.account.clone()),
            StoreKey::folder(folder.clone()),
            StoreKey::server_uid_in(vec![uid]),
        ]))?;
        if let Some(mut metadata) = existing.into_iter().next() {
            metadata.size = content.len() as u64;
            if partial {
                metadata
                    .status
                    .insert(crate::status::MessageStatus::PARTIAL_CONTENT_AVAILABLE);
            } else {
                metadata
                    .status
                    .insert(crate::status::MessageStatus::CONTENT_AVAILABLE);
                metadata
                    .status
                    .remove(crate::status::MessageStatus::PARTIAL_CONTENT_AVAILABLE);
            }
            ctx.store.update_message(metadata)?;
        }
        Ok(())
    }
}

/// Whether `body`'s root is inline `text/plain`, and if so its transfer
/// encoding (§4.3.5: "if root content is text/plain, schedule part-range
/// fetch").
fn root_text_plain_encoding(body: &BodyStructure) -> Option<String> {
    match body {
        BodyStructure::Text { common, other, .. } if common.ty.subtype.eq_ignore_ascii_case("plain") => {
            Some(crate::protocol::encoding_to_string(&other.transfer_encoding))
        }
        BodyStructure::Basic { common, other, .. }
            if common.ty.ty.eq_ignore_ascii_case("text") && common.ty.subtype.eq_ignore_ascii_case("plain") =>
        {
            Some(crate::protocol::encoding_to_string(&other.transfer_encoding))
        }
        _ => None,
    }
}
