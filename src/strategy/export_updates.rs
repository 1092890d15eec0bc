//! Export-Updates strategy (§4.3.4, export-only variant): a
//! `SynchronizeAll` configured to push local flag/deletion changes
//! without retrieving new mail. Running it twice with no intervening
//! local changes produces no wire traffic beyond `SELECT`/`SEARCH`.

use crate::error::Result;

use super::synchronize_all::{SynchronizeAll, SynchronizeOptions};
use super::{Strategy, StrategyContext};

pub struct ExportUpdates {
    inner: SynchronizeAll,
}

impl ExportUpdates {
    pub fn new() -> Self {
        Self {
            inner: SynchronizeAll::new(SynchronizeOptions {
                export_changes: true,
                retrieve_mail: false,
            }),
        }
    }
}

impl Default for ExportUpdates {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Strategy for ExportUpdates {
    async fn run(&mut self, ctx: &mut StrategyContext) -> Result<()> {
        self.inner.run(ctx).await
    }
}
