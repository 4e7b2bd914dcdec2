//! Driver state machine (spec 4.7). Single-threaded per spec 5: bulk mode
//! admits up to `CONCURRENCY_LIMIT` blocks in flight while catching up,
//! live mode drops to strict-order concurrency 1 once the cursor is at tip.

use std::sync::Arc;

use config::Config;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::block_processor::{process_block, BlockResult};
use crate::cache::TwoTierCache;
use crate::gateway::GatewayClient;
use crate::logging::Context;
use crate::metrics::Metrics;
use crate::models::IndexerState;
use crate::store::Store;
use crate::{try_crit, try_info, try_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    CatchingUp,
    AtTip,
    Live,
}

/// Owns the moving cursor and the set of collaborators it drives. A single
/// value of this type is the "single *Indexer* value" spec 9 recommends
/// hanging shared state off of, rather than free-floating module statics.
pub struct Driver {
    gateway: GatewayClient,
    store: Store,
    cache: TwoTierCache,
    config: Config,
    metrics: Metrics,
    cursor: u64,
    cached_tip: u64,
}

impl Driver {
    pub async fn bootstrap(
        gateway: GatewayClient,
        store: Store,
        cache: TwoTierCache,
        config: Config,
    ) -> Result<Driver, crate::error::IndexerError> {
        let cursor = match store.load_state().await? {
            Some(state) => state.current_height,
            None => config.indexing.start_block,
        };
        Ok(Driver {
            gateway,
            store,
            cache,
            config,
            metrics: Metrics::new(),
            cursor,
            cached_tip: cursor,
        })
    }

    pub fn current_height(&self) -> u64 {
        self.cursor
    }

    pub fn metrics(&self) -> Metrics {
        self.metrics.clone()
    }

    /// Runs forever. On any fatal loop exception the driver pauses for the
    /// configured recovery interval and restarts itself from the persisted
    /// cursor (spec 4.7's "any -> recovery-pause -> restart" transition).
    pub async fn run(&mut self, ctx: &Context) {
        loop {
            if let Err(e) = self.run_until_fatal(ctx).await {
                try_crit!(ctx, "driver loop exited with fatal error: {e}, pausing before restart");
                tokio::time::sleep(self.config.gateway.recovery_pause).await;
            }
        }
    }

    async fn run_until_fatal(&mut self, ctx: &Context) -> Result<(), crate::error::IndexerError> {
        let mut phase = Phase::CatchingUp;
        loop {
            self.retry_due_error_blocks(ctx).await?;

            phase = match phase {
                Phase::CatchingUp => self.tick_catching_up(ctx).await?,
                Phase::AtTip => self.tick_at_tip(ctx).await?,
                Phase::Live => self.tick_live(ctx).await?,
            };
        }
    }

    async fn retry_due_error_blocks(&mut self, ctx: &Context) -> Result<(), crate::error::IndexerError> {
        let due = self.store.due_error_blocks(self.cursor).await?;
        for error_block in due {
            let result = process_block(
                &self.gateway,
                &self.store,
                &self.cache,
                self.config.indexing.retry_block_delay,
                error_block.block_height,
                ctx,
            )
            .await;
            if matches!(result, BlockResult::Processed(_)) {
                try_info!(ctx, "error block {} recovered on retry", error_block.block_height);
            }
        }
        Ok(())
    }

    async fn tick_catching_up(&mut self, ctx: &Context) -> Result<Phase, crate::error::IndexerError> {
        if self.cursor >= self.cached_tip {
            return Ok(Phase::AtTip);
        }

        let batch_end = (self.cursor + self.config.indexing.concurrency_limit as u64).min(self.cached_tip);
        let semaphore = Arc::new(Semaphore::new(self.config.indexing.concurrency_limit));
        let mut tasks = JoinSet::new();

        for height in (self.cursor + 1)..=batch_end {
            let permit = semaphore.clone().acquire_owned().await.expect("semaphore closed");
            let gateway = self.gateway.clone();
            let store = self.store.clone();
            let cache = self.cache.clone();
            let retry_block_delay = self.config.indexing.retry_block_delay;
            let ctx = ctx.clone();
            tasks.spawn(async move {
                let result = process_block(&gateway, &store, &cache, retry_block_delay, height, &ctx).await;
                drop(permit);
                (height, result)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(pair) => results.push(pair),
                Err(e) => try_warn!(ctx, "block task panicked: {e}"),
            }
        }
        results.sort_by_key(|(height, _)| *height);

        // Advance the durable cursor only through the longest prefix of
        // successes, so a failure mid-batch doesn't skip past an unresolved
        // block (spec 4.7's per-block ErrorBlock recording relies on the
        // cursor never passing a block that still needs retrying).
        let mut advanced_to = self.cursor;
        for (height, result) in results {
            if height != advanced_to + 1 {
                break;
            }
            match result {
                BlockResult::Processed(counts) => {
                    self.metrics.record_block(&counts, height);
                    advanced_to = height;
                }
                BlockResult::Failed => break,
            }
        }
        if advanced_to > self.cursor {
            self.cursor = advanced_to;
            self.persist_state().await?;
        }

        Ok(Phase::CatchingUp)
    }

    async fn tick_at_tip(&mut self, ctx: &Context) -> Result<Phase, crate::error::IndexerError> {
        let refreshed_tip = self.gateway.get_tip_height(ctx).await?;
        if refreshed_tip > self.cursor {
            self.cached_tip = refreshed_tip;
            self.persist_state().await?;
            return Ok(Phase::CatchingUp);
        }
        tokio::time::sleep(self.config.indexing.tip_idle_sleep).await;
        Ok(Phase::Live)
    }

    async fn tick_live(&mut self, ctx: &Context) -> Result<Phase, crate::error::IndexerError> {
        let refreshed_tip = self.gateway.get_tip_height(ctx).await?;
        if refreshed_tip <= self.cursor {
            tokio::time::sleep(self.config.indexing.tip_idle_sleep).await;
            return Ok(Phase::Live);
        }

        for height in (self.cursor + 1)..=refreshed_tip {
            let result = process_block(
                &self.gateway,
                &self.store,
                &self.cache,
                self.config.indexing.retry_block_delay,
                height,
                ctx,
            )
            .await;
            match result {
                BlockResult::Processed(counts) => {
                    self.metrics.record_block(&counts, height);
                    self.cursor = height;
                    self.cached_tip = self.cached_tip.max(height);
                    self.persist_state().await?;
                }
                BlockResult::Failed => break,
            }
        }
        Ok(Phase::Live)
    }

    async fn persist_state(&self) -> Result<(), crate::error::IndexerError> {
        self.store
            .save_state(IndexerState {
                current_height: self.cursor,
                cached_tip: self.cached_tip,
            })
            .await
    }
}
