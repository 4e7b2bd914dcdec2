//! Per-block orchestration (spec 4.6): classify, validate, and persist every
//! inscription in one block, in list order, then summarize outcomes for the
//! driver's metrics. Any unexpected I/O fault anywhere in the block is
//! treated as a wholesale block failure: the block is recorded in
//! `error_blocks` for later retry and the function returns without
//! propagating the error, since idempotent upserts make re-running the
//! whole block safe.

use chrono::Utc;

use crate::cache::TwoTierCache;
use crate::classifier::{classify, Candidate};
use crate::error::IndexerError;
use crate::gateway::{txid_of, GatewayClient};
use crate::logging::Context;
use crate::models::{AddressHistoryEntry, EntityKind};
use crate::pattern::derive_pattern;
use crate::store::Store;
use crate::validators::{validate_bitmap, validate_deploy, validate_mint, MintOutcome, Validated};
use crate::{try_debug, try_info, try_warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockCounts {
    pub deploys: u32,
    pub mints: u32,
    pub transfers: u32,
    pub bitmaps: u32,
    pub skipped: u32,
    pub irrelevant: u32,
}

impl BlockCounts {
    pub fn total(&self) -> u32 {
        self.deploys + self.mints + self.transfers + self.bitmaps + self.skipped + self.irrelevant
    }
}

pub enum BlockResult {
    Processed(BlockCounts),
    Failed,
}

enum Outcome {
    Deploy,
    Mint,
    Transfer,
    Bitmap,
    Skipped,
    Irrelevant,
}

pub async fn process_block(
    gateway: &GatewayClient,
    store: &Store,
    cache: &TwoTierCache,
    retry_block_delay: u64,
    height: u64,
    ctx: &Context,
) -> BlockResult {
    let inscriptions = match gateway.get_block(height, ctx).await {
        Ok(block) => block.inscriptions,
        Err(e) => {
            try_warn!(ctx, "block {height} I/O failed: {e}, scheduling retry");
            record_failure(store, height, retry_block_delay, ctx).await;
            return BlockResult::Failed;
        }
    };

    let mut counts = BlockCounts::default();
    for (index, inscription_id) in inscriptions.iter().enumerate() {
        let position = (index + 1) as u32;
        match process_inscription(gateway, store, cache, inscription_id, height, position, ctx).await {
            Ok(outcome) => tally(&mut counts, outcome),
            Err(e) => {
                try_warn!(ctx, "block {height} inscription {inscription_id} failed: {e}, scheduling retry");
                record_failure(store, height, retry_block_delay, ctx).await;
                return BlockResult::Failed;
            }
        }
    }

    store.clear_error_block(height).await.ok();
    try_info!(
        ctx,
        "block {height}: {} deploys, {} mints, {} transfers, {} bitmaps, {} skipped, {} irrelevant",
        counts.deploys,
        counts.mints,
        counts.transfers,
        counts.bitmaps,
        counts.skipped,
        counts.irrelevant
    );
    BlockResult::Processed(counts)
}

async fn record_failure(store: &Store, height: u64, retry_block_delay: u64, ctx: &Context) {
    if let Err(e) = store.record_error_block(height, height + retry_block_delay).await {
        try_warn!(ctx, "failed to record error block {height}: {e}");
    }
}

fn tally(counts: &mut BlockCounts, outcome: Outcome) {
    match outcome {
        Outcome::Deploy => counts.deploys += 1,
        Outcome::Mint => counts.mints += 1,
        Outcome::Transfer => counts.transfers += 1,
        Outcome::Bitmap => counts.bitmaps += 1,
        Outcome::Skipped => counts.skipped += 1,
        Outcome::Irrelevant => counts.irrelevant += 1,
    }
}

async fn process_inscription(
    gateway: &GatewayClient,
    store: &Store,
    cache: &TwoTierCache,
    inscription_id: &str,
    height: u64,
    position: u32,
    ctx: &Context,
) -> Result<Outcome, IndexerError> {
    let content = gateway.get_content(inscription_id, ctx).await?;
    let now = Utc::now().timestamp_millis();

    match classify(&content.bytes) {
        Candidate::Deploy(deploy_content) => {
            let txid = txid_of(inscription_id);
            let resolved_address = gateway
                .get_output(&txid, ctx)
                .await?
                .and_then(|o| o.address)
                .unwrap_or_default();

            // Re-anchor check (spec 3's ownership semantics): if this id
            // already has a deploy row, this is not a new deploy but a
            // possible holder transfer of the original inscription.
            if let Some(existing) = store.get_deploy(inscription_id).await? {
                let current_holder = existing.wallet.unwrap_or(existing.deployer_address);
                if !resolved_address.is_empty() && resolved_address != current_holder {
                    store.update_deploy_wallet(inscription_id, &resolved_address, now).await?;
                    store
                        .append_address_history(AddressHistoryEntry {
                            inscription_id: inscription_id.to_string(),
                            entity_kind: EntityKind::Deploy,
                            block_height: height,
                            address: resolved_address,
                            recorded_at: now,
                        })
                        .await?;
                    return Ok(Outcome::Transfer);
                }
                return Ok(Outcome::Skipped);
            }

            match validate_deploy(&deploy_content, inscription_id, &resolved_address, height, now, position) {
                Validated::Accepted(deploy) => {
                    if store.insert_deploy_if_absent(deploy.clone()).await? {
                        cache.put_deploy(&deploy, ctx).await;
                        store
                            .append_address_history(AddressHistoryEntry {
                                inscription_id: deploy.id.clone(),
                                entity_kind: EntityKind::Deploy,
                                block_height: height,
                                address: deploy.deployer_address.clone(),
                                recorded_at: now,
                            })
                            .await?;
                        Ok(Outcome::Deploy)
                    } else {
                        Ok(Outcome::Skipped)
                    }
                }
                Validated::Skipped(reason) => {
                    try_debug!(ctx, "deploy {inscription_id} skipped: {reason}");
                    Ok(Outcome::Skipped)
                }
            }
        }

        Candidate::Mint { referenced_id } => {
            match validate_mint(gateway, cache, store, &referenced_id, inscription_id, height, now, position, ctx)
                .await?
            {
                MintOutcome::Insert(mint) => {
                    match store.try_reserve_mint_slot(&mint.deploy_id).await? {
                        Some(new_count) => {
                            store.insert_mint_if_absent(mint.clone()).await?;
                            store
                                .append_address_history(AddressHistoryEntry {
                                    inscription_id: mint.inscription_id.clone(),
                                    entity_kind: EntityKind::Mint,
                                    block_height: height,
                                    address: mint.wallet.clone(),
                                    recorded_at: now,
                                })
                                .await?;
                            if let Some(deploy) = store.get_deploy(&mint.deploy_id).await? {
                                if new_count >= deploy.max {
                                    cache.mark_maxed_out(&mint.deploy_id, ctx);
                                }
                            }
                            Ok(Outcome::Mint)
                        }
                        None => {
                            cache.mark_maxed_out(&mint.deploy_id, ctx);
                            Ok(Outcome::Skipped)
                        }
                    }
                }
                MintOutcome::Transfer { inscription_id, new_wallet } => {
                    store.transfer_mint(&inscription_id, &new_wallet, height, now).await?;
                    store
                        .append_address_history(AddressHistoryEntry {
                            inscription_id: inscription_id.clone(),
                            entity_kind: EntityKind::Mint,
                            block_height: height,
                            address: new_wallet,
                            recorded_at: now,
                        })
                        .await?;
                    Ok(Outcome::Transfer)
                }
                MintOutcome::NoOp => Ok(Outcome::Skipped),
                MintOutcome::Skipped(reason) => {
                    try_debug!(ctx, "mint {inscription_id} skipped: {reason}");
                    Ok(Outcome::Skipped)
                }
            }
        }

        Candidate::Bitmap { number, content: raw } => {
            let txid = txid_of(inscription_id);
            let output = gateway.get_output(&txid, ctx).await?;
            let resolved_address = output.as_ref().and_then(|o| o.address.clone()).unwrap_or_default();

            // Re-anchor check, mirroring the deploy path: a bitmap id we
            // already hold a row for is a holder transfer, not a fresh
            // claim, and must never fall through to the uniqueness check
            // below (which would otherwise mistake it for a duplicate of
            // its own number).
            if let Some(existing) = store.get_bitmap(inscription_id).await? {
                if !resolved_address.is_empty() && resolved_address != existing.address {
                    store.transfer_bitmap(inscription_id, &resolved_address, height, now).await?;
                    store
                        .append_address_history(AddressHistoryEntry {
                            inscription_id: inscription_id.to_string(),
                            entity_kind: EntityKind::Bitmap,
                            block_height: height,
                            address: resolved_address,
                            recorded_at: now,
                        })
                        .await?;
                    return Ok(Outcome::Transfer);
                }
                return Ok(Outcome::Skipped);
            }

            let already_claimed = store.get_bitmap_by_number(number).await?.is_some();

            match validate_bitmap(number, &raw, inscription_id, height, &resolved_address, position, already_claimed) {
                Validated::Accepted(bitmap) => {
                    if store.insert_bitmap_if_absent(bitmap.clone()).await? {
                        store
                            .append_address_history(AddressHistoryEntry {
                                inscription_id: bitmap.inscription_id.clone(),
                                entity_kind: EntityKind::Bitmap,
                                block_height: height,
                                address: bitmap.address.clone(),
                                recorded_at: now,
                            })
                            .await?;
                        // The in-scope gateway surface (spec 4.1/6) exposes a
                        // single output's value, not the enclosing block's
                        // full transaction list; deriving a richer pattern
                        // would need an endpoint the visualization
                        // collaborator boundary deliberately excludes.
                        let value = output.map(|o| o.value).unwrap_or(0);
                        let pattern = derive_pattern(number, &[value]);
                        store.upsert_bitmap_pattern(pattern).await?;
                        Ok(Outcome::Bitmap)
                    } else {
                        Ok(Outcome::Skipped)
                    }
                }
                Validated::Skipped(reason) => {
                    try_debug!(ctx, "bitmap {inscription_id} skipped: {reason}");
                    Ok(Outcome::Skipped)
                }
            }
        }

        Candidate::Irrelevant => Ok(Outcome::Irrelevant),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn block_counts_total_sums_every_bucket() {
        let counts = BlockCounts {
            deploys: 1,
            mints: 2,
            transfers: 1,
            bitmaps: 3,
            skipped: 4,
            irrelevant: 5,
        };
        assert_eq!(counts.total(), 16);
    }
}
