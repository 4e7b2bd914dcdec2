//! Entity definitions (spec 3). Deploys, mints, and bitmaps are long-lived:
//! created once, then mutated in place when an ownership transfer is
//! observed. Prior address is kept alongside the current one; deeper history
//! lives in [`AddressHistoryEntry`] rows.

use rust_decimal::Decimal;
use serde::Deserialize;

pub type InscriptionId = String;

#[derive(Debug, Clone, PartialEq)]
pub struct Deploy {
    pub id: InscriptionId,
    pub p: String,
    pub op: String,
    pub name: String,
    pub max: i64,
    pub price: Decimal,
    pub deployer_address: String,
    pub block_height: u64,
    pub timestamp: i64,
    pub source_id: InscriptionId,
    pub position: u32,
    pub mint_count: i64,
    pub wallet: Option<String>,
    pub updated_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mint {
    pub inscription_id: InscriptionId,
    pub deploy_id: InscriptionId,
    pub source_id: InscriptionId,
    pub mint_address: String,
    pub transaction_id: String,
    pub block_height: u64,
    pub timestamp: i64,
    pub position: u32,
    pub wallet: String,
    pub previous_wallet: Option<String>,
    pub wallet_update_block: Option<u64>,
    pub wallet_update_timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bitmap {
    pub inscription_id: InscriptionId,
    pub block_height: u64,
    pub bitmap_number: u64,
    pub address: String,
    pub content: String,
    pub position: u32,
    pub previous_address: Option<String>,
    pub address_update_block: Option<u64>,
    pub address_update_timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorBlock {
    pub block_height: u64,
    pub retry_at: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BitmapPattern {
    pub bitmap_number: u64,
    pub pattern_string: String,
    /// Same digits as `pattern_string`, re-exposed as integers. Kept in sync
    /// with it at all times (spec 9's `squareSizes`/`txList` note).
    pub squares: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Deploy,
    Mint,
    Bitmap,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Deploy => "deploy",
            EntityKind::Mint => "mint",
            EntityKind::Bitmap => "bitmap",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AddressHistoryEntry {
    pub inscription_id: InscriptionId,
    pub entity_kind: EntityKind,
    pub block_height: u64,
    pub address: String,
    pub recorded_at: i64,
}

/// The persisted driver cursor (spec 3's IndexerState row, supplementing
/// spec 9's "global driver state" note with durability across restarts).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexerState {
    pub current_height: u64,
    pub cached_tip: u64,
}

/// Raw shape of a BRC-420 deploy inscription's JSON content (spec 6).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeployContent {
    pub p: String,
    pub op: String,
    pub id: String,
    pub name: String,
    pub max: serde_json::Value,
    pub price: serde_json::Value,
}
