//! Persistent store (spec 4.2). A single logical SQLite connection behind a
//! mutex; every mutating call runs inside `spawn_blocking` so the
//! synchronous `rusqlite::Connection` never stalls the async reactor that
//! drives the gateway client (spec 5's "single logical connection, writers
//! serialize via the database's own locking" policy).

use std::str::FromStr;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;

use crate::error::IndexerError;
use crate::models::{
    AddressHistoryEntry, Bitmap, BitmapPattern, Deploy, EntityKind, ErrorBlock, IndexerState, Mint,
};

const SCHEMA: &str = include_str!("schema.sql");

/// Hard upper bound on page size for paginated scans (spec 4.2).
pub const MAX_PAGE_SIZE: usize = 200;

trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

impl FromRow for Deploy {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let price_text: String = row.get("price")?;
        Ok(Deploy {
            id: row.get("id")?,
            p: row.get("p")?,
            op: row.get("op")?,
            name: row.get("name")?,
            max: row.get("max")?,
            price: Decimal::from_str(&price_text).unwrap_or_default(),
            deployer_address: row.get("deployer_address")?,
            block_height: row.get::<_, i64>("block_height")? as u64,
            timestamp: row.get("timestamp")?,
            source_id: row.get("source_id")?,
            position: row.get::<_, i64>("position")? as u32,
            mint_count: row.get("mint_count")?,
            wallet: row.get("wallet")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

impl FromRow for Mint {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Mint {
            inscription_id: row.get("inscription_id")?,
            deploy_id: row.get("deploy_id")?,
            source_id: row.get("source_id")?,
            mint_address: row.get("mint_address")?,
            transaction_id: row.get("transaction_id")?,
            block_height: row.get::<_, i64>("block_height")? as u64,
            timestamp: row.get("timestamp")?,
            position: row.get::<_, i64>("position")? as u32,
            wallet: row.get("wallet")?,
            previous_wallet: row.get("previous_wallet")?,
            wallet_update_block: row
                .get::<_, Option<i64>>("wallet_update_block")?
                .map(|v| v as u64),
            wallet_update_timestamp: row.get("wallet_update_timestamp")?,
        })
    }
}

impl FromRow for Bitmap {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Bitmap {
            inscription_id: row.get("inscription_id")?,
            block_height: row.get::<_, i64>("block_height")? as u64,
            bitmap_number: row.get::<_, i64>("bitmap_number")? as u64,
            address: row.get("address")?,
            content: row.get("content")?,
            position: row.get::<_, i64>("position")? as u32,
            previous_address: row.get("previous_address")?,
            address_update_block: row
                .get::<_, Option<i64>>("address_update_block")?
                .map(|v| v as u64),
            address_update_timestamp: row.get("address_update_timestamp")?,
        })
    }
}

impl FromRow for ErrorBlock {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(ErrorBlock {
            block_height: row.get::<_, i64>("block_height")? as u64,
            retry_at: row.get::<_, i64>("retry_at")? as u64,
        })
    }
}

impl FromRow for BitmapPattern {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let pattern_string: String = row.get("pattern_string")?;
        let squares = pattern_string
            .chars()
            .filter_map(|c| c.to_digit(10).map(|d| d as u8))
            .collect();
        Ok(BitmapPattern {
            bitmap_number: row.get::<_, i64>("bitmap_number")? as u64,
            pattern_string,
            squares,
        })
    }
}

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Opens (and creates if absent) the SQLite database at `db_path`,
    /// applying the pragmas named in spec 4.2/6 and the embedded schema.
    pub fn open(db_path: &str) -> Result<Store, IndexerError> {
        let conn = if db_path == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(db_path)
        }
        .map_err(IndexerError::from)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;
             PRAGMA cache_size = -32768;",
        )
        .map_err(IndexerError::from)?;
        conn.execute_batch(SCHEMA).map_err(IndexerError::from)?;

        Ok(Store {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Drops every table this store owns and reapplies the embedded schema,
    /// leaving a database indistinguishable from a freshly-opened one. Used
    /// by the `database reset` CLI command; callers are responsible for
    /// re-seeding `IndexerState` (or letting the driver fall back to
    /// `START_BLOCK`) afterwards.
    pub async fn reset(&self) -> Result<(), IndexerError> {
        self.with_conn(|conn| {
            conn.execute_batch(
                "DROP TABLE IF EXISTS deploys;
                 DROP TABLE IF EXISTS mints;
                 DROP TABLE IF EXISTS bitmaps;
                 DROP TABLE IF EXISTS error_blocks;
                 DROP TABLE IF EXISTS bitmap_patterns;
                 DROP TABLE IF EXISTS address_history;
                 DROP TABLE IF EXISTS indexer_state;",
            )?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, IndexerError>
    where
        F: FnOnce(&Connection) -> Result<T, IndexerError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| IndexerError::Internal("store mutex poisoned".into()))?;
            f(&guard)
        })
        .await
        .map_err(|e| IndexerError::Internal(format!("store task panicked: {e}")))?
    }

    // -- deploys ---------------------------------------------------------

    pub async fn get_deploy(&self, id: &str) -> Result<Option<Deploy>, IndexerError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.query_row("SELECT * FROM deploys WHERE id = ?1", params![id], |row| {
                Deploy::from_row(row)
            })
            .optional()
            .map_err(IndexerError::from)
        })
        .await
    }

    /// Idempotent: a second insert for the same id is a no-op (spec 4.2's
    /// "ignore-on-conflict" upsert contract). Returns whether a row was
    /// actually created.
    pub async fn insert_deploy_if_absent(&self, deploy: Deploy) -> Result<bool, IndexerError> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "INSERT INTO deploys
                    (id, p, op, name, max, price, deployer_address, block_height, timestamp,
                     source_id, position, mint_count, wallet, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                 ON CONFLICT(id) DO NOTHING",
                params![
                    deploy.id,
                    deploy.p,
                    deploy.op,
                    deploy.name,
                    deploy.max,
                    deploy.price.to_string(),
                    deploy.deployer_address,
                    deploy.block_height as i64,
                    deploy.timestamp,
                    deploy.source_id,
                    deploy.position as i64,
                    deploy.mint_count,
                    deploy.wallet,
                    deploy.updated_at,
                ],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    /// Atomically checks `mint_count < max` and increments in the same
    /// statement, so concurrent bulk-queue workers minting against the same
    /// deploy never oversell its supply (spec 8's quantified invariant).
    /// Returns the post-increment mint count when the mint was admitted.
    pub async fn try_reserve_mint_slot(&self, deploy_id: &str) -> Result<Option<i64>, IndexerError> {
        let deploy_id = deploy_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "UPDATE deploys SET mint_count = mint_count + 1
                 WHERE id = ?1 AND mint_count < max
                 RETURNING mint_count",
                params![deploy_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .map_err(IndexerError::from)
        })
        .await
    }

    pub async fn update_deploy_wallet(
        &self,
        id: &str,
        wallet: &str,
        updated_at: i64,
    ) -> Result<(), IndexerError> {
        let id = id.to_string();
        let wallet = wallet.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE deploys SET wallet = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, wallet, updated_at],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn list_deploys(&self, limit: usize, offset: usize) -> Result<Vec<Deploy>, IndexerError> {
        let limit = limit.min(MAX_PAGE_SIZE) as i64;
        let offset = offset as i64;
        self.with_conn(move |conn| {
            let mut stmt =
                conn.prepare("SELECT * FROM deploys ORDER BY block_height, position LIMIT ?1 OFFSET ?2")?;
            let rows = stmt.query_map(params![limit, offset], |row| Deploy::from_row(row))?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(IndexerError::from)
        })
        .await
    }

    // -- mints -------------------------------------------------------------

    pub async fn get_mint(&self, inscription_id: &str) -> Result<Option<Mint>, IndexerError> {
        let inscription_id = inscription_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT * FROM mints WHERE inscription_id = ?1",
                params![inscription_id],
                |row| Mint::from_row(row),
            )
            .optional()
            .map_err(IndexerError::from)
        })
        .await
    }

    pub async fn insert_mint_if_absent(&self, mint: Mint) -> Result<bool, IndexerError> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "INSERT INTO mints
                    (inscription_id, deploy_id, source_id, mint_address, transaction_id, block_height,
                     timestamp, position, wallet, previous_wallet, wallet_update_block, wallet_update_timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(inscription_id) DO NOTHING",
                params![
                    mint.inscription_id,
                    mint.deploy_id,
                    mint.source_id,
                    mint.mint_address,
                    mint.transaction_id,
                    mint.block_height as i64,
                    mint.timestamp,
                    mint.position as i64,
                    mint.wallet,
                    mint.previous_wallet,
                    mint.wallet_update_block.map(|v| v as i64),
                    mint.wallet_update_timestamp,
                ],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    /// Ownership transfer: current wallet becomes previous, new wallet takes
    /// its place (spec 3's ownership semantics / spec 8's final-equals-last
    /// invariant).
    pub async fn transfer_mint(
        &self,
        inscription_id: &str,
        new_wallet: &str,
        block_height: u64,
        timestamp: i64,
    ) -> Result<(), IndexerError> {
        let inscription_id = inscription_id.to_string();
        let new_wallet = new_wallet.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE mints SET
                    previous_wallet = wallet,
                    wallet = ?2,
                    wallet_update_block = ?3,
                    wallet_update_timestamp = ?4
                 WHERE inscription_id = ?1",
                params![inscription_id, new_wallet, block_height as i64, timestamp],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn list_mints(&self, limit: usize, offset: usize) -> Result<Vec<Mint>, IndexerError> {
        let limit = limit.min(MAX_PAGE_SIZE) as i64;
        let offset = offset as i64;
        self.with_conn(move |conn| {
            let mut stmt =
                conn.prepare("SELECT * FROM mints ORDER BY block_height, position LIMIT ?1 OFFSET ?2")?;
            let rows = stmt.query_map(params![limit, offset], |row| Mint::from_row(row))?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(IndexerError::from)
        })
        .await
    }

    // -- bitmaps -------------------------------------------------------------

    pub async fn get_bitmap_by_number(&self, number: u64) -> Result<Option<Bitmap>, IndexerError> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT * FROM bitmaps WHERE bitmap_number = ?1",
                params![number as i64],
                |row| Bitmap::from_row(row),
            )
            .optional()
            .map_err(IndexerError::from)
        })
        .await
    }

    pub async fn get_bitmap(&self, inscription_id: &str) -> Result<Option<Bitmap>, IndexerError> {
        let inscription_id = inscription_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT * FROM bitmaps WHERE inscription_id = ?1",
                params![inscription_id],
                |row| Bitmap::from_row(row),
            )
            .optional()
            .map_err(IndexerError::from)
        })
        .await
    }

    /// Idempotent insert guarded by the `bitmap_number` UNIQUE constraint:
    /// first-seen wins, a duplicate claim never creates a second row (spec
    /// 3/8).
    pub async fn insert_bitmap_if_absent(&self, bitmap: Bitmap) -> Result<bool, IndexerError> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "INSERT INTO bitmaps
                    (inscription_id, block_height, bitmap_number, address, content, position,
                     previous_address, address_update_block, address_update_timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT DO NOTHING",
                params![
                    bitmap.inscription_id,
                    bitmap.block_height as i64,
                    bitmap.bitmap_number as i64,
                    bitmap.address,
                    bitmap.content,
                    bitmap.position as i64,
                    bitmap.previous_address,
                    bitmap.address_update_block.map(|v| v as i64),
                    bitmap.address_update_timestamp,
                ],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    pub async fn transfer_bitmap(
        &self,
        inscription_id: &str,
        new_address: &str,
        block_height: u64,
        timestamp: i64,
    ) -> Result<(), IndexerError> {
        let inscription_id = inscription_id.to_string();
        let new_address = new_address.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE bitmaps SET
                    previous_address = address,
                    address = ?2,
                    address_update_block = ?3,
                    address_update_timestamp = ?4
                 WHERE inscription_id = ?1",
                params![inscription_id, new_address, block_height as i64, timestamp],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn list_bitmaps(&self, limit: usize, offset: usize) -> Result<Vec<Bitmap>, IndexerError> {
        let limit = limit.min(MAX_PAGE_SIZE) as i64;
        let offset = offset as i64;
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare("SELECT * FROM bitmaps ORDER BY bitmap_number LIMIT ?1 OFFSET ?2")?;
            let rows = stmt.query_map(params![limit, offset], |row| Bitmap::from_row(row))?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(IndexerError::from)
        })
        .await
    }

    // -- error blocks ---------------------------------------------------

    pub async fn record_error_block(&self, height: u64, retry_at: u64) -> Result<(), IndexerError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO error_blocks (block_height, retry_at) VALUES (?1, ?2)
                 ON CONFLICT(block_height) DO UPDATE SET retry_at = excluded.retry_at",
                params![height as i64, retry_at as i64],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn clear_error_block(&self, height: u64) -> Result<(), IndexerError> {
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM error_blocks WHERE block_height = ?1", params![height as i64])?;
            Ok(())
        })
        .await
    }

    pub async fn due_error_blocks(&self, cursor: u64) -> Result<Vec<ErrorBlock>, IndexerError> {
        self.with_conn(move |conn| {
            let mut stmt =
                conn.prepare("SELECT * FROM error_blocks WHERE retry_at <= ?1 ORDER BY block_height")?;
            let rows = stmt.query_map(params![cursor as i64], |row| ErrorBlock::from_row(row))?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(IndexerError::from)
        })
        .await
    }

    // -- patterns ---------------------------------------------------------

    pub async fn upsert_bitmap_pattern(&self, pattern: BitmapPattern) -> Result<(), IndexerError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO bitmap_patterns (bitmap_number, pattern_string) VALUES (?1, ?2)
                 ON CONFLICT(bitmap_number) DO UPDATE SET pattern_string = excluded.pattern_string",
                params![pattern.bitmap_number as i64, pattern.pattern_string],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_bitmap_pattern(&self, bitmap_number: u64) -> Result<Option<BitmapPattern>, IndexerError> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT * FROM bitmap_patterns WHERE bitmap_number = ?1",
                params![bitmap_number as i64],
                |row| BitmapPattern::from_row(row),
            )
            .optional()
            .map_err(IndexerError::from)
        })
        .await
    }

    // -- address history ----------------------------------------------------

    pub async fn append_address_history(&self, entry: AddressHistoryEntry) -> Result<(), IndexerError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO address_history (inscription_id, entity_kind, block_height, address, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    entry.inscription_id,
                    entry.entity_kind.as_str(),
                    entry.block_height as i64,
                    entry.address,
                    entry.recorded_at,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn address_history(
        &self,
        inscription_id: &str,
        entity_kind: EntityKind,
    ) -> Result<Vec<AddressHistoryEntry>, IndexerError> {
        let inscription_id = inscription_id.to_string();
        let kind = entity_kind.as_str();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT inscription_id, entity_kind, block_height, address, recorded_at
                 FROM address_history WHERE inscription_id = ?1 AND entity_kind = ?2
                 ORDER BY block_height ASC, rowid ASC",
            )?;
            let rows = stmt.query_map(params![inscription_id, kind], |row| {
                let kind_str: String = row.get("entity_kind")?;
                let entity_kind = match kind_str.as_str() {
                    "deploy" => EntityKind::Deploy,
                    "mint" => EntityKind::Mint,
                    _ => EntityKind::Bitmap,
                };
                Ok(AddressHistoryEntry {
                    inscription_id: row.get("inscription_id")?,
                    entity_kind,
                    block_height: row.get::<_, i64>("block_height")? as u64,
                    address: row.get("address")?,
                    recorded_at: row.get("recorded_at")?,
                })
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(IndexerError::from)
        })
        .await
    }

    // -- driver state -------------------------------------------------------

    pub async fn load_state(&self) -> Result<Option<IndexerState>, IndexerError> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT current_height, cached_tip FROM indexer_state WHERE id = 0",
                [],
                |row| {
                    Ok(IndexerState {
                        current_height: row.get::<_, i64>(0)? as u64,
                        cached_tip: row.get::<_, i64>(1)? as u64,
                    })
                },
            )
            .optional()
            .map_err(IndexerError::from)
        })
        .await
    }

    pub async fn save_state(&self, state: IndexerState) -> Result<(), IndexerError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO indexer_state (id, current_height, cached_tip) VALUES (0, ?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET current_height = excluded.current_height, cached_tip = excluded.cached_tip",
                params![state.current_height as i64, state.cached_tip as i64],
            )?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_deploy(id: &str, max: i64) -> Deploy {
        Deploy {
            id: id.to_string(),
            p: "brc-420".to_string(),
            op: "deploy".to_string(),
            name: "Test".to_string(),
            max,
            price: dec!(0.0001),
            deployer_address: "bc1deployer".to_string(),
            block_height: 792_435,
            timestamp: 1_690_000_000_000,
            source_id: id.to_string(),
            position: 1,
            mint_count: 0,
            wallet: None,
            updated_at: None,
        }
    }

    #[tokio::test]
    async fn insert_deploy_is_idempotent() {
        let store = Store::open(":memory:").unwrap();
        let deploy = sample_deploy("abc123i0", 3);
        assert!(store.insert_deploy_if_absent(deploy.clone()).await.unwrap());
        assert!(!store.insert_deploy_if_absent(deploy).await.unwrap());
        assert_eq!(store.list_deploys(10, 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn try_reserve_mint_slot_respects_supply_cap() {
        let store = Store::open(":memory:").unwrap();
        store.insert_deploy_if_absent(sample_deploy("abc123i0", 3)).await.unwrap();

        assert_eq!(store.try_reserve_mint_slot("abc123i0").await.unwrap(), Some(1));
        assert_eq!(store.try_reserve_mint_slot("abc123i0").await.unwrap(), Some(2));
        assert_eq!(store.try_reserve_mint_slot("abc123i0").await.unwrap(), Some(3));
        assert_eq!(store.try_reserve_mint_slot("abc123i0").await.unwrap(), None);
    }

    #[tokio::test]
    async fn bitmap_number_is_unique() {
        let store = Store::open(":memory:").unwrap();
        let bitmap = Bitmap {
            inscription_id: "bm1i0".to_string(),
            block_height: 840_000,
            bitmap_number: 840_000,
            address: "bc1a".to_string(),
            content: "840000.bitmap".to_string(),
            position: 1,
            previous_address: None,
            address_update_block: None,
            address_update_timestamp: None,
        };
        assert!(store.insert_bitmap_if_absent(bitmap.clone()).await.unwrap());

        let duplicate = Bitmap {
            inscription_id: "bm2i0".to_string(),
            block_height: 840_001,
            ..bitmap
        };
        assert!(!store.insert_bitmap_if_absent(duplicate).await.unwrap());
        assert_eq!(store.list_bitmaps(10, 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn transfer_mint_preserves_previous_wallet() {
        let store = Store::open(":memory:").unwrap();
        store.insert_deploy_if_absent(sample_deploy("abc123i0", 3)).await.unwrap();
        let mint = Mint {
            inscription_id: "mint1i0".to_string(),
            deploy_id: "abc123i0".to_string(),
            source_id: "abc123i0".to_string(),
            mint_address: "bc1first".to_string(),
            transaction_id: "tx1".to_string(),
            block_height: 792_436,
            timestamp: 1_690_000_001_000,
            position: 1,
            wallet: "bc1first".to_string(),
            previous_wallet: None,
            wallet_update_block: None,
            wallet_update_timestamp: None,
        };
        store.insert_mint_if_absent(mint).await.unwrap();
        store
            .transfer_mint("mint1i0", "bc1second", 792_500, 1_690_100_000_000)
            .await
            .unwrap();
        let updated = store.get_mint("mint1i0").await.unwrap().unwrap();
        assert_eq!(updated.wallet, "bc1second");
        assert_eq!(updated.previous_wallet.as_deref(), Some("bc1first"));
    }
}
