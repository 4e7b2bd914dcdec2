//! Two-tier cache (spec 4.3). Local wins on read; both tiers are written on
//! populate. The remote tier is optional — when no `REDIS_URL` is configured
//! the cache degrades to local-only, which is still correct, just slower on
//! a cold local cache.

use std::sync::Arc;
use std::time::Duration;

use config::CacheConfig;
use dashmap::{DashMap, DashSet};
use fxhash::FxBuildHasher;

use crate::logging::Context;
use crate::try_warn;
use crate::models::Deploy;

/// Mirrors [`Deploy`] but keeps price as the literal decimal text, so the
/// cache layer never depends on `rust_decimal`'s serde support.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct CachedDeploy {
    id: String,
    p: String,
    op: String,
    name: String,
    max: i64,
    price: String,
    deployer_address: String,
    block_height: u64,
    timestamp: i64,
    source_id: String,
    position: u32,
    mint_count: i64,
    wallet: Option<String>,
    updated_at: Option<i64>,
}

impl From<&Deploy> for CachedDeploy {
    fn from(d: &Deploy) -> Self {
        CachedDeploy {
            id: d.id.clone(),
            p: d.p.clone(),
            op: d.op.clone(),
            name: d.name.clone(),
            max: d.max,
            price: d.price.to_string(),
            deployer_address: d.deployer_address.clone(),
            block_height: d.block_height,
            timestamp: d.timestamp,
            source_id: d.source_id.clone(),
            position: d.position,
            mint_count: d.mint_count,
            wallet: d.wallet.clone(),
            updated_at: d.updated_at,
        }
    }
}

impl CachedDeploy {
    fn into_deploy(self) -> Deploy {
        Deploy {
            id: self.id,
            p: self.p,
            op: self.op,
            name: self.name,
            max: self.max,
            price: self.price.parse().unwrap_or_default(),
            deployer_address: self.deployer_address,
            block_height: self.block_height,
            timestamp: self.timestamp,
            source_id: self.source_id,
            position: self.position,
            mint_count: self.mint_count,
            wallet: self.wallet,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
enum CacheValue {
    Deploy(CachedDeploy),
    MintCount(i64),
    MintAddress(String),
    MimeType(String),
}

fn deploy_key(id: &str) -> String {
    format!("deploy:{id}")
}
fn mint_count_key(deploy_id: &str) -> String {
    format!("mintCount:{deploy_id}")
}
fn mint_address_key(inscription_id: &str) -> String {
    format!("mintAddress:{inscription_id}")
}
fn mime_type_key(inscription_id: &str) -> String {
    format!("mimeType:{inscription_id}")
}

struct LocalCache {
    values: DashMap<String, CacheValue, FxBuildHasher>,
}

impl LocalCache {
    fn new() -> LocalCache {
        LocalCache {
            values: DashMap::with_hasher(FxBuildHasher::default()),
        }
    }

    fn get(&self, key: &str) -> Option<CacheValue> {
        self.values.get(key).map(|v| v.clone())
    }

    fn set(&self, key: String, value: CacheValue) {
        self.values.insert(key, value);
    }

    fn evict(&self, key: &str) {
        self.values.remove(key);
    }
}

struct RemoteCache {
    conn: redis::aio::ConnectionManager,
    ttl: Duration,
}

impl RemoteCache {
    async fn get(&self, key: &str) -> Option<CacheValue> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .ok()
            .flatten();
        raw.and_then(|s| serde_json::from_str(&s).ok())
    }

    async fn set(&self, key: &str, value: &CacheValue) {
        if let Ok(encoded) = serde_json::to_string(value) {
            let mut conn = self.conn.clone();
            let _: Result<(), redis::RedisError> = redis::cmd("SETEX")
                .arg(key)
                .arg(self.ttl.as_secs())
                .arg(encoded)
                .query_async(&mut conn)
                .await;
        }
    }
}

/// Read-through, write-both two-tier cache plus the `maxedOutDeploys`
/// early-exit set (spec 4.3). Cloning shares the underlying tiers — every
/// clone sees the same state, matching the single logical `Indexer` value
/// the driver hangs shared state off (spec 9).
#[derive(Clone)]
pub struct TwoTierCache {
    local: Arc<LocalCache>,
    remote: Option<Arc<RemoteCache>>,
    maxed_out_deploys: Arc<DashSet<String, FxBuildHasher>>,
}

impl TwoTierCache {
    pub async fn new(config: &CacheConfig) -> TwoTierCache {
        let remote = match &config.redis_url {
            Some(url) => match redis::Client::open(url.as_str()) {
                Ok(client) => redis::aio::ConnectionManager::new(client)
                    .await
                    .ok()
                    .map(|manager| {
                        Arc::new(RemoteCache {
                            conn: manager,
                            ttl: config.remote_ttl,
                        })
                    }),
                Err(_) => None,
            },
            None => None,
        };
        TwoTierCache {
            local: Arc::new(LocalCache::new()),
            remote,
            maxed_out_deploys: Arc::new(DashSet::with_hasher(FxBuildHasher::default())),
        }
    }

    pub fn local_only() -> TwoTierCache {
        TwoTierCache {
            local: Arc::new(LocalCache::new()),
            remote: None,
            maxed_out_deploys: Arc::new(DashSet::with_hasher(FxBuildHasher::default())),
        }
    }

    async fn get(&self, key: &str) -> Option<CacheValue> {
        if let Some(local) = self.local.get(key) {
            return Some(local);
        }
        if let Some(remote) = &self.remote {
            if let Some(value) = remote.get(key).await {
                self.local.set(key.to_string(), value.clone());
                return Some(value);
            }
        }
        None
    }

    /// Best-effort: a write failure on either tier never surfaces as an
    /// error, only as a future cache miss (spec 4.3).
    async fn set(&self, key: String, value: CacheValue, ctx: &Context) {
        self.local.set(key.clone(), value.clone());
        if let Some(remote) = &self.remote {
            remote.set(&key, &value).await;
        }
        let _ = ctx;
    }

    pub async fn get_deploy(&self, id: &str) -> Option<Deploy> {
        match self.get(&deploy_key(id)).await {
            Some(CacheValue::Deploy(d)) => Some(d.into_deploy()),
            _ => None,
        }
    }

    pub async fn put_deploy(&self, deploy: &Deploy, ctx: &Context) {
        self.set(deploy_key(&deploy.id), CacheValue::Deploy(CachedDeploy::from(deploy)), ctx)
            .await;
    }

    pub async fn get_mint_count(&self, deploy_id: &str) -> Option<i64> {
        match self.get(&mint_count_key(deploy_id)).await {
            Some(CacheValue::MintCount(n)) => Some(n),
            _ => None,
        }
    }

    pub async fn put_mint_count(&self, deploy_id: &str, count: i64, ctx: &Context) {
        self.set(mint_count_key(deploy_id), CacheValue::MintCount(count), ctx).await;
    }

    pub async fn get_mint_address(&self, inscription_id: &str) -> Option<String> {
        match self.get(&mint_address_key(inscription_id)).await {
            Some(CacheValue::MintAddress(a)) => Some(a),
            _ => None,
        }
    }

    pub async fn put_mint_address(&self, inscription_id: &str, address: &str, ctx: &Context) {
        self.set(
            mint_address_key(inscription_id),
            CacheValue::MintAddress(address.to_string()),
            ctx,
        )
        .await;
    }

    pub async fn get_mime_type(&self, inscription_id: &str) -> Option<String> {
        match self.get(&mime_type_key(inscription_id)).await {
            Some(CacheValue::MimeType(m)) => Some(m),
            _ => None,
        }
    }

    pub async fn put_mime_type(&self, inscription_id: &str, mime: &str, ctx: &Context) {
        self.set(
            mime_type_key(inscription_id),
            CacheValue::MimeType(mime.to_string()),
            ctx,
        )
        .await;
    }

    pub fn is_maxed_out(&self, deploy_id: &str) -> bool {
        self.maxed_out_deploys.contains(deploy_id)
    }

    /// Marks a deploy as having hit its supply cap and evicts its
    /// `deploy:<id>` entry from the local tier to reclaim space; consumers
    /// re-fetch from the store if they need the full row again (spec 4.3).
    pub fn mark_maxed_out(&self, deploy_id: &str, ctx: &Context) {
        self.maxed_out_deploys.insert(deploy_id.to_string());
        self.local.evict(&deploy_key(deploy_id));
        try_warn!(ctx, "deploy {deploy_id} reached its supply cap, marking maxed out");
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample() -> Deploy {
        Deploy {
            id: "abc123i0".to_string(),
            p: "brc-420".to_string(),
            op: "deploy".to_string(),
            name: "Test".to_string(),
            max: 10,
            price: dec!(0.0005),
            deployer_address: "bc1deployer".to_string(),
            block_height: 800_000,
            timestamp: 1,
            source_id: "abc123i0".to_string(),
            position: 0,
            mint_count: 0,
            wallet: None,
            updated_at: None,
        }
    }

    #[tokio::test]
    async fn local_only_round_trips_deploy() {
        let cache = TwoTierCache::local_only();
        let ctx = Context::empty();
        let deploy = sample();
        cache.put_deploy(&deploy, &ctx).await;
        let fetched = cache.get_deploy(&deploy.id).await.unwrap();
        assert_eq!(fetched.price, deploy.price);
        assert_eq!(fetched.max, deploy.max);
    }

    #[tokio::test]
    async fn maxed_out_evicts_local_deploy_entry() {
        let cache = TwoTierCache::local_only();
        let ctx = Context::empty();
        let deploy = sample();
        cache.put_deploy(&deploy, &ctx).await;
        assert!(cache.get_deploy(&deploy.id).await.is_some());

        cache.mark_maxed_out(&deploy.id, &ctx);
        assert!(cache.is_maxed_out(&deploy.id));
        assert!(cache.get_deploy(&deploy.id).await.is_none());
    }

    #[tokio::test]
    async fn missing_key_is_a_clean_miss() {
        let cache = TwoTierCache::local_only();
        assert!(cache.get_mint_count("nonexistent").await.is_none());
    }
}
