//! Integration tests against a real temp-file SQLite database, as opposed to
//! the `:memory:` connections the unit tests in `src/store/mod.rs` use.
//! These exercise what actually differs on disk: pragmas surviving a reopen
//! and rows surviving a process-level drop/reopen cycle.

use ord420::models::{AddressHistoryEntry, Deploy, EntityKind, IndexerState, Mint};
use ord420::store::Store;
use rust_decimal::Decimal;
use std::str::FromStr;

fn tmp_db_path(name: &str) -> String {
    let mut path = tempfile::tempdir().unwrap().into_path();
    path.push(format!("{name}.sqlite3"));
    path.to_string_lossy().into_owned()
}

fn sample_deploy(id: &str) -> Deploy {
    Deploy {
        id: id.to_string(),
        p: "brc-420".to_string(),
        op: "deploy".to_string(),
        name: "Test".to_string(),
        max: 10,
        price: Decimal::from_str("0.0005").unwrap(),
        deployer_address: "bc1deployer".to_string(),
        block_height: 800_000,
        timestamp: 1,
        source_id: id.to_string(),
        position: 1,
        mint_count: 0,
        wallet: None,
        updated_at: None,
    }
}

#[tokio::test]
async fn rows_survive_a_reopen_of_the_same_file() {
    let db_path = tmp_db_path("rows_survive_reopen");

    {
        let store = Store::open(&db_path).unwrap();
        store.insert_deploy_if_absent(sample_deploy("abc123i0")).await.unwrap();
        store
            .save_state(IndexerState {
                current_height: 800_001,
                cached_tip: 800_050,
            })
            .await
            .unwrap();
    }

    let reopened = Store::open(&db_path).unwrap();
    let deploy = reopened.get_deploy("abc123i0").await.unwrap();
    assert!(deploy.is_some());
    assert_eq!(deploy.unwrap().max, 10);

    let state = reopened.load_state().await.unwrap().unwrap();
    assert_eq!(state.current_height, 800_001);
    assert_eq!(state.cached_tip, 800_050);
}

#[tokio::test]
async fn mint_count_reservation_is_durable_across_a_reopen() {
    let db_path = tmp_db_path("mint_count_durable");

    let store = Store::open(&db_path).unwrap();
    let mut deploy = sample_deploy("deployi0");
    deploy.max = 1;
    store.insert_deploy_if_absent(deploy).await.unwrap();

    assert!(store.try_reserve_mint_slot("deployi0").await.unwrap().is_some());
    assert!(store.try_reserve_mint_slot("deployi0").await.unwrap().is_none());
    drop(store);

    let reopened = Store::open(&db_path).unwrap();
    let deploy = reopened.get_deploy("deployi0").await.unwrap().unwrap();
    assert_eq!(deploy.mint_count, 1);
}

#[tokio::test]
async fn reset_drops_all_rows_but_leaves_the_database_usable() {
    let db_path = tmp_db_path("reset_drops_rows");
    let store = Store::open(&db_path).unwrap();

    store.insert_deploy_if_absent(sample_deploy("abc123i0")).await.unwrap();
    store
        .insert_mint_if_absent(Mint {
            inscription_id: "mint1i0".to_string(),
            deploy_id: "abc123i0".to_string(),
            source_id: "abc123i0".to_string(),
            mint_address: "bc1minter".to_string(),
            transaction_id: "tx1".to_string(),
            block_height: 800_010,
            timestamp: 2,
            position: 1,
            wallet: "bc1minter".to_string(),
            previous_wallet: None,
            wallet_update_block: None,
            wallet_update_timestamp: None,
        })
        .await
        .unwrap();
    store
        .append_address_history(AddressHistoryEntry {
            inscription_id: "abc123i0".to_string(),
            entity_kind: EntityKind::Deploy,
            block_height: 800_000,
            address: "bc1deployer".to_string(),
            recorded_at: 1,
        })
        .await
        .unwrap();

    store.reset().await.unwrap();

    assert!(store.get_deploy("abc123i0").await.unwrap().is_none());
    assert!(store.get_mint("mint1i0").await.unwrap().is_none());
    assert!(store.address_history("abc123i0", EntityKind::Deploy).await.unwrap().is_empty());

    // the reset database is still usable for fresh writes
    store.insert_deploy_if_absent(sample_deploy("fresh1i0")).await.unwrap();
    assert!(store.get_deploy("fresh1i0").await.unwrap().is_some());
}
