//! shield ingestion, balance derivation, checkpoints, root rejection

mod common;

use std::sync::Arc;

use common::*;

use caligo_engine::events::SyncedEventData;
use caligo_engine::merkle::TreeReader;
use caligo_engine::{Chain, Engine, EngineError, MemoryDatabase};

fn engine() -> Engine {
    Engine::new(
        Arc::new(MemoryDatabase::new()),
        Arc::new(MockProver),
        Arc::new(MockArtifacts),
        None,
    )
}

#[tokio::test]
async fn shield_then_balance() {
    let engine = engine();
    engine
        .load_network(chain(), MockContract::new(), 0)
        .await
        .unwrap();
    let wallet = engine
        .create_wallet(MNEMONIC_1, 0, &ENCRYPTION_KEY)
        .await
        .unwrap();

    let value = u128::from_str_radix("9138822709a9fc231cba6", 16).unwrap();
    let shields = vec![make_shield(&wallet, &erc20(), value)];
    engine
        .ingest_events(
            chain(),
            SyncedEventData {
                commitments: vec![shield_event(0, 0, 1, 10, &shields)],
                ..Default::default()
            },
        )
        .await
        .unwrap();
    engine.scan_history(chain()).await.unwrap();

    assert_eq!(wallet.balance(chain(), &erc20()).await.unwrap(), value);

    // the commitment is provable against the mirrored tree
    let forest = engine.forest(chain()).await.unwrap();
    let proof = forest.read().await.proof(0, 0).unwrap();
    assert!(proof.verify().unwrap());
}

#[tokio::test]
async fn rescan_is_idempotent() {
    let engine = engine();
    engine
        .load_network(chain(), MockContract::new(), 0)
        .await
        .unwrap();
    let wallet = engine
        .create_wallet(MNEMONIC_1, 0, &ENCRYPTION_KEY)
        .await
        .unwrap();

    let shields = vec![make_shield(&wallet, &erc20(), 5000)];
    engine
        .ingest_events(
            chain(),
            SyncedEventData {
                commitments: vec![shield_event(0, 0, 1, 10, &shields)],
                ..Default::default()
            },
        )
        .await
        .unwrap();

    engine.scan_history(chain()).await.unwrap();
    let first = wallet.txos(chain()).await.unwrap();
    engine.scan_history(chain()).await.unwrap();
    let second = wallet.txos(chain()).await.unwrap();
    assert_eq!(first, second);

    // replaying the same event batch changes nothing either
    engine
        .ingest_events(
            chain(),
            SyncedEventData {
                commitments: vec![shield_event(0, 0, 1, 10, &shields)],
                ..Default::default()
            },
        )
        .await
        .unwrap();
    engine.scan_history(chain()).await.unwrap();
    assert_eq!(wallet.txos(chain()).await.unwrap(), first);
}

#[tokio::test]
async fn full_rescan_rebuilds_the_same_state() {
    let engine = engine();
    engine
        .load_network(chain(), MockContract::new(), 0)
        .await
        .unwrap();
    let wallet = engine
        .create_wallet(MNEMONIC_1, 0, &ENCRYPTION_KEY)
        .await
        .unwrap();

    let shields = vec![
        make_shield(&wallet, &erc20(), 100),
        make_shield(&wallet, &erc20(), 200),
    ];
    engine
        .ingest_events(
            chain(),
            SyncedEventData {
                commitments: vec![shield_event(0, 0, 1, 10, &shields)],
                ..Default::default()
            },
        )
        .await
        .unwrap();
    engine.scan_history(chain()).await.unwrap();
    let before = wallet.txos(chain()).await.unwrap();

    let forest = engine.forest(chain()).await.unwrap();
    let forest = forest.read().await;
    wallet
        .full_rescan_balances(chain(), &*forest)
        .await
        .unwrap();
    assert_eq!(wallet.txos(chain()).await.unwrap(), before);
    assert_eq!(wallet.balance(chain(), &erc20()).await.unwrap(), 300);
}

#[tokio::test]
async fn last_synced_block_round_trip() {
    let engine = engine();
    let chain = Chain::evm(10010);

    assert_eq!(engine.get_last_synced_block(chain).await.unwrap(), None);
    engine.set_last_synced_block(100, chain).await.unwrap();
    assert_eq!(engine.get_last_synced_block(chain).await.unwrap(), Some(100));
    engine.set_last_synced_block(100000, chain).await.unwrap();
    assert_eq!(
        engine.get_last_synced_block(chain).await.unwrap(),
        Some(100000)
    );
}

#[tokio::test]
async fn rejected_root_rolls_back_ingestion() {
    let engine = engine();
    engine
        .load_network(chain(), MockContract::rejecting(), 0)
        .await
        .unwrap();
    let wallet = engine
        .create_wallet(MNEMONIC_1, 0, &ENCRYPTION_KEY)
        .await
        .unwrap();

    let shields = vec![make_shield(&wallet, &erc20(), 1000)];
    let result = engine
        .ingest_events(
            chain(),
            SyncedEventData {
                commitments: vec![shield_event(0, 0, 1, 10, &shields)],
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(
        result,
        Err(EngineError::RootValidationFailed { tree: 0 })
    ));

    // nothing from the rejected batch is present
    let forest = engine.forest(chain()).await.unwrap();
    let forest = forest.read().await;
    assert!(matches!(
        forest.proof(0, 0),
        Err(EngineError::LeafNotPresent { .. })
    ));

    engine.scan_history(chain()).await.unwrap();
    assert_eq!(wallet.balance(chain(), &erc20()).await.unwrap(), 0);
}
