use chainfold::config::Config;
use chainfold::datasource::MockChain;
use chainfold::db::init_db;
use chainfold::domain::{
    Address, Asset, AssetType, AuctionHash, AuctionPayload, AuctionStatus, BalanceId,
    BalancePayload, BaseAuction, Bid, Decimal, LogEvent, LogStatus, Mark, OrderHash, OrderKey,
    PoolPayload, PoolSide, TimeMs,
};
use chainfold::engine::{reduce, BalanceReducer, EntityReducer, EventInverter};
use chainfold::reduce::{ReduceEngine, ServiceError};
use chainfold::{App, Repository};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

type BalanceEvent = LogEvent<BalanceId, BalancePayload>;

fn test_config(db_path: String, engine: ReduceEngine) -> Config {
    Config {
        port: 0,
        database_path: db_path,
        chain_rpc_url: "http://example.invalid".to_string(),
        reduce_engine: engine,
        reduce_batch_size: 2,
        reduce_checkpoint_interval: Duration::from_millis(0),
        max_concurrent_reductions: 4,
        reconcile_interval: Duration::from_secs(60),
        reconcile_confirmations: 12,
        reconcile_skip_blocks: 1000,
        ignored_owners: vec![],
    }
}

async fn setup_app(engine: ReduceEngine) -> (App, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");
    let repo = Arc::new(Repository::new(pool));
    let app = App::new(
        test_config(db_path, engine),
        repo,
        Arc::new(MockChain::new()),
    );
    (app, temp_dir)
}

fn balance_id() -> BalanceId {
    BalanceId::new(Address::new("0xtoken"), Address::new("0xowner"))
}

fn transfer(block: i64, log: i32, status: LogStatus, delta: i64) -> BalanceEvent {
    let value = Decimal::from(delta.unsigned_abs());
    let payload = if delta >= 0 {
        BalancePayload::IncomeTransfer { value }
    } else {
        BalancePayload::OutcomeTransfer { value }
    };
    LogEvent {
        id: format!("log-{}-{}", block, log),
        key: balance_id(),
        status,
        order: OrderKey::new(block, log, 0),
        tx_hash: format!("0xtx{}", block),
        timestamp: TimeMs::new(block * 1000),
        payload,
    }
}

async fn amount(app: &App) -> Decimal {
    app.services
        .balances
        .snapshot(&balance_id())
        .await
        .unwrap()
        .map(|s| s.data.amount)
        .unwrap_or_else(Decimal::zero)
}

/// Balance of 7 at block 1.
async fn seed_seven(app: &App) {
    app.services
        .balances
        .update(vec![transfer(1, 0, LogStatus::Confirmed, 7)])
        .await
        .unwrap();
}

#[tokio::test]
async fn test_confirmed_income_adds_to_balance() {
    let (app, _temp) = setup_app(ReduceEngine::Chain).await;
    seed_seven(&app).await;

    app.services
        .balances
        .update(vec![transfer(2, 0, LogStatus::Confirmed, 10)])
        .await
        .unwrap();

    assert_eq!(amount(&app).await, Decimal::from(17u64));
}

#[tokio::test]
async fn test_reverted_income_restores_balance() {
    for engine in [ReduceEngine::Chain, ReduceEngine::Full] {
        let (app, _temp) = setup_app(engine).await;
        seed_seven(&app).await;
        let income = transfer(2, 0, LogStatus::Confirmed, 10);

        app.services.balances.update(vec![income.clone()]).await.unwrap();
        assert_eq!(amount(&app).await, Decimal::from(17u64));

        app.services
            .balances
            .update(vec![income.with_status(LogStatus::Reverted)])
            .await
            .unwrap();
        assert_eq!(amount(&app).await, Decimal::from(7u64), "engine {}", engine);
    }
}

#[tokio::test]
async fn test_reverted_event_never_counts() {
    let (app, _temp) = setup_app(ReduceEngine::Chain).await;
    seed_seven(&app).await;
    let reverted = transfer(4, 0, LogStatus::Confirmed, 10);

    app.services
        .balances
        .update(vec![
            transfer(2, 0, LogStatus::Confirmed, 10),
            transfer(3, 0, LogStatus::Confirmed, -1),
            reverted.clone(),
        ])
        .await
        .unwrap();
    app.services
        .balances
        .update(vec![
            reverted.with_status(LogStatus::Reverted),
            transfer(5, 0, LogStatus::Confirmed, -6),
            transfer(6, 0, LogStatus::Confirmed, 4),
        ])
        .await
        .unwrap();

    assert_eq!(amount(&app).await, Decimal::from(14u64));

    let replayed = app
        .services
        .balances
        .full()
        .reduce_key(&balance_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(replayed.data.amount, Decimal::from(14u64));
}

#[tokio::test]
async fn test_full_reduce_matches_incremental_balance() {
    let history = vec![
        transfer(1, 0, LogStatus::Confirmed, 7),
        transfer(2, 0, LogStatus::Pending, 3),
        transfer(2, 1, LogStatus::Confirmed, 5),
        transfer(3, 0, LogStatus::Confirmed, -2),
        transfer(2, 0, LogStatus::Confirmed, 3),
        transfer(2, 1, LogStatus::Reverted, 5),
        transfer(4, 0, LogStatus::Dropped, 100),
        transfer(5, 0, LogStatus::Confirmed, 1),
    ];

    let (incremental, _a) = setup_app(ReduceEngine::Chain).await;
    for event in &history {
        incremental
            .services
            .balances
            .update(vec![event.clone()])
            .await
            .unwrap();
    }
    let online = incremental
        .services
        .balances
        .snapshot(&balance_id())
        .await
        .unwrap()
        .unwrap();

    let (batch, _b) = setup_app(ReduceEngine::Full).await;
    batch.services.balances.update(history).await.unwrap();
    let replayed = batch
        .services
        .balances
        .full()
        .reduce_key(&balance_id())
        .await
        .unwrap()
        .unwrap();

    // 7 + 3 - 2 + 1, with the reverted 5 removed.
    assert_eq!(online.data.amount, Decimal::from(9u64));
    assert_eq!(online.data.amount, replayed.data.amount);
    assert_eq!(online.mark, replayed.mark);
    assert_eq!(online.mark, Mark(5));
}

#[tokio::test]
async fn test_full_reduce_matches_incremental_pool() {
    let hash = OrderHash::new("0xpool");
    let event = |block: i64, status: LogStatus, payload: PoolPayload| LogEvent {
        id: format!("pool-{}", block),
        key: hash.clone(),
        status,
        order: OrderKey::new(block, 0, 0),
        tx_hash: format!("0xtx{}", block),
        timestamp: TimeMs::new(block * 1000),
        payload,
    };
    let collection = Address::new("0xnft");
    let deposit = event(
        2,
        LogStatus::Confirmed,
        PoolPayload::NftIn {
            collection: collection.clone(),
            token_ids: vec!["3".to_string(), "4".to_string()],
            deposit: true,
        },
    );
    let history = vec![
        event(
            1,
            LogStatus::Confirmed,
            PoolPayload::OnChainAmmOrder {
                maker: Address::new("0xmaker"),
                collection,
                side: PoolSide::Sell,
                token_ids: vec!["1".to_string()],
                price: Decimal::from(10u64),
                fee: Decimal::zero(),
                delta: Decimal::from(1u64),
            },
        ),
        deposit.clone(),
        event(
            3,
            LogStatus::Confirmed,
            PoolPayload::NftOut {
                token_ids: vec!["1".to_string()],
            },
        ),
        deposit.with_status(LogStatus::Reverted),
        event(
            4,
            LogStatus::Confirmed,
            PoolPayload::SpotPriceUpdate {
                new_spot_price: Decimal::from(12u64),
            },
        ),
    ];

    let (incremental, _a) = setup_app(ReduceEngine::Chain).await;
    for e in &history {
        incremental.services.pools.update(vec![e.clone()]).await.unwrap();
    }
    let online = incremental.services.pools.snapshot(&hash).await.unwrap().unwrap();

    let (batch, _b) = setup_app(ReduceEngine::Full).await;
    batch.services.pools.update(history).await.unwrap();
    let replayed = batch.services.pools.snapshot(&hash).await.unwrap().unwrap();

    assert_eq!(online.data, replayed.data);
    assert_eq!(online.mark, replayed.mark);
    assert_eq!(online.data.make_value, Decimal::zero());
}

#[tokio::test]
async fn test_full_reduce_matches_incremental_auction() {
    let hash = AuctionHash::new("0xauction");
    let event = |block: i64, status: LogStatus, payload: AuctionPayload| LogEvent {
        id: format!("auction-{}", block),
        key: hash.clone(),
        status,
        order: OrderKey::new(block, 0, 0),
        tx_hash: format!("0xtx{}", block),
        timestamp: TimeMs::new(block * 1000),
        payload,
    };
    let bid = |buyer: &str, amount: u64, block: i64| AuctionPayload::BidPlaced {
        buyer: Address::new(buyer),
        bid: Bid {
            amount: Decimal::from(amount),
            date: TimeMs::new(block * 1000),
        },
    };
    let started = AuctionPayload::OnChainAuction {
        contract: Address::new("0xhouse"),
        auction_id: 7,
        start_time: Some(TimeMs::new(1000)),
        base: BaseAuction {
            seller: Address::new("0xseller"),
            buyer: None,
            sell: Asset {
                asset_type: AssetType::Erc721 {
                    token: Address::new("0xnft"),
                    token_id: "1".to_string(),
                },
                value: Decimal::from(1u64),
            },
            buy: AssetType::Eth,
            last_bid: None,
            end_time: None,
            minimal_step: Decimal::from(1u64),
            minimal_price: Decimal::from(5u64),
            protocol_fee: Decimal::zero(),
        },
    };
    let first_bid = event(2, LogStatus::Pending, bid("0xalice", 10, 2));
    let outbid = event(3, LogStatus::Confirmed, bid("0xbob", 12, 3));
    let history = vec![
        event(1, LogStatus::Confirmed, started),
        first_bid.clone(),
        first_bid.with_status(LogStatus::Confirmed),
        outbid.clone(),
        outbid.with_status(LogStatus::Reverted),
        event(4, LogStatus::Pending, bid("0xcarol", 15, 4)),
    ];

    let (incremental, _a) = setup_app(ReduceEngine::Chain).await;
    for e in &history {
        incremental
            .services
            .auctions
            .update(vec![e.clone()])
            .await
            .unwrap();
    }
    let online = incremental
        .services
        .auctions
        .snapshot(&hash)
        .await
        .unwrap()
        .unwrap();

    let (batch, _b) = setup_app(ReduceEngine::Full).await;
    batch.services.auctions.update(history).await.unwrap();
    let replayed = batch
        .services
        .auctions
        .full()
        .reduce_key(&hash)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(online.data, replayed.data);
    assert_eq!(online.mark, replayed.mark);
    assert_eq!(online.data.last_event_id, replayed.data.last_event_id);
    assert!(online.data.last_event_id.is_some());
    assert_eq!(online.data.status, AuctionStatus::Active);
    assert_eq!(online.data.buyer, Some(Address::new("0xalice")));
    assert_eq!(online.data.pending.len(), 1);
    assert_eq!(online.data.pending[0].id, "auction-4");
}

#[tokio::test]
async fn test_stale_event_then_revert_leaves_balance_alone() {
    for engine in [ReduceEngine::Chain, ReduceEngine::Full] {
        let (app, _temp) = setup_app(engine).await;
        seed_seven(&app).await;
        app.services
            .balances
            .update(vec![transfer(5, 0, LogStatus::Confirmed, 10)])
            .await
            .unwrap();

        let stale = transfer(3, 0, LogStatus::Confirmed, 100);
        app.services.balances.update(vec![stale.clone()]).await.unwrap();
        assert_eq!(amount(&app).await, Decimal::from(17u64), "engine {}", engine);

        app.services
            .balances
            .update(vec![stale.with_status(LogStatus::Reverted)])
            .await
            .unwrap();
        assert_eq!(amount(&app).await, Decimal::from(17u64), "engine {}", engine);

        let replayed = app
            .services
            .balances
            .full()
            .reduce_key(&balance_id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(replayed.data.amount, Decimal::from(17u64), "engine {}", engine);
    }
}

#[tokio::test]
async fn test_concurrent_reduce_of_same_key_is_refused() {
    let (app, _temp) = setup_app(ReduceEngine::Chain).await;
    seed_seven(&app).await;
    let full = app.services.balances.full().clone();
    let key = balance_id();

    let guard = full.locks().acquire("balance", &key.to_string()).await;
    match full.try_reduce_key(&key).await {
        Err(ServiceError::Busy(busy)) => assert_eq!(busy, key.to_string()),
        other => panic!("expected Busy, got {:?}", other.map(|s| s.map(|s| s.mark))),
    }

    let waiting = {
        let full = full.clone();
        let key = key.clone();
        tokio::spawn(async move { full.reduce_key(&key).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiting.is_finished());

    drop(guard);
    let snapshot = waiting.await.unwrap().unwrap().unwrap();
    assert_eq!(snapshot.data.amount, Decimal::from(7u64));
}

#[tokio::test]
async fn test_redelivery_does_not_change_balance() {
    let (app, _temp) = setup_app(ReduceEngine::Chain).await;
    seed_seven(&app).await;
    let income = transfer(2, 0, LogStatus::Confirmed, 10);

    app.services.balances.update(vec![income.clone()]).await.unwrap();
    let summary = app.services.balances.update(vec![income]).await.unwrap();

    assert_eq!(summary.keys, 1);
    assert_eq!(amount(&app).await, Decimal::from(17u64));
}

#[test]
fn test_compensation_returns_to_baseline() {
    let reducer = BalanceReducer;
    let mut start = reducer.initial_snapshot(&balance_id());
    start.data.amount = Decimal::from(7u64);

    for delta in [10, -3, 0] {
        let event = transfer(2, 0, LogStatus::Confirmed, delta);
        let applied = reduce(&reducer, start.clone(), &event).unwrap();
        let inverse = reducer.invert(&event).unwrap();
        let undone = reduce(&reducer, applied, &inverse).unwrap();
        assert_eq!(undone.data.amount, start.data.amount);
    }
}
