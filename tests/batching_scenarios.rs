use mevguard::{
    BatchEngine, BatchFailure, CloseReason, DryRunPayout, DryRunSettlementBackend, EngineConfig, EngineError,
    OrderId, OrderRequest, OrderSide, OrderStatus, SettlementEvent,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

fn engine(config: EngineConfig) -> (BatchEngine, Arc<DryRunSettlementBackend>) {
    let backend = Arc::new(DryRunSettlementBackend::new());
    let engine = BatchEngine::new(config, backend.clone(), Arc::new(DryRunPayout::new()))
        .expect("valid config");
    (engine, backend)
}

fn order(id: &str, amount: Decimal) -> OrderRequest {
    OrderRequest::new("0xrequester", "WETH", "USDC", amount, OrderSide::Sell).with_id(id)
}

async fn next_event(events: &mut broadcast::Receiver<SettlementEvent>) -> SettlementEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("settlement event within 5s")
        .expect("event channel open")
}

#[tokio::test]
async fn size_trigger_closes_one_batch_on_fifth_order() {
    let config = EngineConfig::new(5, Duration::from_secs(300), dec!(0.002), "0xfeewallet");
    let (engine, backend) = engine(config);
    let mut events = engine.subscribe();
    engine.start_batch_processor().await.unwrap();

    let amounts = [
        dec!(1000000),
        dec!(2000000),
        dec!(1000000000000000),
        dec!(1000000000000000000),
        dec!(5000000),
    ];
    for (i, amount) in amounts.iter().enumerate() {
        engine
            .add_order(order(&format!("order-{}", i + 1), *amount))
            .await
            .unwrap();
    }

    let event = next_event(&mut events).await;
    let receipt = match event {
        SettlementEvent::BatchSettled(receipt) => receipt,
        other => panic!("expected settled batch, got {:?}", other),
    };

    let expected_ids: Vec<OrderId> = (1..=5)
        .map(|i| OrderId::new(format!("order-{}", i)))
        .collect();
    assert_eq!(receipt.order_ids, expected_ids);
    assert_eq!(receipt.close_reason, CloseReason::SizeThreshold);

    let expected_fees = dec!(0.002) * amounts.iter().copied().sum::<Decimal>();
    assert_eq!(receipt.total_fees, expected_fees);
    assert_eq!(engine.accrued_fees().await, expected_fees);
    assert_eq!(expected_fees, dec!(2002000000016000));
    assert_eq!(backend.submissions(), 1, "one settlement call per batch");

    let stats = engine.stats().await;
    assert_eq!(stats.orders_in_queue, 0);
    assert_eq!(stats.batches_settled, 1);
    assert_eq!(stats.orders_settled, 5);

    engine.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn timeout_trigger_closes_single_order_batch() {
    let config = EngineConfig::new(100, Duration::from_secs(5), dec!(0.002), "0xfeewallet");
    let (engine, _) = engine(config);
    let mut events = engine.subscribe();
    engine.start_batch_processor().await.unwrap();

    engine.add_order(order("lonely", dec!(42))).await.unwrap();
    tokio::time::sleep(Duration::from_secs(6)).await;

    let event = next_event(&mut events).await;
    assert!(event.is_settled());
    assert_eq!(event.close_reason(), CloseReason::Timeout);
    assert_eq!(event.order_ids(), &[OrderId::new("lonely")]);
    assert!(matches!(
        events.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));

    engine.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn timeout_does_not_fire_early() {
    let config = EngineConfig::new(100, Duration::from_secs(5), dec!(0.002), "0xfeewallet");
    let (engine, _) = engine(config);
    let mut events = engine.subscribe();
    engine.start_batch_processor().await.unwrap();

    engine.add_order(order("waiting", dec!(42))).await.unwrap();
    tokio::time::sleep(Duration::from_millis(4500)).await;

    assert!(events.try_recv().is_err());
    assert_eq!(engine.depth().await, 1);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn depth_counts_only_accepted_orders() {
    let config = EngineConfig::new(100, Duration::from_secs(300), dec!(0.002), "0xfeewallet");
    let (engine, _) = engine(config);

    engine.add_order(order("a", dec!(1))).await.unwrap();
    engine.add_order(order("b", dec!(2))).await.unwrap();
    assert!(matches!(
        engine.add_order(order("a", dec!(3))).await,
        Err(EngineError::DuplicateId(_))
    ));
    assert!(matches!(
        engine.add_order(order("c", dec!(0))).await,
        Err(EngineError::InvalidOrder(_))
    ));
    let same_asset = OrderRequest::new("0xr", "WETH", "WETH", dec!(1), OrderSide::Buy);
    assert!(engine.add_order(same_asset).await.is_err());
    let generated = engine
        .add_order(OrderRequest::new("0xr", "USDC", "WETH", dec!(9), OrderSide::Buy))
        .await
        .unwrap();

    assert_eq!(engine.depth().await, 3);
    let queued: Vec<OrderId> = engine
        .queued_orders()
        .await
        .into_iter()
        .map(|o| o.id)
        .collect();
    assert_eq!(queued, vec![OrderId::new("a"), OrderId::new("b"), generated]);
    assert_eq!(
        engine.order_status(&OrderId::new("a")).await,
        Some(OrderStatus::Queued)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_adds_settle_exactly_once_in_fifo_order() {
    const WORKERS: usize = 8;
    const PER_WORKER: usize = 50;

    let config = EngineConfig::new(7, Duration::from_millis(100), dec!(0.002), "0xfeewallet");
    let (engine, _) = engine(config);
    let mut events = engine.subscribe();
    engine.start_batch_processor().await.unwrap();

    let handles: Vec<_> = (0..WORKERS)
        .map(|w| {
            let engine = engine.clone();
            tokio::spawn(async move {
                for n in 0..PER_WORKER {
                    engine
                        .add_order(order(&format!("w{}-{:03}", w, n), dec!(10)))
                        .await
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let total = WORKERS * PER_WORKER;
    let mut seen = Vec::with_capacity(total);
    let mut last_batch_id = 0;
    while seen.len() < total {
        let event = next_event(&mut events).await;
        assert!(event.is_settled());
        assert!(!event.order_ids().is_empty(), "no empty batches");
        assert!(event.order_ids().len() <= 7);
        assert!(event.batch_id() > last_batch_id, "batches settle in close order");
        last_batch_id = event.batch_id();
        seen.extend(event.order_ids().iter().cloned());
    }

    let unique: HashSet<&OrderId> = seen.iter().collect();
    assert_eq!(seen.len(), total);
    assert_eq!(unique.len(), total, "every order in exactly one batch");

    // each worker's orders were accepted in sequence, so they must settle in sequence
    let mut last_seq: HashMap<String, i64> = HashMap::new();
    for id in &seen {
        let (worker, seq) = id.as_str().split_once('-').unwrap();
        let seq: i64 = seq.parse().unwrap();
        let prev = last_seq.entry(worker.to_string()).or_insert(-1);
        assert!(seq > *prev, "FIFO violated for {}", id);
        *prev = seq;
    }

    assert_eq!(engine.accrued_fees().await, dec!(0.02) * Decimal::from(total));
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn failed_batch_is_not_requeued() {
    let config = EngineConfig::new(2, Duration::from_secs(300), dec!(0.002), "0xfeewallet");
    let (engine, backend) = engine(config);
    let mut events = engine.subscribe();
    engine.start_batch_processor().await.unwrap();

    backend.set_failing(true);
    engine.add_order(order("f1", dec!(100))).await.unwrap();
    engine.add_order(order("f2", dec!(100))).await.unwrap();

    match next_event(&mut events).await {
        SettlementEvent::BatchFailed { order_ids, .. } => {
            assert_eq!(order_ids, vec![OrderId::new("f1"), OrderId::new("f2")]);
        }
        other => panic!("expected failed batch, got {:?}", other),
    }
    assert_eq!(engine.depth().await, 0);
    assert_eq!(engine.accrued_fees().await, Decimal::ZERO);
    assert_eq!(
        engine.order_status(&OrderId::new("f2")).await,
        Some(OrderStatus::Failed)
    );

    // resubmission is the caller's call, under fresh ids
    backend.set_failing(false);
    assert!(engine.add_order(order("f1", dec!(100))).await.is_err());
    engine.add_order(order("r1", dec!(100))).await.unwrap();
    engine.add_order(order("r2", dec!(100))).await.unwrap();
    assert!(next_event(&mut events).await.is_settled());
    assert_eq!(engine.accrued_fees().await, dec!(0.4));

    let stats = engine.stats().await;
    assert_eq!(stats.batches_failed, 1);
    assert_eq!(stats.batches_settled, 1);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn orders_queued_before_start_are_batched_on_start() {
    let config = EngineConfig::new(3, Duration::from_secs(300), dec!(0.002), "0xfeewallet");
    let (engine, _) = engine(config);
    let mut events = engine.subscribe();

    for id in ["p1", "p2", "p3", "p4"] {
        engine.add_order(order(id, dec!(1))).await.unwrap();
    }
    assert_eq!(engine.depth().await, 4);

    engine.start_batch_processor().await.unwrap();
    let event = next_event(&mut events).await;
    assert_eq!(event.order_ids().len(), 3);
    assert_eq!(event.close_reason(), CloseReason::SizeThreshold);

    // the fourth settles on shutdown instead of being dropped
    engine.shutdown().await.unwrap();
    let last = next_event(&mut events).await;
    assert_eq!(last.order_ids(), &[OrderId::new("p4")]);
    assert_eq!(last.close_reason(), CloseReason::Shutdown);
}

#[tokio::test]
async fn overflowing_batch_fails_and_later_batches_still_settle() {
    let config = EngineConfig::new(2, Duration::from_secs(300), dec!(0.002), "0xfeewallet");
    let (engine, backend) = engine(config);
    let mut events = engine.subscribe();
    engine.start_batch_processor().await.unwrap();

    // each amount is admissible, their sum does not fit a Decimal
    let big = dec!(50000000000000000000000000000);
    engine.add_order(order("big-1", big)).await.unwrap();
    engine.add_order(order("big-2", big)).await.unwrap();

    match next_event(&mut events).await {
        SettlementEvent::BatchFailed { order_ids, error, .. } => {
            assert_eq!(order_ids, vec![OrderId::new("big-1"), OrderId::new("big-2")]);
            assert!(matches!(error, BatchFailure::AmountOverflow(_)));
        }
        other => panic!("expected failed batch, got {:?}", other),
    }
    assert_eq!(
        engine.order_status(&OrderId::new("big-1")).await,
        Some(OrderStatus::Failed)
    );
    assert_eq!(engine.accrued_fees().await, Decimal::ZERO);
    assert_eq!(backend.submissions(), 0);

    engine.add_order(order("small-1", dec!(100))).await.unwrap();
    engine.add_order(order("small-2", dec!(100))).await.unwrap();
    assert!(next_event(&mut events).await.is_settled());
    assert_eq!(engine.accrued_fees().await, dec!(0.4));

    engine.shutdown().await.unwrap();
}
