use std::sync::Arc;
use std::time::Duration;

use bigdecimal::BigDecimal;
use tokio::sync::watch;
use tokio::time::sleep;

use gophermart::accrual::{EngineClient, Goods, OrderRateLimiter, RewardEngine, RewardRule, RewardType};
use gophermart::clock::TokioClock;
use gophermart::database::{Ledger, MemoryLedger, OrderStatus};
use gophermart::loyalty::{self, Submission};
use gophermart::order_number::OrderNumber;
use gophermart::points::Points;
use gophermart::poller::{Backoff, Poller, PollerConfig};

fn number(n: &str) -> OrderNumber {
    n.parse().unwrap()
}

fn goods(items: &[(&str, i64)]) -> Vec<Goods> {
    items
        .iter()
        .map(|(description, price)| Goods {
            description: description.to_string(),
            price: Points::whole(*price),
        })
        .collect()
}

async fn wait_settled(ledger: &MemoryLedger, orders: &[OrderNumber]) {
    // virtual time, so generous limits cost nothing
    for _ in 0..10_000 {
        let done = orders
            .iter()
            .all(|order| ledger.order(*order).map_or(false, |o| !o.status.is_pending()));
        if done {
            return;
        }
        sleep(Duration::from_millis(100)).await;
    }
    panic!("orders were not settled in time");
}

#[tokio::test(start_paused = true)]
async fn test_orders_reconcile_through_a_rate_limited_accrual_service() {
    let engine = RewardEngine::new();
    engine
        .register_rule(RewardRule {
            pattern: "Bork".to_string(),
            reward: BigDecimal::from(10),
            reward_type: RewardType::Percent,
        })
        .unwrap();
    engine
        .register_rule(RewardRule {
            pattern: "Acme".to_string(),
            reward: BigDecimal::from(25),
            reward_type: RewardType::Points,
        })
        .unwrap();

    let kettle = number("9278923470");
    let bundle = number("2377225624");
    let empty = number("12345678903");
    let late = number("79927398713");
    engine.register_order(kettle, &goods(&[("Bork kettle", 100)])).unwrap();
    engine
        .register_order(bundle, &goods(&[("Acme anvil", 50), ("Bork toaster", 200)]))
        .unwrap();
    engine.register_order(empty, &[]).unwrap();

    let ledger = Arc::new(MemoryLedger::new());
    for (owner, order) in [("alice", kettle), ("alice", bundle), ("bob", empty), ("bob", late)] {
        let submission = loyalty::submit_order(ledger.as_ref(), owner, &order.to_string()).unwrap();
        assert_eq!(submission, Submission::Accepted(order));
    }

    // two distinct orders a minute: the pool has to wait out the window at least once
    let limiter = OrderRateLimiter::new(2, Duration::from_secs(60), Arc::new(TokioClock));
    let client = Arc::new(EngineClient::new(engine.clone(), Some(limiter)));
    let config = PollerConfig {
        workers: 3,
        poll_interval: Duration::from_secs(1),
        batch_size: 100,
        backoff: Backoff::default(),
    };
    let poller = Poller::new(config, ledger.clone(), client, Arc::new(TokioClock));
    let (shutdown, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(poller.run(shutdown_rx));

    wait_settled(&ledger, &[kettle, bundle, empty]).await;
    assert!(ledger.order(late).unwrap().status.is_pending());

    // the accrual service learns about the last order only now
    engine.register_order(late, &goods(&[("Gizmo", 500)])).unwrap();
    wait_settled(&ledger, &[late]).await;

    // extra cycles must not credit anything twice
    sleep(Duration::from_secs(120)).await;
    shutdown.send(true).unwrap();
    handle.await.unwrap();

    assert_eq!(ledger.order(kettle).unwrap().accrual, Some(Points::whole(10)));
    assert_eq!(ledger.order(bundle).unwrap().accrual, Some(Points::whole(45)));
    assert_eq!(ledger.order(empty).unwrap().status, OrderStatus::Invalid);
    assert_eq!(ledger.order(late).unwrap().status, OrderStatus::Processed);
    assert_eq!(ledger.order(late).unwrap().accrual, Some(Points::ZERO));

    let alice = ledger.balance("alice").unwrap().unwrap();
    assert_eq!(alice.available(), Points::whole(55));
    let bob = ledger.balance("bob").unwrap().unwrap();
    assert_eq!(bob.available(), Points::ZERO);
    assert!(ledger.pending_orders(None, 10).unwrap().is_empty());

    loyalty::withdraw(ledger.as_ref(), "alice", "1000000008", Points::whole(50)).unwrap();
    assert!(loyalty::withdraw(ledger.as_ref(), "alice", "5555555555", Points::whole(6)).is_err());
    assert_eq!(ledger.balance("alice").unwrap().unwrap().available(), Points::whole(5));
    assert_eq!(ledger.withdrawals("alice").unwrap().len(), 1);
}
