//! Randomized operation sequences against the escrow invariant
//!
//! Whatever mix of valid and invalid calls is thrown at the marketplace, the
//! task escrow vault must hold exactly the rewards of open and assigned tasks,
//! and total supply must be conserved.

use polyneuron_ledger::{AccountAddress, Amount, BalanceManager, MemoryStorage};
use polyneuron_market::{
    fingerprint, Clock, ManualClock, MarketConfig, Marketplace, TaskStatus,
};
use proptest::prelude::*;
use std::sync::Arc;

const START: u64 = 1_700_000_000;

#[derive(Debug, Clone)]
enum Op {
    Register { actor: usize, stake: u64 },
    Create { actor: usize, reward: u64, ttl: u64 },
    Assign { actor: usize, task: u64 },
    Submit { actor: usize, task: u64 },
    Advance { secs: u64 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..4usize, 0..200u64).prop_map(|(actor, stake)| Op::Register { actor, stake }),
        (0..4usize, 0..30u64, 0..120u64).prop_map(|(actor, reward, ttl)| Op::Create {
            actor,
            reward,
            ttl
        }),
        (0..4usize, 0..8u64).prop_map(|(actor, task)| Op::Assign { actor, task }),
        (0..4usize, 0..8u64).prop_map(|(actor, task)| Op::Submit { actor, task }),
        (0..90u64).prop_map(|secs| Op::Advance { secs }),
    ]
}

async fn run(ops: Vec<Op>) {
    let ledger = Arc::new(BalanceManager::new(Arc::new(MemoryStorage::new())));
    let clock = Arc::new(ManualClock::new(START));
    let market = Marketplace::with_clock(ledger.clone(), MarketConfig::production(), clock.clone());

    let actors: Vec<AccountAddress> = (0..4)
        .map(|i| AccountAddress::from_seed(&format!("actor-{}", i)))
        .collect();
    for actor in &actors {
        ledger.credit(*actor, Amount::from_units(250.0)).await.unwrap();
    }
    let supply = ledger.total_supply().await.unwrap();

    for op in ops {
        // Errors are expected; only the invariant matters
        match op {
            Op::Register { actor, stake } => {
                let _ = market
                    .register_node(actors[actor], "node", Amount::from_units(stake as f64))
                    .await;
            }
            Op::Create { actor, reward, ttl } => {
                let _ = market
                    .create_task(
                        actors[actor],
                        "fuzz",
                        fingerprint(&reward.to_le_bytes()),
                        clock.now() + ttl,
                        Amount::from_units(reward as f64),
                    )
                    .await;
            }
            Op::Assign { actor, task } => {
                let _ = market.assign_task(actors[actor], task).await;
            }
            Op::Submit { actor, task } => {
                let _ = market
                    .submit_task_result(actors[actor], task, fingerprint(b"result"))
                    .await;
            }
            Op::Advance { secs } => clock.advance(secs),
        }

        let outstanding = market.verify_escrow_invariant().await.unwrap();
        assert_eq!(market.escrow_balance().await.unwrap(), outstanding);
    }

    assert_eq!(ledger.total_supply().await.unwrap(), supply);

    let stats = market.stats().await;
    let completed = market.tasks_by_status(TaskStatus::Completed).await;
    let paid: Amount = completed.iter().map(|t| t.reward).sum();
    assert_eq!(stats.total_rewards_paid, paid);

    let completions: u64 = {
        let mut total = 0;
        for actor in &actors {
            if let Some(node) = market.get_node(actor).await {
                total += node.tasks_completed;
            }
        }
        total
    };
    assert_eq!(completions, stats.completed_tasks);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_escrow_matches_open_and_assigned(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(run(ops));
    }
}

#[tokio::test]
async fn test_completed_tasks_stay_completed() {
    let ledger = Arc::new(BalanceManager::new(Arc::new(MemoryStorage::new())));
    let clock = Arc::new(ManualClock::new(START));
    let market = Marketplace::with_clock(ledger.clone(), MarketConfig::devnet(), clock.clone());
    let worker = AccountAddress::from_seed("worker");
    ledger.credit(worker, Amount::from_units(10.0)).await.unwrap();

    market
        .register_node(worker, "node", Amount::from_units(1.0))
        .await
        .unwrap();
    let task_id = market
        .create_task(worker, "self-serve", fingerprint(b"x"), START + 5, Amount::from_units(2.0))
        .await
        .unwrap();
    market.assign_task(worker, task_id).await.unwrap();
    market
        .submit_task_result(worker, task_id, fingerprint(b"y"))
        .await
        .unwrap();
    let frozen = market.get_task(task_id).await.unwrap();

    clock.advance(100);
    assert!(market.assign_task(worker, task_id).await.is_err());
    assert!(market
        .submit_task_result(worker, task_id, fingerprint(b"z"))
        .await
        .is_err());
    assert_eq!(market.get_task(task_id).await.unwrap(), frozen);
    // Requester paid itself: 10 - 1 stake
    assert_eq!(
        ledger.get_balance(worker).await.unwrap(),
        Amount::from_units(9.0)
    );
}
