use polyneuron_ledger::Amount;
use polyneuron_market::TaskStatus;
use polyneuron_node::cli::{describe_event, describe_node, describe_task};
use polyneuron_node::{run_simulation, NodeConfig};

#[tokio::test]
async fn test_production_simulation_completes_every_task() {
    let config = NodeConfig::production();
    let report = run_simulation(&config).await.unwrap();

    assert_eq!(report.registered_workers, 3);
    assert_eq!(report.failed_registrations, 0);
    assert_eq!(report.stats.total_tasks, 6);
    assert_eq!(report.stats.completed_tasks, 6);
    assert_eq!(report.stats.total_rewards_paid, Amount::from_units(6.0));
    assert_eq!(report.escrow_balance, Amount::ZERO);
    assert_eq!(report.reserve_deposited, Amount::from_units(5.0));
    assert_eq!(report.stats.total_staked, Amount::from_units(300.0));

    // 3 registrations, then create/assign/submit per task
    assert_eq!(report.events.len(), 3 + 6 * 3);
    assert!(describe_event(&report.events[0]).starts_with("NodeRegistered"));
    assert!(describe_event(&report.events[3]).starts_with("TaskCreated"));
    assert_eq!(report.expired_tasks, 0);

    assert_eq!(report.nodes.len(), 3);
    assert_eq!(report.nodes.iter().map(|n| n.tasks_completed).sum::<u64>(), 6);
    // One point per whole unit of reward
    assert_eq!(report.nodes.iter().map(|n| n.reputation_score).sum::<u64>(), 6);
    assert!(describe_node(&report.nodes[0]).contains("reputation 2"));

    assert_eq!(report.tasks.len(), 6);
    assert!(report.tasks.iter().all(|t| t.status == TaskStatus::Completed));
    assert!(describe_task(&report.tasks[0]).starts_with("#1"));
}

#[tokio::test]
async fn test_understaked_workers_leave_tasks_open() {
    let mut config = NodeConfig::production();
    config.simulation.stake = 50.0;
    config.simulation.tasks = 2;

    let report = run_simulation(&config).await.unwrap();

    assert_eq!(report.registered_workers, 0);
    assert_eq!(report.failed_registrations, 3);
    assert_eq!(report.stats.open_tasks, 2);
    assert_eq!(report.escrow_balance, Amount::from_units(2.0));
    assert_eq!(report.stats.outstanding_rewards, report.escrow_balance);
}

#[tokio::test]
async fn test_devnet_simulation() {
    let report = run_simulation(&NodeConfig::devnet()).await.unwrap();
    assert_eq!(report.stats.completed_tasks, 6);
    assert_eq!(report.stats.active_nodes, 3);
    assert_eq!(report.escrow_balance, Amount::ZERO);
}

#[tokio::test]
async fn test_empty_task_types_rejected() {
    let mut config = NodeConfig::devnet();
    config.simulation.task_types.clear();
    assert!(run_simulation(&config).await.is_err());
}

#[tokio::test]
async fn test_report_serializes() {
    let mut config = NodeConfig::devnet();
    config.simulation.tasks = 1;
    let report = run_simulation(&config).await.unwrap();

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["stats"]["completed_tasks"], 1);
    assert_eq!(json["events"][3]["event"]["type"], "TaskCreated");
}

#[tokio::test]
async fn test_tasks_past_deadline_stay_open() {
    let mut config = NodeConfig::production();
    config.simulation.tasks = 10;
    config.simulation.task_ttl_secs = 20;

    // Creation takes 10s and each completed task takes 5s more. Tasks 1-3 are
    // reached in time, the clock then stops at +25 while expired tasks are
    // skipped, so task 7 (deadline +26) is still reached.
    let report = run_simulation(&config).await.unwrap();

    assert_eq!(report.expired_tasks, 6);
    assert_eq!(report.stats.completed_tasks, 4);
    assert_eq!(report.stats.open_tasks, 6);
    assert_eq!(report.stats.assigned_tasks, 0);
    assert_eq!(report.escrow_balance, Amount::from_units(6.0));
    assert_eq!(report.stats.outstanding_rewards, report.escrow_balance);

    let open: Vec<_> = report
        .tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Open)
        .map(|t| t.id)
        .collect();
    assert_eq!(open, vec![4, 5, 6, 8, 9, 10]);
}

#[tokio::test]
async fn test_long_devnet_run_survives_expiry() {
    let mut config = NodeConfig::devnet();
    config.simulation.tasks = 1000;
    config.simulation.requester_funds = 300.0;

    let report = run_simulation(&config).await.unwrap();

    assert_eq!(report.stats.total_tasks, 1000);
    assert!(report.expired_tasks > 0);
    assert_eq!(
        report.stats.completed_tasks as usize + report.expired_tasks,
        1000
    );
    assert_eq!(report.stats.open_tasks as usize, report.expired_tasks);
}

#[tokio::test]
async fn test_invalid_min_stake_rejected() {
    for bad in [-1.0, f64::NAN] {
        let mut config = NodeConfig::devnet();
        config.market.min_stake = bad;
        assert!(run_simulation(&config).await.is_err());
    }
}
