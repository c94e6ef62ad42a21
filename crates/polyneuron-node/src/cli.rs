use crate::config::{NodeConfig, DEFAULT_CONFIG_FILE};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use polyneuron_ledger::{AccountAddress, Amount, BalanceManager, MemoryStorage};
use polyneuron_market::{
    fingerprint, Clock, CognitiveNode, EventRecord, FundingPool, ManualClock, MarketError,
    MarketEvent, MarketStats, Marketplace, ReasoningTask, ReservePool, SystemClock, TaskId,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of an in-process marketplace run
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub started_at: DateTime<Utc>,
    pub registered_workers: usize,
    pub failed_registrations: usize,
    /// Tasks whose deadline passed before a worker reached them
    pub expired_tasks: usize,
    pub stats: MarketStats,
    pub escrow_balance: Amount,
    pub reserve_deposited: Amount,
    pub total_supply: Amount,
    pub nodes: Vec<CognitiveNode>,
    pub tasks: Vec<ReasoningTask>,
    pub events: Vec<EventRecord>,
}

/// Drive a full register/create/assign/submit round on an in-memory ledger.
pub async fn run_simulation(config: &NodeConfig) -> Result<SimulationReport> {
    config.validate()?;
    let sim = &config.simulation;
    if sim.task_types.is_empty() {
        bail!("simulation.task_types must list at least one task type");
    }

    let started_at = Utc::now();
    let ledger = Arc::new(BalanceManager::new(Arc::new(MemoryStorage::new())));
    let clock = Arc::new(ManualClock::new(SystemClock.now()));
    let market = Marketplace::with_clock(ledger.clone(), config.market_config(), clock.clone());
    let reserve = ReservePool::new(ledger.clone());

    info!(
        workers = sim.workers,
        tasks = sim.tasks,
        min_stake = config.market.min_stake,
        stake = sim.stake,
        reward = sim.reward,
        "🚀 Starting marketplace simulation"
    );

    let requester = AccountAddress::from_seed("polyneuron-requester");
    ledger
        .credit(requester, Amount::from_units(sim.requester_funds))
        .await
        .context("Failed to fund requester")?;
    let mut minted = Amount::from_units(sim.requester_funds);

    let mut workers = Vec::with_capacity(sim.workers);
    let mut failed_registrations = 0;
    for i in 0..sim.workers {
        let worker = AccountAddress::from_seed(&format!("polyneuron-worker-{}", i));
        let funds = Amount::from_units(sim.worker_funds);
        ledger
            .credit(worker, funds)
            .await
            .with_context(|| format!("Failed to fund worker {}", i))?;
        minted = minted.saturating_add(funds);

        match market
            .register_node(worker, format!("node-{}", i), Amount::from_units(sim.stake))
            .await
        {
            Ok(node) => workers.push(node.owner),
            Err(e) => {
                warn!(worker = %worker.short(), error = %e, "⚠️ Worker registration failed");
                failed_registrations += 1;
            }
        }
    }

    let mut created: Vec<TaskId> = Vec::with_capacity(sim.tasks);
    for i in 0..sim.tasks {
        let task_type = &sim.task_types[i % sim.task_types.len()];
        let payload = format!("{}#{}@{}", task_type, i, started_at.timestamp());
        let deadline = clock.now() + sim.task_ttl_secs;

        match market
            .create_task(
                requester,
                task_type.clone(),
                fingerprint(payload.as_bytes()),
                deadline,
                Amount::from_units(sim.reward),
            )
            .await
        {
            Ok(task_id) => created.push(task_id),
            Err(e) => warn!(task_type = %task_type, error = %e, "⚠️ Task creation failed"),
        }
        clock.advance(1);
    }

    let mut expired_tasks = 0;
    if workers.is_empty() {
        warn!(open_tasks = created.len(), "⚠️ No active workers, tasks stay open");
    } else {
        for (n, task_id) in created.iter().enumerate() {
            let worker = workers[n % workers.len()];
            match market.assign_task(worker, *task_id).await {
                Ok(()) => {}
                Err(MarketError::TaskExpired { deadline, now, .. }) => {
                    // Expired tasks stay open with their reward escrowed
                    warn!(task_id, deadline, now, "⌛ Task expired before assignment");
                    expired_tasks += 1;
                    continue;
                }
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("Assignment of task {} failed", task_id));
                }
            }

            clock.advance(5);
            let result = fingerprint(format!("result:{}:{}", task_id, worker).as_bytes());
            market
                .submit_task_result(worker, *task_id, result)
                .await
                .with_context(|| format!("Submission for task {} failed", task_id))?;
        }
    }

    if sim.reserve_deposit > 0.0 {
        if let Err(e) = reserve
            .deposit(requester, Amount::from_units(sim.reserve_deposit))
            .await
        {
            warn!(error = %e, "⚠️ Reserve deposit failed");
        }
    }

    let outstanding = market
        .verify_escrow_invariant()
        .await
        .context("Escrow invariant check failed")?;
    let total_supply = ledger.total_supply().await?;
    if total_supply != minted {
        bail!(
            "Ledger supply drifted: minted {}, found {}",
            minted,
            total_supply
        );
    }

    info!(
        outstanding = outstanding.to_units(),
        total_supply = total_supply.to_units(),
        expired_tasks,
        "🎯 Escrow invariant holds"
    );

    Ok(SimulationReport {
        started_at,
        registered_workers: workers.len(),
        failed_registrations,
        expired_tasks,
        stats: market.stats().await,
        escrow_balance: market.escrow_balance().await?,
        reserve_deposited: reserve.total_deposited().await,
        total_supply,
        nodes: market.nodes().await,
        tasks: market.tasks().await,
        events: market.events().all().await,
    })
}

/// One-line view of a node record.
pub fn describe_node(node: &CognitiveNode) -> String {
    format!(
        "{:<12} {} stake {} active {} completed {} reputation {} since {}",
        node.label,
        node.owner.short(),
        node.staked_amount,
        node.is_active,
        node.tasks_completed,
        node.reputation_score,
        node.registered_at
    )
}

/// One-line view of a task record.
pub fn describe_task(task: &ReasoningTask) -> String {
    let assignee = task
        .assigned_node
        .map(|a| a.short())
        .unwrap_or_else(|| "-".to_string());
    let result = task
        .result_hash
        .map(|h| hex::encode(&h[..8]))
        .unwrap_or_else(|| "-".to_string());
    format!(
        "#{:<4} {:<18} {:<9} reward {} deadline {} requester {} node {} result {}",
        task.id,
        task.task_type,
        task.status,
        task.reward,
        task.deadline,
        task.requester.short(),
        assignee,
        result
    )
}

pub fn describe_event(record: &EventRecord) -> String {
    match &record.event {
        MarketEvent::NodeRegistered { identity, label } => {
            format!("NodeRegistered      {} ({})", label, identity.short())
        }
        MarketEvent::TaskCreated {
            task_id,
            requester,
            task_type,
            reward,
        } => format!(
            "TaskCreated         #{} {} reward {} by {}",
            task_id,
            task_type,
            reward,
            requester.short()
        ),
        MarketEvent::TaskAssigned {
            task_id,
            assigned_node,
        } => format!("TaskAssigned        #{} -> {}", task_id, assigned_node.short()),
        MarketEvent::TaskResultSubmitted {
            task_id,
            result_hash,
        } => format!(
            "TaskResultSubmitted #{} result {}",
            task_id,
            hex::encode(&result_hash[..8])
        ),
    }
}

pub fn print_report(report: &SimulationReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    let stats = &report.stats;
    println!();
    println!("📊 Simulation summary ({})", report.started_at.to_rfc3339());
    println!("   workers registered : {}", report.registered_workers);
    println!("   registrations failed: {}", report.failed_registrations);
    println!("   expired unassigned : {}", report.expired_tasks);
    println!(
        "   tasks              : {} total, {} open, {} assigned, {} completed",
        stats.total_tasks, stats.open_tasks, stats.assigned_tasks, stats.completed_tasks
    );
    println!("   rewards paid       : {}", stats.total_rewards_paid);
    println!("   outstanding escrow : {}", stats.outstanding_rewards);
    println!("   escrow vault       : {}", report.escrow_balance);
    println!("   total staked       : {}", stats.total_staked);
    println!("   reserve deposits   : {}", report.reserve_deposited);
    println!("   ledger supply      : {}", report.total_supply);
    println!();
    println!("🧠 Nodes");
    for node in &report.nodes {
        println!("   {}", describe_node(node));
    }
    println!();
    println!("📋 Tasks");
    for task in &report.tasks {
        println!("   {}", describe_task(task));
    }
    println!();
    println!("📜 Event log");
    for record in &report.events {
        println!("   {:>4}  {}", record.seq, describe_event(record));
    }
    Ok(())
}

/// Write a preset configuration into `output`, returning the file path.
pub fn init_config(output: &Path, preset: &str, force: bool) -> Result<PathBuf> {
    let config = NodeConfig::preset(preset)?;
    std::fs::create_dir_all(output)
        .with_context(|| format!("Failed to create {}", output.display()))?;

    let path = output.join(DEFAULT_CONFIG_FILE);
    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    config.save_to_file(&path)?;

    info!(path = %path.display(), preset, "⚙️ Configuration written");
    Ok(path)
}

pub fn render_config(config: &NodeConfig) -> Result<String> {
    Ok(toml::to_string_pretty(config)?)
}
