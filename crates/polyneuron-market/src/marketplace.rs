use crate::clock::{Clock, SystemClock};
use crate::escrow::{EscrowManager, EscrowType};
use crate::events::{EventLog, EventRecord, MarketEvent, DEFAULT_EVENT_BUFFER};
use crate::lifecycle::LifecycleState;
use crate::registry::{NodeRegistry, RegistrationOutcome, RegistryConfig};
use crate::types::{CognitiveNode, Hash, MarketStats, ReasoningTask, TaskId, TaskStatus};
use crate::{MarketError, Result};
use polyneuron_ledger::{AccountAddress, Amount, BalanceManager};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub registry: RegistryConfig,
    /// Upper bound on `deadline - now` at creation; `None` disables the cap
    pub max_task_duration_secs: Option<u64>,
    /// Reject submissions that arrive at or after the task deadline
    pub enforce_deadline_on_submit: bool,
    /// Capacity of the live event channel
    pub event_buffer: usize,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self::production()
    }
}

impl MarketConfig {
    pub fn production() -> Self {
        Self {
            registry: RegistryConfig::production(),
            max_task_duration_secs: None,
            enforce_deadline_on_submit: false,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }

    pub fn devnet() -> Self {
        Self {
            registry: RegistryConfig::devnet(),
            ..Self::production()
        }
    }
}

struct MarketState {
    registry: NodeRegistry,
    tasks: BTreeMap<TaskId, ReasoningTask>,
    next_task_id: TaskId,
    total_rewards_paid: Amount,
}

/// Node registry plus the reasoning-task marketplace.
///
/// Every mutating operation holds `state` for its whole duration, so operations
/// commit in a single total order. Events are appended before the lock is
/// released, which makes event sequence numbers follow that order too.
pub struct Marketplace {
    ledger: Arc<BalanceManager>,
    reward_escrow: EscrowManager,
    state: Mutex<MarketState>,
    events: EventLog,
    clock: Arc<dyn Clock>,
    config: MarketConfig,
}

impl Marketplace {
    pub fn new(ledger: Arc<BalanceManager>, config: MarketConfig) -> Self {
        Self::with_clock(ledger, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        ledger: Arc<BalanceManager>,
        config: MarketConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let registry = NodeRegistry::new(ledger.clone(), config.registry.clone());
        Self {
            reward_escrow: EscrowManager::new(ledger.clone(), AccountAddress::task_escrow()),
            ledger,
            state: Mutex::new(MarketState {
                registry,
                tasks: BTreeMap::new(),
                next_task_id: 1,
                total_rewards_paid: Amount::ZERO,
            }),
            events: EventLog::new(config.event_buffer),
            clock,
            config,
        }
    }

    pub fn config(&self) -> &MarketConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<BalanceManager> {
        &self.ledger
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    /// Register `caller` as a worker node, bonding `stake` from its balance.
    pub async fn register_node(
        &self,
        caller: AccountAddress,
        label: impl Into<String>,
        stake: Amount,
    ) -> Result<CognitiveNode> {
        ensure_participant(caller)?;
        let mut state = self.state.lock().await;
        let now = self.clock.now();

        let outcome = state
            .registry
            .register(caller, label.into(), stake, now)
            .await?;

        let node = match outcome {
            RegistrationOutcome::Registered(node) => {
                self.events
                    .append(
                        MarketEvent::NodeRegistered {
                            identity: node.owner,
                            label: node.label.clone(),
                        },
                        now,
                    )
                    .await;
                node
            }
            RegistrationOutcome::ToppedUp(node) => node,
        };

        Ok(node)
    }

    /// Escrow `reward` from `requester` and publish a new open task.
    pub async fn create_task(
        &self,
        requester: AccountAddress,
        task_type: impl Into<String>,
        data_hash: Hash,
        deadline: u64,
        reward: Amount,
    ) -> Result<TaskId> {
        ensure_participant(requester)?;
        let task_type = task_type.into();
        let mut state = self.state.lock().await;
        let now = self.clock.now();

        if reward.is_zero() {
            return Err(MarketError::InvalidReward);
        }
        if deadline <= now {
            return Err(MarketError::InvalidDeadline {
                deadline,
                now,
                reason: "deadline must be in the future".to_string(),
            });
        }
        if let Some(max) = self.config.max_task_duration_secs {
            if deadline - now > max {
                return Err(MarketError::InvalidDeadline {
                    deadline,
                    now,
                    reason: format!("deadline exceeds the {}s horizon", max),
                });
            }
        }

        let task_id = state.next_task_id;
        self.reward_escrow
            .lock(EscrowType::TaskReward { task_id, requester }, reward, now)
            .await?;

        let task = ReasoningTask {
            id: task_id,
            task_type: task_type.clone(),
            data_hash,
            reward,
            deadline,
            requester,
            assigned_node: None,
            result_hash: None,
            status: TaskStatus::Open,
            created_at: now,
            assigned_at: None,
            completed_at: None,
        };
        state.tasks.insert(task_id, task);
        state.next_task_id += 1;

        info!(
            task_id,
            requester = %requester.short(),
            task_type = %task_type,
            reward = reward.to_units(),
            deadline,
            "📝 Task created"
        );

        self.events
            .append(
                MarketEvent::TaskCreated {
                    task_id,
                    requester,
                    task_type,
                    reward,
                },
                now,
            )
            .await;

        Ok(task_id)
    }

    /// Claim an open task for `caller`. Exactly one claimant can win.
    pub async fn assign_task(&self, caller: AccountAddress, task_id: TaskId) -> Result<()> {
        ensure_participant(caller)?;
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let now = self.clock.now();

        if !state.registry.is_active(&caller) {
            return Err(MarketError::NodeNotActive(caller));
        }

        let task = state
            .tasks
            .get_mut(&task_id)
            .ok_or(MarketError::TaskNotFound(task_id))?;

        if task.status != TaskStatus::Open {
            debug!(task_id, status = %task.status, caller = %caller.short(), "Assignment rejected");
            return Err(MarketError::TaskNotOpen {
                task_id,
                status: task.status,
            });
        }
        if task.is_expired(now) {
            return Err(MarketError::TaskExpired {
                task_id,
                deadline: task.deadline,
                now,
            });
        }

        advance(task, TaskStatus::Assigned)?;
        task.assigned_node = Some(caller);
        task.assigned_at = Some(now);

        info!(
            task_id,
            node = %caller.short(),
            deadline = task.deadline,
            "🤝 Task assigned"
        );

        self.events
            .append(
                MarketEvent::TaskAssigned {
                    task_id,
                    assigned_node: caller,
                },
                now,
            )
            .await;

        Ok(())
    }

    /// Record the assignee's result and pay out the escrowed reward.
    ///
    /// The task is marked completed and the node's counter bumped before the
    /// payout; a failed payout restores both. Returns the amount paid.
    pub async fn submit_task_result(
        &self,
        caller: AccountAddress,
        task_id: TaskId,
        result_hash: Hash,
    ) -> Result<Amount> {
        ensure_participant(caller)?;
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let now = self.clock.now();

        let task = state
            .tasks
            .get_mut(&task_id)
            .ok_or(MarketError::TaskNotFound(task_id))?;

        if task.status != TaskStatus::Assigned {
            return Err(MarketError::TaskNotAssigned {
                task_id,
                status: task.status,
            });
        }
        if task.assigned_node != Some(caller) {
            return Err(MarketError::NotAssignee { task_id, caller });
        }
        if self.config.enforce_deadline_on_submit && task.is_expired(now) {
            return Err(MarketError::TaskExpired {
                task_id,
                deadline: task.deadline,
                now,
            });
        }

        let snapshot = task.clone();
        advance(task, TaskStatus::Completed)?;
        task.result_hash = Some(result_hash);
        task.completed_at = Some(now);

        let reward = snapshot.reward;
        let node = match state.registry.record_completion(&caller, reward) {
            Ok(node) => node,
            Err(e) => {
                state.tasks.insert(task_id, snapshot);
                return Err(e);
            }
        };

        let lock_id = EscrowType::TaskReward {
            task_id,
            requester: snapshot.requester,
        }
        .to_lock_id();

        let paid = match self.reward_escrow.release(&lock_id, caller).await {
            Ok(paid) => paid,
            Err(e) => {
                warn!(
                    task_id,
                    node = %caller.short(),
                    error = %e,
                    "⚠️ Reward payout failed, rolling back completion"
                );
                state.registry.revert_completion(&caller, reward);
                state.tasks.insert(task_id, snapshot);
                return Err(e);
            }
        };
        state.total_rewards_paid = state.total_rewards_paid.saturating_add(paid);

        info!(
            task_id,
            node = %caller.short(),
            reward = paid.to_units(),
            tasks_completed = node.tasks_completed,
            reputation = node.reputation_score,
            result_hash = %hex::encode(&result_hash[..8]),
            "✅ Task completed"
        );

        self.events
            .append(
                MarketEvent::TaskResultSubmitted {
                    task_id,
                    result_hash,
                },
                now,
            )
            .await;

        Ok(paid)
    }

    pub async fn get_node(&self, identity: &AccountAddress) -> Option<CognitiveNode> {
        self.state.lock().await.registry.get_node(identity).cloned()
    }

    pub async fn get_task(&self, task_id: TaskId) -> Option<ReasoningTask> {
        self.state.lock().await.tasks.get(&task_id).cloned()
    }

    /// Every registered node, oldest registration first.
    pub async fn nodes(&self) -> Vec<CognitiveNode> {
        let state = self.state.lock().await;
        let mut nodes: Vec<CognitiveNode> = state.registry.nodes().cloned().collect();
        nodes.sort_by(|a, b| {
            a.registered_at
                .cmp(&b.registered_at)
                .then_with(|| a.owner.cmp(&b.owner))
        });
        nodes
    }

    /// Every task, in id order.
    pub async fn tasks(&self) -> Vec<ReasoningTask> {
        self.state.lock().await.tasks.values().cloned().collect()
    }

    pub async fn tasks_by_status(&self, status: TaskStatus) -> Vec<ReasoningTask> {
        let state = self.state.lock().await;
        state
            .tasks
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect()
    }

    /// Tasks ever assigned to `node`, in id order.
    pub async fn tasks_for_node(&self, node: &AccountAddress) -> Vec<ReasoningTask> {
        let state = self.state.lock().await;
        state
            .tasks
            .values()
            .filter(|t| t.assigned_node.as_ref() == Some(node))
            .cloned()
            .collect()
    }

    /// Sum of rewards still held for open and assigned tasks.
    pub async fn outstanding_rewards(&self) -> Amount {
        let state = self.state.lock().await;
        outstanding(&state.tasks)
    }

    /// Ledger balance of the task escrow vault.
    pub async fn escrow_balance(&self) -> Result<Amount> {
        self.reward_escrow.vault_balance().await
    }

    pub async fn stats(&self) -> MarketStats {
        let state = self.state.lock().await;
        let mut stats = MarketStats {
            registered_nodes: state.registry.len() as u64,
            active_nodes: state.registry.active_count() as u64,
            total_tasks: state.tasks.len() as u64,
            outstanding_rewards: outstanding(&state.tasks),
            total_rewards_paid: state.total_rewards_paid,
            total_staked: state.registry.total_staked(),
            ..Default::default()
        };
        for task in state.tasks.values() {
            match task.status {
                TaskStatus::Open => stats.open_tasks += 1,
                TaskStatus::Assigned => stats.assigned_tasks += 1,
                TaskStatus::Completed => stats.completed_tasks += 1,
            }
        }
        stats
    }

    /// Check that both vaults hold exactly what the records say they should.
    ///
    /// Returns the outstanding reward total on success.
    pub async fn verify_escrow_invariant(&self) -> Result<Amount> {
        let state = self.state.lock().await;

        let outstanding = outstanding(&state.tasks);
        let vault = self.reward_escrow.vault_balance().await?;
        let locked = self.reward_escrow.total_locked().await;
        if vault != outstanding || locked != outstanding {
            return Err(MarketError::InvariantViolation(format!(
                "task escrow vault {} / locked {} / outstanding {}",
                vault, locked, outstanding
            )));
        }

        for task in state.tasks.values() {
            let lock_id = EscrowType::TaskReward {
                task_id: task.id,
                requester: task.requester,
            }
            .to_lock_id();
            if task.status.holds_escrow() {
                let held = self.reward_escrow.get_lock(&lock_id).await?.amount;
                if held != task.reward {
                    return Err(MarketError::InvariantViolation(format!(
                        "task {} reward {} but lock holds {}",
                        task.id, task.reward, held
                    )));
                }
            } else if self.reward_escrow.lock_exists(&lock_id).await {
                return Err(MarketError::InvariantViolation(format!(
                    "completed task {} still has an escrow lock",
                    task.id
                )));
            }
        }

        let staked = state.registry.total_staked();
        let stake_vault = state.registry.stake_vault_balance().await?;
        if stake_vault != staked {
            return Err(MarketError::InvariantViolation(format!(
                "stake vault {} / recorded stake {}",
                stake_vault, staked
            )));
        }
        state.registry.verify_stakes().await?;

        Ok(outstanding)
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub async fn events_since(&self, after: u64) -> Vec<EventRecord> {
        self.events.events_since(after).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.events.subscribe()
    }
}

/// Custody vaults never act as callers, requesters or assignees.
fn ensure_participant(address: AccountAddress) -> Result<()> {
    if address.is_reserved() {
        return Err(MarketError::ReservedIdentity(address));
    }
    Ok(())
}

fn advance(task: &mut ReasoningTask, next: TaskStatus) -> Result<()> {
    if !task.status.can_transition_to(&next) {
        return Err(MarketError::InvalidTransition(format!(
            "task {}: {} -> {}",
            task.id, task.status, next
        )));
    }
    debug!(task_id = task.id, from = %task.status, to = %next, "Task state change");
    task.status = next;
    Ok(())
}

fn outstanding(tasks: &BTreeMap<TaskId, ReasoningTask>) -> Amount {
    tasks
        .values()
        .filter(|t| t.status.holds_escrow())
        .map(|t| t.reward)
        .sum()
}
