use crate::lifecycle::LifecycleState;
use polyneuron_ledger::{AccountAddress, Amount, BASE_UNIT};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type TaskId = u64;
pub type Hash = [u8; 32];

/// Fixed-width fingerprint of opaque task input or output.
pub fn fingerprint(data: &[u8]) -> Hash {
    *blake3::hash(data).as_bytes()
}

/// Staked worker identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CognitiveNode {
    pub owner: AccountAddress,
    pub label: String,
    pub staked_amount: Amount,
    pub is_active: bool,
    pub tasks_completed: u64,
    /// Points earned from completed work; see [`reputation_for`]
    pub reputation_score: u64,
    pub registered_at: u64,
}

/// Reputation earned by one completion: one point per whole unit of reward,
/// and at least one point.
pub fn reputation_for(reward: Amount) -> u64 {
    (reward.to_base_units() / BASE_UNIT).max(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Open,      // Reward escrowed, waiting for a worker
    Assigned,  // Exclusively claimed by one node
    Completed, // Result recorded and reward paid
}

impl TaskStatus {
    /// Whether a task in this state still has its reward in escrow.
    pub fn holds_escrow(&self) -> bool {
        matches!(self, Self::Open | Self::Assigned)
    }
}

impl LifecycleState for TaskStatus {
    fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }

    fn can_transition_to(&self, next: &Self) -> bool {
        use TaskStatus::*;
        matches!((self, next), (Open, Assigned) | (Assigned, Completed))
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Open => "Open",
            Self::Assigned => "Assigned",
            Self::Completed => "Completed",
        };
        write!(f, "{}", name)
    }
}

/// A unit of off-chain reasoning work with an escrowed reward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningTask {
    pub id: TaskId,
    pub task_type: String,
    pub data_hash: Hash,
    pub reward: Amount,
    pub deadline: u64,
    pub requester: AccountAddress,
    pub assigned_node: Option<AccountAddress>,
    pub result_hash: Option<Hash>,
    pub status: TaskStatus,
    pub created_at: u64,
    pub assigned_at: Option<u64>,
    pub completed_at: Option<u64>,
}

impl ReasoningTask {
    /// A task is live while `now < deadline`.
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.deadline
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketStats {
    pub registered_nodes: u64,
    pub active_nodes: u64,
    pub total_tasks: u64,
    pub open_tasks: u64,
    pub assigned_tasks: u64,
    pub completed_tasks: u64,
    pub outstanding_rewards: Amount,
    pub total_rewards_paid: Amount,
    pub total_staked: Amount,
}

#[cfg(test)]
mod task_lifecycle_tests {
    use super::*;

    #[test]
    fn test_task_terminal_states() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(!TaskStatus::Open.is_terminal());
        assert!(!TaskStatus::Assigned.is_terminal());
    }

    #[test]
    fn test_task_happy_path() {
        assert!(TaskStatus::Open.can_transition_to(&TaskStatus::Assigned));
        assert!(TaskStatus::Assigned.can_transition_to(&TaskStatus::Completed));
    }

    #[test]
    fn test_no_skips_or_reversals() {
        assert!(!TaskStatus::Open.can_transition_to(&TaskStatus::Completed));
        assert!(!TaskStatus::Assigned.can_transition_to(&TaskStatus::Open));
        assert!(!TaskStatus::Completed.can_transition_to(&TaskStatus::Assigned));
        assert!(!TaskStatus::Completed.can_transition_to(&TaskStatus::Open));
        assert!(!TaskStatus::Open.can_transition_to(&TaskStatus::Open));
    }

    #[test]
    fn test_escrow_holding_states() {
        assert!(TaskStatus::Open.holds_escrow());
        assert!(TaskStatus::Assigned.holds_escrow());
        assert!(!TaskStatus::Completed.holds_escrow());
    }

    #[test]
    fn test_deadline_boundary() {
        let task = ReasoningTask {
            id: 1,
            task_type: "market_prediction".to_string(),
            data_hash: fingerprint(b"data"),
            reward: Amount::from_units(1.0),
            deadline: 100,
            requester: AccountAddress::from_bytes([1; 32]),
            assigned_node: None,
            result_hash: None,
            status: TaskStatus::Open,
            created_at: 10,
            assigned_at: None,
            completed_at: None,
        };
        assert!(!task.is_expired(99));
        assert!(task.is_expired(100));
        assert!(task.is_expired(101));
    }

    #[test]
    fn test_reputation_weighting() {
        assert_eq!(reputation_for(Amount::from_units(0.25)), 1);
        assert_eq!(reputation_for(Amount::from_units(1.0)), 1);
        assert_eq!(reputation_for(Amount::from_units(7.9)), 7);
        assert_eq!(reputation_for(Amount::from_units(150.0)), 150);
    }
}
