use crate::types::{TaskId, TaskStatus};
use polyneuron_ledger::{AccountAddress, Amount};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MarketError>;

/// Every variant aborts the triggering operation with no state change.
#[derive(Debug, Error)]
pub enum MarketError {
    #[error("Insufficient stake: required {required}, provided {provided}")]
    InsufficientStake { required: Amount, provided: Amount },

    #[error("Invalid deadline {deadline}: {reason} (now {now})")]
    InvalidDeadline {
        deadline: u64,
        now: u64,
        reason: String,
    },

    #[error("Task reward must be positive")]
    InvalidReward,

    #[error("Node not active: {0}")]
    NodeNotActive(AccountAddress),

    #[error("Reserved custody address cannot act as a participant: {0}")]
    ReservedIdentity(AccountAddress),

    #[error("Node already registered: {0}")]
    NodeAlreadyRegistered(AccountAddress),

    #[error("Task {task_id} is not open (status {status})")]
    TaskNotOpen { task_id: TaskId, status: TaskStatus },

    #[error("Task {task_id} expired: deadline {deadline}, now {now}")]
    TaskExpired {
        task_id: TaskId,
        deadline: u64,
        now: u64,
    },

    #[error("Caller {caller} is not the assignee of task {task_id}")]
    NotAssignee {
        task_id: TaskId,
        caller: AccountAddress,
    },

    #[error("Task {task_id} is not assigned (status {status})")]
    TaskNotAssigned { task_id: TaskId, status: TaskStatus },

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Insufficient balance for {account}: needed {needed}, available {available}")]
    InsufficientBalance {
        account: AccountAddress,
        needed: Amount,
        available: Amount,
    },

    #[error("Escrow lock not found: {0}")]
    LockNotFound(String),

    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("Escrow invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Ledger error: {0}")]
    Ledger(#[from] anyhow::Error),
}
