use crate::types::TaskId;
use crate::{MarketError, Result};
use polyneuron_ledger::{AccountAddress, Amount, BalanceManager};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Unique identifier for an escrow lock
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockId(String);

impl LockId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a lock is holding funds for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscrowType {
    /// Requester-funded reward for a reasoning task
    TaskReward {
        task_id: TaskId,
        requester: AccountAddress,
    },

    /// Collateral bonded by a worker node
    NodeStake { node: AccountAddress },
}

impl EscrowType {
    pub fn to_lock_id(&self) -> LockId {
        match self {
            EscrowType::TaskReward { task_id, .. } => LockId(format!("task_reward_{}", task_id)),
            EscrowType::NodeStake { node } => {
                LockId(format!("node_stake_{}", hex::encode(node.as_bytes())))
            }
        }
    }

    pub fn owner(&self) -> AccountAddress {
        match self {
            EscrowType::TaskReward { requester, .. } => *requester,
            EscrowType::NodeStake { node } => *node,
        }
    }
}

/// Lock metadata for tracking
#[derive(Debug, Clone)]
pub struct LockMetadata {
    pub escrow_type: EscrowType,
    pub amount: Amount,
    pub locked_at: u64,
    pub owner: AccountAddress,
}

/// Custodies funds in a dedicated vault account on the ledger.
///
/// Locking moves funds from the owner into the vault; releasing moves them from
/// the vault to the recipient. The vault balance therefore always equals the
/// sum of open locks, provided nothing else writes to the vault account.
pub struct EscrowManager {
    balance_mgr: Arc<BalanceManager>,
    vault: AccountAddress,
    locks: RwLock<HashMap<LockId, LockMetadata>>,
}

impl EscrowManager {
    pub fn new(balance_mgr: Arc<BalanceManager>, vault: AccountAddress) -> Self {
        Self {
            balance_mgr,
            vault,
            locks: RwLock::new(HashMap::new()),
        }
    }

    pub fn vault(&self) -> AccountAddress {
        self.vault
    }

    /// Move `amount` from the lock owner into the vault.
    pub async fn lock(&self, escrow_type: EscrowType, amount: Amount, now: u64) -> Result<LockId> {
        let start = std::time::Instant::now();
        let lock_id = escrow_type.to_lock_id();
        let owner = escrow_type.owner();

        let mut locks = self.locks.write().await;
        if locks.contains_key(&lock_id) {
            return Err(MarketError::InvalidTransition(format!(
                "escrow lock {} already exists",
                lock_id
            )));
        }

        self.ensure_funds(owner, amount).await?;
        self.balance_mgr
            .transfer(owner, self.vault, amount, lock_id.as_str())
            .await?;

        locks.insert(
            lock_id.clone(),
            LockMetadata {
                escrow_type: escrow_type.clone(),
                amount,
                locked_at: now,
                owner,
            },
        );

        info!(
            lock_id = %lock_id,
            owner = %owner.short(),
            vault = %self.vault.short(),
            amount = amount.to_units(),
            duration_ms = start.elapsed().as_millis() as u64,
            "🔒 Escrow locked"
        );

        Ok(lock_id)
    }

    /// Add `amount` from the owner to an existing lock.
    pub async fn top_up(&self, lock_id: &LockId, amount: Amount) -> Result<Amount> {
        let mut locks = self.locks.write().await;
        let metadata = locks
            .get_mut(lock_id)
            .ok_or_else(|| MarketError::LockNotFound(lock_id.to_string()))?;

        let new_amount = metadata
            .amount
            .checked_add(amount)
            .ok_or_else(|| anyhow::anyhow!("Escrow amount overflow for {}", lock_id))?;

        self.ensure_funds(metadata.owner, amount).await?;
        self.balance_mgr
            .transfer(metadata.owner, self.vault, amount, lock_id.as_str())
            .await?;
        metadata.amount = new_amount;

        info!(
            lock_id = %lock_id,
            owner = %metadata.owner.short(),
            added = amount.to_units(),
            total = new_amount.to_units(),
            "➕ Escrow topped up"
        );

        Ok(new_amount)
    }

    /// Pay the full lock out of the vault to `to` and forget the lock.
    ///
    /// On failure the lock and all balances are left untouched.
    pub async fn release(&self, lock_id: &LockId, to: AccountAddress) -> Result<Amount> {
        let start = std::time::Instant::now();
        let mut locks = self.locks.write().await;
        let metadata = locks
            .get(lock_id)
            .ok_or_else(|| MarketError::LockNotFound(lock_id.to_string()))?;
        let amount = metadata.amount;

        let to_balance_before = self.balance_mgr.get_balance(to).await?;
        self.balance_mgr
            .transfer(self.vault, to, amount, lock_id.as_str())
            .await?;
        locks.remove(lock_id);

        info!(
            lock_id = %lock_id,
            to = %to.short(),
            amount = amount.to_units(),
            to_balance_before = to_balance_before.to_units(),
            duration_ms = start.elapsed().as_millis() as u64,
            "💸 Escrow released"
        );

        Ok(amount)
    }

    pub async fn get_lock(&self, lock_id: &LockId) -> Result<LockMetadata> {
        let locks = self.locks.read().await;
        locks
            .get(lock_id)
            .cloned()
            .ok_or_else(|| MarketError::LockNotFound(lock_id.to_string()))
    }

    pub async fn lock_exists(&self, lock_id: &LockId) -> bool {
        self.locks.read().await.contains_key(lock_id)
    }

    /// Sum of all open locks.
    pub async fn total_locked(&self) -> Amount {
        self.locks.read().await.values().map(|m| m.amount).sum()
    }

    /// Ledger balance of the vault account.
    pub async fn vault_balance(&self) -> Result<Amount> {
        Ok(self.balance_mgr.get_balance(self.vault).await?)
    }

    async fn ensure_funds(&self, owner: AccountAddress, amount: Amount) -> Result<()> {
        let available = self.balance_mgr.get_balance(owner).await?;
        if available < amount {
            debug!(
                owner = %owner.short(),
                needed = amount.to_units(),
                available = available.to_units(),
                "Escrow lock rejected: insufficient balance"
            );
            return Err(MarketError::InsufficientBalance {
                account: owner,
                needed: amount,
                available,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyneuron_ledger::MemoryStorage;

    fn setup() -> (Arc<BalanceManager>, EscrowManager) {
        let balance_mgr = Arc::new(BalanceManager::new(Arc::new(MemoryStorage::new())));
        let escrow = EscrowManager::new(balance_mgr.clone(), AccountAddress::task_escrow());
        (balance_mgr, escrow)
    }

    #[tokio::test]
    async fn test_escrow_lifecycle() {
        let (balance_mgr, escrow) = setup();
        let owner = AccountAddress::from_bytes([1; 32]);
        let recipient = AccountAddress::from_bytes([2; 32]);

        balance_mgr
            .credit(owner, Amount::from_units(100.0))
            .await
            .unwrap();

        let lock_id = escrow
            .lock(
                EscrowType::TaskReward {
                    task_id: 1,
                    requester: owner,
                },
                Amount::from_units(50.0),
                10,
            )
            .await
            .unwrap();

        assert_eq!(
            balance_mgr.get_balance(owner).await.unwrap(),
            Amount::from_units(50.0)
        );
        assert_eq!(escrow.vault_balance().await.unwrap(), Amount::from_units(50.0));
        assert_eq!(escrow.total_locked().await, Amount::from_units(50.0));

        let paid = escrow.release(&lock_id, recipient).await.unwrap();
        assert_eq!(paid, Amount::from_units(50.0));
        assert_eq!(
            balance_mgr.get_balance(recipient).await.unwrap(),
            Amount::from_units(50.0)
        );
        assert_eq!(escrow.vault_balance().await.unwrap(), Amount::ZERO);
        assert!(!escrow.lock_exists(&lock_id).await);

        // Released locks cannot be paid twice
        assert!(matches!(
            escrow.release(&lock_id, recipient).await,
            Err(MarketError::LockNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_lock_requires_funds() {
        let (balance_mgr, escrow) = setup();
        let owner = AccountAddress::from_bytes([3; 32]);
        balance_mgr
            .credit(owner, Amount::from_units(1.0))
            .await
            .unwrap();

        let result = escrow
            .lock(
                EscrowType::NodeStake { node: owner },
                Amount::from_units(5.0),
                0,
            )
            .await;
        assert!(matches!(result, Err(MarketError::InsufficientBalance { .. })));
        assert_eq!(
            balance_mgr.get_balance(owner).await.unwrap(),
            Amount::from_units(1.0)
        );
        assert_eq!(escrow.total_locked().await, Amount::ZERO);
    }

    #[tokio::test]
    async fn test_duplicate_lock_rejected() {
        let (balance_mgr, escrow) = setup();
        let owner = AccountAddress::from_bytes([4; 32]);
        balance_mgr
            .credit(owner, Amount::from_units(10.0))
            .await
            .unwrap();

        let stake = EscrowType::NodeStake { node: owner };
        escrow
            .lock(stake.clone(), Amount::from_units(2.0), 0)
            .await
            .unwrap();
        assert!(matches!(
            escrow.lock(stake, Amount::from_units(2.0), 0).await,
            Err(MarketError::InvalidTransition(_))
        ));
        assert_eq!(escrow.vault_balance().await.unwrap(), Amount::from_units(2.0));
    }

    #[tokio::test]
    async fn test_top_up() {
        let (balance_mgr, escrow) = setup();
        let owner = AccountAddress::from_bytes([5; 32]);
        balance_mgr
            .credit(owner, Amount::from_units(10.0))
            .await
            .unwrap();

        let lock_id = escrow
            .lock(
                EscrowType::NodeStake { node: owner },
                Amount::from_units(3.0),
                0,
            )
            .await
            .unwrap();
        let total = escrow
            .top_up(&lock_id, Amount::from_units(4.0))
            .await
            .unwrap();

        assert_eq!(total, Amount::from_units(7.0));
        assert_eq!(escrow.get_lock(&lock_id).await.unwrap().amount, total);
        assert_eq!(escrow.vault_balance().await.unwrap(), total);
    }
}
