use crate::storage::{LedgerStorage, TransactionRecord};
use crate::types::{AccountAddress, Amount};
use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Account balances over a pluggable storage backend.
///
/// Every mutation holds `write_lock`, so a transfer's begin/commit window never
/// overlaps another mutation and storage snapshots stay consistent.
pub struct BalanceManager {
    storage: Arc<dyn LedgerStorage>,
    write_lock: Mutex<()>,
    nonce: AtomicU64,
}

impl BalanceManager {
    pub fn new(storage: Arc<dyn LedgerStorage>) -> Self {
        Self {
            storage,
            write_lock: Mutex::new(()),
            nonce: AtomicU64::new(0),
        }
    }

    pub async fn get_balance(&self, address: AccountAddress) -> Result<Amount> {
        self.storage.get_balance(address).await
    }

    /// Mint `amount` into `address`. Used for genesis funding and faucets.
    pub async fn credit(&self, address: AccountAddress, amount: Amount) -> Result<()> {
        if amount.is_zero() {
            return Ok(());
        }

        let _guard = self.write_lock.lock().await;
        let current = self.storage.get_balance(address).await?;
        let new_balance = current
            .checked_add(amount)
            .ok_or_else(|| anyhow!("Balance overflow for {}", address))?;

        if new_balance > Amount::MAX_SUPPLY {
            bail!("Balance would exceed max supply");
        }

        self.storage.set_balance(address, new_balance).await?;

        info!(
            address = %address.short(),
            amount = amount.to_units(),
            balance_before = current.to_units(),
            balance_after = new_balance.to_units(),
            "💰 Balance credited"
        );
        Ok(())
    }

    /// Burn `amount` from `address`.
    pub async fn debit(&self, address: AccountAddress, amount: Amount) -> Result<()> {
        if amount.is_zero() {
            return Ok(());
        }

        let _guard = self.write_lock.lock().await;
        let current = self.storage.get_balance(address).await?;
        let new_balance = current.checked_sub(amount).ok_or_else(|| {
            anyhow!(
                "Insufficient balance for {}: has {}, needs {}",
                address,
                current,
                amount
            )
        })?;

        self.storage.set_balance(address, new_balance).await?;

        info!(
            address = %address.short(),
            amount = amount.to_units(),
            balance_before = current.to_units(),
            balance_after = new_balance.to_units(),
            "💸 Balance debited"
        );
        Ok(())
    }

    /// Move `amount` from `from` to `to` inside a storage transaction.
    ///
    /// Either both balances change or neither does.
    pub async fn transfer(
        &self,
        from: AccountAddress,
        to: AccountAddress,
        amount: Amount,
        memo: &str,
    ) -> Result<()> {
        if amount.is_zero() {
            return Ok(());
        }

        if from == to {
            bail!("Cannot transfer to same address");
        }

        let _guard = self.write_lock.lock().await;
        self.storage.begin_transaction().await?;

        match self.transfer_internal(from, to, amount).await {
            Ok(tx_hash) => {
                self.storage.commit_transaction().await?;

                let record = TransactionRecord {
                    from,
                    to,
                    amount,
                    timestamp: Utc::now(),
                    tx_hash: tx_hash.clone(),
                    memo: memo.to_string(),
                };

                // History is best-effort; the balances are already committed
                if let Err(e) = self.storage.record_transaction(record).await {
                    debug!(tx_hash = %tx_hash, error = %e, "Failed to record transaction");
                }

                info!(
                    from = %from.short(),
                    to = %to.short(),
                    amount = amount.to_units(),
                    tx_hash = %tx_hash,
                    memo,
                    "✅ Transfer committed"
                );
                Ok(())
            }
            Err(e) => {
                info!(
                    from = %from.short(),
                    to = %to.short(),
                    amount = amount.to_units(),
                    error = %e,
                    "❌ Transfer rolled back"
                );
                self.storage.rollback_transaction().await?;
                Err(e)
            }
        }
    }

    async fn transfer_internal(
        &self,
        from: AccountAddress,
        to: AccountAddress,
        amount: Amount,
    ) -> Result<String> {
        let from_balance = self.storage.get_balance(from).await?;
        if from_balance < amount {
            bail!(
                "Insufficient balance: {} has {}, needs {}",
                from,
                from_balance,
                amount
            );
        }

        let to_balance = self.storage.get_balance(to).await?;
        let new_from_balance = from_balance.saturating_sub(amount);
        let new_to_balance = to_balance
            .checked_add(amount)
            .ok_or_else(|| anyhow!("Balance overflow for recipient"))?;

        self.storage.set_balance(from, new_from_balance).await?;
        self.storage.set_balance(to, new_to_balance).await?;

        let nonce = self.nonce.fetch_add(1, Ordering::SeqCst);
        let mut hasher = blake3::Hasher::new();
        hasher.update(from.as_bytes());
        hasher.update(to.as_bytes());
        hasher.update(&amount.to_base_units().to_le_bytes());
        hasher.update(&nonce.to_le_bytes());
        Ok(hex::encode(hasher.finalize().as_bytes()))
    }

    /// Sum of every account balance.
    pub async fn total_supply(&self) -> Result<Amount> {
        let mut total = Amount::ZERO;
        for address in self.storage.get_all_accounts().await? {
            let balance = self.storage.get_balance(address).await?;
            total = total
                .checked_add(balance)
                .ok_or_else(|| anyhow!("Supply overflow"))?;
        }
        Ok(total)
    }

    pub async fn get_transaction_history(
        &self,
        address: AccountAddress,
    ) -> Result<Vec<TransactionRecord>> {
        self.storage.get_transaction_history(address).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[tokio::test]
    async fn test_basic_operations() {
        let storage = Arc::new(MemoryStorage::new());
        let manager = BalanceManager::new(storage);

        let addr1 = AccountAddress::from_bytes([1; 32]);
        let addr2 = AccountAddress::from_bytes([2; 32]);

        let amount = Amount::from_units(100.0);
        manager.credit(addr1, amount).await.unwrap();
        assert_eq!(manager.get_balance(addr1).await.unwrap(), amount);

        manager
            .transfer(addr1, addr2, Amount::from_units(30.0), "test")
            .await
            .unwrap();

        assert_eq!(
            manager.get_balance(addr1).await.unwrap(),
            Amount::from_units(70.0)
        );
        assert_eq!(
            manager.get_balance(addr2).await.unwrap(),
            Amount::from_units(30.0)
        );

        manager
            .debit(addr1, Amount::from_units(20.0))
            .await
            .unwrap();
        assert_eq!(
            manager.get_balance(addr1).await.unwrap(),
            Amount::from_units(50.0)
        );
        assert_eq!(
            manager.total_supply().await.unwrap(),
            Amount::from_units(80.0)
        );
    }

    #[tokio::test]
    async fn test_insufficient_balance() {
        let storage = Arc::new(MemoryStorage::new());
        let manager = BalanceManager::new(storage);

        let addr1 = AccountAddress::from_bytes([4; 32]);
        let addr2 = AccountAddress::from_bytes([5; 32]);

        manager
            .credit(addr1, Amount::from_units(50.0))
            .await
            .unwrap();

        assert!(manager
            .transfer(addr1, addr2, Amount::from_units(100.0), "too much")
            .await
            .is_err());
        assert!(manager
            .debit(addr2, Amount::from_units(1.0))
            .await
            .is_err());

        // Balances unchanged after the failed transfer
        assert_eq!(
            manager.get_balance(addr1).await.unwrap(),
            Amount::from_units(50.0)
        );
        assert_eq!(manager.get_balance(addr2).await.unwrap(), Amount::ZERO);
        assert!(manager
            .get_transaction_history(addr1)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_self_transfer_rejected() {
        let storage = Arc::new(MemoryStorage::new());
        let manager = BalanceManager::new(storage);
        let addr = AccountAddress::from_bytes([6; 32]);
        manager.credit(addr, Amount::from_units(1.0)).await.unwrap();

        assert!(manager
            .transfer(addr, addr, Amount::from_units(1.0), "loop")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_transaction_history() {
        let storage = Arc::new(MemoryStorage::new());
        let manager = BalanceManager::new(storage);

        let alice = AccountAddress::from_bytes([7; 32]);
        let bob = AccountAddress::from_bytes([8; 32]);
        let carol = AccountAddress::from_bytes([9; 32]);

        manager.credit(alice, Amount::from_units(10.0)).await.unwrap();
        manager
            .transfer(alice, bob, Amount::from_units(2.0), "first")
            .await
            .unwrap();
        manager
            .transfer(alice, carol, Amount::from_units(3.0), "second")
            .await
            .unwrap();

        let alice_history = manager.get_transaction_history(alice).await.unwrap();
        assert_eq!(alice_history.len(), 2);
        assert_ne!(alice_history[0].tx_hash, alice_history[1].tx_hash);

        let bob_history = manager.get_transaction_history(bob).await.unwrap();
        assert_eq!(bob_history.len(), 1);
        assert_eq!(bob_history[0].memo, "first");
    }
}
