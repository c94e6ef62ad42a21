use crate::types::{AccountAddress, Amount};
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Committed transfer, kept for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub from: AccountAddress,
    pub to: AccountAddress,
    pub amount: Amount,
    pub timestamp: DateTime<Utc>,
    pub tx_hash: String,
    pub memo: String,
}

type BalanceMap = HashMap<AccountAddress, Amount>;

#[async_trait]
pub trait LedgerStorage: Send + Sync {
    async fn get_balance(&self, address: AccountAddress) -> Result<Amount>;
    async fn set_balance(&self, address: AccountAddress, balance: Amount) -> Result<()>;
    async fn get_all_accounts(&self) -> Result<Vec<AccountAddress>>;

    async fn begin_transaction(&self) -> Result<()>;
    async fn commit_transaction(&self) -> Result<()>;
    async fn rollback_transaction(&self) -> Result<()>;

    async fn record_transaction(&self, tx: TransactionRecord) -> Result<()>;
    async fn get_transaction_history(&self, address: AccountAddress)
        -> Result<Vec<TransactionRecord>>;
}

/// In-memory backend. Transactions snapshot the balance map and restore it
/// on rollback; only one transaction may be open at a time.
pub struct MemoryStorage {
    balances: Arc<RwLock<BalanceMap>>,
    transaction_backup: Arc<RwLock<Option<BalanceMap>>>,
    transaction_history: Arc<RwLock<Vec<TransactionRecord>>>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            balances: Arc::new(RwLock::new(HashMap::new())),
            transaction_backup: Arc::new(RwLock::new(None)),
            transaction_history: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

#[async_trait]
impl LedgerStorage for MemoryStorage {
    async fn get_balance(&self, address: AccountAddress) -> Result<Amount> {
        let balances = self.balances.read().await;
        Ok(balances.get(&address).copied().unwrap_or(Amount::ZERO))
    }

    async fn set_balance(&self, address: AccountAddress, balance: Amount) -> Result<()> {
        let mut balances = self.balances.write().await;
        let old_balance = balances.get(&address).copied().unwrap_or(Amount::ZERO);

        if balance.is_zero() {
            balances.remove(&address);
        } else {
            balances.insert(address, balance);
        }

        if old_balance != balance {
            debug!(
                address = %address.short(),
                balance_before = old_balance.to_units(),
                balance_after = balance.to_units(),
                storage_type = "memory",
                "💾 Balance stored"
            );
        }
        Ok(())
    }

    async fn get_all_accounts(&self) -> Result<Vec<AccountAddress>> {
        let balances = self.balances.read().await;
        let mut accounts: Vec<AccountAddress> = balances.keys().copied().collect();
        accounts.sort();
        Ok(accounts)
    }

    async fn begin_transaction(&self) -> Result<()> {
        let balances = self.balances.read().await;
        let mut backup = self.transaction_backup.write().await;
        if backup.is_some() {
            bail!("Transaction already in progress");
        }
        *backup = Some(balances.clone());

        debug!(
            accounts_count = balances.len(),
            storage_type = "memory",
            "📝 Transaction began (snapshot created)"
        );
        Ok(())
    }

    async fn commit_transaction(&self) -> Result<()> {
        let mut backup = self.transaction_backup.write().await;
        if backup.take().is_none() {
            bail!("No transaction in progress");
        }
        debug!(storage_type = "memory", "✅ Transaction committed (snapshot discarded)");
        Ok(())
    }

    async fn rollback_transaction(&self) -> Result<()> {
        let mut backup = self.transaction_backup.write().await;
        let Some(snapshot) = backup.take() else {
            bail!("No transaction in progress");
        };

        let mut balances = self.balances.write().await;
        let accounts_before = balances.len();
        *balances = snapshot;

        info!(
            accounts_before,
            accounts_after = balances.len(),
            storage_type = "memory",
            "↩️ Transaction rolled back (snapshot restored)"
        );
        Ok(())
    }

    async fn record_transaction(&self, tx: TransactionRecord) -> Result<()> {
        let mut history = self.transaction_history.write().await;
        history.push(tx);
        Ok(())
    }

    async fn get_transaction_history(
        &self,
        address: AccountAddress,
    ) -> Result<Vec<TransactionRecord>> {
        let history = self.transaction_history.read().await;
        Ok(history
            .iter()
            .filter(|tx| tx.from == address || tx.to == address)
            .cloned()
            .collect())
    }
}
