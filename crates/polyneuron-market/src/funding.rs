use crate::{MarketError, Result};
use async_trait::async_trait;
use polyneuron_ledger::{AccountAddress, Amount, BalanceManager};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Sink for unconditional deposits from any account.
///
/// Deposits are not tied to any task and the marketplace never reads the pool
/// when deciding payouts.
#[async_trait]
pub trait FundingPool: Send + Sync {
    async fn deposit(&self, from: AccountAddress, amount: Amount) -> Result<()>;

    /// Total ever deposited through this pool.
    async fn total_deposited(&self) -> Amount;
}

/// Funding pool backed by a reserve account on the ledger.
pub struct ReservePool {
    ledger: Arc<BalanceManager>,
    reserve: AccountAddress,
    deposited: RwLock<Amount>,
}

impl ReservePool {
    pub fn new(ledger: Arc<BalanceManager>) -> Self {
        Self::with_address(ledger, AccountAddress::reserve_pool())
    }

    pub fn with_address(ledger: Arc<BalanceManager>, reserve: AccountAddress) -> Self {
        Self {
            ledger,
            reserve,
            deposited: RwLock::new(Amount::ZERO),
        }
    }

    pub fn address(&self) -> AccountAddress {
        self.reserve
    }

    pub async fn reserve_balance(&self) -> Result<Amount> {
        Ok(self.ledger.get_balance(self.reserve).await?)
    }
}

#[async_trait]
impl FundingPool for ReservePool {
    async fn deposit(&self, from: AccountAddress, amount: Amount) -> Result<()> {
        if from.is_reserved() {
            return Err(MarketError::ReservedIdentity(from));
        }
        if amount.is_zero() {
            return Ok(());
        }

        let available = self.ledger.get_balance(from).await?;
        if available < amount {
            return Err(MarketError::InsufficientBalance {
                account: from,
                needed: amount,
                available,
            });
        }

        let mut deposited = self.deposited.write().await;
        self.ledger
            .transfer(from, self.reserve, amount, "reserve_deposit")
            .await?;
        *deposited = deposited.saturating_add(amount);

        info!(
            from = %from.short(),
            amount = amount.to_units(),
            total_deposited = deposited.to_units(),
            "🏦 Reserve pool funded"
        );
        Ok(())
    }

    async fn total_deposited(&self) -> Amount {
        *self.deposited.read().await
    }
}
