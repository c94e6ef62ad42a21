/*!
# PolyNeuron Marketplace

Staked worker registry and a reasoning-task marketplace with escrowed rewards.

## Design Principles

- **Staked Participation**: Only nodes that bonded the minimum stake may claim work
- **Escrowed Rewards**: A task's reward sits in the escrow vault until the assignee submits
- **Single Serializer**: Every mutating operation commits under one lock, in one total order
- **Observable**: Each committed change appends an ordered event

## Module Structure

- **types**: Node and task records, task status, stats
- **lifecycle**: Transition rules for task states
- **registry**: Node registration and completion counters
- **marketplace**: Task creation, assignment and submission
- **escrow**: Vault-backed custody of stakes and rewards
- **events**: Ordered event log with live subscription
- **funding**: Unconditional deposits into the reserve pool
- **clock**: Time source
- **error**: Marketplace errors

## Example Usage

```rust,no_run
use polyneuron_ledger::{AccountAddress, Amount, BalanceManager, MemoryStorage};
use polyneuron_market::{fingerprint, MarketConfig, Marketplace};
use std::sync::Arc;

# async fn example() -> polyneuron_market::Result<()> {
let ledger = Arc::new(BalanceManager::new(Arc::new(MemoryStorage::new())));
let market = Marketplace::new(ledger.clone(), MarketConfig::production());

let worker = AccountAddress::from_seed("worker");
let requester = AccountAddress::from_seed("requester");
ledger.credit(worker, Amount::from_units(100.0)).await?;
ledger.credit(requester, Amount::from_units(1.0)).await?;

market.register_node(worker, "node-alpha", Amount::from_units(100.0)).await?;
let task_id = market
    .create_task(
        requester,
        "market_prediction",
        fingerprint(b"BTC/USD 24h"),
        market.now() + 3600,
        Amount::from_units(1.0),
    )
    .await?;
market.assign_task(worker, task_id).await?;
market.submit_task_result(worker, task_id, fingerprint(b"up")).await?;
# Ok(())
# }
```
*/

pub mod clock;
pub mod error;
pub mod escrow;
pub mod events;
pub mod funding;
pub mod lifecycle;
pub mod marketplace;
pub mod registry;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{MarketError, Result};
pub use escrow::{EscrowManager, EscrowType, LockId, LockMetadata};
pub use events::{EventLog, EventRecord, MarketEvent, DEFAULT_EVENT_BUFFER};
pub use funding::{FundingPool, ReservePool};
pub use lifecycle::LifecycleState;
pub use marketplace::{MarketConfig, Marketplace};
pub use registry::{DuplicatePolicy, NodeRegistry, RegistrationOutcome, RegistryConfig};
pub use types::{
    fingerprint, reputation_for, CognitiveNode, Hash, MarketStats, ReasoningTask, TaskId,
    TaskStatus,
};
