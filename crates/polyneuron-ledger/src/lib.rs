//! Collateral ledger backing the PolyNeuron marketplace.
//!
//! Holds native-asset balances, performs atomic transfers inside storage
//! transactions and keeps a transfer history for audit. Stake and reward
//! custody are ordinary accounts (see [`AccountAddress::stake_vault`] and
//! [`AccountAddress::task_escrow`]).

pub mod balance;
pub mod storage;
pub mod types;

pub use balance::BalanceManager;
pub use storage::{LedgerStorage, MemoryStorage, TransactionRecord};
pub use types::{AccountAddress, Amount, BASE_UNIT, DECIMALS};
