use crate::escrow::{EscrowManager, EscrowType};
use crate::types::{reputation_for, CognitiveNode};
use crate::{MarketError, Result};
use polyneuron_ledger::{AccountAddress, Amount, BalanceManager};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// What happens when an already-registered identity registers again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Fail with `NodeAlreadyRegistered`
    #[default]
    Reject,
    /// Add the new stake to the existing record; the label is kept
    TopUp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Minimum stake accepted by a single registration call
    pub min_stake: Amount,
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self::production()
    }
}

impl RegistryConfig {
    pub fn production() -> Self {
        Self {
            min_stake: Amount::from_units(100.0),
            duplicate_policy: DuplicatePolicy::Reject,
        }
    }

    pub fn devnet() -> Self {
        Self {
            min_stake: Amount::from_units(0.1),
            duplicate_policy: DuplicatePolicy::Reject,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    Registered(CognitiveNode),
    ToppedUp(CognitiveNode),
}

impl RegistrationOutcome {
    pub fn node(&self) -> &CognitiveNode {
        match self {
            Self::Registered(node) | Self::ToppedUp(node) => node,
        }
    }
}

/// Staked worker identities and their completion counters.
///
/// Stakes are custodied by an [`EscrowManager`] over the stake vault. The
/// registry is not synchronised on its own; the marketplace owns it and
/// serialises every call.
pub struct NodeRegistry {
    stake_escrow: EscrowManager,
    nodes: HashMap<AccountAddress, CognitiveNode>,
    config: RegistryConfig,
}

impl NodeRegistry {
    pub fn new(ledger: Arc<BalanceManager>, config: RegistryConfig) -> Self {
        Self {
            stake_escrow: EscrowManager::new(ledger, AccountAddress::stake_vault()),
            nodes: HashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Bond `stake` from `identity` and activate the node.
    ///
    /// The stake moves into custody before the record is written, and a failed
    /// move leaves no record behind.
    pub async fn register(
        &mut self,
        identity: AccountAddress,
        label: String,
        stake: Amount,
        now: u64,
    ) -> Result<RegistrationOutcome> {
        if identity.is_reserved() {
            return Err(MarketError::ReservedIdentity(identity));
        }
        if stake < self.config.min_stake {
            debug!(
                identity = %identity.short(),
                stake = stake.to_units(),
                min_stake = self.config.min_stake.to_units(),
                "Registration rejected: insufficient stake"
            );
            return Err(MarketError::InsufficientStake {
                required: self.config.min_stake,
                provided: stake,
            });
        }

        let lock = EscrowType::NodeStake { node: identity };

        if self.nodes.contains_key(&identity) {
            if self.config.duplicate_policy == DuplicatePolicy::Reject {
                return Err(MarketError::NodeAlreadyRegistered(identity));
            }

            let total = self
                .stake_escrow
                .top_up(&lock.to_lock_id(), stake)
                .await?;
            let node = self
                .nodes
                .get_mut(&identity)
                .ok_or(MarketError::NodeNotActive(identity))?;
            node.staked_amount = total;
            node.is_active = total >= self.config.min_stake;

            info!(
                identity = %identity.short(),
                label = %node.label,
                added = stake.to_units(),
                staked = total.to_units(),
                "➕ Node stake topped up"
            );
            return Ok(RegistrationOutcome::ToppedUp(node.clone()));
        }

        self.stake_escrow.lock(lock, stake, now).await?;

        let node = CognitiveNode {
            owner: identity,
            label,
            staked_amount: stake,
            is_active: true,
            tasks_completed: 0,
            reputation_score: 0,
            registered_at: now,
        };
        self.nodes.insert(identity, node.clone());

        info!(
            identity = %identity.short(),
            label = %node.label,
            staked = stake.to_units(),
            "🧠 Cognitive node registered"
        );

        Ok(RegistrationOutcome::Registered(node))
    }

    pub fn get_node(&self, identity: &AccountAddress) -> Option<&CognitiveNode> {
        self.nodes.get(identity)
    }

    pub fn is_active(&self, identity: &AccountAddress) -> bool {
        self.nodes
            .get(identity)
            .map(|node| node.is_active)
            .unwrap_or(false)
    }

    /// Credit one completed task worth `reward`. Only the marketplace's
    /// submission path calls this.
    pub(crate) fn record_completion(
        &mut self,
        identity: &AccountAddress,
        reward: Amount,
    ) -> Result<CognitiveNode> {
        let node = self
            .nodes
            .get_mut(identity)
            .ok_or(MarketError::NodeNotActive(*identity))?;
        node.tasks_completed += 1;
        node.reputation_score = node.reputation_score.saturating_add(reputation_for(reward));
        Ok(node.clone())
    }

    /// Undo a `record_completion` whose enclosing operation aborted.
    pub(crate) fn revert_completion(&mut self, identity: &AccountAddress, reward: Amount) {
        if let Some(node) = self.nodes.get_mut(identity) {
            node.tasks_completed = node.tasks_completed.saturating_sub(1);
            node.reputation_score = node.reputation_score.saturating_sub(reputation_for(reward));
        }
    }

    pub fn nodes(&self) -> impl Iterator<Item = &CognitiveNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.nodes.values().filter(|n| n.is_active).count()
    }

    pub fn total_staked(&self) -> Amount {
        self.nodes.values().map(|n| n.staked_amount).sum()
    }

    pub async fn stake_vault_balance(&self) -> Result<Amount> {
        self.stake_escrow.vault_balance().await
    }

    /// Check every node record against its stake lock.
    pub async fn verify_stakes(&self) -> Result<()> {
        for node in self.nodes.values() {
            let lock_id = EscrowType::NodeStake { node: node.owner }.to_lock_id();
            let locked = self.stake_escrow.get_lock(&lock_id).await?.amount;
            if locked != node.staked_amount {
                return Err(MarketError::InvariantViolation(format!(
                    "node {} records stake {} but lock holds {}",
                    node.owner.short(),
                    node.staked_amount,
                    locked
                )));
            }
        }
        Ok(())
    }
}
