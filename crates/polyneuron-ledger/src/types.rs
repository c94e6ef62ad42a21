use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DECIMALS: u32 = 9;
pub const BASE_UNIT: u64 = 1_000_000_000; // 10^9

/// Native collateral amount, stored in base units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Self = Self(0);
    pub const MAX_SUPPLY: Self = Self(1_000_000_000 * BASE_UNIT); // 10^9 whole units

    pub fn from_units(units: f64) -> Self {
        Self((units * BASE_UNIT as f64).round() as u64)
    }

    pub fn from_base_units(base: u64) -> Self {
        Self(base)
    }

    pub fn to_units(&self) -> f64 {
        self.0 as f64 / BASE_UNIT as f64
    }

    pub fn to_base_units(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(&self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn checked_sub(&self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    pub fn saturating_add(&self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0).min(Self::MAX_SUPPLY.0))
    }

    pub fn saturating_sub(&self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.9} PNU", self.to_units())
    }
}

impl std::iter::Sum for Amount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, |acc, a| acc.saturating_add(a))
    }
}

/// 32-byte account identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountAddress([u8; 32]);

impl AccountAddress {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Deterministic address derived from a human-readable seed.
    pub fn from_seed(seed: &str) -> Self {
        Self(*blake3::hash(seed.as_bytes()).as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn from_hex(address: &str) -> Result<Self> {
        let stripped = address.strip_prefix("0x").unwrap_or(address);
        let bytes = hex::decode(stripped)?;
        if bytes.len() != 32 {
            bail!("Invalid address length: expected 32 bytes, got {}", bytes.len());
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }

    /// Shortened form for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }

    /// Custody account holding node stakes.
    pub fn stake_vault() -> Self {
        let mut bytes = [0xAA; 32];
        bytes[0] = 0x01;
        Self(bytes)
    }

    /// Custody account holding escrowed task rewards.
    pub fn task_escrow() -> Self {
        let mut bytes = [0xBB; 32];
        bytes[0] = 0x02;
        Self(bytes)
    }

    /// Bonus reserve fed by the funding pool.
    pub fn reserve_pool() -> Self {
        let mut bytes = [0xCC; 32];
        bytes[0] = 0x03;
        Self(bytes)
    }

    /// Whether this is one of the custody accounts above. Reserved addresses
    /// never act as a participant.
    pub fn is_reserved(&self) -> bool {
        *self == Self::stake_vault() || *self == Self::task_escrow() || *self == Self::reserve_pool()
    }
}

impl fmt::Display for AccountAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
