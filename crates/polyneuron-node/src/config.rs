use anyhow::{bail, Context, Result};
use polyneuron_ledger::Amount;
use polyneuron_market::{DuplicatePolicy, MarketConfig, RegistryConfig, DEFAULT_EVENT_BUFFER};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "polyneuron.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub market: MarketSettings,
    pub logging: LoggingConfig,
    pub simulation: SimulationConfig,
}

/// Marketplace parameters, with amounts in whole units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketSettings {
    pub min_stake: f64,
    pub duplicate_policy: DuplicatePolicy,
    pub max_task_duration_secs: Option<u64>,
    pub enforce_deadline_on_submit: bool,
    pub event_buffer: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// One of "pretty", "compact" or "json"
    pub format: String,
    pub file_output: Option<PathBuf>,
    pub module_filters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub workers: usize,
    pub tasks: usize,
    pub worker_funds: f64,
    pub requester_funds: f64,
    pub stake: f64,
    pub reward: f64,
    pub task_ttl_secs: u64,
    pub reserve_deposit: f64,
    pub task_types: Vec<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::production()
    }
}

impl Default for MarketSettings {
    fn default() -> Self {
        Self {
            min_stake: 100.0,
            duplicate_policy: DuplicatePolicy::Reject,
            max_task_duration_secs: None,
            enforce_deadline_on_submit: false,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_output: None,
            module_filters: BTreeMap::new(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            tasks: 6,
            worker_funds: 250.0,
            requester_funds: 50.0,
            stake: 100.0,
            reward: 1.0,
            task_ttl_secs: 3600,
            reserve_deposit: 5.0,
            task_types: vec![
                "market_prediction".to_string(),
                "classification".to_string(),
                "summarization".to_string(),
            ],
        }
    }
}

impl From<&MarketSettings> for MarketConfig {
    fn from(settings: &MarketSettings) -> Self {
        MarketConfig {
            registry: RegistryConfig {
                min_stake: Amount::from_units(settings.min_stake),
                duplicate_policy: settings.duplicate_policy,
            },
            max_task_duration_secs: settings.max_task_duration_secs,
            enforce_deadline_on_submit: settings.enforce_deadline_on_submit,
            event_buffer: settings.event_buffer,
        }
    }
}

impl NodeConfig {
    pub fn production() -> Self {
        Self {
            market: MarketSettings::default(),
            logging: LoggingConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }

    /// Low stakes and verbose logs for local experimentation.
    pub fn devnet() -> Self {
        Self {
            market: MarketSettings {
                min_stake: 0.1,
                max_task_duration_secs: Some(86_400),
                ..MarketSettings::default()
            },
            logging: LoggingConfig {
                level: "debug".to_string(),
                format: "compact".to_string(),
                ..LoggingConfig::default()
            },
            simulation: SimulationConfig {
                worker_funds: 10.0,
                requester_funds: 10.0,
                stake: 0.5,
                reward: 0.25,
                reserve_deposit: 1.0,
                ..SimulationConfig::default()
            },
        }
    }

    pub fn preset(name: &str) -> Result<Self> {
        match name {
            "production" => Ok(Self::production()),
            "devnet" => Ok(Self::devnet()),
            other => bail!("Unknown preset '{}' (expected production or devnet)", other),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        // Env overrides are applied by the caller to keep precedence explicit
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject amounts that cannot be represented on the ledger. Negative or
    /// non-finite values would otherwise saturate to zero.
    pub fn validate(&self) -> Result<()> {
        let sim = &self.simulation;
        let amounts = [
            ("market.min_stake", self.market.min_stake),
            ("simulation.worker_funds", sim.worker_funds),
            ("simulation.requester_funds", sim.requester_funds),
            ("simulation.stake", sim.stake),
            ("simulation.reward", sim.reward),
            ("simulation.reserve_deposit", sim.reserve_deposit),
        ];
        for (name, value) in amounts {
            if !value.is_finite() || value < 0.0 {
                bail!("{} must be a finite, non-negative amount (got {})", name, value);
            }
        }
        Ok(())
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(min_stake) = env::var("POLYNEURON_MIN_STAKE") {
            if let Ok(value) = min_stake.parse::<f64>() {
                if value.is_finite() && value >= 0.0 {
                    self.market.min_stake = value;
                }
            }
        }
        if let Ok(enforce) = env::var("POLYNEURON_ENFORCE_SUBMIT_DEADLINE") {
            self.market.enforce_deadline_on_submit =
                matches!(enforce.to_lowercase().as_str(), "1" | "true" | "yes");
        }

        if let Ok(level) = env::var("POLYNEURON_LOG_LEVEL") {
            if !level.is_empty() {
                self.logging.level = level;
            }
        }
        if let Ok(format) = env::var("POLYNEURON_LOG_FORMAT") {
            if !format.is_empty() {
                self.logging.format = format;
            }
        }
    }

    pub fn market_config(&self) -> MarketConfig {
        MarketConfig::from(&self.market)
    }
}
