// Layered settings: built-in defaults, then an optional TOML file, then
// `LEXLEDGER__SECTION__KEY` environment overrides.

use anyhow::{Context, Result};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use lexledger_attest::QuorumPolicy;
use lexledger_custody::SealPolicy;
use lexledger_sync::SyncPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub log_filter: String,
    pub sync: SyncPolicy,
    pub seal: SealPolicy,
    pub quorum: QuorumPolicy,
    pub simulation: SimulationSettings,
}

/// Knobs of the in-process lifecycle run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    pub clerk_address: String,
    /// Participant reads that see a not-yet-included create.
    pub visibility_lag: usize,
    /// Ledger audit writes that fail before one succeeds.
    pub ledger_audit_failures: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            log_filter: "info".to_string(),
            sync: SyncPolicy::default(),
            seal: SealPolicy::default(),
            quorum: QuorumPolicy::default(),
            simulation: SimulationSettings::default(),
        }
    }
}

impl Default for SimulationSettings {
    fn default() -> Self {
        SimulationSettings {
            clerk_address: format!("0x{}", "c1".repeat(20)),
            visibility_lag: 1,
            ledger_audit_failures: 0,
        }
    }
}

impl Settings {
    pub fn load(path: Option<&Path>) -> Result<Settings> {
        let mut builder = defaults()?;
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }
        finish(builder.add_source(environment()))
    }

    pub fn validate(&self) -> Result<()> {
        self.sync.validate().context("invalid [sync] settings")?;
        self.seal.validate().context("invalid [seal] settings")?;
        self.quorum.validate().context("invalid [quorum] settings")?;
        Ok(())
    }
}

fn defaults() -> Result<ConfigBuilder<DefaultState>> {
    let base = Config::try_from(&Settings::default()).context("serializing default settings")?;
    Ok(Config::builder().add_source(base))
}

fn environment() -> Environment {
    Environment::with_prefix("LEXLEDGER")
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}

fn finish(builder: ConfigBuilder<DefaultState>) -> Result<Settings> {
    let settings: Settings = builder
        .build()
        .context("reading configuration")?
        .try_deserialize()
        .context("decoding configuration")?;
    settings.validate()?;
    Ok(settings)
}
