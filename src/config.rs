//! Process configuration: CLI flags plus the derived runtime `Config` the
//! controllers close over.

use clap::Parser;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::resource::MinValuesPolicy;

/// Command-line / environment-variable arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    pub health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    pub metrics_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,

    /// How long a NodeClaim may remain un-`Launched` before it is deleted.
    #[arg(long, env = "LAUNCH_TIMEOUT_SECS", default_value = "300")]
    pub launch_timeout_secs: u64,

    /// How long a `Launched` NodeClaim may remain un-`Registered`.
    #[arg(long, env = "REGISTRATION_TIMEOUT_SECS", default_value = "900")]
    pub registration_timeout_secs: u64,

    /// How long a `Registered` NodeClaim may remain un-`Initialized` before
    /// it stops counting as healthy (does not itself trigger deletion).
    #[arg(long, env = "INITIALIZATION_TIMEOUT_SECS", default_value = "900")]
    pub initialization_timeout_secs: u64,

    /// Interval at which the counter re-patches NodePool status.
    #[arg(long, env = "COUNTER_RESYNC_SECS", default_value = "5")]
    pub counter_resync_secs: u64,

    /// Whether `Truncate` fails closed or proceeds when min-values can't be
    /// satisfied within the requested item budget.
    #[arg(long, env = "MIN_VALUES_POLICY", default_value = "strict")]
    pub min_values_policy: String,

    /// Repeatable `key=value` feature gate overrides, e.g.
    /// `--feature-gate Hydration=false`.
    #[arg(long = "feature-gate", env = "FEATURE_GATES", value_delimiter = ',')]
    pub feature_gates: Vec<String>,
}

/// Parsed, validated runtime configuration built from [`Args`].
#[derive(Debug, Clone)]
pub struct Config {
    pub health_addr: String,
    pub metrics_addr: String,
    pub log_level: String,
    pub log_json: bool,
    pub launch_timeout: Duration,
    pub registration_timeout: Duration,
    pub initialization_timeout: Duration,
    pub counter_resync: Duration,
    pub min_values_policy: MinValuesPolicy,
    pub feature_gates: BTreeMap<String, bool>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            health_addr: "0.0.0.0:8081".into(),
            metrics_addr: "0.0.0.0:8080".into(),
            log_level: "info".into(),
            log_json: false,
            launch_timeout: Duration::from_secs(300),
            registration_timeout: Duration::from_secs(900),
            initialization_timeout: Duration::from_secs(900),
            counter_resync: Duration::from_secs(5),
            min_values_policy: MinValuesPolicy::Strict,
            feature_gates: BTreeMap::new(),
        }
    }
}

impl TryFrom<Args> for Config {
    type Error = Error;

    fn try_from(args: Args) -> Result<Config> {
        let min_values_policy = match args.min_values_policy.to_lowercase().as_str() {
            "strict" => MinValuesPolicy::Strict,
            "best-effort" | "besteffort" => MinValuesPolicy::BestEffort,
            other => {
                return Err(Error::Configuration(format!(
                    "unknown min-values-policy {other:?}, expected \"strict\" or \"best-effort\""
                )))
            }
        };

        let mut feature_gates = BTreeMap::new();
        for gate in &args.feature_gates {
            let (key, value) = gate.split_once('=').ok_or_else(|| {
                Error::Configuration(format!("feature gate {gate:?} must be key=value"))
            })?;
            let enabled = value.parse::<bool>().map_err(|_| {
                Error::Configuration(format!("feature gate {key:?} value must be true/false"))
            })?;
            feature_gates.insert(key.to_string(), enabled);
        }

        Ok(Config {
            health_addr: args.health_addr,
            metrics_addr: args.metrics_addr,
            log_level: args.log_level,
            log_json: args.log_json,
            launch_timeout: Duration::from_secs(args.launch_timeout_secs),
            registration_timeout: Duration::from_secs(args.registration_timeout_secs),
            initialization_timeout: Duration::from_secs(args.initialization_timeout_secs),
            counter_resync: Duration::from_secs(args.counter_resync_secs),
            min_values_policy,
            feature_gates,
        })
    }
}

impl Config {
    pub fn feature_enabled(&self, name: &str, default: bool) -> bool {
        self.feature_gates.get(name).copied().unwrap_or(default)
    }
}
