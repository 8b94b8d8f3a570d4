//! Configuration for evaluation instrumentation.
//!
//! [`EvaluationConfig`] decides which telemetry sinks are active, how dataset
//! rows are buffered and retried, and how large the background worker pool is.
//! Every section has serde defaults, so a partial JSON document (or none at all)
//! yields a usable configuration.

use crate::error::{EvaluationError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "AGENT_EVAL_";

/// Structured logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub level: String,
    /// Record tool-call trajectories and attach them to logs and dataset rows
    pub include_trajectories: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "INFO".to_string(),
            include_trajectories: true,
        }
    }
}

/// Distributed tracing settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    pub enabled: bool,
    /// Fraction of interactions that get a trace context, in `[0, 1]`
    pub sample_rate: f64,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_rate: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Evaluation dataset capture settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Opt-in: successful interactions become dataset rows
    pub auto_collect: bool,
    /// Destination table; `None` derives one from project and agent name
    pub storage_location: Option<String>,
    /// Rows buffered before an automatic flush
    pub buffer_size: usize,
    /// Retries granted to a row after its first failed write
    pub max_retries: u32,
    /// Fraction of successful interactions that are collected, in `[0, 1]`
    pub sample_rate: f64,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            auto_collect: false,
            storage_location: None,
            buffer_size: 10,
            max_retries: 3,
            sample_rate: 1.0,
        }
    }
}

/// Background worker pool settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub pool_size: usize,
    /// Jobs that may wait in the queue before new ones are dropped
    pub queue_capacity: usize,
    pub drain_timeout_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            queue_capacity: 1024,
            drain_timeout_ms: 5000,
        }
    }
}

impl WorkerConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Main configuration for agent evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationConfig {
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub agent_name: String,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub tracing: TracingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

impl EvaluationConfig {
    /// Create the default configuration for an agent
    pub fn default_for(project_id: impl Into<String>, agent_name: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            agent_name: agent_name.into(),
            logging: LoggingConfig::default(),
            tracing: TracingConfig::default(),
            metrics: MetricsConfig::default(),
            dataset: DatasetConfig::default(),
            worker: WorkerConfig::default(),
        }
    }

    /// Parse a JSON configuration document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration from the process environment
    ///
    /// A `.env` file is loaded first if present. Values for `project_id` and
    /// `agent_name` are used unless `AGENT_EVAL_PROJECT_ID` /
    /// `AGENT_EVAL_AGENT_NAME` override them.
    pub fn from_env(project_id: impl Into<String>, agent_name: impl Into<String>) -> Result<Self> {
        dotenv::dotenv().ok();
        let mut config = Self::default_for(project_id, agent_name);
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `AGENT_EVAL_*` overrides read through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(project_id) = get("PROJECT_ID") {
            self.project_id = project_id;
        }
        if let Some(agent_name) = get("AGENT_NAME") {
            self.agent_name = agent_name;
        }
        if let Some(level) = get("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(location) = get("DATASET_TABLE") {
            self.dataset.storage_location = Some(location);
        }

        override_parsed(&get, "LOGGING_ENABLED", &mut self.logging.enabled)?;
        override_parsed(&get, "TRACING_ENABLED", &mut self.tracing.enabled)?;
        override_parsed(&get, "TRACE_SAMPLE_RATE", &mut self.tracing.sample_rate)?;
        override_parsed(&get, "METRICS_ENABLED", &mut self.metrics.enabled)?;
        override_parsed(&get, "DATASET_AUTO_COLLECT", &mut self.dataset.auto_collect)?;
        override_parsed(&get, "DATASET_BUFFER_SIZE", &mut self.dataset.buffer_size)?;
        override_parsed(&get, "DATASET_MAX_RETRIES", &mut self.dataset.max_retries)?;
        override_parsed(&get, "WORKER_POOL_SIZE", &mut self.worker.pool_size)?;
        override_parsed(&get, "WORKER_QUEUE_CAPACITY", &mut self.worker.queue_capacity)?;

        Ok(())
    }

    /// Reject configurations the runtime cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.agent_name.trim().is_empty() {
            return Err(EvaluationError::ConfigError("agent_name must not be empty".to_string()));
        }
        if self.worker.pool_size == 0 {
            return Err(EvaluationError::ConfigError(
                "worker.pool_size must be at least 1".to_string(),
            ));
        }
        if self.worker.queue_capacity == 0 {
            return Err(EvaluationError::ConfigError(
                "worker.queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.dataset.buffer_size == 0 {
            return Err(EvaluationError::ConfigError(
                "dataset.buffer_size must be at least 1".to_string(),
            ));
        }
        check_rate("tracing.sample_rate", self.tracing.sample_rate)?;
        check_rate("dataset.sample_rate", self.dataset.sample_rate)?;
        Ok(())
    }

    /// Table that dataset rows are written to
    pub fn dataset_table(&self) -> String {
        self.dataset.storage_location.clone().unwrap_or_else(|| {
            format!("{}.agent_evaluation.{}_eval_dataset", self.project_id, self.agent_name)
        })
    }
}

fn override_parsed<T, G>(get: &G, name: &str, target: &mut T) -> Result<()>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    if let Some(raw) = get(name) {
        *target = raw.trim().parse().map_err(|_| {
            EvaluationError::ConfigError(format!("invalid value for {}{}: {}", ENV_PREFIX, name, raw))
        })?;
    }
    Ok(())
}

fn check_rate(name: &str, rate: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&rate) {
        return Err(EvaluationError::ConfigError(format!(
            "{} must be within [0, 1], got {}",
            name, rate
        )));
    }
    Ok(())
}
