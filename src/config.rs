//! Per-index configuration.
//!
//! An [`IndexConfig`] decides which workspace variant, commit policy and
//! work processor an index gets. It can be built in code, deserialized from
//! JSON, or read from flat `key = value` properties.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SluiceError};
use crate::optimizer::OptimizerConfig;
use crate::workspace::commit_policy::CommitPolicyKind;

/// Who owns the physical index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnershipMode {
    /// This process is the only writer; the writer may stay open between batches.
    #[default]
    Exclusive,
    /// Other processes may write too; the writer is closed as soon as it is idle.
    Shared,
}

/// How producers hand work to the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Producers block until their changeset has been applied.
    #[default]
    Sync,
    /// Producers enqueue and return immediately.
    Async,
}

/// Which workspace variant an index uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceKind {
    Exclusive,
    Shared,
    NearRealTime,
}

/// Configuration of one index backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Name used in logs and error reports.
    pub index_name: String,

    pub ownership: OwnershipMode,

    /// Serve near-real-time readers straight from the writer.
    pub near_real_time: bool,

    pub execution: ExecutionMode,

    /// Delay between background commits in async exclusive mode. Zero commits
    /// after every changeset instead.
    pub commit_interval_ms: u64,

    /// Bound of the async backlog; producers block once it is full.
    pub max_queue_length: usize,

    /// Whether the mapping metadata fully describes the index content.
    pub metadata_complete: bool,

    /// Size of the pool used to fan a batch out. One disables fan-out.
    pub worker_threads: usize,

    pub optimizer: OptimizerConfig,

    /// How long async shutdown waits for queued work.
    pub shutdown_timeout_ms: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            index_name: "default".to_string(),
            ownership: OwnershipMode::Exclusive,
            near_real_time: false,
            execution: ExecutionMode::Sync,
            commit_interval_ms: 1000,
            max_queue_length: 1000,
            metadata_complete: true,
            worker_threads: num_cpus::get(),
            optimizer: OptimizerConfig::default(),
            shutdown_timeout_ms: 10_000,
        }
    }
}

impl IndexConfig {
    pub fn builder() -> IndexConfigBuilder {
        IndexConfigBuilder::default()
    }

    /// Parse and validate a JSON configuration. Missing keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: IndexConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a configuration from flat properties.
    ///
    /// Recognized keys: `index_name`, `exclusive_index_use`, `indexmanager`,
    /// `worker.execution`, `index_flush_interval`, `max_queue_length`,
    /// `index_metadata_complete`, `worker.thread_pool.size`,
    /// `optimizer.operation_limit.max`, `optimizer.transaction_limit.max`,
    /// `shutdown_timeout`. Other keys are ignored.
    pub fn from_properties(properties: &HashMap<String, String>) -> Result<Self> {
        let mut config = IndexConfig::default();
        for (key, value) in properties {
            let value = value.trim();
            match key.as_str() {
                "index_name" => config.index_name = value.to_string(),
                "exclusive_index_use" => {
                    config.ownership = if parse_bool(key, value)? {
                        OwnershipMode::Exclusive
                    } else {
                        OwnershipMode::Shared
                    }
                }
                "indexmanager" => {
                    config.near_real_time = match value {
                        "near-real-time" => true,
                        "directory-based" => false,
                        other => {
                            return Err(SluiceError::invalid_config(format!(
                                "unknown index manager '{other}'"
                            )));
                        }
                    }
                }
                "worker.execution" => {
                    config.execution = match value {
                        "sync" => ExecutionMode::Sync,
                        "async" => ExecutionMode::Async,
                        other => {
                            return Err(SluiceError::invalid_config(format!(
                                "unknown execution mode '{other}'"
                            )));
                        }
                    }
                }
                "index_flush_interval" => config.commit_interval_ms = parse_number(key, value)?,
                "max_queue_length" => config.max_queue_length = parse_number(key, value)?,
                "index_metadata_complete" => config.metadata_complete = parse_bool(key, value)?,
                "worker.thread_pool.size" => config.worker_threads = parse_number(key, value)?,
                "optimizer.operation_limit.max" => {
                    config.optimizer.operation_limit = Some(parse_number(key, value)?)
                }
                "optimizer.transaction_limit.max" => {
                    config.optimizer.transaction_limit = Some(parse_number(key, value)?)
                }
                "shutdown_timeout" => config.shutdown_timeout_ms = parse_number(key, value)?,
                _ => log::debug!("ignoring unknown index property '{key}'"),
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.max_queue_length == 0 {
            return Err(SluiceError::invalid_config(
                "max_queue_length must be greater than 0",
            ));
        }
        if self.worker_threads == 0 {
            return Err(SluiceError::invalid_config(
                "worker_threads must be greater than 0",
            ));
        }
        if self.near_real_time && self.ownership == OwnershipMode::Shared {
            return Err(SluiceError::invalid_config(
                "near-real-time indexes require exclusive index use",
            ));
        }
        Ok(())
    }

    pub fn commit_interval(&self) -> Duration {
        Duration::from_millis(self.commit_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn workspace_kind(&self) -> WorkspaceKind {
        match (self.ownership, self.near_real_time) {
            (OwnershipMode::Shared, _) => WorkspaceKind::Shared,
            (OwnershipMode::Exclusive, true) => WorkspaceKind::NearRealTime,
            (OwnershipMode::Exclusive, false) => WorkspaceKind::Exclusive,
        }
    }

    /// The commit policy implied by ownership, NRT and execution mode.
    pub fn commit_policy_kind(&self) -> CommitPolicyKind {
        match self.workspace_kind() {
            WorkspaceKind::NearRealTime => CommitPolicyKind::NearRealTime,
            WorkspaceKind::Shared => CommitPolicyKind::SharedRefCounted,
            WorkspaceKind::Exclusive => match self.execution {
                ExecutionMode::Async if self.commit_interval_ms > 0 => {
                    CommitPolicyKind::Scheduled {
                        delay: self.commit_interval(),
                    }
                }
                _ => CommitPolicyKind::PerChangeset,
            },
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    value.parse::<bool>().map_err(|_| {
        SluiceError::invalid_config(format!("property '{key}' expects true/false, got '{value}'"))
    })
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse::<T>().map_err(|_| {
        SluiceError::invalid_config(format!("property '{key}' expects a number, got '{value}'"))
    })
}

#[derive(Debug, Default)]
pub struct IndexConfigBuilder {
    config: IndexConfig,
}

impl IndexConfigBuilder {
    pub fn index_name(mut self, name: impl Into<String>) -> Self {
        self.config.index_name = name.into();
        self
    }

    pub fn ownership(mut self, ownership: OwnershipMode) -> Self {
        self.config.ownership = ownership;
        self
    }

    pub fn near_real_time(mut self, enabled: bool) -> Self {
        self.config.near_real_time = enabled;
        self
    }

    pub fn execution(mut self, execution: ExecutionMode) -> Self {
        self.config.execution = execution;
        self
    }

    pub fn commit_interval(mut self, interval: Duration) -> Self {
        self.config.commit_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn max_queue_length(mut self, length: usize) -> Self {
        self.config.max_queue_length = length;
        self
    }

    pub fn metadata_complete(mut self, complete: bool) -> Self {
        self.config.metadata_complete = complete;
        self
    }

    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.config.worker_threads = threads;
        self
    }

    pub fn optimizer(mut self, optimizer: OptimizerConfig) -> Self {
        self.config.optimizer = optimizer;
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn build(self) -> Result<IndexConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
