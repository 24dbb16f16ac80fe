//! Configuration types for the stream processor
//!
//! The settings here select an implementation strategy only (row or columnar
//! execution, batch capacity, parallelism). They never change the observable
//! output of a query.

use crate::error::{ProcessorError, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default capacity of a columnar batch
pub const DEFAULT_DATA_BATCH_SIZE: usize = 80_000;

/// Main processor configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Run every operator on rows instead of columnar batches
    #[serde(default)]
    pub force_row_based_execution: bool,

    /// Reject plans that would need to fall back to row-based execution
    #[serde(default)]
    pub dont_fall_back_to_row_based_execution: bool,

    /// Capacity of a columnar batch and ingress flush threshold
    #[serde(default = "default_data_batch_size")]
    pub data_batch_size: usize,

    /// Number of parallel chunks used by stateless operators
    #[serde(default = "default_arity")]
    pub map_arity: usize,

    /// Number of key shards used by keyed operators
    #[serde(default = "default_arity")]
    pub reduce_arity: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            force_row_based_execution: false,
            dont_fall_back_to_row_based_execution: false,
            data_batch_size: default_data_batch_size(),
            map_arity: default_arity(),
            reduce_arity: default_arity(),
        }
    }
}

/// How batches are represented while flowing between operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One event at a time, stored as rows
    Row,
    /// Fixed-capacity struct-of-arrays batches
    Columnar,
}

impl ProcessorConfig {
    /// Load configuration from an optional YAML file and `TEMPO_`-prefixed
    /// environment variables, on top of the defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(ProcessorConfig::default()));

        if let Some(path) = config_path {
            figment = figment.merge(Yaml::file(path));
        }

        figment = figment.merge(Env::prefixed("TEMPO_"));

        let config: ProcessorConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.data_batch_size == 0 {
            return Err(ProcessorError::Configuration(
                "data_batch_size must be greater than 0".to_string(),
            ));
        }

        if self.map_arity == 0 {
            return Err(ProcessorError::Configuration(
                "map_arity must be greater than 0".to_string(),
            ));
        }

        if self.reduce_arity == 0 {
            return Err(ProcessorError::Configuration(
                "reduce_arity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Execution mode selected by this configuration
    pub fn execution_mode(&self) -> ExecutionMode {
        if self.force_row_based_execution {
            ExecutionMode::Row
        } else {
            ExecutionMode::Columnar
        }
    }

    pub fn with_force_row_based_execution(mut self, force: bool) -> Self {
        self.force_row_based_execution = force;
        self
    }

    pub fn with_dont_fall_back_to_row_based_execution(mut self, strict: bool) -> Self {
        self.dont_fall_back_to_row_based_execution = strict;
        self
    }

    pub fn with_data_batch_size(mut self, size: usize) -> Self {
        self.data_batch_size = size;
        self
    }

    pub fn with_map_arity(mut self, arity: usize) -> Self {
        self.map_arity = arity;
        self
    }

    pub fn with_reduce_arity(mut self, arity: usize) -> Self {
        self.reduce_arity = arity;
        self
    }
}

fn default_data_batch_size() -> usize {
    DEFAULT_DATA_BATCH_SIZE
}

fn default_arity() -> usize {
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = ProcessorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.execution_mode(), ExecutionMode::Columnar);
        assert_eq!(config.data_batch_size, DEFAULT_DATA_BATCH_SIZE);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let config = ProcessorConfig::default().with_data_batch_size(0);
        assert!(matches!(
            config.validate(),
            Err(ProcessorError::Configuration(_))
        ));
    }

    #[test]
    fn test_zero_arity_rejected() {
        assert!(ProcessorConfig::default().with_map_arity(0).validate().is_err());
        assert!(ProcessorConfig::default()
            .with_reduce_arity(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_force_row_based() {
        let config = ProcessorConfig::default().with_force_row_based_execution(true);
        assert_eq!(config.execution_mode(), ExecutionMode::Row);
    }

    #[test]
    fn test_load_from_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "force_row_based_execution: true").unwrap();
        writeln!(file, "data_batch_size: 100").unwrap();

        let config = ProcessorConfig::load(Some(file.path().to_path_buf())).unwrap();
        assert!(config.force_row_based_execution);
        assert_eq!(config.data_batch_size, 100);
        assert_eq!(config.reduce_arity, 1);
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "map_arity: 0").unwrap();

        let err = ProcessorConfig::load(Some(file.path().to_path_buf())).unwrap_err();
        assert!(matches!(err, ProcessorError::Configuration(_)));
    }

    #[test]
    fn test_serde_defaults_fill_missing_fields() {
        let config: ProcessorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ProcessorConfig::default());
    }
}
