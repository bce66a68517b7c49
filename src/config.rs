//! Runtime configuration.
//!
//! [`RuntimeConfig`] collects the knobs shared by the back-ends and the
//! algorithm layer: worker count, strand sizing for the enqueue-all
//! engines, and the spill batch size. Values can be set with builder
//! methods or pulled from the environment (`FRACTIME_*` variables).

use std::num::NonZeroUsize;
use std::thread;

/// Error raised when a configuration value cannot be parsed or is invalid.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable held a value that did not parse.
    #[error("invalid value for {var}: {value:?}")]
    InvalidValue {
        /// The offending variable name.
        var: &'static str,
        /// The raw value found in the environment.
        value: String,
    },
    /// A field was set to a value outside its legal range.
    #[error("{field} must be non-zero")]
    Zero {
        /// The offending field name.
        field: &'static str,
    },
}

/// Configuration for a fractime runtime instance.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Number of worker threads for the parallel back-end.
    pub workers: usize,
    /// Strands per worker used by the strand and progressive engines.
    pub strand_factor: u32,
    /// Consecutive enqueues performed by one strand task.
    pub enqueues_per_task: u32,
    /// Hard cap on the number of strands, regardless of worker count.
    pub max_strands: u32,
    /// Tasks a single spiller extracts from an over-full queue.
    pub spill_batch: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: thread::available_parallelism().map_or(1, NonZeroUsize::get),
            strand_factor: 4,
            enqueues_per_task: 4,
            max_strands: u32::MAX,
            spill_batch: 15,
        }
    }
}

impl RuntimeConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the worker thread count.
    #[must_use]
    pub const fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the strands-per-worker factor.
    #[must_use]
    pub const fn strand_factor(mut self, factor: u32) -> Self {
        self.strand_factor = factor;
        self
    }

    /// Sets the number of enqueues a strand task performs per slice.
    #[must_use]
    pub const fn enqueues_per_task(mut self, n: u32) -> Self {
        self.enqueues_per_task = n;
        self
    }

    /// Caps the total number of strands.
    #[must_use]
    pub const fn max_strands(mut self, cap: u32) -> Self {
        self.max_strands = cap;
        self
    }

    /// Sets the spill batch size.
    #[must_use]
    pub const fn spill_batch(mut self, n: u32) -> Self {
        self.spill_batch = n;
        self
    }

    /// Builds a configuration from defaults overridden by the
    /// environment: `FRACTIME_WORKERS`, `FRACTIME_STRAND_FACTOR`,
    /// `FRACTIME_ENQUEUES_PER_TASK`, `FRACTIME_MAX_STRANDS`,
    /// `FRACTIME_SPILL_BATCH`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is present but unparsable
    /// or zero where zero is illegal.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Some(v) = env_parse::<usize>("FRACTIME_WORKERS")? {
            cfg.workers = v;
        }
        if let Some(v) = env_parse::<u32>("FRACTIME_STRAND_FACTOR")? {
            cfg.strand_factor = v;
        }
        if let Some(v) = env_parse::<u32>("FRACTIME_ENQUEUES_PER_TASK")? {
            cfg.enqueues_per_task = v;
        }
        if let Some(v) = env_parse::<u32>("FRACTIME_MAX_STRANDS")? {
            cfg.max_strands = v;
        }
        if let Some(v) = env_parse::<u32>("FRACTIME_SPILL_BATCH")? {
            cfg.spill_batch = v;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Checks the configuration for illegal values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Zero`] for fields that must be non-zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Zero { field: "workers" });
        }
        if self.strand_factor == 0 {
            return Err(ConfigError::Zero {
                field: "strand_factor",
            });
        }
        if self.enqueues_per_task == 0 {
            return Err(ConfigError::Zero {
                field: "enqueues_per_task",
            });
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { var, value: raw }),
        Err(_) => Ok(None),
    }
}
