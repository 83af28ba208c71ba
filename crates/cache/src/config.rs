//! Cache configuration
//!
//! Tunables are fixed at construction. Configuration can be built
//! programmatically, loaded from a TOML file or read from environment
//! variables.

use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the texture-unit cache
///
/// All fields are optional in TOML; missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Units held back for the host. Derived from the unit count when unset.
    pub reserved_count: Option<usize>,
    /// Maximum pending preload requests
    pub max_queue_size: usize,
    /// Eviction score added per idle millisecond
    pub priority_decay_rate: f64,
    /// Interval between garbage collection sweeps
    pub gc_interval_ms: u64,
    /// Idle time after which a texture is collected
    pub gc_max_idle_ms: u64,
    /// Interval between memory checks
    pub memory_check_interval_ms: u64,
    /// Utilization (0.0 to 1.0) above which the pressure sweep runs
    pub pressure_threshold: f64,
    /// Textures below this priority are evicted under pressure
    pub pressure_priority_cutoff: f32,
    /// Delay before streaming resumes after backing off for memory pressure
    pub streaming_cooldown_ms: u64,
    /// Capacity estimate when the GPU cannot report its video memory
    pub fallback_capacity_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            reserved_count: None,
            max_queue_size: 100,
            priority_decay_rate: 0.1,
            gc_interval_ms: 30_000,
            gc_max_idle_ms: 60_000,
            memory_check_interval_ms: 15_000,
            pressure_threshold: 0.85,
            pressure_priority_cutoff: 0.5,
            streaming_cooldown_ms: 1_000,
            fallback_capacity_bytes: 256 * 1024 * 1024, // 256 MB
        }
    }
}

impl CacheConfig {
    /// Sets the number of reserved units.
    pub fn with_reserved_count(mut self, reserved: usize) -> Self {
        self.reserved_count = Some(reserved);
        self
    }

    /// Sets the preload queue capacity.
    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    /// Sets the idle-time weight of the eviction score.
    pub fn with_priority_decay_rate(mut self, rate: f64) -> Self {
        self.priority_decay_rate = rate;
        self
    }

    /// Sets the garbage collection interval and idle limit.
    pub fn with_gc(mut self, interval_ms: u64, max_idle_ms: u64) -> Self {
        self.gc_interval_ms = interval_ms;
        self.gc_max_idle_ms = max_idle_ms;
        self
    }

    /// Sets the memory check interval.
    pub fn with_memory_check_interval_ms(mut self, interval_ms: u64) -> Self {
        self.memory_check_interval_ms = interval_ms;
        self
    }

    /// Sets the pressure threshold (0.0 to 1.0).
    pub fn with_pressure_threshold(mut self, threshold: f64) -> Self {
        self.pressure_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Sets the priority below which textures are evicted under pressure.
    pub fn with_pressure_priority_cutoff(mut self, cutoff: f32) -> Self {
        self.pressure_priority_cutoff = cutoff;
        self
    }

    /// Sets the streaming back-off delay.
    pub fn with_streaming_cooldown_ms(mut self, cooldown_ms: u64) -> Self {
        self.streaming_cooldown_ms = cooldown_ms;
        self
    }

    /// Sets the capacity used when the GPU reports no video memory size.
    pub fn with_fallback_capacity_bytes(mut self, bytes: u64) -> Self {
        self.fallback_capacity_bytes = bytes;
        self
    }

    /// Reserved units for a GPU with `total` units
    ///
    /// Defaults to 10% of the units, at most two.
    pub fn reserved_for(&self, total: usize) -> usize {
        self.reserved_count.unwrap_or_else(|| (total / 10).min(2))
    }

    /// Garbage collection interval
    pub fn gc_interval(&self) -> Duration {
        Duration::from_millis(self.gc_interval_ms)
    }

    /// Garbage collection idle limit
    pub fn gc_max_idle(&self) -> Duration {
        Duration::from_millis(self.gc_max_idle_ms)
    }

    /// Memory check interval
    pub fn memory_check_interval(&self) -> Duration {
        Duration::from_millis(self.memory_check_interval_ms)
    }

    /// Streaming back-off delay
    pub fn streaming_cooldown(&self) -> Duration {
        Duration::from_millis(self.streaming_cooldown_ms)
    }

    /// Loads configuration from environment variables.
    ///
    /// Environment variables:
    /// - `TEXSLOT_RESERVED_COUNT`
    /// - `TEXSLOT_MAX_QUEUE_SIZE` (default: 100)
    /// - `TEXSLOT_PRIORITY_DECAY_RATE` (default: 0.1)
    /// - `TEXSLOT_GC_INTERVAL_MS` (default: 30000)
    /// - `TEXSLOT_GC_MAX_IDLE_MS` (default: 60000)
    /// - `TEXSLOT_MEMORY_CHECK_INTERVAL_MS` (default: 15000)
    /// - `TEXSLOT_PRESSURE_THRESHOLD` (default: 0.85)
    /// - `TEXSLOT_PRESSURE_PRIORITY_CUTOFF` (default: 0.5)
    /// - `TEXSLOT_STREAMING_COOLDOWN_MS` (default: 1000)
    ///
    /// # Errors
    /// Returns an error if any environment variable contains an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = env_value("TEXSLOT_RESERVED_COUNT")? {
            config.reserved_count = Some(value);
        }
        if let Some(value) = env_value("TEXSLOT_MAX_QUEUE_SIZE")? {
            config.max_queue_size = value;
        }
        if let Some(value) = env_value("TEXSLOT_PRIORITY_DECAY_RATE")? {
            config.priority_decay_rate = value;
        }
        if let Some(value) = env_value("TEXSLOT_GC_INTERVAL_MS")? {
            config.gc_interval_ms = value;
        }
        if let Some(value) = env_value("TEXSLOT_GC_MAX_IDLE_MS")? {
            config.gc_max_idle_ms = value;
        }
        if let Some(value) = env_value("TEXSLOT_MEMORY_CHECK_INTERVAL_MS")? {
            config.memory_check_interval_ms = value;
        }
        if let Some(value) = env_value::<f64>("TEXSLOT_PRESSURE_THRESHOLD")? {
            config.pressure_threshold = value.clamp(0.0, 1.0);
        }
        if let Some(value) = env_value("TEXSLOT_PRESSURE_PRIORITY_CUTOFF")? {
            config.pressure_priority_cutoff = value;
        }
        if let Some(value) = env_value("TEXSLOT_STREAMING_COOLDOWN_MS")? {
            config.streaming_cooldown_ms = value;
        }

        Ok(config)
    }

    /// Loads configuration from a TOML file.
    ///
    /// Expected file format:
    /// ```toml
    /// reserved_count = 2
    /// max_queue_size = 100
    /// gc_interval_ms = 30000
    /// pressure_threshold = 0.85
    /// ```
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.pressure_threshold = config.pressure_threshold.clamp(0.0, 1.0);
        Ok(config)
    }

    /// Saves configuration to a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        fs::write(path.as_ref(), self.to_toml()?)?;
        Ok(())
    }

    /// Converts configuration to TOML format.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(self)?)
    }
}

fn env_value<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        Err(_) => Ok(None),
    }
}

/// Errors that can occur during configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid value for a configuration parameter
    #[error("invalid value for configuration key: {0}")]
    InvalidValue(String),
    /// I/O error reading or writing configuration file
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Malformed TOML
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// Configuration could not be serialized
    #[error("serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
