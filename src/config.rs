//! Configuration management for ekman.
//!
//! This module handles the layered configuration system with the following precedence:
//! 1. Command-line arguments (highest priority)
//! 2. Environment variables
//! 3. JSON config file
//! 4. Default values (lowest priority)

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::derived::{EarthModel, EARTH_RADIUS, KM_PER_DEGREE};
use crate::domain::cache::DomainCache;
use crate::domain::SamplingMode;
use crate::error::{EkmanError, Result};

/// Command-line arguments for ekman
#[derive(Parser, Debug)]
#[command(name = "ekman")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the JSON grid document to process
    pub input: PathBuf,

    /// Operation to apply (summary, subset, average_over_time, sum_over_time,
    /// wind_speed, relative_vorticity, divergence, slice_level)
    #[arg(short, long, env = "EKMAN_OPERATION", default_value = "summary")]
    pub operation: String,

    /// Second grid document (the v component for wind operations)
    #[arg(long, env = "EKMAN_SECOND")]
    pub second: Option<PathBuf>,

    /// Vertical level for slice_level, in hPa
    #[arg(long, env = "EKMAN_LEVEL")]
    pub level: Option<f64>,

    /// Horizontal stride for subset
    #[arg(long, env = "EKMAN_STRIDE", default_value = "2")]
    pub stride: usize,

    /// Vertical stride for subset, defaults to --stride on volumes
    #[arg(long, env = "EKMAN_STRIDE_Z")]
    pub stride_z: Option<usize>,

    /// Path to JSON configuration file
    #[arg(short, long, env = "EKMAN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "EKMAN_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Sampling mode where the caller decides (nearest_neighbor, weighted_average)
    #[arg(long, env = "EKMAN_SAMPLING")]
    pub sampling: Option<String>,
}

impl Args {
    /// Subset strides (x, y, z) for a domain of the given manifold dimension.
    /// A 2D manifold has no vertical index to stride over.
    pub fn subset_strides(&self, manifold_dimension: usize) -> (usize, usize, usize) {
        let z = if manifold_dimension < 3 {
            1
        } else {
            self.stride_z.unwrap_or(self.stride)
        };
        (self.stride, self.stride, z)
    }
}

/// Engine behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Sampling mode used when an operation leaves the choice to the caller
    #[serde(default = "default_sampling_mode")]
    pub sampling_mode: SamplingMode,

    /// Latitude (degrees) whose cosine bounds longitudinal derivatives near the poles
    #[serde(default = "default_min_cos_latitude_deg")]
    pub min_cos_latitude_deg: f64,

    /// Apply the conventional minus sign to isentropic potential vorticity
    #[serde(default)]
    pub ipv_conventional_sign: bool,

    /// Earth radius (m) used by spherical operators
    #[serde(default = "default_earth_radius_m")]
    pub earth_radius_m: f64,
}

/// Domain cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,

    /// Maximum number of cached domains before the oldest is evicted
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

/// Complete configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Config {
    /// Load configuration from all sources with proper precedence
    pub fn load() -> Result<(Self, Args)> {
        let args = Args::parse();
        let config = Self::from_args(&args)?;
        Ok((config, args))
    }

    /// Defaults, then the file named by `args.config`, then the flags
    pub fn from_args(args: &Args) -> Result<Self> {
        // Start with defaults
        let mut config = Config::default();

        // Load from JSON file if provided
        if let Some(config_path) = &args.config {
            let json_config = Self::load_from_file(config_path)?;
            config.merge(json_config);
        }

        // Override with command-line arguments and environment
        if let Some(level) = &args.log_level {
            config.log_level = level.clone();
        }
        if let Some(sampling) = &args.sampling {
            config.engine.sampling_mode = sampling.parse().map_err(|_| EkmanError::Config {
                message: format!(
                    "Invalid sampling mode: {}. Must be one of: nearest_neighbor, weighted_average",
                    sampling
                ),
            })?;
        }

        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Merge another config into this one (other takes precedence)
    pub fn merge(&mut self, other: Config) {
        self.engine = other.engine;
        self.cache = other.cache;
        self.log_level = other.log_level;
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        // Validate log level
        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(EkmanError::Config {
                    message: format!(
                        "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                        self.log_level
                    ),
                });
            }
        }

        let guard = self.engine.min_cos_latitude_deg;
        if !(guard > 0.0 && guard < 90.0) {
            return Err(EkmanError::Config {
                message: format!("min_cos_latitude_deg must be inside (0, 90), got {}", guard),
            });
        }

        if !(self.engine.earth_radius_m.is_finite() && self.engine.earth_radius_m > 0.0) {
            return Err(EkmanError::Config {
                message: format!("earth_radius_m must be positive, got {}", self.engine.earth_radius_m),
            });
        }

        if self.cache.enabled && self.cache.max_entries == 0 {
            return Err(EkmanError::Config {
                message: "cache.max_entries cannot be 0 when the cache is enabled".to_string(),
            });
        }

        Ok(())
    }

    /// Earth model for the differential operators
    pub fn earth_model(&self) -> EarthModel {
        EarthModel {
            radius_m: self.engine.earth_radius_m,
            km_per_degree: KM_PER_DEGREE * self.engine.earth_radius_m / EARTH_RADIUS,
            min_cos_latitude_deg: self.engine.min_cos_latitude_deg,
        }
    }

    /// Domain cache sized by the cache settings
    pub fn domain_cache(&self) -> DomainCache {
        if self.cache.enabled {
            DomainCache::new(self.cache.max_entries)
        } else {
            DomainCache::disabled()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            cache: CacheConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sampling_mode: default_sampling_mode(),
            min_cos_latitude_deg: default_min_cos_latitude_deg(),
            ipv_conventional_sign: false,
            earth_radius_m: default_earth_radius_m(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            max_entries: default_max_entries(),
        }
    }
}

// Default value functions for serde
fn default_sampling_mode() -> SamplingMode {
    SamplingMode::WeightedAverage
}

fn default_min_cos_latitude_deg() -> f64 {
    89.0
}

fn default_earth_radius_m() -> f64 {
    EARTH_RADIUS
}

fn default_cache_enabled() -> bool {
    true
}

fn default_max_entries() -> usize {
    256
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.engine.sampling_mode, SamplingMode::WeightedAverage);
        assert_eq!(config.engine.min_cos_latitude_deg, 89.0);
        assert!(!config.engine.ipv_conventional_sign);
        assert!(config.cache.enabled);
        assert_eq!(config.cache.max_entries, 256);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.earth_model(), EarthModel::default());
    }

    #[test]
    fn test_config_merge() {
        let mut config1 = Config::default();
        let mut config2 = Config::default();

        config2.engine.ipv_conventional_sign = true;
        config2.cache.max_entries = 16;

        config1.merge(config2);

        assert!(config1.engine.ipv_conventional_sign);
        assert_eq!(config1.cache.max_entries, 16);
    }

    #[test]
    fn test_config_validation() {
        // Valid config should pass
        let config = Config::default();
        assert!(config.validate().is_ok());

        // Test invalid log level
        let mut config = Config::default();
        config.log_level = "invalid".to_string();
        assert!(config.validate().is_err());

        // Test invalid pole guard
        let mut config = Config::default();
        config.engine.min_cos_latitude_deg = 90.0;
        assert!(config.validate().is_err());

        // Test empty cache
        let mut config = Config::default();
        config.cache.max_entries = 0;
        assert!(config.validate().is_err());
        config.cache.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"engine": {{"sampling_mode": "nearest_neighbor"}}, "log_level": "debug"}}"#
        )
        .unwrap();
        let config = Config::load_from_file(file.path()).unwrap();
        assert_eq!(config.engine.sampling_mode, SamplingMode::NearestNeighbor);
        assert_eq!(config.engine.min_cos_latitude_deg, 89.0);
        assert_eq!(config.cache.max_entries, 256);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_flags_override_file() {
        let args = Args::parse_from(["ekman", "grid.json", "--sampling", "nearest_neighbor"]);
        let config = Config::from_args(&args).unwrap();
        assert_eq!(config.engine.sampling_mode, SamplingMode::NearestNeighbor);
        assert_eq!(args.operation, "summary");

        let args = Args::parse_from(["ekman", "grid.json", "--sampling", "bicubic"]);
        assert!(Config::from_args(&args).is_err());
    }

    #[test]
    fn test_subset_strides_follow_manifold() {
        let args = Args::parse_from(["ekman", "grid.json", "-o", "subset", "--stride", "3"]);
        assert_eq!(args.subset_strides(2), (3, 3, 1));
        assert_eq!(args.subset_strides(3), (3, 3, 3));

        let args = Args::parse_from(["ekman", "grid.json", "--stride", "2", "--stride-z", "4"]);
        assert_eq!(args.subset_strides(3), (2, 2, 4));
        assert_eq!(args.subset_strides(2), (2, 2, 1));
    }
}
