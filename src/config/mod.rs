//! Configuration module for Spool Uploadr
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and validation.

use crate::upload::{RequestPathDirectory, RequestPathFileName, UploaderConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// ============================================================================
// Byte sizes
// ============================================================================

/// A byte count written either as an integer or as a human-readable string.
///
/// Units are case-insensitive and 1024-based: `b`, `kb`, `mb`, `gb`, `tb`,
/// `pb`. A missing unit means bytes. Fractions are allowed and rounded down,
/// so `"1.5kb"` is 1536.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "u64")]
pub struct ByteSize(pub u64);

impl ByteSize {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<ByteSize> for u64 {
    fn from(size: ByteSize) -> u64 {
        size.0
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}b", self.0)
    }
}

impl FromStr for ByteSize {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::ValidationError(format!("Invalid byte size: {:?}", s));

        let re = regex_lite::Regex::new(r"(?i)^\s*(\d+(?:\.\d+)?)\s*(b|kb|mb|gb|tb|pb)?\s*$")
            .expect("byte size pattern is valid");
        let caps = re.captures(s).ok_or_else(invalid)?;

        let multiplier: u64 = match caps
            .get(2)
            .map(|m| m.as_str().to_ascii_lowercase())
            .as_deref()
        {
            None | Some("b") => 1,
            Some("kb") => 1 << 10,
            Some("mb") => 1 << 20,
            Some("gb") => 1 << 30,
            Some("tb") => 1 << 40,
            Some("pb") => 1 << 50,
            Some(_) => return Err(invalid()),
        };

        let number = &caps[1];
        if let Ok(whole) = number.parse::<u64>() {
            return whole.checked_mul(multiplier).map(ByteSize).ok_or_else(invalid);
        }

        let value = number.parse::<f64>().map_err(|_| invalid())? * multiplier as f64;
        if !value.is_finite() || value >= u64::MAX as f64 {
            return Err(invalid());
        }
        Ok(ByteSize(value.floor() as u64))
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::de::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bytes(u64),
            Human(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Bytes(n) => Ok(ByteSize(n)),
            Raw::Human(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

// ============================================================================
// Schema
// ============================================================================

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub routes: Vec<RouteConfig>,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.routes.is_empty() {
            return Err(ConfigError::ValidationError(
                "At least one route must be configured".into(),
            ));
        }

        let mut prefixes = HashSet::new();
        for route in &self.routes {
            if route.path_prefix.is_empty() || !route.path_prefix.starts_with('/') {
                return Err(ConfigError::ValidationError(format!(
                    "Route '{}' must have a path_prefix starting with '/'",
                    route.name
                )));
            }

            if !prefixes.insert(route.normalized_prefix()) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate path_prefix '{}'",
                    route.path_prefix
                )));
            }

            if route.upload_dir.as_os_str().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "Route '{}' has empty upload_dir",
                    route.name
                )));
            }

            if let Some(ref suffix) = route.type_suffix {
                if suffix.contains(['/', '\\']) {
                    return Err(ConfigError::ValidationError(format!(
                        "Route '{}' has invalid type_suffix '{}'",
                        route.name, suffix
                    )));
                }
            }
        }

        if self.server.read_timeout_secs == Some(0) {
            return Err(ConfigError::ValidationError(
                "read_timeout_secs must be greater than 0".into(),
            ));
        }

        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub address: String,
    /// Longest wait for the next body chunk. Default: no timeout
    #[serde(default)]
    pub read_timeout_secs: Option<u64>,
}

impl ServerConfig {
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_secs.map(Duration::from_secs)
    }
}

/// How uploaded files are named
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamingStrategy {
    /// Random hex name in the upload directory root
    #[default]
    Random,
    /// `{path_prefix}/dir/name` is stored as `dir/name`
    RequestPath,
}

/// One upload endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    pub name: String,
    pub path_prefix: String,
    pub upload_dir: PathBuf,
    /// Default: OS temp directory
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
    /// Default: unlimited
    #[serde(default)]
    pub max_size: Option<ByteSize>,
    #[serde(default)]
    pub type_suffix: Option<String>,
    #[serde(default)]
    pub naming: NamingStrategy,
}

impl RouteConfig {
    /// Prefix without trailing `/`
    pub fn normalized_prefix(&self) -> &str {
        let trimmed = self.path_prefix.trim_end_matches('/');
        if trimmed.is_empty() {
            "/"
        } else {
            trimmed
        }
    }

    /// Uploader settings for this route
    pub fn uploader_config(&self, server: &ServerConfig) -> UploaderConfig {
        let mut config = UploaderConfig::new(&self.upload_dir)
            .name(&self.name)
            .max_size(self.max_size.map(u64::from))
            .type_suffix(self.type_suffix.clone())
            .read_timeout(server.read_timeout());

        if let Some(ref temp_dir) = self.temp_dir {
            config = config.temp_dir(temp_dir);
        }

        match self.naming {
            NamingStrategy::Random => config,
            NamingStrategy::RequestPath => config
                .file_names(RequestPathFileName)
                .relative_paths(RequestPathDirectory),
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            port: default_metrics_port(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9090
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(name: &str, prefix: &str) -> RouteConfig {
        RouteConfig {
            name: name.into(),
            path_prefix: prefix.into(),
            upload_dir: "./upload".into(),
            temp_dir: None,
            max_size: None,
            type_suffix: None,
            naming: NamingStrategy::Random,
        }
    }

    fn config(routes: Vec<RouteConfig>) -> Config {
        Config {
            server: ServerConfig {
                address: "0.0.0.0:8080".into(),
                read_timeout_secs: None,
            },
            routes,
            metrics: MetricsConfig::default(),
        }
    }

    #[test]
    fn test_byte_size_parsing() {
        assert_eq!("3".parse::<ByteSize>().unwrap().as_u64(), 3);
        assert_eq!("1gb".parse::<ByteSize>().unwrap().as_u64(), 1 << 30);
        assert_eq!("1024kb".parse::<ByteSize>().unwrap().as_u64(), 1 << 20);
        assert_eq!("1.5KB".parse::<ByteSize>().unwrap().as_u64(), 1536);
        assert_eq!(" 10 MB ".parse::<ByteSize>().unwrap().as_u64(), 10 << 20);
        assert_eq!("7b".parse::<ByteSize>().unwrap().as_u64(), 7);
    }

    #[test]
    fn test_byte_size_rejects_garbage() {
        assert!("".parse::<ByteSize>().is_err());
        assert!("lots".parse::<ByteSize>().is_err());
        assert!("-1kb".parse::<ByteSize>().is_err());
        assert!("1xb".parse::<ByteSize>().is_err());
        assert!("99999999999pb".parse::<ByteSize>().is_err());
    }

    #[test]
    fn test_byte_size_deserializes_from_int_or_string() {
        let n: ByteSize = serde_yaml::from_str("50").unwrap();
        assert_eq!(n.as_u64(), 50);
        let s: ByteSize = serde_yaml::from_str("\"2kb\"").unwrap();
        assert_eq!(s.as_u64(), 2048);
        assert!(serde_yaml::from_str::<ByteSize>("\"huge\"").is_err());
    }

    #[test]
    fn test_config_validation_empty_routes() {
        assert!(config(vec![]).validate().is_err());
    }

    #[test]
    fn test_config_validation_duplicate_prefix() {
        let cfg = config(vec![route("a", "/upload"), route("b", "/upload/")]);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_config_validation_relative_prefix() {
        assert!(config(vec![route("a", "upload")]).validate().is_err());
    }

    #[test]
    fn test_config_validation_ok() {
        let cfg = config(vec![route("a", "/a"), route("b", "/b")]);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_uploader_config_from_route() {
        let mut r = route("docs", "/docs");
        r.max_size = Some(ByteSize(1024));
        r.temp_dir = Some("/var/tmp/spool".into());
        r.type_suffix = Some("json".into());

        let server = ServerConfig {
            address: "127.0.0.1:0".into(),
            read_timeout_secs: Some(30),
        };
        let uc = r.uploader_config(&server);

        assert_eq!(uc.name, "docs");
        assert_eq!(uc.max_size, Some(1024));
        assert_eq!(uc.temp_dir, PathBuf::from("/var/tmp/spool"));
        assert_eq!(uc.type_suffix.as_deref(), Some("json"));
        assert_eq!(uc.read_timeout, Some(Duration::from_secs(30)));
    }
}
