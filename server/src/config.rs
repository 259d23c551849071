//! Server configuration module.
//!
//! Configuration is read from environment variables.
//!
//! # Environment Variables
//!
//! - `VITALS_DATA_DIRECTORY`: Directory where store files are kept (default: `./data`)
//! - `VITALS_LISTEN_PORT`: Port to listen on (default: `8080`)
//! - `VITALS_MAX_DEGREE`: B-tree degree used when creating a new store (default: `50`)
//! - `VITALS_STORE_NAME`: Base name of the store files (default: `vitals`)
//!
//! # Invariants
//!
//! - `max_degree` is always within the range the B-tree accepts
//! - `store_name` is a single non-empty path component

use std::path::PathBuf;

use crate::storage::btree::{MAX_DEGREE, MIN_DEGREE};

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Directory holding the store files.
    pub data_directory: PathBuf,
    /// Port to listen on for HTTP connections.
    pub listen_port: u16,
    /// Degree of the B-tree. Must match the degree an existing store was
    /// created with.
    pub max_degree: usize,
    /// Store files are `{data_directory}/{store_name}_{index,data,meta}.dat`.
    pub store_name: String,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_directory: PathBuf::from(Self::DEFAULT_DATA_DIRECTORY),
            listen_port: Self::DEFAULT_PORT,
            max_degree: Self::DEFAULT_MAX_DEGREE,
            store_name: Self::DEFAULT_STORE_NAME.to_string(),
        }
    }
}

impl ServerConfig {
    /// Default port for the server.
    pub const DEFAULT_PORT: u16 = 8080;
    /// Default data directory.
    pub const DEFAULT_DATA_DIRECTORY: &'static str = "./data";
    /// Default B-tree degree.
    pub const DEFAULT_MAX_DEGREE: usize = 50;
    /// Default base name for store files.
    pub const DEFAULT_STORE_NAME: &'static str = "vitals";

    /// Load configuration from environment variables.
    ///
    /// Unset variables fall back to their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let data_directory = lookup("VITALS_DATA_DIRECTORY")
            .map_or_else(|| PathBuf::from(Self::DEFAULT_DATA_DIRECTORY), PathBuf::from);
        let listen_port = Self::parse_listen_port(lookup("VITALS_LISTEN_PORT"))?;
        let max_degree = Self::parse_max_degree(lookup("VITALS_MAX_DEGREE"))?;
        let store_name = Self::parse_store_name(lookup("VITALS_STORE_NAME"))?;

        Ok(Self {
            data_directory,
            listen_port,
            max_degree,
            store_name,
        })
    }

    /// Base path passed to the store: `{data_directory}/{store_name}`.
    #[must_use]
    pub fn store_base_path(&self) -> PathBuf {
        self.data_directory.join(&self.store_name)
    }

    fn parse_listen_port(value: Option<String>) -> Result<u16, ConfigError> {
        match value {
            Some(value) => match value.parse::<u16>() {
                Ok(port) if port != 0 => Ok(port),
                _ => Err(ConfigError::InvalidValue {
                    name: "VITALS_LISTEN_PORT".to_string(),
                    message: format!("'{value}' is not a valid port number (must be 1-65535)"),
                }),
            },
            None => Ok(Self::DEFAULT_PORT),
        }
    }

    fn parse_max_degree(value: Option<String>) -> Result<usize, ConfigError> {
        let Some(value) = value else {
            return Ok(Self::DEFAULT_MAX_DEGREE);
        };

        match value.parse::<usize>() {
            Ok(degree) if (MIN_DEGREE..=MAX_DEGREE).contains(&degree) => Ok(degree),
            _ => Err(ConfigError::InvalidValue {
                name: "VITALS_MAX_DEGREE".to_string(),
                message: format!("'{value}' must be an integer in {MIN_DEGREE}-{MAX_DEGREE}"),
            }),
        }
    }

    fn parse_store_name(value: Option<String>) -> Result<String, ConfigError> {
        let Some(name) = value else {
            return Ok(Self::DEFAULT_STORE_NAME.to_string());
        };

        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(ConfigError::InvalidValue {
                name: "VITALS_STORE_NAME".to_string(),
                message: format!("'{name}' must be a plain file name"),
            });
        }
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ServerConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = load(&[]).expect("defaults");
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.listen_port, 8080);
        assert_eq!(config.max_degree, 50);
        assert_eq!(config.store_base_path(), PathBuf::from("./data/vitals"));
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("VITALS_DATA_DIRECTORY", "/srv/icu"),
            ("VITALS_LISTEN_PORT", "9000"),
            ("VITALS_MAX_DEGREE", "8"),
            ("VITALS_STORE_NAME", "ward3"),
        ])
        .expect("valid config");

        assert_eq!(config.listen_port, 9000);
        assert_eq!(config.max_degree, 8);
        assert_eq!(config.store_base_path(), PathBuf::from("/srv/icu/ward3"));
    }

    #[test]
    fn test_invalid_port() {
        for bad in ["abc", "0", "70000"] {
            let err = load(&[("VITALS_LISTEN_PORT", bad)]).expect_err("should reject");
            assert!(matches!(err, ConfigError::InvalidValue { ref name, .. } if name == "VITALS_LISTEN_PORT"));
        }
    }

    #[test]
    fn test_invalid_degree() {
        for bad in ["1", "0", "-3", "100000", "fifty"] {
            let err = load(&[("VITALS_MAX_DEGREE", bad)]).expect_err("should reject");
            assert!(matches!(err, ConfigError::InvalidValue { ref name, .. } if name == "VITALS_MAX_DEGREE"));
        }
        assert_eq!(load(&[("VITALS_MAX_DEGREE", "2")]).expect("min").max_degree, 2);
    }

    #[test]
    fn test_invalid_store_name() {
        for bad in ["", "a/b", ".."] {
            assert!(load(&[("VITALS_STORE_NAME", bad)]).is_err());
        }
    }

    #[test]
    fn test_config_error_display_invalid() {
        let error = ConfigError::InvalidValue {
            name: "TEST_VAR".to_string(),
            message: "bad value".to_string(),
        };
        assert_eq!(error.to_string(), "invalid value for TEST_VAR: bad value");
    }
}
