//! Layered configuration: built-in defaults, overlaid by an optional
//! `aqe.toml` file, then `AQE_*` environment variables, then CLI flags
//! (highest precedence, applied by the caller after `Config::load`).

use std::env;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use aqe_db::error::{AqeError, AqeResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database_url: String,
    pub default_max_rel_error: f64,
    pub default_sample_size: i64,
    pub log_level: String,
    pub learning_history_limit: i64,
    pub hll_default_b: u8,
    pub cms_default_epsilon: f64,
    pub cms_default_delta: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://aqe.db".to_string(),
            default_max_rel_error: 0.05,
            default_sample_size: 20,
            log_level: "info".to_string(),
            learning_history_limit: 20,
            hll_default_b: 10,
            cms_default_epsilon: 0.01,
            cms_default_delta: 0.01,
        }
    }
}

impl Config {
    /// Resolve a `Config`: defaults, overlaid by `config_path` (or
    /// `aqe.toml` in the current directory if it exists and no path was
    /// given), then `AQE_*` environment variables. Validates before
    /// returning.
    pub fn load(config_path: Option<&Path>) -> AqeResult<Self> {
        let mut config = match config_path {
            Some(path) => Self::from_file(path)?,
            None if Path::new("aqe.toml").exists() => Self::from_file(Path::new("aqe.toml"))?,
            None => Self::default(),
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> AqeResult<Self> {
        let content = fs::read_to_string(path).map_err(|err| {
            AqeError::InvalidArgument(format!("failed to read config file {}: {err}", path.display()))
        })?;

        toml::from_str(&content).map_err(|err| {
            AqeError::InvalidArgument(format!("failed to parse config file {}: {err}", path.display()))
        })
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("AQE_DATABASE_URL") {
            self.database_url = v;
        }
        if let Some(v) = parse_env("AQE_DEFAULT_MAX_REL_ERROR") {
            self.default_max_rel_error = v;
        }
        if let Some(v) = parse_env("AQE_DEFAULT_SAMPLE_SIZE") {
            self.default_sample_size = v;
        }
        if let Ok(v) = env::var("AQE_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = parse_env("AQE_LEARNING_HISTORY_LIMIT") {
            self.learning_history_limit = v;
        }
        if let Some(v) = parse_env("AQE_HLL_DEFAULT_B") {
            self.hll_default_b = v;
        }
        if let Some(v) = parse_env("AQE_CMS_DEFAULT_EPSILON") {
            self.cms_default_epsilon = v;
        }
        if let Some(v) = parse_env("AQE_CMS_DEFAULT_DELTA") {
            self.cms_default_delta = v;
        }
    }

    fn validate(&self) -> AqeResult<()> {
        if !(0.0..=1.0).contains(&self.default_max_rel_error) {
            return Err(AqeError::InvalidArgument(format!(
                "default_max_rel_error must be in [0, 1], got {}",
                self.default_max_rel_error
            )));
        }
        if self.learning_history_limit <= 0 {
            return Err(AqeError::InvalidArgument(
                "learning_history_limit must be positive".to_string(),
            ));
        }
        if !(4..=16).contains(&self.hll_default_b) {
            return Err(AqeError::InvalidArgument(format!(
                "hll_default_b must be in [4, 16], got {}",
                self.hll_default_b
            )));
        }
        if !(0.0..1.0).contains(&self.cms_default_epsilon) || !(0.0..1.0).contains(&self.cms_default_delta)
        {
            return Err(AqeError::InvalidArgument(
                "cms_default_epsilon and cms_default_delta must be in (0, 1)".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_error_tolerance() {
        let mut config = Config::default();
        config.default_max_rel_error = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_hll_b() {
        let mut config = Config::default();
        config.hll_default_b = 20;
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_toml_overlay() {
        let toml_str = r#"
            database_url = "sqlite:///tmp/custom.db"
            default_max_rel_error = 0.1
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.database_url, "sqlite:///tmp/custom.db");
        assert_eq!(config.default_max_rel_error, 0.1);
        // Fields absent from the overlay keep their defaults via #[serde(default)].
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn env_override_takes_precedence_over_file_value() {
        // SAFETY: test-local env var, not read concurrently by other tests
        // touching AQE_LOG_LEVEL.
        unsafe {
            env::set_var("AQE_LOG_LEVEL", "debug");
        }
        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.log_level, "debug");
        unsafe {
            env::remove_var("AQE_LOG_LEVEL");
        }
    }
}
