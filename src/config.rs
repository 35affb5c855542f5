use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Gas consumed by one use of a pool.
pub const LEG_GAS: f64 = 40_000.0;
/// Default number of increments a graph route is built from.
pub const DEFAULT_STEPS: usize = 100;
/// Default number of price-equalization passes of the parallel split.
pub const SPLIT_ITERATIONS: usize = 5;
/// Default relative tolerance for flow and leg bookkeeping checks.
pub const FLOW_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read routing config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse routing config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid routing config: {0}")]
    Invalid(String),
}

/// Tunables of the split and graph routers. Missing JSON fields take their defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub steps: usize,
    pub leg_gas: f64,
    pub split_iterations: usize,
    pub flow_tolerance: f64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            steps: DEFAULT_STEPS,
            leg_gas: LEG_GAS,
            split_iterations: SPLIT_ITERATIONS,
            flow_tolerance: FLOW_TOLERANCE,
        }
    }
}

impl RoutingConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.steps == 0 {
            return Err(ConfigError::Invalid("steps must be positive".into()));
        }
        if self.split_iterations == 0 {
            return Err(ConfigError::Invalid("split_iterations must be positive".into()));
        }
        if !(self.leg_gas.is_finite() && self.leg_gas >= 0.0) {
            return Err(ConfigError::Invalid(format!("leg_gas must be finite and non-negative, got {}", self.leg_gas)));
        }
        if !(self.flow_tolerance.is_finite() && self.flow_tolerance > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "flow_tolerance must be finite and positive, got {}",
                self.flow_tolerance
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RoutingConfig::default();
        assert_eq!(config.steps, 100);
        assert_eq!(config.leg_gas, 40_000.0);
        assert_eq!(config.split_iterations, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = RoutingConfig::from_json_str(r#"{ "steps": 20, "leg_gas": 65000 }"#).unwrap();
        assert_eq!(config.steps, 20);
        assert_eq!(config.leg_gas, 65_000.0);
        assert_eq!(config.split_iterations, SPLIT_ITERATIONS);
        assert_eq!(config.flow_tolerance, FLOW_TOLERANCE);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        assert!(matches!(
            RoutingConfig::from_json_str(r#"{ "steps": 0 }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            RoutingConfig::from_json_str(r#"{ "leg_gas": -1 }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            RoutingConfig::from_json_str(r#"{ "steps": "many" }"#),
            Err(ConfigError::Json(_))
        ));
        assert!(matches!(
            RoutingConfig::from_path("/nonexistent/multiroute.json"),
            Err(ConfigError::Io(_))
        ));
    }
}
