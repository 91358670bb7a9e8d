use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::types::issue_key;

/// TOML-backed engine tunables. Every section is optional; missing values
/// fall back to the production defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub clustering: ClusteringConfig,
    pub scoring: ScoringConfig,
    pub recurring: RecurringConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClusteringConfig {
    /// Seed radius when building suggested tasks.
    pub suggestion_radius_m: f64,
    /// Pickup radius around a recurring task's location.
    pub recurring_radius_m: f64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            suggestion_radius_m: 50.0,
            recurring_radius_m: 60.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScoringConfig {
    pub default_weight: i64,
    /// Issue → severity weight. Keys are normalised with `issue_key`.
    pub weights: HashMap<String, i64>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        let weights = [
            ("sewage", 5),
            ("sewage overflow", 5),
            ("water leakage", 4),
            ("drainage", 4),
            ("garbage", 3),
            ("pothole", 3),
            ("road damage", 3),
            ("streetlight", 2),
            ("stray animals", 2),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            default_weight: 2,
            weights,
        }
    }
}

impl ScoringConfig {
    pub fn weight_for(&self, issue: &str) -> i64 {
        self.weights
            .get(&issue_key(issue))
            .copied()
            .unwrap_or(self.default_weight)
    }

    fn normalize(&mut self) {
        self.weights = self
            .weights
            .drain()
            .map(|(k, v)| (issue_key(&k), v))
            .collect();
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecurringConfig {
    /// Occurrences at one (issue, cell) before a suggestion is emitted.
    pub candidate_threshold: usize,
    /// Decimal places used to snap task centroids onto the candidate grid.
    pub grid_decimals: u32,
    /// Priority score stamped on tasks the recurring engine creates.
    pub generated_priority: i64,
    /// Only pick up complaints whose issue matches the recurring task's issue.
    pub match_issue_type: bool,
    /// Cross-process run leases older than this are considered abandoned.
    pub lease_ttl_minutes: i64,
}

impl Default for RecurringConfig {
    fn default() -> Self {
        Self {
            candidate_threshold: 3,
            grid_decimals: 4,
            generated_priority: 100,
            match_issue_type: true,
            lease_ttl_minutes: 30,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: EngineConfig = toml::from_str(content)?;
        config.scoring.normalize();
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.clustering.suggestion_radius_m < 0.0 || self.clustering.recurring_radius_m < 0.0 {
            anyhow::bail!("clustering radii must be non-negative");
        }
        if self.recurring.candidate_threshold < 2 {
            anyhow::bail!("recurring.candidate_threshold must be at least 2 to infer an interval");
        }
        Ok(())
    }
}

/// Load and parse the engine TOML file.
pub fn load_engine_config(path: &Path) -> Result<EngineConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    EngineConfig::from_toml_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config.clustering.suggestion_radius_m, 50.0);
        assert_eq!(config.clustering.recurring_radius_m, 60.0);
        assert_eq!(config.recurring.candidate_threshold, 3);
        assert_eq!(config.recurring.generated_priority, 100);
        assert_eq!(config.scoring.weight_for("Unheard Of"), 2);
    }

    #[test]
    fn weight_keys_are_normalised() {
        let config = EngineConfig::from_toml_str(
            r#"
            [scoring]
            default_weight = 1
            [scoring.weights]
            "  Broken BENCH " = 7
            "#,
        )
        .unwrap();
        assert_eq!(config.scoring.weight_for("broken bench"), 7);
        assert_eq!(config.scoring.weight_for("Broken Bench  "), 7);
        assert_eq!(config.scoring.weight_for("garbage"), 1);
    }

    #[test]
    fn rejects_unknown_fields() {
        assert!(EngineConfig::from_toml_str("[clustering]\nradius = 10.0").is_err());
    }

    #[test]
    fn rejects_threshold_below_two() {
        assert!(EngineConfig::from_toml_str("[recurring]\ncandidate_threshold = 1").is_err());
    }
}
