//! Bridge configuration
//!
//! Loaded from TOML; every field has a default so a partial file is valid.
//!
//! ```toml
//! [discovery]
//! marker_class = "vegawidget"
//! id_prefix = "#"
//!
//! [discovery.retry]
//! max_attempts = 12
//! initial_delay_ms = 50
//! max_delay_ms = 1000
//! strategy = "exponential"
//! timeout_ms = 10000
//!
//! [render]
//! auto_size_style = "width:auto;height:auto;"
//! ```

use crate::errors::{BridgeError, Result};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level bridge configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Widget discovery configuration
    pub discovery: DiscoveryConfig,

    /// Render configuration
    pub render: RenderConfig,
}

/// Widget discovery configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Class every widget element carries
    pub marker_class: String,

    /// Prefix turning an output id into a selector
    pub id_prefix: String,

    /// Backoff while an element waits for its instance
    pub retry: RetryPolicy,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            marker_class: "vegawidget".to_string(),
            id_prefix: "#".to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

impl DiscoveryConfig {
    /// Selector for a server output id
    pub fn selector_for(&self, output_id: &str) -> String {
        format!("{}{output_id}", self.id_prefix)
    }
}

/// Render configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Style applied to the element once the view exists, letting the chart
    /// size its container. `None` leaves the element untouched.
    pub auto_size_style: Option<String>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            auto_size_style: Some("width:auto;height:auto;".to_string()),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text and validate it
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| BridgeError::config(format!("Invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.discovery.marker_class.trim().is_empty() {
            return Err(BridgeError::config("discovery.marker_class must not be empty"));
        }
        let retry = &self.discovery.retry;
        if retry.max_delay_ms < retry.initial_delay_ms {
            return Err(BridgeError::config(
                "discovery.retry.max_delay_ms must be at least initial_delay_ms",
            ));
        }
        if retry.timeout_ms == Some(0) {
            return Err(BridgeError::config("discovery.retry.timeout_ms must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::BackoffStrategy;
    use assert_matches::assert_matches;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.discovery.marker_class, "vegawidget");
        assert_eq!(config.discovery.selector_for("plot1"), "#plot1");
        assert_eq!(config.discovery.retry.initial_delay_ms, 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = BridgeConfig::from_toml_str(
            r#"
            [discovery.retry]
            max_attempts = 3
            strategy = "fixed"
            "#,
        )
        .unwrap();
        assert_eq!(config.discovery.retry.max_attempts, 3);
        assert_eq!(config.discovery.retry.strategy, BackoffStrategy::Fixed);
        assert_eq!(config.discovery.id_prefix, "#");
        assert_eq!(config.render, RenderConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[discovery]\nmarker_class = \"vegawidget-vl4\"").unwrap();

        let config = BridgeConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.discovery.marker_class, "vegawidget-vl4");
    }

    #[test]
    fn test_invalid_config() {
        assert_matches!(
            BridgeConfig::from_toml_str("[discovery]\nmarker_class = \"\""),
            Err(BridgeError::Config { .. })
        );
        assert_matches!(
            BridgeConfig::from_toml_str(
                "[discovery.retry]\ninitial_delay_ms = 500\nmax_delay_ms = 10"
            ),
            Err(BridgeError::Config { .. })
        );
        assert_matches!(
            BridgeConfig::from_toml_str("discovery = 3"),
            Err(BridgeError::Config { .. })
        );
        assert_matches!(
            BridgeConfig::load_from_file(Path::new("/nonexistent/vegawidget.toml")),
            Err(BridgeError::Config { .. })
        );
    }
}
