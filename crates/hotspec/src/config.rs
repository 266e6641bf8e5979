//! Harness and runner configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::HotResult;

/// Per-test harness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// URL handed to the environment when the page is loaded
    pub page_url: String,

    /// Selector of the application root whose HTML is asserted
    pub app_root_selector: String,

    /// Selector of an explicit focus marker, preferred over the app root
    pub focus_selector: String,

    /// Fixed HTML prefix every rendered output starts with (stripped before comparing)
    pub html_prefix: Option<String>,

    /// Window used to collect a burst of console messages into one failure
    pub console_window_ms: u64,

    /// Upper bound for one write-and-settle round trip
    pub settle_timeout_ms: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            page_url: "/".to_string(),
            app_root_selector: "#app".to_string(),
            focus_selector: "[data-hmr-focus]".to_string(),
            html_prefix: None,
            console_window_ms: 100,
            settle_timeout_ms: 10_000,
        }
    }
}

impl HarnessConfig {
    pub fn console_window(&self) -> Duration {
        Duration::from_millis(self.console_window_ms)
    }

    pub fn settle_timeout(&self) -> Duration {
        Duration::from_millis(self.settle_timeout_ms)
    }
}

/// Configuration for the suite runner
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub harness: HarnessConfig,

    /// Directory scanned for `*.hmr` spec files
    pub specs_dir: PathBuf,

    /// Output directory for results
    pub output_dir: PathBuf,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            harness: HarnessConfig::default(),
            specs_dir: PathBuf::from("specs"),
            output_dir: PathBuf::from("test-results"),
        }
    }
}

impl RunnerConfig {
    /// Load configuration from file, falling back to defaults when it does not exist
    pub fn load(path: &Path) -> HotResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> HotResult<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Path of the JSON results file
    pub fn results_path(&self) -> PathBuf {
        self.output_dir.join("test-results.json")
    }
}
