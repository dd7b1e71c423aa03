//! Agent configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QaConfig {
    /// Maximum number of browser sessions open at once
    pub max_concurrency: usize,

    /// Maximum number of URLs in one batch
    pub max_batch_size: usize,

    /// Deadline for a whole job, in seconds
    pub job_deadline_secs: u64,

    /// Navigation timeout, in seconds
    pub navigation_timeout_secs: u64,

    /// Browser configuration
    pub browser: BrowserConfig,

    /// Interaction configuration
    pub interaction: InteractionConfig,

    /// Scoring service configuration
    pub scoring: ScoringConfig,

    /// Report configuration
    pub report: ReportConfig,

    /// Storage configuration
    pub storage: StorageConfig,
}

impl Default for QaConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 20,
            max_batch_size: 10,
            job_deadline_secs: 300,
            navigation_timeout_secs: 45,
            browser: BrowserConfig::default(),
            interaction: InteractionConfig::default(),
            scoring: ScoringConfig::default(),
            report: ReportConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

/// Browser launch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Default headless mode when a request does not say
    pub headless: bool,

    /// Path to the Chrome/Chromium executable (auto-detected when unset)
    pub chrome_executable: Option<PathBuf>,

    /// Viewport width used for screenshots
    pub viewport_width: u32,

    /// Viewport height used for screenshots
    pub viewport_height: u32,

    /// Extra command-line switches passed to the browser
    pub extra_args: Vec<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_executable: None,
            viewport_width: 1280,
            viewport_height: 720,
            extra_args: vec!["--disable-dev-shm-usage".to_string()],
        }
    }
}

/// Interaction plan configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractionConfig {
    /// Wait between plan steps, in milliseconds
    pub step_wait_ms: u64,

    /// Wait after clicking the entry control, in milliseconds
    pub post_entry_wait_ms: u64,

    /// Time box for the standard plan, in seconds
    pub plan_budget_secs: u64,

    /// Texts that match an entry control exactly (case-insensitive)
    pub entry_exact: Vec<String>,

    /// Texts that match an entry control as a substring (case-insensitive)
    pub entry_substrings: Vec<String>,
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self {
            step_wait_ms: 500,
            post_entry_wait_ms: 1000,
            plan_budget_secs: 20,
            entry_exact: ["start", "play", "begin", "start game", "play game", "play now", "new game"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            entry_substrings: vec!["start".to_string(), "play".to_string()],
        }
    }
}

impl InteractionConfig {
    pub fn step_wait(&self) -> Duration {
        Duration::from_millis(self.step_wait_ms)
    }

    pub fn plan_budget(&self) -> Duration {
        Duration::from_secs(self.plan_budget_secs)
    }
}

/// Vision scoring service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Endpoint accepting scoring requests
    pub endpoint: String,

    /// Environment variable holding the API key
    pub api_key_env: String,

    /// Model identifier forwarded to the service
    pub model: String,

    /// Per-request timeout, in seconds
    pub request_timeout_secs: u64,

    /// Total attempts per evaluation
    pub max_attempts: u32,

    /// Linear backoff unit: attempt N waits N * this
    pub retry_base_delay_ms: u64,

    /// Maximum screenshots sent per evaluation
    pub max_images: usize,

    /// Confidence assigned to heuristic scores
    pub degraded_confidence: u8,

    /// Scores below this confidence are flagged as low confidence
    pub low_confidence_threshold: u8,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8700/v1/score".to_string(),
            api_key_env: "GAMEQA_SCORING_API_KEY".to_string(),
            model: "vision-default".to_string(),
            request_timeout_secs: 60,
            max_attempts: 3,
            retry_base_delay_ms: 2000,
            max_images: 5,
            degraded_confidence: 20,
            low_confidence_threshold: 30,
        }
    }
}

impl ScoringConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Delay before retrying after `attempt` (1-based) failed
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms * attempt as u64)
    }
}

/// Report configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Minimum overall score for a pass verdict
    pub pass_threshold: u8,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self { pass_threshold: 50 }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for JSON reports (defaults under the data dir)
    pub reports_dir: Option<PathBuf>,

    /// Directory for screenshot artifacts (defaults under the data dir)
    pub artifacts_dir: Option<PathBuf>,

    /// Upper bound on artifact uploads per job, in seconds
    pub upload_timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            reports_dir: None,
            artifacts_dir: None,
            upload_timeout_secs: 10,
        }
    }
}

impl QaConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn job_deadline(&self) -> Duration {
        Duration::from_secs(self.job_deadline_secs)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    /// Get the reports directory
    pub fn reports_dir(&self) -> PathBuf {
        self.storage
            .reports_dir
            .clone()
            .unwrap_or_else(|| crate::default_data_dir().join("reports"))
    }

    /// Get the artifacts directory
    pub fn artifacts_dir(&self) -> PathBuf {
        self.storage
            .artifacts_dir
            .clone()
            .unwrap_or_else(|| crate::default_data_dir().join("artifacts"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = QaConfig::default();
        assert_eq!(config.max_concurrency, 20);
        assert_eq!(config.max_batch_size, 10);
        assert_eq!(config.navigation_timeout(), Duration::from_secs(45));
        assert_eq!(config.scoring.max_attempts, 3);
        assert!(config.scoring.degraded_confidence < config.scoring.low_confidence_threshold);
    }

    #[test]
    fn test_linear_backoff() {
        let scoring = ScoringConfig::default();
        assert_eq!(scoring.retry_delay(1), Duration::from_secs(2));
        assert_eq!(scoring.retry_delay(2), Duration::from_secs(4));
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = QaConfig::load(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config.job_deadline_secs, 300);
    }

    #[test]
    fn test_save_and_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/config.toml");

        let mut config = QaConfig::default();
        config.max_concurrency = 4;
        config.browser.headless = false;
        config.save(&path).unwrap();

        let loaded = QaConfig::load(&path).unwrap();
        assert_eq!(loaded.max_concurrency, 4);
        assert!(!loaded.browser.headless);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "max_concurrency = 2\n[scoring]\nmax_attempts = 5\n").unwrap();

        let config = QaConfig::load(&path).unwrap();
        assert_eq!(config.max_concurrency, 2);
        assert_eq!(config.scoring.max_attempts, 5);
        assert_eq!(config.scoring.max_images, 5);
        assert_eq!(config.navigation_timeout_secs, 45);
    }
}
