use std::fs;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::orchestration::{HttpProcessorConfig, OrchestratorConfig};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// Echo events to stdout next to the log file
    #[serde(default = "default_log_stdout")]
    pub log_stdout: bool,
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,
    #[serde(default)]
    pub processor: ProcessorSettings,
}

fn default_log_stdout() -> bool {
    true
}

/// Orchestrator tuning (durations in milliseconds)
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct OrchestratorSettings {
    pub quote_ttl_ms: u64,
    pub call_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub enforce_eligibility_membership: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            quote_ttl_ms: 60_000,
            call_timeout_ms: 30_000,
            max_retries: 2,
            retry_backoff_ms: 200,
            enforce_eligibility_membership: true,
        }
    }
}

impl OrchestratorSettings {
    pub fn to_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            quote_ttl: Duration::from_millis(self.quote_ttl_ms),
            call_timeout: Duration::from_millis(self.call_timeout_ms),
            max_retries: self.max_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            enforce_eligibility_membership: self.enforce_eligibility_membership,
        }
    }
}

/// Remote processor endpoint; without `base_url` the simulated processor is used
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ProcessorSettings {
    pub base_url: Option<String>,
    pub session_token: Option<String>,
    pub timeout_ms: u64,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            session_token: None,
            timeout_ms: 30_000,
        }
    }
}

impl ProcessorSettings {
    /// `None` when no remote processor is configured
    pub fn to_http_config(&self) -> Option<HttpProcessorConfig> {
        self.base_url.as_ref().map(|base_url| HttpProcessorConfig {
            base_url: base_url.clone(),
            session_token: self.session_token.clone(),
            timeout: Duration::from_millis(self.timeout_ms),
        })
    }
}

impl AppConfig {
    pub fn load(env: &str) -> anyhow::Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        Self::from_yaml_str(&content)
            .with_context(|| format!("Failed to parse config yaml: {}", config_path))
    }

    pub fn from_yaml_str(content: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }
}
