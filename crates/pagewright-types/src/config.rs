//! Global configuration types for Pagewright.
//!
//! `GlobalConfig` represents the top-level `config.toml` that controls the
//! model, the build loop bounds, and session retention.

use serde::{Deserialize, Serialize};

/// Top-level configuration for Pagewright.
///
/// Loaded from `~/.pagewright/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Model identifier used for both the build agent and advisor calls.
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default)]
    pub temperature: Option<f64>,

    /// Override for the model API endpoint, e.g. a local proxy.
    #[serde(default)]
    pub api_base_url: Option<String>,

    /// Upper bound on model rounds within a single turn.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,

    /// Number of most recent conversation turns replayed to the model.
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// How many corrective retries the advisor gate may inject per turn.
    #[serde(default = "default_enforcement_retries")]
    pub enforcement_retries: usize,

    /// Time-to-live for persisted sessions and history.
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: u64,

    /// Wall-clock budget for a single streamed turn.
    #[serde(default = "default_turn_timeout_secs")]
    pub turn_timeout_secs: u64,

    /// Public base URL that deployed sites are served under.
    #[serde(default = "default_site_base_url")]
    pub site_base_url: String,
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_max_rounds() -> usize {
    15
}

fn default_history_window() -> usize {
    40
}

fn default_enforcement_retries() -> usize {
    2
}

fn default_session_ttl_hours() -> u64 {
    24
}

fn default_turn_timeout_secs() -> u64 {
    300
}

fn default_site_base_url() -> String {
    "http://localhost:3000/sites".to_string()
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: None,
            api_base_url: None,
            max_rounds: default_max_rounds(),
            history_window: default_history_window(),
            enforcement_retries: default_enforcement_retries(),
            session_ttl_hours: default_session_ttl_hours(),
            turn_timeout_secs: default_turn_timeout_secs(),
            site_base_url: default_site_base_url(),
        }
    }
}
