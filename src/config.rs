//! Environment-driven settings (spec §6). A small, `Default`-backed struct
//! read once at startup, the way the teacher's `main.rs` reads
//! `SERVER_PORT`/`JWT_SECRET` from the environment rather than a config
//! file or CLI-flag layer.

use std::env;

/// Stage timeout multiplier applied to `provider_timeout` to get the base
/// per-provider timeout before the free-tier multiplier (spec §4.E.6).
pub const STEP_TIMEOUT_MULTIPLIER: f64 = 2.0;

/// Stagger delay between starting providers within a stage, in milliseconds
/// (spec §4.E.6, GLOSSARY "Stagger delay").
pub const STAGGER_DELAY_MS: u64 = 150;

/// Maximum number of retry attempts for a failing free-tier provider
/// (spec §4.E.6).
pub const MAX_RETRY_ATTEMPTS: u32 = 1;

/// Base delay, in seconds, for the exponential retry backoff (spec §4.E.6).
pub const RETRY_BASE_DELAY_SECS: f64 = 2.0;

/// Timeout multiplier applied to free-tier providers (spec §3, §4.E.6).
pub const FREE_TIER_TIMEOUT_MULTIPLIER: f64 = 3.0;

/// Default minimum number of successful providers required at the stage 1
/// and stage 2 gates (spec §4.E.1).
pub const DEFAULT_MIN_PROVIDERS: usize = 2;

/// Anonymous label alphabet; only 26 providers can be labelled (spec §3
/// "label bijection", SPEC_FULL.md §D.2a).
pub const PROVIDER_LABELS: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";

#[derive(Debug, Clone)]
pub struct Settings {
    /// Seconds; default 60 (spec §6).
    pub provider_timeout_secs: u64,
    pub app_url: String,
    pub app_name: String,
}

impl Settings {
    pub fn from_env() -> Self {
        let provider_timeout_secs = env::var("PROVIDER_TIMEOUT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);
        let app_url = env::var("KEA_APP_URL")
            .unwrap_or_else(|_| "https://github.com/kea-pipeline".to_string());
        let app_name = env::var("KEA_APP_NAME").unwrap_or_else(|_| "KEA Pipeline".to_string());
        Settings { provider_timeout_secs, app_url, app_name }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            provider_timeout_secs: 60,
            app_url: "https://github.com/kea-pipeline".to_string(),
            app_name: "KEA Pipeline".to_string(),
        }
    }
}
