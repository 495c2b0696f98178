use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Result};

use wiremap_graph::{DEFAULT_BREADTH_CAP, DEFAULT_SIMILARITY_THRESHOLD};

/// All exploration knobs. Loaded from the environment in the binary; built
/// directly in tests.
#[derive(Debug, Clone)]
pub struct ExplorerConfig {
    pub worker_count: usize,
    pub max_calls: u64,
    pub max_wall_time: Duration,
    pub similarity_threshold: f64,
    pub task_retry_max: u32,
    pub llm_retry_max: u32,
    pub call_timeout: Duration,
    pub plateau_window: usize,
    pub random_seed: u64,
    pub target_phone_number: String,
    pub scenario_description: String,
    /// Max outgoing edges to expand per node before it leaves the frontier.
    pub breadth_cap: usize,
    pub grace_shutdown: Duration,
    /// How long unmatched webhook events are buffered for late registrations.
    pub webhook_buffer_ttl: Duration,
    /// When set, the first agent turn of a call may create non-root nodes
    /// (agents with A/B greetings). Off by default: canonical root.
    pub allow_variant_greetings: bool,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            max_calls: 100,
            max_wall_time: Duration::from_secs(3600),
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            task_retry_max: 3,
            llm_retry_max: 2,
            call_timeout: Duration::from_secs(300),
            plateau_window: 20,
            random_seed: 0,
            target_phone_number: String::new(),
            scenario_description: String::new(),
            breadth_cap: DEFAULT_BREADTH_CAP,
            grace_shutdown: Duration::from_secs(10),
            webhook_buffer_ttl: Duration::from_secs(60),
            allow_variant_greetings: false,
        }
    }
}

impl ExplorerConfig {
    /// Load from environment variables. Missing target number or scenario is
    /// a fatal configuration error: callers abort at startup.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            worker_count: env_parse("WORKER_COUNT", defaults.worker_count)?,
            max_calls: env_parse("MAX_CALLS", defaults.max_calls)?,
            max_wall_time: Duration::from_secs(env_parse("MAX_WALL_TIME_S", 3600u64)?),
            similarity_threshold: env_parse(
                "SIMILARITY_THRESHOLD",
                defaults.similarity_threshold,
            )?,
            task_retry_max: env_parse("TASK_RETRY_MAX", defaults.task_retry_max)?,
            llm_retry_max: env_parse("LLM_RETRY_MAX", defaults.llm_retry_max)?,
            call_timeout: Duration::from_secs(env_parse("CALL_TIMEOUT_S", 300u64)?),
            plateau_window: env_parse("PLATEAU_WINDOW", defaults.plateau_window)?,
            random_seed: env_parse("RANDOM_SEED", defaults.random_seed)?,
            target_phone_number: env_required("TARGET_PHONE_NUMBER")?,
            scenario_description: env_required("SCENARIO_DESCRIPTION")?,
            breadth_cap: env_parse("MAX_BRANCHING", defaults.breadth_cap)?,
            grace_shutdown: Duration::from_secs(env_parse("GRACE_SHUTDOWN_S", 10u64)?),
            webhook_buffer_ttl: Duration::from_secs(env_parse("WEBHOOK_BUFFER_TTL_S", 60u64)?),
            allow_variant_greetings: env_parse("ALLOW_VARIANT_GREETINGS", false)?,
        })
    }
}

fn env_required(key: &str) -> Result<String> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| anyhow!("{key} is not set"))
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("invalid {key}={raw}: {e}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_knobs() {
        let config = ExplorerConfig::default();
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.max_calls, 100);
        assert_eq!(config.similarity_threshold, 0.85);
        assert_eq!(config.task_retry_max, 3);
        assert_eq!(config.llm_retry_max, 2);
        assert_eq!(config.call_timeout, Duration::from_secs(300));
        assert_eq!(config.plateau_window, 20);
        assert_eq!(config.grace_shutdown, Duration::from_secs(10));
        assert!(!config.allow_variant_greetings);
    }

    #[test]
    fn env_parse_rejects_garbage() {
        std::env::set_var("WIREMAP_TEST_BAD_NUMBER", "not-a-number");
        let out: Result<u64> = env_parse("WIREMAP_TEST_BAD_NUMBER", 1u64);
        assert!(out.is_err());
        std::env::remove_var("WIREMAP_TEST_BAD_NUMBER");
    }
}
