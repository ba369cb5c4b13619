//! Configuration loading and validation.
//!
//! All keys come from the environment with sensible defaults, so the
//! server starts with zero configuration against local fake endpoints.
//! `.env` files are honored by the binary before this module reads
//! anything.

use std::time::Duration;

/// Bounds and timeouts governing every pipeline run.
#[derive(Debug, Clone)]
pub struct Limits {
    /// Maximum Planner dialog turns before the lab fails.
    pub max_planner_turns: u32,
    /// Retries per stage for lint loops and transient external errors.
    pub max_stage_retries: u32,
    /// Maximum RCA-driven pipeline rewinds.
    pub max_rca_retries: u32,
    /// Whole-pipeline budget.
    pub pipeline_timeout: Duration,
    /// Planner dialog budget.
    pub planner_timeout: Duration,
    /// Per-reply wait on the instructor.
    pub user_reply_timeout: Duration,
    /// Individual Designer/Author execution budget.
    pub stage_timeout: Duration,
    /// Validator submit-and-poll budget.
    pub validator_timeout: Duration,
    /// Interval between runner status polls.
    pub poll_interval: Duration,
    /// Pending-message queue capacity per lab.
    pub pending_queue_capacity: usize,
    /// Fail the lab when lint retries are exhausted instead of
    /// proceeding with best-effort output.
    pub strict_lint: bool,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_planner_turns: default_planner_turns(),
            max_stage_retries: default_stage_retries(),
            max_rca_retries: default_rca_retries(),
            pipeline_timeout: Duration::from_secs(default_pipeline_timeout_s()),
            planner_timeout: Duration::from_secs(default_planner_timeout_s()),
            user_reply_timeout: Duration::from_secs(default_user_reply_timeout_s()),
            stage_timeout: Duration::from_secs(default_stage_timeout_s()),
            validator_timeout: Duration::from_secs(default_validator_timeout_s()),
            poll_interval: Duration::from_secs(default_poll_interval_s()),
            pending_queue_capacity: default_queue_capacity(),
            strict_lint: false,
        }
    }
}

/// LLM backend connection settings, passed opaquely to the adapter.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible chat-completions endpoint.
    pub endpoint: String,
    /// Optional bearer credential.
    pub credential: Option<String>,
    /// Model identifier sent with every request.
    pub model: String,
}

/// Top-level runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Pipeline bounds and timeouts.
    pub limits: Limits,
    /// LLM backend settings.
    pub llm: LlmConfig,
    /// Base URL of the parser/linter service.
    pub linter_endpoint: String,
    /// Base URL of the headless runner batch API.
    pub runner_endpoint: String,
    /// Base URL (or bucket URL) of the artifact object store.
    pub artifact_bucket: String,
    /// Origins allowed by CORS. A single `*` entry means permissive.
    pub cors_origins: Vec<String>,
    /// Host address to bind the HTTP server to.
    pub bind_host: String,
    /// Port to bind the HTTP server to.
    pub bind_port: u16,
}

impl Config {
    /// Assemble the configuration from the environment, falling back to
    /// defaults for every absent key.
    ///
    /// # Errors
    ///
    /// Returns an error when a present key fails to parse (e.g. a
    /// non-numeric `PIPELINE_TIMEOUT_S`).
    pub fn from_env() -> anyhow::Result<Self> {
        let limits = Limits {
            max_planner_turns: env_parsed("MAX_PLANNER_TURNS", default_planner_turns())?,
            max_stage_retries: env_parsed("MAX_STAGE_RETRIES", default_stage_retries())?,
            max_rca_retries: env_parsed("MAX_RCA_RETRIES", default_rca_retries())?,
            pipeline_timeout: env_secs("PIPELINE_TIMEOUT_S", default_pipeline_timeout_s())?,
            planner_timeout: env_secs("PLANNER_TIMEOUT_S", default_planner_timeout_s())?,
            user_reply_timeout: env_secs("USER_REPLY_TIMEOUT_S", default_user_reply_timeout_s())?,
            stage_timeout: env_secs("STAGE_TIMEOUT_S", default_stage_timeout_s())?,
            validator_timeout: env_secs("VALIDATOR_TIMEOUT_S", default_validator_timeout_s())?,
            poll_interval: env_secs("POLL_INTERVAL_S", default_poll_interval_s())?,
            pending_queue_capacity: env_parsed("PENDING_QUEUE_CAPACITY", default_queue_capacity())?,
            strict_lint: env_parsed("STRICT_LINT", false)?,
        };

        let llm = LlmConfig {
            endpoint: env_string("LLM_ENDPOINT", "http://localhost:11434/v1"),
            credential: std::env::var("LLM_CREDENTIAL").ok().filter(|s| !s.is_empty()),
            model: env_string("LLM_MODEL", "llama3"),
        };

        Ok(Self {
            limits,
            llm,
            linter_endpoint: env_string("LINTER_ENDPOINT", "http://localhost:8081"),
            runner_endpoint: env_string("RUNNER_ENDPOINT", "http://localhost:8082"),
            artifact_bucket: env_string("ARTIFACT_BUCKET", "http://localhost:9000/labforge"),
            cors_origins: env_list("CORS_ORIGINS", "*"),
            bind_host: env_string("BIND_HOST", "127.0.0.1"),
            bind_port: env_parsed("BIND_PORT", 8080)?,
        })
    }
}

/// Read a string key with a default.
fn env_string(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_owned())
}

/// Read and parse a key with a default.
fn env_parsed<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.is_empty() => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {key}={raw}: {e}")),
        _ => Ok(default),
    }
}

/// Read a seconds key into a `Duration`.
fn env_secs(key: &str, default: u64) -> anyhow::Result<Duration> {
    Ok(Duration::from_secs(env_parsed(key, default)?))
}

/// Read a comma-separated list key.
fn env_list(key: &str, default: &str) -> Vec<String> {
    env_string(key, default)
        .split(',')
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
        .collect()
}

// Default value functions

fn default_planner_turns() -> u32 {
    10
}
fn default_stage_retries() -> u32 {
    2
}
fn default_rca_retries() -> u32 {
    2
}
fn default_pipeline_timeout_s() -> u64 {
    600
}
fn default_planner_timeout_s() -> u64 {
    300
}
fn default_user_reply_timeout_s() -> u64 {
    120
}
fn default_stage_timeout_s() -> u64 {
    120
}
fn default_validator_timeout_s() -> u64 {
    300
}
fn default_poll_interval_s() -> u64 {
    10
}
fn default_queue_capacity() -> usize {
    32
}
