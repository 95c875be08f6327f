// src/config.rs
use std::time::Duration;

use crate::errors::{Result, RewardError};

/// How a sandbox call is bounded on the client side.
///
/// `Enforced` applies the tight per-endpoint margin on top of the server
/// timeout. `ServerOnly` trusts the server to enforce its own timeout but
/// still applies a wide safety ceiling so a misbehaving sandbox can never
/// hang the join barrier indefinitely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientTimeout {
    Enforced,
    ServerOnly,
}

/// Configuration for the sandbox executor client.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Base URL of the executor, e.g. `http://localhost:8000`.
    pub api_base: String,
    /// Upper bound on concurrent in-flight sandbox calls per batch.
    pub max_workers: usize,
    /// Client-side margin on top of the server timeout for `/py_exec`.
    pub exec_margin: Duration,
    /// Client-side margin for `/py_coverage`; coverage instrumentation is
    /// slower than plain execution.
    pub coverage_margin: Duration,
    /// Safety ceiling added to the server timeout in `ServerOnly` mode.
    pub fallback_margin: Duration,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:8000".to_string(),
            max_workers: 32,
            exec_margin: Duration::from_secs(2),
            coverage_margin: Duration::from_secs(20),
            fallback_margin: Duration::from_secs(120),
        }
    }
}

/// Exponential-backoff retry policy for the completion dispatcher.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub min_wait: Duration,
    pub max_wait: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            min_wait: Duration::from_secs(5),
            max_wait: Duration::from_secs(20),
        }
    }
}

impl RetryConfig {
    /// Backoff before the next attempt: doubles from `min_wait`, capped at
    /// `max_wait`. `attempt` is 1-based.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let doubled = self
            .min_wait
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16));
        doubled.min(self.max_wait)
    }
}

/// Configuration for the upstream completion provider.
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    pub api_base: String,
    pub api_key: String,
    pub retry: RetryConfig,
}

/// High-level application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub sandbox: SandboxConfig,
    pub completion: Option<CompletionConfig>,
}

fn env_duration_secs(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// `SANDBOX_API_BASE` is required; everything else has defaults.
    /// The completion section is only present when `COMPLETION_API_KEY`
    /// is set.
    pub fn from_env() -> Result<Self> {
        let api_base = std::env::var("SANDBOX_API_BASE").map_err(|_| {
            RewardError::Config(
                "No sandbox executor configured. Please set SANDBOX_API_BASE.".to_string(),
            )
        })?;

        let defaults = SandboxConfig::default();
        let max_workers = std::env::var("SANDBOX_MAX_WORKERS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.max_workers);

        let sandbox = SandboxConfig {
            api_base,
            max_workers,
            exec_margin: env_duration_secs("SANDBOX_EXEC_MARGIN_SECS", defaults.exec_margin),
            coverage_margin: env_duration_secs(
                "SANDBOX_COVERAGE_MARGIN_SECS",
                defaults.coverage_margin,
            ),
            fallback_margin: env_duration_secs(
                "SANDBOX_FALLBACK_MARGIN_SECS",
                defaults.fallback_margin,
            ),
        };

        let completion = std::env::var("COMPLETION_API_KEY").ok().map(|api_key| {
            let api_base = std::env::var("COMPLETION_API_BASE")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
            CompletionConfig {
                api_base,
                api_key,
                retry: RetryConfig::default(),
            }
        });

        Ok(AppConfig { sandbox, completion })
    }
}
