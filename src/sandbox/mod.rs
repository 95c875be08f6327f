// src/sandbox/mod.rs

use std::time::Duration;

use reqwest::Client;
use serde::Serialize;

use crate::config::{ClientTimeout, SandboxConfig};
use crate::errors::{Result, RewardError};

pub mod coverage;
pub mod exec;

pub use coverage::{run_coverage_batch, CoverageRequest, CoverageResult, COVERAGE_UNAVAILABLE};
pub use exec::{run_exec_batch, ExecOutcome, ExecutionRequest, ExecutionResult};

/// First line of a `/py_exec` response when the program ran cleanly.
/// The wire convention is inverted from the usual exit-code reading:
/// `"0"` means pass and `"1"` means fail. Named constants keep the
/// inversion from creeping back in as a bug.
pub const PASS_TOKEN: &str = "0";
/// First line of a `/py_exec` response when the program failed.
pub const FAIL_TOKEN: &str = "1";

#[derive(Serialize)]
struct ExecPayload<'a> {
    code: &'a str,
    timeout: u64,
    stdin: &'a str,
}

#[derive(Serialize)]
struct CoveragePayload<'a> {
    code: &'a str,
    timeout: u64,
}

/// Client for the sandbox executor's pass/fail and coverage endpoints.
///
/// Holds a shared `reqwest::Client`; cloning is cheap and every in-flight
/// call owns its own clone, so batches can fan out freely.
#[derive(Clone)]
pub struct SandboxClient {
    client: Client,
    config: SandboxConfig,
}

impl SandboxClient {
    pub fn new(client: Client, config: SandboxConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    fn call_deadline(
        &self,
        timeout_secs: u64,
        client_timeout: ClientTimeout,
        margin: Duration,
    ) -> Duration {
        let server = Duration::from_secs(timeout_secs);
        match client_timeout {
            ClientTimeout::Enforced => server + margin,
            // Even when the server owns the timeout, bound the call so a
            // hung sandbox cannot block the join barrier forever.
            ClientTimeout::ServerOnly => server + self.config.fallback_margin,
        }
    }

    /// Run one code-plus-tests script against `/py_exec`.
    ///
    /// Returns `(passed, output)`: captured stdout on pass, stderr on fail.
    /// A status token outside {"0", "1"} is a protocol violation.
    pub async fn exec_one(
        &self,
        code: &str,
        timeout_secs: u64,
        stdin: &str,
        client_timeout: ClientTimeout,
    ) -> Result<(bool, String)> {
        let url = format!("{}/py_exec", self.config.api_base.trim_end_matches('/'));
        let payload = ExecPayload {
            code,
            timeout: timeout_secs,
            stdin,
        };

        let resp = self
            .client
            .post(&url)
            .timeout(self.call_deadline(timeout_secs, client_timeout, self.config.exec_margin))
            .json(&payload)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "Could not read error body".to_string());
            return Err(RewardError::ApiError {
                status: status.as_u16(),
                body,
            });
        }

        let body = resp.text().await?;
        let (token, output) = body.split_once('\n').unwrap_or((body.as_str(), ""));
        match token.trim() {
            PASS_TOKEN => Ok((true, output.to_string())),
            FAIL_TOKEN => Ok((false, output.to_string())),
            other => Err(RewardError::Protocol(format!(
                "unexpected status token {other:?} from sandbox"
            ))),
        }
    }

    /// Run one code-plus-tests script against `/py_coverage`.
    ///
    /// Returns the line-coverage percentage reported by the server.
    pub async fn coverage_one(
        &self,
        code: &str,
        timeout_secs: u64,
        client_timeout: ClientTimeout,
    ) -> Result<i64> {
        let url = format!("{}/py_coverage", self.config.api_base.trim_end_matches('/'));
        let payload = CoveragePayload {
            code,
            timeout: timeout_secs,
        };

        let resp = self
            .client
            .post(&url)
            .timeout(self.call_deadline(
                timeout_secs,
                client_timeout,
                self.config.coverage_margin,
            ))
            .json(&payload)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "Could not read error body".to_string());
            return Err(RewardError::ApiError {
                status: status.as_u16(),
                body,
            });
        }

        let body = resp.text().await?;
        body.trim().parse::<i64>().map_err(|_| {
            RewardError::Protocol(format!("unparsable coverage percentage {:?}", body.trim()))
        })
    }
}

/// Join source and test code into one executable script body. Tests are
/// appended as top-level statements, separated by a blank line.
pub(crate) fn join_script(source: &str, tests: &str) -> String {
    if tests.is_empty() {
        format!("{source}\n\n")
    } else {
        format!("{source}\n\n{tests}")
    }
}
