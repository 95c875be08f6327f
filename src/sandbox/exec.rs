// src/sandbox/exec.rs

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::config::ClientTimeout;
use crate::sandbox::{join_script, SandboxClient};
use crate::slots::ResultSlots;

/// One (code, test, stdin) triple to run against the pass/fail endpoint.
/// Immutable once submitted.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub source_code: String,
    /// Test statements appended after the source; may be empty to just
    /// check that the code runs.
    pub test_code: String,
    pub stdin: Option<String>,
    pub timeout_secs: u64,
    pub client_timeout: ClientTimeout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    Pass,
    Fail,
    /// Transport error, timeout, protocol violation, or a worker that
    /// never resolved. Distinct from a genuine test failure.
    InfraError,
}

/// Exactly one per submitted request; `index` matches the request's
/// position in the batch.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub index: usize,
    pub outcome: ExecOutcome,
    /// Captured stdout on pass, stderr on fail, error text on infra error.
    pub output: String,
}

/// Dispatch a batch of execution requests with bounded concurrency and
/// collect results in input order.
///
/// At most `min(config.max_workers, batch_len)` calls are in flight at
/// once. Every failure mode resolves locally into an `InfraError` slot;
/// nothing escapes this function as an error.
pub async fn run_exec_batch(
    client: &SandboxClient,
    requests: Vec<ExecutionRequest>,
) -> Vec<ExecutionResult> {
    let total = requests.len();
    let mut slots = ResultSlots::new_with(total, |index| ExecutionResult {
        index,
        outcome: ExecOutcome::InfraError,
        output: "task never completed".to_string(),
    });

    let cap = client.config().max_workers.min(total).max(1);
    let semaphore = Arc::new(Semaphore::new(cap));
    let mut tasks = Vec::with_capacity(total);

    for (index, request) in requests.into_iter().enumerate() {
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore is never closed");
        let client = client.clone();

        tasks.push(tokio::spawn(async move {
            let script = join_script(&request.source_code, &request.test_code);
            let stdin = request.stdin.as_deref().unwrap_or("");
            let outcome = client
                .exec_one(&script, request.timeout_secs, stdin, request.client_timeout)
                .await;
            drop(permit);
            (index, outcome)
        }));
    }

    for task in tasks {
        match task.await {
            Ok((index, Ok((passed, output)))) => {
                let outcome = if passed {
                    ExecOutcome::Pass
                } else {
                    ExecOutcome::Fail
                };
                slots.write(
                    index,
                    ExecutionResult {
                        index,
                        outcome,
                        output,
                    },
                );
            }
            Ok((index, Err(e))) => {
                log::warn!("exec request {index} failed: {e}");
                slots.write(
                    index,
                    ExecutionResult {
                        index,
                        outcome: ExecOutcome::InfraError,
                        output: format!("Failed to execute program: {e}"),
                    },
                );
            }
            // The worker panicked or was aborted; its slot keeps the
            // pre-filled sentinel.
            Err(e) => log::error!("exec worker died: {e}"),
        }
    }

    slots.into_vec()
}
