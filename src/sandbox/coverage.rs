// src/sandbox/coverage.rs

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::config::ClientTimeout;
use crate::sandbox::{join_script, SandboxClient};
use crate::slots::ResultSlots;

/// Sentinel percentage meaning "coverage could not be measured": network
/// failure, malformed response, or a worker that never completed.
pub const COVERAGE_UNAVAILABLE: i64 = -3;

/// One (code, tests) pair to run against the coverage endpoint.
#[derive(Debug, Clone)]
pub struct CoverageRequest {
    pub source_code: String,
    /// Test lines joined with newlines before submission.
    pub tests: Vec<String>,
    pub timeout_secs: u64,
    pub client_timeout: ClientTimeout,
}

/// Coverage for one request; `percentage` is 0..=100 or
/// [`COVERAGE_UNAVAILABLE`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageResult {
    pub index: usize,
    pub percentage: i64,
}

/// Dispatch a batch of coverage requests with the same bounded-pool
/// discipline as the execution path.
///
/// Slots are pre-filled with the sentinel, so "never completed ⇒ -3" holds
/// by construction rather than by a post-processing pass.
pub async fn run_coverage_batch(
    client: &SandboxClient,
    requests: Vec<CoverageRequest>,
) -> Vec<CoverageResult> {
    let total = requests.len();
    let mut slots = ResultSlots::new_with(total, |index| CoverageResult {
        index,
        percentage: COVERAGE_UNAVAILABLE,
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
            let script = join_script(&request.source_code, &request.tests.join("\n"));
            let percentage = client
                .coverage_one(&script, request.timeout_secs, request.client_timeout)
                .await;
            drop(permit);
            (index, percentage)
        }));
    }

    for task in tasks {
        match task.await {
            Ok((index, Ok(percentage))) => {
                slots.write(index, CoverageResult { index, percentage });
            }
            Ok((index, Err(e))) => {
                // Slot already holds the sentinel; just record why.
                log::warn!("coverage request {index} failed: {e}");
            }
            Err(e) => log::error!("coverage worker died: {e}"),
        }
    }

    slots.into_vec()
}
