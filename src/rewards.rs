// src/rewards.rs
//! Consumption contract for the outer training loop: ordered reward
//! vectors over the execution and coverage paths, batch completion
//! dispatch, and fenced-code-block extraction for turning raw model
//! completions into runnable candidates.

use std::time::Duration;

use serde_json::Value;

use crate::config::ClientTimeout;
use crate::dispatcher::{ApiMode, ApiRequest, ApiResponse, CompletionProvider, Dispatcher};
use crate::sandbox::{
    run_coverage_batch, run_exec_batch, CoverageRequest, ExecOutcome, ExecutionRequest,
    SandboxClient, COVERAGE_UNAVAILABLE,
};

/// Tests passed.
pub const REWARD_PASS: i64 = 1;
/// Program ran but the tests failed.
pub const REWARD_FAIL: i64 = -1;
/// The outcome could not be determined (transport failure, timeout,
/// protocol violation). Same sentinel as the coverage path uses.
pub const REWARD_INFRA: i64 = COVERAGE_UNAVAILABLE;

fn execution_reward(outcome: &ExecOutcome) -> i64 {
    match outcome {
        ExecOutcome::Pass => REWARD_PASS,
        ExecOutcome::Fail => REWARD_FAIL,
        ExecOutcome::InfraError => REWARD_INFRA,
    }
}

/// Run each candidate against its tests and collapse to a reward vector.
///
/// Element *i* is 1 if candidate *i* passed, -1 if it failed, -3 if the
/// outcome could not be determined. `tests` and `stdins` are aligned by
/// index with `codes`; missing entries default to empty.
pub async fn run_execution_reward(
    client: &SandboxClient,
    codes: &[String],
    tests: &[String],
    stdins: Option<&[String]>,
    timeout_secs: u64,
    client_timeout: ClientTimeout,
) -> Vec<i64> {
    let requests: Vec<ExecutionRequest> = codes
        .iter()
        .enumerate()
        .map(|(i, code)| ExecutionRequest {
            source_code: code.clone(),
            test_code: tests.get(i).cloned().unwrap_or_default(),
            stdin: stdins.and_then(|s| s.get(i).cloned()),
            timeout_secs,
            client_timeout,
        })
        .collect();

    run_exec_batch(client, requests)
        .await
        .iter()
        .map(|r| execution_reward(&r.outcome))
        .collect()
}

/// Measure line coverage of each candidate's tests and collapse to a
/// percentage vector, with -3 wherever coverage could not be measured.
pub async fn run_coverage_reward(
    client: &SandboxClient,
    codes: &[String],
    tests: &[Vec<String>],
    timeout_secs: u64,
    client_timeout: ClientTimeout,
) -> Vec<i64> {
    let requests: Vec<CoverageRequest> = codes
        .iter()
        .enumerate()
        .map(|(i, code)| CoverageRequest {
            source_code: code.clone(),
            tests: tests.get(i).cloned().unwrap_or_default(),
            timeout_secs,
            client_timeout,
        })
        .collect();

    run_coverage_batch(client, requests)
        .await
        .iter()
        .map(|r| r.percentage)
        .collect()
}

/// Dispatch a batch of raw parameter mappings as completion requests in
/// the given mode, preserving input order.
pub async fn dispatch_completions<P: CompletionProvider>(
    dispatcher: &Dispatcher<P>,
    requests: Vec<Value>,
    mode: ApiMode,
    pacing: Option<Duration>,
) -> Vec<ApiResponse> {
    let requests = requests
        .into_iter()
        .map(|params| ApiRequest { params, mode })
        .collect();
    dispatcher.dispatch(requests, pacing).await
}

/// Extract fenced code blocks from a model completion, optionally keeping
/// only blocks whose language tag matches `tag` (case-insensitive).
/// Unclosed fences are ignored.
pub fn find_code_blocks(response: &str, tag: Option<&str>) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut search = 0;

    while let Some(open) = response[search..].find("```") {
        let fence_end = search + open + 3;
        let tag_line_end = response[fence_end..]
            .find('\n')
            .map(|n| fence_end + n)
            .unwrap_or(fence_end);
        let block_tag = response[fence_end..tag_line_end].trim();

        let code_start = if block_tag.is_empty() {
            fence_end
        } else {
            tag_line_end + 1
        };
        if code_start > response.len() {
            break;
        }

        let Some(close) = response[code_start..].find("```") else {
            break;
        };
        let code_end = code_start + close;

        if tag.is_none_or(|t| block_tag.eq_ignore_ascii_case(t)) {
            blocks.push(response[code_start..code_end].trim().to_string());
        }
        search = code_end + 3;
    }

    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reward_mapping_covers_all_outcomes() {
        assert_eq!(execution_reward(&ExecOutcome::Pass), 1);
        assert_eq!(execution_reward(&ExecOutcome::Fail), -1);
        assert_eq!(execution_reward(&ExecOutcome::InfraError), -3);
        assert_eq!(REWARD_INFRA, COVERAGE_UNAVAILABLE);
    }

    #[test]
    fn extracts_tagged_blocks_only() {
        let response = "Here is the fix:\n```python\nprint(1)\n```\nand a shell step:\n```bash\nls\n```";
        let blocks = find_code_blocks(response, Some("python"));
        assert_eq!(blocks, vec!["print(1)".to_string()]);
    }

    #[test]
    fn extracts_untagged_blocks_when_no_filter() {
        let response = "```\nraw block\n```";
        let blocks = find_code_blocks(response, None);
        assert_eq!(blocks, vec!["raw block".to_string()]);
    }

    #[test]
    fn tag_match_is_case_insensitive() {
        let response = "```Python\nx = 1\n```";
        assert_eq!(find_code_blocks(response, Some("python")).len(), 1);
    }

    #[test]
    fn unclosed_fence_is_ignored() {
        let response = "```python\nprint(1)";
        assert!(find_code_blocks(response, Some("python")).is_empty());
    }

    #[test]
    fn multiple_blocks_keep_document_order() {
        let response = "```python\nfirst\n```\ntext\n```python\nsecond\n```";
        assert_eq!(
            find_code_blocks(response, Some("python")),
            vec!["first".to_string(), "second".to_string()]
        );
    }
}
