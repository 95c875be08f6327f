// src/main.rs
use serde::Deserialize;

use sandbox_rewards::config::{AppConfig, ClientTimeout};
use sandbox_rewards::rewards;
use sandbox_rewards::sandbox::SandboxClient;

/// One candidate in a batch file: generated code plus the tests it must
/// satisfy.
#[derive(Deserialize)]
struct BatchItem {
    code: String,
    #[serde(default)]
    tests: Vec<String>,
    #[serde(default)]
    stdin: Option<String>,
}

fn usage() -> ! {
    eprintln!("Usage: sandbox-rewards <batch.json> [--coverage] [--timeout <secs>]");
    std::process::exit(2);
}

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Warning: could not load .env file: {e}");
    }

    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let mut args = std::env::args().skip(1);
    let Some(path) = args.next() else { usage() };
    let mut coverage = false;
    let mut timeout_secs: u64 = 30;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--coverage" => coverage = true,
            "--timeout" => {
                timeout_secs = args
                    .next()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_else(|| usage());
            }
            _ => usage(),
        }
    }

    let app_config = AppConfig::from_env().expect("Failed to load configuration from environment");
    let client = SandboxClient::new(reqwest::Client::new(), app_config.sandbox);

    let raw = std::fs::read_to_string(&path).expect("Failed to read batch file");
    let items: Vec<BatchItem> = serde_json::from_str(&raw).expect("Failed to parse batch file");

    log::info!(
        "dispatching {} candidate(s) to {} ({} path, timeout {}s)",
        items.len(),
        client.config().api_base,
        if coverage { "coverage" } else { "execution" },
        timeout_secs
    );

    let values = if coverage {
        let codes: Vec<String> = items.iter().map(|i| i.code.clone()).collect();
        let tests: Vec<Vec<String>> = items.iter().map(|i| i.tests.clone()).collect();
        rewards::run_coverage_reward(&client, &codes, &tests, timeout_secs, ClientTimeout::Enforced)
            .await
    } else {
        let codes: Vec<String> = items.iter().map(|i| i.code.clone()).collect();
        let tests: Vec<String> = items.iter().map(|i| i.tests.join("\n")).collect();
        let stdins: Vec<String> = items
            .iter()
            .map(|i| i.stdin.clone().unwrap_or_default())
            .collect();
        rewards::run_execution_reward(
            &client,
            &codes,
            &tests,
            Some(&stdins),
            timeout_secs,
            ClientTimeout::Enforced,
        )
        .await
    };

    println!("{}", serde_json::to_string(&values).expect("reward vector serializes"));
}
