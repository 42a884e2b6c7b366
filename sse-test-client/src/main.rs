use anyhow::Result;
use clap::Parser;
use colored::*;
use std::time::Duration;

mod output;
mod scenarios;
mod sse_client;

use output::print_test_summary;

#[derive(Parser)]
#[command(name = "sse-test-client")]
#[command(about = "Chat relay SSE smoke testing tool")]
struct Cli {
    /// Base URL of the relay (e.g., http://localhost:8080)
    #[arg(long)]
    base_url: String,

    /// Broadcaster to subscribe to, with or without a leading @
    #[arg(long)]
    broadcaster: String,

    /// Test scenario to run
    #[arg(long, value_enum)]
    scenario: ScenarioChoice,

    /// Seconds to wait for each expected frame
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,

    /// Enable verbose output
    #[arg(long, short)]
    verbose: bool,
}

#[derive(clap::ValueEnum, Clone)]
enum ScenarioChoice {
    /// Subscribe once and check the confirmation frame
    ConnectionTest,
    /// Subscribe as @NAME and name and check they share one pool entry
    AliasTest,
    /// Check two subscribers receive the same chat message (needs a live broadcaster)
    FanOutTest,
    /// Print chat messages until Ctrl+C
    Watch,
    /// Run connection, alias and fan-out tests
    All,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    }

    let timeout = Duration::from_secs(cli.timeout_secs);
    let http = reqwest::Client::new();

    if let ScenarioChoice::Watch = cli.scenario {
        return scenarios::watch(&cli.base_url, &cli.broadcaster).await;
    }

    println!("\n{}", "=== TEST PHASE ===".bright_white().bold());

    let mut results = Vec::new();

    match cli.scenario {
        ScenarioChoice::ConnectionTest => {
            results.push(scenarios::test_connection(&cli.base_url, &cli.broadcaster, timeout).await?);
        }
        ScenarioChoice::AliasTest => {
            results.push(
                scenarios::test_alias(&http, &cli.base_url, &cli.broadcaster, timeout).await?,
            );
        }
        ScenarioChoice::FanOutTest => {
            results.push(scenarios::test_fan_out(&cli.base_url, &cli.broadcaster, timeout).await?);
        }
        ScenarioChoice::All => {
            results.push(scenarios::test_connection(&cli.base_url, &cli.broadcaster, timeout).await?);
            results.push(
                scenarios::test_alias(&http, &cli.base_url, &cli.broadcaster, timeout).await?,
            );
            results.push(scenarios::test_fan_out(&cli.base_url, &cli.broadcaster, timeout).await?);
        }
        ScenarioChoice::Watch => {}
    }

    // Print summary
    println!("\n{}", "=== RESULTS ===".bright_white().bold());
    print_test_summary(&results);

    let all_passed = results.iter().all(|r| r.passed);

    if all_passed {
        println!("\n{}", "All tests passed! ✓".bright_green().bold());
    } else {
        println!("\n{}", "Some tests failed! ✗".bright_red().bold());
    }

    std::process::exit(if all_passed { 0 } else { 1 });
}
