use clap::ArgMatches;
use safeflow_runtime::Config;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};

use super::start_runtime;

/// One JSON line per input line on stdout. Errors are reported inline and do
/// not stop the stream.
pub async fn run(matches: &ArgMatches, config: Config) -> anyhow::Result<()> {
    let user_id = matches.get_one::<String>("user").cloned();
    let runtime = start_runtime(config).await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    eprintln!("✓ Reading content from stdin (Ctrl+C to stop)");
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                let output = match runtime.orchestrator.submit(line, user_id.clone()).await {
                    Ok(verdict) => serde_json::to_value(&verdict)?,
                    Err(e) => json!({ "error": e.to_string() }),
                };
                println!("{}", output);
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n✓ Interrupted");
                break;
            }
        }
    }

    runtime.shutdown().await;
    let stats = runtime.audit_stats();
    tracing::info!(persisted = stats.persisted, failures = stats.failures, "Stream finished");
    Ok(())
}
