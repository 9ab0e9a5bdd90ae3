use clap::ArgMatches;
use safeflow_runtime::Config;

use super::{print_json, start_runtime};

pub async fn run(matches: &ArgMatches, config: Config) -> anyhow::Result<()> {
    let content = matches
        .get_one::<String>("content")
        .cloned()
        .unwrap_or_default();
    let user_id = matches.get_one::<String>("user").cloned();

    let runtime = start_runtime(config).await?;
    let result = runtime.orchestrator.submit(content, user_id).await;
    runtime.shutdown().await;

    print_json(&result?)
}
