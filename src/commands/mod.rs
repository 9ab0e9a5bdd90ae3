pub mod audit;
pub mod batch;
pub mod check;
pub mod rules;
pub mod watch;

use std::path::Path;

use clap::ArgMatches;
use safeflow_runtime::config::{LogFormat, LoggingConfig};
use safeflow_runtime::{Config, ConfigError, ModerationRuntime};
use tracing_subscriber::EnvFilter;

/// Configuration from `--config` (or defaults), with `SAFEFLOW_*` overrides.
pub fn load_config(matches: &ArgMatches) -> Result<Config, ConfigError> {
    let path = matches.get_one::<String>("config").map(Path::new);
    Config::load(path)
}

/// Structured logging to stderr so stdout stays machine-readable.
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Compact => builder.compact().init(),
    }
}

/// Build and start the full pipeline.
pub async fn start_runtime(config: Config) -> anyhow::Result<ModerationRuntime> {
    let runtime = ModerationRuntime::new(config).await?;
    runtime.start().await?;
    Ok(runtime)
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
