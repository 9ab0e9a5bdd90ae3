use anyhow::{bail, Context};
use clap::ArgMatches;
use safeflow_runtime::{
    Action, AuditQuery, AuditStore, Config, RequestId, SqliteAuditStore, VerdictSource,
};

use super::print_json;

pub async fn run(matches: &ArgMatches, config: &Config) -> anyhow::Result<()> {
    let path = config
        .audit
        .db_path
        .clone()
        .unwrap_or_else(SqliteAuditStore::default_path);
    let store = SqliteAuditStore::open(&path)
        .with_context(|| format!("opening audit database {}", path.display()))?;

    match matches.subcommand() {
        Some(("show", sub)) => {
            let raw = sub
                .get_one::<String>("request_id")
                .context("REQUEST_ID is required")?;
            let request_id: RequestId = raw
                .parse()
                .with_context(|| format!("'{}' is not a request id", raw))?;
            match store.get(request_id).await? {
                Some(event) => print_json(&event)?,
                None => bail!("no audit record for {}", request_id),
            }
        }
        Some(("list", sub)) => {
            let query = query_from(sub)?;
            print_json(&store.query(&query).await?)?;
        }
        _ => bail!("unknown audit subcommand"),
    }
    Ok(())
}

fn query_from(matches: &ArgMatches) -> anyhow::Result<AuditQuery> {
    Ok(AuditQuery {
        user_id: matches.get_one::<String>("user").cloned(),
        action: matches
            .get_one::<String>("action")
            .map(|a| a.parse::<Action>())
            .transpose()
            .map_err(anyhow::Error::msg)?,
        source: matches
            .get_one::<String>("source")
            .map(|s| s.parse::<VerdictSource>())
            .transpose()
            .map_err(anyhow::Error::msg)?,
        page: matches.get_one::<u32>("page").copied().unwrap_or(1),
        page_size: matches.get_one::<u32>("page-size").copied().unwrap_or(20),
    })
}
