use std::path::Path;

use anyhow::Context;
use clap::ArgMatches;
use safeflow_runtime::{BatchRequest, Config};

use super::{print_json, start_runtime};

pub async fn run(matches: &ArgMatches, config: Config) -> anyhow::Result<()> {
    let file = matches
        .get_one::<String>("file")
        .context("--file is required")?;
    let raw = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("reading {}", file))?;
    let mut batch = parse_batch(Path::new(file), &raw, matches.get_one::<String>("user").cloned())?;
    if let Some(batch_id) = matches.get_one::<String>("batch-id") {
        batch.batch_id = batch_id.clone();
    }

    let runtime = start_runtime(config).await?;
    let response = runtime.orchestrator.handle_batch(batch).await;
    runtime.shutdown().await;

    let failed = response.results.iter().filter(|r| r.error.is_some()).count();
    if failed > 0 {
        eprintln!("⚠️  {} of {} items failed", failed, response.results.len());
    }
    print_json(&response)
}

/// A `.json` file holds a batch request; anything else is one content per
/// non-empty line.
fn parse_batch(path: &Path, raw: &str, user_id: Option<String>) -> anyhow::Result<BatchRequest> {
    if path.extension().is_some_and(|ext| ext == "json") {
        let mut batch: BatchRequest =
            serde_json::from_str(raw).with_context(|| format!("parsing {}", path.display()))?;
        if batch.user_id.is_none() {
            batch.user_id = user_id;
        }
        return Ok(batch);
    }

    let batch_id = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "batch".to_string());
    Ok(BatchRequest {
        batch_id,
        contents: raw
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(String::from)
            .collect(),
        user_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_one_item_per_line() {
        let batch = parse_batch(
            Path::new("/tmp/posts.txt"),
            "first post\n\n  \nsecond post\n",
            Some("mod".into()),
        )
        .unwrap();
        assert_eq!(batch.batch_id, "posts");
        assert_eq!(batch.contents, vec!["first post", "second post"]);
        assert_eq!(batch.user_id.as_deref(), Some("mod"));
    }

    #[test]
    fn json_batch_keeps_its_own_user() {
        let raw = r#"{"batch_id":"b1","contents":["a","b"],"user_id":"alice"}"#;
        let batch = parse_batch(Path::new("b.json"), raw, Some("cli".into())).unwrap();
        assert_eq!(batch.batch_id, "b1");
        assert_eq!(batch.contents.len(), 2);
        assert_eq!(batch.user_id.as_deref(), Some("alice"));
    }

    #[test]
    fn malformed_json_batch_is_an_error() {
        assert!(parse_batch(Path::new("b.json"), "{", None).is_err());
    }
}
