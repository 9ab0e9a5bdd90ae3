use anyhow::{bail, Context};
use clap::ArgMatches;
use safeflow_runtime::rules::{CompiledRule, NewRule, PolicyVersion, Rule, RuleAction};
use safeflow_runtime::{Config, SqliteRuleSource};

use super::print_json;

pub async fn run(matches: &ArgMatches, config: &Config) -> anyhow::Result<()> {
    let path = config
        .rules
        .db_path
        .clone()
        .unwrap_or_else(SqliteRuleSource::default_path);
    let source = SqliteRuleSource::open(&path)
        .with_context(|| format!("opening rule database {}", path.display()))?;
    match matches.subcommand() {
        Some(("list", _)) => {
            let rules = source.list_rules().await?;
            if rules.is_empty() {
                println!("(no rules)");
            }
            for rule in &rules {
                print_rule(rule);
            }
        }
        Some(("seed", _)) => match source.seed_defaults().await? {
            0 => println!("✓ Rule database already populated; nothing seeded"),
            n => println!("✓ Seeded {} default rules", n),
        },
        Some(("add", sub)) => {
            let rule = new_rule_from(sub)?;
            // Reject patterns the rule tier would skip at load time.
            CompiledRule::compile(rule.clone().into_rule(0))
                .with_context(|| format!("invalid pattern '{}'", rule.pattern))?;
            let stored = source.insert_rule(rule).await?;
            println!("✓ Added rule #{}", stored.id);
            print_rule(&stored);
        }
        Some(("enable", sub)) => set_enabled(&source, sub, true).await?,
        Some(("disable", sub)) => set_enabled(&source, sub, false).await?,
        Some(("snapshot", _)) => {
            let rules = source.list_rules().await?;
            print_json(&PolicyVersion::from_rules(&rules)?)?;
        }
        _ => bail!("unknown rules subcommand"),
    }
    Ok(())
}

fn new_rule_from(matches: &ArgMatches) -> anyhow::Result<NewRule> {
    let pattern = matches
        .get_one::<String>("pattern")
        .context("PATTERN is required")?;
    let mut rule = if matches.get_flag("regex") {
        NewRule::regex(pattern.as_str())
    } else {
        NewRule::keyword(pattern.as_str())
    };

    if let Some(action) = matches.get_one::<String>("action") {
        let action: RuleAction = action.parse().map_err(anyhow::Error::msg)?;
        rule = rule.action(action);
    }
    if let Some(group) = matches.get_one::<String>("group") {
        rule = rule.group(group.as_str());
    }
    if let Some(priority) = matches.get_one::<i32>("priority") {
        rule = rule.priority(*priority);
    }
    if let Some(description) = matches.get_one::<String>("description") {
        rule = rule.describe(description.as_str());
    }
    Ok(rule)
}

async fn set_enabled(
    source: &SqliteRuleSource,
    matches: &ArgMatches,
    enabled: bool,
) -> anyhow::Result<()> {
    let id = *matches.get_one::<i64>("id").context("ID is required")?;
    if !source.set_enabled(id, enabled).await? {
        bail!("no rule with id {}", id);
    }
    println!(
        "✓ Rule #{} {}",
        id,
        if enabled { "enabled" } else { "disabled" }
    );
    Ok(())
}

fn print_rule(rule: &Rule) {
    println!(
        "  {} #{:<4} [{:>3}] {:<7} {:<7} {:<10} {}{}",
        if rule.enabled { "•" } else { "◦" },
        rule.id,
        rule.priority,
        rule.kind.as_str(),
        rule.action.as_str(),
        rule.group,
        rule.pattern,
        if rule.description.is_empty() {
            String::new()
        } else {
            format!("  ({})", rule.description)
        }
    );
}
