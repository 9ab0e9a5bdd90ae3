#![allow(clippy::multiple_crate_versions)]

use clap::{Arg, ArgAction, Command};

mod commands;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn cli() -> Command {
    Command::new("safeflow")
        .version(VERSION)
        .about("SafeFlow - tiered content moderation")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .global(true)
                .help("TOML configuration file (defaults plus SAFEFLOW_* variables when omitted)"),
        )
        .subcommand(
            Command::new("check")
                .about("Moderate a single piece of content")
                .arg(
                    Arg::new("content")
                        .required(true)
                        .value_name("CONTENT")
                        .help("Text to moderate"),
                )
                .arg(
                    Arg::new("user")
                        .short('u')
                        .long("user")
                        .value_name("USER_ID")
                        .help("Submitting user"),
                ),
        )
        .subcommand(
            Command::new("batch")
                .about("Moderate a batch; prints one result per input in input order")
                .arg(
                    Arg::new("file")
                        .short('f')
                        .long("file")
                        .value_name("FILE")
                        .required(true)
                        .help("JSON batch request, or plain text with one content per line"),
                )
                .arg(
                    Arg::new("user")
                        .short('u')
                        .long("user")
                        .value_name("USER_ID")
                        .help("Submitting user for plain-text batches"),
                )
                .arg(
                    Arg::new("batch-id")
                        .long("batch-id")
                        .value_name("ID")
                        .help("Batch id for plain-text batches (defaults to the file name)"),
                ),
        )
        .subcommand(
            Command::new("watch")
                .about("Moderate stdin line by line until EOF or Ctrl+C")
                .arg(
                    Arg::new("user")
                        .short('u')
                        .long("user")
                        .value_name("USER_ID")
                        .help("Submitting user"),
                ),
        )
        .subcommand(
            Command::new("rules")
                .about("Inspect and edit the rule database")
                .subcommand_required(true)
                .subcommand(Command::new("list").about("List all rules, enabled or not"))
                .subcommand(
                    Command::new("seed").about("Install the default rules into an empty database"),
                )
                .subcommand(
                    Command::new("add")
                        .about("Add a rule")
                        .arg(Arg::new("pattern").required(true).value_name("PATTERN"))
                        .arg(
                            Arg::new("regex")
                                .long("regex")
                                .action(ArgAction::SetTrue)
                                .help("Treat PATTERN as a regular expression"),
                        )
                        .arg(
                            Arg::new("action")
                                .long("action")
                                .value_name("ACTION")
                                .default_value("block")
                                .help("block, review or allow"),
                        )
                        .arg(
                            Arg::new("group")
                                .long("group")
                                .value_name("GROUP")
                                .default_value("default"),
                        )
                        .arg(
                            Arg::new("priority")
                                .long("priority")
                                .value_name("N")
                                .default_value("0")
                                .value_parser(clap::value_parser!(i32)),
                        )
                        .arg(
                            Arg::new("description")
                                .long("description")
                                .value_name("TEXT")
                                .default_value(""),
                        ),
                )
                .subcommand(
                    Command::new("enable")
                        .about("Enable a rule")
                        .arg(rule_id_arg()),
                )
                .subcommand(
                    Command::new("disable")
                        .about("Disable a rule")
                        .arg(rule_id_arg()),
                )
                .subcommand(
                    Command::new("snapshot")
                        .about("Print a versioned policy document of the enabled rules"),
                ),
        )
        .subcommand(
            Command::new("audit")
                .about("Query the audit log")
                .subcommand_required(true)
                .subcommand(
                    Command::new("show")
                        .about("Show the audit record of one request")
                        .arg(Arg::new("request_id").required(true).value_name("REQUEST_ID")),
                )
                .subcommand(
                    Command::new("list")
                        .about("List audit records, newest first")
                        .arg(Arg::new("user").long("user").value_name("USER_ID"))
                        .arg(Arg::new("action").long("action").value_name("ACTION"))
                        .arg(Arg::new("source").long("source").value_name("SOURCE"))
                        .arg(
                            Arg::new("page")
                                .long("page")
                                .value_name("N")
                                .default_value("1")
                                .value_parser(clap::value_parser!(u32)),
                        )
                        .arg(
                            Arg::new("page-size")
                                .long("page-size")
                                .value_name("N")
                                .default_value("20")
                                .value_parser(clap::value_parser!(u32)),
                        ),
                ),
        )
}

fn rule_id_arg() -> Arg {
    Arg::new("id")
        .required(true)
        .value_name("ID")
        .value_parser(clap::value_parser!(i64))
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let matches = cli().get_matches();

    let config = match commands::load_config(&matches) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("✗ {}", e);
            std::process::exit(2);
        }
    };
    commands::init_tracing(&config.logging);

    let result = match matches.subcommand() {
        Some(("check", sub)) => commands::check::run(sub, config).await,
        Some(("batch", sub)) => commands::batch::run(sub, config).await,
        Some(("watch", sub)) => commands::watch::run(sub, config).await,
        Some(("rules", sub)) => commands::rules::run(sub, &config).await,
        Some(("audit", sub)) => commands::audit::run(sub, &config).await,
        _ => {
            println!("SafeFlow v{}", VERSION);
            println!("Use --help for available commands");
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("✗ {:#}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn parses_rule_add_flags() {
        let matches = cli()
            .try_get_matches_from([
                "safeflow", "rules", "add", "casino", "--priority", "7", "--action", "review",
            ])
            .unwrap();
        let (_, rules) = matches.subcommand().unwrap();
        let (name, add) = rules.subcommand().unwrap();
        assert_eq!(name, "add");
        assert_eq!(add.get_one::<i32>("priority"), Some(&7));
        assert_eq!(add.get_one::<String>("action").map(String::as_str), Some("review"));
        assert!(!add.get_flag("regex"));
    }
}
