//! wine-pairing-cli: 食谱摘要、配酒建议与账户配额的命令行工具
//!
//! Usage:
//!   wine-pairing-cli summary <url|text>           Summarize a recipe
//!   wine-pairing-cli suggest <url|text>           Wine pairings as a JSON array
//!   wine-pairing-cli suggest-tools <url|text>     Pairings through the tool-calling agent
//!   wine-pairing-cli recent [n]                   Sample of recipes with cached pairings
//!   wine-pairing-cli login <account> <email>      Record a login and provision quota
//!   wine-pairing-cli whoami [account]             Show email and remaining quota
//!   wine-pairing-cli logout [account]             End the session
//!   wine-pairing-cli health                       Probe the key/value store

use anyhow::{bail, Context};
use std::path::PathBuf;
use std::sync::Arc;
use wine_pairing::cache::open_store;
use wine_pairing::{AccountRegistry, Config, KeyValueStore, QuotaLedger, RecentIndex, RecipePipeline};

const DEFAULT_ACCOUNT: &str = "local";

struct Options {
    config: Option<PathBuf>,
    account: String,
    command: String,
    args: Vec<String>,
}

fn parse_args(raw: Vec<String>) -> anyhow::Result<Options> {
    let mut config = None;
    let mut account = DEFAULT_ACCOUNT.to_string();
    let mut positional = Vec::new();

    let mut iter = raw.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                config = Some(PathBuf::from(iter.next().context("--config needs a path")?));
            }
            "--account" | "-a" => {
                account = iter.next().context("--account needs an id")?;
            }
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    let command = positional.next().unwrap_or_else(|| "help".to_string());
    Ok(Options {
        config,
        account,
        command,
        args: positional.collect(),
    })
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let opts = match parse_args(std::env::args().skip(1).collect()) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("Error: {e:#}");
            print_usage();
            std::process::exit(2);
        }
    };

    if let Err(e) = run(opts).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(opts: Options) -> anyhow::Result<()> {
    match opts.command.as_str() {
        "help" | "--help" | "-h" => {
            print_usage();
            return Ok(());
        }
        "version" | "--version" | "-V" => {
            println!("wine-pairing-cli {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        _ => {}
    }

    let config = Config::load(opts.config.as_deref()).context("unable to load configuration")?;

    match opts.command.as_str() {
        "summary" => {
            let pipeline = RecipePipeline::from_config(&config).await?;
            let input = joined_input(&opts.args)?;
            println!("{}", pipeline.summarize(&opts.account, &input).await?);
        }
        "suggest" => {
            let pipeline = RecipePipeline::from_config(&config).await?;
            let input = joined_input(&opts.args)?;
            println!("{}", pipeline.suggest(&opts.account, &input).await?);
        }
        "suggest-tools" => {
            let pipeline = RecipePipeline::from_config(&config).await?;
            let input = joined_input(&opts.args)?;
            println!("{}", pipeline.suggest_with_tools(&opts.account, &input).await?);
        }
        "recent" => {
            let n = match opts.args.first() {
                Some(n) => n.parse().with_context(|| format!("invalid sample size '{n}'"))?,
                None => config.recent_sample_size,
            };
            let recent = RecentIndex::new(open_store(&config.store).await?);
            println!("{}", recent.sample_recent_json(n).await?);
        }
        "login" => {
            let (account, email) = match opts.args.as_slice() {
                [account, email] => (account.as_str(), email.as_str()),
                [email] => (opts.account.as_str(), email.as_str()),
                _ => bail!("usage: login <account> <email>"),
            };
            let accounts = registry(&config, open_store(&config.store).await?);
            accounts.login(account, email).await?;
            println!("logged in {account}");
        }
        "whoami" => {
            let account = opts.args.first().unwrap_or(&opts.account);
            let accounts = registry(&config, open_store(&config.store).await?);
            let details = accounts.details(account).await?;
            println!("{}", serde_json::to_string_pretty(&details)?);
        }
        "logout" => {
            let account = opts.args.first().unwrap_or(&opts.account);
            let accounts = registry(&config, open_store(&config.store).await?);
            if accounts.logout(account).await? {
                println!("logged out {account}");
            } else {
                println!("no active session for {account}");
            }
        }
        "health" => {
            let store = open_store(&config.store).await?;
            if store.health_check().await? {
                println!("ok ({})", store.name());
            } else {
                bail!("store '{}' is unhealthy", store.name());
            }
        }
        other => {
            print_usage();
            bail!("unknown command: {other}");
        }
    }
    Ok(())
}

fn registry(config: &Config, store: Arc<dyn KeyValueStore>) -> AccountRegistry {
    let ledger = QuotaLedger::new(store.clone(), config.quota.clone());
    AccountRegistry::new(store, ledger, config.session_lifespan_secs)
}

fn joined_input(args: &[String]) -> anyhow::Result<String> {
    let input = args.join(" ");
    if input.trim().is_empty() {
        bail!("a recipe URL or recipe text is required");
    }
    Ok(input)
}

fn print_usage() {
    println!(
        r#"wine-pairing-cli: 食谱配酒命令行工具

USAGE:
    wine-pairing-cli [--config <yaml>] [--account <id>] <COMMAND> [ARGS]

COMMANDS:
    summary <url|text>          Summarize a recipe for pairing
    suggest <url|text>          Wine pairing suggestions (JSON array)
    suggest-tools <url|text>    Suggestions through the tool-calling agent
    recent [n]                  Sample of recipes with cached suggestions
    login <account> <email>     Record a login and provision quota
    whoami [account]            Show email and remaining quota
    logout [account]            End the session
    health                      Probe the key/value store
    version                     Show version information
    help                        Show this help message

ENVIRONMENT:
    WINE_STORE, REDIS_HOST, REDIS_PORT       Store selection
    WINE_MAX_QUOTA, WINE_QUOTA_LIFESPAN_SECS Quota defaults
    ANTHROPIC_API_KEY, WINE_MODEL            Model access
    RUST_LOG                                 Log filter (default: info)"#
    );
}
