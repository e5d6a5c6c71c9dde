use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use authlimit::config::{AuthlimitConfig, LoggingConfig};
use authlimit::ratelimit::{RateLimitRule, RuleSet};
use authlimit::{RateLimiter, RequestContext};

#[derive(Parser, Debug)]
#[command(name = "authlimit", version, about = "Adaptive rate limiting for authentication endpoints")]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the effective rule set as YAML
    Rules,

    /// Run rate limit checks for an identifier and print each decision
    Check {
        identifier: String,

        #[arg(long)]
        ip: Option<String>,

        #[arg(long)]
        user: Option<String>,

        #[arg(long)]
        session: Option<String>,

        #[arg(long)]
        user_agent: Option<String>,

        /// Number of consecutive checks
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AuthlimitConfig::load(cli.config.as_deref())
        .context("Failed to load configuration")?;
    init_tracing(&config.logging);

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let limiter = RateLimiter::builder()
        .config(config.limiter)
        .rules(config.rules)
        .build()
        .context("Failed to build rate limiter")?;

    match cli.command {
        Command::Rules => {
            let set = RuleSet {
                rules: limiter
                    .rules()
                    .iter()
                    .map(|rule| RateLimitRule::clone(rule))
                    .collect(),
            };
            print!("{}", set.to_yaml()?);
        }
        Command::Check {
            identifier,
            ip,
            user,
            session,
            user_agent,
            count,
        } => {
            let context = RequestContext {
                user_id: user,
                session_id: session,
                source_ip: ip,
                user_agent,
            };

            limiter.refresh_load().await;
            for _ in 0..count {
                let result = limiter.check_rate_limit(&identifier, Some(&context)).await;
                println!("{}", serde_json::to_string(&result)?);
            }
            println!("{}", serde_json::to_string(&limiter.get_stats())?);
        }
    }

    limiter.destroy()?;
    Ok(())
}

/// Logs go to stderr so command output stays machine readable.
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}
