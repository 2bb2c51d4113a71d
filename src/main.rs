use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use tatlimit::config::{StoreKind, TatlimitConfig};
use tatlimit::ratelimit::{Decision, Limit, PolicySet, RateLimiter};
use tatlimit::telemetry;

/// Query and manage GCRA rate limits held in a shared store.
#[derive(Debug, Parser)]
#[command(name = "tatlimit", version)]
struct Cli {
    /// Configuration file (YAML)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Key namespace, overrides the configured prefix
    #[arg(long, global = true)]
    prefix: Option<String>,

    /// Use an in-process store instead of the configured one
    #[arg(long, global = true)]
    memory: bool,

    /// Print decisions as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Ask for a single event
    Allow(LimitArgs),
    /// Ask for exactly N events, all or nothing
    AllowN {
        #[command(flatten)]
        limit: LimitArgs,
        /// Number of events
        #[arg(short)]
        n: u64,
    },
    /// Ask for up to N events
    AllowAtMost {
        #[command(flatten)]
        limit: LimitArgs,
        /// Maximum number of events
        #[arg(short)]
        n: u64,
    },
    /// Forget a key's state
    Reset {
        /// Key to reset
        key: String,
    },
    /// List the configured named policies
    Policies,
}

#[derive(Debug, Args)]
struct LimitArgs {
    /// Subject key
    key: String,

    /// Named policy from the policies file
    #[arg(long, conflicts_with_all = ["rate", "burst", "period"])]
    policy: Option<String>,

    /// Events per period
    #[arg(long)]
    rate: Option<u64>,

    /// Instantaneous spike allowance, defaults to the rate
    #[arg(long)]
    burst: Option<u64>,

    /// Period in seconds
    #[arg(long, default_value_t = 1.0)]
    period: f64,
}

impl LimitArgs {
    fn resolve(&self, policies: &PolicySet) -> anyhow::Result<Limit> {
        if let Some(name) = &self.policy {
            return Ok(policies.limit(name)?);
        }
        let Some(rate) = self.rate else {
            bail!("either --policy or --rate is required");
        };
        if !self.period.is_finite() || self.period <= 0.0 {
            bail!("--period must be a positive number of seconds");
        }
        Ok(Limit::new(
            rate,
            self.burst.unwrap_or(rate),
            Duration::from_secs_f64(self.period),
        ))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = TatlimitConfig::load(cli.config.as_deref())
        .context("failed to load configuration")?;
    telemetry::init(&config.logging);

    if cli.memory {
        config.store.kind = StoreKind::Memory;
    }
    if let Some(prefix) = &cli.prefix {
        config.limiter.key_prefix = prefix.clone();
    }

    let policies = match &config.policies_path {
        Some(path) => PolicySet::from_file(path)?,
        None => PolicySet::new(),
    };

    let decision = match &cli.command {
        Command::Policies => {
            for (name, limit) in policies.iter() {
                match limit {
                    Ok(limit) => println!("{name}: {limit}"),
                    Err(e) => println!("{name}: invalid ({e})"),
                }
            }
            return Ok(ExitCode::SUCCESS);
        }
        Command::Reset { key } => {
            let removed = connect(&config).await?.reset(key).await?;
            println!("{}", if removed { "reset" } else { "not found" });
            return Ok(ExitCode::SUCCESS);
        }
        Command::Allow(args) => {
            let limit = args.resolve(&policies)?;
            connect(&config).await?.allow(&args.key, &limit).await?
        }
        Command::AllowN { limit, n } => {
            let resolved = limit.resolve(&policies)?;
            connect(&config).await?.allow_n(&limit.key, &resolved, *n).await?
        }
        Command::AllowAtMost { limit, n } => {
            let resolved = limit.resolve(&policies)?;
            connect(&config)
                .await?
                .allow_at_most(&limit.key, &resolved, *n)
                .await?
        }
    };

    print_decision(&decision, cli.json)?;

    // Denials carry a non-negative wait; anything else may proceed.
    Ok(if decision.retry_after_duration().is_none() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}

async fn connect(config: &TatlimitConfig) -> anyhow::Result<RateLimiter> {
    let limiter = RateLimiter::from_config(&config.store, &config.limiter)
        .await
        .context("failed to connect to the rate limit store")?;
    info!(store = ?config.store.kind, prefix = %limiter.prefix(), "Rate limiter ready");
    Ok(limiter)
}

fn print_decision(decision: &Decision, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(decision)?);
    } else {
        println!("{decision}");
    }
    Ok(())
}
