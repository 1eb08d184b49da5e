use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ratewarden::config::{LoggingConfig, WardenConfig};
use ratewarden::ratelimit::{Decision, RuleSet, SlidingWindowLimiter, TokenBucketLimiter};

/// Simulate request streams against ratewarden's limiters.
#[derive(Debug, Parser)]
#[command(name = "ratewarden", version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit JSON log lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Drive a per-key sliding window limiter with wall-clock timestamps
    SlidingWindow(SlidingWindowArgs),
    /// Drive a token bucket limiter
    TokenBucket(TokenBucketArgs),
}

#[derive(Debug, Args)]
struct SlidingWindowArgs {
    /// Key to send requests for
    #[arg(long, default_value = "userid:demo/getBlogs")]
    key: String,

    /// Window size in seconds (ignored if the key has a configured rule)
    #[arg(long, default_value_t = 60)]
    window: u32,

    /// Requests allowed per window (ignored if the key has a configured rule)
    #[arg(long, default_value_t = 5)]
    limit: u32,

    /// Additional rule file
    #[arg(long)]
    rules: Option<PathBuf>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Debug, Args)]
struct TokenBucketArgs {
    /// Bucket capacity (defaults to the configured value)
    #[arg(long)]
    capacity: Option<u32>,

    /// Refill interval in milliseconds (defaults to the configured value)
    #[arg(long)]
    refill_ms: Option<u64>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Number of requests to send
    #[arg(long, default_value_t = 10)]
    requests: u32,

    /// Delay between requests in milliseconds
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,

    /// Print a JSON summary when the run ends
    #[arg(long)]
    report: bool,
}

/// Summary printed with `--report`.
#[derive(Debug, Default, Serialize)]
struct RunReport {
    limiter: &'static str,
    sent: u32,
    allowed: u32,
    rejected: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    usage: Option<std::collections::HashMap<String, u64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    available_tokens: Option<u32>,
}

impl RunReport {
    fn new(limiter: &'static str) -> Self {
        Self {
            limiter,
            ..Default::default()
        }
    }

    fn record(&mut self, decision: Decision) {
        self.sent += 1;
        match decision {
            Decision::Allow => self.allowed += 1,
            Decision::Reject => self.rejected += 1,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = WardenConfig::load(cli.config.as_deref())?;
    init_tracing(&config.logging, cli.json_logs);

    info!("Starting ratewarden");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let report = match cli.command {
        Command::SlidingWindow(args) => run_sliding_window(&config, args).await?,
        Command::TokenBucket(args) => run_token_bucket(&config, args).await?,
    };

    if let Some(report) = report {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    info!("ratewarden stopped");
    Ok(())
}

/// Initialize tracing. `RUST_LOG` takes precedence over the configured level.
fn init_tracing(logging: &LoggingConfig, json_logs: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    if json_logs || logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run_sliding_window(
    config: &WardenConfig,
    args: SlidingWindowArgs,
) -> anyhow::Result<Option<RunReport>> {
    let limiter = SlidingWindowLimiter::new();

    let mut rules = config.sliding_window.rule_set()?;
    if let Some(ref path) = args.rules {
        rules.rules.extend(RuleSet::from_file(path)?.rules);
    }
    let applied = limiter.apply_rules(&rules)?;
    info!(rules = applied, "Sliding window rules loaded");

    if limiter.config(&args.key).is_none() {
        limiter.configure(&args.key, args.window, args.limit)?;
    }

    let mut report = RunReport::new("sliding_window");
    let completed = simulate(&args.run, |n| {
        let now = chrono::Utc::now().timestamp();
        let decision = limiter.decide(&args.key, now);
        println!("Request {}: {}", n, decision);
        report.record(decision);
    })
    .await;

    if !completed {
        warn!(sent = report.sent, "Simulation interrupted");
    }

    report.usage = Some(limiter.current_usage());
    Ok(args.run.report.then_some(report))
}

async fn run_token_bucket(
    config: &WardenConfig,
    args: TokenBucketArgs,
) -> anyhow::Result<Option<RunReport>> {
    let capacity = args.capacity.unwrap_or(config.token_bucket.capacity);
    let refill_interval = args
        .refill_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| config.token_bucket.refill_interval());

    let bucket = TokenBucketLimiter::new(capacity, refill_interval)?;
    info!(
        capacity = capacity,
        refill_interval_ms = refill_interval.as_millis() as u64,
        "Token bucket initialized"
    );

    let mut report = RunReport::new("token_bucket");
    let completed = simulate(&args.run, |n| {
        let decision = bucket.try_consume();
        println!(
            "Request {}: {} (Available tokens: {})",
            n,
            decision,
            bucket.available_tokens()
        );
        report.record(decision);
    })
    .await;

    if !completed {
        warn!(sent = report.sent, "Simulation interrupted");
    }

    report.available_tokens = Some(bucket.available_tokens());
    Ok(args.run.report.then_some(report))
}

/// Call `send` once per request, spaced by the configured interval.
///
/// Returns `false` if a shutdown signal arrived before all requests were sent.
async fn simulate<F>(run: &RunArgs, mut send: F) -> bool
where
    F: FnMut(u32),
{
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    for n in 1..=run.requests {
        send(n);
        if n == run.requests {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(run.interval_ms)) => {}
            _ = &mut shutdown => return false,
        }
    }
    true
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping simulation");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping simulation");
        }
    }
}
