//! bulwark: drive a resilience combinator against a simulated downstream.
//!
//! The downstream fails its first `--failures` calls, then succeeds,
//! optionally sleeping `--latency` per call.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use bulwark_core::{
    operation_fn, Breaker, Context, DebounceFirst, DebounceLast, Error, Operation,
    ResilienceConfig, Retry, Throttle, Timeout,
};

#[derive(Parser)]
#[command(name = "bulwark", version, about = "Resilience combinator demo harness")]
struct Cli {
    /// YAML policy file (defaults are used when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    downstream: DownstreamArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Clone)]
struct DownstreamArgs {
    /// Number of calls to make
    #[arg(long, global = true, default_value_t = 5)]
    calls: u32,

    /// Calls the downstream fails before it starts succeeding
    #[arg(long, global = true, default_value_t = 2)]
    failures: u32,

    /// Time the downstream takes per call
    #[arg(long, global = true, value_parser = humantime::parse_duration, default_value = "0s")]
    latency: Duration,

    /// Pause between calls
    #[arg(long, global = true, value_parser = humantime::parse_duration, default_value = "100ms")]
    interval: Duration,
}

#[derive(Subcommand)]
enum Command {
    /// Retry failed calls with a fixed delay
    Retry {
        #[arg(long)]
        max_retries: Option<u32>,
        #[arg(long, value_parser = humantime::parse_duration)]
        delay: Option<Duration>,
    },
    /// Fail fast after consecutive failures
    Breaker {
        #[arg(long)]
        threshold: Option<u32>,
    },
    /// Token-bucket rate limit
    Throttle {
        #[arg(long)]
        max: Option<u32>,
        #[arg(long)]
        refill: Option<u32>,
        #[arg(long, value_parser = humantime::parse_duration)]
        period: Option<Duration>,
    },
    /// Serve the first result for a window
    DebounceFirst {
        #[arg(long, value_parser = humantime::parse_duration)]
        window: Option<Duration>,
    },
    /// Coalesce bursts into one delayed call
    DebounceLast {
        #[arg(long, value_parser = humantime::parse_duration)]
        window: Option<Duration>,
    },
    /// Race the downstream against a deadline
    Timeout {
        #[arg(long, value_parser = humantime::parse_duration)]
        deadline: Option<Duration>,
    },
}

fn downstream(
    args: &DownstreamArgs,
) -> (Arc<AtomicU32>, impl Operation<Output = String> + 'static) {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let failures = args.failures;
    let latency = args.latency;

    let op = operation_fn(move |_ctx: Context| {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            if n <= failures {
                Err(Error::msg(format!("transient failure #{}", n)))
            } else {
                Ok(format!("success #{}", n))
            }
        }
    });
    (calls, op)
}

async fn drive<O>(op: &O, args: &DownstreamArgs) -> Result<()>
where
    O: Operation,
    O::Output: std::fmt::Debug,
{
    let ctx = Context::background();
    for i in 1..=args.calls {
        match op.call(&ctx).await {
            Ok(value) => println!("call {}: ok {:?}", i, value),
            Err(e) => {
                tracing::debug!(call = i, error = ?e, "Call failed");
                println!("call {}: error {}", i, e)
            }
        }
        tokio::time::sleep(args.interval).await;
    }
    Ok(())
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Retry { .. } => "retry",
            Command::Breaker { .. } => "breaker",
            Command::Throttle { .. } => "throttle",
            Command::DebounceFirst { .. } => "debounce-first",
            Command::DebounceLast { .. } => "debounce-last",
            Command::Timeout { .. } => "timeout",
        }
    }
}

fn apply_overrides(config: &mut ResilienceConfig, command: &Command) {
    match *command {
        Command::Retry { max_retries, delay } => {
            config.retry.max_retries = max_retries.unwrap_or(config.retry.max_retries);
            config.retry.delay = delay.unwrap_or(config.retry.delay);
        }
        Command::Breaker { threshold } => {
            config.breaker.failure_threshold =
                threshold.unwrap_or(config.breaker.failure_threshold);
        }
        Command::Throttle { max, refill, period } => {
            config.throttle.max = max.unwrap_or(config.throttle.max);
            config.throttle.refill = refill.unwrap_or(config.throttle.refill);
            config.throttle.period = period.unwrap_or(config.throttle.period);
        }
        Command::DebounceFirst { window } | Command::DebounceLast { window } => {
            config.debounce.window = window.unwrap_or(config.debounce.window);
        }
        Command::Timeout { deadline } => {
            config.timeout.deadline = deadline.unwrap_or(config.timeout.deadline);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            let config = ResilienceConfig::from_yaml_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
            tracing::info!(path = %path.display(), "Loaded resilience config");
            config
        }
        None => {
            tracing::info!("No config file given, using defaults");
            ResilienceConfig::default()
        }
    };

    apply_overrides(&mut config, &cli.command);
    config.validate()?;
    tracing::info!(
        combinator = cli.command.name(),
        calls = cli.downstream.calls,
        failures = cli.downstream.failures,
        "Driving downstream"
    );

    let args = cli.downstream.clone();
    let (upstream_calls, op) = downstream(&args);

    match cli.command {
        Command::Retry { .. } => {
            drive(&Retry::with_config(op, config.retry.clone()), &args).await?;
        }
        Command::Breaker { .. } => {
            drive(&Breaker::with_config(op, config.breaker.clone()), &args).await?;
        }
        Command::Throttle { .. } => {
            drive(&Throttle::with_config(op, config.throttle.clone()), &args).await?;
        }
        Command::DebounceFirst { .. } => {
            drive(&DebounceFirst::new(op, config.debounce.window), &args).await?;
        }
        Command::DebounceLast { .. } => {
            let debounced = DebounceLast::with_config(op, config.debounce.clone());
            drive(&debounced, &args).await?;

            // Let the trailing call fire before reporting
            tokio::time::sleep(config.debounce.window + config.debounce.poll_interval * 2).await;
            println!(
                "after quiet period: {:?}",
                debounced.call(&Context::background()).await
            );
        }
        Command::Timeout { .. } => {
            let slow = Arc::new(op);
            let timeout = Timeout::new(move |input: u32| {
                let slow = slow.clone();
                async move {
                    // Context-unaware: the downstream never sees the deadline
                    let value = slow.call(&Context::background()).await?;
                    Ok(format!("{} (input {})", value, input))
                }
            });

            for i in 1..=args.calls {
                let ctx = Context::with_timeout(config.timeout.deadline);
                match timeout.call(&ctx, i).await {
                    Ok(value) => println!("call {}: ok {:?}", i, value),
                    Err(e) => println!("call {}: error {}", i, e),
                }
            }
        }
    }

    let invoked = upstream_calls.load(Ordering::SeqCst);
    println!("downstream invoked {} time(s)", invoked);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subcommand_name_and_overrides() {
        let cli = Cli::parse_from(["bulwark", "retry", "--max-retries", "1", "--calls", "3"]);
        assert_eq!(cli.command.name(), "retry");
        assert_eq!(cli.downstream.calls, 3);

        let mut config = ResilienceConfig::default();
        apply_overrides(&mut config, &cli.command);
        assert_eq!(config.retry.max_retries, 1);
        assert_eq!(config.retry.delay, ResilienceConfig::default().retry.delay);
    }

    #[test]
    fn test_debounce_window_override() {
        let cli = Cli::parse_from(["bulwark", "debounce-last", "--window", "250ms"]);
        assert_eq!(cli.command.name(), "debounce-last");

        let mut config = ResilienceConfig::default();
        apply_overrides(&mut config, &cli.command);
        assert_eq!(config.debounce.window, Duration::from_millis(250));
        assert!(config.validate().is_ok());
    }
}
