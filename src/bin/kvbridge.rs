//! kvbridge command-line tool
//!
//! Drives a connection against the built-in memory engine:
//! - Run line scripts of get/set/remove and async batches
//! - Benchmark async admission and draining
//! - Print metrics and the effective configuration
//!
//! # Examples
//!
//! ```bash
//! # Execute a script
//! kvbridge run ops.kv
//!
//! # Async benchmark with a limit of 64
//! kvbridge bench --ops 10000 --limit 64
//!
//! # Show configuration as TOML
//! kvbridge --config kvbridge.toml config
//! ```

use anyhow::{bail, Context as _};
use clap::{Args, Parser, Subcommand};
use kvbridge::connection::{GetOptions, SetOptions};
use kvbridge::{Client, ClientConfig, MemoryTransport, Outcome};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// kvbridge - synchronous and batched access to a callback-driven key-value engine
#[derive(Parser, Debug)]
#[command(name = "kvbridge")]
#[command(version = kvbridge::VERSION)]
#[command(about = "Ticket-correlated sync and async key-value client", long_about = None)]
#[command(author = "Anton Feldmann <anton.feldmann@gmail.com>")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(long, global = true, env = "KVBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Also write daily-rotated logs to this directory
    #[arg(long, global = true, env = "KVBRIDGE_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute a line script against the memory engine
    Run {
        /// Script path; one command per line
        script: PathBuf,
    },

    /// Benchmark async admission and draining
    Bench(BenchArgs),

    /// Print Prometheus metrics after a short warm-up
    Metrics,

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Args, Debug)]
struct BenchArgs {
    /// Total operations to complete
    #[arg(long, default_value = "10000")]
    ops: usize,

    /// Admission limit
    #[arg(long, default_value = "20")]
    limit: usize,

    /// Spread of simulated reply latency in milliseconds
    #[arg(long, default_value = "8")]
    latency_spread_ms: u64,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli)?;

    let config = ClientConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Run { script } => run_command(&config, script),
        Commands::Bench(args) => bench_command(&config, args),
        Commands::Metrics => metrics_command(&config),
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

/// Setup console logging plus optional rolling files
fn setup_logging(cli: &Cli) -> anyhow::Result<()> {
    let file_layer = match &cli.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, "kvbridge.log");
            Some(fmt::layer().with_writer(appender).with_ansi(false))
        }
        None => None,
    };

    let log_level = cli
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::WARN);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(!cli.no_color),
        )
        .with(file_layer)
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .init();

    Ok(())
}

fn connect(config: &ClientConfig) -> anyhow::Result<Client<MemoryTransport>> {
    Ok(Client::connect(MemoryTransport::new(), config)?)
}

/// Run command - execute a script line by line
fn run_command(config: &ClientConfig, script: PathBuf) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(&script)
        .with_context(|| format!("reading script {}", script.display()))?;
    let mut client = connect(config)?;

    for (n, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let words: Vec<&str> = line.split_whitespace().collect();
        match execute_line(&mut client, &words) {
            Ok(output) => println!("{output}"),
            Err(e) => println!("line {}: error: {e}", n + 1),
        }
    }

    let stats = client.close();
    info!(?stats, "Script finished");
    Ok(())
}

fn parse_ms(word: Option<&&str>) -> anyhow::Result<Option<Duration>> {
    word.map(|w| w.parse::<u64>().map(Duration::from_millis))
        .transpose()
        .context("expected milliseconds")
}

fn execute_line(client: &mut Client<MemoryTransport>, words: &[&str]) -> anyhow::Result<String> {
    let conn = client.connection_mut();
    let output = match words {
        ["set", key, value, rest @ ..] => {
            let mut options = SetOptions::default();
            if let Some(ttl) = parse_ms(rest.first())? {
                options = options.ttl(ttl);
            }
            let cas = conn.set(key, value, options)?;
            format!("stored {key} cas={cas}")
        }
        ["get", key, rest @ ..] => {
            let mut options = GetOptions::default().with_cas();
            if let Some(timeout) = parse_ms(rest.first())? {
                options = options.timeout(timeout);
            }
            match conn.get(key, options)? {
                Some(f) => format!(
                    "{key} = {} cas={}",
                    String::from_utf8_lossy(&f.value),
                    f.cas.unwrap_or_default()
                ),
                None => format!("{key} not found"),
            }
        }
        ["remove", key] => {
            conn.remove(key, Default::default())?;
            format!("removed {key}")
        }
        ["async", "on"] => {
            conn.enable_async();
            "async on".to_string()
        }
        ["async", "off"] => {
            conn.disable_async();
            "async off".to_string()
        }
        ["limit", n] => {
            conn.set_admission_limit(n.parse()?)?;
            format!("limit {}", conn.admission_limit())
        }
        ["latency", key, ms] => {
            let latency = Duration::from_millis(ms.parse()?);
            conn.transport_mut().set_key_latency(key.to_string(), latency);
            format!("latency {key} {}ms", latency.as_millis())
        }
        ["advance", ms] => {
            conn.transport_mut().advance(Duration::from_millis(ms.parse()?));
            format!("clock {:?}", conn.transport().now())
        }
        ["submit-get", key] => format!("ticket {}", conn.submit_get(key, None)?),
        ["submit-set", key, value] => {
            format!("ticket {}", conn.submit_set(key, value, SetOptions::default())?)
        }
        ["submit-remove", key] => {
            format!("ticket {}", conn.submit_remove(key, Default::default())?)
        }
        ["drain", rest @ ..] => {
            let entries = conn.drain(parse_ms(rest.first())?)?;
            let mut out = format!("drained {} (pending {})", entries.len(), conn.pending_count());
            for (id, outcome) in entries {
                out.push_str(&format!("\n  {id} {}", describe(&outcome)));
            }
            out
        }
        _ => bail!("unknown command: {}", words.join(" ")),
    };
    Ok(output)
}

fn describe(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Value { value, cas } => {
            format!("value {} cas={cas}", String::from_utf8_lossy(value))
        }
        Outcome::Stored { cas } => format!("stored cas={cas}"),
        Outcome::Removed => "removed".to_string(),
        Outcome::NotFound => "not found".to_string(),
        Outcome::Failed(e) => format!("error: {e}"),
    }
}

/// Bench command - keep the admission window full until `ops` complete
fn bench_command(config: &ClientConfig, args: BenchArgs) -> anyhow::Result<()> {
    let mut client = connect(config)?;
    client.set_async_limit(args.limit)?;
    let conn = client.connection_mut();

    let spread = args.latency_spread_ms.max(1);
    for i in 0..spread {
        conn.transport_mut()
            .set_key_latency(format!("bench:{i}"), Duration::from_millis(i + 1));
    }
    conn.enable_async();

    let started = conn.transport().now();
    let (mut submitted, mut completed, mut failed, mut rejected) = (0usize, 0usize, 0usize, 0usize);
    while completed < args.ops {
        while submitted < args.ops {
            let key = format!("bench:{}", submitted as u64 % spread);
            let result = if submitted % 2 == 0 {
                conn.submit_set(&key, submitted.to_string(), SetOptions::default())
            } else {
                conn.submit_get(&key, None)
            };
            match result {
                Ok(_) => submitted += 1,
                Err(kvbridge::Error::AdmissionLimitExceeded(_)) => {
                    rejected += 1;
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }
        let entries = conn.drain(Some(Duration::from_millis(1)))?;
        if entries.is_empty() && conn.pending_count() == 0 && submitted >= args.ops {
            warn!(completed, "No further completions possible");
            break;
        }
        failed += entries.iter().filter(|(_, o)| o.is_failure()).count();
        completed += entries.len();
    }
    let elapsed = conn.transport().now() - started;

    println!("operations:  {completed}");
    println!("failed:      {failed}");
    println!("rejections:  {rejected}");
    println!("limit:       {}", conn.admission_limit());
    println!("virtual time {:?}", elapsed);
    println!(
        "pool:        {} tickets carved, {} timeouts carved",
        conn.pool_stats().tickets.carved,
        conn.pool_stats().timeouts.carved
    );
    client.close();
    Ok(())
}

/// Metrics command - run a few operations and print the exposition
fn metrics_command(config: &ClientConfig) -> anyhow::Result<()> {
    let mut client = connect(config)?;
    client.set("metrics:probe", "1", None)?;
    client.get("metrics:probe")?;
    let _ = client.get("metrics:absent")?;
    client.close();

    print!("{}", kvbridge::metrics::export_metrics());
    Ok(())
}
