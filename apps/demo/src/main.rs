//! queuepool-demo: drive a small pool into contention
//!
//! Several concurrent "query_all" requests each hold a connection to a slow
//! simulated database. With the defaults (3 base, 1 overflow, 5s timeout,
//! 10s hold, 6 requests) four requests are served at once and the other two
//! time out while queued.
//!
//! Usage:
//!   queuepool-demo run                       # defaults
//!   queuepool-demo run --requests 8 --hold 2s
//!   queuepool-demo --echo run                # debug logs from the pool
//!   queuepool-demo config                    # print the merged configuration
//!
//! Configuration layers, lowest first: built-in defaults, `queuepool.toml`
//! (or `--config <FILE>`), `QUEUEPOOL_*` environment variables
//! (`QUEUEPOOL_POOL__BASE_CAPACITY=4`), then command-line flags.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use humantime_serde::re::humantime;
use queuepool::{EventKind, Pool};
use tokio::task::JoinSet;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod db;

use config::{DemoConfig, Overrides, PoolOverrides, WorkloadOverrides};
use db::SimulatedDatabase;

#[derive(Parser, Debug)]
#[command(
    name = "queuepool-demo",
    version,
    about = "Show a bounded connection pool under contention"
)]
struct Cli {
    /// Configuration file (defaults to ./queuepool.toml when present)
    #[arg(long, short = 'c', global = true, env = "QUEUEPOOL_CONFIG")]
    config: Option<PathBuf>,

    /// Log every pool operation (debug level for the pool and the demo)
    #[arg(long, global = true)]
    echo: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the concurrent workload against the pool
    Run(LayerArgs),
    /// Print the effective configuration as TOML
    Config(LayerArgs),
}

#[derive(Args, Debug, Default)]
struct LayerArgs {
    /// Connections kept open once demand subsides
    #[arg(long)]
    base_capacity: Option<usize>,

    /// Extra connections allowed during a burst
    #[arg(long)]
    max_overflow: Option<usize>,

    /// How long a request waits for a connection (e.g. `5s`, `250ms`)
    #[arg(long, value_parser = parse_duration)]
    timeout: Option<Duration>,

    /// Number of concurrent requests
    #[arg(long)]
    requests: Option<usize>,

    /// How long each request holds its connection
    #[arg(long, value_parser = parse_duration)]
    hold: Option<Duration>,

    /// Simulated connection handshake latency
    #[arg(long, value_parser = parse_duration)]
    handshake: Option<Duration>,
}

impl LayerArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            pool: PoolOverrides {
                base_capacity: self.base_capacity,
                max_overflow: self.max_overflow,
                default_timeout: self.timeout,
            },
            workload: WorkloadOverrides {
                requests: self.requests,
                hold: self.hold,
                handshake: self.handshake,
            },
        }
    }
}

fn parse_duration(s: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(s)
}

fn init_tracing(echo: bool) -> Result<()> {
    let filter = if echo {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,queuepool=debug,queuepool_demo=debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(echo)
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .map_err(|err| anyhow!(err))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.echo)?;

    match cli.command {
        Commands::Run(args) => {
            let config = DemoConfig::load(cli.config.as_deref(), &args.overrides())?;
            run(config).await
        }
        Commands::Config(args) => {
            let config = DemoConfig::load(cli.config.as_deref(), &args.overrides())?;
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Workload
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Outcome {
    Served {
        connection: u64,
        waited: Duration,
        held: Duration,
        connection_age: Duration,
        rows: usize,
    },
    Failed(queuepool::Error),
}

fn register_observers(pool: &Pool<SimulatedDatabase>) {
    pool.on_event(EventKind::Checkout, |event| {
        println!("[POOL] Connection checked OUT ({})", event.resource_id);
        Ok(())
    });
    pool.on_event(EventKind::Checkin, |event| {
        println!("[POOL] Connection checked IN ({})", event.resource_id);
        Ok(())
    });
    pool.on_event(EventKind::Create, |event| {
        println!("[POOL] New DBAPI connection created ({})", event.resource_id);
        Ok(())
    });
}

async fn query_all(pool: &Pool<SimulatedDatabase>, request: usize, hold: Duration) -> Outcome {
    let started = Instant::now();
    let conn = match pool.acquire().await {
        Ok(conn) => conn,
        Err(err) => {
            warn!(request, error = %err, "Request could not get a connection");
            return Outcome::Failed(err);
        }
    };
    let waited = started.elapsed();
    let connection = conn.id;
    tracing::debug!(request, connection, status = %pool.status(), "Request got a connection");

    let tables = conn.query_all(hold).await;
    let (held, connection_age) = (conn.held_for(), conn.age());
    if let Err(err) = conn.release().await {
        return Outcome::Failed(err);
    }
    Outcome::Served {
        connection,
        waited,
        held,
        connection_age,
        rows: tables.row_count(),
    }
}

async fn collect(set: &mut JoinSet<(usize, Outcome)>, outcomes: &mut Vec<(usize, Outcome)>) {
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(outcome) => outcomes.push(outcome),
            Err(err) if err.is_cancelled() => {}
            Err(err) => warn!(error = %err, "Request task failed"),
        }
    }
}

async fn run(config: DemoConfig) -> Result<()> {
    let factory = SimulatedDatabase::new("example-db", config.workload.handshake);
    let pool = Pool::new(factory, config.pool.clone()).context("failed to build pool")?;
    register_observers(&pool);

    info!(
        requests = config.workload.requests,
        hold_ms = config.workload.hold.as_millis() as u64,
        status = %pool.status(),
        "Starting workload"
    );

    let mut set = JoinSet::new();
    for request in 1..=config.workload.requests {
        let pool = pool.clone();
        let hold = config.workload.hold;
        set.spawn(async move { (request, query_all(&pool, request, hold).await) });
    }

    let mut outcomes = Vec::with_capacity(config.workload.requests);
    let interrupted = tokio::select! {
        () = collect(&mut set, &mut outcomes) => false,
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl-C")?;
            true
        }
    };

    if interrupted {
        warn!("Interrupted, shutting the pool down");
        // Queued requests fail with PoolClosed; running ones are cancelled.
        pool.shutdown().await;
        set.abort_all();
        collect(&mut set, &mut outcomes).await;
    }

    outcomes.sort_by_key(|(request, _)| *request);
    println!();
    for (request, outcome) in &outcomes {
        match outcome {
            Outcome::Served {
                connection,
                waited,
                held,
                connection_age,
                rows,
            } => println!(
                "request {request}: served by connection {connection} after {}ms, held {}ms \
                 ({rows} rows, connection open {}ms)",
                waited.as_millis(),
                held.as_millis(),
                connection_age.as_millis()
            ),
            Outcome::Failed(err) => println!("request {request}: failed: {err}"),
        }
    }
    println!("{}", pool.status());

    if !interrupted {
        pool.shutdown().await;
    }
    Ok(())
}
