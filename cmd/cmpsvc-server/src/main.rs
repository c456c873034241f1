//! Trusted Comparator Server
//!
//! Holds the secret key and answers "how do these two sealed values
//! order?" with one byte, over either transport:
//!
//!   tcp   one thread per accepted connection
//!   pool  N shared-memory slots, one worker per slot's message queues
//!
//! Usage:
//!     export CMPSVC_SECRET_KEY=$(head -c32 /dev/urandom | xxd -p -c64)
//!     ./target/release/cmpsvc-server tcp --port 9999
//!     ./target/release/cmpsvc-server pool --segment /cmpsvc -n 32
//!
//! SIGINT/SIGTERM stop the service cleanly (queues and segment unlinked).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use nix::sys::signal::{SigSet, Signal};
use tracing::info;
use tracing_subscriber::EnvFilter;

use cmpsvc_core::config::ServiceConfig;
use cmpsvc_core::env::{env_get_opt, env_get_str, env_name};
use cmpsvc_core::key::SecretKey;
use cmpsvc_executor::{ChannelPoolService, ServiceContext, TcpServer};

/// Trusted comparator service
#[derive(Parser)]
#[command(name = "cmpsvc-server")]
#[command(about = "Compare encrypted values without revealing them")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// File holding the 64-hex-digit secret key (default: $CMPSVC_SECRET_KEY)
    #[arg(long, global = true)]
    key_file: Option<PathBuf>,

    /// More logging (-v debug, -vv trace); overrides $CMPSVC_LOG
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Connection-oriented transport
    Tcp {
        /// Listen address
        #[arg(long)]
        bind: Option<String>,
        /// Listen port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Shared channel-pool transport
    Pool {
        /// Shared-memory segment name ("/name")
        #[arg(long)]
        segment: Option<String>,
        /// Number of slots
        #[arg(short = 'n', long)]
        pool_size: Option<usize>,
        /// Messages per queue
        #[arg(long)]
        queue_depth: Option<usize>,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => env_get_str("LOG", "info"),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(level))
        .with_writer(std::io::stderr)
        .init();
}

/// Read the key, then scrub it from the environment before any thread starts
fn load_key(path: Option<&Path>) -> Result<SecretKey> {
    let hex = match path {
        Some(p) => std::fs::read_to_string(p)
            .with_context(|| format!("reading key file {}", p.display()))?,
        None => env_get_opt::<String>("SECRET_KEY").ok_or_else(|| {
            anyhow!("no secret key: set {} or pass --key-file", env_name("SECRET_KEY"))
        })?,
    };
    std::env::remove_var(env_name("SECRET_KEY"));
    Ok(SecretKey::from_hex(&hex)?)
}

fn wait_for_signal(signals: &SigSet) -> Result<Signal> {
    let sig = signals.wait().context("sigwait")?;
    info!(signal = ?sig, "shutting down");
    Ok(sig)
}

fn run_tcp(ctx: Arc<ServiceContext>, signals: &SigSet) -> Result<()> {
    let server = Arc::new(TcpServer::bind(ctx)?);
    let stopper = server.stopper();

    let accept = {
        let server = Arc::clone(&server);
        thread::Builder::new()
            .name("cmp-accept".into())
            .spawn(move || server.run())?
    };

    wait_for_signal(signals)?;
    stopper.stop()?;
    accept.join().map_err(|_| anyhow!("accept thread panicked"))??;
    Ok(())
}

fn run_pool(ctx: Arc<ServiceContext>, signals: &SigSet) -> Result<()> {
    let service = ChannelPoolService::start(ctx)?;
    wait_for_signal(signals)?;

    let stats = service.shutdown();
    let compared: u64 = stats.iter().map(|s| s.compared).sum();
    let rejected: u64 = stats.iter().map(|s| s.rejected).sum();
    info!(compared, rejected, workers = stats.len(), "channel pool drained");
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // Blocked here so every thread spawned later inherits the mask and only
    // sigwait() below sees these signals.
    let mut signals = SigSet::empty();
    signals.add(Signal::SIGINT);
    signals.add(Signal::SIGTERM);
    signals.thread_block().context("blocking signals")?;

    let key = load_key(cli.key_file.as_deref())?;

    let mut config = ServiceConfig::from_env();
    match &cli.command {
        Commands::Tcp { bind, port } => {
            if let Some(b) = bind {
                config = config.bind_addr(b.clone());
            }
            if let Some(p) = port {
                config = config.port(*p);
            }
        }
        Commands::Pool { segment, pool_size, queue_depth } => {
            if let Some(s) = segment {
                config = config.segment(s.clone());
            }
            if let Some(n) = pool_size {
                config = config.pool_size(*n);
            }
            if let Some(d) = queue_depth {
                config = config.queue_depth(*d);
            }
        }
    }

    let ctx = ServiceContext::new(key, config)?;
    match cli.command {
        Commands::Tcp { .. } => run_tcp(ctx, &signals),
        Commands::Pool { .. } => run_pool(ctx, &signals),
    }
}
