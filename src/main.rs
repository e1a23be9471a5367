//! Handlebridge CLI
//!
//! Inspect configuration and exercise the registry and resources from the
//! command line.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use handlebridge::registry::{self, HandleTable, NativeObject, ResourceKind};
use handlebridge::resources::bigint;
use handlebridge::resources::hmac::{self, HmacDigest};
use handlebridge::{config, BridgeConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hb")]
#[command(version)]
#[command(about = "Native resources behind opaque handles", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration as TOML
    Config {
        /// Read this file instead of searching for bridge.toml
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Generate a probable prime
    Prime {
        /// Size in bits
        #[arg(long, default_value = "256")]
        bits: usize,
    },

    /// Compute an HMAC
    Hmac {
        /// Digest size in bits (256, 384, 512)
        #[arg(long, default_value = "256")]
        digest: u32,

        /// Key as hex
        #[arg(long)]
        key: String,

        /// Message text
        #[arg(long)]
        message: String,
    },

    /// Walk through register / lookup / release on a fresh table
    Scenario,

    /// Show global registry statistics
    Stats,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let cfg = BridgeConfig::load_from_cwd().context("searching for bridge.toml")?;
    config::install(cfg).context("installing configuration")?;

    match cli.command {
        Commands::Config { path } => cmd_config(path.as_ref()),
        Commands::Prime { bits } => cmd_prime(bits),
        Commands::Hmac {
            digest,
            key,
            message,
        } => cmd_hmac(digest, &key, &message),
        Commands::Scenario => cmd_scenario(),
        Commands::Stats => cmd_stats(),
    }
}

fn cmd_config(path: Option<&PathBuf>) -> Result<()> {
    let text = match path {
        Some(path) => BridgeConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?
            .to_toml()?,
        None => config::current().to_toml()?,
    };
    print!("{}", text);
    Ok(())
}

fn cmd_prime(bits: usize) -> Result<()> {
    let h = bigint::bigint_probable_prime(bits).context("generating prime")?;
    let text = bigint::bigint_to_decimal(h)?;
    bigint::bigint_dispose(h);
    println!("{}", text);
    Ok(())
}

fn cmd_hmac(digest: u32, key_hex: &str, message: &str) -> Result<()> {
    let key = hex::decode(key_hex).context("key is not valid hex")?;
    let digest = HmacDigest::from_bits(digest)?;

    let h = hmac::hmac_initialize(digest)?;
    let result = (|| {
        hmac::hmac_set_key(h, &key)?;
        hmac::hmac_set_message(h, message.as_bytes())?;
        hmac::hmac_get_hmac(h)
    })();
    hmac::hmac_dispose(h);

    println!("{}", hex::encode(result?));
    Ok(())
}

struct Named(&'static str);

impl NativeObject for Named {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Other
    }

    fn destroy(&self) {
        println!("  destroy {}", self.0);
    }
}

fn cmd_scenario() -> Result<()> {
    let table = HandleTable::new();

    let a = table.register(Named("A"));
    println!("register A -> {}", a);
    let b = table.register(Named("B"));
    println!("register B -> {}", b);

    println!("lookup {} -> live: {}", a, table.lookup(a).is_some());
    println!("release {}", a);
    table.release(a);
    println!("lookup {} -> live: {}", a, table.lookup(a).is_some());
    println!("lookup {} -> live: {}", b, table.lookup(b).is_some());
    println!("release {} again (no-op)", a);
    table.release(a);

    let c = table.register(Named("C"));
    println!("register C -> {}", c);
    if c == a {
        bail!("handle {} was reused", a);
    }

    let stats = table.stats();
    println!(
        "live: {}  released: {}  next: {}",
        stats.live, stats.released, stats.next_handle
    );
    Ok(())
}

fn cmd_stats() -> Result<()> {
    let stats = registry::stats();
    println!("Live handles:     {}", stats.live);
    println!("Released handles: {}", stats.released);
    println!("Next handle:      {}", stats.next_handle);
    Ok(())
}

// =============================================================================
// Logging
// =============================================================================

/// Send library `log` records to stderr. `RUST_LOG` overrides `-v`.
fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    // Also installs the log-to-tracing bridge.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init();
    log::debug!("log level defaults to {}", level);
}
