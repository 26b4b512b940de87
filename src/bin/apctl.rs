//! apctl - WiFi access point controller
//!
//! # Usage
//!
//! ```bash
//! # Bring the access point up; runs until interrupted
//! sudo apctl up
//!
//! # Tear it down from another shell
//! sudo apctl down
//!
//! # Bridge mode with explicit interfaces
//! sudo apctl --method bridge --wan eth0 --wireless wlan0 up
//! ```

use clap::{Parser, Subcommand};
use libapctl::config::{ApConfig, Overrides, DEFAULT_CONFIG_PATH};
use libapctl::error::{ApError, ApResult};
use libapctl::lifecycle::{self, LifecycleController};
use libapctl::{CommandRunner, SystemRunner};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "apctl")]
#[command(version)]
#[command(about = "Run a WiFi access point using NAT, proxy-ARP or bridging", long_about = None)]
struct Cli {
    #[command(subcommand)]
    verb: Verb,

    /// Configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Upstream interface (default: device of the default route)
    #[arg(long, global = true)]
    wan: Option<String>,

    /// Wireless interface (default: first device reported by iw)
    #[arg(long, global = true)]
    wireless: Option<String>,

    /// Topology: nat, proxy_arp or bridge
    #[arg(long, global = true)]
    method: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    /// Configure the host and run the access point until terminated
    Up,
    /// Stop a running access point and restore the host
    Down,
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        // --help and --version
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => {
            let _ = e.print();
            process::exit(ApError::Usage(e.kind().to_string()).exit_code());
        }
    };

    init_logging(&cli);

    if let Err(e) = run(cli).await {
        error!("{}", e);
        eprintln!("Error: {}", e);
        process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> ApResult<()> {
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner::new());
    lifecycle::check_preconditions(runner.as_ref())?;

    let overrides = Overrides {
        wan_interface: cli.wan,
        wireless_interface: cli.wireless,
        method: cli.method,
    };
    let config = ApConfig::load(&cli.config, &overrides)?;
    let mut controller = LifecycleController::new(runner, config);

    match cli.verb {
        Verb::Up => {
            let shutdown = lifecycle::shutdown_signal()?;
            controller.up(shutdown).await
        }
        Verb::Down => controller.down().await,
    }
}

/// Initialize logging based on command-line arguments
fn init_logging(cli: &Cli) {
    let log_level = if cli.verbose { "debug" } else { cli.log_level.as_str() };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("apctl={},libapctl={}", log_level, log_level)));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_ansi(atty::is(atty::Stream::Stdout))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbs() {
        let cli = Cli::try_parse_from(["apctl", "up"]).unwrap();
        assert_eq!(cli.verb, Verb::Up);
        let cli = Cli::try_parse_from(["apctl", "--method", "bridge", "down"]).unwrap();
        assert_eq!(cli.verb, Verb::Down);
        assert_eq!(cli.method.as_deref(), Some("bridge"));
    }

    #[test]
    fn test_bad_invocations() {
        assert!(Cli::try_parse_from(["apctl"]).is_err());
        assert!(Cli::try_parse_from(["apctl", "up", "down"]).is_err());
        assert!(Cli::try_parse_from(["apctl", "restart"]).is_err());
    }
}
