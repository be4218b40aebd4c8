mod config;
mod host;

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;

use fleetscope_logs::{DocumentRouter, LiveLogProvider, LocatorKind, LogLocator};
use fleetscope_types::DeviceRef;

use crate::config::Config;
use crate::host::TerminalHost;

/// fleetscope - View live device logs and build logs as documents
#[derive(Parser, Debug)]
#[command(name = "fleetscope")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Config file (defaults to <config dir>/fleetscope/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Number of recent log lines to fetch when a device log opens
    #[arg(long, global = true)]
    backlog_lines: Option<usize>,

    /// Cap on buffered bytes per device log
    #[arg(long, global = true)]
    max_content_bytes: Option<usize>,

    /// Program that tails a device's logs
    #[arg(long, global = true)]
    feed_program: Option<String>,

    /// Argument for the feed program ({uuid} and {count} are substituted); repeatable
    #[arg(long = "feed-arg", global = true, allow_hyphen_values = true)]
    feed_args: Vec<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open a document by locator (deviceLogs:<name>#<uuid> or buildLogs:?<text>)
    Open {
        #[arg(value_name = "LOCATOR")]
        locator: String,
    },

    /// Follow the live logs of a device
    Device {
        name: String,
        uuid: String,
    },

    /// Show a build log file ("-" for stdin) as a static document
    BuildLog {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

impl Args {
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(backlog_lines) = self.backlog_lines {
            config.backlog_lines = backlog_lines;
        }
        if self.max_content_bytes.is_some() {
            config.max_content_bytes = self.max_content_bytes;
        }
        if let Some(program) = &self.feed_program {
            config.feed.program = program.clone();
        }
        if !self.feed_args.is_empty() {
            config.feed.args = self.feed_args.clone();
        }
    }

    fn locator(&self) -> Result<LogLocator> {
        match &self.command {
            Command::Open { locator } => locator
                .parse()
                .with_context(|| format!("Invalid locator: {}", locator)),
            Command::Device { name, uuid } => {
                Ok(LogLocator::for_device(&DeviceRef::new(name.clone(), uuid.clone())))
            }
            Command::BuildLog { file } => {
                let text = read_build_log(file)?;
                Ok(LogLocator::build_logs(&text))
            }
        }
    }
}

fn read_build_log(file: &Path) -> Result<String> {
    if file.as_os_str() == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read build log from stdin")?;
        return Ok(text);
    }
    std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read build log {}", file.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = run(args).await;

    if let Err(e) = &result {
        eprintln!("Error: {:#}", e);
    }

    result
}

async fn run(args: Args) -> Result<()> {
    let mut config = Config::load(args.config.as_deref())?;
    args.apply_overrides(&mut config);
    let locator = args.locator()?;

    let feed = Arc::new(config.command_feed());
    let (live, mut changes) = LiveLogProvider::new(feed, config.live_options())?;

    // Close notifications flow from the host to the live provider
    let (close_tx, close_rx) = mpsc::unbounded_channel();
    let close_listener = live.spawn_close_listener(close_rx);

    let router = DocumentRouter::with_log_providers(live.clone());
    let mut host = TerminalHost::new(router, close_tx, std::io::stdout());

    match locator.kind() {
        LocatorKind::DeviceLogs => {
            tracing::info!(document = %locator, "following device logs, Ctrl-C to stop");
            host.follow(&locator, &mut changes, async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await?;
        }
        _ => host.render_once(&locator)?,
    }

    // Dropping the host ends the close stream once its close is delivered
    drop(host);
    close_listener.await.context("Close listener failed")?;
    live.shutdown();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let args = Args::parse_from([
            "fleetscope",
            "--backlog-lines",
            "100",
            "--feed-program",
            "sh",
            "--feed-arg",
            "-c",
            "--feed-arg",
            "tail -n {count} /var/log/{uuid}.log",
            "device",
            "kiosk",
            "abc-123",
        ]);
        let mut config = Config::default();
        args.apply_overrides(&mut config);

        assert_eq!(config.backlog_lines, 100);
        assert_eq!(config.max_content_bytes, None);
        assert_eq!(config.feed.program, "sh");
        assert_eq!(
            config.command_feed().args_for("abc-123", 100),
            vec!["-c", "tail -n 100 /var/log/abc-123.log"]
        );
        assert_eq!(
            args.locator().unwrap().to_string(),
            "deviceLogs:kiosk#abc-123"
        );
    }

    #[test]
    fn test_open_rejects_locator_without_scheme() {
        let args = Args::parse_from(["fleetscope", "open", "not-a-locator"]);
        assert!(args.locator().is_err());
    }

    #[test]
    fn test_open_build_locator() {
        let args = Args::parse_from(["fleetscope", "open", "buildLogs:?Hello%20World"]);
        assert_eq!(args.locator().unwrap().kind(), LocatorKind::BuildLogs);
    }
}
