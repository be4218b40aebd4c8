use std::process::Stdio;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use fleetscope_types::LogLine;

use crate::{FeedError, LogFeed, SubscribeOptions, Subscription};

/// How the feed command prints log lines
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineFormat {
    /// One plain text line per message
    #[default]
    Text,
    /// One JSON log message per line
    Json,
}

impl LineFormat {
    fn parse(self, line: &str) -> LogLine {
        match self {
            LineFormat::Text => LogLine::from_text(line),
            LineFormat::Json => LogLine::from_json(line).unwrap_or_else(|_| LogLine::from_text(line)),
        }
    }
}

/// Feed that tails logs by running an external command per subscription.
///
/// `{uuid}` and `{count}` in the arguments are replaced with the device
/// identity and the requested backlog size. The child is killed when the
/// subscription is released.
#[derive(Clone, Debug)]
pub struct CommandFeed {
    program: String,
    args: Vec<String>,
    format: LineFormat,
}

impl CommandFeed {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            format: LineFormat::Text,
        }
    }

    pub fn with_format(mut self, format: LineFormat) -> Self {
        self.format = format;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments with placeholders filled in
    pub fn args_for(&self, resource_id: &str, count: usize) -> Vec<String> {
        let count = count.to_string();
        self.args
            .iter()
            .map(|arg| arg.replace("{uuid}", resource_id).replace("{count}", &count))
            .collect()
    }

    fn command_for(&self, resource_id: &str, count: usize) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(self.args_for(resource_id, count))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        command
    }
}

impl LogFeed for CommandFeed {
    fn subscribe(
        &self,
        resource_id: &str,
        options: SubscribeOptions,
    ) -> BoxFuture<'static, Result<Subscription, FeedError>> {
        let mut command = self.command_for(resource_id, options.count);
        let program = self.program.clone();
        let format = self.format;
        let resource_id = resource_id.to_string();

        async move {
            let mut child = command.spawn().map_err(|source| FeedError::Spawn {
                program: program.clone(),
                source,
            })?;
            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| FeedError::NoStdout(program.clone()))?;

            debug!(resource = %resource_id, program = %program, "feed command started");

            let (line_tx, line_rx) = mpsc::unbounded_channel();
            let cancel = CancellationToken::new();
            tokio::spawn(read_lines(
                child,
                stdout,
                format,
                line_tx,
                cancel.clone(),
                resource_id.clone(),
            ));

            Ok::<_, FeedError>(Subscription::from_channel(resource_id, line_rx, cancel))
        }
        .boxed()
    }
}

async fn read_lines(
    mut child: Child,
    stdout: ChildStdout,
    format: LineFormat,
    line_tx: mpsc::UnboundedSender<LogLine>,
    cancel: CancellationToken,
    resource_id: String,
) {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        tokio::select! {
            _ = cancel.cancelled() => break,

            result = reader.read_until(b'\n', &mut buf) => {
                match result {
                    Ok(0) => {
                        debug!(resource = %resource_id, "feed command closed stdout");
                        break;
                    }
                    Ok(_) => {
                        // Devices may print bytes that are not UTF-8
                        let line = String::from_utf8_lossy(trim_line_ending(&buf));
                        if line_tx.send(format.parse(&line)).is_err() {
                            // Subscriber went away
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(resource = %resource_id, error = %e, "error reading feed command output");
                        break;
                    }
                }
            }
        }
    }

    if let Err(e) = child.kill().await {
        debug!(resource = %resource_id, error = %e, "feed command already gone");
    }
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
