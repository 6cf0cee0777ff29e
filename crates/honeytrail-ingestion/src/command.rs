use crate::decode_line;
use honeytrail_core::{LineOrigin, LogLine, TailError};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Split};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Follows the combined stdout/stderr of a long-running process,
/// e.g. `docker logs -f <container>`.
///
/// When the process exits it is started again; a run that yielded no lines
/// counts as a failed attach.
pub struct CommandTailer {
    program: String,
    args: Vec<String>,
    reattach_attempts: u32,
    reattach_delay: Duration,
}

/// Next thing that happened on the child's output streams
enum Next {
    Segment(Vec<u8>),
    Closed(&'static str),
    Shutdown,
}

/// How a single run of the source process ended
struct RunSummary {
    lines: usize,
    status: Option<ExitStatus>,
}

impl CommandTailer {
    /// Create a new command tailer
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            reattach_attempts: 10,
            reattach_delay: Duration::from_secs(1),
        }
    }

    /// How often, and how patiently, the process is restarted
    pub fn with_reattach(mut self, attempts: u32, delay: Duration) -> Self {
        self.reattach_attempts = attempts.max(1);
        self.reattach_delay = delay;
        self
    }

    /// Human-readable command line
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run the process, restarting it whenever it exits, until cancelled or
    /// it fails to produce output `reattach_attempts` times in a row
    pub async fn run(
        self,
        sender: mpsc::Sender<LogLine>,
        shutdown: CancellationToken,
    ) -> Result<(), TailError> {
        let origin = LineOrigin::Command {
            program: self.program.clone(),
        };
        let mut failures = 0u32;

        info!(command = %self.command_line(), "Following process output");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let message = match self.run_once(&origin, &sender, &shutdown).await {
                Ok(summary) => {
                    if shutdown.is_cancelled() {
                        break;
                    }
                    if summary.lines > 0 {
                        failures = 0;
                    } else {
                        failures += 1;
                    }
                    let status = summary
                        .status
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "unknown status".to_string());
                    warn!(
                        command = %self.command_line(),
                        status = %status,
                        lines = summary.lines,
                        "Source process exited"
                    );
                    format!("process exited with {}", status)
                }
                Err(TailError::ChannelClosed) => return Err(TailError::ChannelClosed),
                Err(e) => {
                    failures += 1;
                    warn!(command = %self.command_line(), error = %e, "Source process failed");
                    e.to_string()
                }
            };

            if failures >= self.reattach_attempts {
                return Err(TailError::SourceUnavailable {
                    source_name: self.command_line(),
                    attempts: failures,
                    message,
                });
            }

            debug!(delay = ?self.reattach_delay, failures, "Reattaching to source process");
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.reattach_delay) => {}
            }
        }

        info!(command = %self.command_line(), "Command tailer stopped");
        Ok(())
    }

    fn spawn(&self) -> Result<Child, TailError> {
        Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TailError::Read {
                source_name: self.command_line(),
                message: format!("failed to start: {}", e),
            })
    }

    /// Run the process once and forward its output until both streams close
    async fn run_once(
        &self,
        origin: &LineOrigin,
        sender: &mpsc::Sender<LogLine>,
        shutdown: &CancellationToken,
    ) -> Result<RunSummary, TailError> {
        let mut child = self.spawn()?;
        let missing = |stream: &str| TailError::Read {
            source_name: self.command_line(),
            message: format!("{} was not captured", stream),
        };
        let mut stdout = BufReader::new(child.stdout.take().ok_or_else(|| missing("stdout"))?)
            .split(b'\n');
        let mut stderr = BufReader::new(child.stderr.take().ok_or_else(|| missing("stderr"))?)
            .split(b'\n');

        let mut stdout_open = true;
        let mut stderr_open = true;
        let mut lines = 0;

        while stdout_open || stderr_open {
            let next = tokio::select! {
                _ = shutdown.cancelled() => Next::Shutdown,
                seg = next_segment(&mut stdout, "stdout"), if stdout_open => seg,
                seg = next_segment(&mut stderr, "stderr"), if stderr_open => seg,
            };

            match next {
                Next::Segment(bytes) => {
                    let Some(content) = decode_line(&bytes) else {
                        continue;
                    };
                    if sender.send(LogLine::new(origin.clone(), content)).await.is_err() {
                        warn!("Channel closed, stopping command reader");
                        return Err(TailError::ChannelClosed);
                    }
                    lines += 1;
                }
                Next::Closed("stdout") => stdout_open = false,
                Next::Closed(_) => stderr_open = false,
                Next::Shutdown => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    return Ok(RunSummary { lines, status: None });
                }
            }
        }

        let status = child.wait().await.map_err(|e| TailError::Read {
            source_name: self.command_line(),
            message: e.to_string(),
        })?;

        Ok(RunSummary {
            lines,
            status: Some(status),
        })
    }
}

async fn next_segment<R>(stream: &mut Split<BufReader<R>>, name: &'static str) -> Next
where
    R: AsyncRead + Unpin,
{
    match stream.next_segment().await {
        Ok(Some(bytes)) => Next::Segment(bytes),
        Ok(None) => Next::Closed(name),
        Err(e) => {
            warn!(stream = name, error = %e, "Error reading process output");
            Next::Closed(name)
        }
    }
}
