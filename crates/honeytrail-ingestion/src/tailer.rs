use crate::{CommandTailer, FileTailer};
use honeytrail_core::config::{SourceConfig, TailConfig};
use honeytrail_core::{LogLine, TailError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// The configured log source
pub enum Tailer {
    File(FileTailer),
    Command(CommandTailer),
}

impl Tailer {
    /// Build the tailer described by the configuration
    pub fn from_config(config: &TailConfig) -> Self {
        match &config.source {
            SourceConfig::File { path, from_start } => Tailer::File(
                FileTailer::new(path.clone(), *from_start)
                    .with_poll_interval(config.poll_interval())
                    .with_reattach(config.reattach_attempts, config.reattach_delay()),
            ),
            SourceConfig::Command { program, args } => Tailer::Command(
                CommandTailer::new(program.clone(), args.clone())
                    .with_reattach(config.reattach_attempts, config.reattach_delay()),
            ),
        }
    }

    /// Name of the source for log messages
    pub fn source_name(&self) -> String {
        match self {
            Tailer::File(tailer) => tailer.path().display().to_string(),
            Tailer::Command(tailer) => tailer.command_line(),
        }
    }

    /// Follow the source until cancelled or it becomes permanently unavailable
    pub async fn run(
        self,
        sender: mpsc::Sender<LogLine>,
        shutdown: CancellationToken,
    ) -> Result<(), TailError> {
        info!(source = %self.source_name(), "Starting tailer");
        match self {
            Tailer::File(tailer) => tailer.run(sender, shutdown).await,
            Tailer::Command(tailer) => tailer.run(sender, shutdown).await,
        }
    }
}
