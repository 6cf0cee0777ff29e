use crate::decode_line;
use honeytrail_core::{LineOrigin, LogLine, TailError};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File as TokioFile;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Follows an append-only file with tail -f behavior
pub struct FileTailer {
    path: PathBuf,
    /// Read existing content before following
    from_start: bool,
    poll_interval: Duration,
    reattach_attempts: u32,
    reattach_delay: Duration,
}

impl FileTailer {
    /// Create a new file tailer
    pub fn new(path: impl Into<PathBuf>, from_start: bool) -> Self {
        Self {
            path: path.into(),
            from_start,
            poll_interval: Duration::from_millis(100),
            reattach_attempts: 10,
            reattach_delay: Duration::from_secs(1),
        }
    }

    /// Upper bound on the wait between reads when no change is signalled
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// How often, and how patiently, a vanished file is looked for again
    pub fn with_reattach(mut self, attempts: u32, delay: Duration) -> Self {
        self.reattach_attempts = attempts.max(1);
        self.reattach_delay = delay;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Follow the file and send every complete line through the channel.
    ///
    /// Returns `Ok(())` on cancellation and `SourceUnavailable` once the
    /// file has been unreadable for `reattach_attempts` consecutive tries.
    pub async fn run(
        self,
        sender: mpsc::Sender<LogLine>,
        shutdown: CancellationToken,
    ) -> Result<(), TailError> {
        let Some(mut state) = self.attach(&shutdown).await? else {
            return Ok(());
        };

        info!(path = %self.path.display(), position = state.position, "Following file");

        // Bridge sync notify callbacks into the async loop. Wakeups coalesce:
        // one pending signal is enough to trigger a read.
        let (wake_tx, mut wake_rx) = mpsc::channel::<()>(1);
        let watcher_tx = wake_tx.clone();
        let _watcher = match self.watch(watcher_tx) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "File notifications unavailable, polling only");
                None
            }
        };
        // Keeps `wake_rx` open even without a watcher so the loop never spins
        let _wake_tx = wake_tx;

        let origin = LineOrigin::File {
            path: self.path.to_string_lossy().to_string(),
        };
        let mut failures = 0u32;

        loop {
            match read_new_lines(&self.path, &mut state, &origin, &sender, &shutdown).await {
                Ok(_) => failures = 0,
                Err(TailError::ChannelClosed) => return Err(TailError::ChannelClosed),
                Err(e) => {
                    failures += 1;
                    warn!(
                        path = %self.path.display(),
                        error = %e,
                        failures,
                        "Failed to read file, will retry"
                    );
                    if failures >= self.reattach_attempts {
                        return Err(TailError::SourceUnavailable {
                            source_name: self.path.display().to_string(),
                            attempts: failures,
                            message: e.to_string(),
                        });
                    }
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.reattach_delay) => continue,
                    }
                }
            }

            if shutdown.is_cancelled() {
                break;
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = wake_rx.recv() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!(path = %self.path.display(), "File tailer stopped");
        Ok(())
    }

    /// Wait for the file to exist, giving up after `reattach_attempts` tries
    async fn attach(&self, shutdown: &CancellationToken) -> Result<Option<FileState>, TailError> {
        let mut attempts = 0u32;
        loop {
            match FileState::new(&self.path, !self.from_start).await {
                Ok(state) => return Ok(Some(state)),
                Err(e) => {
                    attempts += 1;
                    if attempts >= self.reattach_attempts {
                        return Err(TailError::SourceUnavailable {
                            source_name: self.path.display().to_string(),
                            attempts,
                            message: e.to_string(),
                        });
                    }
                    debug!(path = %self.path.display(), attempts, "Waiting for file to appear");
                    tokio::select! {
                        _ = shutdown.cancelled() => return Ok(None),
                        _ = tokio::time::sleep(self.reattach_delay) => {}
                    }
                }
            }
        }
    }

    /// Watch the parent directory so both writes and rotations wake the loop
    fn watch(&self, wake: mpsc::Sender<()>) -> notify::Result<RecommendedWatcher> {
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                if res.is_ok() {
                    // Full means a wakeup is already pending
                    let _ = wake.try_send(());
                }
            },
            Config::default(),
        )?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        Ok(watcher)
    }
}

/// Tracks the read position of the followed file
struct FileState {
    /// Offset just past the last complete line emitted
    position: u64,
    /// Inode (for rotation detection on Unix)
    #[cfg(unix)]
    inode: Option<u64>,
}

impl FileState {
    /// Create a new file state
    async fn new(path: &Path, tail: bool) -> Result<Self, TailError> {
        let metadata = tokio::fs::metadata(path).await.map_err(|e| read_error(path, e))?;

        let position = if tail { metadata.len() } else { 0 };

        #[cfg(unix)]
        let inode = {
            use std::os::unix::fs::MetadataExt;
            Some(metadata.ino())
        };

        Ok(Self {
            position,
            #[cfg(unix)]
            inode,
        })
    }

    /// Check if the file has been replaced (inode changed)
    #[cfg(unix)]
    async fn check_rotation(&mut self, path: &Path) -> Result<bool, TailError> {
        use std::os::unix::fs::MetadataExt;

        let metadata = tokio::fs::metadata(path).await.map_err(|e| read_error(path, e))?;

        let current_inode = metadata.ino();
        if self.inode != Some(current_inode) {
            self.inode = Some(current_inode);
            self.position = 0;
            return Ok(true);
        }
        Ok(false)
    }

    #[cfg(not(unix))]
    async fn check_rotation(&mut self, path: &Path) -> Result<bool, TailError> {
        // Without inodes a missing file is the only signal; truncation is
        // handled by the size check in read_new_lines
        tokio::fs::metadata(path).await.map_err(|e| read_error(path, e))?;
        Ok(false)
    }
}

fn read_error(path: &Path, e: std::io::Error) -> TailError {
    TailError::Read {
        source_name: path.display().to_string(),
        message: e.to_string(),
    }
}

/// Read complete lines appended since the last call.
///
/// A trailing segment without a newline is a write still in progress: the
/// position stays in front of it so it is read again once completed.
async fn read_new_lines(
    path: &Path,
    state: &mut FileState,
    origin: &LineOrigin,
    sender: &mpsc::Sender<LogLine>,
    shutdown: &CancellationToken,
) -> Result<usize, TailError> {
    if state.check_rotation(path).await? {
        info!(path = %path.display(), "File replaced, reading from start");
    }

    let file = TokioFile::open(path).await.map_err(|e| read_error(path, e))?;
    let metadata = file.metadata().await.map_err(|e| read_error(path, e))?;

    if metadata.len() < state.position {
        info!(path = %path.display(), "File truncated, reading from start");
        state.position = 0;
    }

    if metadata.len() == state.position {
        return Ok(0);
    }

    let mut reader = BufReader::new(file);
    reader
        .seek(SeekFrom::Start(state.position))
        .await
        .map_err(|e| read_error(path, e))?;

    let mut buf = Vec::new();
    let mut lines_read = 0;

    loop {
        buf.clear();
        let bytes_read = reader
            .read_until(b'\n', &mut buf)
            .await
            .map_err(|e| read_error(path, e))?;

        if bytes_read == 0 || buf.last() != Some(&b'\n') {
            // EOF, possibly in the middle of a line
            break;
        }

        state.position += bytes_read as u64;

        let Some(content) = decode_line(&buf) else {
            continue;
        };

        if sender.send(LogLine::new(origin.clone(), content)).await.is_err() {
            warn!("Channel closed, stopping file reader");
            return Err(TailError::ChannelClosed);
        }
        lines_read += 1;

        if shutdown.is_cancelled() {
            break;
        }
    }

    if lines_read > 0 {
        debug!(path = %path.display(), lines = lines_read, "Read lines from file");
    }

    Ok(lines_read)
}
