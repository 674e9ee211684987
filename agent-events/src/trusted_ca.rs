//! SSH trusted CA pipe watcher.
//!
//! sshd reads `TrustedUserCAKeys` from a named pipe. The watcher keeps the
//! FIFO in place and reports an event each time a reader shows up, handing
//! subscribers the write end.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::watcher::{WatchOutcome, Watcher};

pub const WATCHER_ID: &str = "ssh-trusted-ca-pipe-watcher";
pub const READ_EVENT: &str = "ssh-trusted-ca-pipe-watcher,read";
pub const DEFAULT_PIPE_PATH: &str = "/etc/ssh/oslogin_trustedca.pub";

const READER_POLL: Duration = Duration::from_millis(500);

pub struct TrustedCaWatcher {
    path: PathBuf,
    poll: Duration,
}

impl Default for TrustedCaWatcher {
    fn default() -> Self {
        Self::new(DEFAULT_PIPE_PATH)
    }
}

impl TrustedCaWatcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            poll: READER_POLL,
        }
    }

    /// How often to retry opening the pipe while nobody is reading.
    pub fn with_poll_interval(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn pause(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.poll) => true,
        }
    }
}

#[async_trait]
impl Watcher for TrustedCaWatcher {
    fn id(&self) -> &'static str {
        WATCHER_ID
    }

    fn events(&self) -> Vec<&'static str> {
        vec![READ_EVENT]
    }

    #[cfg(unix)]
    async fn run(&self, cancel: &CancellationToken, _event_type: &str) -> WatchOutcome {
        use nix::errno::Errno;
        use tokio::net::unix::pipe;

        use crate::event::{EventPayload, TrustedCaPipe};

        if let Err(err) = fifo::ensure(&self.path) {
            tracing::error!(path = %self.path.display(), error = %err, "cannot create trusted CA pipe");
            if !self.pause(cancel).await {
                return WatchOutcome::stop();
            }
            return WatchOutcome::failed(err);
        }

        loop {
            match pipe::OpenOptions::new().open_sender(&self.path) {
                Ok(sender) => {
                    tracing::debug!(path = %self.path.display(), "trusted CA pipe has a reader");
                    return WatchOutcome::data(EventPayload::TrustedCa(TrustedCaPipe::new(sender)));
                }
                // No reader yet.
                Err(err) if err.raw_os_error() == Some(Errno::ENXIO as i32) => {
                    if !self.pause(cancel).await {
                        return WatchOutcome::stop();
                    }
                }
                Err(err) => {
                    if !self.pause(cancel).await {
                        return WatchOutcome::stop();
                    }
                    return WatchOutcome::failed(crate::error::io_err(&self.path, err));
                }
            }
        }
    }

    #[cfg(not(unix))]
    async fn run(&self, _cancel: &CancellationToken, _event_type: &str) -> WatchOutcome {
        WatchOutcome {
            renew: false,
            data: None,
            error: Some(crate::error::WatchError::Unsupported(WATCHER_ID)),
        }
    }
}

#[cfg(unix)]
mod fifo {
    use std::fs;
    use std::io::ErrorKind;
    use std::os::unix::fs::FileTypeExt;
    use std::path::Path;

    use nix::sys::stat::Mode;

    use crate::error::{io_err, WatchError};

    /// Make sure `path` is a FIFO, replacing anything else found there.
    pub(super) fn ensure(path: &Path) -> Result<(), WatchError> {
        match fs::symlink_metadata(path) {
            Ok(meta) if meta.file_type().is_fifo() => return Ok(()),
            Ok(_) => fs::remove_file(path).map_err(|e| io_err(path, e))?,
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(io_err(path, err)),
        }
        nix::unistd::mkfifo(path, Mode::from_bits_truncate(0o644))
            .map_err(|errno| io_err(path, errno.into()))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::io::Read;
    use std::os::unix::fs::FileTypeExt;

    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;

    use super::*;

    #[tokio::test]
    async fn hands_writer_to_subscriber_once_sshd_reads() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("trustedca.pub");
        // A stale regular file gets replaced by the FIFO.
        std::fs::write(&path, "stale").expect("seed");

        let watcher = TrustedCaWatcher::new(&path).with_poll_interval(Duration::from_millis(10));
        let reader = tokio::task::spawn_blocking({
            let path = path.clone();
            move || {
                while !std::fs::symlink_metadata(&path)
                    .map(|m| m.file_type().is_fifo())
                    .unwrap_or(false)
                {
                    std::thread::sleep(Duration::from_millis(5));
                }
                let mut contents = String::new();
                std::fs::File::open(&path)
                    .expect("open fifo")
                    .read_to_string(&mut contents)
                    .expect("read fifo");
                contents
            }
        });

        let cancel = CancellationToken::new();
        let outcome = tokio::time::timeout(Duration::from_secs(10), watcher.run(&cancel, READ_EVENT))
            .await
            .expect("reader shows up");
        assert!(outcome.renew);
        let Some(crate::EventPayload::TrustedCa(pipe)) = outcome.data else {
            panic!("expected pipe payload");
        };
        let mut writer = pipe.take().await.expect("writer");
        assert!(pipe.take().await.is_none());
        writer.write_all(b"ssh-rsa AAAA ca\n").await.expect("write");
        drop(writer);

        assert_eq!(reader.await.expect("join"), "ssh-rsa AAAA ca\n");
    }

    #[tokio::test]
    async fn cancellation_while_waiting_for_reader_stops() {
        let dir = TempDir::new().expect("tempdir");
        let watcher = TrustedCaWatcher::new(dir.path().join("ca.pub"))
            .with_poll_interval(Duration::from_millis(10));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let outcome = watcher.run(&cancel, READ_EVENT).await;
        assert!(!outcome.renew);
        assert!(outcome.data.is_none());
    }
}
