use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use tokio::io::AsyncWrite;
use tokio::sync::Mutex;

use agent_core::Descriptor;

use crate::error::WatchError;

pub type PipeWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Data a watcher hands to subscribers.
#[derive(Debug)]
pub enum EventPayload {
    /// A new metadata snapshot from the long-poll watcher.
    Metadata(Arc<Descriptor>),
    /// sshd opened the trusted CA pipe and is waiting to read.
    TrustedCa(TrustedCaPipe),
}

/// Write end of the trusted CA pipe. The first subscriber to [`take`] it
/// owns the writer; dropping the writer closes the pipe for the reader.
///
/// [`take`]: TrustedCaPipe::take
pub struct TrustedCaPipe {
    writer: Mutex<Option<PipeWriter>>,
}

impl TrustedCaPipe {
    pub fn new(writer: impl AsyncWrite + Send + 'static) -> Self {
        Self {
            writer: Mutex::new(Some(Box::pin(writer))),
        }
    }

    pub async fn take(&self) -> Option<PipeWriter> {
        self.writer.lock().await.take()
    }
}

impl fmt::Debug for TrustedCaPipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustedCaPipe").finish_non_exhaustive()
    }
}

/// What each subscriber receives. `error` set means the watcher failed and
/// `data` is meaningless; neither set means "nothing changed".
#[derive(Debug, Default)]
pub struct EventData {
    pub data: Option<EventPayload>,
    pub error: Option<WatchError>,
}

impl EventData {
    pub fn metadata(&self) -> Option<&Arc<Descriptor>> {
        match &self.data {
            Some(EventPayload::Metadata(descriptor)) => Some(descriptor),
            _ => None,
        }
    }

    pub fn trusted_ca(&self) -> Option<&TrustedCaPipe> {
        match &self.data {
            Some(EventPayload::TrustedCa(pipe)) => Some(pipe),
            _ => None,
        }
    }
}
