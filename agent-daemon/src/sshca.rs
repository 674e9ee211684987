//! Feeds OS Login trusted user CA keys to sshd through the trusted CA pipe.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use agent_core::TrustedCertificates;
use agent_events::trusted_ca::READ_EVENT;
use agent_events::{EventData, EventHandler, EventManager};
use agent_metadata::MetadataClient;

pub const SUBSCRIBER_KEY: &str = "sshca";
pub const CERTIFICATES_KEY: &str = "oslogin/certificates";

pub struct TrustedCaWriter {
    client: Arc<dyn MetadataClient>,
    cancel: CancellationToken,
}

impl TrustedCaWriter {
    pub fn new(client: Arc<dyn MetadataClient>, cancel: CancellationToken) -> Self {
        Self { client, cancel }
    }

    async fn certificates(&self) -> Option<String> {
        let raw = match self.client.get_key(&self.cancel, CERTIFICATES_KEY).await {
            Ok(raw) => raw,
            Err(err) => {
                tracing::error!(error = %err, "failed to fetch trusted CA certificates");
                return None;
            }
        };
        match serde_json::from_str::<TrustedCertificates>(&raw) {
            Ok(certs) => Some(
                certs
                    .certs
                    .iter()
                    .map(|c| format!("{}\n", c.public_key.trim()))
                    .collect(),
            ),
            Err(err) => {
                tracing::error!(error = %err, "failed to parse trusted CA certificates");
                None
            }
        }
    }
}

#[async_trait]
impl EventHandler for TrustedCaWriter {
    async fn handle(&self, event_type: &str, data: &EventData) -> bool {
        if let Some(err) = &data.error {
            tracing::debug!(event = event_type, error = %err, "trusted CA watcher failed");
            return true;
        }
        let Some(pipe) = data.trusted_ca() else {
            return true;
        };
        let Some(mut writer) = pipe.take().await else {
            return true;
        };

        // An empty write still closes the pipe so sshd is not left waiting.
        let keys = self.certificates().await.unwrap_or_default();
        if let Err(err) = writer.write_all(keys.as_bytes()).await {
            tracing::error!(error = %err, "failed to write trusted CA keys");
        }
        if let Err(err) = writer.shutdown().await {
            tracing::debug!(error = %err, "failed to close trusted CA pipe");
        }
        true
    }
}

/// Subscribe the trusted CA writer to the pipe read event.
pub fn init(events: &EventManager, client: Arc<dyn MetadataClient>, cancel: CancellationToken) {
    events.subscribe(
        READ_EVENT,
        SUBSCRIBER_KEY,
        Arc::new(TrustedCaWriter::new(client, cancel)),
    );
}

#[cfg(test)]
mod tests {
    use agent_events::{EventPayload, TrustedCaPipe};
    use agent_metadata::fake::FakeMetadataClient;
    use tokio::io::AsyncReadExt;

    use super::*;

    fn pipe_event() -> (EventData, tokio::io::DuplexStream) {
        let (ours, theirs) = tokio::io::duplex(4096);
        let data = EventData {
            data: Some(EventPayload::TrustedCa(TrustedCaPipe::new(ours))),
            error: None,
        };
        (data, theirs)
    }

    #[tokio::test]
    async fn writes_one_key_per_line() {
        let client = Arc::new(FakeMetadataClient::new());
        client.set_key(
            CERTIFICATES_KEY,
            r#"{"trustedCertificateAuthorities":[{"publicKey":"ssh-rsa CA1 one"},{"publicKey":"ecdsa CA2 two\n"}]}"#,
        );
        let writer = TrustedCaWriter::new(client, CancellationToken::new());

        let (data, mut reader) = pipe_event();
        assert!(writer.handle(READ_EVENT, &data).await);

        let mut out = String::new();
        reader.read_to_string(&mut out).await.expect("read");
        assert_eq!(out, "ssh-rsa CA1 one\necdsa CA2 two\n");
    }

    #[tokio::test]
    async fn fetch_failure_still_closes_pipe() {
        let writer = TrustedCaWriter::new(Arc::new(FakeMetadataClient::new()), CancellationToken::new());
        let (data, mut reader) = pipe_event();
        assert!(writer.handle(READ_EVENT, &data).await);

        let mut out = String::new();
        reader.read_to_string(&mut out).await.expect("read");
        assert!(out.is_empty());
    }
}
