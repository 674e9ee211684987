use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response};
use tokio_util::sync::CancellationToken;

use agent_core::Descriptor;

use crate::{MetadataClient, MetadataError, Telemetry, Watched};

pub const DEFAULT_BASE_URL: &str = "http://169.254.169.254/computeMetadata/v1/";
/// Server-side long-poll timeout requested with `wait_for_change`.
pub const LONGPOLL_TIMEOUT_SECS: u64 = 60;

const FLAVOR_HEADER: &str = "Metadata-Flavor";
const FLAVOR: &str = "Google";
const AGENT_HEADER: &str = "X-Google-Guest-Agent";
const OS_HEADER: &str = "X-Google-Guest-OS";

/// HTTP client for the metadata server.
#[derive(Debug, Clone)]
pub struct HttpClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpClient {
    pub fn new() -> Result<Self, MetadataError> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Point the client at another server root (must end with `/`).
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, MetadataError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            // Leave headroom over the server-side long-poll timeout.
            .timeout(Duration::from_secs(LONGPOLL_TIMEOUT_SECS + 10))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    fn url(&self, key: &str) -> String {
        format!("{}{}", self.base_url, key.trim_start_matches('/'))
    }

    async fn send(
        &self,
        cancel: &CancellationToken,
        url: &str,
        request: RequestBuilder,
    ) -> Result<Response, MetadataError> {
        let request = request.header(FLAVOR_HEADER, FLAVOR);
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(MetadataError::Cancelled),
            response = request.send() => response?,
        };
        if !response.status().is_success() {
            return Err(MetadataError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(response)
    }

    async fn body(cancel: &CancellationToken, response: Response) -> Result<String, MetadataError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(MetadataError::Cancelled),
            text = response.text() => Ok(text?),
        }
    }
}

#[async_trait]
impl MetadataClient for HttpClient {
    async fn get(&self, cancel: &CancellationToken) -> Result<Descriptor, MetadataError> {
        let url = self.url("");
        let request = self
            .http
            .get(&url)
            .query(&[("recursive", "true"), ("alt", "json")]);
        let response = self.send(cancel, &url, request).await?;
        let body = Self::body(cancel, response).await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn watch(
        &self,
        cancel: &CancellationToken,
        etag: Option<&str>,
    ) -> Result<Watched, MetadataError> {
        let url = self.url("");
        let timeout = LONGPOLL_TIMEOUT_SECS.to_string();
        let mut query = vec![("recursive", "true"), ("alt", "json")];
        if let Some(etag) = etag {
            query.extend([
                ("wait_for_change", "true"),
                ("timeout_sec", timeout.as_str()),
                ("last_etag", etag),
            ]);
        }
        let request = self.http.get(&url).query(&query);
        let response = self.send(cancel, &url, request).await?;
        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = Self::body(cancel, response).await?;
        tracing::debug!(etag = %etag, "metadata long-poll returned");
        Ok(Watched {
            descriptor: serde_json::from_str(&body)?,
            etag,
        })
    }

    async fn get_key(&self, cancel: &CancellationToken, key: &str) -> Result<String, MetadataError> {
        let url = self.url(key);
        let request = self.http.get(&url);
        let response = self.send(cancel, &url, request).await?;
        Self::body(cancel, response).await
    }

    async fn send_telemetry(
        &self,
        cancel: &CancellationToken,
        telemetry: &Telemetry,
    ) -> Result<(), MetadataError> {
        let url = self.url("");
        let agent = serde_json::json!({
            "name": telemetry.agent_name,
            "version": telemetry.agent_version,
            "architecture": telemetry.agent_arch,
        });
        let os = serde_json::json!({
            "name": telemetry.os,
            "version": telemetry.os_version,
            "kernel_release": telemetry.kernel_release,
        });
        let request = self
            .http
            .get(&url)
            .header(AGENT_HEADER, agent.to_string())
            .header(OS_HEADER, os.to_string());
        self.send(cancel, &url, request).await.map(|_| ())
    }
}
