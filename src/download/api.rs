use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace};
use url::Url;

use crate::models::AdId;
use crate::utils::errors::DownloadError;

/// What the backend tells us about a downloadable video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadInfo {
    pub filename: String,
    pub total_size: u64,
    pub chunk_size: u64,
    pub total_chunks: u64,
    #[serde(default)]
    pub download_url: Option<String>,
}

impl DownloadInfo {
    /// Reject info that cannot describe a contiguous zero-based chunk range
    pub fn check(&self) -> Result<(), String> {
        if self.filename.trim().is_empty() {
            return Err("empty filename".to_string());
        }
        if self.chunk_size == 0 {
            return Err("chunk size is zero".to_string());
        }
        if self.total_chunks == 0 {
            return Err("no chunks to download".to_string());
        }
        let needed = self.total_size.div_ceil(self.chunk_size);
        if needed != self.total_chunks {
            return Err(format!(
                "{} chunks of {} bytes cannot hold {} bytes",
                self.total_chunks, self.chunk_size, self.total_size
            ));
        }
        Ok(())
    }
}

/// Info responses come either bare or wrapped in a `data` envelope
#[derive(Deserialize)]
#[serde(untagged)]
enum InfoResponse {
    Wrapped { data: DownloadInfo },
    Bare(DownloadInfo),
}

impl From<InfoResponse> for DownloadInfo {
    fn from(response: InfoResponse) -> Self {
        match response {
            InfoResponse::Wrapped { data } => data,
            InfoResponse::Bare(info) => info,
        }
    }
}

/// Remote byte-range store for advertisement videos
#[async_trait]
pub trait DownloadApi: Send + Sync {
    async fn request_info(&self, ad_id: &AdId, chunk_size: u64)
    -> Result<DownloadInfo, DownloadError>;

    async fn fetch_chunk(
        &self,
        ad_id: &AdId,
        chunk_index: u64,
        chunk_size: u64,
    ) -> Result<Vec<u8>, DownloadError>;
}

/// HTTP implementation of [`DownloadApi`]
///
/// - `GET {base}/videos/{adId}/info?chunkSize=N`
/// - `GET {base}/videos/{adId}/chunks/{index}?chunkSize=N`
pub struct HttpDownloadApi {
    client: Client,
    base_url: Url,
}

impl HttpDownloadApi {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Self::with_client(client, base_url)
    }

    pub fn with_client(client: Client, base_url: &str) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url)?;
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, segments: &[&str]) -> Option<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut().ok()?.pop_if_empty().extend(segments);
        Some(url)
    }
}

#[async_trait]
impl DownloadApi for HttpDownloadApi {
    async fn request_info(
        &self,
        ad_id: &AdId,
        chunk_size: u64,
    ) -> Result<DownloadInfo, DownloadError> {
        let unavailable = |message: String| DownloadError::InfoUnavailable {
            ad_id: ad_id.clone(),
            message,
        };

        let url = self
            .endpoint(&["videos", ad_id.as_str(), "info"])
            .ok_or_else(|| unavailable("invalid API base URL".to_string()))?;

        debug!("Requesting download info from {}", url);

        let response = self
            .client
            .get(url)
            .query(&[("chunkSize", chunk_size)])
            .send()
            .await
            .map_err(|e| unavailable(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(unavailable(format!("HTTP {}", status)));
        }

        let body: InfoResponse = response
            .json()
            .await
            .map_err(|e| unavailable(format!("invalid response body: {}", e)))?;

        Ok(body.into())
    }

    async fn fetch_chunk(
        &self,
        ad_id: &AdId,
        chunk_index: u64,
        chunk_size: u64,
    ) -> Result<Vec<u8>, DownloadError> {
        let unavailable = |message: String| DownloadError::ChunkUnavailable {
            ad_id: ad_id.clone(),
            chunk_index,
            message,
        };

        let index = chunk_index.to_string();
        let url = self
            .endpoint(&["videos", ad_id.as_str(), "chunks", &index])
            .ok_or_else(|| unavailable("invalid API base URL".to_string()))?;

        let response = self
            .client
            .get(url)
            .query(&[("chunkSize", chunk_size)])
            .send()
            .await
            .map_err(|e| unavailable(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(unavailable(format!("HTTP {}", status)));
        }

        let data = response
            .bytes()
            .await
            .map_err(|e| unavailable(format!("failed to read body: {}", e)))?;

        trace!("Fetched chunk {} of {} ({} bytes)", chunk_index, ad_id, data.len());
        Ok(data.to_vec())
    }
}
