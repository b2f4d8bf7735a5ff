//! Image retrieval and encoding for vision-model transmission.
//!
//! Downloads are the only retried network calls in the pipeline: up to
//! `max_retries` attempts with linear backoff, and the final attempt goes out
//! through a relaxed-TLS client as a defined, logged exception for CDN edges
//! with broken certificate chains.

use base64::{engine::general_purpose, Engine};
use futures::future::join_all;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::RequestConfig;
use crate::error::{FetchError, FetchResult};

/// Reference to a stored image of an item, in display order.
#[derive(Debug, Clone)]
pub struct ImageRef {
    pub id: i64,
    pub url: String,
    pub original_filename: String,
    pub order: u32,
}

/// One item to analyze: its identifier plus the ordered image set.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub item_id: i64,
    pub images: Vec<ImageRef>,
}

/// A downloaded, base64-encoded image owned by one in-flight request.
#[derive(Debug, Clone)]
pub struct ImagePayload {
    pub image_id: i64,
    pub filename: String,
    pub encoded: String,
    pub order: u32,
}

/// HTTP image fetcher with retry and a relaxed-TLS last resort.
#[derive(Clone)]
pub struct ImageFetcher {
    client: Client,
    relaxed_client: Client,
    max_retries: u32,
    retry_delay_ms: u64,
}

impl ImageFetcher {
    /// Create a fetcher from the request configuration.
    pub fn new(config: &RequestConfig) -> FetchResult<Self> {
        let timeout = Duration::from_millis(config.fetch_timeout_ms);

        let client = Client::builder().timeout(timeout).build()?;

        // Built once, used only on the final attempt against CDNs with
        // known-bad certificate chains. Every use is logged.
        let relaxed_client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()?;

        Ok(Self {
            client,
            relaxed_client,
            max_retries: config.max_retries.max(1),
            retry_delay_ms: config.retry_delay_ms,
        })
    }

    /// Download one image and return its base64-encoded bytes.
    ///
    /// Linear backoff: attempt N sleeps `retry_delay_ms * N` before retrying.
    pub async fn fetch_image(&self, url: &str) -> FetchResult<String> {
        let mut last_error = String::new();

        for attempt in 1..=self.max_retries {
            if attempt > 1 {
                let delay = Duration::from_millis(self.retry_delay_ms * (attempt - 1) as u64);
                warn!(
                    url = %url,
                    attempt,
                    delay_ms = delay.as_millis(),
                    "Retrying image download"
                );
                tokio::time::sleep(delay).await;
            }

            let relaxed = attempt == self.max_retries && attempt > 1;
            if relaxed {
                warn!(url = %url, attempt, "Final attempt with relaxed TLS verification");
            }
            let client = if relaxed {
                &self.relaxed_client
            } else {
                &self.client
            };

            match Self::download(client, url).await {
                Ok(bytes) => {
                    debug!(url = %url, bytes = bytes.len(), attempt, "Image downloaded");
                    return Ok(general_purpose::STANDARD.encode(&bytes));
                }
                Err(e) => {
                    warn!(url = %url, attempt, error = %e, "Image download failed");
                    last_error = e.to_string();
                }
            }
        }

        Err(FetchError::Exhausted {
            url: url.to_string(),
            attempts: self.max_retries,
            message: last_error,
        })
    }

    async fn download(client: &Client, url: &str) -> FetchResult<Vec<u8>> {
        let response = client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::BadStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    /// Download every image of a request concurrently.
    ///
    /// Any single failure fails the whole item: a partial image set would
    /// break the all-images-accounted-for invariant downstream. The returned
    /// payload count always equals `request.images.len()`.
    pub async fn fetch_all(&self, request: &AnalysisRequest) -> FetchResult<Vec<ImagePayload>> {
        let fetches = request.images.iter().map(|image| async {
            let encoded = self.fetch_image(&image.url).await?;
            Ok::<_, FetchError>(ImagePayload {
                image_id: image.id,
                filename: image.original_filename.clone(),
                encoded,
                order: image.order,
            })
        });

        let mut payloads = join_all(fetches)
            .await
            .into_iter()
            .collect::<FetchResult<Vec<_>>>()?;
        payloads.sort_by_key(|p| p.order);

        debug_assert_eq!(payloads.len(), request.images.len());
        Ok(payloads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetcher_creation() {
        let fetcher = ImageFetcher::new(&RequestConfig::default());
        assert!(fetcher.is_ok());
    }
}
