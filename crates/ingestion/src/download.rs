//! Size-limited file download

use crate::errors::IngestionError;
use docrag_common::config::IngestionConfig;
use reqwest::Url;
use std::time::Duration;
use tracing::{debug, instrument};

/// HTTP downloader enforcing a timeout and a maximum body size
#[derive(Clone)]
pub struct Downloader {
    client: reqwest::Client,
    max_bytes: u64,
}

impl Downloader {
    pub fn new(timeout: Duration, max_bytes: u64) -> Result<Self, IngestionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IngestionError::Download {
                url: String::new(),
                message: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self { client, max_bytes })
    }

    pub fn from_config(config: &IngestionConfig) -> Result<Self, IngestionError> {
        Self::new(config.download_timeout(), config.max_file_size_bytes())
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Fetch `url` into memory
    ///
    /// The advertised `Content-Length` is checked before reading, and the
    /// running body size while reading, so an oversize file is rejected
    /// without buffering all of it.
    #[instrument(skip(self))]
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>, IngestionError> {
        let download_error = |message: String| IngestionError::Download {
            url: url.to_string(),
            message,
        };

        let parsed = Url::parse(url).map_err(|e| download_error(format!("invalid URL: {}", e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(download_error(format!("unsupported scheme: {}", parsed.scheme())));
        }

        let mut response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| download_error(request_failure(&e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(download_error(format!("HTTP error: {}", status.as_u16())));
        }

        if let Some(length) = response.content_length() {
            if length > self.max_bytes {
                return Err(IngestionError::FileTooLarge {
                    size: length,
                    limit: self.max_bytes,
                });
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| download_error(request_failure(&e)))?
        {
            body.extend_from_slice(&chunk);
            if body.len() as u64 > self.max_bytes {
                return Err(IngestionError::FileTooLarge {
                    size: body.len() as u64,
                    limit: self.max_bytes,
                });
            }
        }

        debug!(bytes = body.len(), "Download complete");
        Ok(body)
    }
}

fn request_failure(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "request timed out".to_string()
    } else {
        e.to_string()
    }
}
