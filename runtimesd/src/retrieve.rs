//! Artifact download.
//!
//! Logs are streamed into a scratch file that is removed when the returned
//! handle is dropped, so a failed parse never leaves files behind.

use reqwest::{Client, StatusCode};
use runtimes_common::FetchCredentials;
use std::time::Duration;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::debug;

#[derive(Debug, Error)]
pub enum RetrieveError {
    #[error("request for {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} requires credentials")]
    Unauthorized { url: String },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: StatusCode },

    #[error("failed to write scratch file for {url}: {source}")]
    Io {
        url: String,
        #[source]
        source: std::io::Error,
    },
}

/// Downloads raw logs over HTTP.
///
/// Requests go out anonymously first. A 401 is retried once with basic
/// credentials when they are configured.
#[derive(Clone)]
pub struct LogRetriever {
    client: Client,
    credentials: Option<FetchCredentials>,
}

impl LogRetriever {
    pub fn new(
        timeout: Duration,
        credentials: Option<FetchCredentials>,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("runtimesd/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            credentials,
        })
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    /// Download `url` into a scratch file.
    pub async fn fetch(&self, url: &str) -> Result<NamedTempFile, RetrieveError> {
        let http_err = |source| RetrieveError::Http {
            url: url.to_string(),
            source,
        };

        let mut response = self.client.get(url).send().await.map_err(http_err)?;

        if response.status() == StatusCode::UNAUTHORIZED {
            let Some(creds) = &self.credentials else {
                return Err(RetrieveError::Unauthorized {
                    url: url.to_string(),
                });
            };
            debug!(url, "Retrying with credentials");
            response = self
                .client
                .get(url)
                .basic_auth(&creds.user, Some(&creds.password))
                .send()
                .await
                .map_err(http_err)?;
            if response.status() == StatusCode::UNAUTHORIZED {
                return Err(RetrieveError::Unauthorized {
                    url: url.to_string(),
                });
            }
        }

        let status = response.status();
        if !status.is_success() {
            return Err(RetrieveError::Status {
                url: url.to_string(),
                status,
            });
        }

        let io_err = |source| RetrieveError::Io {
            url: url.to_string(),
            source,
        };
        let scratch = NamedTempFile::new().map_err(io_err)?;
        let mut out = tokio::fs::File::from_std(scratch.reopen().map_err(io_err)?);

        let mut bytes = 0usize;
        while let Some(chunk) = response.chunk().await.map_err(http_err)? {
            bytes += chunk.len();
            out.write_all(&chunk).await.map_err(io_err)?;
        }
        out.flush().await.map_err(io_err)?;

        debug!(url, bytes, "Downloaded artifact");
        Ok(scratch)
    }
}
