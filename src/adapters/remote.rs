//! `SourceFetcher` over HTTP(S) with reqwest.

use super::fs::stream_to_file;
use crate::error::{Error, Result};
use crate::ports::fetch::SourceFetcher;
use async_trait::async_trait;
use reqwest::{redirect, Client, Url};
use std::path::Path;
use std::time::Duration;

const MAX_REDIRECTS: usize = 10;

#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// `timeout` bounds the whole request, body included.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(redirect::Policy::limited(MAX_REDIRECTS))
            .user_agent(concat!("hls-relay/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Acquisition(format!("http client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url, dest: &Path) -> Result<u64> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::Acquisition(format!("GET {url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Acquisition(format!("GET {url} returned {status}")));
        }

        let written = stream_to_file(dest, response.bytes_stream())
            .await
            .map_err(|e| Error::Acquisition(format!("saving {url}: {e}")))?;
        if written == 0 {
            return Err(Error::Acquisition(format!("GET {url} returned an empty body")));
        }

        tracing::info!(%url, bytes = written, "source downloaded");
        Ok(written)
    }
}
