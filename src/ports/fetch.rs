use crate::error::Result;
use async_trait::async_trait;
use reqwest::Url;
use std::path::Path;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Download `url` into `dest`, returning the number of bytes written.
    async fn fetch(&self, url: &Url, dest: &Path) -> Result<u64>;
}
