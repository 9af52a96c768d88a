use crate::domain::transcode::HlsProfile;
use crate::error::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct TranscodeJob {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub profile: HlsProfile,
}

#[derive(Clone, Debug, Default)]
pub struct TranscodeReport {
    pub elapsed: Duration,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Write a playlist and its segments for `job.input` into `job.output_dir`.
    async fn transcode(&self, job: &TranscodeJob) -> Result<TranscodeReport>;
}
