//! `Transcoder` backed by the ffmpeg executable.

use crate::error::{Error, Result};
use crate::ports::transcoder::{TranscodeJob, TranscodeReport, Transcoder};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

/// Bytes of stderr kept for error reports.
const STDERR_TAIL: usize = 4096;

pub struct FfmpegTranscoder {
    program: String,
    timeout: Option<Duration>,
}

impl FfmpegTranscoder {
    pub fn new(program: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    fn locate(&self) -> Result<PathBuf> {
        which::which(&self.program).map_err(|e| {
            Error::transcode(format!("{} not found on PATH: {e}", self.program))
        })
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(&self, job: &TranscodeJob) -> Result<TranscodeReport> {
        let program = self.locate()?;
        let started = Instant::now();

        let child = Command::new(&program)
            .args(job.profile.ffmpeg_args(&job.input, &job.output_dir))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::transcode(format!("failed to spawn {}: {e}", program.display())))?;

        tracing::debug!(program = %program.display(), pid = ?child.id(), "transcoder started");

        let waited = child.wait_with_output();
        let output = match self.timeout {
            // Dropping the future kills the child.
            Some(limit) => tokio::time::timeout(limit, waited).await.map_err(|_| {
                Error::transcode(format!("transcoder timed out after {}s", limit.as_secs()))
            })?,
            None => waited.await,
        }
        .map_err(|e| Error::transcode(format!("waiting for transcoder: {e}")))?;

        if !output.status.success() {
            return Err(Error::Transcode {
                message: format!("transcoder exited with {}", output.status),
                stderr: Some(stderr_tail(&output.stderr)),
            });
        }

        Ok(TranscodeReport {
            elapsed: started.elapsed(),
        })
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.len() <= STDERR_TAIL {
        return text.to_string();
    }
    let mut start = text.len() - STDERR_TAIL;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}
