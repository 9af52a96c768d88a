//! Acquire → transcode → publish, for one session at a time.

use super::registry::{SessionRegistry, SessionSnapshot};
use crate::adapters::fs::{stream_to_file, BoxError, LocalSources};
use crate::config::InvocationMode;
use crate::domain::hls::MediaPlaylist;
use crate::domain::session::{SessionId, SessionState};
use crate::domain::transcode::{HlsProfile, PLAYLIST_NAME};
use crate::error::{Error, Result};
use crate::ports::fetch::SourceFetcher;
use crate::ports::transcoder::{TranscodeJob, Transcoder};
use axum::body::Bytes;
use futures::Stream;
use reqwest::Url;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;

#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub profile: HlsProfile,
    pub invocation: InvocationMode,
    /// Where temporary input files live
    pub scratch_dir: PathBuf,
    /// URL prefix the artifact server is mounted under
    pub public_prefix: String,
}

/// Where the media comes from, already validated.
#[derive(Clone, Debug, PartialEq)]
pub enum Source {
    Remote(Url),
    Local(String),
}

impl Source {
    /// Validate the request fields without touching the filesystem.
    pub fn from_fields(video_url: Option<&str>, video_path: Option<&str>) -> Result<Self> {
        let video_url = video_url.map(str::trim).filter(|v| !v.is_empty());
        let video_path = video_path.map(str::trim).filter(|v| !v.is_empty());

        match (video_url, video_path) {
            (Some(raw), _) => {
                let url = Url::parse(raw)
                    .map_err(|e| Error::InvalidInput(format!("video_url is not a valid URL: {e}")))?;
                if !matches!(url.scheme(), "http" | "https") {
                    return Err(Error::InvalidInput(format!(
                        "video_url must use http or https, got {}",
                        url.scheme()
                    )));
                }
                Ok(Source::Remote(url))
            }
            (None, Some(path)) => Ok(Source::Local(path.to_string())),
            (None, None) => Err(Error::InvalidInput("Missing video_url.".to_string())),
        }
    }
}

/// A registered session whose input file has not been transcoded yet.
///
/// Dropping it before the outcome is recorded (a cancelled request) marks
/// the session failed and removes its directory.
pub struct PendingSession {
    pub session: SessionSnapshot,
    input: NamedTempFile,
    cleanup: Option<SessionRegistry>,
}

impl PendingSession {
    pub fn id(&self) -> SessionId {
        self.session.session_id
    }

    pub fn input_path(&self) -> &Path {
        self.input.path()
    }

    /// The outcome has been recorded on the session.
    fn settle(&mut self) {
        self.cleanup = None;
    }
}

impl Drop for PendingSession {
    fn drop(&mut self) {
        let Some(registry) = self.cleanup.take() else {
            return;
        };
        let id = self.id();
        tracing::warn!(session_id = %id, "conversion cancelled");

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = registry.discard(&id, CANCELLED.to_string()).await {
                        tracing::error!(session_id = %id, error = %e, "failed to remove session output");
                    }
                });
            }
            Err(_) => {
                tracing::error!(session_id = %id, "no runtime left to remove cancelled session");
            }
        }
    }
}

const CANCELLED: &str = "conversion cancelled before completion";

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct Published {
    pub session_id: SessionId,
    pub playlist_url: String,
    pub status_url: String,
    pub state: &'static str,
}

pub struct ConversionPipeline {
    registry: SessionRegistry,
    fetcher: Arc<dyn SourceFetcher>,
    transcoder: Arc<dyn Transcoder>,
    local_sources: Option<LocalSources>,
    settings: PipelineSettings,
}

impl ConversionPipeline {
    pub fn new(
        registry: SessionRegistry,
        fetcher: Arc<dyn SourceFetcher>,
        transcoder: Arc<dyn Transcoder>,
        local_sources: Option<LocalSources>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            registry,
            fetcher,
            transcoder,
            local_sources,
            settings,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn playlist_url(&self, id: &SessionId) -> String {
        format!(
            "{}/{}/{}",
            self.settings.public_prefix.trim_end_matches('/'),
            id,
            PLAYLIST_NAME
        )
    }

    /// Allocate a session and the temporary file its input will land in.
    pub async fn open(&self) -> Result<PendingSession> {
        let session = self.registry.create().await?;
        let input = match self.scratch_file(&session.session_id).await {
            Ok(input) => input,
            Err(err) => {
                self.abandon(&session.session_id, &err).await;
                return Err(err);
            }
        };
        Ok(PendingSession {
            session,
            input,
            cleanup: Some(self.registry.clone()),
        })
    }

    async fn scratch_file(&self, id: &SessionId) -> Result<NamedTempFile> {
        tokio::fs::create_dir_all(&self.settings.scratch_dir)
            .await
            .map_err(|e| Error::Acquisition(format!("scratch dir: {e}")))?;
        tempfile::Builder::new()
            .prefix(&format!("{id}-"))
            .suffix(".src")
            .tempfile_in(&self.settings.scratch_dir)
            .map_err(|e| Error::Acquisition(format!("scratch file: {e}")))
    }

    /// Fill the session's input file from a remote URL or a local path.
    pub async fn acquire(&self, pending: &PendingSession, source: &Source) -> Result<u64> {
        match source {
            Source::Remote(url) => self.fetcher.fetch(url, pending.input_path()).await,
            Source::Local(path) => match &self.local_sources {
                Some(local) => local.copy_into(path, pending.input_path()).await,
                None => Err(Error::InvalidInput(
                    "video_path is not enabled on this server".to_string(),
                )),
            },
        }
    }

    /// Fill the session's input file from an uploaded body.
    pub async fn receive<S, E>(&self, pending: &PendingSession, body: S) -> Result<u64>
    where
        S: Stream<Item = std::result::Result<Bytes, E>>,
        E: Into<BoxError>,
    {
        let written = stream_to_file(pending.input_path(), body)
            .await
            .map_err(|e| Error::Acquisition(format!("storing upload: {e}")))?;
        if written == 0 {
            return Err(Error::InvalidInput("uploaded file is empty".to_string()));
        }
        tracing::info!(session_id = %pending.id(), bytes = written, "upload stored");
        Ok(written)
    }

    /// Run the transcoder and check its output. Consumes the session's
    /// input file either way.
    pub async fn complete(&self, mut pending: PendingSession) -> Result<Published> {
        let id = pending.id();
        self.registry.set_state(&id, SessionState::Running);

        let job = TranscodeJob {
            input: pending.input_path().to_path_buf(),
            output_dir: pending.session.dir.clone(),
            profile: self.settings.profile.clone(),
        };

        let outcome = match self.transcoder.transcode(&job).await {
            Ok(report) => verify_output(&job.output_dir).await.map(|segments| (report, segments)),
            Err(err) => Err(err),
        };

        match outcome {
            Ok((report, segments)) => {
                self.registry.set_state(&id, SessionState::Ready);
                pending.settle();
                tracing::info!(
                    session_id = %id,
                    segments,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "conversion ready"
                );
                Ok(self.published(&id, &SessionState::Ready))
            }
            Err(err) => {
                self.fail(pending, &err).await;
                Err(err)
            }
        }
    }

    /// Record a failure for a pending session and release it.
    pub async fn fail(&self, mut pending: PendingSession, err: &Error) {
        self.abandon(&pending.id(), err).await;
        pending.settle();
    }

    /// Record a failure and delete the session's partial output.
    async fn abandon(&self, id: &SessionId, err: &Error) {
        tracing::warn!(session_id = %id, error = %err, "conversion failed");
        if let Err(cleanup) = self.registry.discard(id, err.to_string()).await {
            tracing::error!(session_id = %id, error = %cleanup, "failed to remove session output");
        }
    }

    /// Convert a remote or local source according to the invocation mode.
    pub async fn convert(self: &Arc<Self>, source: Source) -> Result<Published> {
        let pending = self.open().await?;
        tracing::info!(session_id = %pending.id(), source = ?source, "conversion accepted");

        match self.settings.invocation {
            InvocationMode::Sync => {
                if let Err(err) = self.acquire(&pending, &source).await {
                    self.fail(pending, &err).await;
                    return Err(err);
                }
                self.complete(pending).await
            }
            InvocationMode::Detached => {
                let published = self.published(&pending.id(), &SessionState::Pending);
                let pipeline = Arc::clone(self);
                tokio::spawn(async move {
                    if let Err(err) = pipeline.acquire(&pending, &source).await {
                        pipeline.fail(pending, &err).await;
                        return;
                    }
                    // failures are recorded on the session
                    let _ = pipeline.complete(pending).await;
                });
                Ok(published)
            }
        }
    }

    /// Transcode an already acquired session according to the invocation mode.
    pub async fn finish(self: &Arc<Self>, pending: PendingSession) -> Result<Published> {
        match self.settings.invocation {
            InvocationMode::Sync => self.complete(pending).await,
            InvocationMode::Detached => {
                let published = self.published(&pending.id(), &SessionState::Pending);
                let pipeline = Arc::clone(self);
                tokio::spawn(async move {
                    let _ = pipeline.complete(pending).await;
                });
                Ok(published)
            }
        }
    }

    fn published(&self, id: &SessionId, state: &SessionState) -> Published {
        Published {
            session_id: *id,
            playlist_url: self.playlist_url(id),
            status_url: format!("/sessions/{id}"),
            state: state.label(),
        }
    }
}

/// The transcoder must leave a playlist whose segments all exist.
async fn verify_output(dir: &Path) -> Result<usize> {
    let text = tokio::fs::read_to_string(dir.join(PLAYLIST_NAME))
        .await
        .map_err(|e| Error::transcode(format!("transcoder produced no playlist: {e}")))?;
    let playlist = MediaPlaylist::parse(&text)
        .ok_or_else(|| Error::transcode("transcoder produced a malformed playlist"))?;

    let mut count = 0;
    for uri in playlist.segment_uris() {
        let segment = Path::new(uri);
        let present = segment.components().count() == 1
            && tokio::fs::metadata(dir.join(segment))
                .await
                .map(|m| m.is_file())
                .unwrap_or(false);
        if !present {
            return Err(Error::transcode(format!("playlist references missing segment {uri}")));
        }
        count += 1;
    }
    if count == 0 {
        return Err(Error::transcode("playlist lists no segments"));
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::reaper::Reaper;
    use crate::ports::fetch::MockSourceFetcher;
    use crate::ports::transcoder::{MockTranscoder, TranscodeReport};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    /// Writes a three-segment VOD playlist like ffmpeg would.
    struct WritesPlaylist;

    #[async_trait]
    impl Transcoder for WritesPlaylist {
        async fn transcode(&self, job: &TranscodeJob) -> Result<TranscodeReport> {
            assert!(job.input.is_file(), "input must exist while transcoding");
            let mut playlist = MediaPlaylist::new(4);
            playlist.playlist_type = Some("VOD".to_string());
            for i in 0..3 {
                let name = format!("segment_{i:03}.ts");
                tokio::fs::write(job.output_dir.join(&name), b"ts").await?;
                playlist.add_segment(4.0, name);
            }
            playlist.write_to(&job.output_dir.join(PLAYLIST_NAME)).await?;
            Ok(TranscodeReport::default())
        }
    }

    /// Writes one segment, then never finishes.
    struct Stalls;

    #[async_trait]
    impl Transcoder for Stalls {
        async fn transcode(&self, job: &TranscodeJob) -> Result<TranscodeReport> {
            tokio::fs::write(job.output_dir.join("segment_000.ts"), b"partial").await?;
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(TranscodeReport::default())
        }
    }

    async fn wait_for_terminal(pipeline: &ConversionPipeline, id: &SessionId) -> SessionState {
        let mut state = SessionState::Pending;
        for _ in 0..100 {
            state = pipeline.registry().get(id).unwrap().state;
            if state.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        state
    }

    struct Fixture {
        root: TempDir,
        scratch: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                root: tempdir().unwrap(),
                scratch: tempdir().unwrap(),
            }
        }

        fn pipeline(
            &self,
            fetcher: impl SourceFetcher + 'static,
            transcoder: impl Transcoder + 'static,
            invocation: InvocationMode,
        ) -> Arc<ConversionPipeline> {
            Arc::new(ConversionPipeline::new(
                SessionRegistry::new(self.root.path()),
                Arc::new(fetcher),
                Arc::new(transcoder),
                None,
                PipelineSettings {
                    profile: HlsProfile::default(),
                    invocation,
                    scratch_dir: self.scratch.path().to_path_buf(),
                    public_prefix: "/static".to_string(),
                },
            ))
        }

        fn scratch_is_empty(&self) -> bool {
            std::fs::read_dir(self.scratch.path()).unwrap().next().is_none()
        }
    }

    fn fetch_ok() -> MockSourceFetcher {
        let mut fetcher = MockSourceFetcher::new();
        fetcher.expect_fetch().returning(|_, dest| {
            std::fs::write(dest, b"media")?;
            Ok(5)
        });
        fetcher
    }

    fn remote() -> Source {
        Source::Remote(Url::parse("https://example.com/a.mp4").unwrap())
    }

    #[test]
    fn test_source_validation() {
        assert!(matches!(
            Source::from_fields(None, None),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            Source::from_fields(Some("   "), None),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            Source::from_fields(Some("ftp://example.com/a.mp4"), None),
            Err(Error::InvalidInput(_))
        ));
        assert_eq!(
            Source::from_fields(Some("https://example.com/a.mp4"), None).unwrap(),
            remote()
        );
        assert_eq!(
            Source::from_fields(None, Some("clips/a.mp4")).unwrap(),
            Source::Local("clips/a.mp4".to_string())
        );
    }

    #[tokio::test]
    async fn test_sync_conversion_publishes_playlist() {
        let fixture = Fixture::new();
        let pipeline = fixture.pipeline(fetch_ok(), WritesPlaylist, InvocationMode::Sync);

        let published = pipeline.convert(remote()).await.unwrap();

        assert_eq!(published.state, "ready");
        assert_eq!(
            published.playlist_url,
            format!("/static/{}/stream.m3u8", published.session_id)
        );
        let dir = fixture.root.path().join(published.session_id.dir_name());
        let mut names: Vec<String> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec!["segment_000.ts", "segment_001.ts", "segment_002.ts", "stream.m3u8"]
        );
        assert!(fixture.scratch_is_empty(), "input artifact must be deleted");
    }

    #[tokio::test]
    async fn test_repeated_requests_get_independent_sessions() {
        let fixture = Fixture::new();
        let pipeline = fixture.pipeline(fetch_ok(), WritesPlaylist, InvocationMode::Sync);

        let first = pipeline.convert(remote()).await.unwrap();
        let second = pipeline.convert(remote()).await.unwrap();

        assert_ne!(first.session_id, second.session_id);
        assert_ne!(first.playlist_url, second.playlist_url);
        assert_eq!(pipeline.registry().len(), 2);
    }

    #[tokio::test]
    async fn test_transcoder_failure_removes_output() {
        let fixture = Fixture::new();
        let mut transcoder = MockTranscoder::new();
        transcoder.expect_transcode().returning(|job| {
            std::fs::write(job.output_dir.join("segment_000.ts"), b"partial")?;
            Err(Error::Transcode {
                message: "transcoder exited with exit status: 1".to_string(),
                stderr: Some("moov atom not found".to_string()),
            })
        });
        let pipeline = fixture.pipeline(fetch_ok(), transcoder, InvocationMode::Sync);

        let err = pipeline.convert(remote()).await.unwrap_err();

        assert!(matches!(err, Error::Transcode { .. }));
        assert_eq!(std::fs::read_dir(fixture.root.path()).unwrap().count(), 0);
        assert!(fixture.scratch_is_empty());
    }

    #[tokio::test]
    async fn test_missing_playlist_is_a_transcode_error() {
        let fixture = Fixture::new();
        let mut transcoder = MockTranscoder::new();
        transcoder
            .expect_transcode()
            .returning(|_| Ok(TranscodeReport::default()));
        let pipeline = fixture.pipeline(fetch_ok(), transcoder, InvocationMode::Sync);

        let err = pipeline.convert(remote()).await.unwrap_err();
        assert!(err.to_string().contains("no playlist"));
    }

    #[tokio::test]
    async fn test_acquisition_failure_skips_transcoder() {
        let fixture = Fixture::new();
        let mut fetcher = MockSourceFetcher::new();
        fetcher
            .expect_fetch()
            .returning(|url, _| Err(Error::Acquisition(format!("GET {url} returned 404 Not Found"))));
        let mut transcoder = MockTranscoder::new();
        transcoder.expect_transcode().never();
        let pipeline = fixture.pipeline(fetcher, transcoder, InvocationMode::Sync);

        let err = pipeline.convert(remote()).await.unwrap_err();

        assert!(matches!(err, Error::Acquisition(_)));
        assert_eq!(std::fs::read_dir(fixture.root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_local_source_disabled() {
        let fixture = Fixture::new();
        let pipeline = fixture.pipeline(MockSourceFetcher::new(), WritesPlaylist, InvocationMode::Sync);

        let err = pipeline
            .convert(Source::Local("a.mp4".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_detached_conversion_reaches_ready() {
        let fixture = Fixture::new();
        let pipeline = fixture.pipeline(fetch_ok(), WritesPlaylist, InvocationMode::Detached);

        let published = pipeline.convert(remote()).await.unwrap();
        assert_eq!(published.state, "pending");

        let id = published.session_id;
        let mut state = SessionState::Pending;
        for _ in 0..100 {
            state = pipeline.registry().get(&id).unwrap().state;
            if state.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(state, SessionState::Ready);
    }

    #[tokio::test]
    async fn test_detached_failure_is_recorded() {
        let fixture = Fixture::new();
        let mut transcoder = MockTranscoder::new();
        transcoder
            .expect_transcode()
            .returning(|_| Err(Error::transcode("ffmpeg not found on PATH")));
        let pipeline = fixture.pipeline(fetch_ok(), transcoder, InvocationMode::Detached);

        let published = pipeline.convert(remote()).await.unwrap();

        let id = published.session_id;
        let mut state = SessionState::Pending;
        for _ in 0..100 {
            state = pipeline.registry().get(&id).unwrap().state;
            if state.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(matches!(state, SessionState::Failed { ref error } if error.contains("not found")));
    }

    #[tokio::test]
    async fn test_empty_upload_is_invalid() {
        let fixture = Fixture::new();
        let pipeline = fixture.pipeline(MockSourceFetcher::new(), WritesPlaylist, InvocationMode::Sync);
        let pending = pipeline.open().await.unwrap();

        let body = futures::stream::iter(Vec::<std::result::Result<Bytes, std::io::Error>>::new());
        let err = pipeline.receive(&pending, body).await.unwrap_err();

        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_cancelled_transcode_is_cleaned_up() {
        let fixture = Fixture::new();
        let pipeline = fixture.pipeline(fetch_ok(), Stalls, InvocationMode::Sync);

        let pending = pipeline.open().await.unwrap();
        let id = pending.id();
        let dir = pending.session.dir.clone();
        pipeline.acquire(&pending, &remote()).await.unwrap();

        let cancelled = tokio::time::timeout(Duration::from_millis(100), pipeline.complete(pending)).await;
        assert!(cancelled.is_err());

        let state = wait_for_terminal(&pipeline, &id).await;
        assert!(matches!(state, SessionState::Failed { ref error } if error.contains("cancelled")));
        assert!(!dir.exists());
        assert!(fixture.scratch_is_empty());

        let reaper = Reaper::new(
            pipeline.registry().clone(),
            Duration::from_secs(3600),
            Duration::from_secs(3600),
        );
        let report = reaper.sweep(Utc::now() + chrono::Duration::days(30)).await;
        assert_eq!(report.evicted, 1);
        assert!(pipeline.registry().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_sync_conversion_leaves_nothing_behind() {
        let fixture = Fixture::new();
        let pipeline = fixture.pipeline(fetch_ok(), Stalls, InvocationMode::Sync);

        let cancelled = tokio::time::timeout(Duration::from_millis(100), pipeline.convert(remote())).await;
        assert!(cancelled.is_err());

        let mut remaining = usize::MAX;
        for _ in 0..100 {
            remaining = std::fs::read_dir(fixture.root.path()).unwrap().count();
            if remaining == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(remaining, 0);

        let expired = pipeline
            .registry()
            .expired(Utc::now() + chrono::Duration::days(30), chrono::Duration::hours(1));
        assert_eq!(expired.len(), 1);
    }

    #[tokio::test]
    async fn test_dropped_pending_session_is_discarded() {
        let fixture = Fixture::new();
        let pipeline = fixture.pipeline(MockSourceFetcher::new(), WritesPlaylist, InvocationMode::Sync);

        let pending = pipeline.open().await.unwrap();
        let id = pending.id();
        drop(pending);

        let state = wait_for_terminal(&pipeline, &id).await;
        assert!(matches!(state, SessionState::Failed { .. }));
        assert_eq!(std::fs::read_dir(fixture.root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_failure_message_is_kept() {
        let fixture = Fixture::new();
        let mut transcoder = MockTranscoder::new();
        transcoder
            .expect_transcode()
            .returning(|_| Err(Error::transcode("moov atom not found")));
        let pipeline = fixture.pipeline(fetch_ok(), transcoder, InvocationMode::Sync);

        let pending = pipeline.open().await.unwrap();
        let id = pending.id();
        pipeline.acquire(&pending, &remote()).await.unwrap();
        pipeline.complete(pending).await.unwrap_err();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let state = pipeline.registry().get(&id).unwrap().state;
        assert!(matches!(state, SessionState::Failed { ref error } if error.contains("moov atom")));
    }

    #[tokio::test]
    async fn test_segment_that_is_a_directory_fails_verification() {
        let dir = tempdir().unwrap();
        let mut playlist = MediaPlaylist::new(4);
        playlist.add_segment(4.0, "segment_000.ts".to_string());
        playlist.write_to(&dir.path().join(PLAYLIST_NAME)).await.unwrap();
        std::fs::create_dir(dir.path().join("segment_000.ts")).unwrap();

        let err = verify_output(dir.path()).await.unwrap_err();
        assert!(err.to_string().contains("missing segment"));

        std::fs::remove_dir(dir.path().join("segment_000.ts")).unwrap();
        std::fs::write(dir.path().join("segment_000.ts"), b"ts").unwrap();
        assert_eq!(verify_output(dir.path()).await.unwrap(), 1);
    }
}
