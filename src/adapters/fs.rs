//! Local filesystem helpers: streaming bodies to disk and allow-listed
//! local sources.

use crate::error::{Error, Result};
use axum::body::Bytes;
use futures::{Stream, TryStreamExt};
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::{fs::File, io::AsyncWriteExt, io::BufWriter};
use tokio_util::io::StreamReader;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Save a byte `Stream` to a file, returning the number of bytes written.
pub async fn stream_to_file<S, E>(path: &Path, stream: S) -> io::Result<u64>
where
    S: Stream<Item = std::result::Result<Bytes, E>>,
    E: Into<BoxError>,
{
    let body_with_io_error = stream.map_err(|err| io::Error::new(io::ErrorKind::Other, err));
    let body_reader = StreamReader::new(body_with_io_error);
    futures::pin_mut!(body_reader);

    let mut file = BufWriter::new(File::create(path).await?);
    let written = tokio::io::copy(&mut body_reader, &mut file).await?;
    file.flush().await?;

    Ok(written)
}

/// True when `path` is relative and never steps outside its base.
pub fn path_is_valid(path: &Path) -> bool {
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                tracing::debug!(path = %path.display(), "rejected path component");
                return false;
            }
        }
    }
    depth > 0
}

/// Source files the service may read from a configured directory.
#[derive(Clone, Debug)]
pub struct LocalSources {
    root: PathBuf,
}

impl LocalSources {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a client-supplied relative path under the root.
    pub async fn resolve(&self, requested: &str) -> Result<PathBuf> {
        let relative = Path::new(requested.trim());
        if !path_is_valid(relative) {
            return Err(Error::InvalidInput(format!(
                "video_path must be a relative path inside the source root: {requested:?}"
            )));
        }

        let root = tokio::fs::canonicalize(&self.root)
            .await
            .map_err(|e| Error::Acquisition(format!("source root unavailable: {e}")))?;
        let resolved = tokio::fs::canonicalize(root.join(relative))
            .await
            .map_err(|e| Error::Acquisition(format!("cannot open {requested:?}: {e}")))?;

        // Symlinks may still point elsewhere.
        if !resolved.starts_with(&root) {
            return Err(Error::InvalidInput(format!(
                "video_path escapes the source root: {requested:?}"
            )));
        }
        Ok(resolved)
    }

    /// Copy the requested file into `dest`.
    pub async fn copy_into(&self, requested: &str, dest: &Path) -> Result<u64> {
        let source = self.resolve(requested).await?;
        let written = tokio::fs::copy(&source, dest)
            .await
            .map_err(|e| Error::Acquisition(format!("copy from {}: {e}", source.display())))?;
        if written == 0 {
            return Err(Error::Acquisition(format!("{requested:?} is empty")));
        }
        Ok(written)
    }
}
