use super::error::AppError;
use super::AppState;
use crate::domain::session::SessionId;
use crate::error::Error;
use axum::extract::{Path as UrlPath, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

fn filename_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("valid regex"))
}

/// A single plain path component: no separators, no `.`/`..`, no hidden files.
pub fn filename_is_valid(name: &str) -> bool {
    name.len() <= 255 && filename_pattern().is_match(name)
}

fn content_type(path: &Path) -> String {
    match path.extension().and_then(|e| e.to_str()) {
        Some("m3u8") => "application/vnd.apple.mpegurl".to_string(),
        Some("ts") => "video/mp2t".to_string(),
        _ => mime_guess::from_path(path).first_or_octet_stream().to_string(),
    }
}

/// `GET /static/{session}/{filename}` and its aliases.
pub async fn serve_artifact(
    State(state): State<AppState>,
    UrlPath((session, filename)): UrlPath<(String, String)>,
) -> Result<Response, AppError> {
    let not_found = || AppError(Error::NotFound(format!("{session}/{filename}")));

    let id: SessionId = session.parse().map_err(|_| not_found())?;
    if !filename_is_valid(&filename) {
        tracing::debug!(%session, %filename, "rejected artifact name");
        return Err(not_found());
    }

    let lease = state
        .pipeline
        .registry()
        .lease(&id)
        .await
        .ok_or_else(not_found)?;

    let dir = tokio::fs::canonicalize(&lease.dir)
        .await
        .map_err(|_| not_found())?;
    let path = tokio::fs::canonicalize(dir.join(&filename))
        .await
        .map_err(|_| not_found())?;
    if !path.starts_with(&dir) {
        return Err(not_found());
    }
    let is_file = tokio::fs::metadata(&path)
        .await
        .map(|m| m.is_file())
        .map_err(|_| not_found())?;
    if !is_file {
        return Err(not_found());
    }

    let data = tokio::fs::read(&path).await.map_err(|_| not_found())?;
    drop(lease);

    Ok((
        [
            (header::CONTENT_TYPE, content_type(&path)),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        data,
    )
        .into_response())
}
