use super::error::AppError;
use super::AppState;
use crate::application::pipeline::{Published, Source};
use crate::error::Error;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct StreamRequest {
    #[serde(default, alias = "url")]
    pub video_url: Option<String>,
    #[serde(default)]
    pub video_path: Option<String>,
}

/// `POST /stream_file` and `POST /convert`.
///
/// The source may come from the JSON body or from the query string.
pub async fn stream_file(
    State(state): State<AppState>,
    query: Result<Query<StreamRequest>, QueryRejection>,
    body: Result<Json<StreamRequest>, JsonRejection>,
) -> Result<Json<Published>, AppError> {
    let Query(query) = query.map_err(|rejection| Error::InvalidInput(rejection.body_text()))?;
    let request = match body {
        Ok(Json(request)) => request,
        // No JSON body at all; the query string may still carry the source.
        Err(JsonRejection::MissingJsonContentType(_)) => StreamRequest::default(),
        Err(rejection) if query.video_url.is_none() && query.video_path.is_none() => {
            return Err(Error::InvalidInput(rejection.body_text()).into());
        }
        Err(_) => StreamRequest::default(),
    };

    let source = Source::from_fields(
        request.video_url.as_deref().or(query.video_url.as_deref()),
        request.video_path.as_deref().or(query.video_path.as_deref()),
    )?;

    let published = state.pipeline.convert(source).await?;
    Ok(Json(published))
}
