use super::error::AppError;
use super::AppState;
use crate::application::pipeline::Published;
use crate::error::Error;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, State};
use axum::Json;

/// `POST /upload`: the first multipart field carrying a filename is the media.
pub async fn upload_media(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Published>, AppError> {
    let mut multipart =
        multipart.map_err(|rejection| Error::InvalidInput(rejection.body_text()))?;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::InvalidInput(format!("malformed multipart body: {e}")))?
    {
        let file_name = match field.file_name() {
            Some(name) => name.to_owned(),
            None => continue,
        };

        let pipeline = &state.pipeline;
        let pending = pipeline.open().await?;
        tracing::info!(session_id = %pending.id(), %file_name, "receiving upload");

        if let Err(err) = pipeline.receive(&pending, field).await {
            pipeline.fail(pending, &err).await;
            return Err(err.into());
        }
        return Ok(Json(pipeline.finish(pending).await?));
    }

    Err(Error::InvalidInput("Missing file field.".to_string()).into())
}
