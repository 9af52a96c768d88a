use super::error::AppError;
use super::AppState;
use crate::domain::session::{SessionId, SessionState};
use crate::error::Error;
use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Debug, Serialize)]
pub struct SessionStatus {
    pub session_id: SessionId,
    pub state: &'static str,
    pub playlist_url: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `GET /sessions/{session}`
pub async fn session_status(
    State(state): State<AppState>,
    Path(session): Path<String>,
) -> Result<Json<SessionStatus>, AppError> {
    let snapshot = session
        .parse::<SessionId>()
        .ok()
        .and_then(|id| state.pipeline.registry().get(&id))
        .ok_or_else(|| Error::NotFound(format!("session {session}")))?;

    let error = match &snapshot.state {
        SessionState::Failed { error } => Some(error.clone()),
        _ => None,
    };

    Ok(Json(SessionStatus {
        session_id: snapshot.session_id,
        state: snapshot.state.label(),
        playlist_url: state.pipeline.playlist_url(&snapshot.session_id),
        created_at: snapshot.created_at,
        error,
    }))
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "sessions": state.pipeline.registry().len(),
    }))
}
