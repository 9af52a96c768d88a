//! CORS policy: permissive or an origin allow-list.

use crate::config::AllowedOrigins;
use axum::extract::Request;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use std::time::Duration;
use tower_http::cors::{AllowHeaders, Any, CorsLayer};

const PREFLIGHT_MAX_AGE: Duration = Duration::from_secs(86400);

pub fn cors_layer(origins: &AllowedOrigins) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .max_age(PREFLIGHT_MAX_AGE);

    match origins {
        AllowedOrigins::Any => layer.allow_origin(Any).allow_headers(Any),
        AllowedOrigins::List(list) => {
            let allowed: Vec<HeaderValue> = list
                .iter()
                .filter_map(|origin| match HeaderValue::from_str(origin) {
                    Ok(value) => Some(value),
                    Err(_) => {
                        tracing::warn!(%origin, "ignoring unusable CORS origin");
                        None
                    }
                })
                .collect();
            // Wildcard headers cannot be combined with credentials.
            layer
                .allow_origin(allowed)
                .allow_headers(AllowHeaders::mirror_request())
                .allow_credentials(true)
        }
    }
}

/// Answer preflight requests with 204 instead of 200.
pub async fn preflight_no_content(req: Request, next: Next) -> Response {
    let is_options = req.method() == Method::OPTIONS;
    let mut response = next.run(req).await;
    if is_options && response.status() == StatusCode::OK {
        *response.status_mut() = StatusCode::NO_CONTENT;
    }
    response
}
