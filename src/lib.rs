//! hls-relay - turn a video source into an HLS stream with ffmpeg and serve it.
//!
//! Hexagonal Architecture:
//! - domain/: Sessions, the ffmpeg HLS template, playlist reading
//! - ports/: Trait definitions (source fetching, transcoding)
//! - adapters/: ffmpeg, reqwest, local filesystem, inbound HTTP (axum)
//! - application/: Conversion pipeline, session registry, reaper
//! - config: Environment configuration

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod ports;

pub use config::ServiceConfig;
pub use error::{Error, Result};
