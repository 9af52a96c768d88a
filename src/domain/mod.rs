//! Domain layer - sessions, the ffmpeg HLS template and playlist reading.

pub mod hls;
pub mod session;
pub mod transcode;
