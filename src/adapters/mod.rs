//! Adapters - Concrete implementations of ports, plus the inbound HTTP layer.

pub mod ffmpeg;
pub mod fs;
pub mod http;
pub mod remote;
