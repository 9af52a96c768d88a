//! Ports - trait seams between the pipeline and the outside world.

pub mod fetch;
pub mod transcoder;
