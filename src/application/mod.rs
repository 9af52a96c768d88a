//! Application layer - the conversion pipeline, the session registry and
//! the reaper, written against the ports.

pub mod pipeline;
pub mod reaper;
pub mod registry;
