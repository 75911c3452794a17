//! Core domain models
//!
//! Stages, pipelines, run results and the artifact files that connect them.

pub mod artifact;
pub mod config;
pub mod pipeline;
pub mod stage;
pub mod state;

pub use pipeline::*;
pub use stage::*;
pub use state::*;
