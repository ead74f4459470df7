//! Scene files and runtime configuration.

pub mod config;
pub mod scene;
