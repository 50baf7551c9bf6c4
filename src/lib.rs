// lib.rs - Main library file that exports all modules
pub mod aggregator;
pub mod checkpoint;
pub mod config;
pub mod dedup;
pub mod error;
pub mod handlers;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod synthesis;

// Re-export commonly used types for convenience
pub use error::EngineError;
pub use models::{Run, RunKind, RunStage};
pub use orchestrator::Orchestrator;
