//! # compoza-core
//!
//! Core library for Compoza providing:
//! - Runtime configuration types (cache TTLs, registry endpoints, task settings)
//! - Hierarchical configuration loading (embedded defaults, user file, environment)
//! - The shared error type

pub mod config;
pub mod error;
pub mod types;

pub use config::HierarchicalConfigLoader;
pub use error::{Error, Result};
pub use types::RuntimeConfig;
