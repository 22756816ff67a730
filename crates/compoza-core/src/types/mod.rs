//! Type definitions for Compoza runtime configuration

mod runtime_config;

pub use runtime_config::*;
