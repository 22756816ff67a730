//! CLI command implementations

pub mod check;
pub mod update;
pub mod watch;
