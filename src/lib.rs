//! repdb - replicated in-memory database simulator
//!
//! Executes a scripted stream of transactional commands over ten sites that
//! may fail and recover: strict two-phase locking with lock upgrades for
//! read-write transactions, multiversion snapshot reads for read-only
//! transactions, deferred writes applied at commit, and a cycle-detecting
//! deadlock detector that aborts the youngest transaction involved.

pub mod core;
pub mod parser;
pub mod runtime;
mod tests;

// Re-export the types most callers need
pub use crate::core::error::DbError;
pub use parser::Command;
pub use runtime::coordinator::{Coordinator, Stats};
pub use runtime::output::{OutputLog, OutputOptions};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
