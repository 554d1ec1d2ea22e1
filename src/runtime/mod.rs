//! Runtime: the transaction coordinator and its support types.

pub mod coordinator;
pub mod deadlock;
pub mod output;

pub use coordinator::{Blocked, Coordinator, Stats};
pub use output::{OutputLog, OutputOptions};
