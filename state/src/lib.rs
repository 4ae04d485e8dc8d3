//! HASHWEAVE Storage
//!
//! Persists the raw event log in insertion order together with the finalized
//! consensus records, so a node can rebuild its graph after a restart and
//! check the replayed order against what it already finalized.

pub mod store;
pub mod memory;
pub mod persistent;

pub use store::*;
pub use memory::*;
pub use persistent::*;
