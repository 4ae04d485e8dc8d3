//! HASHWEAVE Node Implementation
//!
//! Node binary that combines all components:
//! - Consensus runtime with persistent event log
//! - HTTP API for gossip and consensus output

mod api;
mod node;
mod runtime;

pub use api::*;
pub use node::*;
pub use runtime::*;
