//! HASHWEAVE Consensus Engine
//!
//! Leaderless Byzantine fault tolerant consensus over a gossiped event graph:
//! - Ancestry summaries propagated at insertion
//! - Rounds and witnesses from strongly-seen supermajorities
//! - Virtual voting on witness fame with coin rounds
//! - Total order by round received, median timestamp and whitened hash

pub mod ancestry;
pub mod deferred;
pub mod engine;
pub mod event;
pub mod fame;
pub mod graph;
pub mod order;
pub mod output;
pub mod participants;
pub mod round;
pub mod simulation;
pub mod sync;

pub use deferred::*;
pub use engine::*;
pub use event::*;
pub use fame::*;
pub use graph::*;
pub use order::*;
pub use output::*;
pub use participants::*;
pub use round::*;
pub use simulation::*;
pub use sync::*;
