//! HASHWEAVE Core Library
//!
//! Core types, errors, configuration and traits shared by the HASHWEAVE
//! consensus workspace.

pub mod types;
pub mod traits;
pub mod error;
pub mod config;

pub use types::*;
pub use traits::*;
pub use error::*;
pub use config::*;
