//! Domain layer - Core rules of a bridged session
//!
//! This layer contains:
//! - Value Objects: session keys, room and publisher ids
//! - The session lifecycle, start parameters and retry budget
//! - The registry of live sessions

pub mod session;
pub mod shared;

// Re-export commonly used types
pub use shared::{DomainError, Result};
