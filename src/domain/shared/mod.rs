//! Shared kernel - Types used by every layer of the bridge

pub mod error;
pub mod result;
pub mod value_objects;

pub use error::DomainError;
pub use result::Result;
pub use value_objects::*;
