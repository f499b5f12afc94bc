//! Interface layer - External interfaces
//!
//! This layer handles:
//! - The camera push HTTP endpoints
//! - Prometheus metrics exposition
//! - Request/response formatting

pub mod api;
