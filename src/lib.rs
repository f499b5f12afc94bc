//! Roomcast - Publish RTSP cameras and local microphones into Janus video rooms
//!
//! Each published camera is one session: a WebRTC peer connection fed by a
//! media source, negotiated with the Janus videoroom plugin over a
//! websocket signaling conversation.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interface;

// Re-export commonly used types
pub use domain::shared::error::DomainError;
pub use domain::shared::result::Result;
