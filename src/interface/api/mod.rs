//! HTTP front door

pub mod dto;
pub mod metrics_handler;
pub mod push_handler;
pub mod router;

pub use dto::{PushConfigs, PushResponse};
pub use metrics_handler::init_metrics;
pub use push_handler::AppState;
pub use router::build_router;
