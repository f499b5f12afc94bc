//! Session domain - lifecycle, start parameters, retries and the registry

pub mod params;
pub mod registry;
pub mod retry;
pub mod state;
pub mod track;

pub use params::{IceSettings, PublisherIdentity, StartParams, MUTED_MICROPHONE};
pub use registry::{Reservation, SessionRegistry};
pub use retry::RetryBudget;
pub use state::SessionState;
pub use track::{CodecDescriptor, CodecKind, MediaKind, TrackDirection};
