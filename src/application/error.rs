//! Application errors

use std::fmt;
use thiserror::Error;

use crate::domain::shared::DomainError;
use crate::infrastructure::audio::DeviceError;
use crate::infrastructure::protocols::janus::GatewayError;
use crate::infrastructure::protocols::webrtc::EngineError;
use crate::infrastructure::source::SourceError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("gatherCompletePromise wait")]
    GatherTimeout,

    #[error("no track available")]
    NoTrackAvailable,

    /// Plugin answered with an error field
    #[error("{0}")]
    Rejected(String),

    #[error("answer carries no jsep")]
    MissingJsep,

    #[error("session closed while starting")]
    Closed,
}

/// Start sequence stage, used as the `step` metric label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartStep {
    Validate,
    Source,
    Negotiate,
    Signal,
}

impl StartStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            StartStep::Validate => "validate",
            StartStep::Source => "source",
            StartStep::Negotiate => "negotiate",
            StartStep::Signal => "signal",
        }
    }
}

/// What a failed start reports: the step message plus the cause
#[derive(Error, Debug, Clone, PartialEq)]
pub struct StartFailure {
    pub step: StartStep,
    /// Human readable step message, may be empty
    pub message: String,
    #[source]
    pub cause: BridgeError,
}

impl StartFailure {
    pub fn new(step: StartStep, message: impl Into<String>, cause: impl Into<BridgeError>) -> Self {
        Self {
            step,
            message: message.into(),
            cause: cause.into(),
        }
    }
}

impl fmt::Display for StartFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.cause)
        } else {
            write!(f, "{}: {}", self.message, self.cause)
        }
    }
}
