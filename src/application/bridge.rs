//! Bridge service - the operations exposed to the front door

use metrics::counter;
use std::sync::Arc;
use tracing::{info, warn};

use super::error::{StartFailure, StartStep};
use super::muxer::{BridgeDeps, CloseReason, Muxer, MuxerSettings};
use crate::domain::session::{SessionRegistry, SessionState, StartParams};
use crate::domain::shared::{DomainError, SessionKey};

/// Starts, stops and looks up bridged sessions
#[derive(Clone)]
pub struct BridgeService {
    registry: SessionRegistry<Muxer>,
    deps: BridgeDeps,
    settings: MuxerSettings,
    default_gateway: Arc<str>,
}

impl BridgeService {
    pub fn new(deps: BridgeDeps, settings: MuxerSettings, default_gateway: &str) -> Self {
        Self {
            registry: SessionRegistry::new(),
            deps,
            settings,
            default_gateway: Arc::from(default_gateway),
        }
    }

    pub fn settings(&self) -> &MuxerSettings {
        &self.settings
    }

    pub fn deps(&self) -> &BridgeDeps {
        &self.deps
    }

    /// Validate, reserve the key, then run the session start sequence.
    /// The key becomes visible as live only after a full success.
    pub async fn start(&self, params: StartParams) -> Result<SessionKey, StartFailure> {
        let identity = params
            .validate(self.settings.id_policy)
            .map_err(|e| self.failed(StartFailure::new(StartStep::Validate, "Invalid parameters", e)))?;

        let reservation = self.registry.reserve(identity.key.clone()).await.map_err(|e| {
            self.failed(StartFailure::new(
                StartStep::Validate,
                format!("Camera {} is already publishing", identity.key),
                e,
            ))
        })?;

        let gateway = match params.gateway.trim() {
            "" => self.default_gateway.to_string(),
            address => address.to_string(),
        };
        let muxer = Muxer::new(
            identity.key.clone(),
            reservation.instance(),
            self.deps.clone(),
            self.settings.clone(),
            self.registry.clone(),
        );

        if let Err(failure) = muxer.start(&params, &identity, &gateway).await {
            reservation.release().await;
            return Err(self.failed(failure));
        }

        if let Err(e) = reservation.commit(muxer.clone()).await {
            warn!(session = %identity.key, "Session closed before it was registered: {}", e);
            muxer.close().await;
            return Err(self.failed(StartFailure::new(StartStep::Signal, "", e)));
        }

        counter!("bridge_sessions_started_total").increment(1);
        info!(session = %identity.key, "Publishing in room {}", params.room);
        Ok(identity.key)
    }

    fn failed(&self, failure: StartFailure) -> StartFailure {
        counter!("bridge_sessions_failed_total", "step" => failure.step.as_str()).increment(1);
        failure
    }

    /// Close a live session
    pub async fn stop(&self, key: &SessionKey) -> Result<(), DomainError> {
        let muxer = self
            .registry
            .get(key)
            .await
            .ok_or_else(|| DomainError::NotFound(format!("session {}", key)))?;
        muxer.close().await;
        Ok(())
    }

    pub async fn mute(&self, key: &SessionKey) -> Result<bool, DomainError> {
        let muxer = self.live(key).await?;
        Ok(muxer.mute().await)
    }

    pub async fn unmute(&self, key: &SessionKey) -> Result<bool, DomainError> {
        let muxer = self.live(key).await?;
        Ok(muxer.unmute().await)
    }

    pub async fn exists(&self, key: &SessionKey) -> bool {
        self.registry.exists(key).await
    }

    pub async fn list(&self) -> Vec<SessionKey> {
        self.registry.list().await
    }

    pub async fn state(&self, key: &SessionKey) -> Option<SessionState> {
        match self.registry.get(key).await {
            Some(muxer) => Some(muxer.state().await),
            None => None,
        }
    }

    /// Close every live session; used on process shutdown
    pub async fn close_all(&self) {
        let live = self.registry.live().await;
        info!("Closing {} sessions", live.len());
        for (_, muxer) in live {
            muxer.close_with(CloseReason::Shutdown).await;
        }
    }

    async fn live(&self, key: &SessionKey) -> Result<Muxer, DomainError> {
        self.registry
            .get(key)
            .await
            .ok_or_else(|| DomainError::NotFound(format!("session {}", key)))
    }
}
