//! `webrtc`-crate implementation of the transport engine seam

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice::udp_network::{EphemeralUDP, UDPNetwork};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::{TrackLocal, TrackLocalWriter};

use super::{EngineError, IceConnectionState, IceStateHandler, OutboundTrack, PeerConnection, PeerConnectionFactory};
use crate::domain::session::{CodecDescriptor, CodecKind, IceSettings, TrackDirection};
use crate::infrastructure::media::codec::PCMU_PAYLOAD_TYPE;
use crate::infrastructure::media::h264::H264Payloader;
use crate::infrastructure::media::rtp::RtpPacketizer;

const STREAM_ID: &str = "roomcast";
const RTCP_BUFFER_SIZE: usize = 1500;

/// Process-wide engine settings
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// MTU for locally payloaded video samples
    pub mtu: usize,
    pub port_min: u16,
    pub port_max: u16,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            mtu: 1200,
            port_min: 0,
            port_max: 0,
        }
    }
}

/// Peer connection factory backed by the `webrtc` crate
pub struct WebRtcEngine {
    api: API,
    mtu: usize,
}

impl WebRtcEngine {
    pub fn new(settings: &EngineSettings) -> Result<Self, EngineError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| EngineError::PeerConnection(e.to_string()))?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| EngineError::PeerConnection(e.to_string()))?;

        let mut setting_engine = SettingEngine::default();
        if settings.port_min > 0 && settings.port_min < settings.port_max {
            let ephemeral = EphemeralUDP::new(settings.port_min, settings.port_max)
                .map_err(|e| EngineError::PeerConnection(e.to_string()))?;
            setting_engine.set_udp_network(UDPNetwork::Ephemeral(ephemeral));
            info!(
                "ICE UDP port range {}-{}",
                settings.port_min, settings.port_max
            );
        }

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .with_setting_engine(setting_engine)
            .build();

        Ok(Self {
            api,
            mtu: settings.mtu,
        })
    }
}

#[async_trait]
impl PeerConnectionFactory for WebRtcEngine {
    async fn create(&self, ice: &IceSettings) -> Result<Arc<dyn PeerConnection>, EngineError> {
        let ice_servers = if ice.servers.is_empty() {
            vec![]
        } else {
            vec![RTCIceServer {
                urls: ice.servers.clone(),
                username: ice.username.clone().unwrap_or_default(),
                credential: ice.credential.clone().unwrap_or_default(),
                ..Default::default()
            }]
        };

        let config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let pc = self
            .api
            .new_peer_connection(config)
            .await
            .map_err(|e| EngineError::PeerConnection(e.to_string()))?;

        debug!("Created peer connection with {} ICE servers", ice.servers.len());
        Ok(Arc::new(WebRtcPeer {
            pc: Arc::new(pc),
            mtu: self.mtu,
        }))
    }
}

struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    mtu: usize,
}

fn map_ice_state(state: RTCIceConnectionState) -> IceConnectionState {
    match state {
        RTCIceConnectionState::New => IceConnectionState::New,
        RTCIceConnectionState::Checking => IceConnectionState::Checking,
        RTCIceConnectionState::Connected => IceConnectionState::Connected,
        RTCIceConnectionState::Completed => IceConnectionState::Completed,
        RTCIceConnectionState::Disconnected => IceConnectionState::Disconnected,
        RTCIceConnectionState::Failed => IceConnectionState::Failed,
        RTCIceConnectionState::Closed => IceConnectionState::Closed,
        _ => IceConnectionState::Unknown,
    }
}

#[async_trait]
impl PeerConnection for WebRtcPeer {
    async fn add_track(
        &self,
        codec: CodecDescriptor,
        direction: TrackDirection,
    ) -> Result<Arc<dyn OutboundTrack>, EngineError> {
        let track = Arc::new(TrackLocalStaticRTP::new(
            RTCRtpCodecCapability {
                mime_type: codec.codec.mime_type().to_owned(),
                clock_rate: codec.clock_rate,
                channels: codec.channels,
                ..Default::default()
            },
            codec.kind().to_string(),
            STREAM_ID.to_owned(),
        ));

        let direction = match direction {
            TrackDirection::SendOnly => RTCRtpTransceiverDirection::Sendonly,
            TrackDirection::SendRecv => RTCRtpTransceiverDirection::Sendrecv,
        };

        let transceiver = self
            .pc
            .add_transceiver_from_track(
                Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>,
                Some(RTCRtpTransceiverInit {
                    direction,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(|e| EngineError::Track(e.to_string()))?;

        // Read incoming RTCP so interceptors keep working
        let sender = transceiver.sender().await;
        tokio::spawn(async move {
            let mut buf = vec![0u8; RTCP_BUFFER_SIZE];
            while sender.read(&mut buf).await.is_ok() {}
        });

        debug!("Added {} track ({:?})", codec.codec.mime_type(), direction);
        Ok(Arc::new(StaticRtpTrack::new(codec, track, self.mtu)))
    }

    fn on_ice_connection_state_change(&self, handler: IceStateHandler) {
        self.pc
            .on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
                handler(map_ice_state(state));
                Box::pin(async {})
            }));
    }

    async fn gathering_complete_promise(&self) -> mpsc::Receiver<()> {
        self.pc.gathering_complete_promise().await
    }

    async fn create_offer(&self) -> Result<String, EngineError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| EngineError::Negotiation(e.to_string()))?;
        let sdp = offer.sdp.clone();
        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| EngineError::Negotiation(e.to_string()))?;
        Ok(sdp)
    }

    async fn local_description(&self) -> Option<String> {
        self.pc.local_description().await.map(|desc| desc.sdp)
    }

    async fn set_remote_answer(&self, sdp: &str) -> Result<(), EngineError> {
        let answer = RTCSessionDescription::answer(sdp.to_owned())
            .map_err(|e| EngineError::Negotiation(e.to_string()))?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| EngineError::Negotiation(e.to_string()))
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.pc
            .close()
            .await
            .map_err(|e| EngineError::PeerConnection(e.to_string()))
    }
}

/// How encoded samples become RTP payloads on a track
enum SamplePayloader {
    H264(H264Payloader),
    /// Audio frames travel as one payload each
    Whole,
    Unsupported,
}

struct SampleWriter {
    payloader: SamplePayloader,
    packetizer: RtpPacketizer,
}

/// Outbound track over `TrackLocalStaticRTP`.
///
/// Relayed RTP is written as is; samples are payloaded here and wrapped in
/// RTP headers whose payload type and SSRC the binding rewrites.
struct StaticRtpTrack {
    codec: CodecDescriptor,
    track: Arc<TrackLocalStaticRTP>,
    mtu: usize,
    writer: Mutex<SampleWriter>,
}

impl StaticRtpTrack {
    fn new(codec: CodecDescriptor, track: Arc<TrackLocalStaticRTP>, mtu: usize) -> Self {
        let payloader = match codec.codec {
            CodecKind::H264 => SamplePayloader::H264(H264Payloader::new()),
            CodecKind::Pcmu | CodecKind::Pcma | CodecKind::Opus => SamplePayloader::Whole,
            CodecKind::H265 => SamplePayloader::Unsupported,
        };
        // The binding rewrites the payload type on write
        let payload_type = match codec.codec {
            CodecKind::Pcmu => PCMU_PAYLOAD_TYPE,
            CodecKind::Pcma => 8,
            _ => 96,
        };
        let packetizer = RtpPacketizer::new(payload_type, rand::random(), codec.clock_rate);

        Self {
            codec,
            track,
            mtu,
            writer: Mutex::new(SampleWriter {
                payloader,
                packetizer,
            }),
        }
    }
}

#[async_trait]
impl OutboundTrack for StaticRtpTrack {
    fn codec(&self) -> CodecDescriptor {
        self.codec
    }

    async fn write_rtp(&self, packet: &[u8]) -> Result<(), EngineError> {
        self.track
            .write(packet)
            .await
            .map(|_| ())
            .map_err(|e| EngineError::Write(e.to_string()))
    }

    async fn write_sample(&self, data: Bytes, duration: Duration) -> Result<(), EngineError> {
        let mut writer = self.writer.lock().await;
        let payloads = match &mut writer.payloader {
            SamplePayloader::H264(payloader) => payloader.payload(self.mtu, &data),
            SamplePayloader::Whole => vec![data],
            SamplePayloader::Unsupported => {
                warn!("No payloader for {} samples", self.codec.codec.mime_type());
                return Err(EngineError::UnsupportedCodec(
                    self.codec.codec.mime_type().to_string(),
                ));
            }
        };

        for packet in writer.packetizer.packetize(payloads, duration) {
            self.track
                .write(&packet.serialize())
                .await
                .map_err(|e| EngineError::Write(e.to_string()))?;
        }
        Ok(())
    }
}
