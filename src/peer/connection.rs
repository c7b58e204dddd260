use crate::config::NegotiationConfig;
use crate::error::{CallError, Result};
use crate::logger::dump_selected_pair;
use crate::media::{LocalMedia, LocalTrack};
use crate::peer::ice::rtc_ice_servers;
use crate::peer::link::{GatheringPromise, LinkEvent, LinkEventHandler, PeerLink, PeerLinkFactory};
use crate::peer::state::{ConnectionState, GatheringState};
use crate::peer::types::{MediaKind, RemoteMedia, SdpKind, ServerConfig, SessionRecord};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;

type SharedHandler = Arc<Mutex<Option<LinkEventHandler>>>;

fn dispatch(handler: &SharedHandler, event: LinkEvent) {
    let current = match handler.lock() {
        Ok(guard) => guard.clone(),
        Err(_) => None,
    };
    match current {
        Some(h) => h(event),
        None => debug!(?event, "link event before a handler was installed"),
    }
}

fn desc_err(e: webrtc::Error) -> CallError {
    CallError::Description(e.to_string())
}

/// Peer connection на webrtc-rs
pub struct RtcPeerLink {
    pc: Arc<RTCPeerConnection>,
    video_sender: tokio::sync::Mutex<Option<Arc<RTCRtpSender>>>,
    handler: SharedHandler,
}

impl RtcPeerLink {
    /// Создаём peer и сразу вешаем локальные треки
    pub async fn new(config: &NegotiationConfig, media: &LocalMedia) -> Result<Self> {
        let mut engine = MediaEngine::default();
        engine.register_default_codecs().map_err(desc_err)?;
        let registry =
            register_default_interceptors(Registry::new(), &mut engine).map_err(desc_err)?;
        let api = APIBuilder::new()
            .with_media_engine(engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(
            api.new_peer_connection(rtc_config(&config.ice_servers))
                .await
                .map_err(desc_err)?,
        );
        let handler: SharedHandler = Arc::new(Mutex::new(None));

        let gather_handler = Arc::clone(&handler);
        pc.on_ice_gathering_state_change(Box::new(move |state: RTCIceGathererState| {
            debug!(?state, "ICE gathering state changed");
            if state == RTCIceGathererState::Complete {
                dispatch(&gather_handler, LinkEvent::GatheringComplete);
            }
            Box::pin(async {})
        }));

        // делаем копию для обработчика состояний
        let state_handler = Arc::clone(&handler);
        let pc_stats = Arc::downgrade(&pc);
        pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
            info!(state = ?st, "peer connection state changed");
            if matches!(
                st,
                RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Failed
            ) {
                if let Some(pc) = pc_stats.upgrade() {
                    tokio::spawn(async move {
                        dump_selected_pair(&pc, "BEFORE-FAIL").await;
                    });
                }
            }
            dispatch(&state_handler, LinkEvent::ConnectionStateChanged(st.into()));
            Box::pin(async {})
        }));

        let track_handler = Arc::clone(&handler);
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let kind = match track.kind() {
                    RTPCodecType::Audio => MediaKind::Audio,
                    _ => MediaKind::Video,
                };
                let media = RemoteMedia {
                    stream_id: track.stream_id(),
                    track_id: track.id(),
                    kind,
                    track: Some(Arc::clone(&track)),
                };
                info!(stream = %media.stream_id, track = %media.track_id, ?kind, "remote track");
                dispatch(&track_handler, LinkEvent::RemoteTrack(media));
                Box::pin(async {})
            },
        ));

        let link = Self {
            pc,
            video_sender: tokio::sync::Mutex::new(None),
            handler,
        };

        if let Some(audio) = &media.audio {
            link.add_track(Arc::clone(audio)).await?;
        }
        if let Some(video) = &media.video {
            let sender = link.add_track(Arc::clone(video)).await?;
            *link.video_sender.lock().await = Some(sender);
        }
        Ok(link)
    }

    async fn add_track(&self, track: LocalTrack) -> Result<Arc<RTCRtpSender>> {
        let sender = self.pc.add_track(track).await.map_err(desc_err)?;

        // RTCP нужно вычитывать, иначе interceptors не работают
        let rtcp_sender = Arc::clone(&sender);
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while rtcp_sender.read(&mut buf).await.is_ok() {}
        });
        Ok(sender)
    }
}

/// Создает конфигурацию для peer connection
fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: rtc_ice_servers(servers),
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

#[async_trait]
impl PeerLink for RtcPeerLink {
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionRecord> {
        let options = RTCOfferOptions {
            ice_restart,
            ..Default::default()
        };
        let offer = self.pc.create_offer(Some(options)).await.map_err(desc_err)?;
        SessionRecord::from_rtc(&offer)
    }

    async fn create_answer(&self) -> Result<SessionRecord> {
        let answer = self.pc.create_answer(None).await.map_err(desc_err)?;
        SessionRecord::from_rtc(&answer)
    }

    async fn set_local_description(&self, desc: SessionRecord) -> Result<()> {
        let desc = desc
            .into_rtc()
            .map_err(|e| CallError::Description(e.to_string()))?;
        self.pc.set_local_description(desc).await.map_err(desc_err)
    }

    async fn set_remote_description(&self, desc: SessionRecord) -> Result<()> {
        // встречный offer поверх нашего: сначала откатываем свой
        if desc.kind == SdpKind::Offer
            && self.pc.signaling_state() == RTCSignalingState::HaveLocalOffer
        {
            debug!("rolling back local offer");
            let mut rollback = RTCSessionDescription::default();
            rollback.sdp_type = RTCSdpType::Rollback;
            self.pc
                .set_local_description(rollback)
                .await
                .map_err(desc_err)?;
        }
        let desc = desc.into_rtc()?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(|e| CallError::RemoteDescriptionRejected(e.to_string()))
    }

    async fn local_description(&self) -> Option<SessionRecord> {
        let desc = self.pc.local_description().await?;
        SessionRecord::from_rtc(&desc).ok()
    }

    async fn gathering_complete(&self) -> GatheringPromise {
        self.pc.gathering_complete_promise().await
    }

    fn gathering_state(&self) -> GatheringState {
        self.pc.ice_gathering_state().into()
    }

    fn connection_state(&self) -> ConnectionState {
        self.pc.connection_state().into()
    }

    fn on_event(&self, handler: LinkEventHandler) {
        if let Ok(mut slot) = self.handler.lock() {
            *slot = Some(handler);
        }
    }

    async fn replace_video_track(&self, track: Option<LocalTrack>) -> Result<()> {
        let mut sender = self.video_sender.lock().await;
        if let Some(existing) = sender.as_ref() {
            return existing.replace_track(track).await.map_err(desc_err);
        }
        if let Some(track) = track {
            // видео ещё не было: новый sender дойдёт до пира только после нового offer/answer
            warn!("no outbound video sender; adding one");
            *sender = Some(self.add_track(track).await?);
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if let Ok(mut slot) = self.handler.lock() {
            slot.take();
        }
        self.pc.close().await.map_err(desc_err)
    }
}

/// Фабрика webrtc-линков: один peer connection на звонок
pub struct RtcLinkFactory {
    config: NegotiationConfig,
}

impl RtcLinkFactory {
    pub fn new(config: NegotiationConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PeerLinkFactory for RtcLinkFactory {
    type Link = RtcPeerLink;

    async fn connect(&self, media: &LocalMedia) -> Result<RtcPeerLink> {
        RtcPeerLink::new(&self.config, media).await
    }
}
