//! Peer connection, которым управляет negotiation.
//!
//! `RtcPeerLink` реализация на webrtc-rs. Подойдёт любой линк, который умеет
//! создавать и применять описания и сообщать о смене состояния.

use crate::error::Result;
use crate::media::{LocalMedia, LocalTrack};
use crate::peer::state::{ConnectionState, GatheringState};
use crate::peer::types::{RemoteMedia, SessionRecord};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// События от peer connection
#[derive(Debug, Clone)]
pub enum LinkEvent {
    GatheringComplete,
    ConnectionStateChanged(ConnectionState),
    RemoteTrack(RemoteMedia),
}

pub type LinkEventHandler = Arc<dyn Fn(LinkEvent) + Send + Sync>;

/// Срабатывает (сообщение или закрытие канала), когда ICE gathering завершён
pub type GatheringPromise = mpsc::Receiver<()>;

#[async_trait]
pub trait PeerLink: Send + Sync + 'static {
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionRecord>;

    async fn create_answer(&self) -> Result<SessionRecord>;

    async fn set_local_description(&self, desc: SessionRecord) -> Result<()>;

    async fn set_remote_description(&self, desc: SessionRecord) -> Result<()>;

    /// Текущее локальное описание вместе с кандидатами
    async fn local_description(&self) -> Option<SessionRecord>;

    /// Брать до `set_local_description`, иначе можно пропустить
    /// завершение этого раунда
    async fn gathering_complete(&self) -> GatheringPromise;

    fn gathering_state(&self) -> GatheringState;

    fn connection_state(&self) -> ConnectionState;

    /// Заменяет ранее установленный обработчик
    fn on_event(&self, handler: LinkEventHandler);

    async fn replace_video_track(&self, track: Option<LocalTrack>) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Один линк на звонок
#[async_trait]
pub trait PeerLinkFactory: Send + Sync + 'static {
    type Link: PeerLink;

    async fn connect(&self, media: &LocalMedia) -> Result<Self::Link>;
}
