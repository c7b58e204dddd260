//! Контроллер звонка: точки входа для UI слоя.

use crate::config::NegotiationConfig;
use crate::error::{CallError, Result};
use crate::events::{CallEvent, EventEmitter};
use crate::media::MediaSource;
use crate::negotiation::{NegotiationSession, Role};
use crate::peer::exchanger::SdpExchanger;
use crate::peer::link::PeerLinkFactory;
use crate::peer::state::ConnectionState;
use crate::store::{RendezvousStore, RoomKey};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, info_span, warn, Instrument};

struct ActiveCall<L> {
    room: RoomKey,
    role: Role,
    exchanger: SdpExchanger<L>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Одна активная сессия на контроллер.
///
/// Если контроллер дропнуть посреди звонка, задача согласования
/// остановится и уберёт за собой так же, как `end`.
pub struct SessionController<S, F: PeerLinkFactory, M> {
    config: NegotiationConfig,
    store: Arc<S>,
    factory: F,
    media: M,
    emitter: EventEmitter,
    active: Option<ActiveCall<F::Link>>,
}

impl<S, F, M> SessionController<S, F, M>
where
    S: RendezvousStore,
    F: PeerLinkFactory,
    M: MediaSource,
{
    pub fn new(
        config: NegotiationConfig,
        store: Arc<S>,
        factory: F,
        media: M,
    ) -> Result<(Self, mpsc::UnboundedReceiver<CallEvent>)> {
        config.validate()?;
        let (emitter, events) = EventEmitter::channel();
        let controller = Self {
            config,
            store,
            factory,
            media,
            emitter,
            active: None,
        };
        Ok((controller, events))
    }

    /// Входим в `room`, возвращаем роль первого раунда
    pub async fn join(&mut self, room: impl Into<RoomKey>) -> Result<Role> {
        if self.active.is_some() {
            return Err(CallError::CallInProgress);
        }
        let room = room.into();

        let media = self.media.acquire().await?;
        let link = match self.factory.connect(&media).await {
            Ok(link) => Arc::new(link),
            Err(e) => {
                self.media.release().await;
                return Err(e);
            }
        };

        let exchanger = SdpExchanger::new(link, self.config.gathering_timeout());
        let mut session = NegotiationSession::new(
            room.clone(),
            Arc::clone(&self.store),
            exchanger.clone(),
            &self.config,
            self.emitter.clone(),
        );
        let span = info_span!("call", room = %room, session = %session.id());

        let role = match session.start().instrument(span.clone()).await {
            Ok(role) => role,
            Err(e) => {
                session.dispose().instrument(span).await;
                self.media.release().await;
                return Err(e);
            }
        };

        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(session.run(shutdown_rx).instrument(span));
        info!(%room, %role, "joined room");

        self.active = Some(ActiveCall {
            room,
            role,
            exchanger,
            shutdown,
            task,
        });
        Ok(role)
    }

    /// Завершает текущий звонок, если он есть. После возврата подписок нет,
    /// а наши слоты удалены.
    pub async fn end(&mut self) {
        let Some(call) = self.active.take() else {
            return;
        };
        let _ = call.shutdown.send(());
        if let Err(e) = call.task.await {
            warn!(error = %e, "negotiation task ended abnormally");
        }
        self.media.release().await;
        self.emitter.connection_state(ConnectionState::Closed);
        info!(room = %call.room, "call ended");
    }

    /// Переключаем исходящее видео на следующую камеру
    pub async fn switch_camera(&mut self) -> Result<()> {
        let call = self.active.as_ref().ok_or(CallError::NoActiveCall)?;
        let track = self.media.next_camera().await?;
        call.exchanger.replace_outbound_video(Some(track)).await?;
        info!(room = %call.room, "camera switched");
        Ok(())
    }

    /// `end`, затем `join` в ту же комнату
    pub async fn rejoin(&mut self) -> Result<Role> {
        let room = self.room().cloned().ok_or(CallError::NoActiveCall)?;
        self.end().await;
        self.join(room).await
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn room(&self) -> Option<&RoomKey> {
        self.active.as_ref().map(|call| &call.room)
    }

    /// Роль на момент `join`. После renegotiation роль может смениться,
    /// об этом сообщает `CallEvent::RoleAssigned`.
    pub fn role(&self) -> Option<Role> {
        self.active.as_ref().map(|call| call.role)
    }
}
