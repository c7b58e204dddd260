//! События наверх: что UI слой узнаёт о звонке.

use crate::error::CallError;
use crate::negotiation::classify::{Role, ScenarioKind};
use crate::peer::state::ConnectionState;
use crate::peer::types::RemoteMedia;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub enum CallEvent {
    RemoteStream(RemoteMedia),
    ConnectionStateChanged(ConnectionState),
    NegotiationFailed { reason: CallError, retryable: bool },
    RoleAssigned { role: Role, scenario: ScenarioKind },
}

/// Отправка событий наверх. Если получатель уже закрыт, событие
/// просто теряется.
#[derive(Clone)]
pub struct EventEmitter {
    tx: mpsc::UnboundedSender<CallEvent>,
}

impl EventEmitter {
    pub fn new(tx: mpsc::UnboundedSender<CallEvent>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<CallEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn remote_stream(&self, media: RemoteMedia) {
        info!(stream = %media.stream_id, track = %media.track_id, "remote stream");
        self.emit(CallEvent::RemoteStream(media));
    }

    pub fn connection_state(&self, state: ConnectionState) {
        debug!(%state, "emit connection state");
        self.emit(CallEvent::ConnectionStateChanged(state));
    }

    pub fn negotiation_failed(&self, reason: CallError) {
        let retryable = reason.is_retryable();
        warn!(error = %reason, retryable, "negotiation failed");
        self.emit(CallEvent::NegotiationFailed { reason, retryable });
    }

    pub fn role_assigned(&self, role: Role, scenario: ScenarioKind) {
        info!(%role, ?scenario, "role assigned");
        self.emit(CallEvent::RoleAssigned { role, scenario });
    }

    fn emit(&self, event: CallEvent) {
        if self.tx.send(event).is_err() {
            debug!("event receiver dropped");
        }
    }
}
