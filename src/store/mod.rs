//! Rendezvous хранилище: общий key-value, через который встречаются пиры.
//!
//! У комнаты два слота, `offer` и `answer`, в каждом не больше одного
//! сериализованного [`SessionRecord`]. Ни блокировок, ни транзакций нет:
//! между любыми двумя операциями второй пир может что-то записать.

pub mod memory;

use crate::error::Result;
use crate::peer::types::SessionRecord;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

pub use memory::{MemoryClient, MemoryStore};

/// Идентификатор комнаты
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomKey(String);

impl RoomKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RoomKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for RoomKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Offer,
    Answer,
}

impl Slot {
    pub fn key(&self) -> &'static str {
        match self {
            Slot::Offer => "offer",
            Slot::Answer => "answer",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Что видит подписчик: запись, `None` для пустого слота или ошибку,
/// если значение не разбирается
pub type SlotChange = Result<Option<SessionRecord>>;

pub type SlotCallback = Arc<dyn Fn(SlotChange) + Send + Sync>;

/// Активная подписка на слот. Отписывается на `cancel` или drop, после
/// возврата колбэк больше не вызывается.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn cancel(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[async_trait]
pub trait RendezvousStore: Send + Sync + 'static {
    async fn read_once(&self, room: &RoomKey, slot: Slot) -> Result<Option<SessionRecord>>;

    async fn write(&self, room: &RoomKey, slot: Slot, record: &SessionRecord) -> Result<()>;

    /// Удаление пустого слота не ошибка. Заодно снимает on-disconnect
    /// удаление этого слота для текущего клиента.
    async fn delete(&self, room: &RoomKey, slot: Slot) -> Result<()>;

    /// Колбэк сначала получает текущее значение, потом каждое изменение
    async fn subscribe(
        &self,
        room: &RoomKey,
        slot: Slot,
        callback: SlotCallback,
    ) -> Result<Subscription>;

    /// Просим хранилище очистить `slot`, если клиент внезапно пропадёт
    async fn on_disconnect_remove(&self, room: &RoomKey, slot: Slot) -> Result<()>;
}
