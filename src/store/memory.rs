//! Rendezvous хранилище в памяти процесса.
//!
//! `MemoryStore` общий бэкенд. Каждый пир ходит в него через свой
//! `MemoryClient`, так on-disconnect удаления учитываются по клиентам.
//! Значения хранятся сериализованными, как в удалённом хранилище, и
//! разбираются при чтении.

use crate::error::{CallError, Result};
use crate::peer::types::SessionRecord;
use crate::store::{RendezvousStore, RoomKey, Slot, SlotCallback, SlotChange, Subscription};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, trace};

type EntryKey = (String, Slot);

struct Watcher {
    id: u64,
    key: EntryKey,
    callback: SlotCallback,
}

#[derive(Default)]
struct Shared {
    entries: HashMap<EntryKey, String>,
    watchers: Vec<Watcher>,
    disconnect_hooks: HashMap<u64, Vec<EntryKey>>,
    next_id: u64,
    offline: bool,
}

impl Shared {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Сохраняем значение и уведомляем подписчиков, если оно изменилось
    fn set(&mut self, key: EntryKey, value: Option<String>) {
        let previous = match &value {
            Some(raw) => self.entries.insert(key.clone(), raw.clone()),
            None => self.entries.remove(&key),
        };
        if previous == value {
            return;
        }
        trace!(room = %key.0, slot = %key.1, present = value.is_some(), "slot changed");
        let change = decode(value.as_deref());
        for watcher in self.watchers.iter().filter(|w| w.key == key) {
            (watcher.callback)(change.clone());
        }
    }
}

fn decode(raw: Option<&str>) -> SlotChange {
    raw.map(SessionRecord::from_json).transpose()
}

fn entry_key(room: &RoomKey, slot: Slot) -> EntryKey {
    (room.as_str().to_owned(), slot)
}

/// Общий бэкенд. Колбэки подписок вызываются под блокировкой, поэтому
/// отписка синхронная. Обращаться из колбэка к хранилищу нельзя.
#[derive(Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client(&self) -> MemoryClient {
        let id = self.lock().map(|mut s| s.next_id()).unwrap_or_default();
        MemoryClient {
            store: self.clone(),
            id,
        }
    }

    /// Сырое значение слота
    pub fn get_raw(&self, room: &str, slot: Slot) -> Option<String> {
        let shared = self.lock().ok()?;
        shared.entries.get(&(room.to_owned(), slot)).cloned()
    }

    /// Пишет сырое значение в обход сериализации, подписчики уведомляются
    pub fn put_raw(&self, room: &str, slot: Slot, raw: &str) {
        if let Ok(mut shared) = self.lock() {
            shared.set((room.to_owned(), slot), Some(raw.to_owned()));
        }
    }

    /// В offline любая операция падает с `StoreUnavailable`
    pub fn set_offline(&self, offline: bool) {
        if let Ok(mut shared) = self.lock() {
            shared.offline = offline;
        }
    }

    pub fn room_is_empty(&self, room: &str) -> bool {
        self.lock()
            .map(|s| !s.entries.keys().any(|(r, _)| r == room))
            .unwrap_or(true)
    }

    /// Сколько живых подписок на комнату
    pub fn watcher_count(&self, room: &str) -> usize {
        self.lock()
            .map(|s| s.watchers.iter().filter(|w| w.key.0 == room).count())
            .unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Shared>> {
        self.shared
            .lock()
            .map_err(|_| CallError::StoreUnavailable("store lock poisoned".into()))
    }

    fn online(&self) -> Result<MutexGuard<'_, Shared>> {
        let shared = self.lock()?;
        if shared.offline {
            return Err(CallError::StoreUnavailable("store is offline".into()));
        }
        Ok(shared)
    }

    fn unsubscribe(&self, id: u64) {
        if let Ok(mut shared) = self.lock() {
            shared.watchers.retain(|w| w.id != id);
        }
    }
}

/// Подключение одного пира к [`MemoryStore`]
#[derive(Clone)]
pub struct MemoryClient {
    store: MemoryStore,
    id: u64,
}

impl MemoryClient {
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Имитация пропажи клиента: удаляются все слоты, зарегистрированные
    /// через `on_disconnect_remove`
    pub fn drop_connection(&self) {
        let Ok(mut shared) = self.store.lock() else {
            return;
        };
        let hooks = shared.disconnect_hooks.remove(&self.id).unwrap_or_default();
        debug!(client = self.id, removed = hooks.len(), "client connection dropped");
        for key in hooks {
            shared.set(key, None);
        }
    }
}

#[async_trait]
impl RendezvousStore for MemoryClient {
    async fn read_once(&self, room: &RoomKey, slot: Slot) -> Result<Option<SessionRecord>> {
        let shared = self.store.online()?;
        decode(shared.entries.get(&entry_key(room, slot)).map(String::as_str))
    }

    async fn write(&self, room: &RoomKey, slot: Slot, record: &SessionRecord) -> Result<()> {
        let raw = record.to_json()?;
        let mut shared = self.store.online()?;
        shared.set(entry_key(room, slot), Some(raw));
        Ok(())
    }

    async fn delete(&self, room: &RoomKey, slot: Slot) -> Result<()> {
        let mut shared = self.store.online()?;
        let key = entry_key(room, slot);
        if let Some(hooks) = shared.disconnect_hooks.get_mut(&self.id) {
            hooks.retain(|k| *k != key);
        }
        shared.set(key, None);
        Ok(())
    }

    async fn subscribe(
        &self,
        room: &RoomKey,
        slot: Slot,
        callback: SlotCallback,
    ) -> Result<Subscription> {
        let mut shared = self.store.online()?;
        let key = entry_key(room, slot);
        let id = shared.next_id();

        callback(decode(shared.entries.get(&key).map(String::as_str)));
        shared.watchers.push(Watcher { id, key, callback });

        let store = self.store.clone();
        Ok(Subscription::new(move || store.unsubscribe(id)))
    }

    async fn on_disconnect_remove(&self, room: &RoomKey, slot: Slot) -> Result<()> {
        let mut shared = self.store.online()?;
        let key = entry_key(room, slot);
        let hooks = shared.disconnect_hooks.entry(self.id).or_default();
        if !hooks.contains(&key) {
            hooks.push(key);
        }
        Ok(())
    }
}
