#![allow(dead_code)]

//! Общие фикстуры: фейковая сеть пиров в памяти и обёртка над хранилищем,
//! которая запоминает каждую запись.

use async_trait::async_trait;
use roomcall::error::{CallError, Result};
use roomcall::events::CallEvent;
use roomcall::media::{LocalMedia, LocalTrack, SampleMediaSource};
use roomcall::peer::link::{
    GatheringPromise, LinkEvent, LinkEventHandler, PeerLink, PeerLinkFactory,
};
use roomcall::peer::state::{ConnectionState, GatheringState};
use roomcall::peer::types::{MediaKind, RemoteMedia, SdpKind, SessionRecord};
use roomcall::store::{
    MemoryClient, MemoryStore, RendezvousStore, RoomKey, Slot, SlotCallback, Subscription,
};
use roomcall::{NegotiationConfig, SessionController};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};

const WAIT: Duration = Duration::from_secs(5);

pub fn test_config() -> NegotiationConfig {
    NegotiationConfig {
        ice_servers: vec![],
        gathering_timeout_ms: 500,
        connect_timeout_ms: 1_000,
        grace_period_ms: 200,
    }
}

// ========== FAKE NETWORK ==========

#[derive(Debug, Clone, Copy)]
pub enum GatherMode {
    Instant,
    Delayed(Duration),
    Never,
}

struct Net {
    auto_connect: bool,
    links: Vec<FakeLink>,
    gather: HashMap<String, GatherMode>,
    sdp_counters: HashMap<String, usize>,
}

/// Линки всех фабрик одной сети видят друг друга. Два линка соединяются,
/// когда оба стабильны и их описания зеркальны.
#[derive(Clone)]
pub struct FakeNetwork {
    net: Arc<Mutex<Net>>,
}

impl FakeNetwork {
    pub fn new() -> Self {
        Self {
            net: Arc::new(Mutex::new(Net {
                auto_connect: true,
                links: Vec::new(),
                gather: HashMap::new(),
                sdp_counters: HashMap::new(),
            })),
        }
    }

    /// Описаниями обмениваются, но до `Connected` линки не доходят
    pub fn without_auto_connect() -> Self {
        let network = Self::new();
        network.net.lock().unwrap().auto_connect = false;
        network
    }

    pub fn set_gather(&self, label: &str, mode: GatherMode) {
        self.net.lock().unwrap().gather.insert(label.to_owned(), mode);
    }

    pub fn factory(&self, label: &str) -> FakeFactory {
        FakeFactory {
            network: self.clone(),
            label: label.to_owned(),
        }
    }

    /// Последний линк с меткой `label`
    pub fn link(&self, label: &str) -> FakeLink {
        self.try_link(label)
            .unwrap_or_else(|| panic!("no link labelled {label}"))
    }

    pub fn try_link(&self, label: &str) -> Option<FakeLink> {
        let net = self.net.lock().unwrap();
        net.links.iter().rev().find(|l| l.label() == label).cloned()
    }

    fn link_by_id(&self, id: usize) -> Option<FakeLink> {
        self.net.lock().unwrap().links.get(id).cloned()
    }

    /// `A`, потом `A#2`, `A#3`, ... по всем линкам с этой меткой
    fn next_sdp(&self, label: &str) -> String {
        let mut net = self.net.lock().unwrap();
        let counter = net.sdp_counters.entry(label.to_owned()).or_insert(0);
        *counter += 1;
        if *counter == 1 {
            label.to_owned()
        } else {
            format!("{label}#{counter}")
        }
    }

    fn gather_mode(&self, label: &str) -> GatherMode {
        let net = self.net.lock().unwrap();
        net.gather.get(label).copied().unwrap_or(GatherMode::Instant)
    }

    fn check_pairs(&self) {
        let links = {
            let net = self.net.lock().unwrap();
            if !net.auto_connect {
                return;
            }
            net.links.clone()
        };
        let mut pairs = Vec::new();
        for (i, a) in links.iter().enumerate() {
            for b in links.iter().skip(i + 1) {
                if a.mirrors(b) {
                    pairs.push((a.clone(), b.clone()));
                }
            }
        }
        for (a, b) in pairs {
            a.connect_to(&b);
            b.connect_to(&a);
        }
    }
}

pub struct FakeFactory {
    network: FakeNetwork,
    label: String,
}

#[async_trait]
impl PeerLinkFactory for FakeFactory {
    type Link = FakeLink;

    async fn connect(&self, media: &LocalMedia) -> Result<FakeLink> {
        let mut net = self.network.net.lock().unwrap();
        let link = FakeLink {
            inner: Arc::new(LinkInner {
                id: net.links.len(),
                label: self.label.clone(),
                network: self.network.clone(),
                state: Mutex::new(LinkState {
                    video_track: media.video.as_ref().map(|t| t.id().to_owned()),
                    ..LinkState::default()
                }),
                handler: Mutex::new(None),
            }),
        };
        net.links.push(link.clone());
        Ok(link)
    }
}

#[derive(Default)]
struct LinkState {
    local: Option<SessionRecord>,
    remote: Option<SessionRecord>,
    stable: bool,
    connection: ConnectionState,
    gathering: GatheringState,
    waiters: Vec<mpsc::Sender<()>>,
    applied_remote: Vec<String>,
    video_track: Option<String>,
    peer: Option<usize>,
    closed: bool,
}

struct LinkInner {
    id: usize,
    label: String,
    network: FakeNetwork,
    state: Mutex<LinkState>,
    handler: Mutex<Option<LinkEventHandler>>,
}

#[derive(Clone)]
pub struct FakeLink {
    inner: Arc<LinkInner>,
}

impl FakeLink {
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Все принятые удалённые sdp по порядку
    pub fn applied_remote(&self) -> Vec<String> {
        self.inner.state.lock().unwrap().applied_remote.clone()
    }

    pub fn video_track(&self) -> Option<String> {
        self.inner.state.lock().unwrap().video_track.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().unwrap().closed
    }

    /// Выставляет состояние соединения, как это сделал бы ICE агент
    pub fn drive(&self, state: ConnectionState) {
        let changed = {
            let mut s = self.inner.state.lock().unwrap();
            let changed = s.connection != state;
            s.connection = state;
            changed
        };
        if changed {
            self.emit(LinkEvent::ConnectionStateChanged(state));
        }
    }

    fn emit(&self, event: LinkEvent) {
        let handler = self.inner.handler.lock().unwrap().clone();
        if let Some(handler) = handler {
            handler(event);
        }
    }

    fn mirrors(&self, other: &FakeLink) -> bool {
        let snapshot = |link: &FakeLink| {
            let s = link.inner.state.lock().unwrap();
            (s.stable && !s.closed, s.local.clone(), s.remote.clone())
        };
        let (a_ok, a_local, a_remote) = snapshot(self);
        let (b_ok, b_local, b_remote) = snapshot(other);
        a_ok && b_ok && a_local.is_some() && a_local == b_remote && a_remote == b_local
    }

    fn connect_to(&self, peer: &FakeLink) {
        let changed = {
            let mut s = self.inner.state.lock().unwrap();
            s.peer = Some(peer.inner.id);
            let changed = s.connection != ConnectionState::Connected;
            s.connection = ConnectionState::Connected;
            changed
        };
        if changed {
            self.emit(LinkEvent::ConnectionStateChanged(ConnectionState::Connected));
            self.emit(LinkEvent::RemoteTrack(RemoteMedia {
                stream_id: peer.label().to_owned(),
                track_id: format!("{}-video", peer.label()),
                kind: MediaKind::Video,
                track: None,
            }));
        }
    }

    fn start_gathering(&self) {
        self.inner.state.lock().unwrap().gathering = GatheringState::Gathering;
        match self.inner.network.gather_mode(self.label()) {
            GatherMode::Instant => self.complete_gathering(),
            GatherMode::Delayed(delay) => {
                let link = self.clone();
                tokio::spawn(async move {
                    sleep(delay).await;
                    link.complete_gathering();
                });
            }
            GatherMode::Never => {}
        }
    }

    fn complete_gathering(&self) {
        {
            let mut s = self.inner.state.lock().unwrap();
            s.gathering = GatheringState::Complete;
            for waiter in s.waiters.drain(..) {
                let _ = waiter.try_send(());
            }
        }
        self.emit(LinkEvent::GatheringComplete);
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(CallError::Description("link closed".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl PeerLink for FakeLink {
    async fn create_offer(&self, _ice_restart: bool) -> Result<SessionRecord> {
        self.ensure_open()?;
        Ok(SessionRecord::offer(self.inner.network.next_sdp(self.label())))
    }

    async fn create_answer(&self) -> Result<SessionRecord> {
        self.ensure_open()?;
        let has_offer = matches!(
            &self.inner.state.lock().unwrap().remote,
            Some(remote) if remote.kind == SdpKind::Offer
        );
        if !has_offer {
            return Err(CallError::Description("no remote offer to answer".into()));
        }
        Ok(SessionRecord::answer(self.inner.network.next_sdp(self.label())))
    }

    async fn set_local_description(&self, desc: SessionRecord) -> Result<()> {
        self.ensure_open()?;
        {
            let mut s = self.inner.state.lock().unwrap();
            s.stable = desc.kind == SdpKind::Answer;
            s.local = Some(desc);
        }
        self.start_gathering();
        self.inner.network.check_pairs();
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionRecord) -> Result<()> {
        self.ensure_open()?;
        if desc.sdp.trim().is_empty() || desc.sdp == "garbage" {
            return Err(CallError::RemoteDescriptionRejected(format!(
                "cannot parse {:?}",
                desc.sdp
            )));
        }
        {
            let mut s = self.inner.state.lock().unwrap();
            s.stable = desc.kind == SdpKind::Answer;
            s.applied_remote.push(desc.sdp.clone());
            s.remote = Some(desc);
        }
        self.inner.network.check_pairs();
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionRecord> {
        self.inner.state.lock().unwrap().local.clone()
    }

    async fn gathering_complete(&self) -> GatheringPromise {
        let (tx, rx) = mpsc::channel(1);
        let mut s = self.inner.state.lock().unwrap();
        if s.gathering != GatheringState::Complete {
            s.waiters.push(tx);
        }
        rx
    }

    fn gathering_state(&self) -> GatheringState {
        self.inner.state.lock().unwrap().gathering
    }

    fn connection_state(&self) -> ConnectionState {
        self.inner.state.lock().unwrap().connection
    }

    fn on_event(&self, handler: LinkEventHandler) {
        *self.inner.handler.lock().unwrap() = Some(handler);
    }

    async fn replace_video_track(&self, track: Option<LocalTrack>) -> Result<()> {
        self.ensure_open()?;
        self.inner.state.lock().unwrap().video_track = track.map(|t| t.id().to_owned());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.inner.handler.lock().unwrap().take();
        let peer = {
            let mut s = self.inner.state.lock().unwrap();
            s.closed = true;
            s.connection = ConnectionState::Closed;
            s.peer.take()
        };
        let Some(peer) = peer.and_then(|id| self.inner.network.link_by_id(id)) else {
            return Ok(());
        };
        let still_ours = {
            let s = peer.inner.state.lock().unwrap();
            s.peer == Some(self.inner.id) && s.connection == ConnectionState::Connected
        };
        if still_ours {
            peer.drive(ConnectionState::Disconnected);
        }
        Ok(())
    }
}

// ========== PROBE STORE ==========

#[derive(Debug, Clone)]
pub struct ProbeWrite {
    pub slot: Slot,
    pub record: SessionRecord,
    pub gathering: GatheringState,
}

/// `MemoryClient`, который запоминает, что записано и в каком состоянии
/// gathering был линк писателя в тот момент.
#[derive(Clone)]
pub struct ProbeStore {
    client: MemoryClient,
    network: FakeNetwork,
    label: String,
    writes: Arc<Mutex<Vec<ProbeWrite>>>,
}

impl ProbeStore {
    pub fn new(client: MemoryClient, network: &FakeNetwork, label: &str) -> Self {
        Self {
            client,
            network: network.clone(),
            label: label.to_owned(),
            writes: Arc::default(),
        }
    }

    pub fn writes(&self) -> Vec<ProbeWrite> {
        self.writes.lock().unwrap().clone()
    }

    pub fn written_sdp(&self, slot: Slot) -> Vec<String> {
        self.writes()
            .into_iter()
            .filter(|w| w.slot == slot)
            .map(|w| w.record.sdp)
            .collect()
    }
}

#[async_trait]
impl RendezvousStore for ProbeStore {
    async fn read_once(&self, room: &RoomKey, slot: Slot) -> Result<Option<SessionRecord>> {
        self.client.read_once(room, slot).await
    }

    async fn write(&self, room: &RoomKey, slot: Slot, record: &SessionRecord) -> Result<()> {
        let gathering = self
            .network
            .try_link(&self.label)
            .map(|link| link.gathering_state())
            .unwrap_or_default();
        self.writes.lock().unwrap().push(ProbeWrite {
            slot,
            record: record.clone(),
            gathering,
        });
        self.client.write(room, slot, record).await
    }

    async fn delete(&self, room: &RoomKey, slot: Slot) -> Result<()> {
        self.client.delete(room, slot).await
    }

    async fn subscribe(
        &self,
        room: &RoomKey,
        slot: Slot,
        callback: SlotCallback,
    ) -> Result<Subscription> {
        self.client.subscribe(room, slot, callback).await
    }

    async fn on_disconnect_remove(&self, room: &RoomKey, slot: Slot) -> Result<()> {
        self.client.on_disconnect_remove(room, slot).await
    }
}

// ========== PEERS ==========

pub type TestController = SessionController<ProbeStore, FakeFactory, SampleMediaSource>;

pub struct Peer {
    pub ctl: TestController,
    pub events: mpsc::UnboundedReceiver<CallEvent>,
    pub probe: ProbeStore,
}

pub fn cameras() -> SampleMediaSource {
    SampleMediaSource::new(vec!["front".into(), "back".into()], true)
}

pub fn peer(store: &MemoryStore, network: &FakeNetwork, label: &str) -> Peer {
    peer_with(store, network, label, test_config(), cameras())
}

pub fn peer_with(
    store: &MemoryStore,
    network: &FakeNetwork,
    label: &str,
    config: NegotiationConfig,
    media: SampleMediaSource,
) -> Peer {
    let probe = ProbeStore::new(store.client(), network, label);
    let (ctl, events) = SessionController::new(
        config,
        Arc::new(probe.clone()),
        network.factory(label),
        media,
    )
    .unwrap();
    Peer { ctl, events, probe }
}

// ========== WAITING ==========

/// Опрашиваем `check`, пока не выполнится. Через несколько секунд паника
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !check() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        sleep(Duration::from_millis(10)).await;
    }
}

/// Пропускаем события до подходящего
pub async fn next_matching(
    events: &mut mpsc::UnboundedReceiver<CallEvent>,
    pred: impl Fn(&CallEvent) -> bool,
) -> CallEvent {
    let found = timeout(WAIT, async {
        loop {
            match events.recv().await {
                Some(event) if pred(&event) => return event,
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }
    })
    .await;
    found.expect("timed out waiting for a matching event")
}

pub fn is_state(state: ConnectionState) -> impl Fn(&CallEvent) -> bool {
    move |event| matches!(event, CallEvent::ConnectionStateChanged(s) if *s == state)
}

pub fn is_failure(event: &CallEvent) -> bool {
    matches!(event, CallEvent::NegotiationFailed { .. })
}

pub fn offer_sdp(store: &MemoryStore, room: &str) -> Option<String> {
    store
        .get_raw(room, Slot::Offer)
        .and_then(|raw| SessionRecord::from_json(&raw).ok())
        .map(|record| record.sdp)
}
