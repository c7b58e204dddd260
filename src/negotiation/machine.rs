use crate::config::NegotiationConfig;
use crate::error::{CallError, Result};
use crate::events::EventEmitter;
use crate::negotiation::classify::{classify, Role, Scenario, ScenarioKind, SlotRead};
use crate::peer::exchanger::SdpExchanger;
use crate::peer::link::{LinkEvent, PeerLink};
use crate::peer::state::ConnectionState;
use crate::peer::types::{RemoteMedia, SdpKind, SessionRecord};
use crate::store::{RendezvousStore, RoomKey, Slot, SlotCallback, Subscription};
use crate::utils::random_id;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace, warn};

/// Фаза сессии согласования
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Classifying,
    /// Offer опубликован, ждём слот answer
    AwaitingAnswer,
    /// Описаниями обменялись, ждём соединения
    AwaitingConnection,
    /// Соединены, слоты очищены, следим за `offer` ради renegotiation
    Listening,
    Failed,
    Disposed,
}

/// Всё, на что реагирует сессия. Обрабатывается строго по одному
#[derive(Debug)]
pub enum NegotiationEvent {
    OfferObserved { listener: u64, record: SessionRecord },
    AnswerObserved { listener: u64, record: SessionRecord },
    GatheringComplete,
    ConnectionStateChanged(ConnectionState),
    RemoteTrack(RemoteMedia),
    StoreOpFailed { listener: u64, error: CallError },
    TimerElapsed,
}

struct ArmedListener {
    id: u64,
    // отписка на drop
    _sub: Subscription,
}

/// Слот, который мы записали и ещё не видели очищенным
struct OwnedSlot {
    slot: Slot,
    fingerprint: String,
}

async fn read_slot<S: RendezvousStore>(store: &S, room: &RoomKey, slot: Slot) -> Result<SlotRead> {
    match store.read_once(room, slot).await {
        Ok(None) => Ok(SlotRead::Absent),
        Ok(Some(record)) => Ok(SlotRead::Present(record)),
        Err(CallError::RemoteDescriptionRejected(reason)) => Ok(SlotRead::Corrupt(reason)),
        Err(other) => Err(other),
    }
}

/// Одна попытка звонка в одной комнате.
///
/// Сессия владеет линком и всеми своими подписками на хранилище. Уведомления
/// хранилища и колбэки линка превращаются в [`NegotiationEvent`] в одной
/// очереди, [`run`](Self::run) разбирает их последовательно, и переходы
/// никогда не перемешиваются.
pub struct NegotiationSession<S, L> {
    id: String,
    room: RoomKey,
    store: Arc<S>,
    exchanger: SdpExchanger<L>,
    emitter: EventEmitter,
    connect_timeout: Duration,
    grace_period: Duration,

    events_tx: mpsc::UnboundedSender<NegotiationEvent>,
    events_rx: mpsc::UnboundedReceiver<NegotiationEvent>,

    phase: Phase,
    role: Option<Role>,
    answer_listener: Option<ArmedListener>,
    offer_listener: Option<ArmedListener>,
    next_listener: u64,

    owned: Option<OwnedSlot>,
    last_offer: Option<String>,
    last_answered_offer: Option<String>,

    ever_connected: bool,
    recovery_attempted: bool,
    connect_deadline: Option<Instant>,
    grace_deadline: Option<Instant>,
}

impl<S: RendezvousStore, L: PeerLink> NegotiationSession<S, L> {
    pub fn new(
        room: RoomKey,
        store: Arc<S>,
        exchanger: SdpExchanger<L>,
        config: &NegotiationConfig,
        emitter: EventEmitter,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let link_tx = events_tx.clone();
        exchanger.link().on_event(Arc::new(move |event| {
            let event = match event {
                LinkEvent::GatheringComplete => NegotiationEvent::GatheringComplete,
                LinkEvent::ConnectionStateChanged(state) => {
                    NegotiationEvent::ConnectionStateChanged(state)
                }
                LinkEvent::RemoteTrack(media) => NegotiationEvent::RemoteTrack(media),
            };
            let _ = link_tx.send(event);
        }));

        Self {
            id: random_id(),
            room,
            store,
            exchanger,
            emitter,
            connect_timeout: config.connect_timeout(),
            grace_period: config.grace_period(),
            events_tx,
            events_rx,
            phase: Phase::Idle,
            role: None,
            answer_listener: None,
            offer_listener: None,
            next_listener: 0,
            owned: None,
            last_offer: None,
            last_answered_offer: None,
            ever_connected: false,
            recovery_attempted: false,
            connect_deadline: None,
            grace_deadline: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn room(&self) -> &RoomKey {
        &self.room
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    /// Классифицирует комнату и проводит первый раунд до момента, когда
    /// надо ждать второго пира
    pub async fn start(&mut self) -> Result<Role> {
        if self.phase != Phase::Idle {
            return Err(CallError::CallInProgress);
        }
        self.begin_round(false).await
    }

    /// Разбирает события до `shutdown` (или пока его sender не пропал),
    /// потом закрывает сессию
    pub async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                alive = self.step() => {
                    if !alive {
                        break;
                    }
                }
            }
        }
        self.dispose().await;
    }

    /// Одно событие. `false`, когда очередь закрыта
    pub async fn step(&mut self) -> bool {
        let Some(event) = self.next_event().await else {
            return false;
        };
        if let Err(error) = self.handle(event).await {
            self.fail(error);
        }
        true
    }

    /// Снимает подписки, удаляет из хранилища то, что ещё наше, и закрывает
    /// линк. Повторный вызов ничего не делает.
    pub async fn dispose(&mut self) {
        if self.phase == Phase::Disposed {
            return;
        }
        // сначала подписки, чтобы ничего из очереди не дошло до закрытого линка
        self.release_listeners();
        self.clear_deadlines();
        self.phase = Phase::Disposed;

        if let Some(owned) = self.owned.take() {
            match self.store.read_once(&self.room, owned.slot).await {
                Ok(Some(current)) if current.fingerprint() == owned.fingerprint => {
                    match self.store.delete(&self.room, owned.slot).await {
                        Ok(()) => debug!(slot = %owned.slot, "owned slot removed"),
                        Err(e) => {
                            warn!(slot = %owned.slot, error = %e, "failed to remove owned slot")
                        }
                    }
                }
                Ok(_) => debug!(slot = %owned.slot, "slot no longer ours, leaving it"),
                Err(e) => warn!(slot = %owned.slot, error = %e, "failed to read owned slot"),
            }
        }

        self.exchanger.close().await;
        info!("negotiation session disposed");
    }

    // ========== ROUNDS ==========

    async fn begin_round(&mut self, ice_restart: bool) -> Result<Role> {
        self.release_listeners();
        self.clear_deadlines();
        self.phase = Phase::Classifying;

        let offer = read_slot(self.store.as_ref(), &self.room, Slot::Offer).await?;
        let answer = read_slot(self.store.as_ref(), &self.room, Slot::Answer).await?;
        let mut scenario = classify(offer, answer);

        if let Scenario::AwaitingResponder(record) = &scenario {
            let fp = record.fingerprint();
            if self.last_offer.as_deref() == Some(fp.as_str()) {
                scenario = Scenario::Stale("own offer from an earlier round");
            } else if self.last_answered_offer.as_deref() == Some(fp.as_str()) {
                scenario = Scenario::Stale("offer already answered");
            }
        }

        let role = scenario.role();
        info!(scenario = ?scenario.kind(), %role, ice_restart, "room classified");
        self.emitter.role_assigned(role, scenario.kind());

        match scenario {
            Scenario::FreshRoom => self.lead(ice_restart).await?,
            Scenario::Stale(reason) => {
                warn!(reason, "stale room state, clearing both slots");
                self.clear_slots().await?;
                self.lead(ice_restart).await?;
            }
            Scenario::AwaitingResponder(offer) => self.respond(offer).await?,
        }
        Ok(role)
    }

    async fn lead(&mut self, ice_restart: bool) -> Result<()> {
        self.role = Some(Role::Initiator);
        let offer = self.exchanger.create_complete_offer(ice_restart).await?;
        self.last_offer = Some(offer.fingerprint());
        self.publish(Slot::Offer, &offer).await?;

        self.phase = Phase::AwaitingAnswer;
        self.answer_listener = Some(self.arm(Slot::Answer).await?);
        // чужой offer здесь значит, что второй пир тоже повёл
        self.offer_listener = Some(self.arm(Slot::Offer).await?);
        info!("offer published, waiting for answer");
        Ok(())
    }

    async fn respond(&mut self, offer: SessionRecord) -> Result<()> {
        self.role = Some(Role::Responder);
        self.last_answered_offer = Some(offer.fingerprint());
        self.grace_deadline = None;

        let answer = self.exchanger.create_complete_answer(&offer).await?;
        self.publish(Slot::Answer, &answer).await?;

        let live = self.exchanger.link().connection_state() == ConnectionState::Connected;
        if self.ever_connected && live {
            // линк не падал: слоты очистит инициатор, когда переподключится
            self.phase = Phase::Listening;
            self.offer_listener = Some(self.arm(Slot::Offer).await?);
            info!("answered renegotiation on a live link");
        } else {
            self.phase = Phase::AwaitingConnection;
            self.connect_deadline = Some(Instant::now() + self.connect_timeout);
            info!("answer published, waiting for connection");
        }
        Ok(())
    }

    async fn post_connect(&mut self) -> Result<()> {
        self.connect_deadline = None;
        self.clear_slots().await?;
        self.owned = None;
        self.phase = Phase::Listening;
        self.offer_listener = Some(self.arm(Slot::Offer).await?);
        info!(role = ?self.role, "connected, slots cleared, listening for renegotiation");
        Ok(())
    }

    async fn connection_lost(&mut self, reason: &str) -> Result<()> {
        self.clear_deadlines();
        if !self.ever_connected {
            return Err(CallError::ConnectionFailed(reason.to_owned()));
        }
        if self.recovery_attempted {
            return Err(CallError::ConnectionFailed(format!(
                "{reason}, recovery already attempted"
            )));
        }
        self.recovery_attempted = true;
        warn!(reason, "connection lost, renegotiating");
        self.begin_round(true).await.map(|_| ())
    }

    fn fail(&mut self, error: CallError) {
        self.release_listeners();
        self.clear_deadlines();
        self.phase = Phase::Failed;
        self.emitter.negotiation_failed(error);
    }

    // ========== EVENTS ==========

    async fn next_event(&mut self) -> Option<NegotiationEvent> {
        let deadline = match (self.connect_deadline, self.grace_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        match deadline {
            Some(at) => tokio::select! {
                event = self.events_rx.recv() => event,
                _ = sleep_until(at) => Some(NegotiationEvent::TimerElapsed),
            },
            None => self.events_rx.recv().await,
        }
    }

    async fn handle(&mut self, event: NegotiationEvent) -> Result<()> {
        if matches!(self.phase, Phase::Failed | Phase::Disposed) {
            trace!(?event, phase = ?self.phase, "session inactive, event dropped");
            return Ok(());
        }
        match event {
            NegotiationEvent::OfferObserved { listener, record } => {
                if !Self::is_current(&self.offer_listener, listener) {
                    trace!(listener, "offer from a released listener");
                    return Ok(());
                }
                self.on_offer(record).await
            }
            NegotiationEvent::AnswerObserved { listener, record } => {
                if !Self::is_current(&self.answer_listener, listener) {
                    trace!(listener, "answer from a released listener");
                    return Ok(());
                }
                self.on_answer(record).await
            }
            NegotiationEvent::GatheringComplete => {
                debug!("ICE gathering complete");
                Ok(())
            }
            NegotiationEvent::ConnectionStateChanged(state) => {
                self.on_connection_state(state).await
            }
            NegotiationEvent::RemoteTrack(media) => {
                self.emitter.remote_stream(media);
                Ok(())
            }
            NegotiationEvent::StoreOpFailed { listener, error } => {
                let current = Self::is_current(&self.offer_listener, listener)
                    || Self::is_current(&self.answer_listener, listener);
                if !current {
                    return Ok(());
                }
                if self.phase == Phase::Listening {
                    warn!(error = %error, "unreadable renegotiation offer ignored");
                    return Ok(());
                }
                Err(error)
            }
            NegotiationEvent::TimerElapsed => self.on_timer().await,
        }
    }

    async fn on_offer(&mut self, record: SessionRecord) -> Result<()> {
        let glare = match self.phase {
            Phase::Listening => false,
            Phase::AwaitingAnswer => true,
            _ => return Ok(()),
        };
        if record.kind != SdpKind::Offer {
            warn!("offer slot holds an answer, ignoring");
            return Ok(());
        }
        let fp = record.fingerprint();
        if self.last_offer.as_deref() == Some(fp.as_str())
            || self.last_answered_offer.as_deref() == Some(fp.as_str())
        {
            trace!(fingerprint = %fp, "known offer");
            return Ok(());
        }

        self.release_listeners();
        if glare {
            info!(fingerprint = %fp, "foreign offer replaced ours, yielding");
            // нашего offer в слоте уже нет
            self.owned = None;
        } else {
            info!(fingerprint = %fp, "renegotiation offer observed");
        }
        self.emitter.role_assigned(Role::Responder, ScenarioKind::AwaitingResponder);
        self.respond(record).await
    }

    async fn on_answer(&mut self, record: SessionRecord) -> Result<()> {
        if self.phase != Phase::AwaitingAnswer {
            return Ok(());
        }
        if record.kind != SdpKind::Answer {
            return Err(CallError::RemoteDescriptionRejected(
                "answer slot holds an offer".into(),
            ));
        }
        self.release_listeners();
        self.exchanger.apply_remote(&record).await?;

        let live = self.exchanger.link().connection_state() == ConnectionState::Connected;
        if self.ever_connected && live {
            // линк поднялся сам, пока ждали answer: нового перехода в Connected не будет
            info!(fingerprint = %record.fingerprint(), "answer applied on a live link");
            return self.post_connect().await;
        }

        self.phase = Phase::AwaitingConnection;
        self.connect_deadline = Some(Instant::now() + self.connect_timeout);
        info!(fingerprint = %record.fingerprint(), "answer applied, waiting for connection");
        Ok(())
    }

    async fn on_connection_state(&mut self, state: ConnectionState) -> Result<()> {
        self.emitter.connection_state(state);
        match state {
            ConnectionState::Connected => {
                self.grace_deadline = None;
                self.ever_connected = true;
                self.recovery_attempted = false;
                if self.phase == Phase::AwaitingConnection {
                    self.post_connect().await?;
                }
                Ok(())
            }
            ConnectionState::Disconnected => {
                if self.phase == Phase::Listening && self.grace_deadline.is_none() {
                    info!(grace = ?self.grace_period, "link disconnected, grace period started");
                    self.grace_deadline = Some(Instant::now() + self.grace_period);
                }
                Ok(())
            }
            ConnectionState::Failed => self.connection_lost("peer connection failed").await,
            _ => Ok(()),
        }
    }

    async fn on_timer(&mut self) -> Result<()> {
        let now = Instant::now();
        if self.connect_deadline.is_some_and(|at| at <= now) {
            self.connect_deadline = None;
            if self.phase == Phase::AwaitingConnection {
                return Err(CallError::ConnectionTimeout(self.connect_timeout));
            }
        }
        if self.grace_deadline.is_some_and(|at| at <= now) {
            self.grace_deadline = None;
            let state = self.exchanger.link().connection_state();
            if self.phase == Phase::Listening && state != ConnectionState::Connected {
                return self
                    .connection_lost("link did not recover within the grace period")
                    .await;
            }
            debug!("connection recovered during grace period");
        }
        Ok(())
    }

    // ========== STORE ==========

    async fn publish(&mut self, slot: Slot, record: &SessionRecord) -> Result<()> {
        self.store.on_disconnect_remove(&self.room, slot).await?;
        self.owned = Some(OwnedSlot {
            slot,
            fingerprint: record.fingerprint(),
        });
        self.store.write(&self.room, slot, record).await?;
        debug!(%slot, fingerprint = %record.fingerprint(), "description published");
        Ok(())
    }

    async fn clear_slots(&mut self) -> Result<()> {
        self.store.delete(&self.room, Slot::Offer).await?;
        self.store.delete(&self.room, Slot::Answer).await?;
        debug!("offer and answer slots cleared");
        Ok(())
    }

    async fn arm(&mut self, slot: Slot) -> Result<ArmedListener> {
        self.next_listener += 1;
        let id = self.next_listener;
        let tx = self.events_tx.clone();
        let callback: SlotCallback = Arc::new(move |change| {
            let event = match change {
                Ok(None) => return,
                Ok(Some(record)) => match slot {
                    Slot::Offer => NegotiationEvent::OfferObserved { listener: id, record },
                    Slot::Answer => NegotiationEvent::AnswerObserved { listener: id, record },
                },
                Err(error) => NegotiationEvent::StoreOpFailed { listener: id, error },
            };
            let _ = tx.send(event);
        });
        let sub = self.store.subscribe(&self.room, slot, callback).await?;
        trace!(%slot, listener = id, "listener armed");
        Ok(ArmedListener { id, _sub: sub })
    }

    fn release_listeners(&mut self) {
        self.answer_listener = None;
        self.offer_listener = None;
    }

    fn clear_deadlines(&mut self) {
        self.connect_deadline = None;
        self.grace_deadline = None;
    }

    fn is_current(listener: &Option<ArmedListener>, id: u64) -> bool {
        listener.as_ref().is_some_and(|l| l.id == id)
    }
}
