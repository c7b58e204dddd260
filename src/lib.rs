//! Звонки WebRTC на двоих через общее rendezvous хранилище.
//!
//! Пиры с одинаковым ключом комнаты встречаются в key-value хранилище, где у
//! комнаты два слота (`offer` и `answer`). Кто застал комнату пустой, ведёт,
//! второй отвечает. После соединения оба чистят слоты, и комната готова к
//! следующему раунду.

pub mod config;
pub mod error;
pub mod events;
pub mod logger;
pub mod media;
pub mod negotiation;
pub mod peer;
pub mod session;
pub mod store;
pub mod utils;

pub use config::NegotiationConfig;
pub use error::{CallError, Result};
pub use events::{CallEvent, EventEmitter};
pub use logger::init as init_logging;
pub use media::{LocalMedia, LocalTrack, MediaSource, SampleMediaSource};
pub use negotiation::{NegotiationSession, Phase, Role, ScenarioKind};
pub use peer::{
    ConnectionState, PeerLink, PeerLinkFactory, RemoteMedia, RtcLinkFactory, SdpExchanger,
    SessionRecord,
};
pub use session::SessionController;
pub use store::{MemoryClient, MemoryStore, RendezvousStore, RoomKey, Slot, Subscription};
