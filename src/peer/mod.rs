pub mod connection;
pub mod exchanger;
pub mod ice;
pub mod link;
pub mod state;
pub mod types;

pub use connection::{RtcLinkFactory, RtcPeerLink};
pub use exchanger::SdpExchanger;
pub use link::{GatheringPromise, LinkEvent, LinkEventHandler, PeerLink, PeerLinkFactory};
pub use state::{ConnectionState, GatheringState};
pub use types::{MediaKind, RemoteMedia, SdpKind, ServerConfig, SessionRecord};
