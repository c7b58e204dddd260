//! Машина состояний согласования: кто ведёт, кто отвечает и что делать,
//! когда линк упал.

pub mod classify;
pub mod machine;

pub use classify::{classify, Role, Scenario, ScenarioKind, SlotRead};
pub use machine::{NegotiationEvent, NegotiationSession, Phase};
