use crate::peer::types::{SdpKind, SessionRecord};
use std::fmt;

/// Роль пира в текущем раунде согласования
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Initiator => f.write_str("initiator"),
            Role::Responder => f.write_str("responder"),
        }
    }
}

/// Результат одного чтения слота
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotRead {
    Absent,
    Present(SessionRecord),
    Corrupt(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scenario {
    /// Оба слота пусты: ведём
    FreshRoom,
    /// Offer есть, answer ещё нет: отвечаем
    AwaitingResponder(SessionRecord),
    /// Остатки брошенного раунда: чистим оба слота и ведём
    Stale(&'static str),
}

/// `Scenario` без содержимого, для событий и логов
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioKind {
    FreshRoom,
    AwaitingResponder,
    Stale,
}

impl Scenario {
    pub fn kind(&self) -> ScenarioKind {
        match self {
            Scenario::FreshRoom => ScenarioKind::FreshRoom,
            Scenario::AwaitingResponder(_) => ScenarioKind::AwaitingResponder,
            Scenario::Stale(_) => ScenarioKind::Stale,
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Scenario::AwaitingResponder(_) => Role::Responder,
            Scenario::FreshRoom | Scenario::Stale(_) => Role::Initiator,
        }
    }
}

/// Классификация комнаты по одному чтению обоих слотов.
///
/// Отвечаем только когда есть `offer` и нет `answer`. Любое другое
/// непустое сочетание считается устаревшим: одинокий `answer`, нечитаемое
/// значение или запись не того типа.
pub fn classify(offer: SlotRead, answer: SlotRead) -> Scenario {
    match (offer, answer) {
        (SlotRead::Absent, SlotRead::Absent) => Scenario::FreshRoom,
        (SlotRead::Present(record), SlotRead::Absent) if record.kind == SdpKind::Offer => {
            Scenario::AwaitingResponder(record)
        }
        (SlotRead::Present(_), SlotRead::Absent) => Scenario::Stale("offer slot holds an answer"),
        (SlotRead::Present(_), SlotRead::Present(_)) => Scenario::Stale("offer and answer present"),
        (SlotRead::Absent, SlotRead::Present(_)) => Scenario::Stale("answer without offer"),
        (SlotRead::Corrupt(_), _) | (_, SlotRead::Corrupt(_)) => {
            Scenario::Stale("undecodable slot value")
        }
    }
}
