use std::time::Duration;

/// Ошибки установки и поддержания звонка
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    #[error("media acquisition failed: {0}")]
    MediaAcquisitionFailed(String),

    #[error("ICE gathering did not complete within {0:?}")]
    GatheringTimeout(Duration),

    #[error("remote description rejected: {0}")]
    RemoteDescriptionRejected(String),

    #[error("connection not established within {0:?}")]
    ConnectionTimeout(Duration),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("rendezvous store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("session description error: {0}")]
    Description(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("a call is already in progress")]
    CallInProgress,

    #[error("no active call")]
    NoActiveCall,
}

impl CallError {
    /// Есть ли смысл повторить `join` с нуля
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            CallError::InvalidConfig(_) | CallError::CallInProgress | CallError::NoActiveCall
        )
    }
}

pub type Result<T, E = CallError> = std::result::Result<T, E>;
