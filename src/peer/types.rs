use crate::error::{CallError, Result};
use crate::utils::fingerprint;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::track::track_remote::TrackRemote;

/// Тип описания сессии
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Запись в слоте комнаты: полностью собранное (ICE complete) описание одного пира.
///
/// В хранилище лежит как `{"type":"offer","sdp":"..."}`, в той же форме,
/// что отдаёт `RTCSessionDescription.toJSON()` в браузере.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionRecord {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }

    pub fn fingerprint(&self) -> String {
        let kind = match self.kind {
            SdpKind::Offer => "offer",
            SdpKind::Answer => "answer",
        };
        fingerprint(&[kind, &self.sdp])
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| CallError::Description(e.to_string()))
    }

    /// Разбор записи из слота. Всё нечитаемое считается отвергнутым
    /// удалённым описанием
    pub fn from_json(raw: &str) -> Result<Self> {
        let record: SessionRecord = serde_json::from_str(raw)
            .map_err(|e| CallError::RemoteDescriptionRejected(format!("malformed record: {e}")))?;
        if record.sdp.trim().is_empty() {
            return Err(CallError::RemoteDescriptionRejected("empty sdp".into()));
        }
        Ok(record)
    }

    pub fn from_rtc(desc: &RTCSessionDescription) -> Result<Self> {
        let kind = match desc.sdp_type {
            RTCSdpType::Offer => SdpKind::Offer,
            RTCSdpType::Answer => SdpKind::Answer,
            other => {
                return Err(CallError::Description(format!(
                    "unsupported description type {other:?}"
                )))
            }
        };
        Ok(Self {
            kind,
            sdp: desc.sdp.clone(),
        })
    }

    pub fn into_rtc(self) -> Result<RTCSessionDescription> {
        let parsed = match self.kind {
            SdpKind::Offer => RTCSessionDescription::offer(self.sdp),
            SdpKind::Answer => RTCSessionDescription::answer(self.sdp),
        };
        parsed.map_err(|e| CallError::RemoteDescriptionRejected(e.to_string()))
    }
}

/// Конфигурация ICE сервера
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub id: String,
    pub r#type: String, // 'stun' or 'turn'
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

/// Входящий трек удалённого пира, отдаётся наверх как `onRemoteStream`.
#[derive(Clone)]
pub struct RemoteMedia {
    pub stream_id: String,
    pub track_id: String,
    pub kind: MediaKind,
    /// Есть только у настоящих webrtc линков
    pub track: Option<Arc<TrackRemote>>,
}

impl fmt::Debug for RemoteMedia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteMedia")
            .field("stream_id", &self.stream_id)
            .field("track_id", &self.track_id)
            .field("kind", &self.kind)
            .field("attached", &self.track.is_some())
            .finish()
    }
}
