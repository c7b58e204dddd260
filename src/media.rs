//! Локальные медиа треки для линка.
//!
//! Захват кадров с камеры и микрофона делает приложение. Здесь только треки,
//! которые отправляет peer connection, и выдача нового видео трека при
//! переключении камеры.

use crate::error::{CallError, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

pub type LocalTrack = Arc<dyn TrackLocal + Send + Sync>;

/// Треки одного звонка
#[derive(Clone)]
pub struct LocalMedia {
    pub stream_id: String,
    pub audio: Option<LocalTrack>,
    pub video: Option<LocalTrack>,
}

#[async_trait]
pub trait MediaSource: Send + Sync + 'static {
    async fn acquire(&self) -> Result<LocalMedia>;

    /// Следующая камера по кругу, для переключения
    async fn next_camera(&self) -> Result<LocalTrack>;

    async fn release(&self);
}

/// Источник на `TrackLocalStaticSample`. Приложение само пишет в треки
/// закодированные сэмплы.
pub struct SampleMediaSource {
    stream_id: String,
    cameras: Vec<String>,
    with_audio: bool,
    current: Mutex<usize>,
}

impl SampleMediaSource {
    pub fn new(cameras: Vec<String>, with_audio: bool) -> Self {
        Self {
            stream_id: format!("roomcall-{}", crate::utils::random_id()),
            cameras,
            with_audio,
            current: Mutex::new(0),
        }
    }

    fn video_track(&self, camera: &str) -> LocalTrack {
        Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                ..Default::default()
            },
            format!("video-{camera}"),
            self.stream_id.clone(),
        ))
    }

    fn audio_track(&self) -> LocalTrack {
        Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                ..Default::default()
            },
            "audio".to_owned(),
            self.stream_id.clone(),
        ))
    }

    fn lock_current(&self) -> Result<std::sync::MutexGuard<'_, usize>> {
        self.current
            .lock()
            .map_err(|_| CallError::MediaAcquisitionFailed("camera state poisoned".into()))
    }
}

#[async_trait]
impl MediaSource for SampleMediaSource {
    async fn acquire(&self) -> Result<LocalMedia> {
        if self.cameras.is_empty() && !self.with_audio {
            return Err(CallError::MediaAcquisitionFailed(
                "no camera or microphone available".into(),
            ));
        }
        let index = *self.lock_current()?;
        let video = self
            .cameras
            .get(index)
            .map(|camera| self.video_track(camera));
        let audio = self.with_audio.then(|| self.audio_track());
        info!(
            stream = %self.stream_id,
            audio = audio.is_some(),
            video = video.is_some(),
            "local media acquired"
        );
        Ok(LocalMedia {
            stream_id: self.stream_id.clone(),
            audio,
            video,
        })
    }

    async fn next_camera(&self) -> Result<LocalTrack> {
        if self.cameras.is_empty() {
            return Err(CallError::MediaAcquisitionFailed("no camera to switch to".into()));
        }
        let mut current = self.lock_current()?;
        *current = (*current + 1) % self.cameras.len();
        let camera = &self.cameras[*current];
        debug!(%camera, "switching camera");
        Ok(self.video_track(camera))
    }

    async fn release(&self) {
        if let Ok(mut current) = self.current.lock() {
            *current = 0;
        }
        debug!(stream = %self.stream_id, "local media released");
    }
}
