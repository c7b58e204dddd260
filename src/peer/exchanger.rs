//! Полные (с завершённым ICE gathering) локальные описания.
//!
//! В слоте комнаты лежит один снимок и никаких trickle кандидатов, поэтому
//! до конца gathering отсюда ничего не уходит.

use crate::error::{CallError, Result};
use crate::media::LocalTrack;
use crate::peer::ice::{analyze_candidates, wait_for_gathering};
use crate::peer::link::{GatheringPromise, PeerLink};
use crate::peer::state::GatheringState;
use crate::peer::types::{SdpKind, SessionRecord};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

pub struct SdpExchanger<L> {
    link: Arc<L>,
    gathering_timeout: Duration,
}

impl<L> Clone for SdpExchanger<L> {
    fn clone(&self) -> Self {
        Self {
            link: Arc::clone(&self.link),
            gathering_timeout: self.gathering_timeout,
        }
    }
}

impl<L: PeerLink> SdpExchanger<L> {
    pub fn new(link: Arc<L>, gathering_timeout: Duration) -> Self {
        Self {
            link,
            gathering_timeout,
        }
    }

    pub fn link(&self) -> &Arc<L> {
        &self.link
    }

    pub async fn create_complete_offer(&self, ice_restart: bool) -> Result<SessionRecord> {
        let deadline = Instant::now() + self.gathering_timeout;
        let promise = self.link.gathering_complete().await;

        debug!(ice_restart, "creating offer");
        let offer = self.link.create_offer(ice_restart).await?;
        self.link.set_local_description(offer).await?;

        self.finish_local(promise, deadline, SdpKind::Offer).await
    }

    pub async fn create_complete_answer(&self, remote: &SessionRecord) -> Result<SessionRecord> {
        if remote.kind != SdpKind::Offer {
            return Err(CallError::RemoteDescriptionRejected(
                "expected an offer to answer".into(),
            ));
        }
        self.apply_remote(remote).await?;

        let deadline = Instant::now() + self.gathering_timeout;
        let promise = self.link.gathering_complete().await;

        debug!("creating answer");
        let answer = self.link.create_answer().await?;
        self.link.set_local_description(answer).await?;

        self.finish_local(promise, deadline, SdpKind::Answer).await
    }

    pub async fn apply_remote(&self, remote: &SessionRecord) -> Result<()> {
        debug!(
            kind = ?remote.kind,
            fingerprint = %remote.fingerprint(),
            "applying remote description"
        );
        self.link.set_remote_description(remote.clone()).await
    }

    pub async fn replace_outbound_video(&self, track: Option<LocalTrack>) -> Result<()> {
        self.link.replace_video_track(track).await
    }

    pub async fn close(&self) {
        if let Err(e) = self.link.close().await {
            debug!(error = %e, "closing peer link");
        }
    }

    async fn finish_local(
        &self,
        mut promise: GatheringPromise,
        deadline: Instant,
        expected: SdpKind,
    ) -> Result<SessionRecord> {
        // промис, взятый пока прошлый раунд ещё числился complete, может
        // сработать раньше времени: ждём, пока состояние реально станет Complete
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            wait_for_gathering(&mut promise, remaining)
                .await
                .map_err(|_| CallError::GatheringTimeout(self.gathering_timeout))?;
            if self.link.gathering_state() == GatheringState::Complete {
                break;
            }
            if Instant::now() >= deadline {
                return Err(CallError::GatheringTimeout(self.gathering_timeout));
            }
            tokio::task::yield_now().await;
            promise = self.link.gathering_complete().await;
        }

        let local = self.link.local_description().await.ok_or_else(|| {
            CallError::Description("no local description after gathering".into())
        })?;
        if local.kind != expected {
            return Err(CallError::Description(format!(
                "local description is {:?}, expected {:?}",
                local.kind, expected
            )));
        }

        let summary = analyze_candidates(&local.sdp);
        debug!(
            kind = ?local.kind,
            candidates = summary.total(),
            fingerprint = %local.fingerprint(),
            "local description complete"
        );
        Ok(local)
    }
}
