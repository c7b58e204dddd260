use crate::error::{CallError, Result};
use crate::peer::link::GatheringPromise;
use crate::peer::types::ServerConfig;
use crate::utils::add_ice_url_scheme;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};
use webrtc::ice_transport::ice_server::RTCIceServer;

/// Ждём завершения ICE gathering, но не дольше `limit`
pub async fn wait_for_gathering(promise: &mut GatheringPromise, limit: Duration) -> Result<()> {
    match timeout(limit, promise.recv()).await {
        // и Some(()), и закрытый канал значат, что gathering закончился
        Ok(_) => Ok(()),
        Err(_) => Err(CallError::GatheringTimeout(limit)),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CandidateSummary {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
}

impl CandidateSummary {
    pub fn total(&self) -> usize {
        self.host + self.srflx + self.relay
    }
}

/// Считаем кандидатов в готовом SDP по типам
pub fn analyze_candidates(sdp: &str) -> CandidateSummary {
    let mut summary = CandidateSummary::default();

    for line in sdp.lines().filter(|l| l.starts_with("a=candidate:")) {
        if line.contains("typ host") {
            summary.host += 1;
        } else if line.contains("typ srflx") {
            summary.srflx += 1;
        } else if line.contains("typ relay") {
            summary.relay += 1;
        }
    }

    debug!(
        host = summary.host,
        srflx = summary.srflx,
        relay = summary.relay,
        "candidate analysis"
    );
    if summary.total() == 0 {
        warn!("complete description carries no ICE candidates");
    }
    summary
}

/// ICE серверы из конфигурации в формате webrtc
pub fn rtc_ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    const SDP: &str = "v=0\r\n\
        a=candidate:1 1 udp 2130706431 192.168.1.4 50000 typ host\r\n\
        a=candidate:2 1 udp 1694498815 203.0.113.7 50000 typ srflx raddr 192.168.1.4 rport 50000\r\n\
        a=candidate:3 1 udp 16777215 198.51.100.2 3478 typ relay raddr 203.0.113.7 rport 50000\r\n\
        a=candidate:4 1 udp 2130706431 10.0.0.2 50001 typ host\r\n";

    #[test]
    fn counts_candidates_by_type() {
        let summary = analyze_candidates(SDP);
        assert_eq!(
            summary,
            CandidateSummary {
                host: 2,
                srflx: 1,
                relay: 1
            }
        );
        assert_eq!(analyze_candidates("v=0\r\n").total(), 0);
    }

    #[test]
    fn converts_server_config() {
        let servers = vec![ServerConfig {
            id: "t".into(),
            r#type: "turn".into(),
            url: "relay.example.org:3478".into(),
            username: Some("u".into()),
            credential: Some("p".into()),
        }];
        let rtc = rtc_ice_servers(&servers);
        assert_eq!(rtc[0].urls, vec!["turn:relay.example.org:3478".to_string()]);
        assert_eq!(rtc[0].username, "u");
        assert_eq!(rtc[0].credential, "p");
    }

    #[tokio::test]
    async fn gathering_wait_times_out() {
        let (_tx, mut rx) = mpsc::channel::<()>(1);
        let err = wait_for_gathering(&mut rx, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert_eq!(err, CallError::GatheringTimeout(Duration::from_millis(20)));
    }

    #[tokio::test]
    async fn closed_promise_means_complete() {
        let (tx, mut rx) = mpsc::channel::<()>(1);
        drop(tx);
        wait_for_gathering(&mut rx, Duration::from_millis(20))
            .await
            .unwrap();
    }
}
