// Конфигурация звонка
// Логирование можно отключить только в режиме разработки

use crate::error::{CallError, Result};
use crate::peer::types::ServerConfig;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true; // В режиме отладки логирование включено

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false; // В продакшене логирование отключено

/// Фильтр по умолчанию, если RUST_LOG не задан
pub const DEFAULT_LOG_FILTER: &str = "roomcall=info";

/// Публичные STUN серверы
pub static DEFAULT_ICE_SERVERS: Lazy<Vec<ServerConfig>> = Lazy::new(|| {
    vec![
        ServerConfig {
            id: "google-stun-0".into(),
            r#type: "stun".into(),
            url: "stun.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        ServerConfig {
            id: "google-stun-1".into(),
            r#type: "stun".into(),
            url: "stun1.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
    ]
});

/// Настройки согласования одного звонка.
///
/// У каждого поля есть значение по умолчанию, хватит и частичного JSON:
///
/// ```json
/// { "ice_servers": [], "gathering_timeout_ms": 5000 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationConfig {
    pub ice_servers: Vec<ServerConfig>,
    pub gathering_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub grace_period_ms: u64,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            ice_servers: DEFAULT_ICE_SERVERS.clone(),
            gathering_timeout_ms: 10_000,
            connect_timeout_ms: 15_000,
            grace_period_ms: 10_000,
        }
    }
}

impl NegotiationConfig {
    pub fn gathering_timeout(&self) -> Duration {
        Duration::from_millis(self.gathering_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| CallError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| CallError::InvalidConfig(format!("{}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    /// Пустой список серверов допустим: останутся только host кандидаты
    pub fn validate(&self) -> Result<()> {
        for server in &self.ice_servers {
            if server.url.trim().is_empty() {
                return Err(CallError::InvalidConfig(format!(
                    "ice server {} has an empty url",
                    server.id
                )));
            }
            let is_turn = server.r#type.eq_ignore_ascii_case("turn")
                || server.r#type.eq_ignore_ascii_case("turns");
            let has_credentials = server.username.as_deref().is_some_and(|u| !u.is_empty())
                && server.credential.as_deref().is_some_and(|c| !c.is_empty());
            if is_turn && !has_credentials {
                return Err(CallError::InvalidConfig(format!(
                    "turn server {} needs a username and credential",
                    server.id
                )));
            }
        }

        let timeouts = [
            ("gathering_timeout_ms", self.gathering_timeout_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("grace_period_ms", self.grace_period_ms),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, value)| *value == 0) {
            return Err(CallError::InvalidConfig(format!("{name} must be positive")));
        }
        Ok(())
    }
}
