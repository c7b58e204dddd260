use crate::peer::types::ServerConfig;
use rand::Rng;
use sha2::{Digest, Sha256};

pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

/// Короткий sha256 отпечаток: хватает, чтобы различать описания в логах
/// и при проверке владения слотом
pub fn fingerprint(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(&hasher.finalize()[..8])
}

// Добавляем схему stun:/turn: к URL ICE сервера, если пользователь её не указал
pub fn add_ice_url_scheme(config: &ServerConfig) -> String {
    const SCHEMES: [&str; 4] = ["stun:", "stuns:", "turn:", "turns:"];
    if SCHEMES.iter().any(|s| config.url.starts_with(s)) {
        return config.url.clone();
    }
    let scheme = if config.r#type == "turn" { "turn:" } else { "stun:" };
    format!("{}{}", scheme, config.url)
}
