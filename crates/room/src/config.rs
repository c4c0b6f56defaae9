//! Raum-Optionen
//!
//! Alle Felder haben Standardwerte, die Struktur laesst sich daher direkt
//! als `[room]`-Abschnitt einer TOML-Datei einlesen.

use salon_signaling::ReconnectPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomOptions {
    /// Zugangs-Token fuer `join`
    pub token: String,
    /// Anzeigename des lokalen Teilnehmers
    pub name: Option<String>,
    pub metadata: HashMap<String, String>,
    /// Neue entfernte Tracks automatisch abonnieren
    pub auto_subscribe: bool,
    /// Video-Tracks mit Simulcast veroeffentlichen
    pub simulcast: bool,
    pub join_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub publish_timeout_ms: u64,
    pub subscribe_timeout_ms: u64,
    pub reconnect: ReconnectPolicy,
}

impl Default for RoomOptions {
    fn default() -> Self {
        Self {
            token: String::new(),
            name: None,
            metadata: HashMap::new(),
            auto_subscribe: true,
            simulcast: true,
            join_timeout_ms: 10_000,
            request_timeout_ms: 10_000,
            publish_timeout_ms: 10_000,
            subscribe_timeout_ms: 10_000,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl RoomOptions {
    pub fn mit_token(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            ..Default::default()
        }
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn subscribe_timeout(&self) -> Duration {
        Duration::from_millis(self.subscribe_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standardwerte() {
        let o = RoomOptions::default();
        assert!(o.auto_subscribe);
        assert_eq!(o.publish_timeout(), Duration::from_secs(10));
        assert_eq!(o.subscribe_timeout(), Duration::from_secs(10));
        assert_eq!(o.reconnect.max_versuche, 5);
    }

    #[test]
    fn teilweise_toml_ergaenzt_standardwerte() {
        let o: RoomOptions = toml::from_str(
            r#"
            token = "abc"
            auto_subscribe = false
            join_timeout_ms = 2500

            [reconnect]
            max_versuche = 2
            "#,
        )
        .unwrap();
        assert_eq!(o.token, "abc");
        assert!(!o.auto_subscribe);
        assert_eq!(o.join_timeout(), Duration::from_millis(2500));
        assert_eq!(o.request_timeout(), Duration::from_secs(10));
        assert_eq!(o.reconnect.max_versuche, 2);
        assert_eq!(o.reconnect.basis_verzoegerung_ms, 1000);
    }
}
