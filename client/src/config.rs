//! Client-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! Standardwerte, ohne Datei verbindet sich der Client per WebSocket mit
//! einem lokalen SFU.

use salon_room::RoomOptions;
use serde::{Deserialize, Serialize};

/// Vollstaendige Client-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Verbindung zum Signaling-Server
    pub verbindung: VerbindungsEinstellungen,
    /// Raum-Optionen (Token, Zeitlimits, Wiederverbindung)
    pub room: RoomOptions,
    /// Welche lokalen Medien nach dem Beitritt aktiviert werden
    pub medien: MedienEinstellungen,
    pub logging: LoggingEinstellungen,
}

/// Art der Signaling-Verbindung
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerbindungsArt {
    /// Text-Frames ueber `ws://`
    #[default]
    Websocket,
    /// Length-prefixed JSON ueber rohes TCP
    Tcp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerbindungsEinstellungen {
    pub art: VerbindungsArt,
    /// URL (`ws://host:port/pfad`) oder `host:port` bei TCP
    pub adresse: String,
    /// Maximale Frame-Groesse fuer TCP in Bytes
    pub max_frame_size: Option<usize>,
}

impl Default for VerbindungsEinstellungen {
    fn default() -> Self {
        Self {
            art: VerbindungsArt::Websocket,
            adresse: "ws://127.0.0.1:7880/rtc".into(),
            max_frame_size: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MedienEinstellungen {
    pub kamera: bool,
    /// Geraete-ID der Kamera (leer = Standardgeraet)
    pub kamera_geraet: Option<String>,
    pub mikrofon: bool,
    pub mikrofon_geraet: Option<String>,
    pub bildschirm: bool,
    /// Zuverlaessigen Datenkanal oeffnen
    pub datenkanal: bool,
    /// Nach so vielen Sekunden den Raum verlassen (leer = bis Ctrl-C)
    pub laufzeit_s: Option<u64>,
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level oder EnvFilter-Ausdruck, z.B. "info,salon_signaling=debug"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl ClientConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => Self::aus_toml(&inhalt)
                .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}")),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Logging ist hier noch nicht initialisiert
                eprintln!("Konfigurationsdatei '{pfad}' nicht gefunden, verwende Standardwerte");
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    pub fn aus_toml(inhalt: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(inhalt)
    }

    /// Ueberschreibt das Token aus `SALON_TOKEN`, falls gesetzt
    pub fn token_aus_env(&mut self) {
        if let Ok(token) = std::env::var("SALON_TOKEN") {
            if !token.is_empty() {
                self.room.token = token;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn standard_config_ist_valide() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.verbindung.art, VerbindungsArt::Websocket);
        assert!(cfg.verbindung.adresse.starts_with("ws://"));
        assert!(cfg.room.auto_subscribe);
        assert!(!cfg.medien.kamera);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn config_aus_toml_string() {
        let toml = r#"
            [verbindung]
            art = "tcp"
            adresse = "10.0.0.5:7881"

            [room]
            token = "geheim"
            publish_timeout_ms = 3000

            [medien]
            mikrofon = true
            laufzeit_s = 30
        "#;
        let cfg = ClientConfig::aus_toml(toml).unwrap();
        assert_eq!(cfg.verbindung.art, VerbindungsArt::Tcp);
        assert_eq!(cfg.verbindung.adresse, "10.0.0.5:7881");
        assert_eq!(cfg.room.token, "geheim");
        assert_eq!(cfg.room.publish_timeout(), Duration::from_secs(3));
        assert!(cfg.medien.mikrofon);
        assert_eq!(cfg.medien.laufzeit_s, Some(30));
        // Nicht angegebene Felder behalten Standardwerte
        assert_eq!(cfg.room.join_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.logging.format, "text");
    }

    #[test]
    fn unbekannte_verbindungsart_ist_fehler() {
        let toml = r#"
            [verbindung]
            art = "quic"
        "#;
        assert!(ClientConfig::aus_toml(toml).is_err());
    }

    #[test]
    fn fehlende_datei_liefert_standardwerte() {
        let cfg = ClientConfig::laden("/nicht/vorhanden/salon.toml").unwrap();
        assert_eq!(cfg.verbindung.art, VerbindungsArt::Websocket);
    }

    #[test]
    fn datei_wird_gelesen() {
        let pfad = std::env::temp_dir().join(format!("salon-test-{}.toml", std::process::id()));
        std::fs::write(&pfad, "[medien]\nkamera = true\n").unwrap();
        let cfg = ClientConfig::laden(pfad.to_str().unwrap()).unwrap();
        std::fs::remove_file(&pfad).ok();
        assert!(cfg.medien.kamera);
    }
}
