//! Logging des Headless-Clients
//!
//! `SALON_LOG_LEVEL` und `SALON_LOG_FORMAT` haben Vorrang vor `[logging]`.
//! Ein blosser Level gilt nur fuer die salon-Crates; Abhaengigkeiten wie
//! tungstenite bleiben auf `warn`. Ein vollstaendiger Filter-Ausdruck
//! (`info,salon_signaling=trace`) wird unveraendert uebernommen.
//!
//! ```text
//!  raum{adresse=ws://.. room=RM_x participant=PA_y}
//!    |-- Verbunden
//!    |-- Track veroeffentlicht
//!    `-- ...
//! ```
//!
//! `room` und `participant` sind erst nach dem Beitritt gesetzt.

use tracing::field::Empty;
use tracing::Span;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingEinstellungen;

const SALON_CRATES: &[&str] = &[
    "salon_client",
    "salon_room",
    "salon_media",
    "salon_signaling",
    "salon_protocol",
    "salon_core",
];

/// Ausgabeformat der Log-Zeilen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    /// Nur exakt "text" oder "json"
    pub fn parsen(format: &str) -> Option<Self> {
        match format {
            "text" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Baut aus einem Level den Filter-Ausdruck fuer die salon-Crates
pub fn filter_ausdruck(level: &str) -> String {
    let level = match level.trim() {
        "" => "info",
        l => l,
    };
    if level.contains(['=', ',']) {
        return level.to_string();
    }
    std::iter::once("warn".to_string())
        .chain(SALON_CRATES.iter().map(|c| format!("{c}={level}")))
        .collect::<Vec<_>>()
        .join(",")
}

/// Initialisiert das Logging und liefert das verwendete Format
pub fn logging_initialisieren(einstellungen: &LoggingEinstellungen) -> LogFormat {
    let level =
        std::env::var("SALON_LOG_LEVEL").unwrap_or_else(|_| einstellungen.level.clone());
    let filter = EnvFilter::try_new(filter_ausdruck(&level))
        .unwrap_or_else(|_| EnvFilter::new(filter_ausdruck("info")));

    let angefordert =
        std::env::var("SALON_LOG_FORMAT").unwrap_or_else(|_| einstellungen.format.clone());
    let format = LogFormat::parsen(&angefordert);

    match format.unwrap_or(LogFormat::Text) {
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_current_span(true)
                .with_span_list(false)
                .init();
        }
        LogFormat::Text => {
            fmt().with_env_filter(filter).with_target(false).init();
        }
    }

    if format.is_none() {
        tracing::warn!(format = %angefordert, "Unbekanntes Log-Format, verwende text");
    }
    format.unwrap_or(LogFormat::Text)
}

/// Span eines Client-Laufs
pub fn raum_span(adresse: &str) -> Span {
    tracing::info_span!("raum", adresse = %adresse, room = Empty, participant = Empty)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_nur_exakte_werte() {
        assert_eq!(LogFormat::parsen("text"), Some(LogFormat::Text));
        assert_eq!(LogFormat::parsen("json"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parsen("JSON"), None);
        assert_eq!(LogFormat::parsen(""), None);
    }

    #[test]
    fn blosser_level_gilt_nur_fuer_salon() {
        let ausdruck = filter_ausdruck("debug");
        assert!(ausdruck.starts_with("warn,"));
        assert!(ausdruck.contains("salon_room=debug"));
        assert!(ausdruck.contains("salon_signaling=debug"));
        assert!(!ausdruck.contains("tungstenite"));
        assert!(EnvFilter::try_new(&ausdruck).is_ok());
    }

    #[test]
    fn filter_ausdruck_bleibt_unveraendert() {
        assert_eq!(
            filter_ausdruck("info,salon_signaling=trace"),
            "info,salon_signaling=trace"
        );
        assert_eq!(filter_ausdruck("salon_room=trace"), "salon_room=trace");
    }

    #[test]
    fn leerer_level_wird_info() {
        assert_eq!(filter_ausdruck("  "), filter_ausdruck("info"));
    }
}
