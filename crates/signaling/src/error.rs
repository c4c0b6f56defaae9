//! Fehlertypen fuer den Signaling-Client

use salon_protocol::WireError;
use thiserror::Error;

/// Fehlertyp fuer Transport und Signaling-Client
#[derive(Debug, Clone, Error)]
pub enum SignalingError {
    /// Verbindung konnte nicht aufgebaut werden
    #[error("Verbindung fehlgeschlagen: {0}")]
    Verbindung(String),

    /// IO-Fehler auf einer bestehenden Verbindung
    #[error("IO-Fehler: {0}")]
    Io(String),

    /// Verbindung wurde getrennt, offene Anfragen werden verworfen
    #[error("Verbindung getrennt")]
    VerbindungGetrennt,

    /// Wiederverbindung aufgegeben; die Sitzung muss neu erstellt werden
    #[error("Sitzung beendet")]
    SitzungBeendet,

    /// Antwort blieb innerhalb des Zeitlimits aus
    #[error("Zeitlimit ueberschritten: {0}")]
    Zeitlimit(String),

    /// Frame konnte nicht kodiert oder dekodiert werden
    #[error("Protokollfehler: {0}")]
    Protokoll(String),

    /// Server hat mit einer `error`-Nachricht geantwortet
    #[error("Serverfehler {code}: {nachricht}")]
    Server { code: String, nachricht: String },

    /// Interner Fehler
    #[error("Interner Fehler: {0}")]
    Intern(String),
}

impl SignalingError {
    /// Erstellt einen internen Fehler
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Erstellt einen Protokollfehler
    pub fn protokoll(msg: impl Into<String>) -> Self {
        Self::Protokoll(msg.into())
    }

    /// Gibt true zurueck wenn der Fehler durch eine Verbindungsunterbrechung entstand
    pub fn ist_verbindungsfehler(&self) -> bool {
        matches!(
            self,
            SignalingError::Verbindung(_)
                | SignalingError::Io(_)
                | SignalingError::VerbindungGetrennt
                | SignalingError::SitzungBeendet
        )
    }
}

impl From<WireError> for SignalingError {
    fn from(e: WireError) -> Self {
        Self::Protokoll(e.to_string())
    }
}

impl From<std::io::Error> for SignalingError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Result-Typ fuer den Signaling-Client
pub type SignalingResult<T> = Result<T, SignalingError>;
