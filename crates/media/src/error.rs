//! Fehlertypen der Medien-Schicht

use salon_core::TransportDirection;
use salon_signaling::SignalingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum MediaError {
    #[error(transparent)]
    Signaling(#[from] SignalingError),

    #[error("Medien-Engine nicht initialisiert")]
    NichtInitialisiert,

    #[error("Medien-Engine bereits initialisiert")]
    BereitsInitialisiert,

    #[error("{0}-Transport existiert nicht")]
    TransportFehlt(TransportDirection),

    #[error("{0}-Transport existiert bereits")]
    TransportExistiert(TransportDirection),

    #[error("Operation auf falschem Transport: {0}")]
    FalscheRichtung(String),

    #[error("Zeitlimit ueberschritten: {0}")]
    Zeitlimit(String),

    #[error("Bereits in Arbeit: {0}")]
    LaeuftBereits(String),

    #[error("Unerwartete Antwort: {0}")]
    UnerwarteteAntwort(String),

    #[error("Engine-Fehler: {0}")]
    Engine(String),

    #[error("Geraete-Fehler: {0}")]
    Geraet(String),

    #[error("Bereits geschlossen: {0}")]
    Geschlossen(String),

    #[error("Sitzung zurueckgesetzt")]
    Zurueckgesetzt,
}

impl MediaError {
    pub fn engine(msg: impl Into<String>) -> Self {
        Self::Engine(msg.into())
    }

    pub fn geraet(msg: impl Into<String>) -> Self {
        Self::Geraet(msg.into())
    }

    /// Uebersetzt Signaling-Zeitlimits in Medien-Zeitlimits mit Kontext
    pub(crate) fn aus_anfrage(e: SignalingError, kontext: &str) -> Self {
        match e {
            SignalingError::Zeitlimit(_) => Self::Zeitlimit(kontext.to_string()),
            andere => Self::Signaling(andere),
        }
    }
}

pub type MediaResult<T> = Result<T, MediaError>;
