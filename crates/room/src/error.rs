//! Fehlertypen der Raum-Schicht

use salon_core::{TrackSid, TrackSource};
use salon_media::MediaError;
use salon_signaling::SignalingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum RoomError {
    #[error(transparent)]
    Signaling(#[from] SignalingError),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error("Nicht mit einem Raum verbunden")]
    NichtVerbunden,

    #[error("Verbindungsaufbau laeuft bereits")]
    VerbindungLaeuft,

    #[error("RTP-Faehigkeiten des Servers nicht verfuegbar")]
    FaehigkeitenFehlen,

    #[error("{0} wird bereits aktiviert")]
    LaeuftBereits(TrackSource),

    #[error("Unbekannter Track: {0}")]
    TrackUnbekannt(TrackSid),

    #[error("Unerwartete Antwort: {0}")]
    UnerwarteteAntwort(String),

    #[error("Zeitlimit ueberschritten: {0}")]
    Zeitlimit(String),

    #[error("Raum wurde getrennt")]
    Getrennt,

    #[error("Interner Fehler: {0}")]
    Intern(String),
}

impl RoomError {
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }
}

pub type RoomResult<T> = Result<T, RoomError>;
