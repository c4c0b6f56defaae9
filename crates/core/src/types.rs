//! Gemeinsame Identifikationstypen fuer Salon
//!
//! Alle IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! verschiedenen ID-Arten zur Compilezeit auszuschliessen. Anders als
//! lokal erzeugte UUIDs werden diese IDs vom SFU-Server vergeben und sind
//! daher opake Strings.

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $praefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Erstellt eine ID aus einem beliebigen String
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Gibt den inneren String zurueck
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($praefix, ":{}"), self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Server-vergebene Raum-ID
    RoomSid,
    "room"
);
string_id!(
    /// Server-vergebene Teilnehmer-ID
    ParticipantSid,
    "participant"
);
string_id!(
    /// Server-vergebene Track-ID
    TrackSid,
    "track"
);
string_id!(
    /// ID eines WebRTC-Transports (Send oder Recv)
    TransportId,
    "transport"
);
string_id!(
    /// ID eines Producers (ausgehender Medienstrom)
    ProducerId,
    "producer"
);
string_id!(
    /// ID eines Consumers (eingehender Medienstrom)
    ConsumerId,
    "consumer"
);
string_id!(
    /// ID eines Daten-Producers (SCTP)
    DataProducerId,
    "data-producer"
);
string_id!(
    /// ID eines Daten-Consumers (SCTP)
    DataConsumerId,
    "data-consumer"
);

// ---------------------------------------------------------------------------
// Medien-Enums
// ---------------------------------------------------------------------------

/// Art eines Medienstroms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// Herkunft eines Tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackSource {
    Camera,
    Microphone,
    ScreenShare,
    ScreenShareAudio,
    #[default]
    #[serde(other)]
    Unknown,
}

impl TrackSource {
    /// Medienart die diese Quelle liefert
    pub fn kind(&self) -> MediaKind {
        match self {
            TrackSource::Microphone | TrackSource::ScreenShareAudio => MediaKind::Audio,
            TrackSource::Camera | TrackSource::ScreenShare | TrackSource::Unknown => {
                MediaKind::Video
            }
        }
    }
}

impl std::fmt::Display for TrackSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TrackSource::Camera => "camera",
            TrackSource::Microphone => "microphone",
            TrackSource::ScreenShare => "screen_share",
            TrackSource::ScreenShareAudio => "screen_share_audio",
            TrackSource::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Richtung eines WebRTC-Transports aus Sicht des Clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportDirection {
    Send,
    Recv,
}

impl std::fmt::Display for TransportDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportDirection::Send => write!(f, "send"),
            TransportDirection::Recv => write!(f, "recv"),
        }
    }
}

/// Zustellgarantie eines Datenkanals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataChannelKind {
    #[default]
    Reliable,
    Lossy,
}

impl DataChannelKind {
    /// Label unter dem der Kanal beim Server angemeldet wird
    pub fn label(&self) -> &'static str {
        match self {
            DataChannelKind::Reliable => "_reliable",
            DataChannelKind::Lossy => "_lossy",
        }
    }
}

// ---------------------------------------------------------------------------
// Verbindungszustand
// ---------------------------------------------------------------------------

/// Zustand einer Signaling-Sitzung
///
/// ```text
/// Disconnected -> Connecting -> Connected -> Reconnecting -> Connected
///                                                  |
///                                                  +-> Error (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl ConnectionState {
    /// Gibt true zurueck wenn gerade eine Verbindung aufgebaut wird oder besteht
    pub fn ist_aktiv(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Connected | ConnectionState::Reconnecting
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Error => "error",
        };
        f.write_str(name)
    }
}
