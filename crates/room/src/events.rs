//! Raum-Ereignisse
//!
//! Alle Ereignisse laufen ueber einen [`EventBus<RoomEvent>`](salon_core::EventBus).
//! Listener koennen auf eine Art ([`RoomEventKind`]) oder auf alle
//! Ereignisse registriert werden.

use salon_core::{ConnectionState, DataChannelKind, ParticipantSid, TrackSid};
use salon_protocol::RoomInfo;

use crate::error::RoomError;
use crate::participant::Participant;
use crate::publication::TrackPublication;

/// Grund fuer ein `Disconnected`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect()` wurde aufgerufen
    Client,
    /// Wiederverbindung endgueltig gescheitert
    Verbindungsverlust,
}

#[derive(Debug, Clone)]
pub enum RoomEvent {
    ConnectionStateChanged(ConnectionState),
    Connected {
        room: RoomInfo,
    },
    Reconnecting,
    Reconnected,
    Disconnected {
        grund: DisconnectReason,
    },

    ParticipantConnected(Participant),
    ParticipantDisconnected(Participant),
    ParticipantUpdated(Participant),

    TrackPublished {
        participant_sid: ParticipantSid,
        publication: TrackPublication,
    },
    TrackUnpublished {
        participant_sid: ParticipantSid,
        publication: TrackPublication,
    },
    TrackSubscribed {
        participant_sid: ParticipantSid,
        publication: TrackPublication,
    },
    TrackUnsubscribed {
        participant_sid: ParticipantSid,
        publication: TrackPublication,
    },
    TrackMuted {
        participant_sid: ParticipantSid,
        track_sid: TrackSid,
    },
    TrackUnmuted {
        participant_sid: ParticipantSid,
        track_sid: TrackSid,
    },

    LocalTrackPublished(TrackPublication),
    LocalTrackUnpublished(TrackPublication),

    DataReceived {
        participant_sid: Option<ParticipantSid>,
        payload: serde_json::Value,
        kind: DataChannelKind,
    },

    TransportsConnected,
    Error(RoomError),
}

/// Art eines [`RoomEvent`], fuer gefilterte Listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomEventKind {
    ConnectionStateChanged,
    Connected,
    Reconnecting,
    Reconnected,
    Disconnected,
    ParticipantConnected,
    ParticipantDisconnected,
    ParticipantUpdated,
    TrackPublished,
    TrackUnpublished,
    TrackSubscribed,
    TrackUnsubscribed,
    TrackMuted,
    TrackUnmuted,
    LocalTrackPublished,
    LocalTrackUnpublished,
    DataReceived,
    TransportsConnected,
    Error,
}

impl RoomEvent {
    pub fn kind(&self) -> RoomEventKind {
        match self {
            RoomEvent::ConnectionStateChanged(_) => RoomEventKind::ConnectionStateChanged,
            RoomEvent::Connected { .. } => RoomEventKind::Connected,
            RoomEvent::Reconnecting => RoomEventKind::Reconnecting,
            RoomEvent::Reconnected => RoomEventKind::Reconnected,
            RoomEvent::Disconnected { .. } => RoomEventKind::Disconnected,
            RoomEvent::ParticipantConnected(_) => RoomEventKind::ParticipantConnected,
            RoomEvent::ParticipantDisconnected(_) => RoomEventKind::ParticipantDisconnected,
            RoomEvent::ParticipantUpdated(_) => RoomEventKind::ParticipantUpdated,
            RoomEvent::TrackPublished { .. } => RoomEventKind::TrackPublished,
            RoomEvent::TrackUnpublished { .. } => RoomEventKind::TrackUnpublished,
            RoomEvent::TrackSubscribed { .. } => RoomEventKind::TrackSubscribed,
            RoomEvent::TrackUnsubscribed { .. } => RoomEventKind::TrackUnsubscribed,
            RoomEvent::TrackMuted { .. } => RoomEventKind::TrackMuted,
            RoomEvent::TrackUnmuted { .. } => RoomEventKind::TrackUnmuted,
            RoomEvent::LocalTrackPublished(_) => RoomEventKind::LocalTrackPublished,
            RoomEvent::LocalTrackUnpublished(_) => RoomEventKind::LocalTrackUnpublished,
            RoomEvent::DataReceived { .. } => RoomEventKind::DataReceived,
            RoomEvent::TransportsConnected => RoomEventKind::TransportsConnected,
            RoomEvent::Error(_) => RoomEventKind::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn art_passt_zum_ereignis() {
        assert_eq!(RoomEvent::Reconnecting.kind(), RoomEventKind::Reconnecting);
        assert_eq!(
            RoomEvent::Error(RoomError::NichtVerbunden).kind(),
            RoomEventKind::Error
        );
        assert_eq!(
            RoomEvent::Disconnected {
                grund: DisconnectReason::Client
            }
            .kind(),
            RoomEventKind::Disconnected
        );
    }
}
