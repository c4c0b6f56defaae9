//! salon-room – Raum-Orchestrierung
//!
//! Macht aus Absichten ("Raum betreten", "Kamera an", "Track abonnieren")
//! die noetigen Signaling-Runden und Medien-Operationen und haelt ein
//! konsistentes Bild von Raum, Teilnehmern und Tracks.
//!
//! ## Architektur
//!
//! ```text
//!                       RoomClient
//!                           |
//!     +---------------------+----------------------+
//!     |                     |                      |
//! ConnectionController  TrackController     ParticipantStore
//!  (join / leave)       (enable/disable)     (Abgleich, Abos)
//!                           |
//!                     MediaController
//!     (TransportManager, Producer-, Consumer-, DataChannelManager)
//! ```
//!
//! Ereignisse laufen ueber einen typisierten Bus, siehe [`RoomEvent`].

pub mod config;
pub mod connection_controller;
pub mod error;
pub mod events;
pub mod media_controller;
pub mod participant;
pub mod participant_store;
pub mod publication;
pub mod room_client;
pub mod track_controller;

pub use config::RoomOptions;
pub use connection_controller::Sitzung;
pub use error::{RoomError, RoomResult};
pub use events::{DisconnectReason, RoomEvent, RoomEventKind};
pub use participant::{Participant, ParticipantState};
pub use participant_store::{ParticipantStore, StoreAenderung};
pub use publication::TrackPublication;
pub use room_client::{RoomClient, SubscribeOptions};
