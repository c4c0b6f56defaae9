//! salon-core – Gemeinsame Typen und Event-Bus
//!
//! Dieses Crate stellt die fundamentalen Bausteine bereit, die von allen
//! anderen Salon-Crates gemeinsam genutzt werden.

pub mod event;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use event::{EventBus, ListenerId};
pub use types::{
    ConnectionState, ConsumerId, DataChannelKind, DataConsumerId, DataProducerId, MediaKind,
    ParticipantSid, ProducerId, RoomSid, TrackSid, TrackSource, TransportDirection, TransportId,
};
