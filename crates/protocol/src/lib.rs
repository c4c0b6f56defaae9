//! salon-protocol – Signaling-Protokoll
//!
//! Definiert die JSON-Nachrichten zwischen Salon-Client und SFU-Server,
//! die WebRTC-Parameter die darin transportiert werden, sowie das
//! Wire-Format fuer WebSocket- und TCP-Verbindungen.
//!
//! ## Module
//!
//! - [`messages`] – Client/Server-Nachrichten und [`Envelope`](messages::Envelope)
//! - [`params`] – ICE/DTLS/SCTP/RTP-Parameter
//! - [`wire`] – `FrameCodec` und Kodierungs-Hilfsfunktionen

pub mod messages;
pub mod params;
pub mod wire;

pub use messages::{
    ClientMessage, Envelope, ErrorBody, ParticipantInfo, RoomInfo, ServerMessage, TrackInfo,
};
pub use params::{
    DtlsFingerprint, DtlsParameters, DtlsRole, IceCandidate, IceParameters, RtpCapabilities,
    RtpParameters, SctpParameters, SctpStreamParameters,
};
pub use wire::{FrameCodec, WireError, WireResult};
