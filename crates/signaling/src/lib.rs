//! salon-signaling – Signaling-Transport und -Client
//!
//! ## Architektur
//!
//! ```text
//! RoomClient / Manager
//!        |  anfragen(msg, schluessel, zeitlimit)
//!        v
//! SignalingClient --- Korrelator (requestId / CorrelationKey)
//!        |
//!        v
//! SignalingTransport (Zustand, FIFO-Warteschlange, Backoff)
//!        |
//!        v
//! Connector: WebSocket | TCP (FrameCodec) | Mock
//! ```
//!
//! ## Module
//!
//! - [`transport`] – Verbindungslebenszyklus, Warteschlange, Wiederverbindung
//! - [`client`] – Anfrage/Antwort und Listener-Registrierung
//! - [`correlation`] – Zuordnung von Antworten zu offenen Anfragen
//! - [`connector`] – Verbindungsaufbau (WebSocket, TCP)
//! - [`backoff`] – Wiederverbindungs-Strategie
//! - [`mock`] – In-Memory-Server fuer Tests

pub mod backoff;
pub mod client;
pub mod connector;
pub mod correlation;
pub mod error;
pub mod mock;
pub mod transport;

pub use backoff::ReconnectPolicy;
pub use client::SignalingClient;
pub use connector::{Connector, Link, TcpConnector, WebSocketConnector};
pub use correlation::CorrelationKey;
pub use error::{SignalingError, SignalingResult};
pub use transport::{SignalingTransport, TransportEvent, Zustellung};
