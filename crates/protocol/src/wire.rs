//! Wire-Format des Signalings
//!
//! Nachrichten sind JSON-Texte. Ueber WebSocket ist ein Text-Frame genau eine
//! Nachricht. Ueber rohe TCP-Verbindungen werden sie length-prefixed
//! uebertragen:
//!
//! ```text
//! +--------+--------+--------+--------+----...----+
//! | Laenge (u32 BE) | 4 Bytes        | JSON-Text  |
//! +--------+--------+--------+--------+----...----+
//! ```
//!
//! Die Laenge gibt die Anzahl der Payload-Bytes an (ohne die 4 Laengen-Bytes).
//! Maximale Frame-Groesse ist konfigurierbar (Standard: 1 MB) und gilt fuer
//! beide Verbindungsarten.

use bytes::{Buf, BufMut, BytesMut};
use std::io;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use crate::messages::{ClientMessage, Envelope, ServerMessage};

// ---------------------------------------------------------------------------
// Konstanten
// ---------------------------------------------------------------------------

/// Standard-maximale Frame-Groesse (1 MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Groesse des Laengen-Felds in Bytes
pub const LENGTH_FIELD_SIZE: usize = 4;

// ---------------------------------------------------------------------------
// Fehler
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum WireError {
    #[error("Frame zu gross: {groesse} Bytes (Maximum: {maximum} Bytes)")]
    ZuGross { groesse: usize, maximum: usize },

    #[error("JSON-Serialisierung fehlgeschlagen: {0}")]
    Serialisierung(#[from] serde_json::Error),
}

pub type WireResult<T> = std::result::Result<T, WireError>;

// ---------------------------------------------------------------------------
// Kodierung einzelner Nachrichten
// ---------------------------------------------------------------------------

fn groesse_pruefen(groesse: usize, maximum: usize) -> WireResult<()> {
    if groesse > maximum {
        return Err(WireError::ZuGross { groesse, maximum });
    }
    Ok(())
}

/// Serialisiert eine Client-Nachricht zu einem JSON-Text
pub fn encode_client(env: &Envelope<ClientMessage>, max_frame_size: usize) -> WireResult<String> {
    let text = serde_json::to_string(env)?;
    groesse_pruefen(text.len(), max_frame_size)?;
    Ok(text)
}

/// Parst einen vom Server empfangenen JSON-Text
pub fn decode_server(text: &str, max_frame_size: usize) -> WireResult<Envelope<ServerMessage>> {
    groesse_pruefen(text.len(), max_frame_size)?;
    Ok(serde_json::from_str(text)?)
}

/// Serialisiert eine Server-Nachricht (fuer Test-Server und Mocks)
pub fn encode_server(env: &Envelope<ServerMessage>) -> WireResult<String> {
    Ok(serde_json::to_string(env)?)
}

/// Parst eine Client-Nachricht (fuer Test-Server und Mocks)
pub fn decode_client(text: &str) -> WireResult<Envelope<ClientMessage>> {
    Ok(serde_json::from_str(text)?)
}

// ---------------------------------------------------------------------------
// FrameCodec
// ---------------------------------------------------------------------------

/// tokio-util Codec fuer length-prefixed JSON-Texte ueber TCP
///
/// Der Codec kennt nur Frames und UTF-8; das Parsen der Nachrichten
/// uebernimmt der Signaling-Transport, damit ein kaputter Frame die
/// Verbindung nicht beendet.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    /// Maximale erlaubte Frame-Groesse in Bytes
    max_frame_size: usize,
}

impl FrameCodec {
    /// Erstellt einen neuen `FrameCodec` mit Standard-Limits
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Erstellt einen `FrameCodec` mit benutzerdefinierter maximaler Frame-Groesse
    pub fn with_max_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Gibt die konfigurierte maximale Frame-Groesse zurueck
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_FIELD_SIZE {
            return Ok(None);
        }

        // Laenge lesen ohne den Buffer zu veraendern
        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;

        if length > self.max_frame_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                WireError::ZuGross {
                    groesse: length,
                    maximum: self.max_frame_size,
                },
            ));
        }

        let total_size = LENGTH_FIELD_SIZE + length;
        if src.len() < total_size {
            src.reserve(total_size - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_FIELD_SIZE);
        let payload = src.split_to(length);

        String::from_utf8(payload.to_vec())
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

impl Encoder<String> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() > self.max_frame_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                WireError::ZuGross {
                    groesse: item.len(),
                    maximum: self.max_frame_size,
                },
            ));
        }

        dst.reserve(LENGTH_FIELD_SIZE + item.len());
        dst.put_u32(item.len() as u32);
        dst.put_slice(item.as_bytes());
        Ok(())
    }
}
