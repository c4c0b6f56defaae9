//! Schnittstelle zur Geraete- und Aufnahmeschicht
//!
//! Die eigentliche Aufnahme (Kamera, Mikrofon, Bildschirm) liegt ausserhalb
//! dieses Crates. Die Orchestrierung braucht davon nur: Geraete auflisten,
//! einen Track anfordern, ihn stoppen und sein Ende beobachten.

use async_trait::async_trait;
use salon_core::MediaKind;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

use crate::error::MediaResult;

/// Art eines Geraets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    AudioInput,
    AudioOutput,
    VideoInput,
}

/// Beschreibung eines Geraets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_id: String,
    pub kind: DeviceKind,
    pub label: String,
}

/// Anforderungen an eine Aufnahme
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub device_id: Option<String>,
    /// Bildschirm statt Kamera aufnehmen
    pub bildschirm: bool,
    pub breite: Option<u32>,
    pub hoehe: Option<u32>,
    pub bildrate: Option<u32>,
    pub echo_unterdrueckung: bool,
}

impl CaptureConstraints {
    pub fn kamera(device_id: Option<String>) -> Self {
        Self {
            device_id,
            breite: Some(1280),
            hoehe: Some(720),
            bildrate: Some(30),
            ..Default::default()
        }
    }

    pub fn mikrofon(device_id: Option<String>) -> Self {
        Self {
            device_id,
            echo_unterdrueckung: true,
            ..Default::default()
        }
    }

    pub fn bildschirm() -> Self {
        Self {
            bildschirm: true,
            bildrate: Some(15),
            ..Default::default()
        }
    }
}

/// Ein Medien-Track (lokal aufgenommen oder von einem Consumer empfangen)
pub trait MediaTrack: Send + Sync + std::fmt::Debug {
    fn id(&self) -> &str;
    fn kind(&self) -> MediaKind;
    fn label(&self) -> &str;

    /// Beendet die Aufnahme. Idempotent; gibt true nur beim ersten Aufruf zurueck.
    fn stop(&self) -> bool;

    fn is_stopped(&self) -> bool;

    /// Wird `true` wenn der Track von aussen endet (Geraet entfernt, Freigabe beendet)
    fn ended(&self) -> watch::Receiver<bool>;
}

/// Zugriff auf Aufnahmegeraete
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn enumerate_devices(&self) -> MediaResult<Vec<DeviceInfo>>;

    async fn acquire(
        &self,
        kind: MediaKind,
        constraints: CaptureConstraints,
    ) -> MediaResult<Arc<dyn MediaTrack>>;
}
