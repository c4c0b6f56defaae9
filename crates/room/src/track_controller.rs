//! Lokale Tracks: Kamera, Mikrofon, Bildschirm
//!
//! ```text
//! aktivieren(quelle)
//!   1. bestehende Publikation?        -> zurueckgeben
//!   2. Quelle reservieren             -> sonst LaeuftBereits
//!   3. WebRTC sicherstellen           -> sonst FaehigkeitenFehlen
//!   4. Geraet anfordern
//!   5. veroeffentlichen               -> bei Fehler Track stoppen
//!   6. Publikation eintragen
//! ```
//!
//! Eine lokale Publikation ist also nie sichtbar bevor ihr Producer existiert.

use parking_lot::Mutex;
use salon_core::{MediaKind, TrackSid, TrackSource};
use salon_media::{CaptureConstraints, MediaDevices, MediaTrack, PublishOptions};
use salon_protocol::RtpCapabilities;
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{RoomError, RoomResult};
use crate::media_controller::MediaController;
use crate::participant_store::ParticipantStore;
use crate::publication::TrackPublication;

/// Haelt eine Quelle fuer die Dauer eines `aktivieren` besetzt
struct Reservierung<'a> {
    menge: &'a Mutex<HashSet<TrackSource>>,
    source: TrackSource,
}

impl Drop for Reservierung<'_> {
    fn drop(&mut self) {
        self.menge.lock().remove(&self.source);
    }
}

pub struct TrackController {
    medien: Arc<MediaController>,
    geraete: Arc<dyn MediaDevices>,
    store: Arc<ParticipantStore>,
    reserviert: Mutex<HashSet<TrackSource>>,
    simulcast: bool,
}

impl TrackController {
    pub fn neu(
        medien: Arc<MediaController>,
        geraete: Arc<dyn MediaDevices>,
        store: Arc<ParticipantStore>,
        simulcast: bool,
    ) -> Self {
        Self {
            medien,
            geraete,
            store,
            reserviert: Mutex::new(HashSet::new()),
            simulcast,
        }
    }

    /// Aktiviert eine Quelle; liefert die Publikation und ob sie neu ist
    pub async fn aktivieren(
        &self,
        source: TrackSource,
        device_id: Option<String>,
        faehigkeiten: Option<&RtpCapabilities>,
    ) -> RoomResult<(TrackPublication, bool)> {
        if let Some(bestehend) = self.store.lokal_track_fuer_quelle(source) {
            return Ok((bestehend, false));
        }
        let _reservierung = self.reservieren(source)?;

        self.medien.sicherstellen(faehigkeiten).await?;
        let track = self
            .geraete
            .acquire(source.kind(), Self::anforderungen(source, device_id))
            .await?;

        let publication = self.veroeffentlichen(source, track).await?;
        Ok((publication, true))
    }

    fn reservieren(&self, source: TrackSource) -> RoomResult<Reservierung<'_>> {
        if !self.reserviert.lock().insert(source) {
            return Err(RoomError::LaeuftBereits(source));
        }
        Ok(Reservierung {
            menge: &self.reserviert,
            source,
        })
    }

    fn anforderungen(source: TrackSource, device_id: Option<String>) -> CaptureConstraints {
        match source {
            TrackSource::Microphone | TrackSource::ScreenShareAudio => {
                CaptureConstraints::mikrofon(device_id)
            }
            TrackSource::ScreenShare => CaptureConstraints::bildschirm(),
            TrackSource::Camera | TrackSource::Unknown => CaptureConstraints::kamera(device_id),
        }
    }

    async fn veroeffentlichen(
        &self,
        source: TrackSource,
        track: Arc<dyn MediaTrack>,
    ) -> RoomResult<TrackPublication> {
        let optionen = PublishOptions {
            source,
            simulcast: self.simulcast && track.kind() == MediaKind::Video,
            name: None,
        };
        let veroeffentlicht = match self
            .medien
            .producer()
            .publish_track(Arc::clone(&track), optionen)
            .await
        {
            Ok(v) => v,
            Err(e) => {
                track.stop();
                return Err(e.into());
            }
        };

        // Raum waehrend der Veroeffentlichung verlassen
        if self.store.lokal().is_none() {
            self.medien
                .producer()
                .unpublish_track(&veroeffentlicht.producer_id);
            track.stop();
            return Err(RoomError::Getrennt);
        }

        let publication = TrackPublication::lokal(&veroeffentlicht);
        self.store.lokal_track_hinzufuegen(publication.clone());
        tracing::info!(track_sid = %publication.sid, source = %source, "Lokaler Track aktiv");
        Ok(publication)
    }

    /// Deaktiviert eine Quelle; `None` wenn nichts veroeffentlicht war
    pub fn deaktivieren(&self, source: TrackSource) -> Option<TrackPublication> {
        let publication = self.store.lokal_track_fuer_quelle(source)?;
        if let Some(producer_id) = &publication.producer_id {
            self.medien.producer().unpublish_track(producer_id);
        }
        let publication = self
            .store
            .lokal_track_entfernen(&publication.sid)
            .unwrap_or(publication);
        if let Some(track) = &publication.track {
            track.stop();
        }
        tracing::info!(track_sid = %publication.sid, source = %source, "Lokaler Track deaktiviert");
        Some(publication)
    }

    /// Der Producer-Manager hat einen von aussen beendeten Track zurueckgezogen
    pub fn lokalen_track_beendet(&self, track_sid: &TrackSid) -> Option<TrackPublication> {
        let publication = self.store.lokal_track_entfernen(track_sid)?;
        if let Some(track) = &publication.track {
            track.stop();
        }
        Some(publication)
    }

    /// Stoppt alle lokalen Aufnahmen und entfernt ihre Publikationen
    pub fn alle_stoppen(&self) -> Vec<TrackPublication> {
        let publikationen = self.store.lokal_tracks_leeren();
        for track in publikationen.iter().filter_map(|p| p.track.as_ref()) {
            track.stop();
        }
        publikationen
    }

    /// Entnimmt die noch laufenden Aufnahmen fuer einen Neuaufbau der Transporte
    pub fn fuer_neuaufbau(&self) -> Vec<(TrackPublication, Arc<dyn MediaTrack>)> {
        self.store
            .lokal_tracks_leeren()
            .into_iter()
            .filter_map(|p| {
                let track = p.track.clone()?;
                (!track.is_stopped()).then_some((p, track))
            })
            .collect()
    }

    /// Veroeffentlicht eine laufende Aufnahme nach dem Neuaufbau erneut
    pub async fn erneut_veroeffentlichen(
        &self,
        source: TrackSource,
        track: Arc<dyn MediaTrack>,
        faehigkeiten: Option<&RtpCapabilities>,
    ) -> RoomResult<TrackPublication> {
        let _reservierung = self.reservieren(source)?;
        if let Err(e) = self.medien.sicherstellen(faehigkeiten).await {
            track.stop();
            return Err(e);
        }
        self.veroeffentlichen(source, track).await
    }
}
