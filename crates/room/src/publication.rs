//! Veroeffentlichte Tracks aus Sicht des Raums

use salon_core::{ConsumerId, MediaKind, ProducerId, TrackSid, TrackSource};
use salon_media::{MediaTrack, PublishedTrack};
use salon_protocol::TrackInfo;
use std::sync::Arc;

/// Ein veroeffentlichter Track, lokal oder entfernt
///
/// Entfernt gilt: `track.is_some() == subscribed`. Lokal haelt die
/// Publikation den Aufnahme-Track bis er gestoppt wurde.
#[derive(Debug, Clone)]
pub struct TrackPublication {
    pub sid: TrackSid,
    pub kind: MediaKind,
    pub source: TrackSource,
    pub name: String,
    pub muted: bool,
    pub subscribed: bool,
    pub simulcast: bool,
    pub producer_id: Option<ProducerId>,
    pub consumer_id: Option<ConsumerId>,
    pub track: Option<Arc<dyn MediaTrack>>,
}

impl TrackPublication {
    /// Entfernte Publikation, noch nicht abonniert
    pub fn entfernt(info: &TrackInfo) -> Self {
        Self {
            sid: info.sid.clone(),
            kind: info.kind,
            source: info.source,
            name: info.name.clone(),
            muted: info.muted,
            subscribed: false,
            simulcast: info.simulcast,
            producer_id: Some(info.producer_id()),
            consumer_id: None,
            track: None,
        }
    }

    /// Lokale Publikation nach erfolgreichem `publish`
    pub fn lokal(veroeffentlicht: &PublishedTrack) -> Self {
        let info = &veroeffentlicht.info;
        Self {
            sid: veroeffentlicht.track_sid.clone(),
            kind: info.kind,
            source: info.source,
            name: info.name.clone(),
            muted: info.muted,
            subscribed: false,
            simulcast: info.simulcast,
            producer_id: Some(veroeffentlicht.producer_id.clone()),
            consumer_id: None,
            track: Some(Arc::clone(&veroeffentlicht.track)),
        }
    }

    /// Uebernimmt Server-Angaben, Abo-Zustand bleibt erhalten
    pub(crate) fn info_uebernehmen(&mut self, info: &TrackInfo) -> bool {
        let vorher = (self.name.clone(), self.muted, self.simulcast, self.source);
        self.name = info.name.clone();
        self.muted = info.muted;
        self.simulcast = info.simulcast;
        self.source = info.source;
        self.producer_id = Some(info.producer_id());
        vorher != (self.name.clone(), self.muted, self.simulcast, self.source)
    }

    pub(crate) fn abonnieren(&mut self, consumer_id: ConsumerId, track: Arc<dyn MediaTrack>) {
        self.consumer_id = Some(consumer_id);
        self.track = Some(track);
        self.subscribed = true;
    }

    pub(crate) fn abo_loesen(&mut self) {
        self.consumer_id = None;
        self.track = None;
        self.subscribed = false;
    }
}
