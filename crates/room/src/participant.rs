//! Teilnehmer eines Raums

use salon_core::{ParticipantSid, TrackSid, TrackSource};
use salon_protocol::ParticipantInfo;
use std::collections::{BTreeMap, HashMap};

use crate::publication::TrackPublication;

/// Lebenszyklus eines Teilnehmers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParticipantState {
    /// Angekuendigt, noch ohne Tracks
    Joined,
    /// Mindestens ein veroeffentlichter Track
    Active,
    Disconnected,
}

#[derive(Debug, Clone)]
pub struct Participant {
    pub sid: ParticipantSid,
    pub identity: String,
    pub name: String,
    pub metadata: HashMap<String, String>,
    pub state: ParticipantState,
    pub is_local: bool,
    pub tracks: BTreeMap<TrackSid, TrackPublication>,
}

impl Participant {
    /// Entfernter Teilnehmer aus Server-Angaben
    pub fn entfernt(info: &ParticipantInfo) -> Self {
        let tracks = info
            .tracks
            .iter()
            .map(|t| (t.sid.clone(), TrackPublication::entfernt(t)))
            .collect();
        let mut p = Self {
            sid: info.sid.clone(),
            identity: info.identity.clone(),
            name: info.name.clone(),
            metadata: info.metadata.clone(),
            state: ParticipantState::Joined,
            is_local: false,
            tracks,
        };
        p.zustand_ableiten();
        p
    }

    /// Lokaler Teilnehmer; Server-Tracks werden ignoriert
    pub fn lokal(info: &ParticipantInfo) -> Self {
        Self {
            sid: info.sid.clone(),
            identity: info.identity.clone(),
            name: info.name.clone(),
            metadata: info.metadata.clone(),
            state: ParticipantState::Active,
            is_local: true,
            tracks: BTreeMap::new(),
        }
    }

    pub fn track(&self, sid: &TrackSid) -> Option<&TrackPublication> {
        self.tracks.get(sid)
    }

    pub fn track_fuer_quelle(&self, source: TrackSource) -> Option<&TrackPublication> {
        self.tracks.values().find(|t| t.source == source)
    }

    /// Uebernimmt Name und Metadaten; true wenn sich etwas geaendert hat
    pub(crate) fn attribute_uebernehmen(&mut self, info: &ParticipantInfo) -> bool {
        let geaendert = self.identity != info.identity
            || self.name != info.name
            || self.metadata != info.metadata;
        self.identity = info.identity.clone();
        self.name = info.name.clone();
        self.metadata = info.metadata.clone();
        geaendert
    }

    pub(crate) fn zustand_ableiten(&mut self) {
        if self.is_local || self.state == ParticipantState::Disconnected {
            return;
        }
        self.state = if self.tracks.is_empty() {
            ParticipantState::Joined
        } else {
            ParticipantState::Active
        };
    }
}
