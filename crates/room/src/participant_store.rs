//! Teilnehmer-Speicher
//!
//! Haelt den lokalen und alle entfernten Teilnehmer. Alle Operationen sind
//! idempotent und liefern die tatsaechlich eingetretenen Aenderungen zurueck;
//! der Raum leitet daraus Ereignisse und Nebenwirkungen ab.
//!
//! ```text
//!  Server-Nachricht --> ParticipantStore::upsert / abgleichen / track_*
//!                              |
//!                              v
//!                      Vec<StoreAenderung> --> RoomEvent + Consumer schliessen
//! ```
//!
//! `track_published` fuer einen noch unbekannten Teilnehmer wird vorgemerkt
//! und beim Eintreffen des Teilnehmers mit ihm gemeldet.

use parking_lot::RwLock;
use salon_core::{ConsumerId, ParticipantSid, TrackSid, TrackSource};
use salon_media::MediaTrack;
use salon_protocol::{ParticipantInfo, TrackInfo};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::participant::{Participant, ParticipantState};
use crate::publication::TrackPublication;

/// Eine durch den Abgleich entstandene Aenderung
#[derive(Debug, Clone)]
pub enum StoreAenderung {
    TeilnehmerBeigetreten(Participant),
    TeilnehmerAktualisiert(Participant),
    TeilnehmerVerlassen(Participant),
    TrackVeroeffentlicht {
        participant_sid: ParticipantSid,
        publication: TrackPublication,
    },
    TrackZurueckgezogen {
        participant_sid: ParticipantSid,
        publication: TrackPublication,
    },
    TrackStumm {
        participant_sid: ParticipantSid,
        track_sid: TrackSid,
        muted: bool,
    },
}

#[derive(Default)]
struct StoreInner {
    lokal: Option<Participant>,
    entfernt: BTreeMap<ParticipantSid, Participant>,
    /// Tracks die vor ihrem Teilnehmer angekommen sind
    vorgemerkt: HashMap<ParticipantSid, BTreeMap<TrackSid, TrackInfo>>,
}

impl StoreInner {
    fn track_suchen(
        &mut self,
        participant_sid: Option<&ParticipantSid>,
        track_sid: &TrackSid,
    ) -> Option<&mut Participant> {
        match participant_sid {
            Some(sid) => self
                .entfernt
                .get_mut(sid)
                .filter(|p| p.tracks.contains_key(track_sid)),
            None => self
                .entfernt
                .values_mut()
                .find(|p| p.tracks.contains_key(track_sid)),
        }
    }
}

#[derive(Default)]
pub struct ParticipantStore {
    inner: RwLock<StoreInner>,
}

impl ParticipantStore {
    pub fn neu() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Lokaler Teilnehmer
    // -----------------------------------------------------------------------

    /// Setzt den lokalen Teilnehmer; bestehende lokale Publikationen bleiben
    pub fn lokal_setzen(&self, info: &ParticipantInfo) -> Participant {
        let mut inner = self.inner.write();
        let tracks = inner
            .lokal
            .take()
            .map(|p| p.tracks)
            .unwrap_or_default();
        let mut lokal = Participant::lokal(info);
        lokal.tracks = tracks;
        inner.lokal = Some(lokal.clone());
        // der lokale Teilnehmer taucht nie als entfernter auf
        inner.entfernt.remove(&info.sid);
        lokal
    }

    /// Aktualisiert Name und Metadaten des lokalen Teilnehmers
    pub fn lokal_aktualisieren(&self, info: &ParticipantInfo) -> Option<Participant> {
        let mut inner = self.inner.write();
        let lokal = inner.lokal.as_mut().filter(|p| p.sid == info.sid)?;
        lokal.attribute_uebernehmen(info).then(|| lokal.clone())
    }

    pub fn lokal(&self) -> Option<Participant> {
        self.inner.read().lokal.clone()
    }

    pub fn lokale_sid(&self) -> Option<ParticipantSid> {
        self.inner.read().lokal.as_ref().map(|p| p.sid.clone())
    }

    pub fn ist_lokal(&self, sid: &ParticipantSid) -> bool {
        self.inner
            .read()
            .lokal
            .as_ref()
            .is_some_and(|p| &p.sid == sid)
    }

    pub fn lokal_track_hinzufuegen(&self, publication: TrackPublication) {
        if let Some(lokal) = self.inner.write().lokal.as_mut() {
            lokal.tracks.insert(publication.sid.clone(), publication);
        }
    }

    pub fn lokal_track_entfernen(&self, sid: &TrackSid) -> Option<TrackPublication> {
        self.inner.write().lokal.as_mut()?.tracks.remove(sid)
    }

    pub fn lokal_track_fuer_quelle(&self, source: TrackSource) -> Option<TrackPublication> {
        self.inner
            .read()
            .lokal
            .as_ref()?
            .track_fuer_quelle(source)
            .cloned()
    }

    /// Entfernt alle lokalen Publikationen
    pub fn lokal_tracks_leeren(&self) -> Vec<TrackPublication> {
        match self.inner.write().lokal.as_mut() {
            Some(lokal) => std::mem::take(&mut lokal.tracks).into_values().collect(),
            None => Vec::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Entfernte Teilnehmer
    // -----------------------------------------------------------------------

    /// Fuegt einen Teilnehmer ein oder gleicht ihn mit den Server-Angaben ab
    pub fn upsert(&self, info: &ParticipantInfo) -> Vec<StoreAenderung> {
        let mut inner = self.inner.write();
        if inner.lokal.as_ref().is_some_and(|p| p.sid == info.sid) {
            return Vec::new();
        }

        let Some(bestehend) = inner.entfernt.get_mut(&info.sid) else {
            let mut neu = Participant::entfernt(info);
            for (track_sid, track) in inner.vorgemerkt.remove(&info.sid).unwrap_or_default() {
                neu.tracks
                    .entry(track_sid)
                    .or_insert_with(|| TrackPublication::entfernt(&track));
            }
            neu.zustand_ableiten();
            inner.entfernt.insert(neu.sid.clone(), neu.clone());
            return vec![StoreAenderung::TeilnehmerBeigetreten(neu)];
        };

        let mut aenderungen = Vec::new();
        let sid = bestehend.sid.clone();

        let gemeldet: HashSet<&TrackSid> = info.tracks.iter().map(|t| &t.sid).collect();
        let weg: Vec<TrackSid> = bestehend
            .tracks
            .keys()
            .filter(|s| !gemeldet.contains(s))
            .cloned()
            .collect();
        for track_sid in weg {
            if let Some(publication) = bestehend.tracks.remove(&track_sid) {
                aenderungen.push(StoreAenderung::TrackZurueckgezogen {
                    participant_sid: sid.clone(),
                    publication,
                });
            }
        }

        for track in &info.tracks {
            match bestehend.tracks.get_mut(&track.sid) {
                Some(publication) => {
                    let war_stumm = publication.muted;
                    publication.info_uebernehmen(track);
                    if war_stumm != publication.muted {
                        aenderungen.push(StoreAenderung::TrackStumm {
                            participant_sid: sid.clone(),
                            track_sid: track.sid.clone(),
                            muted: publication.muted,
                        });
                    }
                }
                None => {
                    let publication = TrackPublication::entfernt(track);
                    bestehend
                        .tracks
                        .insert(track.sid.clone(), publication.clone());
                    aenderungen.push(StoreAenderung::TrackVeroeffentlicht {
                        participant_sid: sid.clone(),
                        publication,
                    });
                }
            }
        }

        if bestehend.attribute_uebernehmen(info) {
            aenderungen.push(StoreAenderung::TeilnehmerAktualisiert(bestehend.clone()));
        }
        bestehend.zustand_ableiten();
        aenderungen
    }

    /// Gleicht alle entfernten Teilnehmer mit einem Server-Schnappschuss ab
    ///
    /// Nicht mehr gemeldete Teilnehmer werden entfernt.
    pub fn abgleichen(&self, teilnehmer: &[ParticipantInfo]) -> Vec<StoreAenderung> {
        let gemeldet: HashSet<&ParticipantSid> = teilnehmer.iter().map(|p| &p.sid).collect();
        let weg: Vec<ParticipantSid> = self
            .inner
            .read()
            .entfernt
            .keys()
            .filter(|s| !gemeldet.contains(s))
            .cloned()
            .collect();

        let mut aenderungen: Vec<StoreAenderung> = weg
            .iter()
            .filter_map(|sid| self.entfernen(sid))
            .map(StoreAenderung::TeilnehmerVerlassen)
            .collect();
        for info in teilnehmer {
            aenderungen.extend(self.upsert(info));
        }
        aenderungen
    }

    /// Entfernt einen Teilnehmer; unbekannte SIDs liefern `None`
    pub fn entfernen(&self, sid: &ParticipantSid) -> Option<Participant> {
        let mut inner = self.inner.write();
        inner.vorgemerkt.remove(sid);
        let mut p = inner.entfernt.remove(sid)?;
        p.state = ParticipantState::Disconnected;
        Some(p)
    }

    /// Entfernt alle entfernten Teilnehmer und den lokalen
    pub fn leeren(&self) -> Vec<Participant> {
        let mut inner = self.inner.write();
        inner.lokal = None;
        inner.vorgemerkt.clear();
        std::mem::take(&mut inner.entfernt)
            .into_values()
            .map(|mut p| {
                p.state = ParticipantState::Disconnected;
                p
            })
            .collect()
    }

    pub fn teilnehmer(&self, sid: &ParticipantSid) -> Option<Participant> {
        self.inner.read().entfernt.get(sid).cloned()
    }

    pub fn entfernte(&self) -> Vec<Participant> {
        self.inner.read().entfernt.values().cloned().collect()
    }

    // -----------------------------------------------------------------------
    // Tracks entfernter Teilnehmer
    // -----------------------------------------------------------------------

    /// Fuegt eine Publikation hinzu; ist sie bekannt, werden nur die Angaben uebernommen
    ///
    /// Ist der Teilnehmer noch unbekannt, wird der Track vorgemerkt.
    pub fn track_hinzufuegen(
        &self,
        participant_sid: &ParticipantSid,
        info: &TrackInfo,
    ) -> Option<StoreAenderung> {
        let mut inner = self.inner.write();
        if inner.lokal.as_ref().is_some_and(|p| &p.sid == participant_sid) {
            return None;
        }
        if !inner.entfernt.contains_key(participant_sid) {
            tracing::debug!(
                participant = %participant_sid,
                track_sid = %info.sid,
                "Track vor dem Teilnehmer angekommen, vorgemerkt"
            );
            inner
                .vorgemerkt
                .entry(participant_sid.clone())
                .or_default()
                .insert(info.sid.clone(), info.clone());
            return None;
        }
        let p = inner.entfernt.get_mut(participant_sid)?;
        if let Some(bestehend) = p.tracks.get_mut(&info.sid) {
            bestehend.info_uebernehmen(info);
            return None;
        }
        let publication = TrackPublication::entfernt(info);
        p.tracks.insert(info.sid.clone(), publication.clone());
        p.zustand_ableiten();
        Some(StoreAenderung::TrackVeroeffentlicht {
            participant_sid: participant_sid.clone(),
            publication,
        })
    }

    pub fn track_entfernen(
        &self,
        participant_sid: Option<&ParticipantSid>,
        track_sid: &TrackSid,
    ) -> Option<StoreAenderung> {
        let mut inner = self.inner.write();
        if inner.track_suchen(participant_sid, track_sid).is_none() {
            for (sid, tracks) in inner.vorgemerkt.iter_mut() {
                if participant_sid.map_or(true, |p| p == sid) {
                    tracks.remove(track_sid);
                }
            }
            inner.vorgemerkt.retain(|_, tracks| !tracks.is_empty());
            return None;
        }
        let p = inner.track_suchen(participant_sid, track_sid)?;
        let publication = p.tracks.remove(track_sid)?;
        p.zustand_ableiten();
        Some(StoreAenderung::TrackZurueckgezogen {
            participant_sid: p.sid.clone(),
            publication,
        })
    }

    /// Sucht eine entfernte Publikation
    pub fn track_finden(&self, track_sid: &TrackSid) -> Option<(ParticipantSid, TrackPublication)> {
        let inner = self.inner.read();
        inner.entfernt.values().find_map(|p| {
            p.tracks
                .get(track_sid)
                .map(|t| (p.sid.clone(), t.clone()))
        })
    }

    pub fn track_fuer_consumer(&self, consumer_id: &ConsumerId) -> Option<TrackSid> {
        let inner = self.inner.read();
        inner
            .entfernt
            .values()
            .flat_map(|p| p.tracks.values())
            .find(|t| t.consumer_id.as_ref() == Some(consumer_id))
            .map(|t| t.sid.clone())
    }

    /// Alle entfernten Publikationen, optional nur die nicht abonnierten
    pub fn entfernte_tracks(&self, nur_offene: bool) -> Vec<(ParticipantSid, TrackPublication)> {
        let inner = self.inner.read();
        inner
            .entfernt
            .values()
            .flat_map(|p| p.tracks.values().map(move |t| (p.sid.clone(), t.clone())))
            .filter(|(_, t)| !nur_offene || !t.subscribed)
            .collect()
    }

    /// Markiert eine Publikation als abonniert
    pub fn abo_setzen(
        &self,
        track_sid: &TrackSid,
        consumer_id: ConsumerId,
        track: Arc<dyn MediaTrack>,
    ) -> Option<(ParticipantSid, TrackPublication)> {
        let mut inner = self.inner.write();
        let p = inner.track_suchen(None, track_sid)?;
        let publication = p.tracks.get_mut(track_sid)?;
        publication.abonnieren(consumer_id, track);
        Some((p.sid.clone(), publication.clone()))
    }

    /// Loest ein Abo; liefert die Publikation mit der alten Consumer-ID
    pub fn abo_entfernen(&self, track_sid: &TrackSid) -> Option<(ParticipantSid, TrackPublication)> {
        let mut inner = self.inner.write();
        let p = inner.track_suchen(None, track_sid)?;
        let publication = p.tracks.get_mut(track_sid)?;
        if !publication.subscribed {
            return None;
        }
        let vorher = publication.clone();
        publication.abo_loesen();
        Some((p.sid.clone(), vorher))
    }

    /// Loest alle Abos, etwa wenn die Transporte neu aufgebaut werden
    pub fn abos_zuruecksetzen(&self) -> Vec<(ParticipantSid, TrackPublication)> {
        let mut inner = self.inner.write();
        let mut geloest = Vec::new();
        for p in inner.entfernt.values_mut() {
            for publication in p.tracks.values_mut().filter(|t| t.subscribed) {
                geloest.push((p.sid.clone(), publication.clone()));
                publication.abo_loesen();
            }
        }
        geloest
    }

    /// Setzt den Stumm-Zustand; auch fuer lokale Publikationen
    pub fn stumm_setzen(
        &self,
        participant_sid: Option<&ParticipantSid>,
        track_sid: &TrackSid,
        muted: bool,
    ) -> Option<StoreAenderung> {
        let mut inner = self.inner.write();
        let lokal_treffer = inner
            .lokal
            .as_ref()
            .is_some_and(|p| p.tracks.contains_key(track_sid));
        let p = if lokal_treffer {
            inner.lokal.as_mut()?
        } else {
            inner.track_suchen(participant_sid, track_sid)?
        };
        let publication = p.tracks.get_mut(track_sid)?;
        if publication.muted == muted {
            return None;
        }
        publication.muted = muted;
        Some(StoreAenderung::TrackStumm {
            participant_sid: p.sid.clone(),
            track_sid: track_sid.clone(),
            muted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use salon_core::{MediaKind, ProducerId};
    use salon_media::sim::SimTrack;
    use std::collections::HashMap;

    fn track(sid: &str) -> TrackInfo {
        TrackInfo {
            sid: TrackSid::new(sid),
            kind: MediaKind::Audio,
            source: TrackSource::Microphone,
            name: String::new(),
            muted: false,
            simulcast: false,
            producer_id: Some(ProducerId::new(format!("P{sid}"))),
        }
    }

    fn teilnehmer(sid: &str, tracks: Vec<TrackInfo>) -> ParticipantInfo {
        ParticipantInfo {
            sid: ParticipantSid::new(sid),
            identity: sid.to_lowercase(),
            name: String::new(),
            metadata: HashMap::new(),
            tracks,
        }
    }

    #[test]
    fn upsert_ist_idempotent() {
        let store = ParticipantStore::neu();
        let info = teilnehmer("PA_a", vec![track("T1")]);

        let erste = store.upsert(&info);
        assert!(matches!(erste.as_slice(), [StoreAenderung::TeilnehmerBeigetreten(p)]
            if p.state == ParticipantState::Active && p.tracks.len() == 1));
        assert!(store.upsert(&info).is_empty());
        assert_eq!(store.entfernte().len(), 1);
    }

    #[test]
    fn upsert_gleicht_tracks_ab() {
        let store = ParticipantStore::neu();
        store.upsert(&teilnehmer("PA_a", vec![track("T1")]));

        let mut stumm = track("T1");
        stumm.muted = true;
        let aenderungen = store.upsert(&teilnehmer("PA_a", vec![stumm, track("T2")]));
        assert_eq!(aenderungen.len(), 2);
        assert!(aenderungen.iter().any(|a| matches!(a,
            StoreAenderung::TrackStumm { muted: true, .. })));
        assert!(aenderungen.iter().any(|a| matches!(a,
            StoreAenderung::TrackVeroeffentlicht { publication, .. } if publication.sid.as_str() == "T2")));

        let aenderungen = store.upsert(&teilnehmer("PA_a", vec![]));
        assert_eq!(aenderungen.len(), 2);
        let p = store.teilnehmer(&ParticipantSid::new("PA_a")).unwrap();
        assert_eq!(p.state, ParticipantState::Joined);
    }

    #[test]
    fn abgleich_entfernt_fehlende_teilnehmer() {
        let store = ParticipantStore::neu();
        store.upsert(&teilnehmer("PA_a", vec![]));
        store.upsert(&teilnehmer("PA_b", vec![]));

        let aenderungen = store.abgleichen(&[teilnehmer("PA_b", vec![]), teilnehmer("PA_c", vec![])]);
        assert!(aenderungen.iter().any(|a| matches!(a,
            StoreAenderung::TeilnehmerVerlassen(p)
                if p.sid.as_str() == "PA_a" && p.state == ParticipantState::Disconnected)));
        assert!(aenderungen.iter().any(|a| matches!(a,
            StoreAenderung::TeilnehmerBeigetreten(p) if p.sid.as_str() == "PA_c")));
        assert_eq!(store.entfernte().len(), 2);
    }

    #[test]
    fn lokaler_teilnehmer_wird_nicht_als_entfernter_gefuehrt() {
        let store = ParticipantStore::neu();
        store.lokal_setzen(&teilnehmer("PA_me", vec![track("T9")]));
        assert!(store.upsert(&teilnehmer("PA_me", vec![])).is_empty());
        assert!(store.entfernte().is_empty());
        // Server-Tracks des lokalen Teilnehmers werden ignoriert
        assert!(store.lokal().unwrap().tracks.is_empty());
    }

    #[test]
    fn abo_setzen_und_loesen() {
        let store = ParticipantStore::neu();
        store.upsert(&teilnehmer("PA_a", vec![track("T1")]));
        let sid = TrackSid::new("T1");

        let (_, p) = store
            .abo_setzen(&sid, ConsumerId::new("C1"), SimTrack::neu(MediaKind::Audio, "r"))
            .unwrap();
        assert!(p.subscribed && p.track.is_some());
        assert_eq!(store.track_fuer_consumer(&ConsumerId::new("C1")), Some(sid.clone()));

        let (_, vorher) = store.abo_entfernen(&sid).unwrap();
        assert_eq!(vorher.consumer_id, Some(ConsumerId::new("C1")));
        assert!(store.abo_entfernen(&sid).is_none());
        let (_, jetzt) = store.track_finden(&sid).unwrap();
        assert!(!jetzt.subscribed && jetzt.track.is_none());
    }

    #[test]
    fn track_operationen_sind_idempotent() {
        let store = ParticipantStore::neu();
        let a = ParticipantSid::new("PA_a");
        store.upsert(&teilnehmer("PA_a", vec![]));

        assert!(store.track_hinzufuegen(&a, &track("T1")).is_some());
        assert!(store.track_hinzufuegen(&a, &track("T1")).is_none());
        assert!(store.stumm_setzen(None, &TrackSid::new("T1"), true).is_some());
        assert!(store.stumm_setzen(None, &TrackSid::new("T1"), true).is_none());
        assert!(store.track_entfernen(None, &TrackSid::new("T1")).is_some());
        assert!(store.track_entfernen(Some(&a), &TrackSid::new("T1")).is_none());
    }

    #[test]
    fn track_vor_teilnehmer_wird_nachgereicht() {
        let store = ParticipantStore::neu();
        let x = ParticipantSid::new("PA_x");

        assert!(store.track_hinzufuegen(&x, &track("T2")).is_none());
        assert!(store.track_hinzufuegen(&x, &track("T3")).is_none());
        assert!(store.entfernte().is_empty());
        // zurueckgezogen bevor der Teilnehmer kam
        assert!(store.track_entfernen(Some(&x), &TrackSid::new("T3")).is_none());

        let aenderungen = store.upsert(&teilnehmer("PA_x", vec![]));
        assert!(matches!(aenderungen.as_slice(), [StoreAenderung::TeilnehmerBeigetreten(p)]
            if p.tracks.len() == 1
                && p.tracks.contains_key(&TrackSid::new("T2"))
                && p.state == ParticipantState::Active));

        // Vormerkung ist verbraucht
        store.entfernen(&x);
        let aenderungen = store.upsert(&teilnehmer("PA_x", vec![]));
        assert!(matches!(aenderungen.as_slice(), [StoreAenderung::TeilnehmerBeigetreten(p)]
            if p.tracks.is_empty()));
    }

    #[test]
    fn vormerkung_verfaellt_mit_dem_teilnehmer() {
        let store = ParticipantStore::neu();
        let x = ParticipantSid::new("PA_x");
        store.track_hinzufuegen(&x, &track("T2"));

        assert!(store.entfernen(&x).is_none());
        let aenderungen = store.upsert(&teilnehmer("PA_x", vec![]));
        assert!(matches!(aenderungen.as_slice(), [StoreAenderung::TeilnehmerBeigetreten(p)]
            if p.tracks.is_empty()));
    }
}
