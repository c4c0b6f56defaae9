//! Producer-Verwaltung
//!
//! Veroeffentlicht lokale Tracks ueber den Send-Transport. Die Engine fragt
//! beim ersten `produce` die DTLS-Verbindung an und danach ueber den
//! Produce-Callback das eigentliche `publish`:
//!
//! ```text
//! publish_track(track)
//!   -> EngineTransport::produce
//!        -> TransportConnectionManager::produce
//!             -> ProducerManager::beim_server_anlegen
//!                  publish --> track_published (requestId | lokale SID + Quelle)
//!   <- PublishedTrack { producer_id, track_sid }
//! ```
//!
//! Endet ein veroeffentlichter Track von aussen, wird er automatisch
//! zurueckgezogen und ein [`ProducerEreignis::Beendet`] gemeldet.

use dashmap::DashMap;
use parking_lot::RwLock;
use salon_core::{EventBus, ListenerId, ParticipantSid, ProducerId, TrackSid, TrackSource};
use salon_protocol::{ClientMessage, ServerMessage, TrackInfo};
use salon_signaling::{CorrelationKey, SignalingClient};
use serde_json::json;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;

use crate::device::MediaTrack;
use crate::engine::{EngineProducer, ProduceOptions, ProduceRequest};
use crate::error::{MediaError, MediaResult};
use crate::transport_manager::TransportManager;

/// Optionen fuer [`ProducerManager::publish_track`]
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub source: TrackSource,
    pub simulcast: bool,
    pub name: Option<String>,
}

/// Ein veroeffentlichter lokaler Track
#[derive(Debug, Clone)]
pub struct PublishedTrack {
    pub producer_id: ProducerId,
    pub track_sid: TrackSid,
    pub info: TrackInfo,
    pub track: Arc<dyn MediaTrack>,
}

/// Ereignisse des Producer-Managers
#[derive(Debug, Clone)]
pub enum ProducerEreignis {
    /// Der Track endete von aussen, der Producer wurde zurueckgezogen
    Beendet {
        producer_id: ProducerId,
        track_sid: TrackSid,
        source: TrackSource,
    },
}

struct LokalerProducer {
    producer: Arc<dyn EngineProducer>,
    info: TrackInfo,
    /// Beendet die Ueberwachung des Track-Endes
    abbruch: Option<oneshot::Sender<()>>,
}

impl LokalerProducer {
    fn veroeffentlicht(&self) -> PublishedTrack {
        PublishedTrack {
            producer_id: self.producer.id().clone(),
            track_sid: self.info.sid.clone(),
            info: self.info.clone(),
            track: self.producer.track(),
        }
    }
}

const LOKALE_TRACK_ID: &str = "local_track_id";

pub struct ProducerManager {
    transporte: Arc<TransportManager>,
    signaling: SignalingClient,
    producers: DashMap<ProducerId, LokalerProducer>,
    /// Server-Antworten zwischen `publish` und dem Ende von `produce`,
    /// zusammen mit der ID des lokalen Tracks
    ausstehend: DashMap<ProducerId, (String, TrackInfo)>,
    lokale_sid: RwLock<Option<ParticipantSid>>,
    zeitlimit: Duration,
    ereignisse: EventBus<ProducerEreignis>,
}

impl ProducerManager {
    /// Erstellt den Manager und registriert ihn als Produce-Callback
    pub fn neu(
        transporte: Arc<TransportManager>,
        signaling: SignalingClient,
        publish_timeout: Duration,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            transporte,
            signaling,
            producers: DashMap::new(),
            ausstehend: DashMap::new(),
            lokale_sid: RwLock::new(None),
            zeitlimit: publish_timeout,
            ereignisse: EventBus::neu("producer"),
        });

        let schwach = Arc::downgrade(&manager);
        manager
            .transporte
            .verbindungen()
            .set_produce_callback(Arc::new(move |anfrage| {
                let schwach = schwach.clone();
                Box::pin(async move {
                    let manager = schwach
                        .upgrade()
                        .ok_or_else(|| MediaError::Geschlossen("Producer-Manager".into()))?;
                    manager.beim_server_anlegen(anfrage).await
                })
            }));
        manager
    }

    /// SID des lokalen Teilnehmers, fuer die Zuordnung von `track_published`
    pub fn lokale_sid_setzen(&self, sid: Option<ParticipantSid>) {
        *self.lokale_sid.write() = sid;
    }

    async fn beim_server_anlegen(&self, mut anfrage: ProduceRequest) -> MediaResult<ProducerId> {
        let source = anfrage
            .app_data
            .get("source")
            .and_then(|s| serde_json::from_value::<TrackSource>(s.clone()).ok())
            .unwrap_or_default();
        // nur lokal gebraucht, nicht an den Server
        let track_id = anfrage
            .app_data
            .as_object_mut()
            .and_then(|m| m.remove(LOKALE_TRACK_ID))
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_default();
        let schluessel = CorrelationKey::TrackPublished {
            participant_sid: self.lokale_sid.read().clone(),
            source,
        };

        let antwort = self
            .signaling
            .anfragen(
                ClientMessage::Publish {
                    transport_id: anfrage.transport_id,
                    kind: anfrage.kind,
                    rtp_parameters: anfrage.rtp_parameters,
                    app_data: anfrage.app_data,
                },
                Some(schluessel),
                Some(self.zeitlimit),
            )
            .await
            .map_err(|e| MediaError::aus_anfrage(e, "produce"))?;

        let ServerMessage::TrackPublished { track, .. } = antwort else {
            return Err(MediaError::UnerwarteteAntwort(antwort.typ().into()));
        };
        let id = track.producer_id();
        self.ausstehend.insert(id.clone(), (track_id, track));
        Ok(id)
    }

    /// Veroeffentlicht einen lokalen Track ueber den Send-Transport
    pub async fn publish_track(
        self: &Arc<Self>,
        track: Arc<dyn MediaTrack>,
        optionen: PublishOptions,
    ) -> MediaResult<PublishedTrack> {
        let transport = self
            .transporte
            .send_transport()
            .ok_or(MediaError::TransportFehlt(salon_core::TransportDirection::Send))?;
        let name = optionen
            .name
            .clone()
            .unwrap_or_else(|| track.label().to_string());
        let kind = track.kind();

        let ergebnis = transport
            .produce(ProduceOptions {
                track: Arc::clone(&track),
                simulcast: optionen.simulcast,
                app_data: json!({
                    "source": optionen.source,
                    "name": name,
                    LOKALE_TRACK_ID: track.id(),
                }),
            })
            .await;
        let producer = match ergebnis {
            Ok(producer) => producer,
            Err(e) => {
                // Die Server-Antwort kann schon eingetroffen sein
                self.ausstehend
                    .retain(|_, (track_id, _)| track_id.as_str() != track.id());
                return Err(e);
            }
        };

        let id = producer.id().clone();
        let info = self
            .ausstehend
            .remove(&id)
            .map(|(_, (_, info))| info)
            .unwrap_or_else(|| TrackInfo {
                sid: TrackSid::new(id.as_str()),
                kind,
                source: optionen.source,
                name,
                muted: false,
                simulcast: optionen.simulcast,
                producer_id: Some(id.clone()),
            });

        let abbruch = self.ende_ueberwachen(id.clone(), &track);
        let eintrag = LokalerProducer {
            producer,
            info,
            abbruch: Some(abbruch),
        };
        let veroeffentlicht = eintrag.veroeffentlicht();
        self.producers.insert(id.clone(), eintrag);

        tracing::info!(
            producer_id = %id,
            track_sid = %veroeffentlicht.track_sid,
            source = %optionen.source,
            "Track veroeffentlicht"
        );
        Ok(veroeffentlicht)
    }

    fn ende_ueberwachen(self: &Arc<Self>, id: ProducerId, track: &Arc<dyn MediaTrack>) -> oneshot::Sender<()> {
        let (abbruch_tx, abbruch_rx) = oneshot::channel();
        let mut ende = track.ended();
        let schwach: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            tokio::select! {
                _ = abbruch_rx => {}
                beendet = async { ende.wait_for(|e| *e).await.is_ok() } => {
                    if beendet {
                        if let Some(manager) = schwach.upgrade() {
                            manager.track_beendet(&id);
                        }
                    }
                }
            }
        });
        abbruch_tx
    }

    fn track_beendet(&self, id: &ProducerId) {
        let Some(eintrag) = self.entfernen(id, true) else {
            return;
        };
        tracing::info!(producer_id = %id, "Track von aussen beendet, Producer zurueckgezogen");
        self.ereignisse.senden(&ProducerEreignis::Beendet {
            producer_id: id.clone(),
            track_sid: eintrag.info.sid.clone(),
            source: eintrag.info.source,
        });
    }

    fn entfernen(&self, id: &ProducerId, signalisieren: bool) -> Option<LokalerProducer> {
        let (_, mut eintrag) = self.producers.remove(id)?;
        if let Some(abbruch) = eintrag.abbruch.take() {
            let _ = abbruch.send(());
        }
        eintrag.producer.close();
        if signalisieren {
            if let Err(e) = self.signaling.senden(ClientMessage::Unpublish {
                producer_id: id.clone(),
                track_sid: Some(eintrag.info.sid.clone()),
            }) {
                tracing::warn!(producer_id = %id, fehler = %e, "unpublish nicht gesendet");
            }
        }
        Some(eintrag)
    }

    /// Zieht einen Track zurueck; unbekannte IDs werden ignoriert
    pub fn unpublish_track(&self, id: &ProducerId) -> bool {
        let entfernt = self.entfernen(id, true).is_some();
        if entfernt {
            tracing::info!(producer_id = %id, "Track zurueckgezogen");
        }
        entfernt
    }

    /// Schliesst alle Producer ohne den Server zu benachrichtigen
    pub fn close_all(&self) {
        let ids: Vec<ProducerId> = self.producers.iter().map(|e| e.key().clone()).collect();
        for id in &ids {
            self.entfernen(id, false);
        }
        self.ausstehend.clear();
        if !ids.is_empty() {
            tracing::debug!(anzahl = ids.len(), "Alle Producer geschlossen");
        }
    }

    pub fn producer(&self, id: &ProducerId) -> Option<PublishedTrack> {
        self.producers.get(id).map(|e| e.veroeffentlicht())
    }

    pub fn producer_fuer_quelle(&self, source: TrackSource) -> Option<PublishedTrack> {
        self.producers
            .iter()
            .find(|e| e.info.source == source)
            .map(|e| e.veroeffentlicht())
    }

    pub fn producer_fuer_track(&self, track_sid: &TrackSid) -> Option<PublishedTrack> {
        self.producers
            .iter()
            .find(|e| &e.info.sid == track_sid)
            .map(|e| e.veroeffentlicht())
    }

    pub fn anzahl(&self) -> usize {
        self.producers.len()
    }

    pub fn on_event<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ProducerEreignis) + Send + Sync + 'static,
    {
        self.ereignisse.abonnieren(listener)
    }

    pub fn abmelden(&self, id: ListenerId) -> bool {
        self.ereignisse.abmelden(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimTrack;
    use crate::testutil::{transporte, warten_bis};
    use salon_core::MediaKind;
    use salon_signaling::mock::{MockSfu, MockSfuOptionen};

    async fn manager(optionen: MockSfuOptionen) -> (Arc<ProducerManager>, MockSfu) {
        let (sfu, signaling, transporte) = transporte(optionen).await;
        let m = ProducerManager::neu(transporte, signaling, Duration::from_millis(200));
        m.lokale_sid_setzen(Some(ParticipantSid::new("PA_local")));
        (m, sfu)
    }

    fn kamera() -> PublishOptions {
        PublishOptions {
            source: TrackSource::Camera,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn veroeffentlichen_speichert_producer_mit_track_sid() {
        let (m, sfu) = manager(MockSfuOptionen::default()).await;
        let track = SimTrack::neu(MediaKind::Video, "cam");

        let p = m.publish_track(track, kamera()).await.unwrap();
        assert_eq!(p.info.source, TrackSource::Camera);
        assert_eq!(p.producer_id, p.info.producer_id());
        assert_eq!(m.anzahl(), 1);
        assert!(m.producer_fuer_quelle(TrackSource::Camera).is_some());

        // erst die DTLS-Verbindung, dann publish
        let typen: Vec<_> = sfu.empfangene().iter().map(|n| n.typ()).collect();
        let connect = typen.iter().position(|t| *t == "connect_transport").unwrap();
        let publish = typen.iter().position(|t| *t == "publish").unwrap();
        assert!(connect < publish);
    }

    #[tokio::test]
    async fn zuruckziehen_sendet_unpublish_und_unbekannt_ist_noop() {
        let (m, sfu) = manager(MockSfuOptionen::default()).await;
        let p = m
            .publish_track(SimTrack::neu(MediaKind::Audio, "mic"), PublishOptions {
                source: TrackSource::Microphone,
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(m.unpublish_track(&p.producer_id));
        assert!(!m.unpublish_track(&p.producer_id));
        assert!(!m.unpublish_track(&ProducerId::new("gibt-es-nicht")));
        assert_eq!(m.anzahl(), 0);

        assert!(warten_bis(|| !sfu.empfangene_vom_typ("unpublish").is_empty()).await);
        let unpublish = sfu.empfangene_vom_typ("unpublish");
        assert_eq!(unpublish.len(), 1);
        assert_eq!(
            unpublish[0],
            ClientMessage::Unpublish {
                producer_id: p.producer_id.clone(),
                track_sid: Some(p.track_sid.clone()),
            }
        );
    }

    #[tokio::test]
    async fn publish_ohne_antwort_laeuft_in_zeitlimit() {
        let (m, _sfu) = manager(MockSfuOptionen {
            publish_ignorieren: true,
            ..Default::default()
        })
        .await;
        let ergebnis = m
            .publish_track(SimTrack::neu(MediaKind::Video, "cam"), kamera())
            .await;
        assert!(matches!(ergebnis, Err(MediaError::Zeitlimit(_))));
        assert_eq!(m.anzahl(), 0);
    }

    #[tokio::test]
    async fn track_ende_zieht_automatisch_zurueck() {
        let (m, sfu) = manager(MockSfuOptionen::default()).await;
        let ereignisse = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let e = Arc::clone(&ereignisse);
        m.on_event(move |ev| e.lock().push(ev.clone()));

        let track = SimTrack::neu(MediaKind::Video, "screen");
        let p = m
            .publish_track(track.clone(), PublishOptions {
                source: TrackSource::ScreenShare,
                ..Default::default()
            })
            .await
            .unwrap();

        track.beenden();
        assert!(warten_bis(|| m.anzahl() == 0).await);
        assert!(matches!(
            ereignisse.lock().as_slice(),
            [ProducerEreignis::Beendet { producer_id, source: TrackSource::ScreenShare, .. }]
                if *producer_id == p.producer_id
        ));
        assert!(warten_bis(|| sfu.empfangene_vom_typ("unpublish").len() == 1).await);
    }

    #[tokio::test]
    async fn close_all_ohne_signaling() {
        let (m, sfu) = manager(MockSfuOptionen::default()).await;
        m.publish_track(SimTrack::neu(MediaKind::Video, "cam"), kamera())
            .await
            .unwrap();
        m.close_all();
        assert_eq!(m.anzahl(), 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(sfu.empfangene_vom_typ("unpublish").is_empty());
    }

    #[tokio::test]
    async fn produce_fehler_nach_server_antwort_raeumt_auf() {
        let (m, sfu) = manager(MockSfuOptionen {
            publish_ignorieren: true,
            ..Default::default()
        })
        .await;
        let veroeffentlichen = {
            let m = Arc::clone(&m);
            tokio::spawn(async move {
                m.publish_track(SimTrack::neu(MediaKind::Video, "cam"), kamera())
                    .await
            })
        };
        assert!(warten_bis(|| sfu.empfangene_vom_typ("publish").len() == 1).await);

        // Transport geht zu, waehrend die Antwort unterwegs ist
        m.transporte.send_transport().unwrap().close();
        sfu.senden(ServerMessage::TrackPublished {
            participant_sid: ParticipantSid::new("PA_local"),
            track: TrackInfo {
                sid: TrackSid::new("TR_spaet"),
                kind: MediaKind::Video,
                source: TrackSource::Camera,
                name: "cam".into(),
                muted: false,
                simulcast: false,
                producer_id: Some(ProducerId::new("PTR_spaet")),
            },
        });

        let ergebnis = veroeffentlichen.await.unwrap();
        assert!(matches!(ergebnis, Err(MediaError::Geschlossen(_))));
        assert!(m.ausstehend.is_empty());
        assert_eq!(m.anzahl(), 0);
    }

    #[tokio::test]
    async fn lokale_track_id_geht_nicht_an_den_server() {
        let (m, sfu) = manager(MockSfuOptionen::default()).await;
        m.publish_track(SimTrack::neu(MediaKind::Video, "cam"), kamera())
            .await
            .unwrap();

        let publish = sfu.empfangene_vom_typ("publish");
        let [ClientMessage::Publish { app_data, .. }] = publish.as_slice() else {
            panic!("publish fehlt");
        };
        assert!(app_data.get(LOKALE_TRACK_ID).is_none());
        assert_eq!(app_data["name"], "cam");
        assert!(m.ausstehend.is_empty());
    }

    #[tokio::test]
    async fn ohne_send_transport_abgelehnt() {
        let (sfu, signaling, transporte) = transporte(MockSfuOptionen::default()).await;
        transporte.close();
        let m = ProducerManager::neu(transporte, signaling, Duration::from_secs(1));
        let ergebnis = m
            .publish_track(SimTrack::neu(MediaKind::Video, "cam"), kamera())
            .await;
        assert!(matches!(ergebnis, Err(MediaError::TransportFehlt(_))));
        assert!(sfu.empfangene_vom_typ("publish").is_empty());
    }
}
