//! Raum-Client
//!
//! Fassade ueber Signaling, Medien-Managern und Teilnehmer-Speicher. Alle
//! Server-Nachrichten und Zustandswechsel laufen ueber eine Warteschlange
//! und werden von genau einer Task in Eingangsreihenfolge angewendet:
//!
//! ```text
//! SignalingClient --on_message/on_state--> mpsc --> verteilen()
//!                                                      |
//!                       ParticipantStore <-------------+--> RoomEvent-Bus
//!                       MediaController  <-- spawn (subscribe, data consumer, rejoin)
//! ```
//!
//! Intent-Methoden (`enable_camera`, `subscribe_to_track`, ...) liefern
//! ihren Fehler an den Aufrufer und melden ihn zusaetzlich als
//! [`RoomEvent::Error`].

use bytes::Bytes;
use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use salon_core::{
    ConnectionState, DataChannelKind, DataProducerId, EventBus, ListenerId, ParticipantSid,
    TrackSid, TrackSource,
};
use salon_media::{
    DataChannelOptions, DataConsumerAnkuendigung, MediaDevices, MediaEngine, MediaError,
    ProducerEreignis,
};
use salon_protocol::{ClientMessage, RoomInfo, ServerMessage};
use salon_signaling::{Connector, SignalingClient, SignalingError};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::RoomOptions;
use crate::connection_controller::{Beitritt, ConnectionController};
use crate::error::{RoomError, RoomResult};
use crate::events::{DisconnectReason, RoomEvent, RoomEventKind};
use crate::media_controller::MediaController;
use crate::participant::Participant;
use crate::participant_store::{ParticipantStore, StoreAenderung};
use crate::publication::TrackPublication;
use crate::track_controller::TrackController;

/// Optionen fuer [`RoomClient::subscribe_to_track`]
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// Ersetzt `subscribe_timeout` fuer dieses Abo
    pub zeitlimit: Option<Duration>,
}

enum Eingang {
    Nachricht(ServerMessage),
    Zustand(ConnectionState),
    /// Wird beantwortet sobald alles davor Eingereihte angewendet ist
    Sync(oneshot::Sender<()>),
}

struct Laufzeit {
    listener: Vec<ListenerId>,
    eingang: mpsc::UnboundedSender<Eingang>,
    verteiler: JoinHandle<()>,
}

struct RoomInner {
    signaling: SignalingClient,
    verbindung: ConnectionController,
    medien: Arc<MediaController>,
    tracks: TrackController,
    store: Arc<ParticipantStore>,
    ereignisse: EventBus<RoomEvent>,
    optionen: RoomOptions,
    zustand: RwLock<ConnectionState>,
    laufzeit: Mutex<Option<Laufzeit>>,
}

/// Client fuer genau einen Raum
///
/// Klonen teilt den Zustand.
#[derive(Clone)]
pub struct RoomClient {
    inner: Arc<RoomInner>,
}

impl RoomClient {
    pub fn neu(
        connector: Arc<dyn Connector>,
        engine: Arc<dyn MediaEngine>,
        geraete: Arc<dyn MediaDevices>,
        optionen: RoomOptions,
    ) -> Self {
        let signaling = SignalingClient::neu(connector, optionen.reconnect.clone());
        let ereignisse: EventBus<RoomEvent> = EventBus::neu("room");
        let store = Arc::new(ParticipantStore::neu());

        let medien = {
            let ereignisse = ereignisse.clone();
            Arc::new(MediaController::neu(
                engine,
                signaling.clone(),
                &optionen,
                move || {
                    ereignisse.senden(&RoomEvent::TransportsConnected);
                },
            ))
        };
        let tracks = TrackController::neu(
            Arc::clone(&medien),
            geraete,
            Arc::clone(&store),
            optionen.simulcast,
        );

        let inner = Arc::new(RoomInner {
            verbindung: ConnectionController::neu(signaling.clone(), optionen.clone()),
            signaling,
            medien,
            tracks,
            store,
            ereignisse,
            optionen,
            zustand: RwLock::new(ConnectionState::Disconnected),
            laufzeit: Mutex::new(None),
        });

        let schwach = Arc::downgrade(&inner);
        inner.medien.producer().on_event(move |ereignis| {
            let ProducerEreignis::Beendet { track_sid, .. } = ereignis;
            if let Some(inner) = schwach.upgrade() {
                if let Some(publication) = inner.tracks.lokalen_track_beendet(track_sid) {
                    inner
                        .ereignisse
                        .senden(&RoomEvent::LocalTrackUnpublished(publication));
                }
            }
        });

        Self { inner }
    }

    // -----------------------------------------------------------------------
    // Verbindung
    // -----------------------------------------------------------------------

    /// Verbindet und tritt dem Raum bei
    ///
    /// Ist der Raum bereits verbunden, wird die bestehende Sitzung geliefert.
    pub async fn connect(&self) -> RoomResult<RoomInfo> {
        {
            let mut zustand = self.inner.zustand.write();
            match *zustand {
                ConnectionState::Connected => {
                    if let Some(sitzung) = self.inner.verbindung.sitzung() {
                        return Ok(sitzung.room);
                    }
                }
                ConnectionState::Connecting | ConnectionState::Reconnecting => {
                    return Err(RoomError::VerbindungLaeuft);
                }
                ConnectionState::Disconnected | ConnectionState::Error => {}
            }
            *zustand = ConnectionState::Connecting;
        }
        self.inner
            .ereignisse
            .senden(&RoomEvent::ConnectionStateChanged(ConnectionState::Connecting));

        match self.verbinden().await {
            Ok(room) => {
                self.inner.zustand_setzen(ConnectionState::Connected);
                self.inner
                    .ereignisse
                    .senden(&RoomEvent::Connected { room: room.clone() });
                if self.inner.optionen.auto_subscribe {
                    self.inner.alle_abonnieren_im_hintergrund();
                }
                Ok(room)
            }
            Err(e) => {
                tracing::warn!(fehler = %e, "Beitritt fehlgeschlagen");
                self.inner.laufzeit_stoppen();
                self.inner.abbauen(false).await;
                self.inner.zustand_setzen(ConnectionState::Disconnected);
                self.inner.fehler_melden(&e);
                Err(e)
            }
        }
    }

    async fn verbinden(&self) -> RoomResult<RoomInfo> {
        self.inner.laufzeit_starten();
        self.inner.signaling.connect().await?;
        let Beitritt { room, .. } = self.inner.verbindung.join(false).await?;
        // `joined` wurde vor der Antwort eingereiht
        self.inner.synchronisieren().await?;
        Ok(room)
    }

    /// Verlaesst den Raum und baut alles ab
    ///
    /// Danach erhalten registrierte Listener keine Ereignisse mehr.
    pub async fn disconnect(&self) {
        let laufzeit_aktiv = self.inner.laufzeit.lock().is_some();
        if !laufzeit_aktiv && self.connection_state() == ConnectionState::Disconnected {
            self.inner.ereignisse.leeren();
            return;
        }
        self.inner.laufzeit_stoppen();
        self.inner.abbauen(true).await;
        self.inner.zustand_setzen(ConnectionState::Disconnected);
        self.inner.ereignisse.senden(&RoomEvent::Disconnected {
            grund: DisconnectReason::Client,
        });
        self.inner.ereignisse.leeren();
        tracing::info!("Raum verlassen");
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.zustand.read()
    }

    pub fn room_info(&self) -> Option<RoomInfo> {
        self.inner.verbindung.sitzung().map(|s| s.room)
    }

    /// Zeitpunkt des letzten Beitritts
    pub fn joined_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.inner.verbindung.sitzung().map(|s| s.joined_at)
    }

    /// Wartet bis Send- und Recv-Transport verbunden sind
    pub async fn wait_for_transports_connected(&self) -> RoomResult<()> {
        self.inner
            .medien
            .transporte()
            .verbindungen()
            .wait_for_transports_connected()
            .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Lokale Tracks
    // -----------------------------------------------------------------------

    pub async fn enable_camera(&self, device_id: Option<String>) -> RoomResult<TrackPublication> {
        self.aktivieren(TrackSource::Camera, device_id).await
    }

    pub fn disable_camera(&self) -> Option<TrackPublication> {
        self.deaktivieren(TrackSource::Camera)
    }

    pub async fn enable_microphone(
        &self,
        device_id: Option<String>,
    ) -> RoomResult<TrackPublication> {
        self.aktivieren(TrackSource::Microphone, device_id).await
    }

    pub fn disable_microphone(&self) -> Option<TrackPublication> {
        self.deaktivieren(TrackSource::Microphone)
    }

    pub async fn enable_screen_share(&self) -> RoomResult<TrackPublication> {
        self.aktivieren(TrackSource::ScreenShare, None).await
    }

    pub fn disable_screen_share(&self) -> Option<TrackPublication> {
        self.deaktivieren(TrackSource::ScreenShare)
    }

    async fn aktivieren(
        &self,
        source: TrackSource,
        device_id: Option<String>,
    ) -> RoomResult<TrackPublication> {
        let ergebnis = async {
            // Vor dem Beitritt sind keine Faehigkeiten bekannt
            let faehigkeiten = self.inner.verbindung.rtp_capabilities();
            if faehigkeiten.is_none() {
                return Err(RoomError::FaehigkeitenFehlen);
            }
            self.inner.verbunden_pruefen()?;
            self.inner
                .tracks
                .aktivieren(source, device_id, faehigkeiten.as_ref())
                .await
        }
        .await;

        match ergebnis {
            Ok((publication, neu)) => {
                if neu {
                    self.inner
                        .ereignisse
                        .senden(&RoomEvent::LocalTrackPublished(publication.clone()));
                }
                Ok(publication)
            }
            Err(e) => {
                self.inner.fehler_melden(&e);
                Err(e)
            }
        }
    }

    fn deaktivieren(&self, source: TrackSource) -> Option<TrackPublication> {
        let publication = self.inner.tracks.deaktivieren(source)?;
        self.inner
            .ereignisse
            .senden(&RoomEvent::LocalTrackUnpublished(publication.clone()));
        Some(publication)
    }

    // -----------------------------------------------------------------------
    // Abos
    // -----------------------------------------------------------------------

    /// Abonniert einen entfernten Track
    ///
    /// Unbekannte SIDs scheitern mit [`RoomError::TrackUnbekannt`] ohne
    /// Anfrage an den Server.
    pub async fn subscribe_to_track(
        &self,
        track_sid: &TrackSid,
        optionen: SubscribeOptions,
    ) -> RoomResult<TrackPublication> {
        let ergebnis = self.inner.abonnieren(track_sid, optionen.zeitlimit).await;
        if let Err(e) = &ergebnis {
            self.inner.fehler_melden(e);
        }
        ergebnis
    }

    /// Beendet ein Abo; `false` wenn der Track nicht abonniert war
    pub fn unsubscribe_from_track(&self, track_sid: &TrackSid) -> bool {
        self.inner.abo_beenden(track_sid)
    }

    /// Abonniert alle noch nicht abonnierten entfernten Tracks
    ///
    /// Liefert die Anzahl neuer Abos; einzelne Fehler werden als Ereignis gemeldet.
    pub async fn subscribe_to_all_tracks(&self) -> usize {
        self.inner.alle_abonnieren().await
    }

    pub fn unsubscribe_from_all_tracks(&self) -> usize {
        self.inner
            .store
            .entfernte_tracks(false)
            .into_iter()
            .filter(|(_, t)| t.subscribed)
            .filter(|(_, t)| self.inner.abo_beenden(&t.sid))
            .count()
    }

    // -----------------------------------------------------------------------
    // Daten
    // -----------------------------------------------------------------------

    /// Sendet Daten an den Raum
    ///
    /// Ist ein Datenkanal der Art offen, geht die Nachricht darueber,
    /// sonst als `data`-Nachricht ueber das Signaling.
    pub fn send_data(&self, payload: serde_json::Value, kind: DataChannelKind) -> RoomResult<()> {
        let ergebnis = self.inner.daten_senden(payload, kind);
        if let Err(e) = &ergebnis {
            self.inner.fehler_melden(e);
        }
        ergebnis
    }

    /// Oeffnet einen Datenkanal der Art, falls noch keiner offen ist
    pub async fn open_data_channel(&self, kind: DataChannelKind) -> RoomResult<DataProducerId> {
        let ergebnis = async {
            self.inner.verbunden_pruefen()?;
            let faehigkeiten = self.inner.verbindung.rtp_capabilities();
            self.inner.medien.sicherstellen(faehigkeiten.as_ref()).await?;
            let daten = self.inner.medien.daten();
            if let Some(offen) = daten.producer_fuer_art(kind) {
                return Ok(offen.id().clone());
            }
            let producer = daten
                .create_data_producer(kind, DataChannelOptions::default())
                .await?;
            Ok(producer.id().clone())
        }
        .await;
        if let Err(e) = &ergebnis {
            self.inner.fehler_melden(e);
        }
        ergebnis
    }

    // -----------------------------------------------------------------------
    // Zustand und Ereignisse
    // -----------------------------------------------------------------------

    /// Alle entfernten Teilnehmer
    pub fn participants(&self) -> Vec<Participant> {
        self.inner.store.entfernte()
    }

    pub fn participant(&self, sid: &ParticipantSid) -> Option<Participant> {
        self.inner.store.teilnehmer(sid)
    }

    pub fn local_participant(&self) -> Option<Participant> {
        self.inner.store.lokal()
    }

    /// Listener fuer eine Ereignisart
    pub fn on<F>(&self, kind: RoomEventKind, listener: F) -> ListenerId
    where
        F: Fn(&RoomEvent) + Send + Sync + 'static,
    {
        self.inner.ereignisse.abonnieren(move |ereignis| {
            if ereignis.kind() == kind {
                listener(ereignis);
            }
        })
    }

    /// Listener fuer alle Ereignisse
    pub fn on_any<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&RoomEvent) + Send + Sync + 'static,
    {
        self.inner.ereignisse.abonnieren(listener)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.ereignisse.abmelden(id)
    }
}

// ---------------------------------------------------------------------------
// Laufzeit
// ---------------------------------------------------------------------------

async fn verteilen(schwach: Weak<RoomInner>, mut eingang: mpsc::UnboundedReceiver<Eingang>) {
    while let Some(e) = eingang.recv().await {
        let Some(inner) = schwach.upgrade() else {
            break;
        };
        match e {
            Eingang::Nachricht(nachricht) => inner.nachricht_anwenden(nachricht),
            Eingang::Zustand(zustand) => inner.signaling_zustand(zustand),
            Eingang::Sync(antwort) => {
                let _ = antwort.send(());
            }
        }
    }
}

impl RoomInner {
    fn laufzeit_starten(self: &Arc<Self>) {
        self.laufzeit_stoppen();
        let (tx, rx) = mpsc::unbounded_channel();

        let nachrichten = {
            let tx = tx.clone();
            self.signaling.on_message(move |nachricht| {
                let _ = tx.send(Eingang::Nachricht(nachricht.clone()));
            })
        };
        let zustaende = {
            let tx = tx.clone();
            self.signaling.on_state(move |zustand| {
                let _ = tx.send(Eingang::Zustand(zustand));
            })
        };
        let verteiler = tokio::spawn(verteilen(Arc::downgrade(self), rx));

        *self.laufzeit.lock() = Some(Laufzeit {
            listener: vec![nachrichten, zustaende],
            eingang: tx,
            verteiler,
        });
    }

    /// Beendet die Verarbeitung; bereits eingereihte Nachrichten verfallen
    fn laufzeit_stoppen(&self) {
        let Some(laufzeit) = self.laufzeit.lock().take() else {
            return;
        };
        for id in laufzeit.listener {
            self.signaling.abmelden(id);
        }
        laufzeit.verteiler.abort();
    }

    async fn synchronisieren(&self) -> RoomResult<()> {
        let (tx, rx) = oneshot::channel();
        let gesendet = self
            .laufzeit
            .lock()
            .as_ref()
            .is_some_and(|l| l.eingang.send(Eingang::Sync(tx)).is_ok());
        if !gesendet {
            return Err(RoomError::Getrennt);
        }
        rx.await.map_err(|_| RoomError::Getrennt)
    }

    /// Stoppt Aufnahmen, schliesst Medien und leert den Speicher
    async fn abbauen(&self, leave: bool) {
        self.tracks.alle_stoppen();
        self.medien.schliessen();
        for teilnehmer in self.store.leeren() {
            self.ereignisse
                .senden(&RoomEvent::ParticipantDisconnected(teilnehmer));
        }
        self.medien.producer().lokale_sid_setzen(None);
        if leave {
            self.verbindung.leave();
        } else {
            self.verbindung.vergessen();
        }
        self.signaling.disconnect().await;
    }

    fn zustand_setzen(&self, neu: ConnectionState) {
        let alt = std::mem::replace(&mut *self.zustand.write(), neu);
        if alt != neu {
            tracing::debug!(alt = %alt, neu = %neu, "Raum-Zustand");
            self.ereignisse
                .senden(&RoomEvent::ConnectionStateChanged(neu));
        }
    }

    fn zustand(&self) -> ConnectionState {
        *self.zustand.read()
    }

    fn verbunden_pruefen(&self) -> RoomResult<()> {
        match self.zustand() {
            ConnectionState::Connected => Ok(()),
            _ => Err(RoomError::NichtVerbunden),
        }
    }

    fn fehler_melden(&self, fehler: &RoomError) {
        self.ereignisse.senden(&RoomEvent::Error(fehler.clone()));
    }

    // -----------------------------------------------------------------------
    // Server-Nachrichten
    // -----------------------------------------------------------------------

    fn nachricht_anwenden(self: &Arc<Self>, nachricht: ServerMessage) {
        match nachricht {
            ServerMessage::Joined {
                room,
                participant,
                other_participants,
                rtp_capabilities,
            } => {
                let beitritt = Beitritt {
                    room,
                    participant,
                    other_participants,
                    rtp_capabilities,
                };
                self.verbindung.sitzung_setzen(&beitritt);
                self.store.lokal_setzen(&beitritt.participant);
                self.medien
                    .producer()
                    .lokale_sid_setzen(Some(beitritt.participant.sid.clone()));
                let aenderungen = self.store.abgleichen(&beitritt.other_participants);
                self.aenderungen_anwenden(aenderungen);
            }
            ServerMessage::ParticipantJoined { participant } => {
                let aenderungen = self.store.upsert(&participant);
                self.aenderungen_anwenden(aenderungen);
            }
            ServerMessage::ParticipantUpdated { participant } => {
                if self.store.ist_lokal(&participant.sid) {
                    if let Some(lokal) = self.store.lokal_aktualisieren(&participant) {
                        self.ereignisse.senden(&RoomEvent::ParticipantUpdated(lokal));
                    }
                } else {
                    let aenderungen = self.store.upsert(&participant);
                    self.aenderungen_anwenden(aenderungen);
                }
            }
            ServerMessage::ParticipantLeft { participant_sid } => {
                if let Some(teilnehmer) = self.store.entfernen(&participant_sid) {
                    self.aenderungen_anwenden(vec![StoreAenderung::TeilnehmerVerlassen(
                        teilnehmer,
                    )]);
                }
            }
            ServerMessage::TrackPublished {
                participant_sid,
                track,
            } => {
                // Eigene Tracks verwaltet der TrackController
                if self.store.ist_lokal(&participant_sid) {
                    return;
                }
                match self.store.track_hinzufuegen(&participant_sid, &track) {
                    Some(aenderung) => self.aenderungen_anwenden(vec![aenderung]),
                    None => tracing::debug!(
                        participant = %participant_sid,
                        track_sid = %track.sid,
                        "track_published ohne Aenderung"
                    ),
                }
            }
            ServerMessage::TrackUnpublished {
                participant_sid,
                track_sid,
            } => {
                if participant_sid
                    .as_ref()
                    .is_some_and(|p| self.store.ist_lokal(p))
                {
                    return;
                }
                if let Some(aenderung) = self
                    .store
                    .track_entfernen(participant_sid.as_ref(), &track_sid)
                {
                    self.aenderungen_anwenden(vec![aenderung]);
                }
            }
            ServerMessage::TrackUnsubscribed {
                consumer_id,
                track_sid,
            } => {
                let track_sid = track_sid.or_else(|| {
                    consumer_id
                        .as_ref()
                        .and_then(|c| self.store.track_fuer_consumer(c))
                });
                let Some(track_sid) = track_sid else {
                    return;
                };
                if let Some((participant_sid, publication)) = self.store.abo_entfernen(&track_sid)
                {
                    if let Some(cid) = &publication.consumer_id {
                        self.medien.consumer().lokal_schliessen(cid);
                    }
                    self.ereignisse.senden(&RoomEvent::TrackUnsubscribed {
                        participant_sid,
                        publication,
                    });
                }
            }
            ServerMessage::TrackMuted {
                participant_sid,
                track_sid,
            } => self.stumm_anwenden(participant_sid, track_sid, true),
            ServerMessage::TrackUnmuted {
                participant_sid,
                track_sid,
            } => self.stumm_anwenden(participant_sid, track_sid, false),
            ServerMessage::TrackSubscribed { id, producer_id, .. } => {
                tracing::debug!(consumer_id = %id, producer_id = %producer_id, "track_subscribed");
            }
            ServerMessage::DataConsumerCreated {
                id,
                data_producer_id,
                sctp_stream_parameters,
                label,
                protocol,
                ..
            } => {
                if !self.medien.ist_initialisiert() {
                    tracing::debug!(data_consumer_id = %id, "Daten-Consumer ohne Transporte ignoriert");
                    return;
                }
                let ankuendigung = DataConsumerAnkuendigung {
                    id,
                    data_producer_id,
                    sctp_stream_parameters,
                    label,
                    protocol,
                };
                let medien = Arc::clone(&self.medien);
                tokio::spawn(async move {
                    let id = ankuendigung.id.clone();
                    if let Err(e) = medien.daten().add_data_consumer(ankuendigung).await {
                        tracing::warn!(data_consumer_id = %id, fehler = %e, "Daten-Consumer nicht angelegt");
                    }
                });
            }
            ServerMessage::Data {
                participant_sid,
                payload,
                kind,
            } => {
                self.ereignisse.senden(&RoomEvent::DataReceived {
                    participant_sid,
                    payload,
                    kind,
                });
            }
            ServerMessage::Error { error } => {
                tracing::warn!(code = %error.code, nachricht = %error.message, "Serverfehler");
            }
            ServerMessage::TransportCreated { .. }
            | ServerMessage::TransportConnected { .. }
            | ServerMessage::DataProducerCreated { .. }
            | ServerMessage::Pong { .. } => {}
        }
    }

    fn stumm_anwenden(
        self: &Arc<Self>,
        participant_sid: Option<ParticipantSid>,
        track_sid: TrackSid,
        muted: bool,
    ) {
        if let Some(aenderung) = self
            .store
            .stumm_setzen(participant_sid.as_ref(), &track_sid, muted)
        {
            self.aenderungen_anwenden(vec![aenderung]);
        }
    }

    fn aenderungen_anwenden(self: &Arc<Self>, aenderungen: Vec<StoreAenderung>) {
        let mut neue_tracks = Vec::new();

        for aenderung in aenderungen {
            match aenderung {
                StoreAenderung::TeilnehmerBeigetreten(teilnehmer) => {
                    tracing::info!(participant = %teilnehmer.sid, identity = %teilnehmer.identity, "Teilnehmer beigetreten");
                    let tracks: Vec<TrackPublication> =
                        teilnehmer.tracks.values().cloned().collect();
                    let sid = teilnehmer.sid.clone();
                    self.ereignisse
                        .senden(&RoomEvent::ParticipantConnected(teilnehmer));
                    for publication in tracks {
                        neue_tracks.push(publication.sid.clone());
                        self.ereignisse.senden(&RoomEvent::TrackPublished {
                            participant_sid: sid.clone(),
                            publication,
                        });
                    }
                }
                StoreAenderung::TeilnehmerAktualisiert(teilnehmer) => {
                    self.ereignisse
                        .senden(&RoomEvent::ParticipantUpdated(teilnehmer));
                }
                StoreAenderung::TeilnehmerVerlassen(teilnehmer) => {
                    tracing::info!(participant = %teilnehmer.sid, "Teilnehmer gegangen");
                    for publication in teilnehmer.tracks.values().filter(|t| t.subscribed) {
                        self.abo_aufraeumen(&teilnehmer.sid, publication);
                    }
                    self.ereignisse
                        .senden(&RoomEvent::ParticipantDisconnected(teilnehmer));
                }
                StoreAenderung::TrackVeroeffentlicht {
                    participant_sid,
                    publication,
                } => {
                    neue_tracks.push(publication.sid.clone());
                    self.ereignisse.senden(&RoomEvent::TrackPublished {
                        participant_sid,
                        publication,
                    });
                }
                StoreAenderung::TrackZurueckgezogen {
                    participant_sid,
                    publication,
                } => {
                    if publication.subscribed {
                        self.abo_aufraeumen(&participant_sid, &publication);
                    }
                    self.ereignisse.senden(&RoomEvent::TrackUnpublished {
                        participant_sid,
                        publication,
                    });
                }
                StoreAenderung::TrackStumm {
                    participant_sid,
                    track_sid,
                    muted,
                } => {
                    let ereignis = if muted {
                        RoomEvent::TrackMuted {
                            participant_sid,
                            track_sid,
                        }
                    } else {
                        RoomEvent::TrackUnmuted {
                            participant_sid,
                            track_sid,
                        }
                    };
                    self.ereignisse.senden(&ereignis);
                }
            }
        }

        if self.optionen.auto_subscribe && self.zustand() == ConnectionState::Connected {
            for track_sid in neue_tracks {
                let inner = Arc::clone(self);
                tokio::spawn(async move {
                    let _ = inner.abonnieren_melden(&track_sid).await;
                });
            }
        }
    }

    /// Schliesst den Consumer eines verschwundenen Tracks
    fn abo_aufraeumen(&self, participant_sid: &ParticipantSid, publication: &TrackPublication) {
        if let Some(cid) = &publication.consumer_id {
            self.medien.consumer().lokal_schliessen(cid);
        }
        let mut geloest = publication.clone();
        geloest.abo_loesen();
        self.ereignisse.senden(&RoomEvent::TrackUnsubscribed {
            participant_sid: participant_sid.clone(),
            publication: geloest,
        });
    }

    // -----------------------------------------------------------------------
    // Signaling-Zustand
    // -----------------------------------------------------------------------

    fn signaling_zustand(self: &Arc<Self>, zustand: ConnectionState) {
        match (self.zustand(), zustand) {
            (ConnectionState::Connected, ConnectionState::Reconnecting) => {
                tracing::warn!("Signaling unterbrochen, warte auf Wiederverbindung");
                self.zustand_setzen(ConnectionState::Reconnecting);
                self.ereignisse.senden(&RoomEvent::Reconnecting);
            }
            (ConnectionState::Reconnecting, ConnectionState::Connected) => {
                tokio::spawn(Arc::clone(self).wieder_beitreten());
            }
            (ConnectionState::Connected | ConnectionState::Reconnecting, ConnectionState::Error) => {
                tokio::spawn(
                    Arc::clone(self)
                        .verbindung_verloren(RoomError::Signaling(SignalingError::SitzungBeendet)),
                );
            }
            _ => {}
        }
    }

    async fn wieder_beitreten(self: Arc<Self>) {
        if let Err(e) = self.verbindung.join(true).await {
            tracing::warn!(fehler = %e, "Erneuter Beitritt fehlgeschlagen");
            self.verbindung_verloren(e).await;
            return;
        }
        if self.synchronisieren().await.is_err() {
            return;
        }

        if self.medien.ist_initialisiert() {
            let laufend = self.tracks.fuer_neuaufbau();
            self.medien.schliessen();
            for (participant_sid, publication) in self.store.abos_zuruecksetzen() {
                let mut geloest = publication;
                geloest.abo_loesen();
                self.ereignisse.senden(&RoomEvent::TrackUnsubscribed {
                    participant_sid,
                    publication: geloest,
                });
            }

            let faehigkeiten = self.verbindung.rtp_capabilities();
            for (alt, track) in laufend {
                self.ereignisse
                    .senden(&RoomEvent::LocalTrackUnpublished(alt.clone()));
                match self
                    .tracks
                    .erneut_veroeffentlichen(alt.source, track, faehigkeiten.as_ref())
                    .await
                {
                    Ok(neu) => {
                        self.ereignisse
                            .senden(&RoomEvent::LocalTrackPublished(neu));
                    }
                    Err(e) => {
                        tracing::warn!(source = %alt.source, fehler = %e, "Track nicht erneut veroeffentlicht");
                        self.fehler_melden(&e);
                    }
                }
            }
        }

        self.zustand_setzen(ConnectionState::Connected);
        self.ereignisse.senden(&RoomEvent::Reconnected);
        tracing::info!("Raum wiederverbunden");
        if self.optionen.auto_subscribe {
            self.alle_abonnieren_im_hintergrund();
        }
    }

    async fn verbindung_verloren(self: Arc<Self>, fehler: RoomError) {
        self.laufzeit_stoppen();
        self.abbauen(false).await;
        self.zustand_setzen(ConnectionState::Disconnected);
        self.fehler_melden(&fehler);
        self.ereignisse.senden(&RoomEvent::Disconnected {
            grund: DisconnectReason::Verbindungsverlust,
        });
    }

    // -----------------------------------------------------------------------
    // Abos
    // -----------------------------------------------------------------------

    async fn abonnieren(
        &self,
        track_sid: &TrackSid,
        zeitlimit: Option<Duration>,
    ) -> RoomResult<TrackPublication> {
        let (_, publication) = self
            .store
            .track_finden(track_sid)
            .ok_or_else(|| RoomError::TrackUnbekannt(track_sid.clone()))?;
        if publication.subscribed {
            return Ok(publication);
        }
        self.verbunden_pruefen()?;
        let producer_id = publication
            .producer_id
            .clone()
            .ok_or_else(|| RoomError::TrackUnbekannt(track_sid.clone()))?;

        let faehigkeiten = self.verbindung.rtp_capabilities();
        self.medien.sicherstellen(faehigkeiten.as_ref()).await?;
        let consumer = self.medien.consumer();
        let abo = match zeitlimit {
            Some(dauer) => consumer.subscribe_mit_zeitlimit(&producer_id, dauer).await?,
            None => consumer.subscribe(&producer_id).await?,
        };

        let Some((participant_sid, publication)) =
            self.store
                .abo_setzen(track_sid, abo.consumer_id.clone(), Arc::clone(&abo.track))
        else {
            // Track waehrend des Abos verschwunden
            consumer.unsubscribe(&abo.consumer_id);
            return Err(RoomError::TrackUnbekannt(track_sid.clone()));
        };
        self.ereignisse.senden(&RoomEvent::TrackSubscribed {
            participant_sid,
            publication: publication.clone(),
        });
        Ok(publication)
    }

    async fn abonnieren_melden(&self, track_sid: &TrackSid) -> RoomResult<TrackPublication> {
        let ergebnis = self.abonnieren(track_sid, None).await;
        match &ergebnis {
            // Ein anderes Abo desselben Tracks laeuft bereits
            Err(RoomError::Media(MediaError::LaeuftBereits(_))) => {
                tracing::debug!(track_sid = %track_sid, "Abo laeuft bereits");
            }
            Err(e) => {
                tracing::warn!(track_sid = %track_sid, fehler = %e, "Abo fehlgeschlagen");
                self.fehler_melden(e);
            }
            Ok(_) => {}
        }
        ergebnis
    }

    async fn alle_abonnieren(&self) -> usize {
        let offen = self.store.entfernte_tracks(true);
        let ergebnisse = join_all(
            offen
                .iter()
                .map(|(_, publication)| self.abonnieren_melden(&publication.sid)),
        )
        .await;
        ergebnisse.iter().filter(|e| e.is_ok()).count()
    }

    fn alle_abonnieren_im_hintergrund(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let anzahl = inner.alle_abonnieren().await;
            tracing::debug!(anzahl, "Automatisch abonniert");
        });
    }

    fn abo_beenden(&self, track_sid: &TrackSid) -> bool {
        let Some((participant_sid, vorher)) = self.store.abo_entfernen(track_sid) else {
            return false;
        };
        if let Some(cid) = &vorher.consumer_id {
            self.medien.consumer().unsubscribe(cid);
        }
        let mut publication = vorher;
        publication.abo_loesen();
        self.ereignisse.senden(&RoomEvent::TrackUnsubscribed {
            participant_sid,
            publication,
        });
        true
    }

    // -----------------------------------------------------------------------
    // Daten
    // -----------------------------------------------------------------------

    fn daten_senden(&self, payload: serde_json::Value, kind: DataChannelKind) -> RoomResult<()> {
        self.verbunden_pruefen()?;
        if self.medien.daten().producer_fuer_art(kind).is_some() {
            let bytes = serde_json::to_vec(&payload)
                .map_err(|e| RoomError::intern(format!("Daten nicht serialisierbar: {e}")))?;
            if self.medien.daten().senden(kind, Bytes::from(bytes))? {
                return Ok(());
            }
        }
        self.signaling.senden(ClientMessage::Data { payload, kind })?;
        Ok(())
    }
}
