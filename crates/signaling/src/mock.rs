//! In-Memory-Signaling fuer Tests
//!
//! [`mock_paar`] liefert einen [`MockConnector`] fuer den Client und einen
//! [`MockServer`] der jede geoeffnete Verbindung als [`MockServerLink`]
//! herausgibt. Darauf baut [`MockSfu`] auf: ein automatisch antwortender
//! Server der das Handshake-Protokoll eines SFU nachbildet.

use async_trait::async_trait;
use futures_util::{sink, stream};
use parking_lot::Mutex;
use salon_core::{
    ConsumerId, DataProducerId, MediaKind, ParticipantSid, ProducerId, RoomSid, TrackSid, TrackSource,
    TransportDirection, TransportId,
};
use salon_protocol::{
    wire, ClientMessage, DtlsFingerprint, DtlsParameters, DtlsRole, Envelope, ErrorBody,
    IceCandidate, IceParameters, ParticipantInfo, RoomInfo, RtpCapabilities, SctpParameters,
    ServerMessage, TrackInfo,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::connector::{Connector, Link};
use crate::error::{SignalingError, SignalingResult};

// ---------------------------------------------------------------------------
// Connector / Server
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Plan {
    abzulehnen: usize,
    immer_ablehnen: bool,
    versuche: Vec<Instant>,
}

/// Connector der In-Memory-Verbindungen oeffnet
#[derive(Clone)]
pub struct MockConnector {
    plan: Arc<Mutex<Plan>>,
    neue_links: mpsc::UnboundedSender<MockServerLink>,
}

/// Serverseite: nimmt die vom Client geoeffneten Verbindungen an
pub struct MockServer {
    neue_links: mpsc::UnboundedReceiver<MockServerLink>,
}

/// Erstellt ein verbundenes Connector/Server-Paar
pub fn mock_paar() -> (MockConnector, MockServer) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        MockConnector {
            plan: Arc::new(Mutex::new(Plan::default())),
            neue_links: tx,
        },
        MockServer { neue_links: rx },
    )
}

impl MockConnector {
    /// Die naechsten `anzahl` Verbindungsversuche schlagen fehl
    pub fn naechste_ablehnen(&self, anzahl: usize) {
        self.plan.lock().abzulehnen = anzahl;
    }

    /// Alle folgenden Verbindungsversuche schlagen fehl (oder wieder nicht)
    pub fn immer_ablehnen(&self, ablehnen: bool) {
        self.plan.lock().immer_ablehnen = ablehnen;
    }

    /// Zeitpunkte aller bisherigen Verbindungsversuche
    pub fn versuche(&self) -> Vec<Instant> {
        self.plan.lock().versuche.clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self) -> SignalingResult<Link> {
        {
            let mut plan = self.plan.lock();
            plan.versuche.push(Instant::now());
            if plan.immer_ablehnen {
                return Err(SignalingError::Verbindung("Mock lehnt ab".into()));
            }
            if plan.abzulehnen > 0 {
                plan.abzulehnen -= 1;
                return Err(SignalingError::Verbindung("Mock lehnt ab".into()));
            }
        }

        let (zum_server, vom_client) = mpsc::unbounded_channel::<String>();
        let (zum_client, vom_server) = mpsc::unbounded_channel::<String>();

        self.neue_links
            .send(MockServerLink {
                eingang: vom_client,
                ausgang: Some(zum_client),
            })
            .map_err(|_| SignalingError::Verbindung("Mock-Server beendet".into()))?;

        let sink = sink::unfold(zum_server, |tx, frame: String| async move {
            tx.send(frame)
                .map_err(|_| SignalingError::VerbindungGetrennt)?;
            Ok::<_, SignalingError>(tx)
        });
        let stream = stream::unfold(vom_server, |mut rx| async move {
            rx.recv().await.map(|frame| (Ok(frame), rx))
        });

        Ok(Link {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }

    fn ziel(&self) -> String {
        "mock://".to_string()
    }
}

impl MockServer {
    /// Wartet auf die naechste vom Client geoeffnete Verbindung
    ///
    /// `None` wenn alle Connectoren verworfen wurden.
    pub async fn annehmen(&mut self) -> Option<MockServerLink> {
        self.neue_links.recv().await
    }
}

/// Serverseitiges Ende einer Mock-Verbindung
pub struct MockServerLink {
    eingang: mpsc::UnboundedReceiver<String>,
    ausgang: Option<mpsc::UnboundedSender<String>>,
}

impl MockServerLink {
    /// Naechste Client-Nachricht; `None` wenn der Client die Verbindung schloss
    pub async fn empfangen(&mut self) -> Option<Envelope<ClientMessage>> {
        let text = self.eingang.recv().await?;
        wire::decode_client(&text).ok()
    }

    /// Sendet eine Notification (ohne requestId)
    pub fn senden(&self, nachricht: ServerMessage) {
        self.antworten(None, nachricht);
    }

    /// Sendet eine Antwort, optional mit gespiegelter requestId
    pub fn antworten(&self, request_id: Option<u32>, nachricht: ServerMessage) {
        let env = Envelope {
            request_id,
            message: nachricht,
        };
        if let Ok(text) = wire::encode_server(&env) {
            self.roh_senden(&text);
        }
    }

    /// Sendet einen beliebigen Text-Frame
    pub fn roh_senden(&self, text: &str) {
        if let Some(ausgang) = &self.ausgang {
            let _ = ausgang.send(text.to_string());
        }
    }

    /// Schliesst die Verbindung von Serverseite
    pub fn schliessen(mut self) {
        self.ausgang = None;
    }
}

// ---------------------------------------------------------------------------
// MockSfu
// ---------------------------------------------------------------------------

/// Verhalten des automatisch antwortenden Servers
#[derive(Debug, Clone)]
pub struct MockSfuOptionen {
    /// requestId in Antworten zurueckspiegeln
    pub request_id_spiegeln: bool,
    /// SID des lokalen Teilnehmers im `joined`
    pub lokale_sid: ParticipantSid,
    /// Andere Teilnehmer im `joined`
    pub andere_teilnehmer: Vec<ParticipantInfo>,
    /// RTP-Faehigkeiten im `joined`; `None` simuliert einen Server ohne Medien
    pub rtp_capabilities: Option<RtpCapabilities>,
    /// `publish` bleibt unbeantwortet
    pub publish_ignorieren: bool,
    /// `subscribe` bleibt unbeantwortet
    pub subscribe_ignorieren: bool,
    /// `connect_transport` fuer diese Richtung mit `error` beantworten
    pub connect_fehler: Option<TransportDirection>,
}

impl Default for MockSfuOptionen {
    fn default() -> Self {
        Self {
            request_id_spiegeln: true,
            lokale_sid: ParticipantSid::new("PA_local"),
            andere_teilnehmer: Vec::new(),
            rtp_capabilities: Some(standard_faehigkeiten()),
            publish_ignorieren: false,
            subscribe_ignorieren: false,
            connect_fehler: None,
        }
    }
}

/// Router-Faehigkeiten mit Opus und VP8
pub fn standard_faehigkeiten() -> RtpCapabilities {
    RtpCapabilities::new(serde_json::json!({
        "codecs": [
            { "kind": "audio", "mimeType": "audio/opus", "clockRate": 48000, "channels": 2 },
            { "kind": "video", "mimeType": "video/VP8", "clockRate": 90000 }
        ],
        "headerExtensions": []
    }))
}

struct SfuZustand {
    empfangen: Vec<ClientMessage>,
    richtungen: HashMap<TransportId, TransportDirection>,
    track_arten: HashMap<ProducerId, MediaKind>,
    zaehler: u32,
    aktiver_link: Option<mpsc::UnboundedSender<Envelope<ServerMessage>>>,
    ausstehend: VecDeque<Envelope<ServerMessage>>,
}

/// Automatisch antwortender Fake-SFU auf Basis von [`MockServer`]
///
/// Nimmt jede neue Verbindung an und beantwortet Join, Transport-,
/// Publish-, Subscribe- und Datenkanal-Anfragen. Alle empfangenen
/// Nachrichten werden aufgezeichnet.
#[derive(Clone)]
pub struct MockSfu {
    zustand: Arc<Mutex<SfuZustand>>,
    optionen: Arc<Mutex<MockSfuOptionen>>,
}

impl MockSfu {
    /// Startet den Fake-Server und liefert den passenden Connector
    pub fn starten(optionen: MockSfuOptionen) -> (Self, MockConnector) {
        let (connector, mut server) = mock_paar();
        let sfu = Self {
            zustand: Arc::new(Mutex::new(SfuZustand {
                empfangen: Vec::new(),
                richtungen: HashMap::new(),
                track_arten: HashMap::new(),
                zaehler: 0,
                aktiver_link: None,
                ausstehend: VecDeque::new(),
            })),
            optionen: Arc::new(Mutex::new(optionen)),
        };

        let sfu_klon = sfu.clone();
        tokio::spawn(async move {
            while let Some(link) = server.annehmen().await {
                tokio::spawn(sfu_klon.clone().link_bedienen(link));
            }
        });
        (sfu, connector)
    }

    /// Optionen zur Laufzeit aendern
    pub fn optionen_aendern(&self, f: impl FnOnce(&mut MockSfuOptionen)) {
        f(&mut self.optionen.lock());
    }

    /// Alle bisher empfangenen Client-Nachrichten
    pub fn empfangene(&self) -> Vec<ClientMessage> {
        self.zustand.lock().empfangen.clone()
    }

    /// Empfangene Nachrichten eines Typs (Wire-Name)
    pub fn empfangene_vom_typ(&self, typ: &str) -> Vec<ClientMessage> {
        self.zustand
            .lock()
            .empfangen
            .iter()
            .filter(|m| m.typ() == typ)
            .cloned()
            .collect()
    }

    /// Sendet eine Notification ueber die aktuelle Verbindung
    ///
    /// Ohne aktive Verbindung wird sie beim naechsten Connect zugestellt.
    pub fn senden(&self, nachricht: ServerMessage) {
        let mut z = self.zustand.lock();
        let tracks: Vec<&TrackInfo> = match &nachricht {
            ServerMessage::TrackPublished { track, .. } => vec![track],
            ServerMessage::ParticipantJoined { participant }
            | ServerMessage::ParticipantUpdated { participant } => {
                participant.tracks.iter().collect()
            }
            _ => Vec::new(),
        };
        let arten: Vec<(ProducerId, MediaKind)> =
            tracks.into_iter().map(|t| (t.producer_id(), t.kind)).collect();
        z.track_arten.extend(arten);

        let env = Envelope::ohne_id(nachricht);
        let env = match z.aktiver_link.as_ref() {
            Some(tx) => match tx.send(env) {
                Ok(()) => return,
                Err(fehler) => fehler.0,
            },
            None => env,
        };
        z.ausstehend.push_back(env);
    }

    /// Trennt die aktuelle Verbindung serverseitig
    pub fn verbindung_trennen(&self) {
        self.zustand.lock().aktiver_link = None;
    }

    fn naechste_id(&self, praefix: &str) -> String {
        let mut z = self.zustand.lock();
        z.zaehler += 1;
        format!("{praefix}_{}", z.zaehler)
    }

    async fn link_bedienen(self, mut link: MockServerLink) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Envelope<ServerMessage>>();
        {
            let mut z = self.zustand.lock();
            for env in z.ausstehend.drain(..) {
                let _ = tx.send(env);
            }
            z.aktiver_link = Some(tx);
        }

        loop {
            tokio::select! {
                eingehend = link.empfangen() => match eingehend {
                    Some(env) => {
                        for antwort in self.beantworten(env) {
                            link.antworten(antwort.request_id, antwort.message);
                        }
                    }
                    None => return,
                },
                ausgehend = rx.recv() => match ausgehend {
                    Some(env) => link.antworten(env.request_id, env.message),
                    // verbindung_trennen()
                    None => {
                        link.schliessen();
                        return;
                    }
                },
            }
        }
    }

    fn beantworten(&self, env: Envelope<ClientMessage>) -> Vec<Envelope<ServerMessage>> {
        self.zustand.lock().empfangen.push(env.message.clone());
        let optionen = self.optionen.lock().clone();
        let request_id = if optionen.request_id_spiegeln {
            env.request_id
        } else {
            None
        };
        let antwort = |message| Envelope {
            request_id,
            message,
        };

        match env.message {
            ClientMessage::Join { .. } => vec![antwort(ServerMessage::Joined {
                room: RoomInfo {
                    sid: RoomSid::new("RM_test"),
                    name: "test".into(),
                    num_participants: optionen.andere_teilnehmer.len() as u32 + 1,
                    metadata: None,
                },
                participant: ParticipantInfo {
                    sid: optionen.lokale_sid.clone(),
                    identity: "local".into(),
                    name: "Local".into(),
                    metadata: HashMap::new(),
                    tracks: Vec::new(),
                },
                other_participants: optionen.andere_teilnehmer.clone(),
                rtp_capabilities: optionen.rtp_capabilities.clone(),
            })],
            ClientMessage::CreateTransport { direction, .. } => {
                let id = TransportId::new(self.naechste_id(&format!("T{direction}")));
                self.zustand.lock().richtungen.insert(id.clone(), direction);
                vec![antwort(ServerMessage::TransportCreated {
                    id,
                    direction,
                    ice_parameters: IceParameters {
                        username_fragment: "ufrag".into(),
                        password: "pwd".into(),
                        ice_lite: Some(true),
                    },
                    ice_candidates: vec![IceCandidate {
                        foundation: "udpcandidate".into(),
                        priority: 1_076_302_079,
                        address: "127.0.0.1".into(),
                        protocol: "udp".into(),
                        port: 40_000,
                        candidate_type: "host".into(),
                        tcp_type: None,
                    }],
                    dtls_parameters: DtlsParameters {
                        role: DtlsRole::Auto,
                        fingerprints: vec![DtlsFingerprint {
                            algorithm: "sha-256".into(),
                            value: "AA:BB".into(),
                        }],
                    },
                    sctp_parameters: Some(SctpParameters {
                        port: 5000,
                        os: 1024,
                        mis: 1024,
                        max_message_size: 262_144,
                    }),
                })]
            }
            ClientMessage::ConnectTransport { transport_id, .. } => {
                let richtung = self.zustand.lock().richtungen.get(&transport_id).copied();
                if richtung.is_some() && richtung == optionen.connect_fehler {
                    vec![antwort(ServerMessage::Error {
                        error: ErrorBody {
                            code: "dtls_failed".into(),
                            message: "DTLS-Handshake fehlgeschlagen".into(),
                            transport_id: Some(transport_id),
                            producer_id: None,
                        },
                    })]
                } else {
                    vec![antwort(ServerMessage::TransportConnected { transport_id })]
                }
            }
            ClientMessage::Publish { kind, app_data, .. } => {
                if optionen.publish_ignorieren {
                    return Vec::new();
                }
                let source = app_data
                    .get("source")
                    .and_then(|s| serde_json::from_value::<TrackSource>(s.clone()).ok())
                    .unwrap_or_default();
                let name = app_data
                    .get("name")
                    .and_then(|n| n.as_str())
                    .unwrap_or_default()
                    .to_string();
                let nummer = self.naechste_id("TR");
                vec![antwort(ServerMessage::TrackPublished {
                    participant_sid: optionen.lokale_sid.clone(),
                    track: TrackInfo {
                        sid: TrackSid::new(nummer.clone()),
                        kind,
                        source,
                        name,
                        muted: false,
                        simulcast: false,
                        producer_id: Some(ProducerId::new(format!("P{nummer}"))),
                    },
                })]
            }
            ClientMessage::Subscribe { producer_id, .. } => {
                if optionen.subscribe_ignorieren {
                    return Vec::new();
                }
                let kind = self.kind_fuer_producer(&producer_id, &optionen);
                vec![antwort(ServerMessage::TrackSubscribed {
                    id: ConsumerId::new(self.naechste_id("C")),
                    producer_id,
                    kind,
                    rtp_parameters: Default::default(),
                    track_sid: None,
                })]
            }
            ClientMessage::CreateDataProducer { .. } => {
                vec![antwort(ServerMessage::DataProducerCreated {
                    id: DataProducerId::new(self.naechste_id("DP")),
                })]
            }
            ClientMessage::Ping { timestamp_ms } => {
                vec![antwort(ServerMessage::Pong { timestamp_ms })]
            }
            ClientMessage::Leave
            | ClientMessage::Unpublish { .. }
            | ClientMessage::Unsubscribe { .. }
            | ClientMessage::ResumeConsumer { .. }
            | ClientMessage::CloseDataProducer { .. }
            | ClientMessage::Data { .. } => Vec::new(),
        }
    }

    fn kind_fuer_producer(&self, producer_id: &ProducerId, optionen: &MockSfuOptionen) -> MediaKind {
        if let Some(kind) = self.zustand.lock().track_arten.get(producer_id) {
            return *kind;
        }
        optionen
            .andere_teilnehmer
            .iter()
            .flat_map(|p| p.tracks.iter())
            .find(|t| &t.producer_id() == producer_id)
            .map(|t| t.kind)
            .unwrap_or(MediaKind::Video)
    }
}
