//! Gemeinsame Helfer fuer die Raum-Integrationstests

#![allow(dead_code)]

use parking_lot::Mutex;
use salon_core::{MediaKind, ParticipantSid, ProducerId, TrackSid, TrackSource};
use salon_media::sim::{SimDevices, SimEngine};
use salon_protocol::{ParticipantInfo, TrackInfo};
use salon_room::{RoomClient, RoomEvent, RoomEventKind, RoomOptions};
use salon_signaling::mock::{MockConnector, MockSfu, MockSfuOptionen};
use salon_signaling::ReconnectPolicy;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Ein Raum gegen einen automatisch antwortenden Fake-SFU
pub struct Raum {
    pub sfu: MockSfu,
    pub connector: MockConnector,
    pub client: RoomClient,
    pub geraete: Arc<SimDevices>,
    pub ereignisse: Aufzeichnung,
}

pub fn raum(sfu_optionen: MockSfuOptionen, optionen: RoomOptions) -> Raum {
    let (sfu, connector) = MockSfu::starten(sfu_optionen);
    let geraete = Arc::new(SimDevices::neu());
    let client = RoomClient::neu(
        Arc::new(connector.clone()),
        Arc::new(SimEngine::neu()),
        geraete.clone(),
        optionen,
    );
    let ereignisse = Aufzeichnung::an(&client);
    Raum {
        sfu,
        connector,
        client,
        geraete,
        ereignisse,
    }
}

/// Optionen ohne automatisches Abonnieren und mit kurzen Wiederverbindungs-Pausen
pub fn optionen() -> RoomOptions {
    RoomOptions {
        token: "test-token".into(),
        auto_subscribe: false,
        reconnect: ReconnectPolicy {
            basis_verzoegerung_ms: 10,
            max_verzoegerung_ms: 50,
            max_versuche: 3,
        },
        ..RoomOptions::default()
    }
}

pub fn teilnehmer(sid: &str, tracks: Vec<TrackInfo>) -> ParticipantInfo {
    ParticipantInfo {
        sid: ParticipantSid::new(sid),
        identity: sid.to_lowercase(),
        name: sid.to_string(),
        metadata: HashMap::new(),
        tracks,
    }
}

pub fn track(sid: &str, source: TrackSource) -> TrackInfo {
    TrackInfo {
        sid: TrackSid::new(sid),
        kind: source.kind(),
        source,
        name: String::new(),
        muted: false,
        simulcast: false,
        producer_id: Some(ProducerId::new(format!("P_{sid}"))),
    }
}

pub fn video(sid: &str) -> TrackInfo {
    let t = track(sid, TrackSource::Camera);
    assert_eq!(t.kind, MediaKind::Video);
    t
}

/// Wartet bis `bedingung` erfuellt ist, hoechstens zwei Sekunden
pub async fn warten_bis(bedingung: impl Fn() -> bool) -> bool {
    for _ in 0..400 {
        if bedingung() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    bedingung()
}

/// Zeichnet alle Raum-Ereignisse auf
#[derive(Clone, Default)]
pub struct Aufzeichnung {
    liste: Arc<Mutex<Vec<RoomEvent>>>,
}

impl Aufzeichnung {
    pub fn an(client: &RoomClient) -> Self {
        let aufzeichnung = Self::default();
        let liste = Arc::clone(&aufzeichnung.liste);
        client.on_any(move |e| liste.lock().push(e.clone()));
        aufzeichnung
    }

    pub fn alle(&self) -> Vec<RoomEvent> {
        self.liste.lock().clone()
    }

    pub fn arten(&self) -> Vec<RoomEventKind> {
        self.liste.lock().iter().map(|e| e.kind()).collect()
    }

    pub fn anzahl(&self, kind: RoomEventKind) -> usize {
        self.liste.lock().iter().filter(|e| e.kind() == kind).count()
    }

    pub fn enthaelt(&self, kind: RoomEventKind) -> bool {
        self.anzahl(kind) > 0
    }
}
