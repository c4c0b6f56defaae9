//! Integration-Tests: Beitreten, Verlassen, Wiederverbinden

mod common;

use common::{optionen, raum, teilnehmer, track, warten_bis};
use salon_core::{ConnectionState, ParticipantSid, TrackSource};
use salon_media::MediaTrack;
use salon_protocol::{ClientMessage, ServerMessage};
use salon_room::{DisconnectReason, ParticipantState, RoomError, RoomEvent, RoomEventKind};
use salon_signaling::mock::MockSfuOptionen;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[tokio::test]
async fn beitritt_ohne_andere_teilnehmer() {
    let r = raum(MockSfuOptionen::default(), optionen());

    let info = r.client.connect().await.expect("connect fehlgeschlagen");

    assert_eq!(info.sid.as_str(), "RM_test");
    assert!(r.client.participants().is_empty());
    let lokal = r
        .client
        .local_participant()
        .expect("lokaler Teilnehmer fehlt");
    assert!(lokal.is_local);
    assert_eq!(lokal.sid, ParticipantSid::new("PA_local"));
    assert_eq!(r.client.connection_state(), ConnectionState::Connected);
    assert_eq!(r.client.room_info().map(|i| i.name), Some("test".to_string()));
    assert!(r.client.joined_at().is_some());

    let arten = r.ereignisse.arten();
    assert_eq!(
        arten,
        vec![
            RoomEventKind::ConnectionStateChanged,
            RoomEventKind::ConnectionStateChanged,
            RoomEventKind::Connected,
        ]
    );

    let joins = r.sfu.empfangene_vom_typ("join");
    assert!(matches!(
        joins.as_slice(),
        [ClientMessage::Join { token, reconnect: false, .. }] if token == "test-token"
    ));
    r.client.disconnect().await;
}

#[tokio::test]
async fn beitritt_uebernimmt_andere_teilnehmer() {
    let sfu_optionen = MockSfuOptionen {
        andere_teilnehmer: vec![
            teilnehmer("PA_a", vec![track("TR_a", TrackSource::Microphone)]),
            teilnehmer("PA_b", vec![]),
        ],
        ..Default::default()
    };
    let r = raum(sfu_optionen, optionen());
    r.client.connect().await.expect("connect fehlgeschlagen");

    let mut teilnehmer = r.client.participants();
    teilnehmer.sort_by(|a, b| a.sid.cmp(&b.sid));
    assert_eq!(teilnehmer.len(), 2);
    assert_eq!(teilnehmer[0].state, ParticipantState::Active);
    assert_eq!(teilnehmer[1].state, ParticipantState::Joined);
    assert!(teilnehmer.iter().all(|p| !p.is_local));
    let publikation = teilnehmer[0]
        .track(&salon_core::TrackSid::new("TR_a"))
        .expect("Track fehlt");
    assert!(!publikation.subscribed);
    assert!(publikation.track.is_none());

    assert_eq!(r.ereignisse.anzahl(RoomEventKind::ParticipantConnected), 2);
    assert_eq!(r.ereignisse.anzahl(RoomEventKind::TrackPublished), 1);
    r.client.disconnect().await;
}

#[tokio::test]
async fn zweites_connect_liefert_bestehende_sitzung() {
    let r = raum(MockSfuOptionen::default(), optionen());
    r.client.connect().await.expect("connect fehlgeschlagen");
    let info = r.client.connect().await.expect("zweites connect fehlgeschlagen");

    assert_eq!(info.sid.as_str(), "RM_test");
    assert_eq!(r.sfu.empfangene_vom_typ("join").len(), 1);
    r.client.disconnect().await;
}

#[tokio::test]
async fn teilnehmer_kommen_und_gehen() {
    let r = raum(MockSfuOptionen::default(), optionen());
    r.client.connect().await.expect("connect fehlgeschlagen");

    r.sfu.senden(ServerMessage::ParticipantJoined {
        participant: teilnehmer("PA_c", vec![]),
    });
    assert!(warten_bis(|| r.client.participants().len() == 1).await);

    // doppelte Ankuendigung aendert nichts
    r.sfu.senden(ServerMessage::ParticipantJoined {
        participant: teilnehmer("PA_c", vec![]),
    });
    let mut aktualisiert = teilnehmer("PA_c", vec![]);
    aktualisiert.name = "Carla".into();
    r.sfu.senden(ServerMessage::ParticipantUpdated {
        participant: aktualisiert,
    });
    assert!(warten_bis(|| r.ereignisse.enthaelt(RoomEventKind::ParticipantUpdated)).await);
    assert_eq!(r.ereignisse.anzahl(RoomEventKind::ParticipantConnected), 1);
    assert_eq!(
        r.client
            .participant(&ParticipantSid::new("PA_c"))
            .map(|p| p.name),
        Some("Carla".to_string())
    );

    r.sfu.senden(ServerMessage::ParticipantLeft {
        participant_sid: ParticipantSid::new("PA_c"),
    });
    assert!(warten_bis(|| r.client.participants().is_empty()).await);
    assert!(r.ereignisse.alle().iter().any(|e| matches!(e,
        RoomEvent::ParticipantDisconnected(p)
            if p.sid.as_str() == "PA_c" && p.state == ParticipantState::Disconnected)));
    r.client.disconnect().await;
}

#[tokio::test]
async fn disconnect_raeumt_auf_und_meldet_teilnehmer_ab() {
    let sfu_optionen = MockSfuOptionen {
        andere_teilnehmer: vec![teilnehmer("PA_a", vec![])],
        ..Default::default()
    };
    let r = raum(sfu_optionen, optionen());
    r.client.connect().await.expect("connect fehlgeschlagen");

    r.client.disconnect().await;

    assert_eq!(r.client.connection_state(), ConnectionState::Disconnected);
    assert!(r.client.participants().is_empty());
    assert!(r.client.local_participant().is_none());
    assert!(r.client.room_info().is_none());

    let alle = r.ereignisse.alle();
    let verlassen = alle
        .iter()
        .position(|e| matches!(e, RoomEvent::ParticipantDisconnected(_)))
        .expect("ParticipantDisconnected fehlt");
    let getrennt = alle
        .iter()
        .position(|e| {
            matches!(e, RoomEvent::Disconnected { grund: DisconnectReason::Client })
        })
        .expect("Disconnected fehlt");
    assert!(verlassen < getrennt);

    // zweites disconnect ist ein No-op
    r.client.disconnect().await;
}

#[tokio::test]
async fn listener_nach_disconnect_entfernt() {
    let r = raum(MockSfuOptionen::default(), optionen());
    let aufrufe = Arc::new(AtomicUsize::new(0));
    {
        let aufrufe = Arc::clone(&aufrufe);
        r.client.on(RoomEventKind::ParticipantConnected, move |_| {
            aufrufe.fetch_add(1, Ordering::SeqCst);
        });
    }
    r.client.connect().await.expect("connect fehlgeschlagen");
    r.client.disconnect().await;

    // Nachricht die nach dem Abbau noch unterwegs war
    r.sfu.senden(ServerMessage::ParticipantJoined {
        participant: teilnehmer("PA_spaet", vec![]),
    });
    r.sfu
        .optionen_aendern(|o| o.andere_teilnehmer = vec![teilnehmer("PA_neu", vec![])]);
    r.client.connect().await.expect("erneutes connect fehlgeschlagen");

    assert_eq!(r.client.participants().len(), 1);
    assert_eq!(aufrufe.load(Ordering::SeqCst), 0);
    r.client.disconnect().await;
}

#[tokio::test]
async fn abgelehnte_verbindung_meldet_fehler() {
    let r = raum(MockSfuOptionen::default(), optionen());
    r.connector.naechste_ablehnen(1);

    let ergebnis = r.client.connect().await;

    assert!(matches!(ergebnis, Err(RoomError::Signaling(_))));
    assert_eq!(r.client.connection_state(), ConnectionState::Disconnected);
    assert!(r.ereignisse.enthaelt(RoomEventKind::Error));

    // danach ist ein neuer Versuch moeglich
    r.client.connect().await.expect("zweiter Versuch fehlgeschlagen");
    r.client.disconnect().await;
}

#[tokio::test]
async fn wiederverbindung_tritt_erneut_bei_und_gleicht_ab() {
    let sfu_optionen = MockSfuOptionen {
        andere_teilnehmer: vec![teilnehmer("PA_a", vec![])],
        ..Default::default()
    };
    let r = raum(sfu_optionen, optionen());
    r.client.connect().await.expect("connect fehlgeschlagen");
    let vorher = r
        .client
        .enable_microphone(None)
        .await
        .expect("Mikrofon fehlgeschlagen");

    r.sfu
        .optionen_aendern(|o| o.andere_teilnehmer = vec![teilnehmer("PA_b", vec![])]);
    r.sfu.verbindung_trennen();

    assert!(warten_bis(|| r.ereignisse.enthaelt(RoomEventKind::Reconnected)).await);
    assert!(r.ereignisse.enthaelt(RoomEventKind::Reconnecting));
    assert_eq!(r.client.connection_state(), ConnectionState::Connected);

    let teilnehmer = r.client.participants();
    assert_eq!(teilnehmer.len(), 1);
    assert_eq!(teilnehmer[0].sid.as_str(), "PA_b");

    let joins = r.sfu.empfangene_vom_typ("join");
    assert!(matches!(
        joins.as_slice(),
        [
            ClientMessage::Join { reconnect: false, .. },
            ClientMessage::Join { reconnect: true, .. }
        ]
    ));

    // Mikrofon laeuft weiter und ist neu veroeffentlicht
    let lokal = r.client.local_participant().expect("lokaler Teilnehmer fehlt");
    let mikrofon = lokal
        .track_fuer_quelle(TrackSource::Microphone)
        .expect("Mikrofon fehlt");
    assert_ne!(mikrofon.sid, vorher.sid);
    assert_eq!(r.sfu.empfangene_vom_typ("publish").len(), 2);
    assert!(!r.geraete.erzeugte_tracks()[0].is_stopped());
    r.client.disconnect().await;
}

#[tokio::test]
async fn endgueltiger_verbindungsverlust_baut_ab() {
    let r = raum(MockSfuOptionen::default(), optionen());
    r.client.connect().await.expect("connect fehlgeschlagen");
    r.client
        .enable_camera(None)
        .await
        .expect("Kamera fehlgeschlagen");

    r.connector.immer_ablehnen(true);
    r.sfu.verbindung_trennen();

    assert!(warten_bis(|| r.ereignisse.enthaelt(RoomEventKind::Disconnected)).await);
    assert!(r.ereignisse.alle().iter().any(|e| matches!(e,
        RoomEvent::Disconnected { grund: DisconnectReason::Verbindungsverlust })));
    assert!(r.ereignisse.enthaelt(RoomEventKind::Error));
    assert_eq!(r.client.connection_state(), ConnectionState::Disconnected);
    assert!(r.client.local_participant().is_none());
    assert!(r.geraete.erzeugte_tracks()[0].is_stopped());
}

#[tokio::test]
async fn nach_verbindungsverlust_erneut_verbinden() {
    let r = raum(MockSfuOptionen::default(), optionen());
    r.client.connect().await.expect("connect fehlgeschlagen");

    r.connector.immer_ablehnen(true);
    r.sfu.verbindung_trennen();
    assert!(warten_bis(|| r.ereignisse.enthaelt(RoomEventKind::Disconnected)).await);
    assert_eq!(r.client.connection_state(), ConnectionState::Disconnected);

    r.connector.immer_ablehnen(false);
    let info = r
        .client
        .connect()
        .await
        .expect("connect nach Verbindungsverlust fehlgeschlagen");

    assert_eq!(r.client.connection_state(), ConnectionState::Connected);
    assert_eq!(r.client.room_info().map(|i| i.sid), Some(info.sid));
    assert!(r.client.local_participant().is_some());
    assert_eq!(r.sfu.empfangene_vom_typ("join").len(), 2);
    r.client.disconnect().await;
}

#[tokio::test]
async fn track_vor_dem_teilnehmer_wird_nachgereicht() {
    let r = raum(MockSfuOptionen::default(), optionen());
    r.client.connect().await.expect("connect fehlgeschlagen");

    r.sfu.senden(ServerMessage::TrackPublished {
        participant_sid: ParticipantSid::new("PA_b"),
        track: track("TR_b", TrackSource::Microphone),
    });
    r.sfu.senden(ServerMessage::ParticipantJoined {
        participant: teilnehmer("PA_b", vec![]),
    });

    assert!(warten_bis(|| r.client.participants().len() == 1).await);
    let b = r
        .client
        .participant(&ParticipantSid::new("PA_b"))
        .expect("Teilnehmer fehlt");
    assert!(b.track(&salon_core::TrackSid::new("TR_b")).is_some());
    assert_eq!(b.state, ParticipantState::Active);
    assert!(r.ereignisse.alle().iter().any(|e| matches!(e,
        RoomEvent::TrackPublished { participant_sid, publication }
            if participant_sid.as_str() == "PA_b" && publication.sid.as_str() == "TR_b")));
    assert_eq!(r.ereignisse.anzahl(RoomEventKind::TrackPublished), 1);
    r.client.disconnect().await;
}

#[tokio::test]
async fn doppeltes_track_published_meldet_einmal() {
    let r = raum(MockSfuOptionen::default(), optionen());
    r.client.connect().await.expect("connect fehlgeschlagen");

    r.sfu.senden(ServerMessage::ParticipantJoined {
        participant: teilnehmer("PA_a", vec![]),
    });
    for _ in 0..2 {
        r.sfu.senden(ServerMessage::TrackPublished {
            participant_sid: ParticipantSid::new("PA_a"),
            track: track("TR_a", TrackSource::Microphone),
        });
    }
    // Nachrichten werden der Reihe nach angewendet
    r.sfu.senden(ServerMessage::ParticipantJoined {
        participant: teilnehmer("PA_z", vec![]),
    });

    assert!(warten_bis(|| r.client.participants().len() == 2).await);
    assert_eq!(r.ereignisse.anzahl(RoomEventKind::TrackPublished), 1);
    let a = r
        .client
        .participant(&ParticipantSid::new("PA_a"))
        .expect("Teilnehmer fehlt");
    assert_eq!(a.tracks.len(), 1);
    r.client.disconnect().await;
}
