//! salon-client – Headless-Client
//!
//! Tritt einem Raum bei, aktiviert die konfigurierten lokalen Medien und
//! protokolliert alle Raum-Ereignisse, bis der Aufrufer das Ende signalisiert.
//! Medien laufen ueber die simulierte Engine aus `salon_media::sim`; eine
//! echte WebRTC-Engine wird ueber dieselben Traits eingehaengt.

pub mod config;
pub mod logging;

use anyhow::{Context, Result};
use config::{ClientConfig, VerbindungsArt};
use salon_core::DataChannelKind;
use salon_media::sim::{SimDevices, SimEngine};
use salon_media::{MediaDevices, MediaEngine};
use salon_room::{RoomClient, RoomEvent};
use salon_signaling::{Connector, TcpConnector, WebSocketConnector};
use std::future::Future;
use std::sync::Arc;
use tracing::{Instrument, Span};

/// Haelt Konfiguration und Medien-Backend des Clients zusammen
pub struct HeadlessClient {
    pub config: ClientConfig,
    engine: Arc<dyn MediaEngine>,
    geraete: Arc<dyn MediaDevices>,
}

impl HeadlessClient {
    /// Erstellt einen Client mit simulierter Engine und simulierten Geraeten
    pub fn neu(config: ClientConfig) -> Self {
        Self::mit_medien(config, Arc::new(SimEngine::neu()), Arc::new(SimDevices::neu()))
    }

    pub fn mit_medien(
        config: ClientConfig,
        engine: Arc<dyn MediaEngine>,
        geraete: Arc<dyn MediaDevices>,
    ) -> Self {
        Self {
            config,
            engine,
            geraete,
        }
    }

    /// Connector passend zur Konfiguration
    pub fn connector(&self) -> Arc<dyn Connector> {
        let v = &self.config.verbindung;
        match v.art {
            VerbindungsArt::Websocket => Arc::new(WebSocketConnector::neu(v.adresse.clone())),
            VerbindungsArt::Tcp => {
                let mut c = TcpConnector::neu(v.adresse.clone());
                if let Some(max) = v.max_frame_size {
                    c = c.mit_max_frame_size(max);
                }
                Arc::new(c)
            }
        }
    }

    /// Verbindet, aktiviert Medien und laeuft bis `ende` fertig ist
    ///
    /// Scheitert nur, wenn der Beitritt scheitert. Fehler beim Aktivieren
    /// einzelner Medien werden protokolliert. Alles laeuft im Span
    /// [`logging::raum_span`].
    pub async fn ausfuehren(
        &self,
        connector: Arc<dyn Connector>,
        ende: impl Future<Output = ()>,
    ) -> Result<RoomClient> {
        let span = logging::raum_span(&self.config.verbindung.adresse);
        self.im_raum(connector, ende).instrument(span).await
    }

    async fn im_raum(
        &self,
        connector: Arc<dyn Connector>,
        ende: impl Future<Output = ()>,
    ) -> Result<RoomClient> {
        let room = RoomClient::neu(
            connector,
            Arc::clone(&self.engine),
            Arc::clone(&self.geraete),
            self.config.room.clone(),
        );
        room.on_any(ereignis_protokollieren);

        let info = room
            .connect()
            .await
            .context("Beitritt zum Raum fehlgeschlagen")?;
        let span = Span::current();
        span.record("room", info.sid.as_str());
        if let Some(lokal) = room.local_participant() {
            span.record("participant", lokal.sid.as_str());
        }
        tracing::info!(
            room = %info.sid,
            name = %info.name,
            teilnehmer = info.num_participants,
            "Raum betreten"
        );

        self.medien_aktivieren(&room).await;

        ende.await;
        room.disconnect().await;
        Ok(room)
    }

    async fn medien_aktivieren(&self, room: &RoomClient) {
        let m = &self.config.medien;
        if m.mikrofon {
            if let Err(e) = room.enable_microphone(m.mikrofon_geraet.clone()).await {
                tracing::warn!(fehler = %e, "Mikrofon nicht aktiviert");
            }
        }
        if m.kamera {
            if let Err(e) = room.enable_camera(m.kamera_geraet.clone()).await {
                tracing::warn!(fehler = %e, "Kamera nicht aktiviert");
            }
        }
        if m.bildschirm {
            if let Err(e) = room.enable_screen_share().await {
                tracing::warn!(fehler = %e, "Bildschirmfreigabe nicht aktiviert");
            }
        }
        if m.datenkanal {
            match room.open_data_channel(DataChannelKind::Reliable).await {
                Ok(id) => tracing::info!(data_producer_id = %id, "Datenkanal offen"),
                Err(e) => tracing::warn!(fehler = %e, "Datenkanal nicht geoeffnet"),
            }
        }
    }
}

fn ereignis_protokollieren(ereignis: &RoomEvent) {
    match ereignis {
        RoomEvent::ConnectionStateChanged(zustand) => {
            tracing::debug!(zustand = %zustand, "Verbindungszustand");
        }
        RoomEvent::Connected { room } => tracing::info!(room = %room.sid, "Verbunden"),
        RoomEvent::Reconnecting => tracing::warn!("Verbindung unterbrochen"),
        RoomEvent::Reconnected => tracing::info!("Wiederverbunden"),
        RoomEvent::Disconnected { grund } => tracing::info!(grund = ?grund, "Getrennt"),
        RoomEvent::ParticipantConnected(p) => {
            tracing::info!(participant = %p.sid, name = %p.name, tracks = p.tracks.len(), "Teilnehmer da");
        }
        RoomEvent::ParticipantDisconnected(p) => {
            tracing::info!(participant = %p.sid, "Teilnehmer weg");
        }
        RoomEvent::ParticipantUpdated(p) => {
            tracing::debug!(participant = %p.sid, name = %p.name, "Teilnehmer aktualisiert");
        }
        RoomEvent::TrackPublished {
            participant_sid,
            publication,
        } => tracing::info!(
            participant = %participant_sid,
            track_sid = %publication.sid,
            source = %publication.source,
            "Track veroeffentlicht"
        ),
        RoomEvent::TrackUnpublished {
            participant_sid,
            publication,
        } => tracing::info!(participant = %participant_sid, track_sid = %publication.sid, "Track zurueckgezogen"),
        RoomEvent::TrackSubscribed {
            participant_sid,
            publication,
        } => tracing::info!(
            participant = %participant_sid,
            track_sid = %publication.sid,
            kind = %publication.kind,
            "Track abonniert"
        ),
        RoomEvent::TrackUnsubscribed {
            participant_sid,
            publication,
        } => tracing::info!(participant = %participant_sid, track_sid = %publication.sid, "Abo beendet"),
        RoomEvent::TrackMuted {
            participant_sid,
            track_sid,
        } => tracing::debug!(participant = %participant_sid, track_sid = %track_sid, "stumm"),
        RoomEvent::TrackUnmuted {
            participant_sid,
            track_sid,
        } => tracing::debug!(participant = %participant_sid, track_sid = %track_sid, "laut"),
        RoomEvent::LocalTrackPublished(p) => {
            tracing::info!(track_sid = %p.sid, source = %p.source, "Lokaler Track veroeffentlicht");
        }
        RoomEvent::LocalTrackUnpublished(p) => {
            tracing::info!(track_sid = %p.sid, source = %p.source, "Lokaler Track zurueckgezogen");
        }
        RoomEvent::DataReceived {
            participant_sid,
            payload,
            kind,
        } => tracing::info!(
            participant = ?participant_sid,
            kind = ?kind,
            payload = %payload,
            "Daten empfangen"
        ),
        RoomEvent::TransportsConnected => tracing::info!("Transporte verbunden"),
        RoomEvent::Error(e) => tracing::warn!(fehler = %e, "Raumfehler"),
    }
}
