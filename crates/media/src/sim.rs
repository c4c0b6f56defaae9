//! Simulierte Medien-Engine und Geraete
//!
//! Bildet das Verhalten eines SFU-Client-Stacks in Software nach, ohne
//! echte Medien zu uebertragen: Transporte verbinden sich beim ersten
//! produce/consume ueber den [`TransportHandler`], Producer und Consumer
//! bekommen ihre IDs vom Server. Genutzt vom Headless-Client und in Tests.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use salon_core::{
    ConsumerId, DataConsumerId, DataProducerId, MediaKind, ProducerId, TransportDirection,
    TransportId,
};
use salon_protocol::{
    DtlsFingerprint, DtlsParameters, DtlsRole, RtpCapabilities, RtpParameters,
    SctpStreamParameters,
};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, OnceCell};

use crate::device::{CaptureConstraints, DeviceInfo, DeviceKind, MediaDevices, MediaTrack};
use crate::engine::{
    ConsumeOptions, DataConsumeOptions, DataProducerOptions, EngineConsumer, EngineDataConsumer,
    EngineDataProducer, EngineProducer, EngineTransport, EngineTransportState, MediaEngine,
    ProduceDataRequest, ProduceOptions, ProduceRequest, TransportHandler, TransportOptions,
};
use crate::error::{MediaError, MediaResult};

// ---------------------------------------------------------------------------
// SimTrack
// ---------------------------------------------------------------------------

/// Simulierter Medien-Track
#[derive(Debug)]
pub struct SimTrack {
    id: String,
    kind: MediaKind,
    label: String,
    gestoppt: AtomicBool,
    ende: watch::Sender<bool>,
}

impl SimTrack {
    pub fn neu(kind: MediaKind, label: impl Into<String>) -> Arc<Self> {
        let (ende, _) = watch::channel(false);
        Arc::new(Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            label: label.into(),
            gestoppt: AtomicBool::new(false),
            ende,
        })
    }

    /// Simuliert ein Ende von aussen (Geraet abgezogen, Freigabe beendet)
    pub fn beenden(&self) {
        self.gestoppt.store(true, Ordering::SeqCst);
        self.ende.send_replace(true);
    }
}

impl MediaTrack for SimTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn stop(&self) -> bool {
        let erstmals = !self.gestoppt.swap(true, Ordering::SeqCst);
        if erstmals {
            tracing::debug!(track = %self.id, label = %self.label, "Track gestoppt");
        }
        erstmals
    }

    fn is_stopped(&self) -> bool {
        self.gestoppt.load(Ordering::SeqCst)
    }

    fn ended(&self) -> watch::Receiver<bool> {
        self.ende.subscribe()
    }
}

// ---------------------------------------------------------------------------
// SimDevices
// ---------------------------------------------------------------------------

/// Simulierte Aufnahmegeraete
pub struct SimDevices {
    geraete: Vec<DeviceInfo>,
    fehler: Mutex<Option<String>>,
    verzoegerung: Mutex<Option<Duration>>,
    erzeugt: Mutex<Vec<Arc<SimTrack>>>,
}

impl Default for SimDevices {
    fn default() -> Self {
        Self::neu()
    }
}

impl SimDevices {
    /// Eine Kamera, ein Mikrofon, ein Lautsprecher
    pub fn neu() -> Self {
        Self {
            geraete: vec![
                DeviceInfo {
                    device_id: "sim-cam".into(),
                    kind: DeviceKind::VideoInput,
                    label: "Simulierte Kamera".into(),
                },
                DeviceInfo {
                    device_id: "sim-mic".into(),
                    kind: DeviceKind::AudioInput,
                    label: "Simuliertes Mikrofon".into(),
                },
                DeviceInfo {
                    device_id: "sim-speaker".into(),
                    kind: DeviceKind::AudioOutput,
                    label: "Simulierter Lautsprecher".into(),
                },
            ],
            fehler: Mutex::new(None),
            verzoegerung: Mutex::new(None),
            erzeugt: Mutex::new(Vec::new()),
        }
    }

    /// Der naechste `acquire` schlaegt mit `grund` fehl
    pub fn naechsten_zugriff_ablehnen(&self, grund: impl Into<String>) {
        *self.fehler.lock() = Some(grund.into());
    }

    /// Jeder `acquire` wartet so lange bevor er antwortet
    pub fn verzoegerung_setzen(&self, dauer: Duration) {
        *self.verzoegerung.lock() = Some(dauer);
    }

    /// Alle bisher ausgegebenen Tracks
    pub fn erzeugte_tracks(&self) -> Vec<Arc<SimTrack>> {
        self.erzeugt.lock().clone()
    }
}

#[async_trait]
impl MediaDevices for SimDevices {
    async fn enumerate_devices(&self) -> MediaResult<Vec<DeviceInfo>> {
        Ok(self.geraete.clone())
    }

    async fn acquire(
        &self,
        kind: MediaKind,
        constraints: CaptureConstraints,
    ) -> MediaResult<Arc<dyn MediaTrack>> {
        let verzoegerung = *self.verzoegerung.lock();
        if let Some(dauer) = verzoegerung {
            tokio::time::sleep(dauer).await;
        }
        if let Some(grund) = self.fehler.lock().take() {
            return Err(MediaError::geraet(grund));
        }

        let gesucht = match kind {
            MediaKind::Audio => DeviceKind::AudioInput,
            MediaKind::Video => DeviceKind::VideoInput,
        };
        let label = if constraints.bildschirm {
            "Bildschirm".to_string()
        } else {
            let geraet = self.geraete.iter().find(|g| {
                g.kind == gesucht
                    && constraints
                        .device_id
                        .as_ref()
                        .map_or(true, |id| *id == g.device_id)
            });
            match geraet {
                Some(g) => g.label.clone(),
                None => {
                    return Err(MediaError::geraet(format!(
                        "kein {kind}-Geraet {:?}",
                        constraints.device_id
                    )))
                }
            }
        };

        let track = SimTrack::neu(kind, label);
        self.erzeugt.lock().push(Arc::clone(&track));
        Ok(track)
    }
}

// ---------------------------------------------------------------------------
// SimEngine
// ---------------------------------------------------------------------------

/// Simulierte Medien-Engine
#[derive(Default)]
pub struct SimEngine {
    faehigkeiten: RwLock<Option<RtpCapabilities>>,
}

impl SimEngine {
    pub fn neu() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MediaEngine for SimEngine {
    fn is_loaded(&self) -> bool {
        self.faehigkeiten.read().is_some()
    }

    async fn load(&self, router_capabilities: &RtpCapabilities) -> MediaResult<()> {
        if router_capabilities.codecs().is_empty() {
            return Err(MediaError::engine("Router bietet keine Codecs an"));
        }
        *self.faehigkeiten.write() = Some(router_capabilities.clone());
        tracing::debug!(
            codecs = router_capabilities.codecs().len(),
            "Router-Faehigkeiten geladen"
        );
        Ok(())
    }

    fn rtp_capabilities(&self) -> MediaResult<RtpCapabilities> {
        self.faehigkeiten
            .read()
            .clone()
            .ok_or(MediaError::NichtInitialisiert)
    }

    fn can_produce(&self, kind: MediaKind) -> bool {
        self.faehigkeiten
            .read()
            .as_ref()
            .is_some_and(|c| c.unterstuetzt(kind))
    }

    fn create_transport(
        &self,
        options: TransportOptions,
        handler: Arc<dyn TransportHandler>,
    ) -> MediaResult<Arc<dyn EngineTransport>> {
        if !self.is_loaded() {
            return Err(MediaError::NichtInitialisiert);
        }
        Ok(Arc::new(SimTransport {
            id: options.id,
            direction: options.direction,
            sctp: options.sctp_parameters.is_some(),
            handler,
            verbindung: OnceCell::new(),
            geschlossen: AtomicBool::new(false),
            naechster_stream: AtomicU16::new(0),
            producers: Mutex::new(Vec::new()),
            consumers: Mutex::new(Vec::new()),
            data_producers: Mutex::new(Vec::new()),
            data_consumers: Mutex::new(Vec::new()),
        }))
    }
}

// ---------------------------------------------------------------------------
// SimTransport
// ---------------------------------------------------------------------------

struct SimTransport {
    id: TransportId,
    direction: TransportDirection,
    sctp: bool,
    handler: Arc<dyn TransportHandler>,
    verbindung: OnceCell<()>,
    geschlossen: AtomicBool,
    naechster_stream: AtomicU16,
    producers: Mutex<Vec<Arc<SimProducer>>>,
    consumers: Mutex<Vec<Arc<SimConsumer>>>,
    data_producers: Mutex<Vec<Arc<SimDataProducer>>>,
    data_consumers: Mutex<Vec<Arc<SimDataConsumer>>>,
}

impl SimTransport {
    fn pruefen(&self, erwartet: TransportDirection) -> MediaResult<()> {
        if self.is_closed() {
            return Err(MediaError::Geschlossen(self.id.to_string()));
        }
        if self.direction != erwartet {
            return Err(MediaError::FalscheRichtung(format!(
                "{} ist ein {}-Transport",
                self.id, self.direction
            )));
        }
        Ok(())
    }

    fn lokale_dtls() -> DtlsParameters {
        DtlsParameters {
            role: DtlsRole::Client,
            fingerprints: vec![DtlsFingerprint {
                algorithm: "sha-256".into(),
                value: uuid::Uuid::new_v4().simple().to_string().to_uppercase(),
            }],
        }
    }

    /// Verbindet beim ersten Einsatz; ein Fehlschlag darf spaeter wiederholt werden
    async fn verbindung_sicherstellen(&self) -> MediaResult<()> {
        self.verbindung
            .get_or_try_init(|| async {
                self.handler.state_changed(
                    &self.id,
                    self.direction,
                    EngineTransportState::Connecting,
                );
                match self
                    .handler
                    .connect(&self.id, self.direction, Self::lokale_dtls())
                    .await
                {
                    Ok(()) => {
                        self.handler.state_changed(
                            &self.id,
                            self.direction,
                            EngineTransportState::Connected,
                        );
                        Ok(())
                    }
                    Err(e) => {
                        self.handler.state_changed(
                            &self.id,
                            self.direction,
                            EngineTransportState::Failed,
                        );
                        Err(e)
                    }
                }
            })
            .await
            .map(|_| ())
    }

    fn nach_schliessen_pruefen(&self) -> MediaResult<()> {
        if self.is_closed() {
            return Err(MediaError::Geschlossen(self.id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl EngineTransport for SimTransport {
    fn id(&self) -> &TransportId {
        &self.id
    }

    fn direction(&self) -> TransportDirection {
        self.direction
    }

    async fn produce(&self, options: ProduceOptions) -> MediaResult<Arc<dyn EngineProducer>> {
        self.pruefen(TransportDirection::Send)?;
        let kind = options.track.kind();
        self.verbindung_sicherstellen().await?;

        let rtp_parameters = RtpParameters(json!({
            "mid": self.producers.lock().len().to_string(),
            "codecs": [{
                "mimeType": match kind { MediaKind::Audio => "audio/opus", MediaKind::Video => "video/VP8" },
                "payloadType": match kind { MediaKind::Audio => 100, MediaKind::Video => 101 },
            }],
            "encodings": if options.simulcast {
                json!([{ "rid": "q" }, { "rid": "h" }, { "rid": "f" }])
            } else {
                json!([{ "ssrc": rand_ssrc() }])
            },
        }));

        let id = self
            .handler
            .produce(ProduceRequest {
                transport_id: self.id.clone(),
                kind,
                rtp_parameters,
                app_data: options.app_data,
            })
            .await?;
        self.nach_schliessen_pruefen()?;

        let producer = Arc::new(SimProducer {
            id,
            kind,
            track: options.track,
            geschlossen: AtomicBool::new(false),
        });
        self.producers.lock().push(Arc::clone(&producer));
        Ok(producer)
    }

    async fn consume(&self, options: ConsumeOptions) -> MediaResult<Arc<dyn EngineConsumer>> {
        self.pruefen(TransportDirection::Recv)?;
        self.verbindung_sicherstellen().await?;

        let consumer = Arc::new(SimConsumer {
            track: SimTrack::neu(options.kind, format!("remote {}", options.producer_id)),
            id: options.id,
            producer_id: options.producer_id,
            kind: options.kind,
            pausiert: AtomicBool::new(true),
            geschlossen: AtomicBool::new(false),
        });
        self.consumers.lock().push(Arc::clone(&consumer));
        Ok(consumer)
    }

    async fn produce_data(
        &self,
        options: DataProducerOptions,
    ) -> MediaResult<Arc<dyn EngineDataProducer>> {
        self.pruefen(TransportDirection::Send)?;
        if !self.sctp {
            return Err(MediaError::engine("Transport ohne SCTP-Parameter"));
        }
        self.verbindung_sicherstellen().await?;

        let sctp_stream_parameters = SctpStreamParameters {
            stream_id: self.naechster_stream.fetch_add(1, Ordering::SeqCst),
            ordered: options.ordered,
            max_packet_life_time: options.max_packet_life_time,
            max_retransmits: options.max_retransmits,
        };
        let id = self
            .handler
            .produce_data(ProduceDataRequest {
                transport_id: self.id.clone(),
                sctp_stream_parameters,
                label: options.label.clone(),
                protocol: options.protocol,
            })
            .await?;
        self.nach_schliessen_pruefen()?;

        let producer = Arc::new(SimDataProducer {
            id,
            label: options.label,
            gesendet: Mutex::new(Vec::new()),
            geschlossen: AtomicBool::new(false),
        });
        self.data_producers.lock().push(Arc::clone(&producer));
        Ok(producer)
    }

    async fn consume_data(
        &self,
        options: DataConsumeOptions,
    ) -> MediaResult<Arc<dyn EngineDataConsumer>> {
        self.pruefen(TransportDirection::Recv)?;
        if !self.sctp {
            return Err(MediaError::engine("Transport ohne SCTP-Parameter"));
        }
        self.verbindung_sicherstellen().await?;

        let consumer = Arc::new(SimDataConsumer {
            id: options.id,
            data_producer_id: options.data_producer_id,
            label: options.label,
            geschlossen: AtomicBool::new(false),
        });
        self.data_consumers.lock().push(Arc::clone(&consumer));
        Ok(consumer)
    }

    fn close(&self) {
        if self.geschlossen.swap(true, Ordering::SeqCst) {
            return;
        }
        for p in self.producers.lock().drain(..) {
            p.close();
        }
        for c in self.consumers.lock().drain(..) {
            c.close();
        }
        for p in self.data_producers.lock().drain(..) {
            p.close();
        }
        for c in self.data_consumers.lock().drain(..) {
            c.close();
        }
        self.handler
            .state_changed(&self.id, self.direction, EngineTransportState::Closed);
        tracing::debug!(transport_id = %self.id, "Transport geschlossen");
    }

    fn is_closed(&self) -> bool {
        self.geschlossen.load(Ordering::SeqCst)
    }
}

fn rand_ssrc() -> u32 {
    let bytes = uuid::Uuid::new_v4().into_bytes();
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

// ---------------------------------------------------------------------------
// Producer / Consumer
// ---------------------------------------------------------------------------

struct SimProducer {
    id: ProducerId,
    kind: MediaKind,
    track: Arc<dyn MediaTrack>,
    geschlossen: AtomicBool,
}

impl EngineProducer for SimProducer {
    fn id(&self) -> &ProducerId {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn track(&self) -> Arc<dyn MediaTrack> {
        Arc::clone(&self.track)
    }

    fn close(&self) {
        self.geschlossen.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.geschlossen.load(Ordering::SeqCst)
    }
}

struct SimConsumer {
    id: ConsumerId,
    producer_id: ProducerId,
    kind: MediaKind,
    track: Arc<SimTrack>,
    pausiert: AtomicBool,
    geschlossen: AtomicBool,
}

impl EngineConsumer for SimConsumer {
    fn id(&self) -> &ConsumerId {
        &self.id
    }

    fn producer_id(&self) -> &ProducerId {
        &self.producer_id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn track(&self) -> Arc<dyn MediaTrack> {
        self.track.clone()
    }

    fn resume(&self) {
        self.pausiert.store(false, Ordering::SeqCst);
    }

    fn is_paused(&self) -> bool {
        self.pausiert.load(Ordering::SeqCst)
    }

    fn close(&self) {
        if !self.geschlossen.swap(true, Ordering::SeqCst) {
            // Remote-Track endet mit dem Consumer
            self.track.beenden();
        }
    }

    fn is_closed(&self) -> bool {
        self.geschlossen.load(Ordering::SeqCst)
    }
}

/// Simulierter Daten-Producer; merkt sich alle gesendeten Nachrichten
pub struct SimDataProducer {
    id: DataProducerId,
    label: String,
    gesendet: Mutex<Vec<Bytes>>,
    geschlossen: AtomicBool,
}

impl SimDataProducer {
    pub fn gesendet(&self) -> Vec<Bytes> {
        self.gesendet.lock().clone()
    }
}

impl EngineDataProducer for SimDataProducer {
    fn id(&self) -> &DataProducerId {
        &self.id
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn send(&self, daten: Bytes) -> MediaResult<()> {
        if self.is_closed() {
            return Err(MediaError::Geschlossen(self.id.to_string()));
        }
        self.gesendet.lock().push(daten);
        Ok(())
    }

    fn close(&self) {
        self.geschlossen.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.geschlossen.load(Ordering::SeqCst)
    }
}

struct SimDataConsumer {
    id: DataConsumerId,
    data_producer_id: DataProducerId,
    label: String,
    geschlossen: AtomicBool,
}

impl EngineDataConsumer for SimDataConsumer {
    fn id(&self) -> &DataConsumerId {
        &self.id
    }

    fn data_producer_id(&self) -> &DataProducerId {
        &self.data_producer_id
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn close(&self) {
        self.geschlossen.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.geschlossen.load(Ordering::SeqCst)
    }
}
