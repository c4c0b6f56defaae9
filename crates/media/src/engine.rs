//! Schnittstelle zur Medien-Engine (WebRTC-Stack des SFU-Clients)
//!
//! Die Engine erzeugt Transporte aus den Server-Parametern und meldet sich
//! ueber einen [`TransportHandler`] zurueck, wenn sie den DTLS-Handshake
//! oder das Anlegen eines Producers beim Server braucht:
//!
//! ```text
//!  EngineTransport::produce()
//!        |  (erster Einsatz)
//!        +--> handler.connect(dtls)        --> connect_transport / transport_connected
//!        +--> handler.produce(rtp)         --> publish / track_published
//!        |
//!        v
//!  EngineProducer (ID vom Server)
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use salon_core::{
    ConsumerId, DataConsumerId, DataProducerId, MediaKind, ProducerId, TransportDirection,
    TransportId,
};
use salon_protocol::{
    DtlsParameters, IceCandidate, IceParameters, RtpCapabilities, RtpParameters, SctpParameters,
    SctpStreamParameters,
};
use std::sync::Arc;

use crate::device::MediaTrack;
use crate::error::MediaResult;

// ---------------------------------------------------------------------------
// Parameter
// ---------------------------------------------------------------------------

/// Alles was die Engine zum Anlegen eines Transports braucht
#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub id: TransportId,
    pub direction: TransportDirection,
    pub ice_parameters: IceParameters,
    pub ice_candidates: Vec<IceCandidate>,
    pub dtls_parameters: DtlsParameters,
    pub sctp_parameters: Option<SctpParameters>,
}

/// Zustand eines Engine-Transports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineTransportState {
    New,
    Connecting,
    Connected,
    Failed,
    Disconnected,
    Closed,
}

/// Anfrage der Engine einen Producer beim Server anzulegen
#[derive(Debug, Clone)]
pub struct ProduceRequest {
    pub transport_id: TransportId,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    pub app_data: serde_json::Value,
}

/// Anfrage der Engine einen Daten-Producer beim Server anzulegen
#[derive(Debug, Clone)]
pub struct ProduceDataRequest {
    pub transport_id: TransportId,
    pub sctp_stream_parameters: SctpStreamParameters,
    pub label: String,
    pub protocol: String,
}

#[derive(Debug, Clone)]
pub struct ProduceOptions {
    pub track: Arc<dyn MediaTrack>,
    pub simulcast: bool,
    pub app_data: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct ConsumeOptions {
    pub id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataProducerOptions {
    pub label: String,
    pub protocol: String,
    pub ordered: bool,
    pub max_packet_life_time: Option<u16>,
    pub max_retransmits: Option<u16>,
}

#[derive(Debug, Clone)]
pub struct DataConsumeOptions {
    pub id: DataConsumerId,
    pub data_producer_id: DataProducerId,
    pub sctp_stream_parameters: SctpStreamParameters,
    pub label: String,
    pub protocol: String,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Rueckkanal der Engine zur Signaling-Schicht
#[async_trait]
pub trait TransportHandler: Send + Sync {
    /// DTLS-Handshake beim Server anstossen; kehrt zurueck wenn er bestaetigt ist
    async fn connect(
        &self,
        transport_id: &TransportId,
        direction: TransportDirection,
        dtls_parameters: DtlsParameters,
    ) -> MediaResult<()>;

    /// Producer beim Server anlegen; liefert die Server-ID
    async fn produce(&self, request: ProduceRequest) -> MediaResult<ProducerId>;

    /// Daten-Producer beim Server anlegen; liefert die Server-ID
    async fn produce_data(&self, request: ProduceDataRequest) -> MediaResult<DataProducerId>;

    /// Zustandswechsel eines Transports
    fn state_changed(
        &self,
        transport_id: &TransportId,
        direction: TransportDirection,
        state: EngineTransportState,
    );
}

/// Die Medien-Engine (ein "Device" im SFU-Jargon)
#[async_trait]
pub trait MediaEngine: Send + Sync {
    fn is_loaded(&self) -> bool;

    /// Laedt die Router-Faehigkeiten des Servers
    async fn load(&self, router_capabilities: &RtpCapabilities) -> MediaResult<()>;

    /// Lokale RTP-Faehigkeiten (Schnittmenge mit dem Router)
    fn rtp_capabilities(&self) -> MediaResult<RtpCapabilities>;

    fn can_produce(&self, kind: MediaKind) -> bool;

    fn create_transport(
        &self,
        options: TransportOptions,
        handler: Arc<dyn TransportHandler>,
    ) -> MediaResult<Arc<dyn EngineTransport>>;
}

#[async_trait]
pub trait EngineTransport: Send + Sync {
    fn id(&self) -> &TransportId;
    fn direction(&self) -> TransportDirection;

    async fn produce(&self, options: ProduceOptions) -> MediaResult<Arc<dyn EngineProducer>>;
    async fn consume(&self, options: ConsumeOptions) -> MediaResult<Arc<dyn EngineConsumer>>;
    async fn produce_data(
        &self,
        options: DataProducerOptions,
    ) -> MediaResult<Arc<dyn EngineDataProducer>>;
    async fn consume_data(
        &self,
        options: DataConsumeOptions,
    ) -> MediaResult<Arc<dyn EngineDataConsumer>>;

    /// Schliesst den Transport samt aller Producer und Consumer
    fn close(&self);
    fn is_closed(&self) -> bool;
}

pub trait EngineProducer: Send + Sync {
    fn id(&self) -> &ProducerId;
    fn kind(&self) -> MediaKind;
    fn track(&self) -> Arc<dyn MediaTrack>;
    fn close(&self);
    fn is_closed(&self) -> bool;
}

pub trait EngineConsumer: Send + Sync {
    fn id(&self) -> &ConsumerId;
    fn producer_id(&self) -> &ProducerId;
    fn kind(&self) -> MediaKind;
    fn track(&self) -> Arc<dyn MediaTrack>;
    fn resume(&self);
    fn is_paused(&self) -> bool;
    fn close(&self);
    fn is_closed(&self) -> bool;
}

pub trait EngineDataProducer: Send + Sync {
    fn id(&self) -> &DataProducerId;
    fn label(&self) -> &str;
    fn send(&self, daten: Bytes) -> MediaResult<()>;
    fn close(&self);
    fn is_closed(&self) -> bool;
}

pub trait EngineDataConsumer: Send + Sync {
    fn id(&self) -> &DataConsumerId;
    fn data_producer_id(&self) -> &DataProducerId;
    fn label(&self) -> &str;
    fn close(&self);
    fn is_closed(&self) -> bool;
}
