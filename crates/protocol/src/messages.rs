//! Signaling-Nachrichten zwischen Client und SFU-Server
//!
//! Jede Nachricht ist ein JSON-Objekt mit `type`-Diskriminator und
//! camelCase-Feldern. Anfragen des Clients werden in einen [`Envelope`]
//! verpackt der optional eine `requestId` traegt; Server die sie
//! zurueckspiegeln erlauben exakte Korrelation.
//!
//! ```text
//! Client                                  Server
//!   |-- {type:"join", requestId:1, ...} ---->|
//!   |<-- {type:"joined", requestId:1, ...} --|
//!   |<-- {type:"participant_joined", ...} ---|   (Notification, ohne requestId)
//! ```

use std::collections::HashMap;

use salon_core::{
    ConsumerId, DataChannelKind, DataConsumerId, DataProducerId, MediaKind, ParticipantSid,
    ProducerId, RoomSid, TrackSid, TrackSource, TransportDirection, TransportId,
};
use serde::{Deserialize, Deserializer, Serialize};

use crate::params::{
    DtlsParameters, IceCandidate, IceParameters, RtpCapabilities, RtpParameters, SctpParameters,
    SctpStreamParameters,
};

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Huelle um eine Nachricht mit optionaler Anfrage-ID
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u32>,
    #[serde(flatten)]
    pub message: T,
}

impl<T> Envelope<T> {
    /// Nachricht ohne Anfrage-ID (Notification)
    pub fn ohne_id(message: T) -> Self {
        Self {
            request_id: None,
            message,
        }
    }

    /// Nachricht mit Anfrage-ID
    pub fn mit_id(request_id: u32, message: T) -> Self {
        Self {
            request_id: Some(request_id),
            message,
        }
    }
}

// ---------------------------------------------------------------------------
// Gemeinsame Strukturen
// ---------------------------------------------------------------------------

/// Vom Server bestaetigte Raum-Identitaet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    pub sid: RoomSid,
    pub name: String,
    #[serde(default)]
    pub num_participants: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
}

/// Teilnehmer wie ihn der Server beschreibt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantInfo {
    pub sid: ParticipantSid,
    pub identity: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub tracks: Vec<TrackInfo>,
}

/// Veroeffentlichter Track wie ihn der Server beschreibt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub sid: TrackSid,
    pub kind: MediaKind,
    #[serde(default)]
    pub source: TrackSource,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub simulcast: bool,
    /// Producer hinter dem Track; fehlt er, ist die Track-SID zugleich Producer-ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub producer_id: Option<ProducerId>,
}

impl TrackInfo {
    /// Producer-ID unter der dieser Track abonniert wird
    pub fn producer_id(&self) -> ProducerId {
        self.producer_id
            .clone()
            .unwrap_or_else(|| ProducerId::new(self.sid.as_str()))
    }
}

/// Fehlerbeschreibung einer `error`-Nachricht
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    #[serde(default, deserialize_with = "code_als_string")]
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_id: Option<TransportId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub producer_id: Option<ProducerId>,
}

/// Server liefern Fehlercodes teils als Zahl, teils als String
fn code_als_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let wert = serde_json::Value::deserialize(deserializer)?;
    Ok(match wert {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        andere => andere.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Client -> Server
// ---------------------------------------------------------------------------

/// Nachrichten vom Client an den Server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    #[serde(alias = "join_room")]
    Join {
        token: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        metadata: HashMap<String, String>,
        #[serde(default)]
        reconnect: bool,
    },
    #[serde(alias = "leave_room")]
    Leave,
    CreateTransport {
        direction: TransportDirection,
        rtp_capabilities: RtpCapabilities,
    },
    ConnectTransport {
        transport_id: TransportId,
        dtls_parameters: DtlsParameters,
    },
    Publish {
        transport_id: TransportId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        #[serde(default)]
        app_data: serde_json::Value,
    },
    Unpublish {
        producer_id: ProducerId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        track_sid: Option<TrackSid>,
    },
    Subscribe {
        transport_id: TransportId,
        producer_id: ProducerId,
        rtp_capabilities: RtpCapabilities,
    },
    Unsubscribe {
        consumer_id: ConsumerId,
    },
    ResumeConsumer {
        consumer_id: ConsumerId,
    },
    CreateDataProducer {
        transport_id: TransportId,
        sctp_stream_parameters: SctpStreamParameters,
        label: String,
        #[serde(default)]
        protocol: String,
    },
    CloseDataProducer {
        data_producer_id: DataProducerId,
    },
    Data {
        payload: serde_json::Value,
        #[serde(default)]
        kind: DataChannelKind,
    },
    Ping {
        timestamp_ms: i64,
    },
}

impl ClientMessage {
    /// Wire-Name der Nachricht, fuer Logs
    pub fn typ(&self) -> &'static str {
        match self {
            ClientMessage::Join { .. } => "join",
            ClientMessage::Leave => "leave",
            ClientMessage::CreateTransport { .. } => "create_transport",
            ClientMessage::ConnectTransport { .. } => "connect_transport",
            ClientMessage::Publish { .. } => "publish",
            ClientMessage::Unpublish { .. } => "unpublish",
            ClientMessage::Subscribe { .. } => "subscribe",
            ClientMessage::Unsubscribe { .. } => "unsubscribe",
            ClientMessage::ResumeConsumer { .. } => "resume_consumer",
            ClientMessage::CreateDataProducer { .. } => "create_data_producer",
            ClientMessage::CloseDataProducer { .. } => "close_data_producer",
            ClientMessage::Data { .. } => "data",
            ClientMessage::Ping { .. } => "ping",
        }
    }
}

// ---------------------------------------------------------------------------
// Server -> Client
// ---------------------------------------------------------------------------

/// Nachrichten vom Server an den Client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    #[serde(alias = "room_joined")]
    Joined {
        room: RoomInfo,
        participant: ParticipantInfo,
        #[serde(default)]
        other_participants: Vec<ParticipantInfo>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rtp_capabilities: Option<RtpCapabilities>,
    },
    ParticipantJoined {
        participant: ParticipantInfo,
    },
    ParticipantLeft {
        participant_sid: ParticipantSid,
    },
    ParticipantUpdated {
        participant: ParticipantInfo,
    },
    TransportCreated {
        id: TransportId,
        direction: TransportDirection,
        ice_parameters: IceParameters,
        #[serde(default)]
        ice_candidates: Vec<IceCandidate>,
        dtls_parameters: DtlsParameters,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sctp_parameters: Option<SctpParameters>,
    },
    TransportConnected {
        transport_id: TransportId,
    },
    TrackPublished {
        participant_sid: ParticipantSid,
        track: TrackInfo,
    },
    TrackUnpublished {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        participant_sid: Option<ParticipantSid>,
        track_sid: TrackSid,
    },
    TrackSubscribed {
        id: ConsumerId,
        producer_id: ProducerId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        track_sid: Option<TrackSid>,
    },
    TrackUnsubscribed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        consumer_id: Option<ConsumerId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        track_sid: Option<TrackSid>,
    },
    TrackMuted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        participant_sid: Option<ParticipantSid>,
        track_sid: TrackSid,
    },
    TrackUnmuted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        participant_sid: Option<ParticipantSid>,
        track_sid: TrackSid,
    },
    DataProducerCreated {
        id: DataProducerId,
    },
    DataConsumerCreated {
        id: DataConsumerId,
        data_producer_id: DataProducerId,
        sctp_stream_parameters: SctpStreamParameters,
        #[serde(default)]
        label: String,
        #[serde(default)]
        protocol: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        participant_sid: Option<ParticipantSid>,
    },
    Data {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        participant_sid: Option<ParticipantSid>,
        payload: serde_json::Value,
        #[serde(default)]
        kind: DataChannelKind,
    },
    Error {
        error: ErrorBody,
    },
    Pong {
        timestamp_ms: i64,
    },
}

impl ServerMessage {
    /// Wire-Name der Nachricht, fuer Logs
    pub fn typ(&self) -> &'static str {
        match self {
            ServerMessage::Joined { .. } => "joined",
            ServerMessage::ParticipantJoined { .. } => "participant_joined",
            ServerMessage::ParticipantLeft { .. } => "participant_left",
            ServerMessage::ParticipantUpdated { .. } => "participant_updated",
            ServerMessage::TransportCreated { .. } => "transport_created",
            ServerMessage::TransportConnected { .. } => "transport_connected",
            ServerMessage::TrackPublished { .. } => "track_published",
            ServerMessage::TrackUnpublished { .. } => "track_unpublished",
            ServerMessage::TrackSubscribed { .. } => "track_subscribed",
            ServerMessage::TrackUnsubscribed { .. } => "track_unsubscribed",
            ServerMessage::TrackMuted { .. } => "track_muted",
            ServerMessage::TrackUnmuted { .. } => "track_unmuted",
            ServerMessage::DataProducerCreated { .. } => "data_producer_created",
            ServerMessage::DataConsumerCreated { .. } => "data_consumer_created",
            ServerMessage::Data { .. } => "data",
            ServerMessage::Error { .. } => "error",
            ServerMessage::Pong { .. } => "pong",
        }
    }
}
