//! WebRTC-Parameter die zwischen Client, Server und Medien-Engine fliessen
//!
//! ICE/DTLS/SCTP-Parameter sind vollstaendig typisiert. RTP-Faehigkeiten und
//! RTP-Parameter sind fuer diese Schicht opak: sie werden nur zwischen Engine
//! und Server durchgereicht und deshalb als JSON-Wert gehalten.

use serde::{Deserialize, Serialize};

/// RTP-Faehigkeiten (Codecs, Header-Extensions) eines Endpunkts
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RtpCapabilities(pub serde_json::Value);

impl RtpCapabilities {
    pub fn new(wert: serde_json::Value) -> Self {
        Self(wert)
    }

    /// Liefert die Codec-Liste, falls vorhanden
    pub fn codecs(&self) -> &[serde_json::Value] {
        self.0
            .get("codecs")
            .and_then(|c| c.as_array())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Gibt true zurueck wenn ein Codec der angegebenen Medienart vorhanden ist
    pub fn unterstuetzt(&self, kind: salon_core::MediaKind) -> bool {
        let gesucht = kind.to_string();
        self.codecs()
            .iter()
            .any(|c| c.get("kind").and_then(|k| k.as_str()) == Some(gesucht.as_str()))
    }
}

/// RTP-Sendeparameter eines Producers bzw. Empfangsparameter eines Consumers
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RtpParameters(pub serde_json::Value);

/// ICE-Zugangsdaten des Servers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceParameters {
    pub username_fragment: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ice_lite: Option<bool>,
}

/// Ein ICE-Kandidat des Servers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub foundation: String,
    pub priority: u32,
    #[serde(alias = "ip")]
    pub address: String,
    pub protocol: String,
    pub port: u16,
    #[serde(rename = "type")]
    pub candidate_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_type: Option<String>,
}

/// DTLS-Rolle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DtlsRole {
    #[default]
    Auto,
    Client,
    Server,
}

/// Zertifikats-Fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtlsFingerprint {
    pub algorithm: String,
    pub value: String,
}

/// DTLS-Parameter (Rolle + Fingerprints)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DtlsParameters {
    #[serde(default)]
    pub role: DtlsRole,
    pub fingerprints: Vec<DtlsFingerprint>,
}

/// SCTP-Parameter eines Transports mit Datenkanal-Unterstuetzung
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SctpParameters {
    pub port: u16,
    #[serde(rename = "OS")]
    pub os: u16,
    #[serde(rename = "MIS")]
    pub mis: u16,
    pub max_message_size: u32,
}

/// SCTP-Stream-Parameter eines Datenkanals
///
/// Ohne `max_packet_life_time` und `max_retransmits` ist der Kanal zuverlaessig.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SctpStreamParameters {
    pub stream_id: u16,
    #[serde(default = "standard_geordnet")]
    pub ordered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_packet_life_time: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retransmits: Option<u16>,
}

fn standard_geordnet() -> bool {
    true
}
