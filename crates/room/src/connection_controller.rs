//! Beitreten und Verlassen
//!
//! Haelt die vom Server bestaetigte Sitzung: Raum, Router-Faehigkeiten und
//! den Zeitpunkt des Beitritts.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use salon_protocol::{ClientMessage, ParticipantInfo, RoomInfo, RtpCapabilities, ServerMessage};
use salon_signaling::{CorrelationKey, SignalingClient, SignalingError};

use crate::config::RoomOptions;
use crate::error::{RoomError, RoomResult};

/// Vom Server bestaetigte Sitzung
#[derive(Debug, Clone)]
pub struct Sitzung {
    pub room: RoomInfo,
    pub rtp_capabilities: Option<RtpCapabilities>,
    pub joined_at: DateTime<Utc>,
}

/// Inhalt einer `joined`-Antwort
#[derive(Debug, Clone)]
pub struct Beitritt {
    pub room: RoomInfo,
    pub participant: ParticipantInfo,
    pub other_participants: Vec<ParticipantInfo>,
    pub rtp_capabilities: Option<RtpCapabilities>,
}

pub struct ConnectionController {
    signaling: SignalingClient,
    optionen: RoomOptions,
    sitzung: RwLock<Option<Sitzung>>,
}

impl ConnectionController {
    pub fn neu(signaling: SignalingClient, optionen: RoomOptions) -> Self {
        Self {
            signaling,
            optionen,
            sitzung: RwLock::new(None),
        }
    }

    /// Sendet `join` und wartet auf `joined`
    ///
    /// `reconnect` markiert den erneuten Beitritt nach einer Wiederverbindung.
    pub async fn join(&self, reconnect: bool) -> RoomResult<Beitritt> {
        let antwort = self
            .signaling
            .anfragen(
                ClientMessage::Join {
                    token: self.optionen.token.clone(),
                    name: self.optionen.name.clone(),
                    metadata: self.optionen.metadata.clone(),
                    reconnect,
                },
                Some(CorrelationKey::Joined),
                Some(self.optionen.join_timeout()),
            )
            .await
            .map_err(|e| match e {
                SignalingError::Zeitlimit(_) => RoomError::Zeitlimit("join".into()),
                andere => RoomError::Signaling(andere),
            })?;

        let ServerMessage::Joined {
            room,
            participant,
            other_participants,
            rtp_capabilities,
        } = antwort
        else {
            return Err(RoomError::UnerwarteteAntwort(antwort.typ().into()));
        };

        tracing::info!(
            room = %room.sid,
            participant = %participant.sid,
            andere = other_participants.len(),
            reconnect,
            "Raum beigetreten"
        );
        Ok(Beitritt {
            room,
            participant,
            other_participants,
            rtp_capabilities,
        })
    }

    /// Uebernimmt einen Beitritt als aktuelle Sitzung
    pub fn sitzung_setzen(&self, beitritt: &Beitritt) {
        *self.sitzung.write() = Some(Sitzung {
            room: beitritt.room.clone(),
            rtp_capabilities: beitritt.rtp_capabilities.clone(),
            joined_at: Utc::now(),
        });
    }

    /// Meldet das Verlassen; Fehler werden nur geloggt
    pub fn leave(&self) {
        if self.sitzung.write().take().is_none() {
            return;
        }
        if let Err(e) = self.signaling.senden(ClientMessage::Leave) {
            tracing::debug!(fehler = %e, "leave nicht gesendet");
        }
    }

    /// Vergisst die Sitzung ohne den Server zu benachrichtigen
    pub fn vergessen(&self) {
        self.sitzung.write().take();
    }

    pub fn sitzung(&self) -> Option<Sitzung> {
        self.sitzung.read().clone()
    }

    pub fn rtp_capabilities(&self) -> Option<RtpCapabilities> {
        self.sitzung.read().as_ref()?.rtp_capabilities.clone()
    }
}
