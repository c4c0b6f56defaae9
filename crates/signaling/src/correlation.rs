//! Zuordnung von Server-Antworten zu offenen Anfragen
//!
//! Primaer ueber die gespiegelte `requestId`. Server die sie nicht
//! zurueckgeben werden ueber Feld-Schluessel bedient: die erste offene
//! Anfrage (in Sendereihenfolge) deren [`CorrelationKey`] zur Antwort passt
//! bekommt sie.
//!
//! `error`-Nachrichten scheitern gezielt die Anfrage mit derselben
//! `requestId`, sonst die Anfrage deren Transport bzw. Producer genannt ist.

use parking_lot::Mutex;
use salon_core::{ParticipantSid, ProducerId, TrackSource, TransportDirection, TransportId};
use salon_protocol::{Envelope, ErrorBody, ServerMessage};
use tokio::sync::oneshot;

use crate::error::{SignalingError, SignalingResult};

/// Fallback-Schluessel einer Anfrage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrelationKey {
    Joined,
    TransportCreated(TransportDirection),
    TransportConnected(TransportId),
    TrackPublished {
        participant_sid: Option<ParticipantSid>,
        source: TrackSource,
    },
    TrackSubscribed(ProducerId),
    DataProducerCreated,
}

impl CorrelationKey {
    /// Prueft ob eine Server-Nachricht die Antwort auf diesen Schluessel ist
    pub fn passt_zu(&self, nachricht: &ServerMessage) -> bool {
        match (self, nachricht) {
            (CorrelationKey::Joined, ServerMessage::Joined { .. }) => true,
            (
                CorrelationKey::TransportCreated(richtung),
                ServerMessage::TransportCreated { direction, .. },
            ) => richtung == direction,
            (
                CorrelationKey::TransportConnected(id),
                ServerMessage::TransportConnected { transport_id },
            ) => id == transport_id,
            (
                CorrelationKey::TrackPublished {
                    participant_sid,
                    source,
                },
                ServerMessage::TrackPublished {
                    participant_sid: von,
                    track,
                },
            ) => track.source == *source && participant_sid.as_ref().map_or(true, |p| p == von),
            (
                CorrelationKey::TrackSubscribed(id),
                ServerMessage::TrackSubscribed { producer_id, .. },
            ) => id == producer_id,
            (CorrelationKey::DataProducerCreated, ServerMessage::DataProducerCreated { .. }) => {
                true
            }
            _ => false,
        }
    }

    /// Prueft ob ein Fehler ohne requestId diese Anfrage betrifft
    fn betrifft_fehler(&self, fehler: &ErrorBody) -> bool {
        match self {
            CorrelationKey::TransportConnected(id) => fehler.transport_id.as_ref() == Some(id),
            CorrelationKey::TrackSubscribed(id) => fehler.producer_id.as_ref() == Some(id),
            _ => false,
        }
    }
}

type Antwort = SignalingResult<ServerMessage>;

struct OffeneAnfrage {
    request_id: u32,
    schluessel: Option<CorrelationKey>,
    antwort: oneshot::Sender<Antwort>,
}

/// Tabelle offener Anfragen
#[derive(Default)]
pub struct Korrelator {
    offen: Mutex<Vec<OffeneAnfrage>>,
}

impl Korrelator {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Registriert eine Anfrage und liefert den Empfaenger ihrer Antwort
    pub fn registrieren(
        &self,
        request_id: u32,
        schluessel: Option<CorrelationKey>,
    ) -> oneshot::Receiver<Antwort> {
        let (tx, rx) = oneshot::channel();
        self.offen.lock().push(OffeneAnfrage {
            request_id,
            schluessel,
            antwort: tx,
        });
        rx
    }

    /// Entfernt eine Anfrage (Zeitlimit, Sendefehler)
    pub fn entfernen(&self, request_id: u32) -> bool {
        let mut offen = self.offen.lock();
        let vorher = offen.len();
        offen.retain(|a| a.request_id != request_id);
        offen.len() != vorher
    }

    /// Anzahl offener Anfragen
    pub fn anzahl(&self) -> usize {
        self.offen.lock().len()
    }

    /// Stellt eine Server-Nachricht zu
    ///
    /// Gibt true zurueck wenn sie eine offene Anfrage beantwortet hat.
    pub fn zustellen(&self, env: &Envelope<ServerMessage>) -> bool {
        let treffer = {
            let mut offen = self.offen.lock();
            let index = match (&env.message, env.request_id) {
                (_, Some(id)) => offen.iter().position(|a| a.request_id == id),
                (ServerMessage::Error { error }, None) => offen.iter().position(|a| {
                    a.schluessel
                        .as_ref()
                        .is_some_and(|k| k.betrifft_fehler(error))
                }),
                (nachricht, None) => offen.iter().position(|a| {
                    a.schluessel
                        .as_ref()
                        .is_some_and(|k| k.passt_zu(nachricht))
                }),
            };
            index.map(|i| offen.remove(i))
        };

        let Some(anfrage) = treffer else {
            if let Some(id) = env.request_id {
                tracing::warn!(
                    request_id = id,
                    typ = env.message.typ(),
                    "Antwort ohne offene Anfrage verworfen"
                );
            }
            return false;
        };

        let ergebnis = match &env.message {
            ServerMessage::Error { error } => Err(SignalingError::Server {
                code: error.code.clone(),
                nachricht: error.message.clone(),
            }),
            nachricht => Ok(nachricht.clone()),
        };
        // Empfaenger kann nach Zeitlimit bereits weg sein
        let _ = anfrage.antwort.send(ergebnis);
        true
    }

    /// Verwirft alle offenen Anfragen mit dem angegebenen Fehler
    pub fn alle_abbrechen(&self, fehler: SignalingError) -> usize {
        let offen: Vec<OffeneAnfrage> = std::mem::take(&mut *self.offen.lock());
        let anzahl = offen.len();
        for anfrage in offen {
            let _ = anfrage.antwort.send(Err(fehler.clone()));
        }
        if anzahl > 0 {
            tracing::debug!(anzahl, fehler = %fehler, "Offene Anfragen abgebrochen");
        }
        anzahl
    }
}
