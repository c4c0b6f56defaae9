//! Consumer-Verwaltung
//!
//! Abonniert entfernte Producer ueber den Recv-Transport:
//! `subscribe` -> `track_subscribed` -> Engine-Consumer -> lokal fortsetzen
//! -> `resume_consumer`.

use dashmap::DashMap;
use parking_lot::Mutex;
use salon_core::{ConsumerId, MediaKind, ProducerId, TrackSid, TransportDirection};
use salon_protocol::{ClientMessage, ServerMessage};
use salon_signaling::{CorrelationKey, SignalingClient};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::device::MediaTrack;
use crate::engine::{ConsumeOptions, EngineConsumer};
use crate::error::{MediaError, MediaResult};
use crate::transport_manager::TransportManager;

/// Ein abonnierter entfernter Track
#[derive(Debug, Clone)]
pub struct Subscription {
    pub consumer_id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub track_sid: Option<TrackSid>,
    pub track: Arc<dyn MediaTrack>,
}

struct Eintrag {
    consumer: Arc<dyn EngineConsumer>,
    track_sid: Option<TrackSid>,
}

impl Eintrag {
    fn abo(&self) -> Subscription {
        Subscription {
            consumer_id: self.consumer.id().clone(),
            producer_id: self.consumer.producer_id().clone(),
            kind: self.consumer.kind(),
            track_sid: self.track_sid.clone(),
            track: self.consumer.track(),
        }
    }
}

/// Markiert einen Producer als "Abo laeuft" bis zum Drop
struct Laufend<'a> {
    menge: &'a Mutex<HashSet<ProducerId>>,
    producer_id: ProducerId,
}

impl Drop for Laufend<'_> {
    fn drop(&mut self) {
        self.menge.lock().remove(&self.producer_id);
    }
}

pub struct ConsumerManager {
    transporte: Arc<TransportManager>,
    signaling: SignalingClient,
    consumers: DashMap<ConsumerId, Eintrag>,
    laufend: Mutex<HashSet<ProducerId>>,
    zeitlimit: Duration,
}

impl ConsumerManager {
    pub fn neu(
        transporte: Arc<TransportManager>,
        signaling: SignalingClient,
        subscribe_timeout: Duration,
    ) -> Self {
        Self {
            transporte,
            signaling,
            consumers: DashMap::new(),
            laufend: Mutex::new(HashSet::new()),
            zeitlimit: subscribe_timeout,
        }
    }

    /// Abonniert einen entfernten Producer
    ///
    /// Besteht bereits ein Consumer fuer den Producer, wird dieser geliefert.
    /// Ein zweites gleichzeitiges Abo desselben Producers wird abgelehnt.
    pub async fn subscribe(&self, producer_id: &ProducerId) -> MediaResult<Subscription> {
        self.subscribe_mit_zeitlimit(producer_id, self.zeitlimit).await
    }

    /// Wie [`subscribe`](Self::subscribe), mit eigenem Zeitlimit fuer die Server-Antwort
    pub async fn subscribe_mit_zeitlimit(
        &self,
        producer_id: &ProducerId,
        zeitlimit: Duration,
    ) -> MediaResult<Subscription> {
        if let Some(abo) = self.consumer_fuer_producer(producer_id) {
            return Ok(abo);
        }
        let transport = self
            .transporte
            .recv_transport()
            .ok_or(MediaError::TransportFehlt(TransportDirection::Recv))?;

        let _laufend = {
            let mut menge = self.laufend.lock();
            if !menge.insert(producer_id.clone()) {
                return Err(MediaError::LaeuftBereits(format!("subscribe {producer_id}")));
            }
            Laufend {
                menge: &self.laufend,
                producer_id: producer_id.clone(),
            }
        };

        let rtp_capabilities = self.transporte.rtp_capabilities()?;
        let antwort = self
            .signaling
            .anfragen(
                ClientMessage::Subscribe {
                    transport_id: transport.id().clone(),
                    producer_id: producer_id.clone(),
                    rtp_capabilities,
                },
                Some(CorrelationKey::TrackSubscribed(producer_id.clone())),
                Some(zeitlimit),
            )
            .await
            .map_err(|e| MediaError::aus_anfrage(e, "subscribe"))?;

        let ServerMessage::TrackSubscribed {
            id,
            producer_id: bestaetigt,
            kind,
            rtp_parameters,
            track_sid,
        } = antwort
        else {
            return Err(MediaError::UnerwarteteAntwort(antwort.typ().into()));
        };

        let consumer = transport
            .consume(ConsumeOptions {
                id: id.clone(),
                producer_id: bestaetigt,
                kind,
                rtp_parameters,
            })
            .await?;
        consumer.resume();
        if let Err(e) = self
            .signaling
            .senden(ClientMessage::ResumeConsumer {
                consumer_id: id.clone(),
            })
        {
            tracing::warn!(consumer_id = %id, fehler = %e, "resume_consumer nicht gesendet");
        }

        let eintrag = Eintrag {
            consumer,
            track_sid,
        };
        let abo = eintrag.abo();
        self.consumers.insert(id.clone(), eintrag);
        tracing::info!(consumer_id = %id, producer_id = %producer_id, kind = %kind, "Track abonniert");
        Ok(abo)
    }

    /// Beendet ein Abo und meldet es dem Server; unbekannte IDs werden ignoriert
    pub fn unsubscribe(&self, consumer_id: &ConsumerId) -> bool {
        if !self.lokal_schliessen(consumer_id) {
            return false;
        }
        if let Err(e) = self.signaling.senden(ClientMessage::Unsubscribe {
            consumer_id: consumer_id.clone(),
        }) {
            tracing::warn!(consumer_id = %consumer_id, fehler = %e, "unsubscribe nicht gesendet");
        }
        tracing::info!(consumer_id = %consumer_id, "Abo beendet");
        true
    }

    /// Schliesst einen Consumer ohne den Server zu benachrichtigen
    pub fn lokal_schliessen(&self, consumer_id: &ConsumerId) -> bool {
        match self.consumers.remove(consumer_id) {
            Some((_, eintrag)) => {
                eintrag.consumer.close();
                true
            }
            None => false,
        }
    }

    pub fn consumer(&self, consumer_id: &ConsumerId) -> Option<Subscription> {
        self.consumers.get(consumer_id).map(|e| e.abo())
    }

    pub fn consumer_fuer_producer(&self, producer_id: &ProducerId) -> Option<Subscription> {
        self.consumers
            .iter()
            .find(|e| e.consumer.producer_id() == producer_id)
            .map(|e| e.abo())
    }

    pub fn anzahl(&self) -> usize {
        self.consumers.len()
    }

    pub fn close_all(&self) {
        let ids: Vec<ConsumerId> = self.consumers.iter().map(|e| e.key().clone()).collect();
        for id in &ids {
            self.lokal_schliessen(id);
        }
    }
}
