//! Datenkanal-Verwaltung
//!
//! Daten-Producer laufen ueber den Send-Transport, Daten-Consumer ueber den
//! Recv-Transport. Zwei Voreinstellungen:
//!
//! | Art        | geordnet | Wiederholungen |
//! |------------|----------|----------------|
//! | `reliable` | ja       | unbegrenzt     |
//! | `lossy`    | nein     | 0              |

use bytes::Bytes;
use dashmap::DashMap;
use salon_core::{DataChannelKind, DataConsumerId, DataProducerId, TransportDirection};
use salon_protocol::{ClientMessage, SctpStreamParameters, ServerMessage};
use salon_signaling::{CorrelationKey, SignalingClient};
use std::sync::Arc;
use std::time::Duration;

use crate::engine::{
    DataConsumeOptions, DataProducerOptions, EngineDataConsumer, EngineDataProducer,
    ProduceDataRequest,
};
use crate::error::{MediaError, MediaResult};
use crate::transport_manager::TransportManager;

/// Abweichungen von der Voreinstellung einer [`DataChannelKind`]
#[derive(Debug, Clone, Default)]
pub struct DataChannelOptions {
    pub label: Option<String>,
    pub ordered: Option<bool>,
    pub max_packet_life_time: Option<u16>,
    pub max_retransmits: Option<u16>,
    pub protocol: String,
}

impl DataChannelOptions {
    /// Vollstaendige Optionen fuer `kind`
    pub fn fuer(&self, kind: DataChannelKind) -> DataProducerOptions {
        let (ordered, max_retransmits) = match kind {
            DataChannelKind::Reliable => (true, None),
            DataChannelKind::Lossy => (false, Some(0)),
        };
        DataProducerOptions {
            label: self.label.clone().unwrap_or_else(|| kind.label().to_string()),
            protocol: self.protocol.clone(),
            ordered: self.ordered.unwrap_or(ordered),
            max_packet_life_time: self.max_packet_life_time,
            max_retransmits: self.max_retransmits.or(max_retransmits),
        }
    }
}

/// Ankuendigung eines Daten-Consumers durch den Server
#[derive(Debug, Clone)]
pub struct DataConsumerAnkuendigung {
    pub id: DataConsumerId,
    pub data_producer_id: DataProducerId,
    pub sctp_stream_parameters: SctpStreamParameters,
    pub label: String,
    pub protocol: String,
}

struct DatenProducer {
    kind: DataChannelKind,
    producer: Arc<dyn EngineDataProducer>,
}

pub struct DataChannelManager {
    transporte: Arc<TransportManager>,
    signaling: SignalingClient,
    producers: DashMap<DataProducerId, DatenProducer>,
    consumers: DashMap<DataConsumerId, Arc<dyn EngineDataConsumer>>,
    zeitlimit: Duration,
}

impl DataChannelManager {
    /// Erstellt den Manager und registriert ihn als Producedata-Callback
    pub fn neu(
        transporte: Arc<TransportManager>,
        signaling: SignalingClient,
        request_timeout: Duration,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            transporte,
            signaling,
            producers: DashMap::new(),
            consumers: DashMap::new(),
            zeitlimit: request_timeout,
        });

        let schwach = Arc::downgrade(&manager);
        manager
            .transporte
            .verbindungen()
            .set_produce_data_callback(Arc::new(move |anfrage| {
                let schwach = schwach.clone();
                Box::pin(async move {
                    let manager = schwach
                        .upgrade()
                        .ok_or_else(|| MediaError::Geschlossen("Datenkanal-Manager".into()))?;
                    manager.beim_server_anlegen(anfrage).await
                })
            }));
        manager
    }

    async fn beim_server_anlegen(&self, anfrage: ProduceDataRequest) -> MediaResult<DataProducerId> {
        let antwort = self
            .signaling
            .anfragen(
                ClientMessage::CreateDataProducer {
                    transport_id: anfrage.transport_id,
                    sctp_stream_parameters: anfrage.sctp_stream_parameters,
                    label: anfrage.label,
                    protocol: anfrage.protocol,
                },
                Some(CorrelationKey::DataProducerCreated),
                Some(self.zeitlimit),
            )
            .await
            .map_err(|e| MediaError::aus_anfrage(e, "create_data_producer"))?;

        match antwort {
            ServerMessage::DataProducerCreated { id } => Ok(id),
            andere => Err(MediaError::UnerwarteteAntwort(andere.typ().into())),
        }
    }

    /// Oeffnet einen Daten-Producer auf dem Send-Transport
    pub async fn create_data_producer(
        &self,
        kind: DataChannelKind,
        optionen: DataChannelOptions,
    ) -> MediaResult<Arc<dyn EngineDataProducer>> {
        let transport = self
            .transporte
            .send_transport()
            .ok_or(MediaError::TransportFehlt(TransportDirection::Send))?;
        let producer = transport.produce_data(optionen.fuer(kind)).await?;

        let id = producer.id().clone();
        self.producers.insert(
            id.clone(),
            DatenProducer {
                kind,
                producer: Arc::clone(&producer),
            },
        );
        tracing::info!(data_producer_id = %id, label = producer.label(), "Datenkanal geoeffnet");
        Ok(producer)
    }

    /// Schliesst einen Daten-Producer; unbekannte IDs werden ignoriert
    pub fn close_data_producer(&self, id: &DataProducerId) -> bool {
        let Some((_, eintrag)) = self.producers.remove(id) else {
            return false;
        };
        eintrag.producer.close();
        if let Err(e) = self.signaling.senden(ClientMessage::CloseDataProducer {
            data_producer_id: id.clone(),
        }) {
            tracing::warn!(data_producer_id = %id, fehler = %e, "close_data_producer nicht gesendet");
        }
        true
    }

    /// Nimmt einen vom Server angekuendigten Daten-Consumer an
    ///
    /// Ist er bereits bekannt, wird der bestehende geliefert.
    pub async fn add_data_consumer(
        &self,
        ankuendigung: DataConsumerAnkuendigung,
    ) -> MediaResult<Arc<dyn EngineDataConsumer>> {
        if let Some(bestehend) = self.consumers.get(&ankuendigung.id) {
            return Ok(Arc::clone(bestehend.value()));
        }
        let transport = self
            .transporte
            .recv_transport()
            .ok_or(MediaError::TransportFehlt(TransportDirection::Recv))?;

        let id = ankuendigung.id.clone();
        let consumer = transport
            .consume_data(DataConsumeOptions {
                id: ankuendigung.id,
                data_producer_id: ankuendigung.data_producer_id,
                sctp_stream_parameters: ankuendigung.sctp_stream_parameters,
                label: ankuendigung.label,
                protocol: ankuendigung.protocol,
            })
            .await?;

        let consumer = self
            .consumers
            .entry(id.clone())
            .or_insert(consumer)
            .value()
            .clone();
        tracing::debug!(data_consumer_id = %id, label = consumer.label(), "Daten-Consumer angelegt");
        Ok(consumer)
    }

    /// Schliesst einen Daten-Consumer; unbekannte IDs werden ignoriert
    pub fn close_data_consumer(&self, id: &DataConsumerId) -> bool {
        match self.consumers.remove(id) {
            Some((_, consumer)) => {
                consumer.close();
                true
            }
            None => false,
        }
    }

    /// Ein offener Daten-Producer der angegebenen Art
    pub fn producer_fuer_art(&self, kind: DataChannelKind) -> Option<Arc<dyn EngineDataProducer>> {
        self.producers
            .iter()
            .find(|e| e.kind == kind && !e.producer.is_closed())
            .map(|e| Arc::clone(&e.producer))
    }

    /// Sendet ueber einen offenen Producer der Art; `false` wenn keiner offen ist
    pub fn senden(&self, kind: DataChannelKind, daten: Bytes) -> MediaResult<bool> {
        match self.producer_fuer_art(kind) {
            Some(producer) => producer.send(daten).map(|_| true),
            None => Ok(false),
        }
    }

    pub fn anzahl_producer(&self) -> usize {
        self.producers.len()
    }

    pub fn anzahl_consumer(&self) -> usize {
        self.consumers.len()
    }

    /// Schliesst alles ohne den Server zu benachrichtigen
    pub fn close_all(&self) {
        for eintrag in self.producers.iter() {
            eintrag.producer.close();
        }
        self.producers.clear();
        for consumer in self.consumers.iter() {
            consumer.close();
        }
        self.consumers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{transporte, warten_bis};
    use salon_signaling::mock::{MockSfu, MockSfuOptionen};

    async fn manager() -> (Arc<DataChannelManager>, MockSfu) {
        let (sfu, signaling, transporte) = transporte(MockSfuOptionen::default()).await;
        (
            DataChannelManager::neu(transporte, signaling, Duration::from_secs(1)),
            sfu,
        )
    }

    #[test]
    fn voreinstellungen_je_art() {
        let reliable = DataChannelOptions::default().fuer(DataChannelKind::Reliable);
        assert!(reliable.ordered);
        assert_eq!(reliable.max_retransmits, None);
        assert_eq!(reliable.label, "_reliable");

        let lossy = DataChannelOptions::default().fuer(DataChannelKind::Lossy);
        assert!(!lossy.ordered);
        assert_eq!(lossy.max_retransmits, Some(0));

        let eigenes = DataChannelOptions {
            label: Some("chat".into()),
            ordered: Some(true),
            ..Default::default()
        }
        .fuer(DataChannelKind::Lossy);
        assert!(eigenes.ordered);
        assert_eq!(eigenes.label, "chat");
    }

    #[tokio::test]
    async fn producer_oeffnen_senden_schliessen() {
        let (m, sfu) = manager().await;
        let producer = m
            .create_data_producer(DataChannelKind::Lossy, DataChannelOptions::default())
            .await
            .unwrap();

        let anfrage = sfu.empfangene_vom_typ("create_data_producer");
        assert!(matches!(
            &anfrage[0],
            ClientMessage::CreateDataProducer { sctp_stream_parameters, label, .. }
                if !sctp_stream_parameters.ordered
                    && sctp_stream_parameters.max_retransmits == Some(0)
                    && label == "_lossy"
        ));

        assert!(m.producer_fuer_art(DataChannelKind::Reliable).is_none());
        assert!(m
            .senden(DataChannelKind::Lossy, Bytes::from_static(b"hallo"))
            .unwrap());
        assert!(!m
            .senden(DataChannelKind::Reliable, Bytes::from_static(b"x"))
            .unwrap());

        assert!(m.close_data_producer(producer.id()));
        assert!(!m.close_data_producer(producer.id()));
        assert!(producer.is_closed());
        assert!(warten_bis(|| sfu.empfangene_vom_typ("close_data_producer").len() == 1).await);
    }

    #[tokio::test]
    async fn consumer_hinzufuegen_ist_idempotent() {
        let (m, _sfu) = manager().await;
        let ankuendigung = DataConsumerAnkuendigung {
            id: DataConsumerId::new("DC1"),
            data_producer_id: DataProducerId::new("DP_remote"),
            sctp_stream_parameters: SctpStreamParameters {
                stream_id: 3,
                ordered: true,
                max_packet_life_time: None,
                max_retransmits: None,
            },
            label: "_reliable".into(),
            protocol: String::new(),
        };
        m.add_data_consumer(ankuendigung.clone()).await.unwrap();
        m.add_data_consumer(ankuendigung).await.unwrap();
        assert_eq!(m.anzahl_consumer(), 1);

        assert!(m.close_data_consumer(&DataConsumerId::new("DC1")));
        assert!(!m.close_data_consumer(&DataConsumerId::new("DC1")));
    }
}
