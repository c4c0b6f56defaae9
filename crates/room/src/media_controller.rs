//! Medien-Lebenszyklus eines Raums
//!
//! Besitzt die Manager der Medien-Schicht und initialisiert sie hoechstens
//! einmal pro Sitzung: Engine laden, Send- und Recv-Transport anlegen.
//! Gleichzeitige Aufrufer warten auf dieselbe Initialisierung.

use parking_lot::Mutex;
use salon_media::{
    ConsumerManager, DataChannelManager, MediaEngine, ProducerManager, TransportManager,
};
use salon_protocol::RtpCapabilities;
use salon_signaling::SignalingClient;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::config::RoomOptions;
use crate::error::{RoomError, RoomResult};

type BereitCallback = Arc<dyn Fn() + Send + Sync>;

pub struct MediaController {
    transporte: Arc<TransportManager>,
    producer: Arc<ProducerManager>,
    consumer: ConsumerManager,
    daten: Arc<DataChannelManager>,
    /// Wird pro Sitzung ersetzt
    init: Mutex<Arc<OnceCell<()>>>,
    bei_verbindung: BereitCallback,
}

impl MediaController {
    /// `bei_verbindung` laeuft jedes Mal wenn beide Transporte einer Sitzung verbunden sind
    pub fn neu(
        engine: Arc<dyn MediaEngine>,
        signaling: SignalingClient,
        optionen: &RoomOptions,
        bei_verbindung: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        let transporte = Arc::new(TransportManager::neu(
            engine,
            signaling.clone(),
            optionen.request_timeout(),
        ));
        let producer = ProducerManager::neu(
            Arc::clone(&transporte),
            signaling.clone(),
            optionen.publish_timeout(),
        );
        let consumer = ConsumerManager::neu(
            Arc::clone(&transporte),
            signaling.clone(),
            optionen.subscribe_timeout(),
        );
        let daten = DataChannelManager::neu(
            Arc::clone(&transporte),
            signaling,
            optionen.request_timeout(),
        );
        Self {
            transporte,
            producer,
            consumer,
            daten,
            init: Mutex::new(Arc::new(OnceCell::new())),
            bei_verbindung: Arc::new(bei_verbindung),
        }
    }

    /// Initialisiert Engine und Transporte falls noch nicht geschehen
    ///
    /// Ohne Server-Faehigkeiten schlaegt das mit
    /// [`RoomError::FaehigkeitenFehlen`] fehl, ohne Nebenwirkungen.
    pub async fn sicherstellen(&self, faehigkeiten: Option<&RtpCapabilities>) -> RoomResult<()> {
        let faehigkeiten = faehigkeiten.ok_or(RoomError::FaehigkeitenFehlen)?;
        let zelle = self.init.lock().clone();

        zelle
            .get_or_try_init(|| async {
                let ergebnis = self.aufbauen(faehigkeiten).await;
                if ergebnis.is_err() {
                    self.transporte.close();
                }
                ergebnis
            })
            .await?;
        Ok(())
    }

    async fn aufbauen(&self, faehigkeiten: &RtpCapabilities) -> RoomResult<()> {
        self.transporte.initialize(faehigkeiten).await?;
        self.transporte.create_send_transport().await?;
        self.transporte.create_recv_transport().await?;

        let callback = Arc::clone(&self.bei_verbindung);
        self.transporte
            .verbindungen()
            .on_transports_connected(move || callback());
        tracing::info!("WebRTC initialisiert, Transporte angelegt");
        Ok(())
    }

    pub fn ist_initialisiert(&self) -> bool {
        self.init.lock().initialized()
    }

    /// Schliesst alle Producer, Consumer, Datenkanaele und Transporte
    ///
    /// Der Server wird nicht benachrichtigt. Danach kann neu initialisiert werden.
    pub fn schliessen(&self) {
        let war_aktiv = {
            let mut init = self.init.lock();
            std::mem::replace(&mut *init, Arc::new(OnceCell::new())).initialized()
        };
        self.producer.close_all();
        self.consumer.close_all();
        self.daten.close_all();
        self.transporte.close();
        if war_aktiv {
            tracing::info!("Medien geschlossen");
        }
    }

    pub fn transporte(&self) -> &Arc<TransportManager> {
        &self.transporte
    }

    pub fn producer(&self) -> &Arc<ProducerManager> {
        &self.producer
    }

    pub fn consumer(&self) -> &ConsumerManager {
        &self.consumer
    }

    pub fn daten(&self) -> &Arc<DataChannelManager> {
        &self.daten
    }
}
