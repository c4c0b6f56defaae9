//! Transport-Verbindungsverwaltung
//!
//! Beantwortet die Rueckfragen der Engine ([`TransportHandler`]) ueber das
//! Signaling und fuehrt Buch darueber, welche Transporte verbunden sind.
//!
//! ```text
//!  Engine (send) --connect--> connect_transport --> transport_connected --> send = true --+
//!  Engine (recv) --connect--> connect_transport --> transport_connected --> recv = true --+
//!                                                                                        |
//!                                 beide verbunden (Uebergang) <--------------------------+
//!                                        |
//!                                        +--> registrierte Callbacks (je einmal)
//!                                        +--> wait_for_transports_connected() wacht auf
//! ```
//!
//! `produce`/`producedata` werden an Callbacks weitergereicht, die der
//! Producer- bzw. Datenkanal-Manager setzt.

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use salon_core::{DataProducerId, ProducerId, TransportDirection, TransportId};
use salon_protocol::{ClientMessage, DtlsParameters, ServerMessage};
use salon_signaling::{CorrelationKey, SignalingClient};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;
use tokio::sync::watch;

use crate::engine::{EngineTransportState, ProduceDataRequest, ProduceRequest, TransportHandler};
use crate::error::{MediaError, MediaResult};

/// Legt einen Producer beim Server an
pub type ProduceCallback =
    std::sync::Arc<dyn Fn(ProduceRequest) -> BoxFuture<'static, MediaResult<ProducerId>> + Send + Sync>;

/// Legt einen Daten-Producer beim Server an
pub type ProduceDataCallback = std::sync::Arc<
    dyn Fn(ProduceDataRequest) -> BoxFuture<'static, MediaResult<DataProducerId>> + Send + Sync,
>;

type BereitCallback = Box<dyn FnOnce() + Send>;

#[derive(Debug, Default)]
struct Flags {
    send: bool,
    recv: bool,
    /// Der Uebergang nach "beide verbunden" wurde bereits gemeldet
    gemeldet: bool,
}

impl Flags {
    fn setzen(&mut self, richtung: TransportDirection, wert: bool) {
        match richtung {
            TransportDirection::Send => self.send = wert,
            TransportDirection::Recv => self.recv = wert,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Bereitschaft {
    /// Wird bei jedem Zuruecksetzen erhoeht
    epoche: u64,
    verbunden: bool,
}

/// Verbindungszustand der Transporte einer Sitzung
pub struct TransportConnectionManager {
    signaling: SignalingClient,
    zeitlimit: Duration,
    flags: Mutex<Flags>,
    callbacks: Mutex<Vec<BereitCallback>>,
    bereitschaft: watch::Sender<Bereitschaft>,
    richtungen: DashMap<TransportId, TransportDirection>,
    produce: RwLock<Option<ProduceCallback>>,
    produce_data: RwLock<Option<ProduceDataCallback>>,
}

impl TransportConnectionManager {
    pub fn neu(signaling: SignalingClient, zeitlimit: Duration) -> Self {
        let (bereitschaft, _) = watch::channel(Bereitschaft::default());
        Self {
            signaling,
            zeitlimit,
            flags: Mutex::new(Flags::default()),
            callbacks: Mutex::new(Vec::new()),
            bereitschaft,
            richtungen: DashMap::new(),
            produce: RwLock::new(None),
            produce_data: RwLock::new(None),
        }
    }

    /// Macht einen Transport bekannt; `produce` ist nur auf Send-Transporten erlaubt
    pub fn transport_registrieren(&self, id: TransportId, richtung: TransportDirection) {
        self.richtungen.insert(id, richtung);
    }

    pub fn set_produce_callback(&self, callback: ProduceCallback) {
        *self.produce.write() = Some(callback);
    }

    pub fn set_produce_data_callback(&self, callback: ProduceDataCallback) {
        *self.produce_data.write() = Some(callback);
    }

    /// Sind beide Transporte verbunden?
    pub fn ist_verbunden(&self) -> bool {
        let flags = self.flags.lock();
        flags.send && flags.recv
    }

    pub fn richtung_verbunden(&self, richtung: TransportDirection) -> bool {
        let flags = self.flags.lock();
        match richtung {
            TransportDirection::Send => flags.send,
            TransportDirection::Recv => flags.recv,
        }
    }

    /// Ruft `callback` einmal auf sobald beide Transporte verbunden sind
    ///
    /// Sind sie es bereits, geschieht das sofort.
    pub fn on_transports_connected<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let flags = self.flags.lock();
            if !flags.gemeldet {
                self.callbacks.lock().push(Box::new(callback));
                return;
            }
        }
        Self::aufrufen(Box::new(callback));
    }

    /// Wartet bis beide Transporte verbunden sind
    ///
    /// Schlaegt mit [`MediaError::Zurueckgesetzt`] fehl wenn die Sitzung
    /// vorher abgebaut wird.
    pub async fn wait_for_transports_connected(&self) -> MediaResult<()> {
        let mut rx = self.bereitschaft.subscribe();
        let start = rx.borrow_and_update().epoche;
        let ergebnis = rx
            .wait_for(|b| b.verbunden || b.epoche != start)
            .await
            .map(|b| b.epoche == start);
        match ergebnis {
            Ok(true) => Ok(()),
            _ => Err(MediaError::Zurueckgesetzt),
        }
    }

    /// Vergisst alle Transporte; wartende Aufrufer scheitern
    pub fn zuruecksetzen(&self) {
        {
            let mut flags = self.flags.lock();
            *flags = Flags::default();
            self.callbacks.lock().clear();
        }
        self.richtungen.clear();
        self.bereitschaft.send_modify(|b| {
            b.epoche += 1;
            b.verbunden = false;
        });
        tracing::debug!("Transport-Verbindungen zurueckgesetzt");
    }

    fn als_verbunden_markieren(&self, richtung: TransportDirection) {
        let faellig = {
            let mut flags = self.flags.lock();
            flags.setzen(richtung, true);
            if flags.send && flags.recv && !flags.gemeldet {
                flags.gemeldet = true;
                Some(std::mem::take(&mut *self.callbacks.lock()))
            } else {
                None
            }
        };

        let Some(callbacks) = faellig else {
            return;
        };
        self.bereitschaft.send_modify(|b| b.verbunden = true);
        tracing::info!(callbacks = callbacks.len(), "Send- und Recv-Transport verbunden");
        for callback in callbacks {
            Self::aufrufen(callback);
        }
    }

    fn als_getrennt_markieren(&self, richtung: TransportDirection) {
        let war_gemeldet = {
            let mut flags = self.flags.lock();
            flags.setzen(richtung, false);
            std::mem::replace(&mut flags.gemeldet, false)
        };
        if war_gemeldet {
            self.bereitschaft.send_modify(|b| b.verbunden = false);
        }
    }

    fn aufrufen(callback: BereitCallback) {
        if catch_unwind(AssertUnwindSafe(callback)).is_err() {
            tracing::warn!("Callback fuer verbundene Transporte ist abgestuerzt");
        }
    }

    fn sende_richtung_pruefen(&self, transport_id: &TransportId, was: &str) -> MediaResult<()> {
        match self.richtungen.get(transport_id).map(|r| *r) {
            Some(TransportDirection::Send) => Ok(()),
            Some(TransportDirection::Recv) => Err(MediaError::FalscheRichtung(format!(
                "{was} auf Recv-Transport {transport_id}"
            ))),
            None => Err(MediaError::FalscheRichtung(format!(
                "{was} auf unbekanntem Transport {transport_id}"
            ))),
        }
    }
}

#[async_trait]
impl TransportHandler for TransportConnectionManager {
    async fn connect(
        &self,
        transport_id: &TransportId,
        direction: TransportDirection,
        dtls_parameters: DtlsParameters,
    ) -> MediaResult<()> {
        let epoche = self.bereitschaft.borrow().epoche;
        tracing::debug!(transport_id = %transport_id, richtung = %direction, "DTLS-Verbindung angefragt");

        let antwort = self
            .signaling
            .anfragen(
                ClientMessage::ConnectTransport {
                    transport_id: transport_id.clone(),
                    dtls_parameters,
                },
                Some(CorrelationKey::TransportConnected(transport_id.clone())),
                Some(self.zeitlimit),
            )
            .await
            .map_err(|e| MediaError::aus_anfrage(e, "connect_transport"))?;

        if !matches!(antwort, ServerMessage::TransportConnected { .. }) {
            return Err(MediaError::UnerwarteteAntwort(antwort.typ().into()));
        }
        if self.bereitschaft.borrow().epoche != epoche {
            return Err(MediaError::Zurueckgesetzt);
        }

        tracing::info!(transport_id = %transport_id, richtung = %direction, "Transport verbunden");
        self.als_verbunden_markieren(direction);
        Ok(())
    }

    async fn produce(&self, request: ProduceRequest) -> MediaResult<ProducerId> {
        self.sende_richtung_pruefen(&request.transport_id, "produce")?;
        let callback = self
            .produce
            .read()
            .clone()
            .ok_or_else(|| MediaError::engine("kein Produce-Callback gesetzt"))?;
        callback(request).await
    }

    async fn produce_data(&self, request: ProduceDataRequest) -> MediaResult<DataProducerId> {
        self.sende_richtung_pruefen(&request.transport_id, "producedata")?;
        let callback = self
            .produce_data
            .read()
            .clone()
            .ok_or_else(|| MediaError::engine("kein Producedata-Callback gesetzt"))?;
        callback(request).await
    }

    fn state_changed(
        &self,
        transport_id: &TransportId,
        direction: TransportDirection,
        state: EngineTransportState,
    ) {
        match state {
            EngineTransportState::Failed | EngineTransportState::Closed => {
                tracing::debug!(transport_id = %transport_id, ?state, "Transport nicht mehr verbunden");
                self.als_getrennt_markieren(direction);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::signaling_mit_sfu;
    use salon_protocol::DtlsRole;
    use salon_signaling::mock::{MockSfu, MockSfuOptionen};
    use salon_signaling::SignalingError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn dtls() -> DtlsParameters {
        DtlsParameters {
            role: DtlsRole::Client,
            fingerprints: Vec::new(),
        }
    }

    async fn manager(optionen: MockSfuOptionen) -> (Arc<TransportConnectionManager>, MockSfu) {
        let (sfu, signaling) = signaling_mit_sfu(optionen).await;
        let m = Arc::new(TransportConnectionManager::neu(
            signaling,
            Duration::from_secs(5),
        ));
        m.transport_registrieren(TransportId::new("TS"), TransportDirection::Send);
        m.transport_registrieren(TransportId::new("TR"), TransportDirection::Recv);
        (m, sfu)
    }

    #[tokio::test]
    async fn callbacks_feuern_genau_einmal_beim_uebergang() {
        let (m, sfu) = manager(MockSfuOptionen::default()).await;
        let zaehler = Arc::new(AtomicUsize::new(0));
        let z = Arc::clone(&zaehler);
        m.on_transports_connected(move || {
            z.fetch_add(1, Ordering::SeqCst);
        });

        m.connect(&TransportId::new("TS"), TransportDirection::Send, dtls())
            .await
            .unwrap();
        assert_eq!(zaehler.load(Ordering::SeqCst), 0);
        assert!(!m.ist_verbunden());

        m.connect(&TransportId::new("TR"), TransportDirection::Recv, dtls())
            .await
            .unwrap();
        assert_eq!(zaehler.load(Ordering::SeqCst), 1);
        assert!(m.ist_verbunden());

        // erneutes connect ist kein neuer Uebergang
        m.connect(&TransportId::new("TR"), TransportDirection::Recv, dtls())
            .await
            .unwrap();
        assert_eq!(zaehler.load(Ordering::SeqCst), 1);
        assert_eq!(sfu.empfangene_vom_typ("connect_transport").len(), 3);
    }

    #[tokio::test]
    async fn spaeter_callback_feuert_sofort() {
        let (m, _sfu) = manager(MockSfuOptionen::default()).await;
        m.connect(&TransportId::new("TS"), TransportDirection::Send, dtls())
            .await
            .unwrap();
        m.connect(&TransportId::new("TR"), TransportDirection::Recv, dtls())
            .await
            .unwrap();

        let zaehler = Arc::new(AtomicUsize::new(0));
        let z = Arc::clone(&zaehler);
        m.on_transports_connected(move || {
            z.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(zaehler.load(Ordering::SeqCst), 1);
        m.wait_for_transports_connected().await.unwrap();
    }

    #[tokio::test]
    async fn viele_wartende_werden_gemeinsam_geweckt() {
        let (m, _sfu) = manager(MockSfuOptionen::default()).await;
        let wartende: Vec<_> = (0..3)
            .map(|_| {
                let m = Arc::clone(&m);
                tokio::spawn(async move { m.wait_for_transports_connected().await })
            })
            .collect();
        tokio::task::yield_now().await;

        m.connect(&TransportId::new("TS"), TransportDirection::Send, dtls())
            .await
            .unwrap();
        m.connect(&TransportId::new("TR"), TransportDirection::Recv, dtls())
            .await
            .unwrap();
        for w in wartende {
            assert!(w.await.unwrap().is_ok());
        }
    }

    #[tokio::test]
    async fn zuruecksetzen_weist_wartende_ab() {
        let (m, _sfu) = manager(MockSfuOptionen::default()).await;
        let wartend = {
            let m = Arc::clone(&m);
            tokio::spawn(async move { m.wait_for_transports_connected().await })
        };
        tokio::task::yield_now().await;
        m.zuruecksetzen();
        assert!(matches!(
            wartend.await.unwrap(),
            Err(MediaError::Zurueckgesetzt)
        ));
    }

    #[tokio::test]
    async fn fehlerantwort_scheitert_nur_fuer_diesen_transport() {
        let (m, sfu) = manager(MockSfuOptionen::default()).await;
        // Richtung fuer den Mock bekannt machen: echten Transport anlegen lassen
        let antwort = sfu_transport(&m, TransportDirection::Recv).await;
        sfu.optionen_aendern(|o| o.connect_fehler = Some(TransportDirection::Recv));

        let fehler = m
            .connect(&antwort, TransportDirection::Recv, dtls())
            .await
            .unwrap_err();
        assert!(matches!(
            fehler,
            MediaError::Signaling(SignalingError::Server { .. })
        ));
        m.connect(&TransportId::new("TS"), TransportDirection::Send, dtls())
            .await
            .unwrap();
        assert!(m.richtung_verbunden(TransportDirection::Send));
        assert!(!m.richtung_verbunden(TransportDirection::Recv));
    }

    async fn sfu_transport(m: &TransportConnectionManager, richtung: TransportDirection) -> TransportId {
        match m
            .signaling
            .anfragen(
                ClientMessage::CreateTransport {
                    direction: richtung,
                    rtp_capabilities: Default::default(),
                },
                Some(CorrelationKey::TransportCreated(richtung)),
                None,
            )
            .await
            .unwrap()
        {
            ServerMessage::TransportCreated { id, .. } => id,
            andere => panic!("unerwartet: {andere:?}"),
        }
    }

    #[tokio::test]
    async fn ausfall_loescht_flag_und_naechster_uebergang_meldet_erneut() {
        let (m, _sfu) = manager(MockSfuOptionen::default()).await;
        for (id, r) in [("TS", TransportDirection::Send), ("TR", TransportDirection::Recv)] {
            m.connect(&TransportId::new(id), r, dtls()).await.unwrap();
        }
        m.state_changed(
            &TransportId::new("TR"),
            TransportDirection::Recv,
            EngineTransportState::Failed,
        );
        assert!(!m.ist_verbunden());

        let zaehler = Arc::new(AtomicUsize::new(0));
        let z = Arc::clone(&zaehler);
        m.on_transports_connected(move || {
            z.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(zaehler.load(Ordering::SeqCst), 0);

        m.connect(&TransportId::new("TR"), TransportDirection::Recv, dtls())
            .await
            .unwrap();
        assert_eq!(zaehler.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn produce_auf_recv_transport_abgelehnt() {
        let (m, _sfu) = manager(MockSfuOptionen::default()).await;
        m.set_produce_callback(Arc::new(|_| {
            Box::pin(async { Ok(ProducerId::new("P1")) })
        }));
        let anfrage = |id: &str| ProduceRequest {
            transport_id: TransportId::new(id),
            kind: salon_core::MediaKind::Audio,
            rtp_parameters: Default::default(),
            app_data: serde_json::json!({}),
        };
        assert!(matches!(
            m.produce(anfrage("TR")).await,
            Err(MediaError::FalscheRichtung(_))
        ));
        assert_eq!(m.produce(anfrage("TS")).await.unwrap(), ProducerId::new("P1"));
    }
}
