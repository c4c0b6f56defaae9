//! Transport-Verwaltung
//!
//! Laedt die Router-Faehigkeiten einmal pro Sitzung in die Engine und legt
//! den Send- und den Recv-Transport beim Server an. Pro Richtung existiert
//! hoechstens ein Transport.

use parking_lot::Mutex;
use salon_core::TransportDirection;
use salon_protocol::{ClientMessage, RtpCapabilities, ServerMessage};
use salon_signaling::{CorrelationKey, SignalingClient};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::connection_manager::TransportConnectionManager;
use crate::engine::{EngineTransport, MediaEngine, TransportHandler, TransportOptions};
use crate::error::{MediaError, MediaResult};

#[derive(Default)]
struct Slots {
    send: Option<Arc<dyn EngineTransport>>,
    recv: Option<Arc<dyn EngineTransport>>,
    in_erstellung: HashSet<TransportDirection>,
}

impl Slots {
    fn slot(&mut self, richtung: TransportDirection) -> &mut Option<Arc<dyn EngineTransport>> {
        match richtung {
            TransportDirection::Send => &mut self.send,
            TransportDirection::Recv => &mut self.recv,
        }
    }
}

/// Gibt die Reservierung einer Richtung frei, auch bei Abbruch
struct Reservierung<'a> {
    slots: &'a Mutex<Slots>,
    richtung: TransportDirection,
}

impl Drop for Reservierung<'_> {
    fn drop(&mut self) {
        self.slots.lock().in_erstellung.remove(&self.richtung);
    }
}

/// Verwaltet Engine-Initialisierung und das Transport-Paar einer Sitzung
pub struct TransportManager {
    engine: Arc<dyn MediaEngine>,
    signaling: SignalingClient,
    verbindungen: Arc<TransportConnectionManager>,
    initialisiert: AtomicBool,
    slots: Mutex<Slots>,
    zeitlimit: Duration,
}

impl TransportManager {
    pub fn neu(
        engine: Arc<dyn MediaEngine>,
        signaling: SignalingClient,
        request_timeout: Duration,
    ) -> Self {
        let verbindungen = Arc::new(TransportConnectionManager::neu(
            signaling.clone(),
            request_timeout,
        ));
        Self {
            engine,
            signaling,
            verbindungen,
            initialisiert: AtomicBool::new(false),
            slots: Mutex::new(Slots::default()),
            zeitlimit: request_timeout,
        }
    }

    /// Laedt die Router-Faehigkeiten; ein zweiter Aufruf pro Sitzung ist ein Fehler
    pub async fn initialize(&self, router_capabilities: &RtpCapabilities) -> MediaResult<()> {
        if self.initialisiert.swap(true, Ordering::SeqCst) {
            return Err(MediaError::BereitsInitialisiert);
        }
        if !self.engine.is_loaded() {
            if let Err(e) = self.engine.load(router_capabilities).await {
                self.initialisiert.store(false, Ordering::SeqCst);
                return Err(e);
            }
        }
        tracing::info!("Medien-Engine initialisiert");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialisiert.load(Ordering::SeqCst)
    }

    /// Lokale RTP-Faehigkeiten der geladenen Engine
    pub fn rtp_capabilities(&self) -> MediaResult<RtpCapabilities> {
        if !self.is_initialized() {
            return Err(MediaError::NichtInitialisiert);
        }
        self.engine.rtp_capabilities()
    }

    pub fn engine(&self) -> &Arc<dyn MediaEngine> {
        &self.engine
    }

    pub fn verbindungen(&self) -> &Arc<TransportConnectionManager> {
        &self.verbindungen
    }

    pub async fn create_send_transport(&self) -> MediaResult<Arc<dyn EngineTransport>> {
        self.create_transport(TransportDirection::Send).await
    }

    pub async fn create_recv_transport(&self) -> MediaResult<Arc<dyn EngineTransport>> {
        self.create_transport(TransportDirection::Recv).await
    }

    pub fn send_transport(&self) -> Option<Arc<dyn EngineTransport>> {
        self.slots.lock().send.clone()
    }

    pub fn recv_transport(&self) -> Option<Arc<dyn EngineTransport>> {
        self.slots.lock().recv.clone()
    }

    async fn create_transport(
        &self,
        richtung: TransportDirection,
    ) -> MediaResult<Arc<dyn EngineTransport>> {
        if !self.is_initialized() {
            return Err(MediaError::NichtInitialisiert);
        }
        let _reservierung = {
            let mut slots = self.slots.lock();
            if slots.slot(richtung).is_some() || !slots.in_erstellung.insert(richtung) {
                return Err(MediaError::TransportExistiert(richtung));
            }
            Reservierung {
                slots: &self.slots,
                richtung,
            }
        };

        let rtp_capabilities = self.engine.rtp_capabilities()?;
        let antwort = self
            .signaling
            .anfragen(
                ClientMessage::CreateTransport {
                    direction: richtung,
                    rtp_capabilities,
                },
                Some(CorrelationKey::TransportCreated(richtung)),
                Some(self.zeitlimit),
            )
            .await
            .map_err(|e| MediaError::aus_anfrage(e, "create_transport"))?;

        let ServerMessage::TransportCreated {
            id,
            direction,
            ice_parameters,
            ice_candidates,
            dtls_parameters,
            sctp_parameters,
        } = antwort
        else {
            return Err(MediaError::UnerwarteteAntwort(antwort.typ().into()));
        };
        if direction != richtung {
            return Err(MediaError::UnerwarteteAntwort(format!(
                "{direction}-Transport statt {richtung}"
            )));
        }

        self.verbindungen.transport_registrieren(id.clone(), richtung);
        let handler: Arc<dyn TransportHandler> = self.verbindungen.clone();
        let transport = self.engine.create_transport(
            TransportOptions {
                id: id.clone(),
                direction: richtung,
                ice_parameters,
                ice_candidates,
                dtls_parameters,
                sctp_parameters,
            },
            handler,
        )?;

        // Sitzung wurde waehrend der Anfrage geschlossen
        if !self.is_initialized() {
            transport.close();
            return Err(MediaError::Zurueckgesetzt);
        }
        *self.slots.lock().slot(richtung) = Some(Arc::clone(&transport));
        tracing::info!(transport_id = %id, richtung = %richtung, "Transport angelegt");
        Ok(transport)
    }

    /// Schliesst beide Transporte und vergisst die Initialisierung
    pub fn close(&self) {
        let (send, recv) = {
            let mut slots = self.slots.lock();
            (slots.send.take(), slots.recv.take())
        };
        for transport in send.into_iter().chain(recv) {
            transport.close();
        }
        self.initialisiert.store(false, Ordering::SeqCst);
        self.verbindungen.zuruecksetzen();
    }
}
