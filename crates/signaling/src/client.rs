//! Signaling-Client – Anfrage/Antwort ueber dem Transport
//!
//! Verpackt Nachrichten in Envelopes mit fortlaufender `requestId`, ordnet
//! Antworten ueber den [`Korrelator`] zu und verteilt alle eingehenden
//! Nachrichten, Zustandswechsel und Fehler an registrierte Listener.
//!
//! Nachrichten-Listener werden *vor* der Korrelation aufgerufen: wer auf eine
//! Antwort wartet, sieht danach garantiert einen Zustand in dem alle
//! Listener die Antwort bereits erhalten haben.

use salon_core::{ConnectionState, EventBus, ListenerId};
use salon_protocol::{ClientMessage, Envelope, ServerMessage};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::backoff::ReconnectPolicy;
use crate::connector::Connector;
use crate::correlation::{CorrelationKey, Korrelator};
use crate::error::{SignalingError, SignalingResult};
use crate::transport::{SignalingTransport, TransportEvent, Zustellung};

struct ClientInner {
    transport: SignalingTransport,
    korrelator: Arc<Korrelator>,
    naechste_id: AtomicU32,
    nachrichten: EventBus<ServerMessage>,
}

/// Signaling-Client einer Sitzung
///
/// Klonen teilt den Zustand.
#[derive(Clone)]
pub struct SignalingClient {
    inner: Arc<ClientInner>,
}

impl SignalingClient {
    /// Erstellt einen Client ueber einem neuen Transport
    pub fn neu(connector: Arc<dyn Connector>, policy: ReconnectPolicy) -> Self {
        let transport = SignalingTransport::neu(connector, policy);
        let korrelator = Arc::new(Korrelator::neu());
        let nachrichten: EventBus<ServerMessage> = EventBus::neu("signaling-nachrichten");

        {
            let korrelator = Arc::clone(&korrelator);
            let nachrichten = nachrichten.clone();
            transport.events().abonnieren(move |event| match event {
                TransportEvent::Nachricht(env) => {
                    nachrichten.senden(&env.message);
                    korrelator.zustellen(env);
                }
                TransportEvent::Zustand(ConnectionState::Disconnected) => {
                    korrelator.alle_abbrechen(SignalingError::VerbindungGetrennt);
                }
                TransportEvent::Zustand(ConnectionState::Error) => {
                    korrelator.alle_abbrechen(SignalingError::SitzungBeendet);
                }
                TransportEvent::Zustand(_) | TransportEvent::Fehler(_) => {}
            });
        }

        Self {
            inner: Arc::new(ClientInner {
                transport,
                korrelator,
                naechste_id: AtomicU32::new(1),
                nachrichten,
            }),
        }
    }

    /// Verbindet den Transport
    pub async fn connect(&self) -> SignalingResult<()> {
        self.inner.transport.connect().await
    }

    /// Trennt den Transport; offene Anfragen scheitern mit `VerbindungGetrennt`
    pub async fn disconnect(&self) {
        self.inner.transport.disconnect().await;
        // Auch wenn kein Zustandswechsel stattfand
        self.inner
            .korrelator
            .alle_abbrechen(SignalingError::VerbindungGetrennt);
    }

    /// Aktueller Verbindungszustand
    pub fn zustand(&self) -> ConnectionState {
        self.inner.transport.zustand()
    }

    /// Anzahl offener Anfragen
    pub fn offene_anfragen(&self) -> usize {
        self.inner.korrelator.anzahl()
    }

    /// Sendet eine Nachricht ohne auf eine Antwort zu warten
    pub fn senden(&self, nachricht: ClientMessage) -> SignalingResult<Zustellung> {
        self.inner.transport.senden(&Envelope::ohne_id(nachricht))
    }

    /// Sendet eine Anfrage und wartet auf die zugeordnete Antwort
    ///
    /// `schluessel` erlaubt die Zuordnung bei Servern die keine `requestId`
    /// zurueckspiegeln. Ohne `zeitlimit` wird unbegrenzt gewartet.
    pub async fn anfragen(
        &self,
        nachricht: ClientMessage,
        schluessel: Option<CorrelationKey>,
        zeitlimit: Option<Duration>,
    ) -> SignalingResult<ServerMessage> {
        let request_id = self.inner.naechste_id.fetch_add(1, Ordering::Relaxed);
        let typ = nachricht.typ();
        let empfaenger = self.inner.korrelator.registrieren(request_id, schluessel);

        if let Err(e) = self
            .inner
            .transport
            .senden(&Envelope::mit_id(request_id, nachricht))
        {
            self.inner.korrelator.entfernen(request_id);
            return Err(e);
        }
        tracing::debug!(request_id, typ, "Anfrage gesendet");

        let ergebnis = match zeitlimit {
            Some(dauer) => match tokio::time::timeout(dauer, empfaenger).await {
                Ok(ergebnis) => ergebnis,
                Err(_) => {
                    self.inner.korrelator.entfernen(request_id);
                    tracing::warn!(request_id, typ, "Anfrage ohne Antwort");
                    return Err(SignalingError::Zeitlimit(format!(
                        "{typ} (requestId {request_id})"
                    )));
                }
            },
            None => empfaenger.await,
        };

        ergebnis.unwrap_or(Err(SignalingError::VerbindungGetrennt))
    }

    /// Listener fuer alle eingehenden Server-Nachrichten
    pub fn on_message<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ServerMessage) + Send + Sync + 'static,
    {
        self.inner.nachrichten.abonnieren(listener)
    }

    /// Listener fuer Zustandswechsel des Transports
    pub fn on_state<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        self.inner.transport.events().abonnieren(move |event| {
            if let TransportEvent::Zustand(state) = event {
                listener(*state);
            }
        })
    }

    /// Listener fuer Transportfehler
    pub fn on_error<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&SignalingError) + Send + Sync + 'static,
    {
        self.inner.transport.events().abonnieren(move |event| {
            if let TransportEvent::Fehler(fehler) = event {
                listener(fehler);
            }
        })
    }

    /// Meldet einen Listener ab, egal ueber welche Methode er registriert wurde
    pub fn abmelden(&self, id: ListenerId) -> bool {
        self.inner.nachrichten.abmelden(id) || self.inner.transport.events().abmelden(id)
    }
}
