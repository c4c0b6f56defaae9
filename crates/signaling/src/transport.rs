//! Signaling-Transport – Verbindungslebenszyklus, Warteschlange, Wiederverbindung
//!
//! ## State Machine
//! ```text
//! Disconnected -> Connecting -> Connected
//!      ^              |             |
//!      |  (Fehler)    |             v  (unerwartetes Ende)
//!      +--------------+        Reconnecting -- Erfolg --> Connected
//!      |                            |
//!      |                            +-- max_versuche --> Error (terminal)
//!      +-------- disconnect() aus jedem Zustand
//! ```
//!
//! Nachrichten die gesendet werden waehrend keine Verbindung besteht landen
//! in einer FIFO-Warteschlange und werden beim naechsten `Connected` in
//! Sendereihenfolge geschrieben. `disconnect()` verwirft die Warteschlange.
//!
//! Eine Sitzung besitzt einen I/O-Task der Lesen, Schreiben und
//! Wiederverbinden in einer `select!`-Schleife erledigt.

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use salon_core::{ConnectionState, EventBus};
use salon_protocol::{wire, ClientMessage, Envelope, ServerMessage};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::backoff::ReconnectPolicy;
use crate::connector::{Connector, Link};
use crate::error::{SignalingError, SignalingResult};

// ---------------------------------------------------------------------------
// Ereignisse
// ---------------------------------------------------------------------------

/// Ereignisse des Transports, in Auftrittsreihenfolge zugestellt
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Zustandswechsel
    Zustand(ConnectionState),
    /// Dekodierte Nachricht vom Server
    Nachricht(Envelope<ServerMessage>),
    /// Transportfehler (Verbindungsabbruch, kaputter Frame)
    Fehler(SignalingError),
}

/// Ergebnis von [`SignalingTransport::senden`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zustellung {
    /// An die aktive Verbindung uebergeben
    Gesendet,
    /// In die Warteschlange gestellt, wird beim naechsten Connect gesendet
    Eingereiht,
}

// ---------------------------------------------------------------------------
// Interner Zustand
// ---------------------------------------------------------------------------

struct Zustand {
    state: ConnectionState,
    warteschlange: VecDeque<String>,
    ausgang: Option<mpsc::UnboundedSender<String>>,
    shutdown: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
    /// Wird bei jedem `disconnect()` erhoeht; veraltete Tasks erkennen so ihr Ende
    generation: u64,
    /// Gesetzt sobald `Error` erreicht wurde; erst `disconnect()` hebt es auf
    beendet: bool,
}

struct TransportInner {
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    max_frame_size: usize,
    zustand: Mutex<Zustand>,
    events: EventBus<TransportEvent>,
}

enum LinkEnde {
    Shutdown,
    Abbruch {
        grund: SignalingError,
        unzugestellt: Option<String>,
    },
}

// ---------------------------------------------------------------------------
// SignalingTransport
// ---------------------------------------------------------------------------

/// Verbindung zum Signaling-Server mit Warteschlange und Wiederverbindung
///
/// Klonen teilt den Zustand.
#[derive(Clone)]
pub struct SignalingTransport {
    inner: Arc<TransportInner>,
}

impl SignalingTransport {
    /// Erstellt einen Transport im Zustand `Disconnected`
    pub fn neu(connector: Arc<dyn Connector>, policy: ReconnectPolicy) -> Self {
        Self {
            inner: Arc::new(TransportInner {
                connector,
                policy,
                max_frame_size: wire::DEFAULT_MAX_FRAME_SIZE,
                zustand: Mutex::new(Zustand {
                    state: ConnectionState::Disconnected,
                    warteschlange: VecDeque::new(),
                    ausgang: None,
                    shutdown: None,
                    task: None,
                    generation: 0,
                    beendet: false,
                }),
                events: EventBus::neu("signaling-transport"),
            }),
        }
    }

    /// Event-Bus des Transports
    pub fn events(&self) -> &EventBus<TransportEvent> {
        &self.inner.events
    }

    /// Aktueller Verbindungszustand
    pub fn zustand(&self) -> ConnectionState {
        self.inner.zustand.lock().state
    }

    /// Anzahl wartender Nachrichten
    pub fn warteschlangen_laenge(&self) -> usize {
        self.inner.zustand.lock().warteschlange.len()
    }

    /// Baut die Verbindung auf
    ///
    /// No-op wenn bereits verbunden oder im Aufbau. Schlaegt der erste
    /// Verbindungsaufbau fehl, geht der Transport zurueck nach `Disconnected`.
    pub async fn connect(&self) -> SignalingResult<()> {
        let generation = {
            let mut z = self.inner.zustand.lock();
            if z.beendet {
                return Err(SignalingError::SitzungBeendet);
            }
            if z.state.ist_aktiv() {
                return Ok(());
            }
            z.state = ConnectionState::Connecting;
            z.generation
        };
        self.inner.zustand_melden(ConnectionState::Connecting);
        tracing::info!(ziel = %self.inner.connector.ziel(), "Verbinde mit Signaling-Server");

        let link = match self.inner.connector.open().await {
            Ok(link) => link,
            Err(e) => {
                tracing::warn!(fehler = %e, "Verbindungsaufbau fehlgeschlagen");
                let gemeldet = {
                    let mut z = self.inner.zustand.lock();
                    if z.generation == generation && z.state == ConnectionState::Connecting {
                        z.state = ConnectionState::Disconnected;
                        true
                    } else {
                        false
                    }
                };
                self.inner.events.senden(&TransportEvent::Fehler(e.clone()));
                if gemeldet {
                    self.inner.zustand_melden(ConnectionState::Disconnected);
                }
                return Err(e);
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let Some(ausgang_rx) = self.inner.aktivieren(generation, Some(shutdown_tx)) else {
            // disconnect() kam waehrend des Aufbaus
            return Err(SignalingError::VerbindungGetrennt);
        };

        let task = tokio::spawn(Arc::clone(&self.inner).sitzung(
            link,
            ausgang_rx,
            shutdown_rx,
            generation,
        ));
        let mut z = self.inner.zustand.lock();
        if z.generation == generation {
            z.task = Some(task);
        }
        Ok(())
    }

    /// Trennt die Verbindung, verwirft die Warteschlange und beendet den I/O-Task
    ///
    /// Nach `Error` ist der Transport danach wieder verbindbar.
    pub async fn disconnect(&self) {
        let (shutdown, task, vorher) = {
            let mut z = self.inner.zustand.lock();
            z.generation += 1;
            z.beendet = false;
            z.warteschlange.clear();
            z.ausgang = None;
            let vorher = z.state;
            z.state = ConnectionState::Disconnected;
            (z.shutdown.take(), z.task.take(), vorher)
        };

        if let Some(shutdown) = shutdown {
            let _ = shutdown.send(true);
        }
        if let Some(task) = task {
            let _ = task.await;
        }
        if vorher != ConnectionState::Disconnected {
            tracing::info!("Signaling-Verbindung getrennt");
            self.inner.zustand_melden(ConnectionState::Disconnected);
        }
    }

    /// Sendet eine Nachricht oder stellt sie in die Warteschlange
    pub fn senden(&self, envelope: &Envelope<ClientMessage>) -> SignalingResult<Zustellung> {
        let text = wire::encode_client(envelope, self.inner.max_frame_size)?;
        let mut z = self.inner.zustand.lock();
        if z.beendet {
            return Err(SignalingError::SitzungBeendet);
        }
        if z.state == ConnectionState::Connected {
            if let Some(ausgang) = &z.ausgang {
                if ausgang.send(text.clone()).is_ok() {
                    tracing::trace!(typ = envelope.message.typ(), "Nachricht gesendet");
                    return Ok(Zustellung::Gesendet);
                }
            }
        }
        tracing::debug!(typ = envelope.message.typ(), "Nachricht eingereiht");
        z.warteschlange.push_back(text);
        Ok(Zustellung::Eingereiht)
    }
}

impl TransportInner {
    fn zustand_melden(&self, state: ConnectionState) {
        self.events.senden(&TransportEvent::Zustand(state));
    }

    /// Schaltet auf `Connected` und leert die Warteschlange in den neuen Ausgang
    fn aktivieren(
        &self,
        generation: u64,
        shutdown: Option<watch::Sender<bool>>,
    ) -> Option<mpsc::UnboundedReceiver<String>> {
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut z = self.zustand.lock();
            if z.generation != generation {
                return None;
            }
            for frame in z.warteschlange.drain(..) {
                let _ = tx.send(frame);
            }
            z.ausgang = Some(tx);
            z.state = ConnectionState::Connected;
            if shutdown.is_some() {
                z.shutdown = shutdown;
            }
        }
        tracing::info!("Signaling verbunden");
        self.zustand_melden(ConnectionState::Connected);
        Some(rx)
    }

    /// I/O-Task einer Sitzung
    async fn sitzung(
        self: Arc<Self>,
        mut link: Link,
        mut ausgang_rx: mpsc::UnboundedReceiver<String>,
        mut shutdown_rx: watch::Receiver<bool>,
        generation: u64,
    ) {
        loop {
            match self
                .link_betreiben(&mut link, &mut ausgang_rx, &mut shutdown_rx)
                .await
            {
                LinkEnde::Shutdown => return,
                LinkEnde::Abbruch {
                    grund,
                    unzugestellt,
                } => {
                    tracing::warn!(fehler = %grund, "Signaling-Verbindung unterbrochen");
                    if !self.unterbrechen(generation, &mut ausgang_rx, unzugestellt) {
                        return;
                    }
                    self.events.senden(&TransportEvent::Fehler(grund));
                    self.zustand_melden(ConnectionState::Reconnecting);
                }
            }

            match self.wiederverbinden(&mut shutdown_rx, generation).await {
                Some((neuer_link, neuer_rx)) => {
                    link = neuer_link;
                    ausgang_rx = neuer_rx;
                }
                None => return,
            }
        }
    }

    async fn link_betreiben(
        &self,
        link: &mut Link,
        ausgang_rx: &mut mpsc::UnboundedReceiver<String>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> LinkEnde {
        loop {
            tokio::select! {
                frame = link.stream.next() => match frame {
                    Some(Ok(text)) => self.eingang(&text),
                    Some(Err(e)) => {
                        return LinkEnde::Abbruch { grund: e, unzugestellt: None };
                    }
                    None => {
                        return LinkEnde::Abbruch {
                            grund: SignalingError::VerbindungGetrennt,
                            unzugestellt: None,
                        };
                    }
                },
                ausgehend = ausgang_rx.recv() => match ausgehend {
                    Some(frame) => {
                        if let Err(e) = link.sink.send(frame.clone()).await {
                            return LinkEnde::Abbruch { grund: e, unzugestellt: Some(frame) };
                        }
                    }
                    // Sender wurde von disconnect() verworfen
                    None => {
                        let _ = link.sink.close().await;
                        return LinkEnde::Shutdown;
                    }
                },
                res = shutdown_rx.changed() => {
                    if res.is_err() || *shutdown_rx.borrow() {
                        // schon uebergebene Frames (z.B. `leave`) noch zustellen
                        while let Ok(frame) = ausgang_rx.try_recv() {
                            if link.sink.send(frame).await.is_err() {
                                break;
                            }
                        }
                        let _ = link.sink.close().await;
                        return LinkEnde::Shutdown;
                    }
                }
            }
        }
    }

    fn eingang(&self, text: &str) {
        match wire::decode_server(text, self.max_frame_size) {
            Ok(envelope) => {
                tracing::trace!(
                    typ = envelope.message.typ(),
                    request_id = envelope.request_id,
                    "Nachricht empfangen"
                );
                self.events.senden(&TransportEvent::Nachricht(envelope));
            }
            Err(e) => {
                tracing::warn!(fehler = %e, "Ungueltiger Frame verworfen");
                self.events.senden(&TransportEvent::Fehler(e.into()));
            }
        }
    }

    /// Wechselt nach `Reconnecting`; noch nicht geschriebene Frames wandern
    /// zurueck an den Anfang der Warteschlange
    fn unterbrechen(
        &self,
        generation: u64,
        ausgang_rx: &mut mpsc::UnboundedReceiver<String>,
        unzugestellt: Option<String>,
    ) -> bool {
        let mut z = self.zustand.lock();
        if z.generation != generation {
            return false;
        }
        z.ausgang = None;
        z.state = ConnectionState::Reconnecting;

        let mut offen: Vec<String> = unzugestellt.into_iter().collect();
        while let Ok(frame) = ausgang_rx.try_recv() {
            offen.push(frame);
        }
        for frame in offen.into_iter().rev() {
            z.warteschlange.push_front(frame);
        }
        true
    }

    async fn wiederverbinden(
        &self,
        shutdown_rx: &mut watch::Receiver<bool>,
        generation: u64,
    ) -> Option<(Link, mpsc::UnboundedReceiver<String>)> {
        let mut versuch: u32 = 0;
        loop {
            if !self.policy.weiterer_versuch_erlaubt(versuch) {
                self.aufgeben(generation, versuch);
                return None;
            }
            versuch += 1;
            let verzoegerung = self.policy.verzoegerung(versuch);
            tracing::info!(
                versuch,
                verzoegerung_ms = verzoegerung.as_millis() as u64,
                "Plane Wiederverbindung"
            );

            tokio::select! {
                _ = tokio::time::sleep(verzoegerung) => {}
                res = shutdown_rx.changed() => {
                    if res.is_err() || *shutdown_rx.borrow() {
                        return None;
                    }
                }
            }

            match self.connector.open().await {
                Ok(link) => {
                    let rx = self.aktivieren(generation, None)?;
                    tracing::info!(versuch, "Wiederverbindung erfolgreich");
                    return Some((link, rx));
                }
                Err(e) => {
                    tracing::warn!(versuch, fehler = %e, "Wiederverbindung fehlgeschlagen");
                    self.events.senden(&TransportEvent::Fehler(e));
                }
            }
        }
    }

    fn aufgeben(&self, generation: u64, versuche: u32) {
        {
            let mut z = self.zustand.lock();
            if z.generation != generation {
                return;
            }
            z.state = ConnectionState::Error;
            z.beendet = true;
            z.warteschlange.clear();
            z.shutdown = None;
        }
        tracing::error!(versuche, "Wiederverbindung aufgegeben");
        self.zustand_melden(ConnectionState::Error);
        self.events
            .senden(&TransportEvent::Fehler(SignalingError::SitzungBeendet));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::mock_paar;
    use salon_core::TransportId;
    use std::time::Duration;

    fn ping(n: i64) -> Envelope<ClientMessage> {
        Envelope::ohne_id(ClientMessage::Ping { timestamp_ms: n })
    }

    fn zustaende_aufzeichnen(
        transport: &SignalingTransport,
    ) -> Arc<Mutex<Vec<ConnectionState>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let l = Arc::clone(&log);
        transport.events().abonnieren(move |e| {
            if let TransportEvent::Zustand(s) = e {
                l.lock().push(*s);
            }
        });
        log
    }

    #[tokio::test]
    async fn warteschlange_wird_in_reihenfolge_geleert() {
        let (connector, mut server) = mock_paar();
        let transport = SignalingTransport::neu(Arc::new(connector), ReconnectPolicy::default());

        for n in 1..=3 {
            assert_eq!(transport.senden(&ping(n)).unwrap(), Zustellung::Eingereiht);
        }
        transport.connect().await.unwrap();
        let mut link = server.annehmen().await.unwrap();

        for n in 1..=3 {
            let env = link.empfangen().await.unwrap();
            assert_eq!(env.message, ClientMessage::Ping { timestamp_ms: n });
        }
        assert_eq!(transport.senden(&ping(4)).unwrap(), Zustellung::Gesendet);
        assert_eq!(
            link.empfangen().await.unwrap().message,
            ClientMessage::Ping { timestamp_ms: 4 }
        );
        transport.disconnect().await;
    }

    #[tokio::test]
    async fn connect_ist_idempotent() {
        let (connector, mut server) = mock_paar();
        let transport =
            SignalingTransport::neu(Arc::new(connector.clone()), ReconnectPolicy::default());
        let log = zustaende_aufzeichnen(&transport);

        transport.connect().await.unwrap();
        transport.connect().await.unwrap();
        let _link = server.annehmen().await.unwrap();

        assert_eq!(connector.versuche().len(), 1);
        assert_eq!(
            *log.lock(),
            vec![ConnectionState::Connecting, ConnectionState::Connected]
        );
        transport.disconnect().await;
    }

    #[tokio::test]
    async fn fehlgeschlagener_aufbau_kehrt_zu_disconnected_zurueck() {
        let (connector, _server) = mock_paar();
        connector.naechste_ablehnen(1);
        let transport =
            SignalingTransport::neu(Arc::new(connector.clone()), ReconnectPolicy::default());
        let log = zustaende_aufzeichnen(&transport);

        assert!(matches!(
            transport.connect().await,
            Err(SignalingError::Verbindung(_))
        ));
        assert_eq!(transport.zustand(), ConnectionState::Disconnected);
        assert_eq!(
            *log.lock(),
            vec![ConnectionState::Connecting, ConnectionState::Disconnected]
        );
    }

    #[tokio::test]
    async fn disconnect_leert_warteschlange() {
        let (connector, _server) = mock_paar();
        let transport = SignalingTransport::neu(Arc::new(connector), ReconnectPolicy::default());
        transport.senden(&ping(1)).unwrap();
        transport.senden(&ping(2)).unwrap();
        assert_eq!(transport.warteschlangen_laenge(), 2);

        transport.disconnect().await;
        assert_eq!(transport.warteschlangen_laenge(), 0);
        assert_eq!(transport.zustand(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn kaputter_frame_wird_gemeldet_und_verbindung_bleibt() {
        let (connector, mut server) = mock_paar();
        let transport = SignalingTransport::neu(Arc::new(connector), ReconnectPolicy::default());
        let nachrichten = Arc::new(Mutex::new(Vec::new()));
        let fehler = Arc::new(Mutex::new(0usize));
        {
            let n = Arc::clone(&nachrichten);
            let f = Arc::clone(&fehler);
            transport.events().abonnieren(move |e| match e {
                TransportEvent::Nachricht(env) => n.lock().push(env.message.clone()),
                TransportEvent::Fehler(_) => *f.lock() += 1,
                TransportEvent::Zustand(_) => {}
            });
        }

        transport.connect().await.unwrap();
        let link = server.annehmen().await.unwrap();
        link.roh_senden("{kaputt");
        link.senden(ServerMessage::TransportConnected {
            transport_id: TransportId::new("T1"),
        });

        tokio::time::timeout(Duration::from_secs(1), async {
            while nachrichten.lock().is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        assert_eq!(*fehler.lock(), 1);
        assert_eq!(transport.zustand(), ConnectionState::Connected);
        transport.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_bis_error() {
        let (connector, mut server) = mock_paar();
        let policy = ReconnectPolicy {
            basis_verzoegerung_ms: 100,
            max_verzoegerung_ms: 250,
            max_versuche: 3,
        };
        let transport = SignalingTransport::neu(Arc::new(connector.clone()), policy);
        let log = zustaende_aufzeichnen(&transport);

        transport.connect().await.unwrap();
        let link = server.annehmen().await.unwrap();
        connector.immer_ablehnen(true);
        link.schliessen();

        tokio::time::timeout(Duration::from_secs(60), async {
            while transport.zustand() != ConnectionState::Error {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let versuche = connector.versuche();
        // Erster Aufbau + drei Wiederverbindungsversuche
        assert_eq!(versuche.len(), 4);
        let abstaende: Vec<u64> = versuche
            .windows(2)
            .map(|w| (w[1] - w[0]).as_millis() as u64)
            .collect();
        assert_eq!(abstaende[1], 200);
        assert_eq!(abstaende[2], 250);
        assert!(abstaende[0] >= 100);

        assert_eq!(
            *log.lock(),
            vec![
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Reconnecting,
                ConnectionState::Error,
            ]
        );
        assert!(matches!(
            transport.connect().await,
            Err(SignalingError::SitzungBeendet)
        ));
        assert!(matches!(
            transport.senden(&ping(1)),
            Err(SignalingError::SitzungBeendet)
        ));

        // erst ein explizites disconnect gibt den Transport wieder frei
        transport.disconnect().await;
        assert_eq!(transport.zustand(), ConnectionState::Disconnected);
        connector.immer_ablehnen(false);
        transport.connect().await.unwrap();
        server.annehmen().await.unwrap();
        assert_eq!(transport.zustand(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn wiederverbindung_sendet_warteschlange_erneut() {
        let (connector, mut server) = mock_paar();
        let transport = SignalingTransport::neu(Arc::new(connector), ReconnectPolicy::default());
        let log = zustaende_aufzeichnen(&transport);

        transport.connect().await.unwrap();
        let link = server.annehmen().await.unwrap();
        link.schliessen();

        tokio::time::timeout(Duration::from_secs(5), async {
            while transport.zustand() != ConnectionState::Reconnecting {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        transport.senden(&ping(7)).unwrap();

        let mut neuer_link = server.annehmen().await.unwrap();
        assert_eq!(
            neuer_link.empfangen().await.unwrap().message,
            ClientMessage::Ping { timestamp_ms: 7 }
        );
        assert_eq!(
            *log.lock(),
            vec![
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Reconnecting,
                ConnectionState::Connected,
            ]
        );
        transport.disconnect().await;
    }
}
