//! Gemeinsame Test-Helfer

use salon_signaling::mock::{standard_faehigkeiten, MockSfu, MockSfuOptionen};
use salon_signaling::{ReconnectPolicy, SignalingClient};
use std::sync::Arc;
use std::time::Duration;

use crate::sim::SimEngine;
use crate::transport_manager::TransportManager;

pub(crate) const ZEITLIMIT: Duration = Duration::from_secs(5);

/// Verbundener Signaling-Client gegen einen automatisch antwortenden Mock-SFU
pub(crate) async fn signaling_mit_sfu(optionen: MockSfuOptionen) -> (MockSfu, SignalingClient) {
    let (sfu, connector) = MockSfu::starten(optionen);
    let signaling = SignalingClient::neu(Arc::new(connector), ReconnectPolicy::default());
    signaling.connect().await.unwrap();
    (sfu, signaling)
}

/// Initialisierter Transport-Manager mit Send- und Recv-Transport
pub(crate) async fn transporte(
    optionen: MockSfuOptionen,
) -> (MockSfu, SignalingClient, Arc<TransportManager>) {
    let (sfu, signaling) = signaling_mit_sfu(optionen).await;
    let transporte = Arc::new(TransportManager::neu(
        Arc::new(SimEngine::neu()),
        signaling.clone(),
        ZEITLIMIT,
    ));
    transporte
        .initialize(&standard_faehigkeiten())
        .await
        .unwrap();
    transporte.create_send_transport().await.unwrap();
    transporte.create_recv_transport().await.unwrap();
    (sfu, signaling, transporte)
}

/// Wartet bis `bedingung` erfuellt ist, hoechstens eine Sekunde
pub(crate) async fn warten_bis(bedingung: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if bedingung() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    bedingung()
}
