//! Integration-Tests fuer den Headless-Client gegen den Fake-SFU

use salon_client::config::ClientConfig;
use salon_client::HeadlessClient;
use salon_core::ConnectionState;
use salon_protocol::ClientMessage;
use salon_signaling::mock::{MockSfu, MockSfuOptionen};
use std::sync::Arc;
use std::time::Duration;

async fn warten_bis(bedingung: impl Fn() -> bool) -> bool {
    for _ in 0..400 {
        if bedingung() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    bedingung()
}

fn config(toml: &str) -> ClientConfig {
    ClientConfig::aus_toml(toml).expect("Konfiguration ungueltig")
}

#[tokio::test]
async fn client_tritt_bei_aktiviert_medien_und_verlaesst() {
    let (sfu, connector) = MockSfu::starten(MockSfuOptionen::default());
    let client = HeadlessClient::neu(config(
        r#"
        [room]
        token = "client-token"
        auto_subscribe = false

        [medien]
        mikrofon = true
        kamera = true
        datenkanal = true
        "#,
    ));

    let room = client
        .ausfuehren(Arc::new(connector), tokio::time::sleep(Duration::from_millis(20)))
        .await
        .expect("Client-Lauf fehlgeschlagen");

    assert_eq!(room.connection_state(), ConnectionState::Disconnected);
    assert!(matches!(
        sfu.empfangene_vom_typ("join").as_slice(),
        [ClientMessage::Join { token, .. }] if token == "client-token"
    ));
    assert_eq!(sfu.empfangene_vom_typ("publish").len(), 2);
    assert_eq!(sfu.empfangene_vom_typ("create_data_producer").len(), 1);
    assert!(warten_bis(|| sfu.empfangene_vom_typ("leave").len() == 1).await);
}

#[tokio::test]
async fn fehlgeschlagener_beitritt_wird_gemeldet() {
    let (_sfu, connector) = MockSfu::starten(MockSfuOptionen::default());
    connector.immer_ablehnen(true);
    let client = HeadlessClient::neu(ClientConfig::default());

    let ergebnis = client.ausfuehren(Arc::new(connector), async {}).await;

    let fehler = ergebnis.err().expect("Beitritt haette scheitern muessen");
    assert!(fehler.to_string().contains("Beitritt"));
}

#[tokio::test]
async fn medienfehler_beenden_den_lauf_nicht() {
    let sfu_optionen = MockSfuOptionen {
        rtp_capabilities: None,
        ..Default::default()
    };
    let (sfu, connector) = MockSfu::starten(sfu_optionen);
    let client = HeadlessClient::neu(config(
        r#"
        [medien]
        kamera = true
        "#,
    ));

    client
        .ausfuehren(Arc::new(connector), async {})
        .await
        .expect("Client-Lauf fehlgeschlagen");

    assert!(sfu.empfangene_vom_typ("publish").is_empty());
}
