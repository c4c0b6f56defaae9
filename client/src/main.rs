//! Salon Client – Einstiegspunkt
//!
//! Laedt die Konfiguration, initialisiert das Logging und bleibt im Raum
//! bis Ctrl-C oder bis die konfigurierte Laufzeit abgelaufen ist.

use anyhow::Result;
use salon_client::{config::ClientConfig, logging, HeadlessClient};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    let config_pfad = std::env::var("SALON_CONFIG").unwrap_or_else(|_| "salon.toml".into());

    let mut config = ClientConfig::laden(&config_pfad)?;
    config.token_aus_env();

    let format = logging::logging_initialisieren(&config.logging);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_pfad,
        log_format = ?format,
        adresse = %config.verbindung.adresse,
        "Salon Client wird gestartet"
    );

    let start = chrono::Utc::now();
    let laufzeit = config.medien.laufzeit_s.map(Duration::from_secs);
    let client = HeadlessClient::neu(config);
    let connector = client.connector();

    let ende = async move {
        match laufzeit {
            Some(dauer) => {
                tokio::select! {
                    _ = tokio::time::sleep(dauer) => {
                        tracing::info!(sekunden = dauer.as_secs(), "Laufzeit abgelaufen");
                    }
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("Ctrl-C empfangen");
                    }
                }
            }
            None => {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::warn!(fehler = %e, "Ctrl-C-Handler nicht verfuegbar");
                }
            }
        }
    };

    client.ausfuehren(connector, ende).await?;
    tracing::info!(
        dauer_s = (chrono::Utc::now() - start).num_seconds(),
        "Salon Client beendet"
    );
    Ok(())
}
