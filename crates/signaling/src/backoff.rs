//! Exponentielles Backoff fuer Wiederverbindungen

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Wiederverbindungs-Strategie einer Signaling-Sitzung
///
/// Verzoegerung fuer Versuch N (ab 1): `min(basis * 2^(N-1), maximum)`.
/// Nach `max_versuche` erfolglosen Versuchen geht die Sitzung in `Error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub basis_verzoegerung_ms: u64,
    pub max_verzoegerung_ms: u64,
    pub max_versuche: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            basis_verzoegerung_ms: 1_000,
            max_verzoegerung_ms: 30_000,
            max_versuche: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Verzoegerung vor dem Versuch mit der Nummer `versuch` (1-basiert)
    pub fn verzoegerung(&self, versuch: u32) -> Duration {
        let exponent = versuch.saturating_sub(1).min(63);
        let faktor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        let ms = self
            .basis_verzoegerung_ms
            .saturating_mul(faktor)
            .min(self.max_verzoegerung_ms);
        Duration::from_millis(ms)
    }

    /// Gibt true zurueck wenn nach `versuch` Versuchen ein weiterer erlaubt ist
    pub fn weiterer_versuch_erlaubt(&self, versuch: u32) -> bool {
        versuch < self.max_versuche
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verzoegerung_verdoppelt_sich_bis_maximum() {
        let policy = ReconnectPolicy {
            basis_verzoegerung_ms: 100,
            max_verzoegerung_ms: 1_000,
            max_versuche: 10,
        };
        let werte: Vec<u64> = (1..=6)
            .map(|n| policy.verzoegerung(n).as_millis() as u64)
            .collect();
        assert_eq!(werte, vec![100, 200, 400, 800, 1_000, 1_000]);
    }

    #[test]
    fn grosse_versuchsnummern_laufen_nicht_ueber() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.verzoegerung(200), Duration::from_millis(30_000));
        assert_eq!(policy.verzoegerung(0), Duration::from_millis(1_000));
    }

    #[test]
    fn versuchsgrenze() {
        let policy = ReconnectPolicy {
            max_versuche: 2,
            ..Default::default()
        };
        assert!(policy.weiterer_versuch_erlaubt(0));
        assert!(policy.weiterer_versuch_erlaubt(1));
        assert!(!policy.weiterer_versuch_erlaubt(2));
    }

    #[test]
    fn policy_aus_teilweiser_konfiguration() {
        let policy: ReconnectPolicy =
            serde_json::from_str(r#"{"max_versuche": 3}"#).unwrap();
        assert_eq!(policy.max_versuche, 3);
        assert_eq!(policy.basis_verzoegerung_ms, 1_000);
    }
}
