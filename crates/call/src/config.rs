//! Zeitparameter eines Gruppencalls

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Konfiguration des Call-Orchestrators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// Verzoegerung zwischen Verteilen und Anwenden eines neuen Epoch-Schluessels
    pub epoch_wechsel_verzoegerung_ms: u64,
    /// Intervall, in dem der Leader den Call-Zustand an das SFU sendet
    pub zustand_intervall_sek: u64,
    /// Wie lange ein Teilnehmer allein im Call bleiben darf
    pub allein_timeout_sek: u64,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            epoch_wechsel_verzoegerung_ms: 2_000,
            zustand_intervall_sek: 10,
            allein_timeout_sek: 180,
        }
    }
}

impl CallConfig {
    pub fn epoch_wechsel_verzoegerung(&self) -> Duration {
        Duration::from_millis(self.epoch_wechsel_verzoegerung_ms)
    }

    pub fn zustand_intervall(&self) -> Duration {
        Duration::from_secs(self.zustand_intervall_sek)
    }

    pub fn allein_timeout(&self) -> Duration {
        Duration::from_secs(self.allein_timeout_sek)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standardwerte() {
        let config = CallConfig::default();
        assert_eq!(config.epoch_wechsel_verzoegerung(), Duration::from_secs(2));
        assert_eq!(config.zustand_intervall(), Duration::from_secs(10));
        assert_eq!(config.allein_timeout(), Duration::from_secs(180));
    }

    #[test]
    fn teilweise_toml_ergaenzt_standardwerte() {
        let config: CallConfig = toml::from_str("allein_timeout_sek = 30").unwrap();
        assert_eq!(config.allein_timeout_sek, 30);
        assert_eq!(config.zustand_intervall_sek, 10);
    }
}
