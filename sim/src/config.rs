//! Konfiguration der Simulation
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! Standardwerte, die Simulation laeuft also auch ohne Konfigurationsdatei.

use serde::{Deserialize, Serialize};

use huddle_call::CallConfig;

/// Vollstaendige Konfiguration der Simulation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Ablauf der Simulation
    pub sim: SimEinstellungen,
    /// Zeitparameter der simulierten Calls
    pub call: CallConfig,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
}

/// Ablauf der Simulation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimEinstellungen {
    /// Anzahl simulierter Teilnehmer
    pub teilnehmer: u32,
    /// Gruppen-ID der simulierten Gruppe
    pub gruppen_id: u64,
    /// Basis-URL des SFU (geht in die Call-ID ein)
    pub sfu_url: String,
    /// Nach wie vielen Sekunden der letzte Teilnehmer den Call verlaesst
    pub verlassen_nach_sek: Option<u64>,
    /// Gesamtlaufzeit der Simulation in Sekunden
    pub laufzeit_sek: u64,
}

impl Default for SimEinstellungen {
    fn default() -> Self {
        Self {
            teilnehmer: 3,
            gruppen_id: 1,
            sfu_url: "https://sfu.huddle.local".into(),
            verlassen_nach_sek: Some(15),
            laufzeit_sek: 30,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl SimConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                config.pruefen()?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    fn pruefen(&self) -> anyhow::Result<()> {
        if self.sim.teilnehmer == 0 {
            anyhow::bail!("Mindestens ein Teilnehmer erforderlich");
        }
        if !huddle_observability::logging::log_level_gueltig(&self.logging.level) {
            anyhow::bail!("Ungueltiges Log-Level '{}'", self.logging.level);
        }
        if !huddle_observability::logging::log_format_gueltig(&self.logging.format) {
            anyhow::bail!("Ungueltiges Log-Format '{}'", self.logging.format);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_config_ist_valide() {
        let cfg = SimConfig::default();
        assert_eq!(cfg.sim.teilnehmer, 3);
        assert_eq!(cfg.call, CallConfig::default());
        assert_eq!(cfg.logging.level, "info");
        assert!(cfg.pruefen().is_ok());
    }

    #[test]
    fn config_aus_toml_string() {
        let toml = r#"
            [sim]
            teilnehmer = 5
            laufzeit_sek = 60

            [call]
            allein_timeout_sek = 20
        "#;
        let cfg: SimConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.sim.teilnehmer, 5);
        assert_eq!(cfg.sim.laufzeit_sek, 60);
        assert_eq!(cfg.call.allein_timeout_sek, 20);
        // Nicht angegebene Felder behalten Standardwerte
        assert_eq!(cfg.sim.gruppen_id, 1);
        assert_eq!(cfg.call.zustand_intervall_sek, 10);
        assert_eq!(cfg.logging.format, "text");
    }

    #[test]
    fn ungueltige_werte_werden_abgelehnt() {
        let mut cfg = SimConfig::default();
        cfg.sim.teilnehmer = 0;
        assert!(cfg.pruefen().is_err());

        let mut cfg = SimConfig::default();
        cfg.logging.level = "laut".into();
        assert!(cfg.pruefen().is_err());
    }

    #[test]
    fn fehlende_datei_ergibt_standardwerte() {
        let cfg = SimConfig::laden("/nicht/vorhanden/sim.toml").unwrap();
        assert_eq!(cfg.sim.laufzeit_sek, 30);
    }
}
