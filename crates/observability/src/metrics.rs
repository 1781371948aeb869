//! Prometheus-kompatible Metriken des Call-Ablaufs
//!
//! Registrierte Metriken:
//! - `huddle_handshakes_total` – Counter: Abgeschlossene Handshakes
//! - `huddle_protocol_errors_total` – Counter: Wegen Protokollfehler entfernte Teilnehmer
//! - `huddle_participants_removed_total` – Counter: Entfernte Teilnehmer (cause)
//! - `huddle_epoch_transitions_total` – Counter: Angewendete Epoch-Wechsel
//! - `huddle_ratchet_advances_total` – Counter: Ratchet-Schritte bei Join
//! - `huddle_call_state_updates_total` – Counter: Gesendete Call-Zustaende
//! - `huddle_authenticated_participants` – Gauge: Authentifizierte Teilnehmer
//!
//! Jede Instanz hat eine eigene Registry, damit mehrere Calls (und Tests)
//! unabhaengig voneinander zaehlen.

use std::sync::Arc;

use anyhow::Result;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Alle Metriken eines Calls
#[derive(Clone)]
pub struct CallMetrics {
    pub registry: Arc<Registry>,

    pub handshakes_total: IntCounter,
    pub protocol_errors_total: IntCounter,
    pub participants_removed_total: IntCounterVec,
    pub epoch_transitions_total: IntCounter,
    pub ratchet_advances_total: IntCounter,
    pub call_state_updates_total: IntCounter,
    pub authenticated_participants: IntGauge,
}

impl CallMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        let handshakes_total = IntCounter::with_opts(Opts::new(
            "huddle_handshakes_total",
            "Anzahl erfolgreich abgeschlossener Handshakes",
        ))?;
        registry.register(Box::new(handshakes_total.clone()))?;

        let protocol_errors_total = IntCounter::with_opts(Opts::new(
            "huddle_protocol_errors_total",
            "Anzahl Protokollverletzungen entfernter Teilnehmer",
        ))?;
        registry.register(Box::new(protocol_errors_total.clone()))?;

        let participants_removed_total = IntCounterVec::new(
            Opts::new(
                "huddle_participants_removed_total",
                "Anzahl entfernter Teilnehmer nach Grund",
            ),
            &["cause"],
        )?;
        registry.register(Box::new(participants_removed_total.clone()))?;

        let epoch_transitions_total = IntCounter::with_opts(Opts::new(
            "huddle_epoch_transitions_total",
            "Anzahl angewendeter Epoch-Wechsel des eigenen Medienschluessels",
        ))?;
        registry.register(Box::new(epoch_transitions_total.clone()))?;

        let ratchet_advances_total = IntCounter::with_opts(Opts::new(
            "huddle_ratchet_advances_total",
            "Anzahl Ratchet-Schritte des eigenen Medienschluessels",
        ))?;
        registry.register(Box::new(ratchet_advances_total.clone()))?;

        let call_state_updates_total = IntCounter::with_opts(Opts::new(
            "huddle_call_state_updates_total",
            "Anzahl gesendeter Call-Zustaende (nur als Leader)",
        ))?;
        registry.register(Box::new(call_state_updates_total.clone()))?;

        let authenticated_participants = IntGauge::with_opts(Opts::new(
            "huddle_authenticated_participants",
            "Anzahl aktuell authentifizierter Teilnehmer",
        ))?;
        registry.register(Box::new(authenticated_participants.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            handshakes_total,
            protocol_errors_total,
            participants_removed_total,
            epoch_transitions_total,
            ratchet_advances_total,
            call_state_updates_total,
            authenticated_participants,
        })
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl std::fmt::Debug for CallMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallMetrics")
            .field("handshakes_total", &self.handshakes_total.get())
            .field(
                "authenticated_participants",
                &self.authenticated_participants.get(),
            )
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metriken_erstellen_erfolgreich() {
        let metriken = CallMetrics::neu().unwrap();
        assert!(!metriken.registry.gather().is_empty());
    }

    #[test]
    fn instanzen_zaehlen_getrennt() {
        let a = CallMetrics::neu().unwrap();
        let b = CallMetrics::neu().unwrap();
        a.handshakes_total.inc();
        assert_eq!(a.handshakes_total.get(), 1);
        assert_eq!(b.handshakes_total.get(), 0);
    }

    #[test]
    fn entfernte_teilnehmer_mit_label() {
        let metriken = CallMetrics::neu().unwrap();
        metriken
            .participants_removed_total
            .with_label_values(&["sfu-left"])
            .inc();
        assert_eq!(
            metriken
                .participants_removed_total
                .with_label_values(&["sfu-left"])
                .get(),
            1
        );
    }

    #[test]
    fn metriken_export_prometheus_format() {
        let metriken = CallMetrics::neu().unwrap();
        metriken.authenticated_participants.set(3);
        metriken.epoch_transitions_total.inc();

        let output = metriken.exportieren().unwrap();
        assert!(output.contains("huddle_authenticated_participants 3"));
        assert!(output.contains("huddle_epoch_transitions_total 1"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }
}
