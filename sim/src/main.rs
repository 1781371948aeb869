//! Huddle-Simulation – Einstiegspunkt
//!
//! Laedt die Konfiguration, initialisiert das Logging und fuehrt einen
//! simulierten Gruppencall ueber das Loopback-SFU aus.

use anyhow::Result;
use huddle_observability::logging_initialisieren;
use huddle_sim::{config::SimConfig, simulation_ausfuehren};

#[tokio::main]
async fn main() -> Result<()> {
    // Konfigurationsdatei-Pfad aus Umgebungsvariable oder Standard
    let config_pfad = std::env::var("HUDDLE_SIM_CONFIG").unwrap_or_else(|_| "sim.toml".into());

    // Konfiguration laden (Standardwerte falls Datei fehlt)
    let config = SimConfig::laden(&config_pfad)?;

    logging_initialisieren(&config.logging.level, &config.logging.format);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_pfad,
        teilnehmer = config.sim.teilnehmer,
        "Huddle-Simulation wird gestartet"
    );

    tokio::select! {
        bericht = simulation_ausfuehren(&config) => {
            let bericht = bericht?;
            match bericht.call_state {
                Some(snapshot) => tracing::info!(
                    leader = %snapshot.created_by,
                    teilnehmer = snapshot.participants.len(),
                    "Letzter Call-Zustand beim SFU"
                ),
                None => tracing::warn!("Kein Call-Zustand beim SFU eingegangen"),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Simulation per Ctrl+C abgebrochen");
        }
    }

    Ok(())
}
