//! Structured Logging Setup via tracing-subscriber
//!
//! Konfigurierbar per Umgebungsvariable:
//! - `HUDDLE_LOG_LEVEL`: Filter-Direktiven (z.B. `debug` oder
//!   `info,huddle::security=warn`), Standard: Wert aus der Konfiguration
//! - `HUDDLE_LOG_FORMAT`: Format (text/json), Standard: Wert aus der Konfiguration
//!
//! Protokollverletzungen entfernter Teilnehmer werden auf dem Target
//! `huddle::security` geloggt und lassen sich so getrennt filtern.

use tracing_subscriber::{fmt, EnvFilter};

/// Target fuer sicherheitsrelevante Ereignisse
pub const SECURITY_TARGET: &str = "huddle::security";

/// Ausgabeformat der Logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    /// Unbekannte Werte fallen auf `Text` zurueck
    pub fn parse(format: &str) -> Self {
        match format {
            "json" => Self::Json,
            _ => Self::Text,
        }
    }
}

/// Initialisiert das Logging-System.
///
/// Umgebungsvariablen haben Vorrang vor den uebergebenen Werten. Gibt `false`
/// zurueck, falls bereits ein globaler Subscriber gesetzt war.
pub fn logging_initialisieren(level: &str, format: &str) -> bool {
    let filter = EnvFilter::try_from_env("HUDDLE_LOG_LEVEL")
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let format = std::env::var("HUDDLE_LOG_FORMAT").unwrap_or_else(|_| format.to_string());

    match LogFormat::parse(&format) {
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_current_span(true)
            .try_init()
            .is_ok(),
        LogFormat::Text => fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
            .is_ok(),
    }
}

/// Validiert ob ein Log-Level-String gueltig ist.
pub fn log_level_gueltig(level: &str) -> bool {
    matches!(level, "trace" | "debug" | "info" | "warn" | "error")
}

/// Validiert ob ein Log-Format-String gueltig ist.
pub fn log_format_gueltig(format: &str) -> bool {
    matches!(format, "text" | "json")
}
