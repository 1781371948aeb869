//! Fehlertypen fuer Dekodierung und Validierung von Protokollnachrichten

use huddle_core::HuddleError;
use thiserror::Error;

/// Fehler beim Dekodieren oder Validieren einer Nachricht
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Protobuf-Dekodierung fehlgeschlagen: {0}")]
    Dekodierung(#[from] prost::DecodeError),

    #[error("Ungueltiges Feld '{feld}': {grund}")]
    UngueltigesFeld { feld: &'static str, grund: String },

    #[error("Nachricht ohne Inhalt: {0}")]
    OhneInhalt(&'static str),

    #[error(transparent)]
    Validierung(#[from] HuddleError),
}

impl ProtocolError {
    pub fn feld(feld: &'static str, grund: impl Into<String>) -> Self {
        Self::UngueltigesFeld {
            feld,
            grund: grund.into(),
        }
    }
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
