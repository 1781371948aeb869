//! Fehlertypen fuer Huddle
//!
//! Gemeinsamer Fehler-Enum fuer Typen, die von allen Crates geteilt werden.
//! Untermodule definieren eigene Fehler und konvertieren via `#[from]`.

use thiserror::Error;

/// Globaler Result-Alias fuer Huddle
pub type Result<T> = std::result::Result<T, HuddleError>;

/// Fehler der gemeinsamen Huddle-Typen
#[derive(Debug, Error)]
pub enum HuddleError {
    // --- Validierung ---
    #[error("Ungueltige Teilnehmer-ID: {0} (erlaubt: 0..790)")]
    UngueltigeTeilnehmerId(u32),

    #[error("Ungueltige Identitaet: '{0}'")]
    UngueltigeIdentitaet(String),

    #[error("Ungueltige Nachricht: {0}")]
    UngueltigeNachricht(String),

    // --- Konfiguration ---
    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    // --- Intern ---
    #[error("Interner Fehler: {0}")]
    Intern(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl HuddleError {
    /// Erstellt einen internen Fehler aus einer beliebigen Nachricht
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Gibt true zurueck wenn der Fehler durch fehlerhafte Eingabedaten entstand
    pub fn ist_validierung(&self) -> bool {
        matches!(
            self,
            Self::UngueltigeTeilnehmerId(_)
                | Self::UngueltigeIdentitaet(_)
                | Self::UngueltigeNachricht(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fehler_anzeige() {
        let e = HuddleError::UngueltigeIdentitaet("abc".into());
        assert_eq!(e.to_string(), "Ungueltige Identitaet: 'abc'");
    }

    #[test]
    fn validierung_erkennung() {
        assert!(HuddleError::UngueltigeTeilnehmerId(900).ist_validierung());
        assert!(!HuddleError::intern("test").ist_validierung());
    }
}
