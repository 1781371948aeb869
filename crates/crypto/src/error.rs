//! Fehlertypen fuer das Kryptografie-Subsystem

use thiserror::Error;

/// Fehler im Kryptografie-Subsystem
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Key-Exchange fehlgeschlagen: {0}")]
    KeyExchange(String),

    #[error("Verschluesselung fehlgeschlagen: {0}")]
    Verschluesselung(String),

    #[error("Entschluesselung fehlgeschlagen: {0}")]
    Entschluesselung(String),

    #[error("Key Derivation fehlgeschlagen: {0}")]
    KeyDerivation(String),

    #[error("Ungueltige Daten: {0}")]
    UngueltigeDaten(String),

    #[error("Ratchet-Zaehler uebergelaufen (Epoch {epoch})")]
    RatchetUeberlauf { epoch: u32 },

    #[error("Epoch uebergelaufen")]
    EpochUeberlauf,

    #[error("Sequenznummer uebergelaufen")]
    SequenzUeberlauf,

    #[error("Kein ausstehender Epoch-Wechsel")]
    KeinEpochWechsel,
}

pub type CryptoResult<T> = Result<T, CryptoError>;
