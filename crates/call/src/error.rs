//! Fehlertypen des Call-Orchestrators
//!
//! Zwei Ebenen:
//! - [`ParticipantError`]: betrifft genau einen entfernten Teilnehmer und fuehrt
//!   zu dessen Entfernung
//! - [`CallError`]: betrifft den ganzen Call und fuehrt zum Abbruch

use huddle_crypto::CryptoError;
use huddle_protocol::ProtocolError;
use huddle_webrtc::WebRtcError;
use thiserror::Error;

use crate::delayed::DelayedError;
use crate::lock::LockIntent;

/// Fehler auf Call-Ebene
#[derive(Debug, Error)]
pub enum CallError {
    #[error("Transport-Fehler: {0}")]
    Transport(#[source] anyhow::Error),

    #[error("Medien-Krypto-Fehler: {0}")]
    MediaCrypto(#[source] anyhow::Error),

    #[error("Krypto-Fehler: {0}")]
    Crypto(#[from] CryptoError),

    #[error("WebRTC-Fehler: {0}")]
    WebRtc(#[from] WebRtcError),

    #[error("Protokoll-Fehler: {0}")]
    Protokoll(#[from] ProtocolError),

    #[error("Falscher Lock-Kontext: erwartet {erwartet:?}, aktiv {aktiv:?}")]
    FalscherLockIntent {
        erwartet: &'static [LockIntent],
        aktiv: Option<LockIntent>,
    },

    #[error("Teilnehmer: {0}")]
    Teilnehmer(#[from] ParticipantError),

    #[error("Call ist bereits beendet")]
    Beendet,

    #[error(transparent)]
    Delayed(#[from] DelayedError),
}

pub type CallResult<T> = Result<T, CallError>;

/// Fehler eines einzelnen entfernten Teilnehmers
#[derive(Debug, Error)]
pub enum ParticipantError {
    /// Der Teilnehmer hat das Protokoll verletzt (wird entfernt)
    #[error("Protokollverletzung: {0}")]
    Protokoll(String),

    /// Interner Fehler beim Verarbeiten (bricht den Call ab)
    #[error("Unerwarteter Fehler: {0}")]
    Unerwartet(String),
}

impl ParticipantError {
    pub fn protokoll(msg: impl Into<String>) -> Self {
        Self::Protokoll(msg.into())
    }
}

impl From<ProtocolError> for ParticipantError {
    fn from(e: ProtocolError) -> Self {
        Self::Protokoll(e.to_string())
    }
}

impl From<CryptoError> for ParticipantError {
    fn from(e: CryptoError) -> Self {
        match e {
            // Zaehlerueberlaeufe liegen nicht am Gegenueber
            CryptoError::SequenzUeberlauf
            | CryptoError::RatchetUeberlauf { .. }
            | CryptoError::EpochUeberlauf
            | CryptoError::KeinEpochWechsel => Self::Unerwartet(e.to_string()),
            andere => Self::Protokoll(andere.to_string()),
        }
    }
}

impl From<DelayedError> for ParticipantError {
    fn from(e: DelayedError) -> Self {
        Self::Unerwartet(e.to_string())
    }
}

pub type ParticipantResult<T> = Result<T, ParticipantError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entschluesselung_ist_protokollfehler() {
        let e = ParticipantError::from(CryptoError::Entschluesselung("tag".into()));
        assert!(matches!(e, ParticipantError::Protokoll(_)));
    }

    #[test]
    fn ueberlauf_ist_unerwartet() {
        let e = ParticipantError::from(CryptoError::SequenzUeberlauf);
        assert!(matches!(e, ParticipantError::Unerwartet(_)));
    }
}
