//! Fehlertypen fuer MID-Vergabe und SDP-Erzeugung

use huddle_core::ParticipantId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WebRtcError {
    #[error("Keine MIDs fuer {0} verfuegbar")]
    MidsErschoepft(ParticipantId),

    #[error("Lokaler Teilnehmer {local} steht nicht an erster Stelle der m-Line-Reihenfolge")]
    LokalNichtZuerst { local: ParticipantId },

    #[error("Aktiver Teilnehmer {0} fehlt in der m-Line-Reihenfolge")]
    FehltInReihenfolge(ParticipantId),

    #[error("Ungueltiger ICE-Username-Fragment: '{0}'")]
    UngueltigesUfrag(String),

    #[error("Ungueltiges ICE-Passwort (mindestens 22 Zeichen)")]
    UngueltigesPasswort,

    #[error("Ungueltiger DTLS-Fingerprint: erwartet 32 Bytes, erhalten {0}")]
    UngueltigerFingerprint(usize),
}

pub type WebRtcResult<T> = Result<T, WebRtcError>;
