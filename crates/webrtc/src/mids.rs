//! Vergabe von Media-IDs (MIDs) pro Teilnehmer
//!
//! Das Alphabet sind die 79 SDP-Token-Zeichen (RFC 4566), gefolgt von allen
//! Zwei-Zeichen-Kombinationen (linkes Zeichen zuerst). Jeder Teilnehmer bekommt
//! einen Block von 8 aufeinanderfolgenden Tokens:
//!
//! | Slot | Verwendung  |
//! |------|-------------|
//! | 0    | Mikrofon    |
//! | 1    | Kamera      |
//! | 2-6  | reserviert  |
//! | 7    | Datenkanal  |

use huddle_core::ParticipantId;

use crate::error::{WebRtcError, WebRtcResult};

/// SDP-Token-Zeichen in fester Reihenfolge
pub const SDP_TOKEN_RANGE: [char; 79] = [
    '!', '#', '$', '%', '&', '\'', '*', '+', '-', '.', //
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', //
    'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', //
    'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R', 'S', 'T', //
    'U', 'V', 'W', 'X', 'Y', 'Z', '^', '_', '`', 'a', //
    'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', //
    'l', 'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u', //
    'v', 'w', 'x', 'y', 'z', '{', '|', '}', '~',
];

const TOKENS: usize = SDP_TOKEN_RANGE.len();

/// Anzahl der Slots pro Teilnehmer
pub const MIDS_STEP: usize = 8;

/// Anzahl der Teilnehmer, fuer die MIDs existieren
pub const MIDS_MAX: usize = (TOKENS + TOKENS * TOKENS) / MIDS_STEP;

/// Die von uns genutzten MIDs eines Teilnehmers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mids {
    pub microphone: String,
    pub camera: String,
    pub data: String,
}

fn token(index: usize) -> Option<String> {
    if index < TOKENS {
        return Some(SDP_TOKEN_RANGE[index].to_string());
    }
    let index = index - TOKENS;
    if index >= TOKENS * TOKENS {
        return None;
    }
    let mut token = String::with_capacity(2);
    token.push(SDP_TOKEN_RANGE[index / TOKENS]);
    token.push(SDP_TOKEN_RANGE[index % TOKENS]);
    Some(token)
}

/// Alle 8 Tokens des Blocks eines Teilnehmers
pub fn all(id: ParticipantId) -> WebRtcResult<[String; MIDS_STEP]> {
    let start = id.get() as usize * MIDS_STEP;
    let mut block: [String; MIDS_STEP] = Default::default();
    for (slot, mid) in block.iter_mut().enumerate() {
        *mid = token(start + slot).ok_or(WebRtcError::MidsErschoepft(id))?;
    }
    Ok(block)
}

/// MIDs fuer Mikrofon, Kamera und Datenkanal eines Teilnehmers
pub fn mids(id: ParticipantId) -> WebRtcResult<Mids> {
    let [microphone, camera, _, _, _, _, _, data] = all(id)?;
    Ok(Mids {
        microphone,
        camera,
        data,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn pid(id: u32) -> ParticipantId {
        ParticipantId::new(id).unwrap()
    }

    #[test]
    fn kapazitaet_ist_790() {
        assert_eq!(MIDS_MAX, 790);
        assert_eq!(MIDS_MAX as u32, ParticipantId::LIMIT);
    }

    #[test]
    fn erste_bloecke() {
        let m = mids(pid(0)).unwrap();
        assert_eq!(m.microphone, "!");
        assert_eq!(m.camera, "#");
        assert_eq!(m.data, "+");

        let m = mids(pid(1)).unwrap();
        assert_eq!(m.microphone, "-");
        assert_eq!(m.camera, ".");
        assert_eq!(m.data, "5");
    }

    #[test]
    fn uebergang_zu_zwei_zeichen() {
        // Block 9 beginnt bei Index 72, Slot 7 liegt bei 79 (erstes Zwei-Zeichen-Token)
        let block = all(pid(9)).unwrap();
        assert_eq!(block[6], "~");
        assert_eq!(block[7], "!!");
    }

    #[test]
    fn letzter_block() {
        let m = mids(pid(789)).unwrap();
        assert_eq!(m.data, "~~");
        assert_eq!(m.microphone.len(), 2);
    }

    #[test]
    fn alle_mids_disjunkt() {
        let mut gesehen = HashSet::new();
        for id in 0..ParticipantId::LIMIT {
            for mid in all(pid(id)).unwrap() {
                assert!(gesehen.insert(mid), "MID doppelt vergeben (id {id})");
            }
        }
        assert_eq!(gesehen.len(), MIDS_MAX * MIDS_STEP);
    }

    #[test]
    fn tokens_enthalten_nur_sdp_zeichen() {
        for mid in all(pid(500)).unwrap() {
            assert!(mid.chars().all(|c| SDP_TOKEN_RANGE.contains(&c)));
        }
    }
}
