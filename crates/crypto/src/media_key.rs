//! Medienschluessel-Ratchet (PCMK)
//!
//! Jeder Teilnehmer haelt genau einen aktuellen Medienschluessel und hoechstens
//! einen ausstehenden Epoch-Wechsel:
//! - Join: der Ratchet-Zaehler des aktuellen Schluessels wird weitergedreht
//!   (KDF-Schritt), ohne erneute Verteilung. Neue Teilnehmer koennen dadurch
//!   keine aelteren Frames entschluesseln.
//! - Leave: ein zufaelliger Schluessel mit `epoch + 1` wird verteilt und nach
//!   einer Schonfrist angewendet. Ausgeschiedene Teilnehmer kennen ihn nie.
//!
//! Abgeloeste Schluessel werden als `purged` markiert und nie mehr verteilt.

use std::sync::Arc;

use parking_lot::RwLock;

use huddle_protocol::MediaKeyMessage;

use crate::derivation::hkdf_key;
use crate::error::{CryptoError, CryptoResult};
use crate::types::{GroupCallKeyHash, SecretKey};

const RATCHET_SALT: &[u8] = b"huddle-call";

/// Hoechster Ratchet-Zaehler (ein Byte in den Frame-Metadaten)
pub const MAX_RATCHET_COUNTER: u8 = u8::MAX;

/// Ein KDF-Schritt des Ratchets
pub fn ratchet_schritt(key: &SecretKey) -> CryptoResult<SecretKey> {
    hkdf_key(key.as_bytes(), RATCHET_SALT, b"m'")
}

/// Leitet den Frame-Schluessel (PCMFK) aus einem Medienschluessel ab
pub fn frame_key(key: &SecretKey, gckh: &GroupCallKeyHash) -> CryptoResult<SecretKey> {
    hkdf_key(key.as_bytes(), gckh.as_bytes(), b"mf")
}

/// Werte eines Medienschluessels zu einem Zeitpunkt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMediaKeyState {
    pub epoch: u32,
    pub ratchet_counter: u8,
    pub pcmk: SecretKey,
}

impl RawMediaKeyState {
    /// Liegt `self` zeitlich nach `other`?
    pub fn ist_nachfolger_von(&self, other: &RawMediaKeyState) -> bool {
        (self.epoch, self.ratchet_counter) > (other.epoch, other.ratchet_counter)
    }

    /// Dreht den Ratchet um einen Schritt weiter
    pub fn weiterdrehen(&self) -> CryptoResult<RawMediaKeyState> {
        let ratchet_counter = self
            .ratchet_counter
            .checked_add(1)
            .ok_or(CryptoError::RatchetUeberlauf { epoch: self.epoch })?;
        Ok(Self {
            epoch: self.epoch,
            ratchet_counter,
            pcmk: ratchet_schritt(&self.pcmk)?,
        })
    }
}

impl From<&RawMediaKeyState> for MediaKeyMessage {
    fn from(state: &RawMediaKeyState) -> Self {
        Self {
            epoch: state.epoch,
            ratchet_counter: state.ratchet_counter,
            pcmk: *state.pcmk.as_bytes(),
        }
    }
}

impl From<&MediaKeyMessage> for RawMediaKeyState {
    fn from(message: &MediaKeyMessage) -> Self {
        Self {
            epoch: message.epoch,
            ratchet_counter: message.ratchet_counter,
            pcmk: SecretKey::new(message.pcmk),
        }
    }
}

#[derive(Debug)]
struct MediaKeyInner {
    state: RawMediaKeyState,
    purged: bool,
}

/// Geteilter Medienschluessel
///
/// Ausstehende Verteilungen (z.B. an noch nicht authentifizierte Teilnehmer)
/// halten eine Referenz. Wird der Schluessel abgeloest, sehen sie das und
/// verteilen ihn nicht mehr.
#[derive(Debug, Clone)]
pub struct SharedMediaKey(Arc<RwLock<MediaKeyInner>>);

impl SharedMediaKey {
    fn new(state: RawMediaKeyState) -> Self {
        Self(Arc::new(RwLock::new(MediaKeyInner {
            state,
            purged: false,
        })))
    }

    /// Aktuelle Werte, `None` falls bereits abgeloest
    pub fn snapshot(&self) -> Option<RawMediaKeyState> {
        let inner = self.0.read();
        (!inner.purged).then(|| inner.state.clone())
    }

    pub fn epoch(&self) -> u32 {
        self.0.read().state.epoch
    }

    pub fn ist_purged(&self) -> bool {
        self.0.read().purged
    }

    fn purge(&self) {
        self.0.write().purged = true;
    }
}

/// Ergebnis von [`LocalMediaKey::next_epoch`]
#[derive(Debug)]
pub enum NextEpoch {
    /// Neuer Epoch-Wechsel gestartet, Schluessel muss verteilt werden
    Started(SharedMediaKey),
    /// Es lief bereits ein Wechsel, dieser ist jetzt veraltet
    MarkedStale,
}

/// Ergebnis von [`LocalMediaKey::apply_pending`]
#[derive(Debug)]
pub struct AppliedEpoch {
    pub state: RawMediaKeyState,
    /// Der angewendete Wechsel war veraltet, ein weiterer ist noetig
    pub stale: bool,
}

#[derive(Debug)]
struct PendingEpoch {
    key: SharedMediaKey,
    stale: bool,
}

/// Eigener Medienschluessel mit optionalem ausstehenden Epoch-Wechsel
#[derive(Debug)]
pub struct LocalMediaKey {
    current: SharedMediaKey,
    pending: Option<PendingEpoch>,
}

impl LocalMediaKey {
    /// Erster Schluessel eines Calls: Epoch 0, Ratchet 0, zufaellig
    pub fn neu() -> Self {
        Self {
            current: SharedMediaKey::new(RawMediaKeyState {
                epoch: 0,
                ratchet_counter: 0,
                pcmk: SecretKey::zufaellig(),
            }),
            pending: None,
        }
    }

    pub fn current(&self) -> RawMediaKeyState {
        self.current.0.read().state.clone()
    }

    pub fn current_shared(&self) -> SharedMediaKey {
        self.current.clone()
    }

    /// Alle nicht abgeloesten Schluessel (aktuell + ausstehend)
    pub fn all(&self) -> Vec<RawMediaKeyState> {
        std::iter::once(&self.current)
            .chain(self.pending.as_ref().map(|p| &p.key))
            .filter_map(SharedMediaKey::snapshot)
            .collect()
    }

    /// Dreht den aktuellen Schluessel weiter (bei Join)
    pub fn next_ratchet_counter(&mut self) -> CryptoResult<RawMediaKeyState> {
        let mut inner = self.current.0.write();
        let next = inner.state.weiterdrehen()?;
        inner.state = next.clone();
        Ok(next)
    }

    /// Startet einen Epoch-Wechsel oder markiert den laufenden als veraltet
    pub fn next_epoch(&mut self) -> CryptoResult<NextEpoch> {
        if let Some(pending) = self.pending.as_mut() {
            pending.stale = true;
            return Ok(NextEpoch::MarkedStale);
        }
        let epoch = self
            .current
            .epoch()
            .checked_add(1)
            .ok_or(CryptoError::EpochUeberlauf)?;
        let key = SharedMediaKey::new(RawMediaKeyState {
            epoch,
            ratchet_counter: 0,
            pcmk: SecretKey::zufaellig(),
        });
        self.pending = Some(PendingEpoch {
            key: key.clone(),
            stale: false,
        });
        Ok(NextEpoch::Started(key))
    }

    /// Wendet den ausstehenden Wechsel an und loest den bisherigen Schluessel ab
    pub fn apply_pending(&mut self) -> CryptoResult<AppliedEpoch> {
        let pending = self.pending.take().ok_or(CryptoError::KeinEpochWechsel)?;
        let previous = std::mem::replace(&mut self.current, pending.key);
        previous.purge();
        Ok(AppliedEpoch {
            state: self.current(),
            stale: pending.stale,
        })
    }
}

/// Zuletzt bekannter Medienschluessel eines entfernten Teilnehmers
#[derive(Debug)]
pub struct RemoteMediaKey {
    latest: RawMediaKeyState,
}

impl RemoteMediaKey {
    pub fn new(initial: RawMediaKeyState) -> Self {
        Self { latest: initial }
    }

    pub fn latest(&self) -> &RawMediaKeyState {
        &self.latest
    }

    /// Uebernimmt einen neuen Schluessel, sofern er ein Nachfolger ist
    pub fn update(&mut self, state: RawMediaKeyState) -> bool {
        if !state.ist_nachfolger_von(&self.latest) {
            return false;
        }
        self.latest = state;
        true
    }

    /// Dreht den Ratchet bis zum im Frame gesehenen Zaehler weiter
    ///
    /// Aeltere Zaehler werden verworfen (`None`), da die Schluessel dafuer
    /// nicht mehr vorliegen.
    pub fn align_with(&mut self, ratchet_counter: u8) -> CryptoResult<Option<&RawMediaKeyState>> {
        if ratchet_counter < self.latest.ratchet_counter {
            return Ok(None);
        }
        while self.latest.ratchet_counter < ratchet_counter {
            self.latest = self.latest.weiterdrehen()?;
        }
        Ok(Some(&self.latest))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
