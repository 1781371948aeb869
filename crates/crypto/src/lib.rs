//! # huddle-crypto
//!
//! Kryptografie fuer Ende-zu-Ende-verschluesselte Gruppencalls.
//!
//! ## Module
//! - `derivation` - Ableitungen aus dem Gruppencall-Schluessel, Identitaetsschluessel
//! - `secret_box` - Boxen mit vorangestellter Nonce (GCHK, GCSK, GCNHAK)
//! - `participant_box` - Paarweise PCK-Box mit Cookie + Sequenznummer
//! - `media_key` - Medienschluessel-Ratchet (PCMK)
//! - `types` - Schluessel- und Cookie-Newtypes
//! - `error` - Fehlertypen

pub mod derivation;
pub mod error;
pub mod media_key;
pub mod participant_box;
pub mod secret_box;
pub mod types;

// Bequeme Re-Exports
pub use derivation::{hkdf_derive, hkdf_key, ClientKey, GroupCallKeyDerivations, GroupCallParams};
pub use error::{CryptoError, CryptoResult};
pub use media_key::{
    frame_key, ratchet_schritt, AppliedEpoch, LocalMediaKey, NextEpoch, RawMediaKeyState,
    RemoteMediaKey, SharedMediaKey, MAX_RATCHET_COUNTER,
};
pub use participant_box::{LocalCallKey, ParticipantCallBox, SequenceNumber};
pub use secret_box::{GroupCallHandshakeBox, GroupCallStateBox, HandshakeAuthBox, NonceAheadBox};
pub use types::{
    GroupCallId, GroupCallKey, GroupCallKeyHash, IdentityPublicKey, LocalCookie, RemoteCallKey,
    RemoteCookie, SecretKey,
};
