//! Secret Boxes mit vorangestellter Zufalls-Nonce
//!
//! Format: `[nonce(24)] + [ciphertext inkl. 16 Bytes Tag]` (XChaCha20-Poly1305).
//! Genutzt fuer Hello (GCHK), Call-Zustand (GCSK) und die innere Auth-Schicht
//! (GCNHAK). Die Schluesselart ist im Typ kodiert.

use std::marker::PhantomData;

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{CryptoError, CryptoResult};
use crate::types::SecretKey;

/// Laenge der XChaCha20-Nonce
pub const NONCE_LAENGE: usize = 24;

/// Laenge des Poly1305-Tags
pub const TAG_LAENGE: usize = 16;

/// Markiert Boxen mit dem Gruppencall-Handshake-Schluessel (GCHK)
#[derive(Debug)]
pub enum Handshake {}

/// Markiert Boxen mit dem Gruppencall-Zustands-Schluessel (GCSK)
#[derive(Debug)]
pub enum CallState {}

/// Markiert Boxen mit dem paarweisen Handshake-Auth-Schluessel (GCNHAK)
#[derive(Debug)]
pub enum HandshakeAuth {}

/// Symmetrische Box, deren Nonce dem Chiffrat vorangestellt wird
pub struct NonceAheadBox<Art> {
    cipher: XChaCha20Poly1305,
    _art: PhantomData<Art>,
}

pub type GroupCallHandshakeBox = NonceAheadBox<Handshake>;
pub type GroupCallStateBox = NonceAheadBox<CallState>;
pub type HandshakeAuthBox = NonceAheadBox<HandshakeAuth>;

impl<Art> NonceAheadBox<Art> {
    pub fn new(key: &SecretKey) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(Key::from_slice(key.as_bytes())),
            _art: PhantomData,
        }
    }

    pub fn verschluesseln(&self, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LAENGE];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext)
            .map_err(|e| CryptoError::Verschluesselung(e.to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LAENGE + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn entschluesseln(&self, data: &[u8]) -> CryptoResult<Vec<u8>> {
        if data.len() < NONCE_LAENGE + TAG_LAENGE {
            return Err(CryptoError::UngueltigeDaten(format!(
                "Zu kurz fuer Nonce-Ahead-Box: {} Bytes",
                data.len()
            )));
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LAENGE);
        self.cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|e| CryptoError::Entschluesselung(e.to_string()))
    }
}

impl<Art> std::fmt::Debug for NonceAheadBox<Art> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NonceAheadBox<{}>", std::any::type_name::<Art>())
    }
}
