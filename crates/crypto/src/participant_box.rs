//! Paarweise Box zwischen zwei Call-Teilnehmern (PCK-Box)
//!
//! Schluessel: HKDF-SHA256 ueber den X25519-DH der beiden Call-Schluessel.
//! Nonce: `[cookie des Absenders(16)] + [sequenznummer(8, little endian)]`.
//! Die Sequenznummer wird pro Richtung gezaehlt. Ein wiederholtes oder
//! umsortiertes Paket verwendet eine andere Nonce und scheitert daher.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};

use huddle_protocol::PUBLIC_KEY_LAENGE;

use crate::derivation::hkdf_key;
use crate::error::{CryptoError, CryptoResult};
use crate::secret_box::NONCE_LAENGE;
use crate::types::{LocalCookie, RemoteCallKey, RemoteCookie};

const BOX_SALT: &[u8] = b"huddle-call";
const BOX_INFO: &[u8] = b"pck";

/// Monoton steigende Sequenznummer (Post-Inkrement, Start bei 0)
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    pub fn new() -> Self {
        Self(0)
    }

    /// Gibt den aktuellen Wert zurueck und erhoeht danach
    pub fn naechste(&mut self) -> CryptoResult<u64> {
        let wert = self.0;
        self.0 = self.0.checked_add(1).ok_or(CryptoError::SequenzUeberlauf)?;
        Ok(wert)
    }

    pub fn aktuell(&self) -> u64 {
        self.0
    }
}

/// Eigener Call-Schluessel (PCK): ein Schluesselpaar fuer alle Teilnehmer eines Calls
pub struct LocalCallKey {
    secret: StaticSecret,
    public: [u8; PUBLIC_KEY_LAENGE],
}

impl LocalCallKey {
    pub fn zufaellig() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret).to_bytes();
        Self { secret, public }
    }

    pub fn public(&self) -> &[u8; PUBLIC_KEY_LAENGE] {
        &self.public
    }

    /// Prueft ob ein entfernter PCK unserem eigenen entspricht (Reflection)
    pub fn gleicht(&self, remote: &RemoteCallKey) -> bool {
        &self.public == remote.as_bytes()
    }
}

impl std::fmt::Debug for LocalCallKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LocalCallKey({})", hex::encode(&self.public[..4]))
    }
}

/// Verschluesselung zwischen genau zwei Teilnehmern
pub struct ParticipantCallBox {
    cipher: XChaCha20Poly1305,
}

impl ParticipantCallBox {
    /// Fuehrt den DH-Austausch durch und leitet den Box-Schluessel ab
    ///
    /// Ein nicht-kontributives Ergebnis (z.B. Low-Order-Point als PCK) wird abgelehnt.
    pub fn neu(local: &LocalCallKey, remote: &RemoteCallKey) -> CryptoResult<Self> {
        let shared = local
            .secret
            .diffie_hellman(&PublicKey::from(*remote.as_bytes()));
        if !shared.was_contributory() {
            return Err(CryptoError::KeyExchange(
                "DH-Ergebnis ist nicht kontributiv".to_string(),
            ));
        }
        let key = hkdf_key(shared.as_bytes(), BOX_SALT, BOX_INFO)?;
        Ok(Self {
            cipher: XChaCha20Poly1305::new(Key::from_slice(key.as_bytes())),
        })
    }

    fn nonce(cookie: &[u8; 16], sn: u64) -> [u8; NONCE_LAENGE] {
        let mut nonce = [0u8; NONCE_LAENGE];
        nonce[..16].copy_from_slice(cookie);
        nonce[16..].copy_from_slice(&sn.to_le_bytes());
        nonce
    }

    pub fn verschluesseln(
        &self,
        cookie: &LocalCookie,
        sn: &mut SequenceNumber,
        plaintext: &[u8],
    ) -> CryptoResult<Vec<u8>> {
        let nonce = Self::nonce(cookie.as_bytes(), sn.naechste()?);
        self.cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext)
            .map_err(|e| CryptoError::Verschluesselung(e.to_string()))
    }

    pub fn entschluesseln(
        &self,
        cookie: &RemoteCookie,
        sn: &mut SequenceNumber,
        ciphertext: &[u8],
    ) -> CryptoResult<Vec<u8>> {
        let nonce = Self::nonce(cookie.as_bytes(), sn.naechste()?);
        self.cipher
            .decrypt(XNonce::from_slice(&nonce), ciphertext)
            .map_err(|e| CryptoError::Entschluesselung(e.to_string()))
    }
}

impl std::fmt::Debug for ParticipantCallBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ParticipantCallBox([REDACTED])")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    struct Seite {
        key: LocalCallKey,
        cookie: LocalCookie,
    }

    fn seite() -> Seite {
        Seite {
            key: LocalCallKey::zufaellig(),
            cookie: LocalCookie::zufaellig(),
        }
    }

    #[test]
    fn beide_seiten_leiten_gleiche_box_ab() {
        let a = seite();
        let b = seite();
        let box_a = ParticipantCallBox::neu(&a.key, &RemoteCallKey::new(*b.key.public())).unwrap();
        let box_b = ParticipantCallBox::neu(&b.key, &RemoteCallKey::new(*a.key.public())).unwrap();

        let mut a_sendet = SequenceNumber::new();
        let mut b_empfaengt = SequenceNumber::new();
        let cookie_a = RemoteCookie::new(*a.cookie.as_bytes());

        for nachricht in [&b"eins"[..], b"zwei", b"drei"] {
            let chiffrat = box_a.verschluesseln(&a.cookie, &mut a_sendet, nachricht).unwrap();
            let klartext = box_b
                .entschluesseln(&cookie_a, &mut b_empfaengt, &chiffrat)
                .unwrap();
            assert_eq!(klartext, nachricht);
        }
        assert_eq!(a_sendet.aktuell(), 3);
    }

    #[test]
    fn wiederholung_scheitert() {
        let a = seite();
        let b = seite();
        let box_a = ParticipantCallBox::neu(&a.key, &RemoteCallKey::new(*b.key.public())).unwrap();
        let box_b = ParticipantCallBox::neu(&b.key, &RemoteCallKey::new(*a.key.public())).unwrap();
        let cookie_a = RemoteCookie::new(*a.cookie.as_bytes());

        let mut sn = SequenceNumber::new();
        let chiffrat = box_a.verschluesseln(&a.cookie, &mut sn, b"einmal").unwrap();

        let mut empfang = SequenceNumber::new();
        assert!(box_b.entschluesseln(&cookie_a, &mut empfang, &chiffrat).is_ok());
        assert!(box_b.entschluesseln(&cookie_a, &mut empfang, &chiffrat).is_err());
    }

    #[test]
    fn low_order_punkt_abgelehnt() {
        let a = seite();
        let err = ParticipantCallBox::neu(&a.key, &RemoteCallKey::new([0u8; 32])).unwrap_err();
        assert!(matches!(err, CryptoError::KeyExchange(_)));
    }

    #[test]
    fn sequenznummer_post_inkrement() {
        let mut sn = SequenceNumber::new();
        assert_eq!(sn.naechste().unwrap(), 0);
        assert_eq!(sn.naechste().unwrap(), 1);
        assert_eq!(sn.aktuell(), 2);
    }
}
