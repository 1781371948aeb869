//! Gemeinsame Typen fuer das Kryptografie-Subsystem
//!
//! Jede Schluessel- und Cookie-Art hat einen eigenen Newtype, damit lokale und
//! entfernte Werte nicht verwechselt werden koennen.

use rand::rngs::OsRng;
use rand::RngCore;

use huddle_protocol::{COOKIE_LAENGE, PUBLIC_KEY_LAENGE};

/// Laenge symmetrischer Schluessel
pub const SCHLUESSEL_LAENGE: usize = 32;

/// Sicherer Schluessel-Container (wird beim Drop genullt)
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey([u8; SCHLUESSEL_LAENGE]);

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretKey([REDACTED] {} bytes)", self.0.len())
    }
}

impl SecretKey {
    pub fn new(bytes: [u8; SCHLUESSEL_LAENGE]) -> Self {
        Self(bytes)
    }

    /// Erzeugt einen zufaelligen Schluessel
    pub fn zufaellig() -> Self {
        let mut bytes = [0u8; SCHLUESSEL_LAENGE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SCHLUESSEL_LAENGE] {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Cookies
// ---------------------------------------------------------------------------

/// Eigener Cookie (PCCK) gegenueber genau einem Teilnehmer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalCookie([u8; COOKIE_LAENGE]);

impl LocalCookie {
    /// Erzeugt einen frischen Cookie. Cookies werden nie wiederverwendet.
    pub fn zufaellig() -> Self {
        let mut bytes = [0u8; COOKIE_LAENGE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; COOKIE_LAENGE] {
        &self.0
    }
}

/// Cookie (PCCK) eines entfernten Teilnehmers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCookie([u8; COOKIE_LAENGE]);

impl RemoteCookie {
    pub fn new(bytes: [u8; COOKIE_LAENGE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; COOKIE_LAENGE] {
        &self.0
    }

    /// Prueft ob der Cookie unserem eigenen entspricht (Reflection)
    pub fn gleicht(&self, local: &LocalCookie) -> bool {
        self.0 == local.0
    }
}

// ---------------------------------------------------------------------------
// Oeffentliche Schluessel
// ---------------------------------------------------------------------------

/// Oeffentlicher Call-Schluessel (PCK) eines entfernten Teilnehmers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteCallKey([u8; PUBLIC_KEY_LAENGE]);

impl RemoteCallKey {
    pub fn new(bytes: [u8; PUBLIC_KEY_LAENGE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LAENGE] {
        &self.0
    }
}

/// Langzeit-Identitaetsschluessel eines Kontakts (X25519)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityPublicKey([u8; PUBLIC_KEY_LAENGE]);

impl IdentityPublicKey {
    pub fn new(bytes: [u8; PUBLIC_KEY_LAENGE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LAENGE] {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Gruppencall-Schluessel
// ---------------------------------------------------------------------------

/// Gruppencall-Schluessel (GCK), von allen Gruppenmitgliedern geteilt
#[derive(Debug, Clone)]
pub struct GroupCallKey(SecretKey);

impl GroupCallKey {
    pub fn new(key: SecretKey) -> Self {
        Self(key)
    }

    pub fn zufaellig() -> Self {
        Self(SecretKey::zufaellig())
    }

    pub fn as_secret(&self) -> &SecretKey {
        &self.0
    }
}

/// Hash des Gruppencall-Schluessels (GCKH), dient als Salt fuer Ableitungen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupCallKeyHash([u8; SCHLUESSEL_LAENGE]);

impl GroupCallKeyHash {
    pub fn new(bytes: [u8; SCHLUESSEL_LAENGE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SCHLUESSEL_LAENGE] {
        &self.0
    }
}

/// Eindeutige ID eines Gruppencalls (Hash ueber die Call-Parameter)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupCallId([u8; 32]);

impl GroupCallId {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Gekuerzte Darstellung fuer Logs
    pub fn gekuerzt(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl std::fmt::Display for GroupCallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl std::fmt::Debug for GroupCallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GroupCallId({})", self.gekuerzt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_key_debug_ist_redacted() {
        let key = SecretKey::new([0xAB; 32]);
        let ausgabe = format!("{key:?}");
        assert!(ausgabe.contains("REDACTED"));
        assert!(!ausgabe.contains("171"));
    }

    #[test]
    fn cookies_sind_zufaellig() {
        assert_ne!(LocalCookie::zufaellig(), LocalCookie::zufaellig());
    }

    #[test]
    fn reflektierter_cookie_erkannt() {
        let lokal = LocalCookie::zufaellig();
        let reflektiert = RemoteCookie::new(*lokal.as_bytes());
        assert!(reflektiert.gleicht(&lokal));
        assert!(!RemoteCookie::new([0u8; 16]).gleicht(&lokal));
    }

    #[test]
    fn call_id_gekuerzt() {
        let id = GroupCallId::new([0x12; 32]);
        assert_eq!(id.gekuerzt(), "12121212");
        assert_eq!(id.to_string().len(), 64);
    }
}
