//! Schluesselableitungen fuer Gruppencalls
//!
//! Aus dem Gruppencall-Schluessel (GCK) werden abgeleitet:
//! - Call-ID: SHA-256 ueber Ersteller, Gruppen-ID, Protokollversion, GCK und SFU-URL
//! - GCKH: Hash des GCK, Salt fuer paarweise Ableitungen
//! - GCHK: Schluessel fuer Hello-Nachrichten
//! - GCSK: Schluessel fuer den Call-Zustand
//!
//! Der paarweise Handshake-Auth-Schluessel (GCNHAK) entsteht aus dem
//! Identitaets-DH zweier Gruppenmitglieder mit GCKH als Salt.

use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey, StaticSecret};

use huddle_core::GroupIdentity;
use huddle_protocol::PUBLIC_KEY_LAENGE;

use crate::error::{CryptoError, CryptoResult};
use crate::secret_box::{GroupCallHandshakeBox, GroupCallStateBox, HandshakeAuthBox};
use crate::types::{
    GroupCallId, GroupCallKey, GroupCallKeyHash, IdentityPublicKey, SecretKey, SCHLUESSEL_LAENGE,
};

const GCK_SALT: &[u8] = b"huddle-gck";
const CALL_ID_DOMAIN: &[u8] = b"huddle-call-id";

/// HKDF-basierte Key Derivation (allgemein verwendbar)
pub fn hkdf_derive(ikm: &[u8], salt: &[u8], info: &[u8], len: usize) -> CryptoResult<Vec<u8>> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = vec![0u8; len];
    hk.expand(info, &mut okm)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(okm)
}

/// Leitet einen 32-Byte-Schluessel via HKDF-SHA256 ab
pub fn hkdf_key(ikm: &[u8], salt: &[u8], info: &[u8]) -> CryptoResult<SecretKey> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = [0u8; SCHLUESSEL_LAENGE];
    hk.expand(info, &mut okm)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(SecretKey::new(okm))
}

/// Parameter, die einen Gruppencall eindeutig festlegen
#[derive(Debug, Clone)]
pub struct GroupCallParams {
    pub group: GroupIdentity,
    pub protocol_version: u32,
    pub gck: GroupCallKey,
    pub sfu_base_url: String,
}

/// Alle aus dem GCK abgeleiteten Werte eines Calls
#[derive(Debug)]
pub struct GroupCallKeyDerivations {
    pub call_id: GroupCallId,
    pub gckh: GroupCallKeyHash,
    pub handshake_box: GroupCallHandshakeBox,
    pub state_box: GroupCallStateBox,
}

impl GroupCallKeyDerivations {
    pub fn ableiten(params: &GroupCallParams) -> CryptoResult<Self> {
        let gck = params.gck.as_secret().as_bytes();

        let mut hasher = Sha256::new();
        hasher.update(CALL_ID_DOMAIN);
        hasher.update(params.group.creator.as_str().as_bytes());
        hasher.update(params.group.group_id.to_le_bytes());
        hasher.update(params.protocol_version.to_le_bytes());
        hasher.update(gck);
        hasher.update(params.sfu_base_url.as_bytes());
        let call_id = GroupCallId::new(hasher.finalize().into());

        let gckh = hkdf_key(gck, GCK_SALT, b"#")?;
        let gchk = hkdf_key(gck, GCK_SALT, b"h")?;
        let gcsk = hkdf_key(gck, GCK_SALT, b"s")?;

        Ok(Self {
            call_id,
            gckh: GroupCallKeyHash::new(*gckh.as_bytes()),
            handshake_box: GroupCallHandshakeBox::new(&gchk),
            state_box: GroupCallStateBox::new(&gcsk),
        })
    }
}

/// Eigener Langzeit-Identitaetsschluessel (X25519)
pub struct ClientKey {
    secret: StaticSecret,
    public: IdentityPublicKey,
}

impl ClientKey {
    pub fn new(secret: [u8; PUBLIC_KEY_LAENGE]) -> Self {
        let secret = StaticSecret::from(secret);
        let public = IdentityPublicKey::new(PublicKey::from(&secret).to_bytes());
        Self { secret, public }
    }

    pub fn zufaellig() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = IdentityPublicKey::new(PublicKey::from(&secret).to_bytes());
        Self { secret, public }
    }

    pub fn public(&self) -> &IdentityPublicKey {
        &self.public
    }

    /// Leitet GCNHAK gegenueber einem anderen Gruppenmitglied ab (symmetrisch)
    pub fn handshake_auth_box(
        &self,
        peer: &IdentityPublicKey,
        gckh: &GroupCallKeyHash,
    ) -> CryptoResult<HandshakeAuthBox> {
        let shared = self
            .secret
            .diffie_hellman(&PublicKey::from(*peer.as_bytes()));
        if !shared.was_contributory() {
            return Err(CryptoError::KeyExchange(
                "Identitaets-DH ist nicht kontributiv".to_string(),
            ));
        }
        let key = hkdf_key(shared.as_bytes(), gckh.as_bytes(), b"nha")?;
        Ok(HandshakeAuthBox::new(&key))
    }
}

impl std::fmt::Debug for ClientKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ClientKey({})", hex::encode(&self.public.as_bytes()[..4]))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_core::IdentityString;

    fn params(gck: GroupCallKey) -> GroupCallParams {
        GroupCallParams {
            group: GroupIdentity {
                creator: IdentityString::new("CREATOR1").unwrap(),
                group_id: 0x1122_3344_5566_7788,
            },
            protocol_version: 1,
            gck,
            sfu_base_url: "https://sfu.example.org".to_string(),
        }
    }

    #[test]
    fn ableitung_ist_deterministisch() {
        let gck = GroupCallKey::zufaellig();
        let a = GroupCallKeyDerivations::ableiten(&params(gck.clone())).unwrap();
        let b = GroupCallKeyDerivations::ableiten(&params(gck)).unwrap();
        assert_eq!(a.call_id, b.call_id);
        assert_eq!(a.gckh, b.gckh);

        let chiffrat = a.handshake_box.verschluesseln(b"hello").unwrap();
        assert_eq!(b.handshake_box.entschluesseln(&chiffrat).unwrap(), b"hello");
    }

    #[test]
    fn handshake_und_state_box_sind_getrennt() {
        let d = GroupCallKeyDerivations::ableiten(&params(GroupCallKey::zufaellig())).unwrap();
        let chiffrat = d.handshake_box.verschluesseln(b"hello").unwrap();
        assert!(d.state_box.entschluesseln(&chiffrat).is_err());
    }

    #[test]
    fn andere_sfu_ergibt_andere_call_id() {
        let gck = GroupCallKey::zufaellig();
        let a = GroupCallKeyDerivations::ableiten(&params(gck.clone())).unwrap();
        let mut p = params(gck);
        p.sfu_base_url = "https://andere-sfu.example.org".to_string();
        let b = GroupCallKeyDerivations::ableiten(&p).unwrap();
        assert_ne!(a.call_id, b.call_id);
    }

    #[test]
    fn handshake_auth_box_ist_symmetrisch() {
        let gckh = GroupCallKeyHash::new([5u8; 32]);
        let alice = ClientKey::zufaellig();
        let bob = ClientKey::zufaellig();

        let box_a = alice.handshake_auth_box(bob.public(), &gckh).unwrap();
        let box_b = bob.handshake_auth_box(alice.public(), &gckh).unwrap();

        let chiffrat = box_a.verschluesseln(b"auth").unwrap();
        assert_eq!(box_b.entschluesseln(&chiffrat).unwrap(), b"auth");
    }

    #[test]
    fn hkdf_derive_laenge() {
        let okm = hkdf_derive(b"ikm", b"salt", b"info", 42).unwrap();
        assert_eq!(okm.len(), 42);
    }
}
