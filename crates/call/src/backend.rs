//! Schnittstellen zu den Kollaborateuren des Call-Orchestrators
//!
//! - [`TransportContext`]: WebRTC-Verbindung zum SFU (Descriptions, P2S-Versand)
//! - [`MediaCryptoBackend`]: Frame-Verschluesselung (lokaler und entfernte PCMKs)
//! - [`GroupMembership`]: Mitglieder der Gruppe und deren Identitaetsschluessel
//! - [`HandshakeKeyDerivation`]: paarweiser Handshake-Auth-Schluessel (GCNHAK)

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;

use huddle_core::{IdentityString, Nickname, ParticipantId};
use huddle_crypto::{
    ClientKey, CryptoResult, GroupCallId, GroupCallKeyDerivations, GroupCallKeyHash,
    HandshakeAuthBox, IdentityPublicKey, RawMediaKeyState,
};
use huddle_observability::CallMetrics;
use huddle_webrtc::{IceCandidate, SdpStatic, SessionDescription};

/// Parameter fuer den Verbindungsaufbau zum SFU
#[derive(Debug)]
pub struct ConnectRequest {
    pub call_id: GroupCallId,
    pub local: ParticipantId,
    pub gckh: GroupCallKeyHash,
    pub description: SessionDescription,
    pub candidates: Vec<IceCandidate>,
    pub initial_pcmk: RawMediaKeyState,
}

/// Aenderung der Teilnehmerliste fuer die WebRTC-Verbindung
#[derive(Debug, Clone)]
pub struct DescriptionUpdate {
    pub description: SessionDescription,
    pub m_line_order: Vec<ParticipantId>,
    pub added: Vec<ParticipantId>,
    pub removed: Vec<ParticipantId>,
}

/// WebRTC-Verbindung zum SFU
#[async_trait]
pub trait TransportContext: Send + Sync {
    /// Baut die Verbindung auf und liefert die Teilnehmer-IDs aus dem SFU-Hello
    async fn connect(&self, request: ConnectRequest) -> anyhow::Result<Vec<ParticipantId>>;

    /// Wendet eine neue Remote-Description an (wartet auf die Bestaetigung)
    async fn update(&self, update: DescriptionUpdate) -> anyhow::Result<()>;

    async fn restart_ice(&self, description: SessionDescription) -> anyhow::Result<()>;

    /// Sendet kodierte `ParticipantToSfu`-Envelopes ueber den Datenkanal
    fn send_p2s(&self, envelopes: Vec<Vec<u8>>) -> anyhow::Result<()>;
}

/// Frame-Verschluesselung der Medienstroeme
#[async_trait]
pub trait MediaCryptoBackend: Send + Sync {
    async fn set_local_pcmk(&self, state: RawMediaKeyState) -> anyhow::Result<()>;

    async fn add_remote_pcmks(
        &self,
        participant: ParticipantId,
        states: Vec<RawMediaKeyState>,
    ) -> anyhow::Result<()>;

    async fn remove_remote(&self, participant: ParticipantId) -> anyhow::Result<()>;
}

/// Kontakt hinter einem Gruppenmitglied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactRef {
    /// Dieselbe Identitaet wie wir (z.B. ein zweites Geraet)
    Me,
    Contact(IdentityString),
}

/// Ein Mitglied der Gruppe
#[derive(Debug, Clone)]
pub struct GroupMember {
    pub contact: ContactRef,
    pub public_key: IdentityPublicKey,
}

/// Aktuelle Mitglieder der Gruppe
pub trait GroupMembership: Send + Sync {
    /// `None` wenn die Identitaet (noch) kein Mitglied ist
    fn lookup(&self, identity: &IdentityString) -> Option<GroupMember>;
}

/// Ableitung des paarweisen Handshake-Auth-Schluessels
pub trait HandshakeKeyDerivation: Send + Sync {
    fn handshake_auth_box(
        &self,
        peer: &IdentityPublicKey,
        gckh: &GroupCallKeyHash,
    ) -> CryptoResult<HandshakeAuthBox>;
}

impl HandshakeKeyDerivation for ClientKey {
    fn handshake_auth_box(
        &self,
        peer: &IdentityPublicKey,
        gckh: &GroupCallKeyHash,
    ) -> CryptoResult<HandshakeAuthBox> {
        ClientKey::handshake_auth_box(self, peer, gckh)
    }
}

/// Alle Kollaborateure eines Calls
#[derive(Clone)]
pub struct CallServices {
    pub transport: Arc<dyn TransportContext>,
    pub media_crypto: Arc<dyn MediaCryptoBackend>,
    pub membership: Arc<dyn GroupMembership>,
    pub key_derivation: Arc<dyn HandshakeKeyDerivation>,
    pub metrics: CallMetrics,
}

/// Antwort des SFU auf die Join-Anfrage
#[derive(Debug, Clone)]
pub struct JoinResponse {
    pub participant_id: ParticipantId,
    /// Adressen des SFU fuer ICE-Host-Kandidaten
    pub addresses: Vec<SocketAddr>,
    pub sdp_static: SdpStatic,
}

/// Parameter eines Calls aus Sicht des lokalen Teilnehmers
#[derive(Debug)]
pub struct CallParams {
    pub identity: IdentityString,
    pub nickname: Nickname,
    pub derivations: GroupCallKeyDerivations,
    pub join: JoinResponse,
}
