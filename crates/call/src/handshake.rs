//! Handshake mit einem noch nicht authentifizierten Teilnehmer
//!
//! ```text
//!   (Remote)  AwaitNpHello --Hello--> [Hello + Auth senden] --+
//!                                                             +--> AwaitAuth --Auth--> Authentifiziert
//!   (Lokal)   [Hello senden] AwaitEpHello --Hello--> [Auth] --+
//! ```
//!
//! - Hello: mit GCHK verschluesselt, traegt Identitaet, Nickname, PCK und PCCK
//! - Auth: innen mit GCNHAK, aussen mit der PCK-Box (Nonce = Cookie + Sequenz)
//!   verschluesselt; wiederholt PCK und PCCK des Gegenuebers und enthaelt die
//!   aktuellen Medienschluessel des Absenders
//!
//! Jeder Fehler ist endgueltig: der Teilnehmer wird entfernt, es gibt keinen
//! zweiten Versuch.

use huddle_core::{IdentityString, Nickname, ParticipantId};
use huddle_crypto::{
    GroupCallHandshakeBox, GroupCallKeyHash, HandshakeAuthBox, LocalCallKey, LocalCookie,
    LocalMediaKey, ParticipantCallBox, RawMediaKeyState, RemoteCallKey, RemoteCookie,
    SequenceNumber, SharedMediaKey,
};
use huddle_protocol::{AuthMessage, HelloMessage, MediaKeyMessage};
use tracing::debug;

use crate::backend::{ContactRef, GroupMembership, HandshakeKeyDerivation};
use crate::delayed::Delayed;
use crate::error::{ParticipantError, ParticipantResult};

/// Alles, was der Handshake vom lokalen Teilnehmer braucht
pub struct HandshakeContext<'a> {
    pub local: ParticipantId,
    pub identity: &'a IdentityString,
    pub nickname: &'a Nickname,
    pub pck: &'a LocalCallKey,
    pub gckh: &'a GroupCallKeyHash,
    pub handshake_box: &'a GroupCallHandshakeBox,
    pub membership: &'a dyn GroupMembership,
    pub key_derivation: &'a dyn HandshakeKeyDerivation,
    pub media_keys: &'a LocalMediaKey,
}

/// Wer den Handshake beginnt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeInitiator {
    /// Wir sind neu im Call und senden zuerst
    Local,
    /// Der Teilnehmer ist neu und sendet zuerst
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    AwaitNpHello,
    AwaitEpHello,
    AwaitAuth,
}

struct HandshakeCrypto {
    auth_box: HandshakeAuthBox,
    pck_box: ParticipantCallBox,
    remote_pck: RemoteCallKey,
    remote_cookie: RemoteCookie,
    local_sn: SequenceNumber,
    remote_sn: SequenceNumber,
}

impl std::fmt::Debug for HandshakeCrypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeCrypto")
            .field("local_sn", &self.local_sn)
            .field("remote_sn", &self.remote_sn)
            .finish_non_exhaustive()
    }
}

/// Ergebnis eines erfolgreichen Handshakes
#[derive(Debug)]
pub struct AuthenticatedInit {
    pub identity: IdentityString,
    pub nickname: Nickname,
    pub pck_box: ParticipantCallBox,
    pub local_cookie: LocalCookie,
    pub remote_cookie: RemoteCookie,
    pub local_sn: SequenceNumber,
    pub remote_sn: SequenceNumber,
    pub remote_media_keys: Vec<RawMediaKeyState>,
    /// Waehrend des Handshakes gestartete Epoch-Wechsel
    pub queued_media_keys: Vec<SharedMediaKey>,
}

#[derive(Debug)]
pub enum HandshakeOutcome {
    /// Handshake laeuft weiter, die Nutzdaten muessen weitergeleitet werden
    Pending { outbound: Vec<Vec<u8>> },
    /// Hello eines (noch) unbekannten Gruppenmitglieds, wird spaeter erneut versucht
    Backlogged,
    Authenticated(Box<AuthenticatedInit>),
}

fn intern(e: impl std::fmt::Display) -> ParticipantError {
    ParticipantError::Unerwartet(e.to_string())
}

/// Teilnehmer im Handshake
#[derive(Debug)]
pub struct UnauthenticatedParticipant {
    id: ParticipantId,
    state: HandshakeState,
    local_cookie: LocalCookie,
    queued: Vec<SharedMediaKey>,
    contact: Delayed<ContactRef>,
    identity: Delayed<IdentityString>,
    nickname: Delayed<Nickname>,
    crypto: Delayed<HandshakeCrypto>,
    backlog: Option<Vec<u8>>,
}

impl UnauthenticatedParticipant {
    /// Beginnt den Handshake. Bei lokalem Start wird sofort ein Hello erzeugt.
    pub fn new(
        id: ParticipantId,
        initiator: HandshakeInitiator,
        ctx: &HandshakeContext<'_>,
    ) -> ParticipantResult<(Self, Vec<Vec<u8>>)> {
        let state = match initiator {
            HandshakeInitiator::Local => HandshakeState::AwaitEpHello,
            HandshakeInitiator::Remote => HandshakeState::AwaitNpHello,
        };
        let teilnehmer = Self {
            id,
            state,
            local_cookie: LocalCookie::zufaellig(),
            queued: Vec::new(),
            contact: Delayed::new("contact"),
            identity: Delayed::new("identity"),
            nickname: Delayed::new("nickname"),
            crypto: Delayed::new("handshake-crypto"),
            backlog: None,
        };
        let outbound = match initiator {
            HandshakeInitiator::Local => vec![teilnehmer.hello(ctx)?],
            HandshakeInitiator::Remote => Vec::new(),
        };
        debug!(participant = %id, ?state, "Handshake begonnen");
        Ok((teilnehmer, outbound))
    }

    pub fn id(&self) -> ParticipantId {
        self.id
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Identitaet aus dem Hello, sofern bereits empfangen
    pub fn identity(&self) -> Option<&IdentityString> {
        self.identity.get().ok()
    }

    pub fn hat_backlog(&self) -> bool {
        self.backlog.is_some()
    }

    /// Merkt einen neuen Medienschluessel fuer die Zeit nach dem Handshake vor
    pub fn queue_media_key(&mut self, key: SharedMediaKey) {
        self.queued.push(key);
    }

    /// Verarbeitet eine weitergeleitete P2P-Nachricht
    pub fn handle_p2p(
        &mut self,
        ctx: &HandshakeContext<'_>,
        data: &[u8],
    ) -> ParticipantResult<HandshakeOutcome> {
        match self.state {
            HandshakeState::AwaitNpHello | HandshakeState::AwaitEpHello => {
                self.handle_hello(ctx, data)
            }
            HandshakeState::AwaitAuth => self.handle_auth(ctx, data),
        }
    }

    /// Versucht ein zurueckgestelltes Hello erneut (nach Aenderung der Gruppe)
    pub fn retry_backlog(
        &mut self,
        ctx: &HandshakeContext<'_>,
    ) -> Option<ParticipantResult<HandshakeOutcome>> {
        let data = self.backlog.take()?;
        Some(self.handle_p2p(ctx, &data))
    }

    fn hello(&self, ctx: &HandshakeContext<'_>) -> ParticipantResult<Vec<u8>> {
        let hello = HelloMessage::Hello {
            identity: ctx.identity.clone(),
            nickname: ctx.nickname.clone(),
            pck: *ctx.pck.public(),
            pcck: *self.local_cookie.as_bytes(),
        };
        let bytes = hello.kodieren().map_err(intern)?;
        ctx.handshake_box.verschluesseln(&bytes).map_err(intern)
    }

    fn auth(&mut self, ctx: &HandshakeContext<'_>) -> ParticipantResult<Vec<u8>> {
        let crypto = self.crypto.get_mut()?;
        let auth = AuthMessage::Auth {
            pck: *crypto.remote_pck.as_bytes(),
            pcck: *crypto.remote_cookie.as_bytes(),
            media_keys: ctx.media_keys.all().iter().map(MediaKeyMessage::from).collect(),
        };
        let inner = crypto
            .auth_box
            .verschluesseln(&auth.kodieren().map_err(intern)?)
            .map_err(intern)?;
        crypto
            .pck_box
            .verschluesseln(&self.local_cookie, &mut crypto.local_sn, &inner)
            .map_err(intern)
    }

    fn handle_hello(
        &mut self,
        ctx: &HandshakeContext<'_>,
        data: &[u8],
    ) -> ParticipantResult<HandshakeOutcome> {
        let plaintext = ctx.handshake_box.entschluesseln(data)?;
        let HelloMessage::Hello {
            identity,
            nickname,
            pck,
            pcck,
        } = HelloMessage::dekodieren(&plaintext)?
        else {
            return Err(ParticipantError::protokoll(
                "Gast-Hello im Gruppencall nicht erlaubt",
            ));
        };

        let remote_pck = RemoteCallKey::new(pck);
        let remote_cookie = RemoteCookie::new(pcck);
        if ctx.pck.gleicht(&remote_pck) || remote_cookie.gleicht(&self.local_cookie) {
            return Err(ParticipantError::protokoll(
                "Reflektiertes Hello: PCK oder PCCK gleicht dem eigenen",
            ));
        }

        let Some(member) = ctx.membership.lookup(&identity) else {
            debug!(
                participant = %self.id,
                identity = %identity,
                "Hello von Nicht-Mitglied zurueckgestellt"
            );
            self.backlog = Some(data.to_vec());
            return Ok(HandshakeOutcome::Backlogged);
        };

        let auth_box = ctx
            .key_derivation
            .handshake_auth_box(&member.public_key, ctx.gckh)?;
        let pck_box = ParticipantCallBox::neu(ctx.pck, &remote_pck)?;

        self.contact.set(member.contact)?;
        self.identity.set(identity)?;
        self.nickname.set(nickname)?;
        self.crypto.set(HandshakeCrypto {
            auth_box,
            pck_box,
            remote_pck,
            remote_cookie,
            local_sn: SequenceNumber::new(),
            remote_sn: SequenceNumber::new(),
        })?;

        let mut outbound = Vec::with_capacity(2);
        if self.state == HandshakeState::AwaitNpHello {
            outbound.push(self.hello(ctx)?);
        }
        outbound.push(self.auth(ctx)?);
        self.state = HandshakeState::AwaitAuth;
        debug!(participant = %self.id, "Hello verarbeitet, warte auf Auth");
        Ok(HandshakeOutcome::Pending { outbound })
    }

    fn handle_auth(
        &mut self,
        ctx: &HandshakeContext<'_>,
        data: &[u8],
    ) -> ParticipantResult<HandshakeOutcome> {
        let crypto = self.crypto.get_mut()?;
        let inner = crypto
            .pck_box
            .entschluesseln(&crypto.remote_cookie, &mut crypto.remote_sn, data)?;
        let plaintext = crypto.auth_box.entschluesseln(&inner)?;
        let AuthMessage::Auth {
            pck,
            pcck,
            media_keys,
        } = AuthMessage::dekodieren(&plaintext)?
        else {
            return Err(ParticipantError::protokoll(
                "Gast-Auth im Gruppencall nicht erlaubt",
            ));
        };

        if pck != *ctx.pck.public() {
            return Err(ParticipantError::protokoll("Auth wiederholt einen fremden PCK"));
        }
        if pcck != *self.local_cookie.as_bytes() {
            return Err(ParticipantError::protokoll("Auth wiederholt einen fremden PCCK"));
        }
        if media_keys.is_empty() {
            return Err(ParticipantError::protokoll("Auth ohne Medienschluessel"));
        }

        let crypto = self.crypto.take()?;
        let contact = self.contact.take()?;
        debug!(participant = %self.id, contact = ?contact, "Handshake abgeschlossen");
        Ok(HandshakeOutcome::Authenticated(Box::new(AuthenticatedInit {
            identity: self.identity.take()?,
            nickname: self.nickname.take()?,
            pck_box: crypto.pck_box,
            local_cookie: self.local_cookie.clone(),
            remote_cookie: crypto.remote_cookie,
            local_sn: crypto.local_sn,
            remote_sn: crypto.remote_sn,
            remote_media_keys: media_keys.iter().map(RawMediaKeyState::from).collect(),
            queued_media_keys: std::mem::take(&mut self.queued),
        })))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
