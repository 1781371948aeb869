//! Authentifizierter Teilnehmer
//!
//! Nach dem Handshake laufen alle P2P-Nachrichten durch die PCK-Box mit
//! getrennten Sequenznummern pro Richtung.

use huddle_core::{IdentityString, Nickname, ParticipantId};
use huddle_crypto::{
    LocalCookie, ParticipantCallBox, RawMediaKeyState, RemoteCookie, RemoteMediaKey,
    SequenceNumber,
};
use huddle_protocol::{
    CaptureDevice, CaptureStateMessage, MediaKeyMessage, P2pMessage, P2sMessage, Resolution,
};
use tracing::{debug, warn};

use crate::error::{ParticipantError, ParticipantResult};
use crate::handshake::AuthenticatedInit;
use crate::state::{CaptureState, ParticipantView};

/// Vom Teilnehmer empfangene Aenderung, die der Call weiterverarbeitet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteUpdate {
    MediaKey(RawMediaKeyState),
    CaptureState(CaptureStateMessage),
}

/// Ergebnis von [`AuthenticatedParticipant::new`]
#[derive(Debug)]
pub struct Authentication {
    pub participant: AuthenticatedParticipant,
    /// Medienschluessel des Teilnehmers fuer die Entschluesselung
    pub remote_media_keys: Vec<RawMediaKeyState>,
    /// Vorgemerkte Schluessel und eigener Aufnahmezustand
    pub outbound: Vec<Vec<u8>>,
}

#[derive(Debug)]
pub struct AuthenticatedParticipant {
    id: ParticipantId,
    identity: IdentityString,
    nickname: Nickname,
    pck_box: ParticipantCallBox,
    local_cookie: LocalCookie,
    remote_cookie: RemoteCookie,
    local_sn: SequenceNumber,
    remote_sn: SequenceNumber,
    remote_key: RemoteMediaKey,
    remote_capture: CaptureState,
    microphone_subscribed: bool,
    camera_subscribed: Option<Resolution>,
}

impl AuthenticatedParticipant {
    pub fn new(
        id: ParticipantId,
        init: AuthenticatedInit,
        local_capture: CaptureState,
    ) -> ParticipantResult<Authentication> {
        let AuthenticatedInit {
            identity,
            nickname,
            pck_box,
            local_cookie,
            remote_cookie,
            local_sn,
            remote_sn,
            remote_media_keys,
            queued_media_keys,
        } = init;

        let mut sortiert = remote_media_keys.clone();
        sortiert.sort_by_key(|state| (state.epoch, state.ratchet_counter));
        let Some((erster, weitere)) = sortiert.split_first() else {
            return Err(ParticipantError::protokoll("Keine Medienschluessel erhalten"));
        };
        let mut remote_key = RemoteMediaKey::new(erster.clone());
        for state in weitere {
            remote_key.update(state.clone());
        }

        let mut teilnehmer = Self {
            id,
            identity,
            nickname,
            pck_box,
            local_cookie,
            remote_cookie,
            local_sn,
            remote_sn,
            remote_key,
            remote_capture: CaptureState::default(),
            microphone_subscribed: false,
            camera_subscribed: None,
        };

        // Abgeloeste Schluessel werden nicht mehr verteilt
        let mut outbound = Vec::new();
        for key in queued_media_keys {
            if let Some(state) = key.snapshot() {
                outbound.push(teilnehmer.rekey_frame(&state)?);
            }
        }
        for device in [CaptureDevice::Microphone, CaptureDevice::Camera] {
            outbound.push(teilnehmer.capture_frame(device, local_capture.get(device))?);
        }

        Ok(Authentication {
            participant: teilnehmer,
            remote_media_keys,
            outbound,
        })
    }

    pub fn id(&self) -> ParticipantId {
        self.id
    }

    pub fn identity(&self) -> &IdentityString {
        &self.identity
    }

    pub fn nickname(&self) -> &Nickname {
        &self.nickname
    }

    pub fn remote_media_key(&self) -> &RawMediaKeyState {
        self.remote_key.latest()
    }

    pub fn view(&self) -> ParticipantView {
        ParticipantView::Authenticated {
            identity: self.identity.clone(),
            nickname: self.nickname.clone(),
            capture: self.remote_capture,
        }
    }

    /// Verschluesselt eine P2P-Nachricht fuer diesen Teilnehmer
    pub fn frame(&mut self, nachricht: &P2pMessage) -> ParticipantResult<Vec<u8>> {
        let bytes = nachricht
            .kodieren()
            .map_err(|e| ParticipantError::Unerwartet(e.to_string()))?;
        self.pck_box
            .verschluesseln(&self.local_cookie, &mut self.local_sn, &bytes)
            .map_err(|e| ParticipantError::Unerwartet(e.to_string()))
    }

    pub fn rekey_frame(&mut self, state: &RawMediaKeyState) -> ParticipantResult<Vec<u8>> {
        self.frame(&P2pMessage::Rekey(MediaKeyMessage::from(state)))
    }

    pub fn capture_frame(&mut self, device: CaptureDevice, on: bool) -> ParticipantResult<Vec<u8>> {
        self.frame(&P2pMessage::CaptureState(CaptureStateMessage { device, on }))
    }

    /// Verarbeitet eine weitergeleitete P2P-Nachricht
    pub fn handle_p2p(&mut self, data: &[u8]) -> ParticipantResult<Option<RemoteUpdate>> {
        let plaintext = self
            .pck_box
            .entschluesseln(&self.remote_cookie, &mut self.remote_sn, data)?;

        match P2pMessage::dekodieren(&plaintext)? {
            P2pMessage::Rekey(key) => {
                let state = RawMediaKeyState::from(&key);
                if !self.remote_key.update(state.clone()) {
                    debug!(
                        participant = %self.id,
                        epoch = state.epoch,
                        ratchet_counter = state.ratchet_counter,
                        "Veralteter Medienschluessel verworfen"
                    );
                    return Ok(None);
                }
                debug!(participant = %self.id, epoch = state.epoch, "Neuer Medienschluessel");
                Ok(Some(RemoteUpdate::MediaKey(state)))
            }
            P2pMessage::CaptureState(nachricht) => {
                self.remote_capture.set(nachricht.device, nachricht.on);
                Ok(Some(RemoteUpdate::CaptureState(nachricht)))
            }
            P2pMessage::HoldState => {
                warn!(participant = %self.id, "Hold-State im Gruppencall wird ignoriert");
                Ok(None)
            }
            P2pMessage::EncryptedAdminEnvelope => {
                warn!(participant = %self.id, "Admin-Envelope im Gruppencall wird ignoriert");
                Ok(None)
            }
            P2pMessage::Unbekannt => {
                warn!(participant = %self.id, "Unbekannte P2P-Nachricht verworfen");
                Ok(None)
            }
        }
    }

    /// Mikrofon abonnieren oder abbestellen. `None` wenn bereits so abonniert.
    pub fn microphone_request(&mut self, subscribe: bool) -> Option<P2sMessage> {
        if self.microphone_subscribed == subscribe {
            return None;
        }
        self.microphone_subscribed = subscribe;
        Some(P2sMessage::Microphone {
            participant: self.id,
            subscribe,
        })
    }

    /// Kamera mit Aufloesung abonnieren (`None` bestellt ab)
    pub fn camera_request(&mut self, subscribe: Option<Resolution>) -> Option<P2sMessage> {
        if self.camera_subscribed == subscribe {
            return None;
        }
        self.camera_subscribed = subscribe;
        Some(P2sMessage::Camera {
            participant: self.id,
            subscribe,
        })
    }
}

#[cfg(test)]
mod tests {
    use huddle_crypto::{LocalCallKey, LocalMediaKey, RemoteCallKey, SecretKey, SharedMediaKey};

    use super::*;
    use crate::handshake::tests::pid;

    struct Gegenseite {
        pck_box: ParticipantCallBox,
        cookie: LocalCookie,
        sn: SequenceNumber,
        empfang_sn: SequenceNumber,
        remote_cookie: RemoteCookie,
    }

    /// Erzeugt einen authentifizierten Teilnehmer und die passende Gegenseite
    fn paar(queued: Vec<SharedMediaKey>, capture: CaptureState) -> (Authentication, Gegenseite) {
        let lokal = LocalCallKey::zufaellig();
        let remote = LocalCallKey::zufaellig();
        let lokal_cookie = LocalCookie::zufaellig();
        let remote_cookie = LocalCookie::zufaellig();

        let init = AuthenticatedInit {
            identity: IdentityString::new("BBBBBBBB").unwrap(),
            nickname: Nickname("bea".into()),
            pck_box: ParticipantCallBox::neu(&lokal, &RemoteCallKey::new(*remote.public()))
                .unwrap(),
            local_cookie: lokal_cookie.clone(),
            remote_cookie: RemoteCookie::new(*remote_cookie.as_bytes()),
            local_sn: SequenceNumber::new(),
            remote_sn: SequenceNumber::new(),
            remote_media_keys: vec![RawMediaKeyState {
                epoch: 3,
                ratchet_counter: 2,
                pcmk: SecretKey::zufaellig(),
            }],
            queued_media_keys: queued,
        };
        let authentication = AuthenticatedParticipant::new(pid(4), init, capture).unwrap();
        let gegenseite = Gegenseite {
            pck_box: ParticipantCallBox::neu(&remote, &RemoteCallKey::new(*lokal.public()))
                .unwrap(),
            cookie: remote_cookie,
            sn: SequenceNumber::new(),
            empfang_sn: SequenceNumber::new(),
            remote_cookie: RemoteCookie::new(*lokal_cookie.as_bytes()),
        };
        (authentication, gegenseite)
    }

    impl Gegenseite {
        fn senden(&mut self, nachricht: &P2pMessage) -> Vec<u8> {
            self.pck_box
                .verschluesseln(&self.cookie, &mut self.sn, &nachricht.kodieren().unwrap())
                .unwrap()
        }

        fn empfangen(&mut self, frame: &[u8]) -> P2pMessage {
            let bytes = self
                .pck_box
                .entschluesseln(&self.remote_cookie, &mut self.empfang_sn, frame)
                .unwrap();
            P2pMessage::dekodieren(&bytes).unwrap()
        }
    }

    #[test]
    fn vorgemerkte_schluessel_und_aufnahmezustand_werden_gesendet() {
        let capture = CaptureState {
            microphone: true,
            camera: false,
        };
        let queued = LocalMediaKey::neu();
        let erwartet = queued.current();
        let (authentication, mut gegenseite) = paar(vec![queued.current_shared()], capture);

        assert_eq!(authentication.outbound.len(), 3);
        let nachrichten: Vec<_> = authentication
            .outbound
            .iter()
            .map(|frame| gegenseite.empfangen(frame))
            .collect();
        assert_eq!(
            nachrichten,
            vec![
                P2pMessage::Rekey(MediaKeyMessage::from(&erwartet)),
                P2pMessage::CaptureState(CaptureStateMessage {
                    device: CaptureDevice::Microphone,
                    on: true
                }),
                P2pMessage::CaptureState(CaptureStateMessage {
                    device: CaptureDevice::Camera,
                    on: false
                }),
            ]
        );
    }

    #[test]
    fn abgeloester_schluessel_wird_nicht_gesendet() {
        let mut queued = LocalMediaKey::neu();
        let alt = queued.current_shared();
        queued.next_epoch().unwrap();
        queued.apply_pending().unwrap();
        assert!(alt.ist_purged());

        let (authentication, _) = paar(vec![alt, queued.current_shared()], CaptureState::default());
        // Epoch 1 plus zwei Capture-Frames, Epoch 0 entfaellt
        assert_eq!(authentication.outbound.len(), 3);
    }

    #[test]
    fn nur_nachfolgende_schluessel_werden_uebernommen() {
        let (authentication, mut gegenseite) = paar(Vec::new(), CaptureState::default());
        let mut teilnehmer = authentication.participant;

        let alt = MediaKeyMessage {
            epoch: 3,
            ratchet_counter: 1,
            pcmk: [1u8; 32],
        };
        let frame = gegenseite.senden(&P2pMessage::Rekey(alt));
        assert_eq!(teilnehmer.handle_p2p(&frame).unwrap(), None);

        let neu = MediaKeyMessage {
            epoch: 4,
            ratchet_counter: 0,
            pcmk: [2u8; 32],
        };
        let frame = gegenseite.senden(&P2pMessage::Rekey(neu.clone()));
        assert_eq!(
            teilnehmer.handle_p2p(&frame).unwrap(),
            Some(RemoteUpdate::MediaKey(RawMediaKeyState::from(&neu)))
        );
        assert_eq!(teilnehmer.remote_media_key().epoch, 4);
    }

    #[test]
    fn hold_state_wird_ignoriert() {
        let (authentication, mut gegenseite) = paar(Vec::new(), CaptureState::default());
        let mut teilnehmer = authentication.participant;

        use huddle_protocol::p2p::{envelope, Envelope, HoldState};
        use prost::Message;
        let bytes = Envelope {
            padding: vec![],
            content: Some(envelope::Content::HoldState(HoldState::default())),
        }
        .encode_to_vec();
        let frame = gegenseite
            .pck_box
            .verschluesseln(&gegenseite.cookie, &mut gegenseite.sn, &bytes)
            .unwrap();
        assert_eq!(teilnehmer.handle_p2p(&frame).unwrap(), None);

        // Sequenznummer wurde trotzdem verbraucht
        let frame = gegenseite.senden(&P2pMessage::CaptureState(CaptureStateMessage {
            device: CaptureDevice::Camera,
            on: true,
        }));
        assert!(teilnehmer.handle_p2p(&frame).unwrap().is_some());
        assert!(matches!(
            teilnehmer.view(),
            ParticipantView::Authenticated { capture: CaptureState { camera: true, .. }, .. }
        ));
    }

    #[test]
    fn wiederholter_frame_ist_protokollfehler() {
        let (authentication, mut gegenseite) = paar(Vec::new(), CaptureState::default());
        let mut teilnehmer = authentication.participant;
        let frame = gegenseite.senden(&P2pMessage::CaptureState(CaptureStateMessage {
            device: CaptureDevice::Microphone,
            on: false,
        }));
        teilnehmer.handle_p2p(&frame).unwrap();
        assert!(matches!(
            teilnehmer.handle_p2p(&frame),
            Err(ParticipantError::Protokoll(_))
        ));
    }

    #[test]
    fn abonnements_sind_idempotent() {
        let (authentication, _) = paar(Vec::new(), CaptureState::default());
        let mut teilnehmer = authentication.participant;

        assert!(teilnehmer.microphone_request(true).is_some());
        assert!(teilnehmer.microphone_request(true).is_none());
        assert!(teilnehmer.microphone_request(false).is_some());

        let hd = Resolution {
            width: 1280,
            height: 720,
        };
        assert!(teilnehmer.camera_request(None).is_none());
        assert_eq!(
            teilnehmer.camera_request(Some(hd)),
            Some(P2sMessage::Camera {
                participant: pid(4),
                subscribe: Some(hd)
            })
        );
        assert!(teilnehmer.camera_request(Some(hd)).is_none());
    }
}
