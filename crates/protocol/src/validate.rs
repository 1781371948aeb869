//! Validierung dekodierter Protobuf-Nachrichten in Domain-Typen
//!
//! Die Protobuf-Strukturen sind bewusst lose (leere Felder, unbekannte
//! Varianten). Alles was das Call-Protokoll verarbeitet, laeuft vorher durch
//! diese Typen: Laengen von Schluesseln und Cookies, Wertebereiche von IDs und
//! Ratchet-Zaehlern werden hier geprueft.

use std::collections::BTreeMap;

use huddle_core::{IdentityString, Nickname, ParticipantId};
use prost::Message;

use crate::error::{ProtocolError, ProtocolResult};
use crate::p2p::{self, auth_envelope, camera, capture_state, envelope, hello_envelope, microphone};
use crate::p2s::{
    self, call_state_participant, participant_camera, participant_microphone, participant_to_sfu,
    sfu_to_participant,
};
use crate::padding::zufalls_padding;

/// Laenge eines X25519 Public Keys
pub const PUBLIC_KEY_LAENGE: usize = 32;

/// Laenge eines Teilnehmer-Cookies (PCCK)
pub const COOKIE_LAENGE: usize = 16;

/// Laenge eines Medienschluessels (PCMK)
pub const PCMK_LAENGE: usize = 32;

fn fixe_laenge<const N: usize>(feld: &'static str, bytes: &[u8]) -> ProtocolResult<[u8; N]> {
    bytes.try_into().map_err(|_| {
        ProtocolError::feld(feld, format!("erwartet {} Bytes, erhalten {}", N, bytes.len()))
    })
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

/// Inhalt eines entschluesselten `HelloEnvelope`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HelloMessage {
    Hello {
        identity: IdentityString,
        nickname: Nickname,
        pck: [u8; PUBLIC_KEY_LAENGE],
        pcck: [u8; COOKIE_LAENGE],
    },
    GuestHello,
}

impl HelloMessage {
    pub fn dekodieren(bytes: &[u8]) -> ProtocolResult<Self> {
        let envelope = p2p::HelloEnvelope::decode(bytes)?;
        match envelope.content {
            Some(hello_envelope::Content::Hello(hello)) => Ok(Self::Hello {
                identity: IdentityString::new(hello.identity)?,
                nickname: Nickname(hello.nickname),
                pck: fixe_laenge("hello.pck", &hello.pck)?,
                pcck: fixe_laenge("hello.pcck", &hello.pcck)?,
            }),
            Some(hello_envelope::Content::GuestHello(_)) => Ok(Self::GuestHello),
            None => Err(ProtocolError::OhneInhalt("HelloEnvelope")),
        }
    }

    /// Kodiert die Nachricht inkl. Zufalls-Padding. Gast-Hellos werden nie gesendet.
    pub fn kodieren(&self) -> ProtocolResult<Vec<u8>> {
        let Self::Hello {
            identity,
            nickname,
            pck,
            pcck,
        } = self
        else {
            return Err(ProtocolError::feld("hello", "Gast-Hello wird nicht unterstuetzt"));
        };
        let envelope = p2p::HelloEnvelope {
            padding: zufalls_padding(),
            content: Some(hello_envelope::Content::Hello(p2p::Hello {
                identity: identity.as_str().to_string(),
                nickname: nickname.0.clone(),
                pck: pck.to_vec(),
                pcck: pcck.to_vec(),
            })),
        };
        Ok(envelope.encode_to_vec())
    }
}

/// Ein uebertragener Medienschluessel
#[derive(Clone, PartialEq, Eq)]
pub struct MediaKeyMessage {
    pub epoch: u32,
    pub ratchet_counter: u8,
    pub pcmk: [u8; PCMK_LAENGE],
}

impl std::fmt::Debug for MediaKeyMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaKeyMessage")
            .field("epoch", &self.epoch)
            .field("ratchet_counter", &self.ratchet_counter)
            .field("pcmk", &"[REDACTED]")
            .finish()
    }
}

impl TryFrom<p2p::MediaKey> for MediaKeyMessage {
    type Error = ProtocolError;

    fn try_from(key: p2p::MediaKey) -> ProtocolResult<Self> {
        let ratchet_counter = u8::try_from(key.ratchet_counter).map_err(|_| {
            ProtocolError::feld("media_key.ratchet_counter", key.ratchet_counter.to_string())
        })?;
        Ok(Self {
            epoch: key.epoch,
            ratchet_counter,
            pcmk: fixe_laenge("media_key.pcmk", &key.pcmk)?,
        })
    }
}

impl From<&MediaKeyMessage> for p2p::MediaKey {
    fn from(key: &MediaKeyMessage) -> Self {
        Self {
            epoch: key.epoch,
            ratchet_counter: u32::from(key.ratchet_counter),
            pcmk: key.pcmk.to_vec(),
        }
    }
}

/// Inhalt eines entschluesselten `AuthEnvelope`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMessage {
    Auth {
        pck: [u8; PUBLIC_KEY_LAENGE],
        pcck: [u8; COOKIE_LAENGE],
        media_keys: Vec<MediaKeyMessage>,
    },
    GuestAuth,
}

impl AuthMessage {
    pub fn dekodieren(bytes: &[u8]) -> ProtocolResult<Self> {
        let envelope = p2p::AuthEnvelope::decode(bytes)?;
        match envelope.content {
            Some(auth_envelope::Content::Auth(auth)) => Ok(Self::Auth {
                pck: fixe_laenge("auth.pck", &auth.pck)?,
                pcck: fixe_laenge("auth.pcck", &auth.pcck)?,
                media_keys: auth
                    .media_keys
                    .into_iter()
                    .map(MediaKeyMessage::try_from)
                    .collect::<ProtocolResult<_>>()?,
            }),
            Some(auth_envelope::Content::GuestAuth(_)) => Ok(Self::GuestAuth),
            None => Err(ProtocolError::OhneInhalt("AuthEnvelope")),
        }
    }

    pub fn kodieren(&self) -> ProtocolResult<Vec<u8>> {
        let Self::Auth {
            pck,
            pcck,
            media_keys,
        } = self
        else {
            return Err(ProtocolError::feld("auth", "Gast-Auth wird nicht unterstuetzt"));
        };
        let envelope = p2p::AuthEnvelope {
            padding: zufalls_padding(),
            content: Some(auth_envelope::Content::Auth(p2p::Auth {
                pck: pck.to_vec(),
                pcck: pcck.to_vec(),
                media_keys: media_keys.iter().map(p2p::MediaKey::from).collect(),
            })),
        };
        Ok(envelope.encode_to_vec())
    }
}

// ---------------------------------------------------------------------------
// Nach der Authentifizierung
// ---------------------------------------------------------------------------

/// Aufnahmegeraet, dessen Zustand angekuendigt wird
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureDevice {
    Microphone,
    Camera,
}

impl std::fmt::Display for CaptureDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Microphone => write!(f, "microphone"),
            Self::Camera => write!(f, "camera"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureStateMessage {
    pub device: CaptureDevice,
    pub on: bool,
}

/// Inhalt eines entschluesselten P2P-`Envelope`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum P2pMessage {
    Rekey(MediaKeyMessage),
    CaptureState(CaptureStateMessage),
    HoldState,
    EncryptedAdminEnvelope,
    /// Unbekannte oder leere Variante (neuere Protokollversion)
    Unbekannt,
}

impl P2pMessage {
    pub fn dekodieren(bytes: &[u8]) -> ProtocolResult<Self> {
        let envelope = p2p::Envelope::decode(bytes)?;
        let nachricht = match envelope.content {
            Some(envelope::Content::Rekey(key)) => Self::Rekey(key.try_into()?),
            Some(envelope::Content::CaptureState(state)) => match state.state {
                Some(capture_state::State::Microphone(p2p::Microphone { state: Some(s) })) => {
                    Self::CaptureState(CaptureStateMessage {
                        device: CaptureDevice::Microphone,
                        on: matches!(s, microphone::State::On(_)),
                    })
                }
                Some(capture_state::State::Camera(p2p::Camera { state: Some(s) })) => {
                    Self::CaptureState(CaptureStateMessage {
                        device: CaptureDevice::Camera,
                        on: matches!(s, camera::State::On(_)),
                    })
                }
                _ => Self::Unbekannt,
            },
            Some(envelope::Content::HoldState(_)) => Self::HoldState,
            Some(envelope::Content::EncryptedAdminEnvelope(_)) => Self::EncryptedAdminEnvelope,
            None => Self::Unbekannt,
        };
        Ok(nachricht)
    }

    /// Kodiert Rekey- und Capture-State-Nachrichten (die einzigen, die wir senden)
    pub fn kodieren(&self) -> ProtocolResult<Vec<u8>> {
        let content = match self {
            Self::Rekey(key) => envelope::Content::Rekey(key.into()),
            Self::CaptureState(CaptureStateMessage { device, on }) => {
                let unit = p2p::Unit {};
                let state = match device {
                    CaptureDevice::Microphone => capture_state::State::Microphone(p2p::Microphone {
                        state: Some(if *on {
                            microphone::State::On(unit)
                        } else {
                            microphone::State::Off(unit)
                        }),
                    }),
                    CaptureDevice::Camera => capture_state::State::Camera(p2p::Camera {
                        state: Some(if *on {
                            camera::State::On(unit)
                        } else {
                            camera::State::Off(unit)
                        }),
                    }),
                };
                envelope::Content::CaptureState(p2p::CaptureState { state: Some(state) })
            }
            andere => {
                return Err(ProtocolError::feld(
                    "envelope",
                    format!("{andere:?} wird nicht gesendet"),
                ))
            }
        };
        Ok(p2p::Envelope {
            padding: zufalls_padding(),
            content: Some(content),
        }
        .encode_to_vec())
    }
}

// ---------------------------------------------------------------------------
// SFU -> Teilnehmer
// ---------------------------------------------------------------------------

/// Vom SFU weitergeleitete P2P-Nachricht
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayedMessage {
    pub sender: ParticipantId,
    pub receiver: ParticipantId,
    pub encrypted_data: Vec<u8>,
}

impl TryFrom<p2p::OuterEnvelope> for RelayedMessage {
    type Error = ProtocolError;

    fn try_from(outer: p2p::OuterEnvelope) -> ProtocolResult<Self> {
        Ok(Self {
            sender: ParticipantId::new(outer.sender)?,
            receiver: ParticipantId::new(outer.receiver)?,
            encrypted_data: outer.encrypted_data,
        })
    }
}

impl From<RelayedMessage> for p2p::OuterEnvelope {
    fn from(message: RelayedMessage) -> Self {
        Self {
            sender: message.sender.get(),
            receiver: message.receiver.get(),
            encrypted_data: message.encrypted_data,
        }
    }
}

/// Inhalt eines `SfuToParticipantEnvelope`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum S2pMessage {
    Relay(RelayedMessage),
    Hello(Vec<ParticipantId>),
    ParticipantJoined(ParticipantId),
    ParticipantLeft(ParticipantId),
    Unbekannt,
}

impl S2pMessage {
    pub fn dekodieren(bytes: &[u8]) -> ProtocolResult<Self> {
        let envelope = p2s::SfuToParticipantEnvelope::decode(bytes)?;
        let nachricht = match envelope.content {
            Some(sfu_to_participant::Content::Relay(outer)) => Self::Relay(outer.try_into()?),
            Some(sfu_to_participant::Content::Hello(hello)) => Self::Hello(
                hello
                    .participant_ids
                    .into_iter()
                    .map(ParticipantId::new)
                    .collect::<Result<_, _>>()?,
            ),
            Some(sfu_to_participant::Content::ParticipantJoined(joined)) => {
                Self::ParticipantJoined(ParticipantId::new(joined.participant_id)?)
            }
            Some(sfu_to_participant::Content::ParticipantLeft(left)) => {
                Self::ParticipantLeft(ParticipantId::new(left.participant_id)?)
            }
            None => Self::Unbekannt,
        };
        Ok(nachricht)
    }

    /// Kodiert die Nachricht, wie sie ein SFU senden wuerde
    pub fn kodieren(&self) -> Vec<u8> {
        let content = match self {
            Self::Relay(relay) => Some(sfu_to_participant::Content::Relay(relay.clone().into())),
            Self::Hello(ids) => Some(sfu_to_participant::Content::Hello(p2s::SfuHello {
                participant_ids: ids.iter().map(|id| id.get()).collect(),
            })),
            Self::ParticipantJoined(id) => Some(sfu_to_participant::Content::ParticipantJoined(
                p2s::ParticipantJoined {
                    participant_id: id.get(),
                },
            )),
            Self::ParticipantLeft(id) => Some(sfu_to_participant::Content::ParticipantLeft(
                p2s::ParticipantLeft {
                    participant_id: id.get(),
                },
            )),
            Self::Unbekannt => None,
        };
        p2s::SfuToParticipantEnvelope {
            padding: Vec::new(),
            content,
        }
        .encode_to_vec()
    }
}

// ---------------------------------------------------------------------------
// Teilnehmer -> SFU
// ---------------------------------------------------------------------------

/// Gewuenschte Kamera-Aufloesung beim Abonnieren
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Bildrate, die beim Abonnieren einer Kamera angefragt wird
pub const DESIRED_CAMERA_FPS: u32 = 30;

/// Inhalt eines `ParticipantToSfuEnvelope`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum P2sMessage {
    Relay(RelayedMessage),
    UpdateCallState { encrypted_call_state: Vec<u8> },
    Microphone {
        participant: ParticipantId,
        subscribe: bool,
    },
    /// `None` meldet die Kamera ab
    Camera {
        participant: ParticipantId,
        subscribe: Option<Resolution>,
    },
}

impl P2sMessage {
    /// Relay-Envelopes werden ohne Padding gesendet, alle anderen mit
    pub fn kodieren(&self) -> Vec<u8> {
        let unit = p2p::Unit {};
        let (padding, content) = match self {
            Self::Relay(relay) => (
                Vec::new(),
                participant_to_sfu::Content::Relay(relay.clone().into()),
            ),
            Self::UpdateCallState {
                encrypted_call_state,
            } => (
                zufalls_padding(),
                participant_to_sfu::Content::UpdateCallState(p2s::UpdateCallState {
                    encrypted_call_state: encrypted_call_state.clone(),
                }),
            ),
            Self::Microphone {
                participant,
                subscribe,
            } => (
                zufalls_padding(),
                participant_to_sfu::Content::RequestParticipantMicrophone(
                    p2s::ParticipantMicrophone {
                        participant_id: participant.get(),
                        action: Some(if *subscribe {
                            participant_microphone::Action::Subscribe(unit)
                        } else {
                            participant_microphone::Action::Unsubscribe(unit)
                        }),
                    },
                ),
            ),
            Self::Camera {
                participant,
                subscribe,
            } => (
                zufalls_padding(),
                participant_to_sfu::Content::RequestParticipantCamera(p2s::ParticipantCamera {
                    participant_id: participant.get(),
                    action: Some(match subscribe {
                        Some(resolution) => {
                            participant_camera::Action::Subscribe(p2s::CameraSubscribe {
                                desired_resolution: Some(p2s::Resolution {
                                    width: resolution.width,
                                    height: resolution.height,
                                }),
                                desired_fps: DESIRED_CAMERA_FPS,
                            })
                        }
                        None => participant_camera::Action::Unsubscribe(unit),
                    }),
                }),
            ),
        };
        p2s::ParticipantToSfuEnvelope {
            padding,
            content: Some(content),
        }
        .encode_to_vec()
    }

    /// Dekodiert eine Nachricht, wie sie beim SFU ankommt
    pub fn dekodieren(bytes: &[u8]) -> ProtocolResult<Self> {
        let envelope = p2s::ParticipantToSfuEnvelope::decode(bytes)?;
        match envelope.content {
            Some(participant_to_sfu::Content::Relay(outer)) => Ok(Self::Relay(outer.try_into()?)),
            Some(participant_to_sfu::Content::UpdateCallState(update)) => {
                Ok(Self::UpdateCallState {
                    encrypted_call_state: update.encrypted_call_state,
                })
            }
            Some(participant_to_sfu::Content::RequestParticipantMicrophone(mic)) => {
                Ok(Self::Microphone {
                    participant: ParticipantId::new(mic.participant_id)?,
                    subscribe: match mic.action {
                        Some(participant_microphone::Action::Subscribe(_)) => true,
                        Some(participant_microphone::Action::Unsubscribe(_)) => false,
                        None => return Err(ProtocolError::OhneInhalt("ParticipantMicrophone")),
                    },
                })
            }
            Some(participant_to_sfu::Content::RequestParticipantCamera(camera)) => {
                Ok(Self::Camera {
                    participant: ParticipantId::new(camera.participant_id)?,
                    subscribe: match camera.action {
                        Some(participant_camera::Action::Subscribe(subscribe)) => {
                            let resolution = subscribe.desired_resolution.unwrap_or_default();
                            Some(Resolution {
                                width: resolution.width,
                                height: resolution.height,
                            })
                        }
                        Some(participant_camera::Action::Unsubscribe(_)) => None,
                        None => return Err(ProtocolError::OhneInhalt("ParticipantCamera")),
                    },
                })
            }
            None => Err(ProtocolError::OhneInhalt("ParticipantToSfuEnvelope")),
        }
    }
}

// ---------------------------------------------------------------------------
// Call-Zustand
// ---------------------------------------------------------------------------

/// Entschluesselter Call-Zustand. Gaeste sind in Gruppencalls nicht erlaubt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallStateSnapshot {
    pub created_by: ParticipantId,
    pub created_at_ms: u64,
    pub participants: BTreeMap<ParticipantId, (IdentityString, Option<Nickname>)>,
}

impl CallStateSnapshot {
    pub fn dekodieren(bytes: &[u8]) -> ProtocolResult<Self> {
        let state = p2s::CallState::decode(bytes)?;
        let mut participants = BTreeMap::new();
        for (id, participant) in state.participants {
            let id = ParticipantId::new(id)?;
            match participant.kind {
                Some(call_state_participant::Kind::Normal(normal)) => {
                    let nickname = (!normal.nickname.is_empty()).then(|| Nickname(normal.nickname));
                    participants.insert(id, (IdentityString::new(normal.identity)?, nickname));
                }
                Some(call_state_participant::Kind::Guest(_)) => {
                    return Err(ProtocolError::feld(
                        "call_state.participants",
                        "Gaeste sind im Gruppencall nicht erlaubt",
                    ))
                }
                None => return Err(ProtocolError::OhneInhalt("CallState.Participant")),
            }
        }
        Ok(Self {
            created_by: ParticipantId::new(state.state_created_by)?,
            created_at_ms: state.state_created_at,
            participants,
        })
    }

    pub fn kodieren(&self) -> Vec<u8> {
        let participants = self
            .participants
            .iter()
            .map(|(id, (identity, nickname))| {
                let participant = p2s::CallStateParticipant {
                    kind: Some(call_state_participant::Kind::Normal(p2s::NormalParticipant {
                        identity: identity.as_str().to_string(),
                        nickname: nickname.as_ref().map(|n| n.0.clone()).unwrap_or_default(),
                    })),
                };
                (id.get(), participant)
            })
            .collect();
        p2s::CallState {
            padding: zufalls_padding(),
            state_created_by: self.created_by.get(),
            state_created_at: self.created_at_ms,
            participants,
        }
        .encode_to_vec()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
