//! Beobachtbarer Zustand eines laufenden Calls
//!
//! Wird nach jeder Aenderung ueber einen `watch`-Kanal veroeffentlicht.

use std::collections::BTreeMap;

use huddle_core::{IdentityString, Nickname, ParticipantId};
use huddle_protocol::CaptureDevice;

use crate::abort::CallAbort;

/// An/Aus-Zustand von Mikrofon und Kamera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CaptureState {
    pub microphone: bool,
    pub camera: bool,
}

impl CaptureState {
    pub fn get(&self, device: CaptureDevice) -> bool {
        match device {
            CaptureDevice::Microphone => self.microphone,
            CaptureDevice::Camera => self.camera,
        }
    }

    pub fn set(&mut self, device: CaptureDevice, on: bool) {
        match device {
            CaptureDevice::Microphone => self.microphone = on,
            CaptureDevice::Camera => self.camera = on,
        }
    }
}

/// Sicht auf einen entfernten Teilnehmer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParticipantView {
    Handshake,
    Authenticated {
        identity: IdentityString,
        nickname: Nickname,
        capture: CaptureState,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OngoingCallState {
    pub local: ParticipantId,
    /// Sendet dieser Teilnehmer den Call-Zustand an das SFU?
    pub leader: bool,
    pub local_capture: CaptureState,
    pub participants: BTreeMap<ParticipantId, ParticipantView>,
    pub epoch: u32,
    pub ratchet_counter: u8,
    pub aborted: Option<CallAbort>,
}

impl OngoingCallState {
    pub fn new(local: ParticipantId) -> Self {
        Self {
            local,
            leader: false,
            local_capture: CaptureState::default(),
            participants: BTreeMap::new(),
            epoch: 0,
            ratchet_counter: 0,
            aborted: None,
        }
    }

    pub fn authenticated(&self) -> impl Iterator<Item = ParticipantId> + '_ {
        self.participants
            .iter()
            .filter(|(_, view)| matches!(view, ParticipantView::Authenticated { .. }))
            .map(|(id, _)| *id)
    }
}
