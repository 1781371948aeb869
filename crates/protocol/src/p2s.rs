//! Teilnehmer-zu-SFU Nachrichten und der verschluesselte Call-Zustand

use prost::alloc::collections::BTreeMap;
use prost::alloc::string::String;
use prost::alloc::vec::Vec;

use crate::p2p::{OuterEnvelope, Unit};

// ---------------------------------------------------------------------------
// Teilnehmer -> SFU
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, prost::Message)]
pub struct UpdateCallState {
    /// Mit GCSK verschluesselter `CallState` (Nonce vorangestellt)
    #[prost(bytes = "vec", tag = "1")]
    pub encrypted_call_state: Vec<u8>,
}

#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct Resolution {
    #[prost(uint32, tag = "1")]
    pub width: u32,
    #[prost(uint32, tag = "2")]
    pub height: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CameraSubscribe {
    #[prost(message, optional, tag = "1")]
    pub desired_resolution: Option<Resolution>,
    #[prost(uint32, tag = "2")]
    pub desired_fps: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ParticipantCamera {
    #[prost(uint32, tag = "1")]
    pub participant_id: u32,
    #[prost(oneof = "participant_camera::Action", tags = "2, 3")]
    pub action: Option<participant_camera::Action>,
}

pub mod participant_camera {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Action {
        #[prost(message, tag = "2")]
        Subscribe(super::CameraSubscribe),
        #[prost(message, tag = "3")]
        Unsubscribe(super::Unit),
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ParticipantMicrophone {
    #[prost(uint32, tag = "1")]
    pub participant_id: u32,
    #[prost(oneof = "participant_microphone::Action", tags = "2, 3")]
    pub action: Option<participant_microphone::Action>,
}

pub mod participant_microphone {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Action {
        #[prost(message, tag = "2")]
        Subscribe(super::Unit),
        #[prost(message, tag = "3")]
        Unsubscribe(super::Unit),
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ParticipantToSfuEnvelope {
    #[prost(bytes = "vec", tag = "1")]
    pub padding: Vec<u8>,
    #[prost(oneof = "participant_to_sfu::Content", tags = "2, 3, 4, 5")]
    pub content: Option<participant_to_sfu::Content>,
}

pub mod participant_to_sfu {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Content {
        #[prost(message, tag = "2")]
        Relay(super::OuterEnvelope),
        #[prost(message, tag = "3")]
        UpdateCallState(super::UpdateCallState),
        #[prost(message, tag = "4")]
        RequestParticipantCamera(super::ParticipantCamera),
        #[prost(message, tag = "5")]
        RequestParticipantMicrophone(super::ParticipantMicrophone),
    }
}

// ---------------------------------------------------------------------------
// SFU -> Teilnehmer
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, prost::Message)]
pub struct SfuHello {
    #[prost(uint32, repeated, tag = "1")]
    pub participant_ids: Vec<u32>,
}

#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct ParticipantJoined {
    #[prost(uint32, tag = "1")]
    pub participant_id: u32,
}

#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct ParticipantLeft {
    #[prost(uint32, tag = "1")]
    pub participant_id: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SfuToParticipantEnvelope {
    #[prost(bytes = "vec", tag = "1")]
    pub padding: Vec<u8>,
    #[prost(oneof = "sfu_to_participant::Content", tags = "2, 3, 4, 5")]
    pub content: Option<sfu_to_participant::Content>,
}

pub mod sfu_to_participant {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Content {
        #[prost(message, tag = "2")]
        Relay(super::OuterEnvelope),
        #[prost(message, tag = "3")]
        Hello(super::SfuHello),
        #[prost(message, tag = "4")]
        ParticipantJoined(super::ParticipantJoined),
        #[prost(message, tag = "5")]
        ParticipantLeft(super::ParticipantLeft),
    }
}

// ---------------------------------------------------------------------------
// Call-Zustand (vom Leader periodisch veroeffentlicht)
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, prost::Message)]
pub struct NormalParticipant {
    #[prost(string, tag = "1")]
    pub identity: String,
    #[prost(string, tag = "2")]
    pub nickname: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GuestParticipant {
    #[prost(string, tag = "1")]
    pub name: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CallStateParticipant {
    #[prost(oneof = "call_state_participant::Kind", tags = "1, 2")]
    pub kind: Option<call_state_participant::Kind>,
}

pub mod call_state_participant {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Kind {
        #[prost(message, tag = "1")]
        Normal(super::NormalParticipant),
        #[prost(message, tag = "2")]
        Guest(super::GuestParticipant),
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CallState {
    #[prost(bytes = "vec", tag = "1")]
    pub padding: Vec<u8>,
    #[prost(uint32, tag = "2")]
    pub state_created_by: u32,
    /// Unix-Zeitstempel in Millisekunden
    #[prost(uint64, tag = "3")]
    pub state_created_at: u64,
    #[prost(btree_map = "uint32, message", tag = "4")]
    pub participants: BTreeMap<u32, CallStateParticipant>,
}
