//! Teilnehmer-zu-Teilnehmer Nachrichten (ueber das SFU weitergeleitet)
//!
//! Alle Nachrichten werden vor dem Versand verschluesselt. Das SFU sieht nur
//! den `OuterEnvelope` mit Sender, Empfaenger und Chiffrat.

use prost::alloc::string::String;
use prost::alloc::vec::Vec;

/// Leere Nachricht fuer Varianten ohne Nutzdaten
#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct Unit {}

/// Aeusserer Envelope, vom SFU anhand von `receiver` geroutet
#[derive(Clone, PartialEq, prost::Message)]
pub struct OuterEnvelope {
    #[prost(uint32, tag = "1")]
    pub sender: u32,
    #[prost(uint32, tag = "2")]
    pub receiver: u32,
    #[prost(bytes = "vec", tag = "3")]
    pub encrypted_data: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, prost::Message)]
pub struct Hello {
    #[prost(string, tag = "1")]
    pub identity: String,
    #[prost(string, tag = "2")]
    pub nickname: String,
    /// Oeffentlicher Call-Schluessel (PCK) des Absenders
    #[prost(bytes = "vec", tag = "3")]
    pub pck: Vec<u8>,
    /// Cookie (PCCK) des Absenders
    #[prost(bytes = "vec", tag = "4")]
    pub pcck: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GuestHello {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(bytes = "vec", tag = "2")]
    pub pck: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub pcck: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct HelloEnvelope {
    #[prost(bytes = "vec", tag = "1")]
    pub padding: Vec<u8>,
    #[prost(oneof = "hello_envelope::Content", tags = "2, 3")]
    pub content: Option<hello_envelope::Content>,
}

pub mod hello_envelope {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Content {
        #[prost(message, tag = "2")]
        Hello(super::Hello),
        #[prost(message, tag = "3")]
        GuestHello(super::GuestHello),
    }
}

/// Medienschluessel eines Teilnehmers (PCMK) inkl. Epoch und Ratchet-Zaehler
#[derive(Clone, PartialEq, prost::Message)]
pub struct MediaKey {
    #[prost(uint32, tag = "1")]
    pub epoch: u32,
    #[prost(uint32, tag = "2")]
    pub ratchet_counter: u32,
    #[prost(bytes = "vec", tag = "3")]
    pub pcmk: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Auth {
    /// Wiederholter PCK des Empfaengers
    #[prost(bytes = "vec", tag = "1")]
    pub pck: Vec<u8>,
    /// Wiederholter Cookie des Empfaengers
    #[prost(bytes = "vec", tag = "2")]
    pub pcck: Vec<u8>,
    #[prost(message, repeated, tag = "3")]
    pub media_keys: Vec<MediaKey>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GuestAuth {
    #[prost(bytes = "vec", tag = "1")]
    pub pck: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub pcck: Vec<u8>,
    #[prost(message, repeated, tag = "3")]
    pub media_keys: Vec<MediaKey>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AuthEnvelope {
    #[prost(bytes = "vec", tag = "1")]
    pub padding: Vec<u8>,
    #[prost(oneof = "auth_envelope::Content", tags = "2, 3")]
    pub content: Option<auth_envelope::Content>,
}

pub mod auth_envelope {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Content {
        #[prost(message, tag = "2")]
        Auth(super::Auth),
        #[prost(message, tag = "3")]
        GuestAuth(super::GuestAuth),
    }
}

// ---------------------------------------------------------------------------
// Nach der Authentifizierung
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, prost::Message)]
pub struct Microphone {
    #[prost(oneof = "microphone::State", tags = "1, 2")]
    pub state: Option<microphone::State>,
}

pub mod microphone {
    #[derive(Clone, Copy, PartialEq, prost::Oneof)]
    pub enum State {
        #[prost(message, tag = "1")]
        On(super::Unit),
        #[prost(message, tag = "2")]
        Off(super::Unit),
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Camera {
    #[prost(oneof = "camera::State", tags = "1, 2")]
    pub state: Option<camera::State>,
}

pub mod camera {
    #[derive(Clone, Copy, PartialEq, prost::Oneof)]
    pub enum State {
        #[prost(message, tag = "1")]
        On(super::Unit),
        #[prost(message, tag = "2")]
        Off(super::Unit),
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CaptureState {
    #[prost(oneof = "capture_state::State", tags = "1, 2")]
    pub state: Option<capture_state::State>,
}

pub mod capture_state {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum State {
        #[prost(message, tag = "1")]
        Microphone(super::Microphone),
        #[prost(message, tag = "2")]
        Camera(super::Camera),
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct HoldState {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Admin {
    #[prost(bytes = "vec", tag = "1")]
    pub encrypted_admin_envelope: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Envelope {
    #[prost(bytes = "vec", tag = "1")]
    pub padding: Vec<u8>,
    #[prost(oneof = "envelope::Content", tags = "2, 3, 4, 5")]
    pub content: Option<envelope::Content>,
}

pub mod envelope {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Content {
        #[prost(message, tag = "2")]
        EncryptedAdminEnvelope(super::Admin),
        #[prost(message, tag = "3")]
        Rekey(super::MediaKey),
        #[prost(message, tag = "4")]
        CaptureState(super::CaptureState),
        #[prost(message, tag = "5")]
        HoldState(super::HoldState),
    }
}
