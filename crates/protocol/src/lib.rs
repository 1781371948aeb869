//! huddle-protocol – Nachrichten des Gruppencall-Protokolls
//!
//! Dieses Crate definiert die Protobuf-Nachrichten, die zwischen Teilnehmern
//! (P2P, ueber das SFU weitergeleitet) und zwischen Teilnehmer und SFU (P2S)
//! ausgetauscht werden, sowie deren Validierung in Domain-Typen.

pub mod error;
pub mod p2p;
pub mod p2s;
pub mod padding;
pub mod validate;

pub use error::{ProtocolError, ProtocolResult};
pub use padding::zufalls_padding;
pub use validate::{
    AuthMessage, CallStateSnapshot, CaptureDevice, CaptureStateMessage, HelloMessage,
    MediaKeyMessage, P2pMessage, P2sMessage, RelayedMessage, Resolution, S2pMessage, COOKIE_LAENGE,
    DESIRED_CAMERA_FPS, PCMK_LAENGE, PUBLIC_KEY_LAENGE,
};
