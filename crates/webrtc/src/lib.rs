//! huddle-webrtc – Session-Beschreibung fuer den gebuendelten Gruppencall
//!
//! Das SFU spielt in der Offer/Answer-Verhandlung die Rolle des Anbieters.
//! Die Remote-Description wird daher lokal und deterministisch erzeugt:
//! jede Aenderung der Teilnehmerliste ergibt eine neue Version.

pub mod error;
pub mod ice;
pub mod mids;
pub mod sdp;

pub use error::{WebRtcError, WebRtcResult};
pub use ice::{DtlsFingerprint, IceCandidate, IcePassword, IceUsernameFragment};
pub use mids::{mids, Mids, MIDS_MAX, MIDS_STEP};
pub use sdp::{
    create_remote_session_description, RemoteSessionDescriptionInit, SdpState, SdpStatic,
    SessionDescription, SimulcastEncoding, CAMERA_ENCODINGS,
};
