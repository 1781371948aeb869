//! # huddle-call
//!
//! Orchestrator fuer Ende-zu-Ende-verschluesselte Gruppencalls ueber ein
//! nicht vertrauenswuerdiges SFU.
//!
//! ## Module
//! - `call` - [`GroupCall`]: Teilnehmerliste, SFU-Nachrichten, Leader, Timer
//! - `handshake` - Hello/Auth-Zustandsautomat fuer neue Teilnehmer
//! - `authenticated` - Nachrichten nach dem Handshake (Rekey, Aufnahmezustand)
//! - `lock` - Call-Lock mit benanntem Zweck
//! - `abort` - Abbruchsignale fuer Call und Teilnehmer
//! - `backend` - Schnittstellen zu Transport, Medien-Krypto und Gruppe
//! - `state` - Beobachtbarer Call-Zustand
//! - `config` - Zeitparameter

pub mod abort;
pub mod authenticated;
pub mod backend;
pub mod call;
pub mod config;
pub mod delayed;
pub mod error;
pub mod handshake;
pub mod lock;
pub mod participant;
pub mod state;
pub mod timer;

pub use abort::{AbortSignal, BackendAbort, CallAbort, ConnectionAbort, RemoveCause};
pub use backend::{
    CallParams, CallServices, ConnectRequest, ContactRef, DescriptionUpdate, GroupMember,
    GroupMembership, HandshakeKeyDerivation, JoinResponse, MediaCryptoBackend, TransportContext,
};
pub use call::GroupCall;
pub use config::CallConfig;
pub use error::{CallError, CallResult, ParticipantError, ParticipantResult};
pub use lock::LockIntent;
pub use state::{CaptureState, OngoingCallState, ParticipantView};
