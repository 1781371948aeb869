//! Eintrag eines entfernten Teilnehmers in der Teilnehmerliste

use huddle_core::IdentityString;

use crate::abort::{AbortSignal, RemoveCause};
use crate::authenticated::AuthenticatedParticipant;
use crate::handshake::UnauthenticatedParticipant;
use crate::state::ParticipantView;

#[derive(Debug)]
pub enum RemoteParticipant {
    Unauthenticated(UnauthenticatedParticipant),
    Authenticated(Box<AuthenticatedParticipant>),
}

impl RemoteParticipant {
    pub fn view(&self) -> ParticipantView {
        match self {
            Self::Unauthenticated(_) => ParticipantView::Handshake,
            Self::Authenticated(teilnehmer) => teilnehmer.view(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }

    /// Bekannte Identitaet (nach dem Hello bzw. der Authentifizierung)
    pub fn identity(&self) -> Option<&IdentityString> {
        match self {
            Self::Unauthenticated(teilnehmer) => teilnehmer.identity(),
            Self::Authenticated(teilnehmer) => Some(teilnehmer.identity()),
        }
    }
}

/// Teilnehmer mit seinem Abbruchsignal
#[derive(Debug)]
pub struct ParticipantEntry {
    pub participant: RemoteParticipant,
    pub abort: AbortSignal<RemoveCause>,
}
