//! Abbruchsignale fuer Call und Teilnehmer
//!
//! Ein [`AbortSignal`] kombiniert ein `CancellationToken` mit dem Grund des
//! Abbruchs. Teilnehmer-Signale sind Kinder des Call-Signals: bricht der Call
//! ab, gelten auch alle Teilnehmer als abgebrochen, aber nicht umgekehrt.
//! Der erste gemeldete Grund gewinnt, ein Abbruch ist endgueltig.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Abbruchgrund auf Verbindungsebene
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionAbort {
    Disconnected,
    UnexpectedError,
}

/// Abbruchgrund aus der Call-Logik
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendAbort {
    UserHangup,
    GroupLeftKickedOrRemoved,
    GroupCallsDisabled,
    CallNotRunning,
    CallFull,
    DisconnectedDueToInactivity,
    UnexpectedError,
}

/// Grund fuer das Ende eines Calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallAbort {
    Connection(ConnectionAbort),
    Backend(BackendAbort),
}

impl CallAbort {
    pub const UNERWARTET: Self = Self::Backend(BackendAbort::UnexpectedError);
}

/// Grund fuer das Entfernen eines einzelnen Teilnehmers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveCause {
    /// Das SFU meldet, dass der Teilnehmer gegangen ist
    SfuLeft,
    /// Der Teilnehmer hat das Protokoll verletzt
    ProtocolError,
    /// Der Kontakt ist nicht mehr Mitglied der Gruppe
    MembershipLost,
    UnexpectedError,
}

impl RemoveCause {
    /// Label fuer Metriken
    pub fn label(self) -> &'static str {
        match self {
            Self::SfuLeft => "sfu-left",
            Self::ProtocolError => "protocol-error",
            Self::MembershipLost => "membership-lost",
            Self::UnexpectedError => "unexpected-error",
        }
    }
}

/// Abbruchsignal mit Grund
pub struct AbortSignal<C> {
    token: CancellationToken,
    cause: Arc<Mutex<Option<C>>>,
}

impl<C> Clone for AbortSignal<C> {
    fn clone(&self) -> Self {
        Self {
            token: self.token.clone(),
            cause: Arc::clone(&self.cause),
        }
    }
}

impl<C> std::fmt::Debug for AbortSignal<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbortSignal")
            .field("aborted", &self.token.is_cancelled())
            .finish()
    }
}

impl<C> Default for AbortSignal<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> AbortSignal<C> {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            cause: Arc::new(Mutex::new(None)),
        }
    }

    /// Erstellt ein Kind-Signal, das mit diesem Signal abbricht
    pub fn child<D>(&self) -> AbortSignal<D> {
        AbortSignal {
            token: self.token.child_token(),
            cause: Arc::new(Mutex::new(None)),
        }
    }

    /// Loest den Abbruch aus. `false`, falls bereits abgebrochen.
    pub fn raise(&self, cause: C) -> bool {
        let mut slot = self.cause.lock();
        if slot.is_some() || self.token.is_cancelled() {
            return false;
        }
        *slot = Some(cause);
        self.token.cancel();
        true
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wartet auf den Abbruch
    pub async fn aborted(&self) {
        self.token.cancelled().await
    }

    /// Handelt es sich um dasselbe Signal (nicht nur denselben Zustand)?
    pub fn same_as(&self, other: &AbortSignal<C>) -> bool {
        Arc::ptr_eq(&self.cause, &other.cause)
    }
}

impl<C: Clone> AbortSignal<C> {
    /// Grund des Abbruchs. `None` wenn nicht abgebrochen oder nur ueber das
    /// Eltern-Signal abgebrochen.
    pub fn cause(&self) -> Option<C> {
        self.cause.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn erster_grund_gewinnt() {
        let signal = AbortSignal::<CallAbort>::new();
        assert!(signal.raise(CallAbort::Backend(BackendAbort::UserHangup)));
        assert!(!signal.raise(CallAbort::UNERWARTET));
        signal.aborted().await;
        assert_eq!(
            signal.cause(),
            Some(CallAbort::Backend(BackendAbort::UserHangup))
        );
    }

    #[test]
    fn kind_bricht_mit_eltern_ab() {
        let call = AbortSignal::<CallAbort>::new();
        let teilnehmer: AbortSignal<RemoveCause> = call.child();

        assert!(teilnehmer.raise(RemoveCause::SfuLeft));
        assert!(!call.is_aborted());

        let zweiter: AbortSignal<RemoveCause> = call.child();
        call.raise(CallAbort::Connection(ConnectionAbort::Disconnected));
        assert!(zweiter.is_aborted());
        assert_eq!(zweiter.cause(), None);
        assert!(!zweiter.raise(RemoveCause::ProtocolError));
    }

    #[test]
    fn identitaet_statt_gleichheit() {
        let call = AbortSignal::<CallAbort>::new();
        let a: AbortSignal<RemoveCause> = call.child();
        let b: AbortSignal<RemoveCause> = call.child();
        assert!(a.same_as(&a.clone()));
        assert!(!a.same_as(&b));
    }
}
