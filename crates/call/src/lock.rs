//! Lock ueber den Call-Zustand mit benanntem Zweck
//!
//! Jeder Abschnitt, der die Teilnehmerliste veraendert, nimmt den Lock mit
//! einem [`LockIntent`]. Funktionen, die nur in bestimmten Abschnitten laufen
//! duerfen, pruefen den Zweck zur Laufzeit ([`CallGuard::ensure_intent`]).

use std::ops::{Deref, DerefMut};

use tokio::sync::{Mutex, MutexGuard};

use crate::error::{CallError, CallResult};

/// Zweck eines Lock-Abschnitts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockIntent {
    Create,
    IncomingP2s,
    AbortParticipant,
    IncreaseEpochStale,
    ApplyToParticipant,
    BroadcastToParticipants,
    RestartIce,
    GroupUpdate,
}

impl std::fmt::Display for LockIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Create => "create",
            Self::IncomingP2s => "incoming-p2s",
            Self::AbortParticipant => "abort-participant",
            Self::IncreaseEpochStale => "increase-epoch-stale",
            Self::ApplyToParticipant => "apply-to-participant",
            Self::BroadcastToParticipants => "broadcast-to-participants",
            Self::RestartIce => "restart-ice",
            Self::GroupUpdate => "group-update",
        };
        f.write_str(name)
    }
}

/// Mutex mit Zweck-Slot
#[derive(Debug)]
pub struct CallLock<T> {
    inner: Mutex<T>,
    intent: parking_lot::Mutex<Option<LockIntent>>,
}

impl<T> CallLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
            intent: parking_lot::Mutex::new(None),
        }
    }

    /// Wartet auf den Lock und setzt den Zweck
    pub async fn lock(&self, intent: LockIntent) -> CallGuard<'_, T> {
        let guard = self.inner.lock().await;
        *self.intent.lock() = Some(intent);
        tracing::trace!(%intent, "Call-Lock genommen");
        CallGuard {
            guard,
            intent,
            slot: &self.intent,
        }
    }

    /// Zweck des aktuell laufenden Abschnitts
    pub fn current_intent(&self) -> Option<LockIntent> {
        *self.intent.lock()
    }
}

/// Gehaltener Lock
pub struct CallGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    intent: LockIntent,
    slot: &'a parking_lot::Mutex<Option<LockIntent>>,
}

impl<T> CallGuard<'_, T> {
    /// Prueft, ob der Abschnitt einen der erlaubten Zwecke hat
    pub fn ensure_intent(&self, erlaubt: &'static [LockIntent]) -> CallResult<()> {
        if erlaubt.contains(&self.intent) {
            return Ok(());
        }
        Err(CallError::FalscherLockIntent {
            erwartet: erlaubt,
            aktiv: Some(self.intent),
        })
    }
}

impl<T> Deref for CallGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for CallGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for CallGuard<'_, T> {
    fn drop(&mut self) {
        *self.slot.lock() = None;
    }
}
