//! Call-Orchestrator
//!
//! Besitzt die Teilnehmerliste und den SDP-Zustand hinter einem [`CallLock`].
//! Alle Aenderungen laufen in benannten Lock-Abschnitten:
//!
//! - SFU-Nachrichten (`handle_p2s`): Relay, Beitritt, Verlassen
//! - Entfernen eines Teilnehmers nach dessen Abbruchsignal
//! - Anwenden eines Epoch-Wechsels nach der Wartezeit
//! - Aufnahmezustand, Abonnements, ICE-Restart, Gruppenaenderungen
//!
//! Ein Call lebt bis zu seinem Abbruch. Danach raeumt ein eigener Task die
//! Teilnehmer und Timer ab und veroeffentlicht den Abbruchgrund.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use huddle_core::{IdentityString, Nickname, ParticipantId};
use huddle_crypto::{GroupCallId, GroupCallKeyDerivations, LocalCallKey, LocalMediaKey, NextEpoch};
use huddle_observability::logging::SECURITY_TARGET;
use huddle_observability::CallMetrics;
use huddle_protocol::{
    CallStateSnapshot, CaptureDevice, P2sMessage, RelayedMessage, Resolution, S2pMessage,
};
use huddle_webrtc::{IceCandidate, SdpState};

use crate::abort::{AbortSignal, BackendAbort, CallAbort, RemoveCause};
use crate::authenticated::{AuthenticatedParticipant, Authentication, RemoteUpdate};
use crate::backend::{CallParams, CallServices, ConnectRequest, DescriptionUpdate};
use crate::config::CallConfig;
use crate::error::{CallError, CallResult, ParticipantError};
use crate::handshake::{
    HandshakeContext, HandshakeInitiator, HandshakeOutcome, UnauthenticatedParticipant,
};
use crate::lock::{CallGuard, CallLock, LockIntent};
use crate::participant::{ParticipantEntry, RemoteParticipant};
use crate::state::{CaptureState, OngoingCallState};
use crate::timer::TimerHandle;

/// Ab dieser Teilnehmerzahl startet das Mikrofon stumm
const MIKROFON_AUS_AB: usize = 4;

/// Veraenderlicher Zustand hinter dem Call-Lock
#[derive(Debug)]
struct CallData {
    participants: BTreeMap<ParticipantId, ParticipantEntry>,
    sdp: SdpState,
    media_keys: LocalMediaKey,
    local_capture: CaptureState,
    leader: bool,
    epoch_timer: Option<TimerHandle>,
    state_timer: Option<TimerHandle>,
    loner_timer: Option<TimerHandle>,
}

type Guard<'a> = CallGuard<'a, CallData>;

struct CallInner {
    local: ParticipantId,
    identity: IdentityString,
    nickname: Nickname,
    pck: LocalCallKey,
    derivations: GroupCallKeyDerivations,
    services: CallServices,
    config: CallConfig,
    abort: AbortSignal<CallAbort>,
    lock: CallLock<CallData>,
    state_tx: watch::Sender<OngoingCallState>,
}

/// Ergebnis einer weitergeleiteten P2P-Nachricht
enum Relay {
    Handshake(HandshakeOutcome),
    Update(Option<RemoteUpdate>),
}

/// Laufender Gruppencall
#[derive(Clone)]
pub struct GroupCall {
    inner: Arc<CallInner>,
}

impl std::fmt::Debug for GroupCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupCall")
            .field("call_id", &self.inner.derivations.call_id)
            .field("local", &self.inner.local)
            .field("abort", &self.inner.abort)
            .finish_non_exhaustive()
    }
}

impl GroupCall {
    /// Verbindet mit dem SFU und beginnt den Handshake mit allen bereits
    /// anwesenden Teilnehmern
    pub async fn create(
        params: CallParams,
        services: CallServices,
        config: CallConfig,
    ) -> CallResult<Self> {
        let CallParams {
            identity,
            nickname,
            derivations,
            join,
        } = params;
        let local = join.participant_id;

        let mut sdp = SdpState::new(join.sdp_static, local);
        let description = sdp.next_description(local, &BTreeSet::new())?;
        let media_keys = LocalMediaKey::neu();

        let request = ConnectRequest {
            call_id: derivations.call_id,
            local,
            gckh: derivations.gckh,
            description,
            candidates: join.addresses.iter().copied().map(IceCandidate::host).collect(),
            initial_pcmk: media_keys.current(),
        };
        let hello = services
            .transport
            .connect(request)
            .await
            .map_err(CallError::Transport)?;
        let vorhanden: Vec<ParticipantId> = hello.into_iter().filter(|id| *id != local).collect();

        info!(
            call_id = %derivations.call_id,
            participant = %local,
            teilnehmer = vorhanden.len(),
            "Mit dem SFU verbunden"
        );

        let local_capture = CaptureState {
            microphone: vorhanden.len() < MIKROFON_AUS_AB,
            camera: false,
        };
        let mut initial = OngoingCallState::new(local);
        initial.local_capture = local_capture;
        let (state_tx, _) = watch::channel(initial);

        let inner = Arc::new(CallInner {
            local,
            identity,
            nickname,
            pck: LocalCallKey::zufaellig(),
            derivations,
            services,
            config,
            abort: AbortSignal::new(),
            lock: CallLock::new(CallData {
                participants: BTreeMap::new(),
                sdp,
                media_keys,
                local_capture,
                leader: false,
                epoch_timer: None,
                state_timer: None,
                loner_timer: None,
            }),
            state_tx,
        });
        tokio::spawn(Arc::clone(&inner).teardown());

        let mut guard = inner.lock.lock(LockIntent::Create).await;
        let ergebnis = inner.join_existing(&mut guard, &vorhanden).await;
        inner.publish(&guard);
        drop(guard);
        inner.finish(ergebnis)?;

        Ok(Self { inner })
    }

    pub fn local(&self) -> ParticipantId {
        self.inner.local
    }

    pub fn call_id(&self) -> GroupCallId {
        self.inner.derivations.call_id
    }

    pub fn metrics(&self) -> &CallMetrics {
        &self.inner.services.metrics
    }

    /// Beobachtbarer Zustand, nach jeder Aenderung aktualisiert
    pub fn state(&self) -> watch::Receiver<OngoingCallState> {
        self.inner.state_tx.subscribe()
    }

    /// Verarbeitet einen `SfuToParticipant`-Envelope vom Datenkanal
    pub async fn handle_p2s(&self, frame: &[u8]) -> CallResult<()> {
        let inner = &self.inner;
        inner.ensure_running()?;
        let nachricht = match S2pMessage::dekodieren(frame) {
            Ok(nachricht) => nachricht,
            Err(e) => {
                warn!(error = %e, "Ungueltige SFU-Nachricht verworfen");
                return Ok(());
            }
        };

        let mut guard = inner.lock.lock(LockIntent::IncomingP2s).await;
        inner.ensure_running()?;
        let ergebnis = inner.process_p2s(&mut guard, nachricht).await;
        inner.publish(&guard);
        drop(guard);
        inner.finish(ergebnis)
    }

    /// Schaltet Mikrofon oder Kamera und teilt es allen Teilnehmern mit
    pub async fn local_capture_state(&self, device: CaptureDevice, on: bool) -> CallResult<()> {
        let inner = &self.inner;
        inner.ensure_running()?;
        let mut guard = inner.lock.lock(LockIntent::BroadcastToParticipants).await;
        inner.ensure_running()?;
        let ergebnis = inner.broadcast_capture(&mut guard, device, on);
        inner.publish(&guard);
        drop(guard);
        inner.finish(ergebnis)
    }

    pub async fn remote_microphone(&self, id: ParticipantId, subscribe: bool) -> CallResult<()> {
        self.request_subscription(id, move |teilnehmer| teilnehmer.microphone_request(subscribe))
            .await
    }

    /// Kamera mit Aufloesung abonnieren, `None` bestellt ab
    pub async fn remote_camera(
        &self,
        id: ParticipantId,
        subscribe: Option<Resolution>,
    ) -> CallResult<()> {
        self.request_subscription(id, move |teilnehmer| teilnehmer.camera_request(subscribe))
            .await
    }

    async fn request_subscription<F>(&self, id: ParticipantId, anfrage: F) -> CallResult<()>
    where
        F: FnOnce(&mut AuthenticatedParticipant) -> Option<P2sMessage>,
    {
        let inner = &self.inner;
        inner.ensure_running()?;
        let mut guard = inner.lock.lock(LockIntent::ApplyToParticipant).await;
        inner.ensure_running()?;
        let nachricht = match guard.participants.get_mut(&id).map(|e| &mut e.participant) {
            Some(RemoteParticipant::Authenticated(teilnehmer)) => anfrage(&mut **teilnehmer),
            _ => {
                warn!(participant = %id, "Abonnement fuer nicht authentifizierten Teilnehmer ignoriert");
                return Ok(());
            }
        };
        let ergebnis = match nachricht {
            Some(nachricht) => inner.send_to_sfu(vec![nachricht]),
            None => Ok(()),
        };
        drop(guard);
        inner.finish(ergebnis)
    }

    /// ICE-Restart mit einer neuen Version der Remote-Description
    pub async fn trigger_ice_restart(&self) -> CallResult<()> {
        let inner = &self.inner;
        inner.ensure_running()?;
        let mut guard = inner.lock.lock(LockIntent::RestartIce).await;
        inner.ensure_running()?;
        let ergebnis = inner.perform_ice_restart(&mut guard).await;
        drop(guard);
        inner.finish(ergebnis)
    }

    /// Prueft alle Teilnehmer gegen die aktuelle Gruppenmitgliedschaft
    ///
    /// Teilnehmer, die kein Mitglied mehr sind, werden entfernt. Zurueckgestellte
    /// Hellos neuer Mitglieder werden erneut verarbeitet.
    pub async fn group_membership_changed(&self) -> CallResult<()> {
        let inner = &self.inner;
        inner.ensure_running()?;
        let mut guard = inner.lock.lock(LockIntent::GroupUpdate).await;
        inner.ensure_running()?;
        let ergebnis = inner.check_membership(&mut guard).await;
        inner.publish(&guard);
        drop(guard);
        inner.finish(ergebnis)
    }

    pub fn hangup(&self) -> bool {
        self.abort(CallAbort::Backend(BackendAbort::UserHangup))
    }

    /// Bricht den Call ab. `false`, falls er bereits beendet war.
    pub fn abort(&self, cause: CallAbort) -> bool {
        let ausgeloest = self.inner.abort.raise(cause);
        if ausgeloest {
            info!(?cause, "Call wird beendet");
        }
        ausgeloest
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.abort.is_aborted()
    }

    /// Wartet auf das Ende des Calls und liefert den Grund
    pub async fn aborted(&self) -> CallAbort {
        self.inner.abort.aborted().await;
        self.inner.abort.cause().unwrap_or(CallAbort::UNERWARTET)
    }
}

// ---------------------------------------------------------------------------
// Lock-Abschnitte
// ---------------------------------------------------------------------------

impl CallInner {
    fn ensure_running(&self) -> CallResult<()> {
        if self.abort.is_aborted() {
            return Err(CallError::Beendet);
        }
        Ok(())
    }

    /// Fehler auf Call-Ebene beenden den Call
    fn finish<T>(&self, ergebnis: CallResult<T>) -> CallResult<T> {
        if let Err(e) = &ergebnis {
            self.report_unexpected(e);
        }
        ergebnis
    }

    fn report_unexpected(&self, e: &CallError) {
        if matches!(e, CallError::Beendet) {
            return;
        }
        if self.abort.raise(CallAbort::UNERWARTET) {
            error!(error = %e, "Unerwarteter Fehler, Call wird abgebrochen");
        }
    }

    fn handshake_ctx<'a>(&'a self, media_keys: &'a LocalMediaKey) -> HandshakeContext<'a> {
        HandshakeContext {
            local: self.local,
            identity: &self.identity,
            nickname: &self.nickname,
            pck: &self.pck,
            gckh: &self.derivations.gckh,
            handshake_box: &self.derivations.handshake_box,
            membership: self.services.membership.as_ref(),
            key_derivation: self.services.key_derivation.as_ref(),
            media_keys,
        }
    }

    async fn join_existing(
        self: &Arc<Self>,
        guard: &mut Guard<'_>,
        vorhanden: &[ParticipantId],
    ) -> CallResult<()> {
        self.add_participants(guard, vorhanden, HandshakeInitiator::Local)
            .await?;
        if vorhanden.is_empty() {
            self.maybe_send_state_updates(guard);
        }
        self.update_loner_timer(guard);
        Ok(())
    }

    async fn process_p2s(
        self: &Arc<Self>,
        guard: &mut Guard<'_>,
        nachricht: S2pMessage,
    ) -> CallResult<()> {
        match nachricht {
            S2pMessage::Relay(relay) => self.process_relay(guard, relay).await,
            S2pMessage::ParticipantJoined(id) => self.on_joined(guard, id).await,
            S2pMessage::ParticipantLeft(id) => {
                let Some(abort) = guard.participants.get(&id).map(|e| e.abort.clone()) else {
                    warn!(participant = %id, "Unbekannter Teilnehmer hat den Call verlassen");
                    return Ok(());
                };
                self.remove_participant(guard, id, &abort, RemoveCause::SfuLeft)
                    .await
            }
            S2pMessage::Hello(_) => {
                warn!("Wiederholtes Hello vom SFU ignoriert");
                Ok(())
            }
            S2pMessage::Unbekannt => {
                warn!("Unbekannte SFU-Nachricht ignoriert");
                Ok(())
            }
        }
    }

    async fn on_joined(
        self: &Arc<Self>,
        guard: &mut Guard<'_>,
        id: ParticipantId,
    ) -> CallResult<()> {
        if id == self.local || guard.participants.contains_key(&id) {
            warn!(participant = %id, "Beitritt eines bereits bekannten Teilnehmers ignoriert");
            return Ok(());
        }

        // Neue Teilnehmer duerfen fruehere Medien nicht entschluesseln koennen
        let state = guard.media_keys.next_ratchet_counter()?;
        self.services.metrics.ratchet_advances_total.inc();
        debug!(
            epoch = state.epoch,
            ratchet_counter = state.ratchet_counter,
            "Medienschluessel weitergedreht"
        );
        self.services
            .media_crypto
            .set_local_pcmk(state)
            .await
            .map_err(CallError::MediaCrypto)?;

        self.add_participants(guard, &[id], HandshakeInitiator::Remote)
            .await?;
        self.update_loner_timer(guard);
        Ok(())
    }

    async fn process_relay(
        self: &Arc<Self>,
        guard: &mut Guard<'_>,
        relay: RelayedMessage,
    ) -> CallResult<()> {
        if relay.receiver != self.local {
            warn!(receiver = %relay.receiver, "Relay fuer anderen Empfaenger verworfen");
            return Ok(());
        }
        let id = relay.sender;

        let data = &mut **guard;
        let ctx = self.handshake_ctx(&data.media_keys);
        let Some(entry) = data.participants.get_mut(&id) else {
            warn!(participant = %id, "Relay von unbekanntem Teilnehmer verworfen");
            return Ok(());
        };
        if entry.abort.is_aborted() {
            debug!(participant = %id, "Relay fuer abgebrochenen Teilnehmer verworfen");
            return Ok(());
        }
        let ergebnis = match &mut entry.participant {
            RemoteParticipant::Unauthenticated(teilnehmer) => teilnehmer
                .handle_p2p(&ctx, &relay.encrypted_data)
                .map(Relay::Handshake),
            RemoteParticipant::Authenticated(teilnehmer) => teilnehmer
                .handle_p2p(&relay.encrypted_data)
                .map(Relay::Update),
        };
        let abort = entry.abort.clone();

        match ergebnis {
            Err(e) => self.on_participant_error(id, &abort, e),
            Ok(Relay::Handshake(outcome)) => {
                self.apply_handshake_outcome(guard, id, &abort, outcome).await
            }
            Ok(Relay::Update(Some(RemoteUpdate::MediaKey(state)))) => self
                .services
                .media_crypto
                .add_remote_pcmks(id, vec![state])
                .await
                .map_err(CallError::MediaCrypto),
            Ok(Relay::Update(Some(RemoteUpdate::CaptureState(capture)))) => {
                debug!(
                    participant = %id,
                    device = %capture.device,
                    on = capture.on,
                    "Aufnahmezustand geaendert"
                );
                Ok(())
            }
            Ok(Relay::Update(None)) => Ok(()),
        }
    }

    async fn apply_handshake_outcome(
        self: &Arc<Self>,
        guard: &mut Guard<'_>,
        id: ParticipantId,
        abort: &AbortSignal<RemoveCause>,
        outcome: HandshakeOutcome,
    ) -> CallResult<()> {
        match outcome {
            HandshakeOutcome::Pending { outbound } => self.send_relay(id, outbound),
            HandshakeOutcome::Backlogged => Ok(()),
            HandshakeOutcome::Authenticated(init) => {
                let local_capture = guard.local_capture;
                let Authentication {
                    participant,
                    remote_media_keys,
                    outbound,
                } = match AuthenticatedParticipant::new(id, *init, local_capture) {
                    Ok(authentication) => authentication,
                    Err(e) => return self.on_participant_error(id, abort, e),
                };

                let mut teilnehmer = Box::new(participant);
                let mikrofon = teilnehmer.microphone_request(true);
                info!(
                    participant = %id,
                    identity = %teilnehmer.identity(),
                    "Teilnehmer authentifiziert"
                );
                if let Some(entry) = guard.participants.get_mut(&id) {
                    entry.participant = RemoteParticipant::Authenticated(teilnehmer);
                }
                self.services.metrics.handshakes_total.inc();

                self.services
                    .media_crypto
                    .add_remote_pcmks(id, remote_media_keys)
                    .await
                    .map_err(CallError::MediaCrypto)?;
                self.send_relay(id, outbound)?;
                if let Some(mikrofon) = mikrofon {
                    self.send_to_sfu(vec![mikrofon])?;
                }

                self.maybe_send_state_updates(guard);
                self.update_loner_timer(guard);
                Ok(())
            }
        }
    }

    /// Protokollfehler entfernen den Teilnehmer, alles andere beendet den Call
    fn on_participant_error(
        &self,
        id: ParticipantId,
        abort: &AbortSignal<RemoveCause>,
        e: ParticipantError,
    ) -> CallResult<()> {
        match e {
            ParticipantError::Protokoll(grund) => {
                warn!(
                    target: SECURITY_TARGET,
                    participant = %id,
                    %grund,
                    "Protokollverletzung, Teilnehmer wird entfernt"
                );
                self.services.metrics.protocol_errors_total.inc();
                abort.raise(RemoveCause::ProtocolError);
                Ok(())
            }
            unerwartet @ ParticipantError::Unerwartet(_) => {
                abort.raise(RemoveCause::UnexpectedError);
                Err(unerwartet.into())
            }
        }
    }

    async fn add_participants(
        self: &Arc<Self>,
        guard: &mut Guard<'_>,
        ids: &[ParticipantId],
        initiator: HandshakeInitiator,
    ) -> CallResult<()> {
        guard.ensure_intent(&[LockIntent::Create, LockIntent::IncomingP2s])?;

        let data = &mut **guard;
        let mut hinzugefuegt = Vec::with_capacity(ids.len());
        for &id in ids {
            if id == self.local || data.participants.contains_key(&id) {
                warn!(participant = %id, "Teilnehmer bereits im Call");
                continue;
            }
            let ctx = self.handshake_ctx(&data.media_keys);
            let (teilnehmer, outbound) = UnauthenticatedParticipant::new(id, initiator, &ctx)?;
            let abort: AbortSignal<RemoveCause> = self.abort.child();
            data.participants.insert(
                id,
                ParticipantEntry {
                    participant: RemoteParticipant::Unauthenticated(teilnehmer),
                    abort: abort.clone(),
                },
            );
            data.sdp.m_line_hinzufuegen(id);
            self.send_relay(id, outbound)?;
            self.watch_participant(id, abort);
            hinzugefuegt.push(id);
        }

        if hinzugefuegt.is_empty() {
            return Ok(());
        }
        info!(teilnehmer = ?hinzugefuegt, ?initiator, "Teilnehmer hinzugefuegt");
        self.update_description(data, hinzugefuegt, Vec::new()).await
    }

    /// Entfernt den Teilnehmer, sobald sein Abbruchsignal ausgeloest wird
    fn watch_participant(self: &Arc<Self>, id: ParticipantId, abort: AbortSignal<RemoveCause>) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            abort.aborted().await;
            if inner.abort.is_aborted() {
                return;
            }
            let cause = abort.cause().unwrap_or(RemoveCause::UnexpectedError);

            let mut guard = inner.lock.lock(LockIntent::AbortParticipant).await;
            if inner.abort.is_aborted() {
                return;
            }
            let ergebnis = inner.remove_participant(&mut guard, id, &abort, cause).await;
            drop(guard);
            if let Err(e) = ergebnis {
                inner.report_unexpected(&e);
            }
        });
    }

    async fn remove_participant(
        self: &Arc<Self>,
        guard: &mut Guard<'_>,
        id: ParticipantId,
        abort: &AbortSignal<RemoveCause>,
        cause: RemoveCause,
    ) -> CallResult<()> {
        guard.ensure_intent(&[LockIntent::IncomingP2s, LockIntent::AbortParticipant])?;

        // Bereits entfernt oder inzwischen neu beigetreten
        if !guard
            .participants
            .get(&id)
            .is_some_and(|entry| entry.abort.same_as(abort))
        {
            return Ok(());
        }
        guard.participants.remove(&id);
        abort.raise(cause);
        let cause = abort.cause().unwrap_or(cause);

        self.services
            .metrics
            .participants_removed_total
            .with_label_values(&[cause.label()])
            .inc();
        info!(participant = %id, cause = cause.label(), "Teilnehmer entfernt");

        self.services
            .media_crypto
            .remove_remote(id)
            .await
            .map_err(CallError::MediaCrypto)?;
        self.update_description(guard, Vec::new(), vec![id]).await?;
        self.increase_epoch(guard)?;
        self.maybe_send_state_updates(guard);
        self.update_loner_timer(guard);
        self.publish(guard);
        Ok(())
    }

    /// Neue Remote-Description fuer alle Teilnehmer in der Liste, wartet auf den Transport
    async fn update_description(
        &self,
        data: &mut CallData,
        added: Vec<ParticipantId>,
        removed: Vec<ParticipantId>,
    ) -> CallResult<()> {
        let aktiv: BTreeSet<ParticipantId> = data.participants.keys().copied().collect();
        let description = data.sdp.next_description(self.local, &aktiv)?;
        let update = DescriptionUpdate {
            description,
            m_line_order: data.sdp.m_line_order().to_vec(),
            added,
            removed,
        };
        self.services
            .transport
            .update(update)
            .await
            .map_err(CallError::Transport)
    }

    async fn perform_ice_restart(&self, guard: &mut Guard<'_>) -> CallResult<()> {
        guard.ensure_intent(&[LockIntent::RestartIce])?;
        let data = &mut **guard;
        let aktiv: BTreeSet<ParticipantId> = data.participants.keys().copied().collect();
        let description = data.sdp.next_description(self.local, &aktiv)?;
        info!(version = description.version, "ICE-Restart");
        self.services
            .transport
            .restart_ice(description)
            .await
            .map_err(CallError::Transport)
    }

    // -- Medienschluessel ------------------------------------------------------

    /// Startet einen Epoch-Wechsel (oder markiert den laufenden als veraltet)
    fn increase_epoch(self: &Arc<Self>, guard: &mut Guard<'_>) -> CallResult<()> {
        guard.ensure_intent(&[
            LockIntent::IncomingP2s,
            LockIntent::AbortParticipant,
            LockIntent::IncreaseEpochStale,
        ])?;
        if self.distribute_epoch(guard)? {
            let inner = Arc::clone(self);
            guard.epoch_timer = Some(TimerHandle::spawn(inner.epoch_loop()));
        }
        Ok(())
    }

    /// Verteilt einen neuen Epoch-Schluessel. `true` wenn ein Wechsel gestartet wurde.
    fn distribute_epoch(&self, data: &mut CallData) -> CallResult<bool> {
        let key = match data.media_keys.next_epoch()? {
            NextEpoch::Started(key) => key,
            NextEpoch::MarkedStale => {
                debug!("Laufender Epoch-Wechsel als veraltet markiert");
                return Ok(false);
            }
        };
        debug!(epoch = key.epoch(), "Neuer Epoch-Schluessel wird verteilt");

        let Some(state) = key.snapshot() else {
            return Ok(true);
        };
        for (id, entry) in data.participants.iter_mut() {
            if entry.abort.is_aborted() {
                continue;
            }
            match &mut entry.participant {
                RemoteParticipant::Unauthenticated(teilnehmer) => {
                    teilnehmer.queue_media_key(key.clone())
                }
                RemoteParticipant::Authenticated(teilnehmer) => {
                    let frame = teilnehmer.rekey_frame(&state)?;
                    self.send_relay(*id, vec![frame])?;
                }
            }
        }
        Ok(true)
    }

    /// Wendet den ausstehenden Wechsel nach der Wartezeit an
    ///
    /// War der Wechsel veraltet, wird sofort ein weiterer verteilt und die
    /// Schleife laeuft erneut.
    async fn epoch_loop(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.abort.aborted() => return,
                _ = tokio::time::sleep(self.config.epoch_wechsel_verzoegerung()) => {}
            }

            let mut guard = self.lock.lock(LockIntent::IncreaseEpochStale).await;
            if self.abort.is_aborted() {
                return;
            }
            let ergebnis = self.apply_epoch(&mut guard).await;
            self.publish(&guard);
            drop(guard);
            match ergebnis {
                Ok(true) => continue,
                Ok(false) => return,
                Err(e) => {
                    self.report_unexpected(&e);
                    return;
                }
            }
        }
    }

    async fn apply_epoch(&self, guard: &mut Guard<'_>) -> CallResult<bool> {
        guard.ensure_intent(&[LockIntent::IncreaseEpochStale])?;
        let applied = guard.media_keys.apply_pending()?;
        self.services
            .media_crypto
            .set_local_pcmk(applied.state.clone())
            .await
            .map_err(CallError::MediaCrypto)?;
        self.services.metrics.epoch_transitions_total.inc();
        info!(
            epoch = applied.state.epoch,
            veraltet = applied.stale,
            "Epoch-Wechsel angewendet"
        );

        if !applied.stale {
            return Ok(false);
        }
        self.distribute_epoch(guard)
    }

    // -- Leader und Timer ------------------------------------------------------

    /// Leader ist der Teilnehmer mit der kleinsten ID unter uns und allen
    /// authentifizierten Teilnehmern
    fn maybe_send_state_updates(self: &Arc<Self>, data: &mut CallData) {
        let leader = data
            .participants
            .iter()
            .filter(|(_, entry)| entry.participant.is_authenticated())
            .all(|(id, _)| self.local < *id);
        if leader != data.leader {
            info!(leader, "Leader-Rolle geaendert");
        }
        data.leader = leader;

        if !leader {
            data.state_timer = None;
            return;
        }
        let inner = Arc::clone(self);
        data.state_timer = Some(TimerHandle::spawn(inner.state_loop()));
    }

    /// Sendet den Call-Zustand sofort und danach im festen Intervall
    async fn state_loop(self: Arc<Self>) {
        let mut intervall = tokio::time::interval(self.config.zustand_intervall());
        loop {
            tokio::select! {
                _ = self.abort.aborted() => return,
                _ = intervall.tick() => {}
            }
            let guard = self.lock.lock(LockIntent::BroadcastToParticipants).await;
            if self.abort.is_aborted() {
                return;
            }
            let ergebnis = self.send_call_state(&guard);
            drop(guard);
            if let Err(e) = ergebnis {
                self.report_unexpected(&e);
                return;
            }
        }
    }

    fn send_call_state(&self, guard: &Guard<'_>) -> CallResult<()> {
        guard.ensure_intent(&[LockIntent::BroadcastToParticipants])?;

        let nickname = |nickname: &Nickname| (!nickname.0.is_empty()).then(|| nickname.clone());
        let mut participants = BTreeMap::new();
        participants.insert(self.local, (self.identity.clone(), nickname(&self.nickname)));
        for (id, entry) in &guard.participants {
            if let RemoteParticipant::Authenticated(teilnehmer) = &entry.participant {
                participants.insert(
                    *id,
                    (teilnehmer.identity().clone(), nickname(teilnehmer.nickname())),
                );
            }
        }

        let snapshot = CallStateSnapshot {
            created_by: self.local,
            created_at_ms: u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default(),
            participants,
        };
        let encrypted_call_state = self
            .derivations
            .state_box
            .verschluesseln(&snapshot.kodieren())?;
        self.send_to_sfu(vec![P2sMessage::UpdateCallState {
            encrypted_call_state,
        }])?;
        self.services.metrics.call_state_updates_total.inc();
        debug!(teilnehmer = snapshot.participants.len(), "Call-Zustand gesendet");
        Ok(())
    }

    /// Startet den Allein-Timer, solange kein Teilnehmer authentifiziert ist
    fn update_loner_timer(&self, data: &mut CallData) {
        let allein = !data
            .participants
            .values()
            .any(|entry| entry.participant.is_authenticated());
        if !allein {
            if data.loner_timer.take().is_some() {
                debug!("Allein-Timer gestoppt");
            }
            return;
        }
        if data.loner_timer.is_some() {
            return;
        }

        let timeout = self.config.allein_timeout();
        let abort = self.abort.clone();
        debug!(timeout_sek = timeout.as_secs(), "Allein-Timer gestartet");
        data.loner_timer = Some(TimerHandle::spawn(async move {
            tokio::select! {
                _ = abort.aborted() => {}
                _ = tokio::time::sleep(timeout) => {
                    info!(timeout_sek = timeout.as_secs(), "Zu lange allein im Call");
                    abort.raise(CallAbort::Backend(BackendAbort::DisconnectedDueToInactivity));
                }
            }
        }));
    }

    // -- Lokale Aktionen -------------------------------------------------------

    fn broadcast_capture(
        &self,
        guard: &mut Guard<'_>,
        device: CaptureDevice,
        on: bool,
    ) -> CallResult<()> {
        guard.ensure_intent(&[LockIntent::BroadcastToParticipants])?;
        if guard.local_capture.get(device) == on {
            return Ok(());
        }
        guard.local_capture.set(device, on);
        info!(%device, on, "Lokaler Aufnahmezustand geaendert");

        for (id, entry) in guard.participants.iter_mut() {
            if entry.abort.is_aborted() {
                continue;
            }
            if let RemoteParticipant::Authenticated(teilnehmer) = &mut entry.participant {
                let frame = teilnehmer.capture_frame(device, on)?;
                self.send_relay(*id, vec![frame])?;
            }
        }
        Ok(())
    }

    async fn check_membership(self: &Arc<Self>, guard: &mut Guard<'_>) -> CallResult<()> {
        guard.ensure_intent(&[LockIntent::GroupUpdate])?;

        for (id, entry) in &guard.participants {
            let Some(identity) = entry.participant.identity() else {
                continue;
            };
            if self.services.membership.lookup(identity).is_none()
                && entry.abort.raise(RemoveCause::MembershipLost)
            {
                info!(participant = %id, %identity, "Kein Gruppenmitglied mehr");
            }
        }

        let zurueckgestellt: Vec<ParticipantId> = guard
            .participants
            .iter()
            .filter(|(_, entry)| {
                !entry.abort.is_aborted()
                    && matches!(&entry.participant,
                        RemoteParticipant::Unauthenticated(teilnehmer) if teilnehmer.hat_backlog())
            })
            .map(|(id, _)| *id)
            .collect();

        for id in zurueckgestellt {
            let data = &mut **guard;
            let ctx = self.handshake_ctx(&data.media_keys);
            let Some(ParticipantEntry {
                participant: RemoteParticipant::Unauthenticated(teilnehmer),
                abort,
            }) = data.participants.get_mut(&id)
            else {
                continue;
            };
            let Some(ergebnis) = teilnehmer.retry_backlog(&ctx) else {
                continue;
            };
            let abort = abort.clone();
            debug!(participant = %id, "Zurueckgestelltes Hello erneut verarbeitet");
            match ergebnis {
                Ok(outcome) => self.apply_handshake_outcome(guard, id, &abort, outcome).await?,
                Err(e) => self.on_participant_error(id, &abort, e)?,
            }
        }
        Ok(())
    }

    // -- Versand ---------------------------------------------------------------

    fn send_relay(&self, receiver: ParticipantId, frames: Vec<Vec<u8>>) -> CallResult<()> {
        if frames.is_empty() {
            return Ok(());
        }
        self.send_to_sfu(
            frames
                .into_iter()
                .map(|encrypted_data| {
                    P2sMessage::Relay(RelayedMessage {
                        sender: self.local,
                        receiver,
                        encrypted_data,
                    })
                })
                .collect(),
        )
    }

    fn send_to_sfu(&self, nachrichten: Vec<P2sMessage>) -> CallResult<()> {
        let envelopes = nachrichten.iter().map(P2sMessage::kodieren).collect();
        self.services
            .transport
            .send_p2s(envelopes)
            .map_err(CallError::Transport)
    }

    fn publish(&self, data: &CallData) {
        let authentifiziert = data
            .participants
            .values()
            .filter(|entry| entry.participant.is_authenticated())
            .count();
        self.services
            .metrics
            .authenticated_participants
            .set(i64::try_from(authentifiziert).unwrap_or(i64::MAX));

        let current = data.media_keys.current();
        self.state_tx.send_modify(|state| {
            state.leader = data.leader;
            state.local_capture = data.local_capture;
            state.participants = data
                .participants
                .iter()
                .map(|(id, entry)| (*id, entry.participant.view()))
                .collect();
            state.epoch = current.epoch;
            state.ratchet_counter = current.ratchet_counter;
        });
    }

    /// Raeumt nach dem Abbruch Teilnehmer und Timer ab
    async fn teardown(self: Arc<Self>) {
        self.abort.aborted().await;
        let cause = self.abort.cause().unwrap_or(CallAbort::UNERWARTET);

        let mut guard = self.lock.lock(LockIntent::AbortParticipant).await;
        guard.epoch_timer = None;
        guard.state_timer = None;
        guard.loner_timer = None;
        guard.participants.clear();
        guard.leader = false;
        drop(guard);

        self.services.metrics.authenticated_participants.set(0);
        self.state_tx.send_modify(|state| {
            state.participants.clear();
            state.leader = false;
            state.aborted = Some(cause);
        });
        info!(?cause, "Call beendet");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use huddle_crypto::{ClientKey, GroupCallKey, RawMediaKeyState};
    use huddle_protocol::MediaKeyMessage;
    use huddle_webrtc::{
        DtlsFingerprint, IcePassword, IceUsernameFragment, SdpStatic, SessionDescription,
    };

    use super::*;
    use crate::backend::{JoinResponse, MediaCryptoBackend, TransportContext};
    use crate::handshake::tests::{ableitungen, pid, TestMembership};
    use crate::state::ParticipantView;

    #[derive(Default)]
    struct TransportLog {
        connects: Vec<ConnectRequest>,
        updates: Vec<DescriptionUpdate>,
        ice_restarts: Vec<SessionDescription>,
        p2s: Vec<P2sMessage>,
    }

    struct TestTransport {
        hello: Vec<ParticipantId>,
        log: Mutex<TransportLog>,
    }

    impl TestTransport {
        fn relays_an(&self, receiver: ParticipantId) -> Vec<Vec<u8>> {
            self.log
                .lock()
                .p2s
                .iter()
                .filter_map(|nachricht| match nachricht {
                    P2sMessage::Relay(relay) if relay.receiver == receiver => {
                        Some(relay.encrypted_data.clone())
                    }
                    _ => None,
                })
                .collect()
        }

        fn call_states(&self) -> Vec<Vec<u8>> {
            self.log
                .lock()
                .p2s
                .iter()
                .filter_map(|nachricht| match nachricht {
                    P2sMessage::UpdateCallState {
                        encrypted_call_state,
                    } => Some(encrypted_call_state.clone()),
                    _ => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl TransportContext for TestTransport {
        async fn connect(&self, request: ConnectRequest) -> anyhow::Result<Vec<ParticipantId>> {
            self.log.lock().connects.push(request);
            Ok(self.hello.clone())
        }

        async fn update(&self, update: DescriptionUpdate) -> anyhow::Result<()> {
            self.log.lock().updates.push(update);
            Ok(())
        }

        async fn restart_ice(&self, description: SessionDescription) -> anyhow::Result<()> {
            self.log.lock().ice_restarts.push(description);
            Ok(())
        }

        fn send_p2s(&self, envelopes: Vec<Vec<u8>>) -> anyhow::Result<()> {
            let mut log = self.log.lock();
            for envelope in envelopes {
                log.p2s.push(P2sMessage::dekodieren(&envelope)?);
            }
            Ok(())
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Medien {
        Lokal(RawMediaKeyState),
        Remote(ParticipantId, Vec<RawMediaKeyState>),
        Entfernt(ParticipantId),
    }

    #[derive(Default)]
    struct TestMedien(Mutex<Vec<Medien>>);

    impl TestMedien {
        fn lokale_epochen(&self) -> Vec<(u32, u8)> {
            self.0
                .lock()
                .iter()
                .filter_map(|ereignis| match ereignis {
                    Medien::Lokal(state) => Some((state.epoch, state.ratchet_counter)),
                    _ => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl MediaCryptoBackend for TestMedien {
        async fn set_local_pcmk(&self, state: RawMediaKeyState) -> anyhow::Result<()> {
            self.0.lock().push(Medien::Lokal(state));
            Ok(())
        }

        async fn add_remote_pcmks(
            &self,
            participant: ParticipantId,
            states: Vec<RawMediaKeyState>,
        ) -> anyhow::Result<()> {
            self.0.lock().push(Medien::Remote(participant, states));
            Ok(())
        }

        async fn remove_remote(&self, participant: ParticipantId) -> anyhow::Result<()> {
            self.0.lock().push(Medien::Entfernt(participant));
            Ok(())
        }
    }

    struct Aufbau {
        call: GroupCall,
        transport: Arc<TestTransport>,
        medien: Arc<TestMedien>,
        membership: Arc<TestMembership>,
        client_key: Arc<ClientKey>,
        gck: GroupCallKey,
    }

    fn sdp_static() -> SdpStatic {
        SdpStatic {
            ice_username_fragment: IceUsernameFragment::new("ufrag").unwrap(),
            ice_password: IcePassword::new("p".repeat(22)).unwrap(),
            dtls_fingerprint: DtlsFingerprint::new(&[0x11; 32]).unwrap(),
        }
    }

    async fn aufbauen(local: u32, hello: &[u32]) -> Aufbau {
        let gck = GroupCallKey::zufaellig();
        let transport = Arc::new(TestTransport {
            hello: hello.iter().map(|id| pid(*id)).collect(),
            log: Mutex::new(TransportLog::default()),
        });
        let medien = Arc::new(TestMedien::default());
        let membership = Arc::new(TestMembership::default());
        let client_key = Arc::new(ClientKey::zufaellig());

        let services = CallServices {
            transport: transport.clone(),
            media_crypto: medien.clone(),
            membership: membership.clone(),
            key_derivation: client_key.clone(),
            metrics: CallMetrics::neu().unwrap(),
        };
        let params = CallParams {
            identity: IdentityString::new("AAAAAAAA").unwrap(),
            nickname: Nickname("anna".into()),
            derivations: ableitungen(&gck),
            join: JoinResponse {
                participant_id: pid(local),
                addresses: vec![
                    "192.0.2.1:443".parse::<SocketAddr>().unwrap(),
                    "[2001:db8::1]:443".parse::<SocketAddr>().unwrap(),
                ],
                sdp_static: sdp_static(),
            },
        };
        let call = GroupCall::create(params, services, CallConfig::default())
            .await
            .unwrap();
        Aufbau {
            call,
            transport,
            medien,
            membership,
            client_key,
            gck,
        }
    }

    /// Laesst die Hintergrund-Tasks laufen
    async fn warten(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    fn s2p(nachricht: S2pMessage) -> Vec<u8> {
        nachricht.kodieren()
    }

    /// Gegenstelle, die den Handshake direkt mit den Zustandsautomaten fuehrt
    struct Gegenstelle {
        id: ParticipantId,
        identity: IdentityString,
        nickname: Nickname,
        client_key: ClientKey,
        pck: LocalCallKey,
        media_keys: LocalMediaKey,
        derivations: GroupCallKeyDerivations,
        membership: TestMembership,
    }

    impl Gegenstelle {
        fn new(id: u32, aufbau: &Aufbau) -> Self {
            let gegenstelle = Self {
                id: pid(id),
                identity: IdentityString::new("BBBBBBBB").unwrap(),
                nickname: Nickname("bea".into()),
                client_key: ClientKey::zufaellig(),
                pck: LocalCallKey::zufaellig(),
                media_keys: LocalMediaKey::neu(),
                derivations: ableitungen(&aufbau.gck),
                membership: TestMembership::default(),
            };
            gegenstelle.membership.0.write().insert(
                IdentityString::new("AAAAAAAA").unwrap(),
                *aufbau.client_key.public(),
            );
            gegenstelle
        }

        fn ctx(&self) -> HandshakeContext<'_> {
            HandshakeContext {
                local: self.id,
                identity: &self.identity,
                nickname: &self.nickname,
                pck: &self.pck,
                gckh: &self.derivations.gckh,
                handshake_box: &self.derivations.handshake_box,
                membership: &self.membership,
                key_derivation: &self.client_key,
                media_keys: &self.media_keys,
            }
        }

        fn relay(&self, receiver: ParticipantId, encrypted_data: Vec<u8>) -> Vec<u8> {
            s2p(S2pMessage::Relay(RelayedMessage {
                sender: self.id,
                receiver,
                encrypted_data,
            }))
        }
    }

    fn ausstehend(outcome: HandshakeOutcome) -> Vec<Vec<u8>> {
        match outcome {
            HandshakeOutcome::Pending { outbound } => outbound,
            andere => panic!("Pending erwartet, erhalten {andere:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn allein_im_call_sendet_zustand_und_laeuft_ab() {
        let aufbau = aufbauen(3, &[3]).await;
        let call = &aufbau.call;

        {
            let log = aufbau.transport.log.lock();
            assert_eq!(log.connects.len(), 1);
            let connect = &log.connects[0];
            assert_eq!(connect.description.version, 0);
            assert_eq!(connect.candidates.len(), 2);
            assert_eq!(connect.initial_pcmk.epoch, 0);
            assert!(log.updates.is_empty());
        }

        warten(10).await;
        let zustand = call.state().borrow().clone();
        assert!(zustand.leader);
        assert!(zustand.local_capture.microphone);
        assert!(!zustand.local_capture.camera);

        let states = aufbau.transport.call_states();
        assert_eq!(states.len(), 1);
        let state_box = ableitungen(&aufbau.gck).state_box;
        let snapshot =
            CallStateSnapshot::dekodieren(&state_box.entschluesseln(&states[0]).unwrap()).unwrap();
        assert_eq!(snapshot.created_by, pid(3));
        assert_eq!(snapshot.participants.len(), 1);
        assert_eq!(
            snapshot.participants[&pid(3)],
            (
                IdentityString::new("AAAAAAAA").unwrap(),
                Some(Nickname("anna".into()))
            )
        );

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(aufbau.transport.call_states().len(), 2);

        assert_eq!(
            call.aborted().await,
            CallAbort::Backend(BackendAbort::DisconnectedDueToInactivity)
        );
        let mut state = call.state();
        let leader = state.wait_for(|s| s.aborted.is_some()).await.unwrap().leader;
        assert!(!leader);
        assert!(matches!(
            call.handle_p2s(&s2p(S2pMessage::ParticipantJoined(pid(5)))).await,
            Err(CallError::Beendet)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn vorhandene_teilnehmer_erhalten_hello() {
        let aufbau = aufbauen(0, &[0, 1, 2, 4, 7]).await;

        for id in [1, 2, 4, 7] {
            assert_eq!(aufbau.transport.relays_an(pid(id)).len(), 1);
        }
        {
            let log = aufbau.transport.log.lock();
            assert_eq!(log.updates.len(), 1);
            assert_eq!(log.updates[0].added, vec![pid(1), pid(2), pid(4), pid(7)]);
            assert_eq!(
                log.updates[0].m_line_order,
                vec![pid(0), pid(1), pid(2), pid(4), pid(7)]
            );
            assert_eq!(log.updates[0].description.version, 1);
        }

        let zustand = aufbau.call.state().borrow().clone();
        // Vier weitere Teilnehmer: Mikrofon startet stumm
        assert!(!zustand.local_capture.microphone);
        assert!(!zustand.leader);
        assert_eq!(zustand.participants[&pid(4)], ParticipantView::Handshake);

        warten(10).await;
        assert!(aufbau.transport.call_states().is_empty());
        aufbau.call.hangup();
    }

    #[tokio::test(start_paused = true)]
    async fn beitritt_dreht_ratchet_weiter() {
        let aufbau = aufbauen(0, &[]).await;
        aufbau
            .call
            .handle_p2s(&s2p(S2pMessage::ParticipantJoined(pid(6))))
            .await
            .unwrap();

        assert_eq!(aufbau.medien.lokale_epochen(), vec![(0, 1)]);
        assert_eq!(aufbau.call.metrics().ratchet_advances_total.get(), 1);
        // Der Neue sendet zuerst
        assert!(aufbau.transport.relays_an(pid(6)).is_empty());
        {
            let log = aufbau.transport.log.lock();
            assert_eq!(log.updates.len(), 1);
            assert_eq!(log.updates[0].added, vec![pid(6)]);
        }
        let zustand = aufbau.call.state().borrow().clone();
        assert_eq!(zustand.ratchet_counter, 1);

        // Doppelter Beitritt aendert nichts
        aufbau
            .call
            .handle_p2s(&s2p(S2pMessage::ParticipantJoined(pid(6))))
            .await
            .unwrap();
        assert_eq!(aufbau.medien.lokale_epochen(), vec![(0, 1)]);
        aufbau.call.hangup();
    }

    #[tokio::test(start_paused = true)]
    async fn zweimaliges_verlassen_ergibt_zwei_epochen() {
        let aufbau = aufbauen(0, &[1, 2]).await;
        let call = &aufbau.call;

        call.handle_p2s(&s2p(S2pMessage::ParticipantLeft(pid(1))))
            .await
            .unwrap();
        call.handle_p2s(&s2p(S2pMessage::ParticipantLeft(pid(2))))
            .await
            .unwrap();
        assert!(aufbau.medien.lokale_epochen().is_empty());

        tokio::time::sleep(Duration::from_millis(2_100)).await;
        assert_eq!(aufbau.medien.lokale_epochen(), vec![(1, 0)]);

        tokio::time::sleep(Duration::from_millis(2_000)).await;
        assert_eq!(aufbau.medien.lokale_epochen(), vec![(1, 0), (2, 0)]);
        assert_eq!(call.metrics().epoch_transitions_total.get(), 2);
        assert_eq!(call.state().borrow().epoch, 2);

        let medien = aufbau.medien.0.lock().clone();
        assert!(medien.contains(&Medien::Entfernt(pid(1))));
        assert!(medien.contains(&Medien::Entfernt(pid(2))));
        assert_eq!(
            call.metrics()
                .participants_removed_total
                .with_label_values(&["sfu-left"])
                .get(),
            2
        );
        {
            let log = aufbau.transport.log.lock();
            let removed: Vec<_> = log.updates.iter().map(|u| u.removed.clone()).collect();
            assert_eq!(removed, vec![vec![], vec![pid(1)], vec![pid(2)]]);
            let versionen: Vec<_> = log.updates.iter().map(|u| u.description.version).collect();
            assert_eq!(versionen, vec![1, 2, 3]);
        }
        call.hangup();
    }

    #[tokio::test(start_paused = true)]
    async fn protokollfehler_entfernt_nur_den_teilnehmer() {
        let aufbau = aufbauen(0, &[1, 2]).await;
        let call = &aufbau.call;

        let muell = s2p(S2pMessage::Relay(RelayedMessage {
            sender: pid(1),
            receiver: pid(0),
            encrypted_data: vec![0u8; 64],
        }));
        call.handle_p2s(&muell).await.unwrap();
        warten(1).await;

        assert!(!call.is_aborted());
        let zustand = call.state().borrow().clone();
        assert!(!zustand.participants.contains_key(&pid(1)));
        assert!(zustand.participants.contains_key(&pid(2)));
        assert_eq!(call.metrics().protocol_errors_total.get(), 1);
        assert_eq!(
            call.metrics()
                .participants_removed_total
                .with_label_values(&["protocol-error"])
                .get(),
            1
        );

        // Weitere Nachrichten des Entfernten werden ignoriert
        call.handle_p2s(&muell).await.unwrap();
        warten(1).await;
        assert_eq!(call.metrics().protocol_errors_total.get(), 1);
        call.hangup();
    }

    #[tokio::test(start_paused = true)]
    async fn fremde_und_ungueltige_nachrichten_werden_verworfen() {
        let aufbau = aufbauen(0, &[1]).await;
        let call = &aufbau.call;

        call.handle_p2s(b"\xff\xff\xff").await.unwrap();
        call.handle_p2s(&s2p(S2pMessage::Hello(vec![pid(1)])))
            .await
            .unwrap();
        // Unbekannter Absender
        call.handle_p2s(&s2p(S2pMessage::Relay(RelayedMessage {
            sender: pid(9),
            receiver: pid(0),
            encrypted_data: vec![1, 2, 3],
        })))
        .await
        .unwrap();
        // Anderer Empfaenger
        call.handle_p2s(&s2p(S2pMessage::Relay(RelayedMessage {
            sender: pid(1),
            receiver: pid(5),
            encrypted_data: vec![1, 2, 3],
        })))
        .await
        .unwrap();
        call.handle_p2s(&s2p(S2pMessage::ParticipantLeft(pid(9))))
            .await
            .unwrap();
        warten(1).await;

        assert!(!call.is_aborted());
        assert_eq!(call.metrics().protocol_errors_total.get(), 0);
        assert!(call.state().borrow().participants.contains_key(&pid(1)));
        call.hangup();
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_mit_gegenstelle() {
        let aufbau = aufbauen(0, &[1]).await;
        let call = &aufbau.call;
        let b = Gegenstelle::new(1, &aufbau);
        aufbau
            .membership
            .0
            .write()
            .insert(b.identity.clone(), *b.client_key.public());

        // Gegenstelle erhaelt unser Hello und antwortet mit Hello + Auth
        let hello = aufbau.transport.relays_an(pid(1));
        let (mut b_sicht, _) =
            UnauthenticatedParticipant::new(pid(0), HandshakeInitiator::Remote, &b.ctx()).unwrap();
        let antwort = ausstehend(b_sicht.handle_p2p(&b.ctx(), &hello[0]).unwrap());
        for frame in antwort {
            call.handle_p2s(&b.relay(pid(0), frame)).await.unwrap();
        }

        let zustand = call.state().borrow().clone();
        assert!(matches!(
            &zustand.participants[&pid(1)],
            ParticipantView::Authenticated { identity, .. } if *identity == b.identity
        ));
        // 0 < 1: wir sind Leader
        assert!(zustand.leader);
        assert_eq!(call.metrics().handshakes_total.get(), 1);
        assert_eq!(call.metrics().authenticated_participants.get(), 1);
        assert!(aufbau
            .medien
            .0
            .lock()
            .contains(&Medien::Remote(pid(1), b.media_keys.all())));

        // Unser Auth plus Aufnahmezustand erreichen die Gegenstelle
        let frames = aufbau.transport.relays_an(pid(1));
        assert_eq!(frames.len(), 4);
        let HandshakeOutcome::Authenticated(init) = b_sicht.handle_p2p(&b.ctx(), &frames[1]).unwrap()
        else {
            panic!("Authentifizierung erwartet");
        };
        let b_authentication =
            AuthenticatedParticipant::new(pid(0), *init, CaptureState::default()).unwrap();
        let mut b_auth = b_authentication.participant;
        for frame in b_authentication.outbound {
            call.handle_p2s(&b.relay(pid(0), frame)).await.unwrap();
        }
        assert_eq!(
            b_auth.handle_p2p(&frames[2]).unwrap(),
            Some(RemoteUpdate::CaptureState(huddle_protocol::CaptureStateMessage {
                device: CaptureDevice::Microphone,
                on: true
            }))
        );
        b_auth.handle_p2p(&frames[3]).unwrap();

        // Mikrofon wurde automatisch abonniert
        assert!(aufbau.transport.log.lock().p2s.contains(&P2sMessage::Microphone {
            participant: pid(1),
            subscribe: true
        }));

        // Rekey der Gegenstelle wird an die Medien-Krypto weitergegeben
        let neu = MediaKeyMessage {
            epoch: 1,
            ratchet_counter: 0,
            pcmk: [7u8; 32],
        };
        let frame = b_auth.rekey_frame(&RawMediaKeyState::from(&neu)).unwrap();
        call.handle_p2s(&b.relay(pid(0), frame)).await.unwrap();
        assert!(aufbau
            .medien
            .0
            .lock()
            .contains(&Medien::Remote(pid(1), vec![RawMediaKeyState::from(&neu)])));

        // Kamera der Gegenstelle wird mitverfolgt
        let frame = b_auth.capture_frame(CaptureDevice::Camera, true).unwrap();
        call.handle_p2s(&b.relay(pid(0), frame)).await.unwrap();
        assert!(matches!(
            &call.state().borrow().participants[&pid(1)],
            ParticipantView::Authenticated { capture, .. } if capture.camera
        ));

        // Lokale Kamera an: Gegenstelle erfaehrt es
        call.local_capture_state(CaptureDevice::Camera, true)
            .await
            .unwrap();
        let frames = aufbau.transport.relays_an(pid(1));
        assert_eq!(
            b_auth.handle_p2p(frames.last().unwrap()).unwrap(),
            Some(RemoteUpdate::CaptureState(huddle_protocol::CaptureStateMessage {
                device: CaptureDevice::Camera,
                on: true
            }))
        );

        // Verlassen startet einen Epoch-Wechsel, der Rekey erreicht niemanden mehr
        call.handle_p2s(&s2p(S2pMessage::ParticipantLeft(pid(1))))
            .await
            .unwrap();
        assert_eq!(call.metrics().authenticated_participants.get(), 0);
        call.hangup();
    }

    /// Fuehrt den Handshake der Gegenstelle mit dem Call bis zur
    /// Authentifizierung auf beiden Seiten
    async fn authentifizieren(aufbau: &Aufbau, b: &Gegenstelle) -> AuthenticatedParticipant {
        aufbau
            .membership
            .0
            .write()
            .insert(b.identity.clone(), *b.client_key.public());
        let call = &aufbau.call;

        let hello = aufbau.transport.relays_an(b.id);
        let (mut b_sicht, _) =
            UnauthenticatedParticipant::new(pid(0), HandshakeInitiator::Remote, &b.ctx()).unwrap();
        for frame in ausstehend(b_sicht.handle_p2p(&b.ctx(), &hello[0]).unwrap()) {
            call.handle_p2s(&b.relay(pid(0), frame)).await.unwrap();
        }

        let frames = aufbau.transport.relays_an(b.id);
        let HandshakeOutcome::Authenticated(init) = b_sicht.handle_p2p(&b.ctx(), &frames[1]).unwrap()
        else {
            panic!("Authentifizierung erwartet");
        };
        let authentication =
            AuthenticatedParticipant::new(pid(0), *init, CaptureState::default()).unwrap();
        let mut b_auth = authentication.participant;
        for frame in authentication.outbound {
            call.handle_p2s(&b.relay(pid(0), frame)).await.unwrap();
        }
        for frame in &frames[2..] {
            b_auth.handle_p2p(frame).unwrap();
        }
        b_auth
    }

    fn rekey_erwartet(b_auth: &mut AuthenticatedParticipant, frame: &[u8]) -> RawMediaKeyState {
        match b_auth.handle_p2p(frame).unwrap() {
            Some(RemoteUpdate::MediaKey(state)) => state,
            andere => panic!("Rekey erwartet, erhalten: {andere:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rekey_nach_verlassen_erreicht_nur_authentifizierte() {
        let aufbau = aufbauen(0, &[1, 2, 3]).await;
        let call = &aufbau.call;
        let b = Gegenstelle::new(1, &aufbau);
        let mut b_auth = authentifizieren(&aufbau, &b).await;
        assert_eq!(call.metrics().authenticated_participants.get(), 1);

        let an_b = aufbau.transport.relays_an(pid(1)).len();
        let an_zwei = aufbau.transport.relays_an(pid(2)).len();
        let an_drei = aufbau.transport.relays_an(pid(3)).len();

        // 2 verlaesst den Call: b erhaelt den neuen Schluessel sofort,
        // 3 steckt noch im Handshake und bekommt ihn erst nach der Auth
        call.handle_p2s(&s2p(S2pMessage::ParticipantLeft(pid(2))))
            .await
            .unwrap();
        let frames = aufbau.transport.relays_an(pid(1));
        assert_eq!(frames.len(), an_b + 1);
        let erster = rekey_erwartet(&mut b_auth, frames.last().unwrap());
        assert_eq!(erster.epoch, 1);
        assert_eq!(erster.ratchet_counter, 0);
        assert_eq!(aufbau.transport.relays_an(pid(2)).len(), an_zwei);
        assert_eq!(aufbau.transport.relays_an(pid(3)).len(), an_drei);
        assert!(aufbau.medien.lokale_epochen().is_empty());

        // Zweites Verlassen innerhalb der Wartezeit: nur vorgemerkt
        warten(500).await;
        call.handle_p2s(&s2p(S2pMessage::ParticipantLeft(pid(3))))
            .await
            .unwrap();
        assert_eq!(aufbau.transport.relays_an(pid(1)).len(), an_b + 1);
        assert_eq!(call.state().borrow().epoch, 0);

        // Nach 2 s: Epoch 1 angewendet, Epoch 2 sofort verteilt
        warten(1600).await;
        assert_eq!(call.state().borrow().epoch, 1);
        assert!(aufbau.medien.0.lock().contains(&Medien::Lokal(erster)));
        let frames = aufbau.transport.relays_an(pid(1));
        assert_eq!(frames.len(), an_b + 2);
        let zweiter = rekey_erwartet(&mut b_auth, frames.last().unwrap());
        assert_eq!(zweiter.epoch, 2);

        warten(2100).await;
        assert_eq!(call.state().borrow().epoch, 2);
        assert_eq!(aufbau.medien.lokale_epochen(), vec![(1, 0), (2, 0)]);
        assert!(aufbau.medien.0.lock().contains(&Medien::Lokal(zweiter)));
        assert_eq!(call.metrics().epoch_transitions_total.get(), 2);
        assert!(!call.is_aborted());
        call.hangup();
    }

    #[tokio::test(start_paused = true)]
    async fn abonnements_und_ice_restart() {
        let aufbau = aufbauen(0, &[1]).await;
        let call = &aufbau.call;

        // Nicht authentifiziert: ignoriert
        call.remote_microphone(pid(1), true).await.unwrap();
        call.remote_camera(
            pid(1),
            Some(Resolution {
                width: 640,
                height: 360,
            }),
        )
        .await
        .unwrap();
        assert!(!aufbau
            .transport
            .log
            .lock()
            .p2s
            .iter()
            .any(|n| matches!(n, P2sMessage::Microphone { .. } | P2sMessage::Camera { .. })));

        call.trigger_ice_restart().await.unwrap();
        {
            let log = aufbau.transport.log.lock();
            assert_eq!(log.ice_restarts.len(), 1);
            assert_eq!(log.ice_restarts[0].version, 2);
        }
        call.hangup();
    }

    #[tokio::test(start_paused = true)]
    async fn zurueckgestelltes_hello_nach_gruppenaenderung() {
        let aufbau = aufbauen(0, &[]).await;
        let call = &aufbau.call;
        call.handle_p2s(&s2p(S2pMessage::ParticipantJoined(pid(2))))
            .await
            .unwrap();

        // Gegenstelle ist neu und sendet zuerst, ist uns aber noch unbekannt
        let b = Gegenstelle::new(2, &aufbau);
        let (mut b_sicht, hello) =
            UnauthenticatedParticipant::new(pid(0), HandshakeInitiator::Local, &b.ctx()).unwrap();
        call.handle_p2s(&b.relay(pid(0), hello[0].clone()))
            .await
            .unwrap();
        assert!(aufbau.transport.relays_an(pid(2)).is_empty());

        aufbau
            .membership
            .0
            .write()
            .insert(b.identity.clone(), *b.client_key.public());
        call.group_membership_changed().await.unwrap();

        let antwort = aufbau.transport.relays_an(pid(2));
        assert_eq!(antwort.len(), 2);
        let auth = ausstehend(b_sicht.handle_p2p(&b.ctx(), &antwort[0]).unwrap());
        assert!(matches!(
            b_sicht.handle_p2p(&b.ctx(), &antwort[1]).unwrap(),
            HandshakeOutcome::Authenticated(_)
        ));
        call.handle_p2s(&b.relay(pid(0), auth[0].clone()))
            .await
            .unwrap();
        assert_eq!(call.metrics().handshakes_total.get(), 1);

        // Mitgliedschaft entzogen: Teilnehmer wird entfernt
        aufbau.membership.0.write().clear();
        call.group_membership_changed().await.unwrap();
        warten(1).await;
        assert!(call.state().borrow().participants.is_empty());
        assert_eq!(
            call.metrics()
                .participants_removed_total
                .with_label_values(&["membership-lost"])
                .get(),
            1
        );
        call.hangup();
    }
}
