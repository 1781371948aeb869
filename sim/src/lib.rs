//! # huddle-sim
//!
//! Lokale Simulation von Gruppencalls: ein Loopback-SFU vergibt Teilnehmer-IDs,
//! leitet Relay-Nachrichten weiter und meldet Beitritte und Austritte. Jeder
//! simulierte Teilnehmer ist ein vollwertiger [`GroupCall`] mit eigenem
//! Identitaetsschluessel.

pub mod config;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use huddle_call::{
    CallConfig, CallParams, CallServices, ConnectRequest, ContactRef, DescriptionUpdate,
    GroupCall, GroupMember, GroupMembership, JoinResponse, MediaCryptoBackend, OngoingCallState,
    TransportContext,
};
use huddle_core::{GroupIdentity, IdentityString, Nickname, ParticipantId};
use huddle_crypto::{
    frame_key, ClientKey, CryptoResult, GroupCallKey, GroupCallKeyDerivations,
    GroupCallKeyHash, GroupCallParams, IdentityPublicKey, RawMediaKeyState, RemoteMediaKey,
    SecretKey,
};
use huddle_observability::CallMetrics;
use huddle_protocol::{CallStateSnapshot, P2sMessage, Resolution, S2pMessage};
use huddle_webrtc::{
    DtlsFingerprint, IcePassword, IceUsernameFragment, SdpStatic, SessionDescription,
};

use crate::config::{SimConfig, SimEinstellungen};

/// Protokollversion der simulierten Calls
pub const PROTOKOLL_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Loopback-SFU
// ---------------------------------------------------------------------------

type Sender = mpsc::UnboundedSender<Vec<u8>>;

/// SFU im selben Prozess
///
/// Teilnehmer werden mit [`LoopbackSfu::join`] angemeldet und erst mit dem
/// Verbindungsaufbau ihres Calls fuer die anderen sichtbar.
pub struct LoopbackSfu {
    sdp_static: SdpStatic,
    adressen: Vec<SocketAddr>,
    naechste_id: AtomicU32,
    wartend: DashMap<ParticipantId, Sender>,
    verbunden: DashMap<ParticipantId, Sender>,
    mikrofone: DashMap<(ParticipantId, ParticipantId), bool>,
    kameras: DashMap<(ParticipantId, ParticipantId), Option<Resolution>>,
    /// Gesendete Relay-Nachrichten je (Absender, Empfaenger), auch verworfene
    relays: DashMap<(ParticipantId, ParticipantId), usize>,
    call_state: Mutex<Option<(ParticipantId, Vec<u8>)>>,
}

impl LoopbackSfu {
    pub fn new() -> anyhow::Result<Arc<Self>> {
        let sdp_static = SdpStatic {
            ice_username_fragment: IceUsernameFragment::new("loop")?,
            ice_password: IcePassword::new("huddle-loopback-passwort")?,
            dtls_fingerprint: DtlsFingerprint::new(&[0x5a; 32])?,
        };
        Ok(Arc::new(Self {
            sdp_static,
            adressen: vec![
                SocketAddr::from(([127, 0, 0, 1], 4430)),
                SocketAddr::from(([0, 0, 0, 0, 0, 0, 0, 1], 4430)),
            ],
            naechste_id: AtomicU32::new(0),
            wartend: DashMap::new(),
            verbunden: DashMap::new(),
            mikrofone: DashMap::new(),
            kameras: DashMap::new(),
            relays: DashMap::new(),
            call_state: Mutex::new(None),
        }))
    }

    /// Vergibt eine Teilnehmer-ID und liefert den Empfangskanal fuer
    /// SFU-Nachrichten an diesen Teilnehmer
    pub fn join(&self) -> anyhow::Result<(JoinResponse, mpsc::UnboundedReceiver<Vec<u8>>)> {
        let id = ParticipantId::new(self.naechste_id.fetch_add(1, Ordering::Relaxed))?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.wartend.insert(id, tx);
        tracing::debug!(participant = %id, "SFU: Teilnehmer angemeldet");
        Ok((
            JoinResponse {
                participant_id: id,
                addresses: self.adressen.clone(),
                sdp_static: self.sdp_static.clone(),
            },
            rx,
        ))
    }

    /// Verbindet einen angemeldeten Teilnehmer und liefert das SFU-Hello
    fn verbinden(&self, id: ParticipantId) -> anyhow::Result<Vec<ParticipantId>> {
        let (_, tx) = self
            .wartend
            .remove(&id)
            .ok_or_else(|| anyhow::anyhow!("{id} ist nicht angemeldet"))?;

        self.senden_an_alle(&S2pMessage::ParticipantJoined(id));
        self.verbunden.insert(id, tx);

        let mut hello: Vec<ParticipantId> =
            self.verbunden.iter().map(|eintrag| *eintrag.key()).collect();
        hello.sort();
        tracing::info!(participant = %id, teilnehmer = hello.len(), "SFU: Teilnehmer verbunden");
        Ok(hello)
    }

    /// Verarbeitet einen `ParticipantToSfu`-Envelope
    fn empfangen(&self, sender: ParticipantId, envelope: &[u8]) -> anyhow::Result<()> {
        match P2sMessage::dekodieren(envelope)? {
            P2sMessage::Relay(relay) => {
                if relay.sender != sender {
                    anyhow::bail!(
                        "{sender} hat eine Relay-Nachricht mit Absender {} gesendet",
                        relay.sender
                    );
                }
                let receiver = relay.receiver;
                *self.relays.entry((sender, receiver)).or_insert(0) += 1;
                match self.verbunden.get(&receiver) {
                    Some(tx) => {
                        // Empfaenger kann gerade gehen, dann verfaellt die Nachricht
                        let _ = tx.send(S2pMessage::Relay(relay).kodieren());
                    }
                    None => {
                        tracing::debug!(
                            sender = %sender,
                            receiver = %receiver,
                            "SFU: Relay an unbekannten Teilnehmer verworfen"
                        );
                    }
                }
            }
            P2sMessage::UpdateCallState {
                encrypted_call_state,
            } => {
                tracing::debug!(participant = %sender, "SFU: Call-Zustand aktualisiert");
                *self.call_state.lock() = Some((sender, encrypted_call_state));
            }
            P2sMessage::Microphone {
                participant,
                subscribe,
            } => {
                self.mikrofone.insert((sender, participant), subscribe);
            }
            P2sMessage::Camera {
                participant,
                subscribe,
            } => {
                self.kameras.insert((sender, participant), subscribe);
            }
        }
        Ok(())
    }

    /// Meldet einen Teilnehmer ab. Mehrfaches Abmelden ist wirkungslos.
    pub fn verlassen(&self, id: ParticipantId) {
        self.wartend.remove(&id);
        if self.verbunden.remove(&id).is_some() {
            tracing::info!(participant = %id, "SFU: Teilnehmer hat den Call verlassen");
            self.senden_an_alle(&S2pMessage::ParticipantLeft(id));
        }
    }

    fn senden_an_alle(&self, nachricht: &S2pMessage) {
        let frame = nachricht.kodieren();
        for eintrag in self.verbunden.iter() {
            let _ = eintrag.value().send(frame.clone());
        }
    }

    /// Verbundene Teilnehmer in aufsteigender Reihenfolge
    pub fn teilnehmer(&self) -> Vec<ParticipantId> {
        let mut ids: Vec<ParticipantId> =
            self.verbunden.iter().map(|eintrag| *eintrag.key()).collect();
        ids.sort();
        ids
    }

    /// Zuletzt empfangener verschluesselter Call-Zustand und dessen Absender
    pub fn letzter_call_state(&self) -> Option<(ParticipantId, Vec<u8>)> {
        self.call_state.lock().clone()
    }

    /// Anzahl der Relay-Nachrichten, die `von` an `an` gesendet hat
    pub fn relays(&self, von: ParticipantId, an: ParticipantId) -> usize {
        self.relays.get(&(von, an)).map(|anzahl| *anzahl).unwrap_or(0)
    }

    pub fn mikrofon_abonniert(&self, von: ParticipantId, ziel: ParticipantId) -> bool {
        self.mikrofone
            .get(&(von, ziel))
            .map(|abo| *abo)
            .unwrap_or(false)
    }

    pub fn kamera_abo(&self, von: ParticipantId, ziel: ParticipantId) -> Option<Resolution> {
        self.kameras.get(&(von, ziel)).and_then(|abo| *abo)
    }
}

/// Verbindung eines Teilnehmers zum [`LoopbackSfu`]
///
/// Der Anfangsschluessel aus dem Verbindungsaufbau geht direkt an die
/// Medien-Krypto, spaetere Schluessel setzt der Call selbst.
pub struct LoopbackTransport {
    sfu: Arc<LoopbackSfu>,
    id: ParticipantId,
    medien: Arc<RecordingMediaCrypto>,
    sdp_version: AtomicU64,
}

impl LoopbackTransport {
    pub fn new(
        sfu: Arc<LoopbackSfu>,
        id: ParticipantId,
        medien: Arc<RecordingMediaCrypto>,
    ) -> Self {
        Self {
            sfu,
            id,
            medien,
            sdp_version: AtomicU64::new(0),
        }
    }

    /// Neue Descriptions muessen eine hoehere Version tragen
    fn version_pruefen(&self, description: &SessionDescription) -> anyhow::Result<()> {
        let vorher = self.sdp_version.fetch_max(description.version, Ordering::AcqRel);
        if description.version <= vorher {
            anyhow::bail!(
                "SDP-Version {} folgt nicht auf {vorher}",
                description.version
            );
        }
        Ok(())
    }
}

#[async_trait]
impl TransportContext for LoopbackTransport {
    async fn connect(&self, request: ConnectRequest) -> anyhow::Result<Vec<ParticipantId>> {
        if request.local != self.id {
            anyhow::bail!("Verbindungsaufbau fuer fremde ID {}", request.local);
        }
        self.sdp_version
            .store(request.description.version, Ordering::Release);
        *self.medien.lokal.lock() = Some(request.initial_pcmk);
        tracing::debug!(
            participant = %self.id,
            call = %request.call_id.gekuerzt(),
            kandidaten = request.candidates.len(),
            "Verbindung zum Loopback-SFU"
        );
        self.sfu.verbinden(self.id)
    }

    async fn update(&self, update: DescriptionUpdate) -> anyhow::Result<()> {
        self.version_pruefen(&update.description)?;
        tracing::debug!(
            participant = %self.id,
            version = update.description.version,
            hinzugefuegt = update.added.len(),
            entfernt = update.removed.len(),
            "Remote-Description angewendet"
        );
        Ok(())
    }

    async fn restart_ice(&self, description: SessionDescription) -> anyhow::Result<()> {
        self.version_pruefen(&description)?;
        tracing::debug!(participant = %self.id, "ICE-Restart");
        Ok(())
    }

    fn send_p2s(&self, envelopes: Vec<Vec<u8>>) -> anyhow::Result<()> {
        for envelope in envelopes {
            self.sfu.empfangen(self.id, &envelope)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Medien und Gruppe
// ---------------------------------------------------------------------------

/// Merkt sich die Medienschluessel, statt Frames zu verschluesseln
#[derive(Default)]
pub struct RecordingMediaCrypto {
    lokal: Mutex<Option<RawMediaKeyState>>,
    remote: DashMap<ParticipantId, RemoteMediaKey>,
}

impl RecordingMediaCrypto {
    pub fn lokal(&self) -> Option<RawMediaKeyState> {
        self.lokal.lock().clone()
    }

    /// Neuester bekannter Schluessel eines entfernten Teilnehmers
    pub fn remote(&self, participant: ParticipantId) -> Option<RawMediaKeyState> {
        self.remote
            .get(&participant)
            .map(|key| key.value().latest().clone())
    }

    /// Frame-Schluessel, mit dem eigene Medien gerade verschluesselt wuerden
    pub fn lokaler_frame_schluessel(
        &self,
        gckh: &GroupCallKeyHash,
    ) -> CryptoResult<Option<SecretKey>> {
        self.lokal
            .lock()
            .as_ref()
            .map(|state| frame_key(&state.pcmk, gckh))
            .transpose()
    }

    /// Frame-Schluessel fuer einen empfangenen Frame mit dem gegebenen
    /// Ratchet-Zaehler
    ///
    /// Der Sender dreht seinen Ratchet bei jedem Beitritt still weiter, der
    /// Empfaenger zieht anhand des Zaehlers im Frame nach. Frames mit einem
    /// aelteren Zaehler ergeben `None`.
    pub fn remote_frame_schluessel(
        &self,
        participant: ParticipantId,
        ratchet_counter: u8,
        gckh: &GroupCallKeyHash,
    ) -> CryptoResult<Option<SecretKey>> {
        let Some(mut key) = self.remote.get_mut(&participant) else {
            return Ok(None);
        };
        key.align_with(ratchet_counter)?
            .map(|state| frame_key(&state.pcmk, gckh))
            .transpose()
    }
}

#[async_trait]
impl MediaCryptoBackend for RecordingMediaCrypto {
    async fn set_local_pcmk(&self, state: RawMediaKeyState) -> anyhow::Result<()> {
        *self.lokal.lock() = Some(state);
        Ok(())
    }

    async fn add_remote_pcmks(
        &self,
        participant: ParticipantId,
        states: Vec<RawMediaKeyState>,
    ) -> anyhow::Result<()> {
        for state in states {
            match self.remote.get_mut(&participant) {
                Some(mut bekannt) => {
                    bekannt.update(state);
                }
                None => {
                    self.remote.insert(participant, RemoteMediaKey::new(state));
                }
            }
        }
        Ok(())
    }

    async fn remove_remote(&self, participant: ParticipantId) -> anyhow::Result<()> {
        self.remote.remove(&participant);
        Ok(())
    }
}

/// Feste Mitgliederliste der simulierten Gruppe
#[derive(Default)]
pub struct StaticMembership(RwLock<HashMap<IdentityString, IdentityPublicKey>>);

impl StaticMembership {
    pub fn eintragen(&self, identity: IdentityString, key: IdentityPublicKey) {
        self.0.write().insert(identity, key);
    }

    pub fn austragen(&self, identity: &IdentityString) -> bool {
        self.0.write().remove(identity).is_some()
    }
}

impl GroupMembership for StaticMembership {
    fn lookup(&self, identity: &IdentityString) -> Option<GroupMember> {
        self.0.read().get(identity).map(|key| GroupMember {
            contact: ContactRef::Contact(identity.clone()),
            public_key: *key,
        })
    }
}

// ---------------------------------------------------------------------------
// Gruppe und Teilnehmer
// ---------------------------------------------------------------------------

/// Eine simulierte Gruppe mit gemeinsamem Gruppencall-Schluessel
pub struct SimGruppe {
    sfu: Arc<LoopbackSfu>,
    params: GroupCallParams,
    membership: Arc<StaticMembership>,
    config: CallConfig,
}

impl SimGruppe {
    pub fn new(
        sfu: Arc<LoopbackSfu>,
        einstellungen: &SimEinstellungen,
        config: CallConfig,
    ) -> anyhow::Result<Self> {
        let params = GroupCallParams {
            group: GroupIdentity {
                creator: IdentityString::new("HUDDLE01")?,
                group_id: einstellungen.gruppen_id,
            },
            protocol_version: PROTOKOLL_VERSION,
            gck: GroupCallKey::zufaellig(),
            sfu_base_url: einstellungen.sfu_url.clone(),
        };
        Ok(Self {
            sfu,
            params,
            membership: Arc::new(StaticMembership::default()),
            config,
        })
    }

    pub fn sfu(&self) -> &Arc<LoopbackSfu> {
        &self.sfu
    }

    pub fn membership(&self) -> &Arc<StaticMembership> {
        &self.membership
    }

    pub fn ableitungen(&self) -> anyhow::Result<GroupCallKeyDerivations> {
        Ok(GroupCallKeyDerivations::ableiten(&self.params)?)
    }

    /// Traegt die Identitaet in die Gruppe ein und tritt dem Call bei
    pub async fn beitreten(
        &self,
        identity: &str,
        nickname: &str,
    ) -> anyhow::Result<SimTeilnehmer> {
        let identity = IdentityString::new(identity)?;
        let client_key = Arc::new(ClientKey::zufaellig());
        self.membership
            .eintragen(identity.clone(), *client_key.public());

        let (join, empfang) = self.sfu.join()?;
        let id = join.participant_id;
        let medien = Arc::new(RecordingMediaCrypto::default());
        let services = CallServices {
            transport: Arc::new(LoopbackTransport::new(
                self.sfu.clone(),
                id,
                medien.clone(),
            )),
            media_crypto: medien.clone(),
            membership: self.membership.clone(),
            key_derivation: client_key,
            metrics: CallMetrics::neu()?,
        };
        let params = CallParams {
            identity,
            nickname: Nickname(nickname.to_string()),
            derivations: self.ableitungen()?,
            join,
        };

        let call = match GroupCall::create(params, services, self.config.clone()).await {
            Ok(call) => call,
            Err(e) => {
                self.sfu.verlassen(id);
                return Err(e.into());
            }
        };
        let pumpe = tokio::spawn(pumpen(call.clone(), self.sfu.clone(), empfang));
        Ok(SimTeilnehmer {
            call,
            medien,
            sfu: self.sfu.clone(),
            pumpe,
        })
    }

    /// Entschluesselt den zuletzt beim SFU eingegangenen Call-Zustand
    pub fn call_state(&self) -> anyhow::Result<Option<CallStateSnapshot>> {
        let Some((_, verschluesselt)) = self.sfu.letzter_call_state() else {
            return Ok(None);
        };
        let klartext = self.ableitungen()?.state_box.entschluesseln(&verschluesselt)?;
        Ok(Some(CallStateSnapshot::dekodieren(&klartext)?))
    }
}

/// Leitet SFU-Nachrichten an den Call weiter, bis dieser beendet ist
async fn pumpen(
    call: GroupCall,
    sfu: Arc<LoopbackSfu>,
    mut empfang: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    loop {
        tokio::select! {
            biased;
            abbruch = call.aborted() => {
                tracing::info!(participant = %call.local(), ?abbruch, "Call beendet");
                break;
            }
            frame = empfang.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = call.handle_p2s(&frame).await {
                    tracing::warn!(
                        participant = %call.local(),
                        "SFU-Nachricht nicht verarbeitet: {e}"
                    );
                }
            }
        }
    }
    sfu.verlassen(call.local());
}

/// Ein simulierter Teilnehmer
pub struct SimTeilnehmer {
    call: GroupCall,
    medien: Arc<RecordingMediaCrypto>,
    sfu: Arc<LoopbackSfu>,
    pumpe: JoinHandle<()>,
}

impl SimTeilnehmer {
    pub fn id(&self) -> ParticipantId {
        self.call.local()
    }

    pub fn call(&self) -> &GroupCall {
        &self.call
    }

    pub fn medien(&self) -> &RecordingMediaCrypto {
        &self.medien
    }

    pub fn zustand(&self) -> OngoingCallState {
        let state = self.call.state();
        let zustand = state.borrow().clone();
        zustand
    }

    /// Legt auf und meldet den Teilnehmer beim SFU ab
    pub async fn verlassen(self) {
        self.call.hangup();
        self.sfu.verlassen(self.call.local());
        if let Err(e) = self.pumpe.await {
            tracing::warn!("Empfangs-Task nicht sauber beendet: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// Simulationslauf
// ---------------------------------------------------------------------------

/// Ergebnis eines Simulationslaufs
#[derive(Debug)]
pub struct SimBericht {
    /// Zustand der am Ende noch verbundenen Teilnehmer
    pub teilnehmer: Vec<OngoingCallState>,
    /// Letzter vom Leader gesendeter Call-Zustand
    pub call_state: Option<CallStateSnapshot>,
}

/// Fuehrt eine Simulation gemaess Konfiguration aus
pub async fn simulation_ausfuehren(config: &SimConfig) -> anyhow::Result<SimBericht> {
    let sfu = LoopbackSfu::new()?;
    let gruppe = SimGruppe::new(sfu, &config.sim, config.call.clone())?;

    let mut teilnehmer = Vec::new();
    for nummer in 0..config.sim.teilnehmer {
        let identity = format!("SIM{nummer:05}");
        let beigetreten = gruppe
            .beitreten(&identity, &format!("teilnehmer-{nummer}"))
            .await?;
        tracing::info!(
            participant = %beigetreten.id(),
            identity = %identity,
            "Teilnehmer beigetreten"
        );
        teilnehmer.push(beigetreten);
    }

    let laufzeit = Duration::from_secs(config.sim.laufzeit_sek);
    let mut verstrichen = Duration::ZERO;
    if let Some(nach) = config.sim.verlassen_nach_sek {
        let nach = Duration::from_secs(nach).min(laufzeit);
        tokio::time::sleep(nach).await;
        verstrichen = nach;
        if let Some(letzter) = teilnehmer.pop() {
            tracing::info!(participant = %letzter.id(), "Teilnehmer verlaesst den Call");
            letzter.verlassen().await;
        }
    }
    tokio::time::sleep(laufzeit.saturating_sub(verstrichen)).await;

    let bericht = SimBericht {
        teilnehmer: teilnehmer.iter().map(SimTeilnehmer::zustand).collect(),
        call_state: gruppe.call_state()?,
    };
    for zustand in &bericht.teilnehmer {
        tracing::info!(
            participant = %zustand.local,
            leader = zustand.leader,
            epoch = zustand.epoch,
            ratchet = zustand.ratchet_counter,
            authentifiziert = zustand.authenticated().count(),
            "Zustand am Ende der Simulation"
        );
    }
    if let Some(erster) = teilnehmer.first() {
        tracing::debug!(metriken = %erster.call().metrics().exportieren()?, "Metriken");
    }

    for eintrag in teilnehmer {
        eintrag.verlassen().await;
    }
    Ok(bericht)
}
