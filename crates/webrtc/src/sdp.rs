//! Erzeugung der Remote-Session-Description
//!
//! Aufbau:
//! 1. Session-Zeilen (ICE-Lite, DTLS passiv, alle MIDs gebuendelt)
//! 2. Lokale Zeilen, immer aktiv: Mikrofon (`recvonly`), Kamera (`recvonly`
//!    mit Simulcast `l;m;h`) und der SCTP-Datenkanal
//! 3. Pro entferntem Teilnehmer in m-Line-Reihenfolge: Mikrofon und Kamera,
//!    `sendonly` wenn aktiv, sonst `inactive` mit Port 0
//!
//! m-Lines werden nie entfernt, nur deaktiviert. Codecs und Header-Extension-IDs
//! sind fest vorgegeben und muessen mit dem SFU uebereinstimmen.

use std::collections::BTreeSet;

use huddle_core::ParticipantId;
use tracing::debug;

use crate::error::{WebRtcError, WebRtcResult};
use crate::ice::{DtlsFingerprint, IcePassword, IceUsernameFragment};
use crate::mids::mids;

// ---------------------------------------------------------------------------
// Feste Tabellen
// ---------------------------------------------------------------------------

struct Codec {
    name: &'static str,
    payload_type: u8,
    clock_rate: u32,
    channels: Option<u8>,
    feedback: &'static [&'static str],
    fmtp: Option<&'static str>,
}

struct HeaderExtension {
    id: u8,
    uri: &'static str,
}

const MICROPHONE_CODECS: &[Codec] = &[Codec {
    name: "opus",
    payload_type: 111,
    clock_rate: 48_000,
    channels: Some(2),
    feedback: &["transport-cc"],
    fmtp: Some("minptime=10;useinbandfec=1;usedtx=1"),
}];

const CAMERA_CODECS: &[Codec] = &[
    Codec {
        name: "VP8",
        payload_type: 96,
        clock_rate: 90_000,
        channels: None,
        feedback: &["transport-cc", "ccm fir", "nack", "nack pli", "goog-remb"],
        fmtp: None,
    },
    Codec {
        name: "rtx",
        payload_type: 97,
        clock_rate: 90_000,
        channels: None,
        feedback: &[],
        fmtp: Some("apt=96"),
    },
];

const MICROPHONE_EXTENSIONS: &[HeaderExtension] = &[
    HeaderExtension {
        id: 1,
        uri: "urn:ietf:params:rtp-hdrext:sdes:mid",
    },
    HeaderExtension {
        id: 4,
        uri: "http://www.webrtc.org/experiments/rtp-hdrext/abs-send-time",
    },
    HeaderExtension {
        id: 5,
        uri: "http://www.ietf.org/id/draft-holmer-rmcat-transport-wide-cc-extensions-01",
    },
];

const CAMERA_EXTENSIONS: &[HeaderExtension] = &[
    HeaderExtension {
        id: 1,
        uri: "urn:ietf:params:rtp-hdrext:sdes:mid",
    },
    HeaderExtension {
        id: 2,
        uri: "urn:ietf:params:rtp-hdrext:sdes:rtp-stream-id",
    },
    HeaderExtension {
        id: 3,
        uri: "urn:ietf:params:rtp-hdrext:sdes:repaired-rtp-stream-id",
    },
    HeaderExtension {
        id: 4,
        uri: "http://www.webrtc.org/experiments/rtp-hdrext/abs-send-time",
    },
    HeaderExtension {
        id: 5,
        uri: "http://www.ietf.org/id/draft-holmer-rmcat-transport-wide-cc-extensions-01",
    },
    HeaderExtension {
        id: 11,
        uri: "urn:3gpp:video-orientation",
    },
    HeaderExtension {
        id: 12,
        uri: "urn:ietf:params:rtp-hdrext:toffset",
    },
];

/// Maximale Nachrichtengroesse des Datenkanals
pub const DATA_CHANNEL_MAX_MESSAGE_SIZE: u32 = 131_072;

/// Simulcast-Schicht der eigenen Kamera
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulcastEncoding {
    pub rid: &'static str,
    pub scale_resolution_down_by: f32,
    pub max_bitrate: u32,
    pub scalability_mode: &'static str,
}

pub const CAMERA_ENCODINGS: [SimulcastEncoding; 3] = [
    SimulcastEncoding {
        rid: "l",
        scale_resolution_down_by: 4.0,
        max_bitrate: 100_000,
        scalability_mode: "L1T3",
    },
    SimulcastEncoding {
        rid: "m",
        scale_resolution_down_by: 2.0,
        max_bitrate: 250_000,
        scalability_mode: "L1T3",
    },
    SimulcastEncoding {
        rid: "h",
        scale_resolution_down_by: 1.0,
        max_bitrate: 1_200_000,
        scalability_mode: "L1T3",
    },
];

// ---------------------------------------------------------------------------
// Description
// ---------------------------------------------------------------------------

/// Unveraenderliche Parameter aus der Join-Antwort des SFU
#[derive(Debug, Clone)]
pub struct SdpStatic {
    pub ice_username_fragment: IceUsernameFragment,
    pub ice_password: IcePassword,
    pub dtls_fingerprint: DtlsFingerprint,
}

pub struct RemoteSessionDescriptionInit<'a> {
    pub sdp_static: &'a SdpStatic,
    pub version: u64,
    pub m_line_order: &'a [ParticipantId],
    pub local: ParticipantId,
    pub remote: &'a BTreeSet<ParticipantId>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Seite {
    Lokal,
    Remote,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Art {
    Audio,
    Video,
}

fn rtp_zeilen(
    zeilen: &mut Vec<String>,
    seite: Seite,
    art: Art,
    aktiv: bool,
    extensions: &[HeaderExtension],
    codecs: &[Codec],
    mid: &str,
) {
    let richtung = match (aktiv, seite) {
        (false, _) => "inactive",
        (true, Seite::Lokal) => "recvonly",
        (true, Seite::Remote) => "sendonly",
    };
    let art_name = match art {
        Art::Audio => "audio",
        Art::Video => "video",
    };
    let payload_types = codecs
        .iter()
        .map(|c| c.payload_type.to_string())
        .collect::<Vec<_>>()
        .join(" ");

    zeilen.push(format!(
        "m={} {} UDP/TLS/RTP/SAVPF {}",
        art_name,
        if aktiv { 9 } else { 0 },
        payload_types
    ));
    zeilen.push("c=IN IP4 0.0.0.0".to_string());
    zeilen.push("a=rtcp:9 IN IP4 0.0.0.0".to_string());
    zeilen.push(format!("a=mid:{mid}"));
    zeilen.extend(
        extensions
            .iter()
            .map(|e| format!("a=extmap:{} {}", e.id, e.uri)),
    );
    zeilen.push(format!("a={richtung}"));
    zeilen.push("a=rtcp-mux".to_string());
    if art == Art::Video {
        zeilen.push("a=rtcp-rsize".to_string());
    }

    for codec in codecs {
        let parameter = match codec.channels {
            Some(channels) => format!("{}/{}", codec.clock_rate, channels),
            None => codec.clock_rate.to_string(),
        };
        zeilen.push(format!(
            "a=rtpmap:{} {}/{}",
            codec.payload_type, codec.name, parameter
        ));
        zeilen.extend(
            codec
                .feedback
                .iter()
                .map(|fb| format!("a=rtcp-fb:{} {}", codec.payload_type, fb)),
        );
        if let Some(fmtp) = codec.fmtp {
            zeilen.push(format!("a=fmtp:{} {}", codec.payload_type, fmtp));
        }
    }

    // Simulcast nur fuer die eigene Kamera
    if aktiv && seite == Seite::Lokal && art == Art::Video {
        zeilen.extend(CAMERA_ENCODINGS.iter().map(|e| format!("a=rid:{} recv", e.rid)));
        let rids = CAMERA_ENCODINGS
            .iter()
            .map(|e| e.rid)
            .collect::<Vec<_>>()
            .join(";");
        zeilen.push(format!("a=simulcast:recv {rids}"));
    }
}

fn sctp_zeilen(zeilen: &mut Vec<String>, mid: &str) {
    zeilen.push("m=application 9 UDP/DTLS/SCTP webrtc-datachannel".to_string());
    zeilen.push("c=IN IP4 0.0.0.0".to_string());
    zeilen.push(format!("a=mid:{mid}"));
    zeilen.push("a=sctp-port:5000".to_string());
    zeilen.push(format!(
        "a=max-message-size:{DATA_CHANNEL_MAX_MESSAGE_SIZE}"
    ));
}

/// Erzeugt die vollstaendige Remote-Description
pub fn create_remote_session_description(
    init: RemoteSessionDescriptionInit<'_>,
) -> WebRtcResult<String> {
    let RemoteSessionDescriptionInit {
        sdp_static,
        version,
        m_line_order,
        local,
        remote,
    } = init;

    let Some((erster, entfernte)) = m_line_order.split_first() else {
        return Err(WebRtcError::LokalNichtZuerst { local });
    };
    if *erster != local {
        return Err(WebRtcError::LokalNichtZuerst { local });
    }
    if let Some(fehlend) = remote.iter().find(|id| !entfernte.contains(id)) {
        return Err(WebRtcError::FehltInReihenfolge(*fehlend));
    }

    let mut bundle = Vec::new();
    let mut medien = Vec::new();

    // Lokale Zeilen stehen immer zuerst
    let lokal = mids(local)?;
    rtp_zeilen(
        &mut medien,
        Seite::Lokal,
        Art::Audio,
        true,
        MICROPHONE_EXTENSIONS,
        MICROPHONE_CODECS,
        &lokal.microphone,
    );
    rtp_zeilen(
        &mut medien,
        Seite::Lokal,
        Art::Video,
        true,
        CAMERA_EXTENSIONS,
        CAMERA_CODECS,
        &lokal.camera,
    );
    sctp_zeilen(&mut medien, &lokal.data);
    bundle.extend([lokal.microphone, lokal.camera, lokal.data]);

    for id in entfernte {
        let m = mids(*id)?;
        let aktiv = remote.contains(id);
        rtp_zeilen(
            &mut medien,
            Seite::Remote,
            Art::Audio,
            aktiv,
            MICROPHONE_EXTENSIONS,
            MICROPHONE_CODECS,
            &m.microphone,
        );
        rtp_zeilen(
            &mut medien,
            Seite::Remote,
            Art::Video,
            aktiv,
            CAMERA_EXTENSIONS,
            CAMERA_CODECS,
            &m.camera,
        );
        bundle.extend([m.microphone, m.camera]);
    }

    let mut zeilen = vec![
        "v=0".to_string(),
        format!("o=SDP_IS_LOVE 1 {version} IN IP4 127.0.0.1"),
        "s=-".to_string(),
        "t=0 0".to_string(),
        format!("a=group:BUNDLE {}", bundle.join(" ")),
        "a=msid-semantic: WMS *".to_string(),
        format!("a=ice-ufrag:{}", sdp_static.ice_username_fragment.as_str()),
        format!("a=ice-pwd:{}", sdp_static.ice_password.as_str()),
        "a=ice-options:trickle".to_string(),
        "a=ice-lite".to_string(),
        format!(
            "a=fingerprint:sha-256 {}",
            sdp_static.dtls_fingerprint.hex_mit_doppelpunkt()
        ),
        "a=setup:passive".to_string(),
    ];
    zeilen.extend(medien);
    zeilen.push(String::new());
    Ok(zeilen.join("\r\n"))
}

/// Eine erzeugte Description mit ihrer Version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub version: u64,
    pub sdp: String,
}

/// SDP-Zustand eines Calls: feste Parameter, Versionszaehler, m-Line-Reihenfolge
#[derive(Debug)]
pub struct SdpState {
    sdp_static: SdpStatic,
    version: u64,
    m_line_order: Vec<ParticipantId>,
}

impl SdpState {
    pub fn new(sdp_static: SdpStatic, local: ParticipantId) -> Self {
        Self {
            sdp_static,
            version: 0,
            m_line_order: vec![local],
        }
    }

    pub fn m_line_order(&self) -> &[ParticipantId] {
        &self.m_line_order
    }

    /// Haengt einen Teilnehmer an die m-Line-Reihenfolge an (nie entfernt)
    pub fn m_line_hinzufuegen(&mut self, id: ParticipantId) -> bool {
        if self.m_line_order.contains(&id) {
            return false;
        }
        self.m_line_order.push(id);
        true
    }

    /// Erzeugt die naechste Version der Remote-Description
    pub fn next_description(
        &mut self,
        local: ParticipantId,
        remote: &BTreeSet<ParticipantId>,
    ) -> WebRtcResult<SessionDescription> {
        let sdp = create_remote_session_description(RemoteSessionDescriptionInit {
            sdp_static: &self.sdp_static,
            version: self.version,
            m_line_order: &self.m_line_order,
            local,
            remote,
        })?;
        let version = self.version;
        self.version += 1;
        debug!(
            version,
            m_lines = self.m_line_order.len(),
            aktiv = remote.len(),
            "Remote-Description erzeugt"
        );
        Ok(SessionDescription { version, sdp })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
