//! ICE/DTLS-Parameter des SFU und Host-Kandidaten

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::error::{WebRtcError, WebRtcResult};

/// ICE-Username-Fragment (mindestens 4 Zeichen)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceUsernameFragment(String);

impl IceUsernameFragment {
    pub fn new(value: impl Into<String>) -> WebRtcResult<Self> {
        let value = value.into();
        if value.chars().count() < 4 {
            return Err(WebRtcError::UngueltigesUfrag(value));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// ICE-Passwort (mindestens 22 Zeichen)
#[derive(Clone, PartialEq, Eq)]
pub struct IcePassword(String);

impl IcePassword {
    pub fn new(value: impl Into<String>) -> WebRtcResult<Self> {
        let value = value.into();
        if value.chars().count() < 22 {
            return Err(WebRtcError::UngueltigesPasswort);
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for IcePassword {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("IcePassword([REDACTED])")
    }
}

/// SHA-256 DTLS-Fingerprint des SFU-Zertifikats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DtlsFingerprint([u8; 32]);

impl DtlsFingerprint {
    pub fn new(bytes: &[u8]) -> WebRtcResult<Self> {
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| WebRtcError::UngueltigerFingerprint(bytes.len()))?;
        Ok(Self(bytes))
    }

    /// SDP-Darstellung: `AB:CD:...`
    pub fn hex_mit_doppelpunkt(&self) -> String {
        self.0
            .iter()
            .map(|b| hex::encode_upper([*b]))
            .collect::<Vec<_>>()
            .join(":")
    }
}

/// Host-Kandidat fuer das SFU (alle MIDs gebuendelt)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_m_line_index: u32,
}

impl IceCandidate {
    /// Foundation 0, Komponente 1 (RTP), UDP. IPv6 hat Vorrang vor IPv4.
    pub fn host(addr: SocketAddr) -> Self {
        let prioritaet = if addr.is_ipv6() { 2 } else { 1 };
        Self {
            candidate: format!(
                "candidate:0 1 udp {} {} {} typ host",
                prioritaet,
                addr.ip(),
                addr.port()
            ),
            sdp_m_line_index: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ufrag_mindestlaenge() {
        assert!(IceUsernameFragment::new("abc").is_err());
        assert!(IceUsernameFragment::new("abcd").is_ok());
    }

    #[test]
    fn passwort_mindestlaenge() {
        assert!(IcePassword::new("kurz").is_err());
        assert!(IcePassword::new("a".repeat(22)).is_ok());
        let pwd = IcePassword::new("geheim-geheim-geheim-22").unwrap();
        assert!(!format!("{pwd:?}").contains("geheim"));
    }

    #[test]
    fn fingerprint_format() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xAB;
        bytes[31] = 0x01;
        let fp = DtlsFingerprint::new(&bytes).unwrap();
        let hex = fp.hex_mit_doppelpunkt();
        assert!(hex.starts_with("AB:00:"));
        assert!(hex.ends_with(":01"));
        assert_eq!(hex.len(), 32 * 3 - 1);
        assert!(DtlsFingerprint::new(&[0u8; 20]).is_err());
    }

    #[test]
    fn host_kandidaten() {
        let v4 = IceCandidate::host("192.0.2.1:3478".parse().unwrap());
        assert_eq!(v4.candidate, "candidate:0 1 udp 1 192.0.2.1 3478 typ host");
        assert_eq!(v4.sdp_m_line_index, 0);

        let v6 = IceCandidate::host("[2001:db8::1]:443".parse().unwrap());
        assert_eq!(v6.candidate, "candidate:0 1 udp 2 2001:db8::1 443 typ host");
    }
}
