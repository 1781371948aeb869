//! Gemeinsame Identifikationstypen fuer Huddle
//!
//! Alle IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! verschiedenen ID-Arten zur Compilezeit auszuschliessen.

use serde::{Deserialize, Serialize};

use crate::error::{HuddleError, Result};

/// Vom SFU vergebene Teilnehmer-ID innerhalb eines Calls
///
/// Gueltig ist der Bereich `[0, 790)`, begrenzt durch die Anzahl verfuegbarer
/// MIDs (8 Slots pro Teilnehmer). Die ID ist nicht eindeutig pro Kontakt, dieselbe
/// Identitaet kann mehrere Slots belegen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct ParticipantId(u16);

impl ParticipantId {
    /// Obergrenze (exklusiv) fuer gueltige Teilnehmer-IDs
    pub const LIMIT: u32 = 790;

    /// Erstellt eine Teilnehmer-ID, sofern der Wert im gueltigen Bereich liegt
    pub fn new(id: u32) -> Result<Self> {
        if id >= Self::LIMIT {
            return Err(HuddleError::UngueltigeTeilnehmerId(id));
        }
        Ok(Self(id as u16))
    }

    /// Gibt den rohen Wert zurueck
    pub fn get(self) -> u32 {
        u32::from(self.0)
    }
}

impl TryFrom<u32> for ParticipantId {
    type Error = HuddleError;

    fn try_from(value: u32) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ParticipantId> for u32 {
    fn from(id: ParticipantId) -> Self {
        id.get()
    }
}

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "participant:{}", self.0)
    }
}

/// Achtstellige Threema-artige Identitaet (`A-Z`, `0-9`, `*`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdentityString(String);

impl IdentityString {
    /// Laenge einer gueltigen Identitaet
    pub const LAENGE: usize = 8;

    pub fn new(identity: impl Into<String>) -> Result<Self> {
        let identity = identity.into();
        let gueltig = identity.len() == Self::LAENGE
            && identity
                .bytes()
                .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'*');
        if !gueltig {
            return Err(HuddleError::UngueltigeIdentitaet(identity));
        }
        Ok(Self(identity))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for IdentityString {
    type Error = HuddleError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<IdentityString> for String {
    fn from(identity: IdentityString) -> Self {
        identity.0
    }
}

impl std::fmt::Display for IdentityString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Anzeigename eines Teilnehmers (frei waehlbar, nicht authentisch)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Nickname(pub String);

impl Nickname {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Nickname {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifiziert eine Gruppe ueber Ersteller + gruppenlokale ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupIdentity {
    pub creator: IdentityString,
    pub group_id: u64,
}

impl std::fmt::Display for GroupIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "group:{}/{:016x}", self.creator, self.group_id)
    }
}
