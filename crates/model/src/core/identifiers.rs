use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};
use thiserror::Error;
use uuid::Uuid;

/// Number of hex digits every naming convention reduces to.
pub const SHORT_ID_LEN: usize = 8;

const SESSION_PREFIX: &str = "session_";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("'{0}' does not match any known unit naming convention")]
pub struct UnrecognizedUnitId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Arc<str>);

impl RunId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(Arc::from(id.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for RunId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PhaseId(Arc<str>);

impl PhaseId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(Arc::from(id.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for PhaseId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for PhaseId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl fmt::Display for PhaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical identity of a work unit: the first eight hex digits of its
/// session uuid, lowercased. Every historical naming convention maps onto it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UnitId(Arc<str>);

impl UnitId {
    /// Resolves a name written in any known convention to its canonical id.
    pub fn parse(raw: &str) -> Result<Self, UnrecognizedUnitId> {
        canonicalize(raw)
            .map(|(id, _)| id)
            .ok_or_else(|| UnrecognizedUnitId(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Directory name under the preferred convention.
    pub fn dir_name(&self) -> String {
        format!("{SESSION_PREFIX}{}", self.0)
    }

    fn from_hex(hex: &str) -> Self {
        Self(Arc::from(hex[..SHORT_ID_LEN].to_ascii_lowercase()))
    }
}

impl TryFrom<String> for UnitId {
    type Error = UnrecognizedUnitId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<UnitId> for String {
    fn from(id: UnitId) -> Self {
        id.0.to_string()
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Closed set of directory naming conventions seen across historical runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamingConvention {
    /// `session_0012ebed`
    SessionShort,
    /// `session_0012ebed-4c1f-4f55-9d0e-2b0a51f0aa11`
    SessionUuid,
    /// `0012ebed-4c1f-4f55-9d0e-2b0a51f0aa11`
    BareUuid,
    /// `0012ebed`
    BareShort,
}

impl NamingConvention {
    /// Order matters only for reporting; the shapes are disjoint.
    pub const ALL: [NamingConvention; 4] = [
        NamingConvention::SessionShort,
        NamingConvention::SessionUuid,
        NamingConvention::BareUuid,
        NamingConvention::BareShort,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NamingConvention::SessionShort => "session_short",
            NamingConvention::SessionUuid => "session_uuid",
            NamingConvention::BareUuid => "bare_uuid",
            NamingConvention::BareShort => "bare_short",
        }
    }

    /// Extracts the canonical id if `name` is written in this convention.
    pub fn extract(self, name: &str) -> Option<UnitId> {
        let name = name.trim().to_ascii_lowercase();
        match self {
            NamingConvention::SessionShort => name
                .strip_prefix(SESSION_PREFIX)
                .filter(|rest| is_short_hex(rest))
                .map(UnitId::from_hex),
            NamingConvention::SessionUuid => name
                .strip_prefix(SESSION_PREFIX)
                .and_then(uuid_prefix)
                .map(|hex| UnitId::from_hex(&hex)),
            NamingConvention::BareUuid => uuid_prefix(&name).map(|hex| UnitId::from_hex(&hex)),
            NamingConvention::BareShort => is_short_hex(&name).then(|| UnitId::from_hex(&name)),
        }
    }
}

impl fmt::Display for NamingConvention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps a name in any known convention to its canonical id.
pub fn canonicalize(name: &str) -> Option<(UnitId, NamingConvention)> {
    NamingConvention::ALL
        .iter()
        .find_map(|convention| convention.extract(name).map(|id| (id, *convention)))
}

fn is_short_hex(s: &str) -> bool {
    s.len() == SHORT_ID_LEN && s.bytes().all(|b| b.is_ascii_hexdigit())
}

// Only the hyphenated form counts as a uuid-named directory.
fn uuid_prefix(s: &str) -> Option<String> {
    if s.len() != 36 {
        return None;
    }
    Uuid::try_parse(s).ok().map(|u| u.simple().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const UUID: &str = "0012ebed-4c1f-4f55-9d0e-2b0a51f0aa11";

    #[test]
    fn all_conventions_share_one_canonical_id() {
        let names = [
            "session_0012ebed".to_string(),
            format!("session_{UUID}"),
            UUID.to_string(),
            "0012EBED".to_string(),
        ];

        let ids: Vec<_> = names.iter().map(|n| canonicalize(n).unwrap()).collect();
        assert!(ids.iter().all(|(id, _)| id.as_str() == "0012ebed"));
        assert_eq!(
            ids.iter().map(|(_, c)| *c).collect::<Vec<_>>(),
            NamingConvention::ALL.to_vec()
        );
    }

    #[test]
    fn rejects_names_outside_the_convention_set() {
        for name in [
            "session_0012ebe",
            "session_xyz12345",
            "notes",
            "duplicate_manifest.json",
            "0012ebed4c1f4f559d0e2b0a51f0aa11",
            "",
        ] {
            assert!(canonicalize(name).is_none(), "{name} should not resolve");
        }
    }

    #[test]
    fn unit_id_deserializes_from_any_convention() {
        let id: UnitId = serde_json::from_str(&format!("\"{UUID}\"")).unwrap();
        assert_eq!(id.as_str(), "0012ebed");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"0012ebed\"");
        assert_eq!(id.dir_name(), "session_0012ebed");
    }
}
