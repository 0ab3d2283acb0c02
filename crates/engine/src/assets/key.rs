use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    Mesh,
    Font,
    Audio,
    Raw,
}

impl AssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Mesh => "mesh",
            AssetKind::Font => "font",
            AssetKind::Audio => "audio",
            AssetKind::Raw => "raw",
        }
    }
}

impl FromStr for AssetKind {
    type Err = KeyParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "mesh" => Ok(AssetKind::Mesh),
            "font" => Ok(AssetKind::Font),
            "audio" => Ok(AssetKind::Audio),
            "raw" => Ok(AssetKind::Raw),
            other => Err(KeyParseError::UnknownKind {
                kind: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyParseError {
    #[error("asset key {key:?} does not follow the \"kind:path\" format")]
    MissingSeparator { key: String },
    #[error("asset key has an empty path component")]
    EmptyPath,
    #[error("unknown asset kind {kind:?}")]
    UnknownKind { kind: String },
}

/// Identity of a cached asset: kind, normalized path, and a fingerprint of
/// the load configuration. Two requests with equal keys must resolve to the
/// same cache entry, so normalization happens here and nowhere else.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssetKey {
    kind: AssetKind,
    path: String,
    config_fingerprint: String,
}

impl AssetKey {
    pub fn new(kind: AssetKind, path: &str, load_config: &str) -> Result<Self, KeyParseError> {
        let path = normalize_path(path);
        if path.is_empty() {
            return Err(KeyParseError::EmptyPath);
        }
        Ok(Self {
            kind,
            path,
            config_fingerprint: fingerprint(kind, load_config),
        })
    }

    /// Parses `"kind:path"` with an empty load configuration.
    pub fn parse(raw: &str) -> Result<Self, KeyParseError> {
        let (kind, path) = raw
            .split_once(':')
            .ok_or_else(|| KeyParseError::MissingSeparator {
                key: raw.to_string(),
            })?;
        Self::new(kind.parse()?, path, "")
    }

    pub fn kind(&self) -> AssetKind {
        self.kind
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn config_fingerprint(&self) -> &str {
        &self.config_fingerprint
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.path)
    }
}

fn normalize_path(path: &str) -> String {
    let mut normalized = path.trim().replace('\\', "/");
    while let Some(stripped) = normalized.strip_prefix("./") {
        normalized = stripped.to_string();
    }
    normalized
}

fn fingerprint(kind: AssetKind, load_config: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(load_config.as_bytes());
    to_hex_lower(&hasher.finalize())
}

fn to_hex_lower(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_splits_kind_and_path() {
        let key = AssetKey::parse("mesh:models/crate.obj").expect("key");
        assert_eq!(key.kind(), AssetKind::Mesh);
        assert_eq!(key.path(), "models/crate.obj");
    }

    #[test]
    fn kind_is_case_insensitive() {
        let key = AssetKey::parse("MESH:models/crate.obj").expect("key");
        assert_eq!(key.kind(), AssetKind::Mesh);
    }

    #[test]
    fn missing_separator_is_rejected() {
        assert!(matches!(
            AssetKey::parse("mesh-models-crate"),
            Err(KeyParseError::MissingSeparator { .. })
        ));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!(matches!(
            AssetKey::parse("shader:toon.wgsl"),
            Err(KeyParseError::UnknownKind { .. })
        ));
    }

    #[test]
    fn empty_path_is_rejected() {
        assert!(matches!(
            AssetKey::parse("mesh:  "),
            Err(KeyParseError::EmptyPath)
        ));
    }

    #[test]
    fn backslashes_and_dot_prefixes_normalize_to_equal_keys() {
        let a = AssetKey::new(AssetKind::Font, "./fonts\\mono.ttf", "").expect("a");
        let b = AssetKey::new(AssetKind::Font, "fonts/mono.ttf", "").expect("b");
        assert_eq!(a, b);
    }

    #[test]
    fn different_load_config_yields_different_keys() {
        let a = AssetKey::new(AssetKind::Mesh, "m.obj", "triangulate=1").expect("a");
        let b = AssetKey::new(AssetKind::Mesh, "m.obj", "triangulate=0").expect("b");
        assert_ne!(a, b);
        assert_ne!(a.config_fingerprint(), b.config_fingerprint());
    }

    #[test]
    fn display_round_trips_through_parse() {
        let key = AssetKey::parse("audio:sfx/jump.ogg").expect("key");
        let reparsed = AssetKey::parse(&key.to_string()).expect("reparsed");
        assert_eq!(key, reparsed);
    }
}
