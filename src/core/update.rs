// src/core/update.rs

//! Update-channel metadata.
//!
//! A distribution server publishes one JSON index describing the file tree
//! it serves: nested folders, scripts with their `[Main]` info, and plain
//! files. Every file node carries size, timestamp and a sha256 checksum.
//! This module models the document, parses and serializes it, and validates
//! it against the running engine. Downloading is out of scope here.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Schema versions this engine can consume.
pub const SCHEMA_VER_MIN: Version = Version::new(&[1, 0]);
pub const SCHEMA_VER_MAX: Version = Version::new(&[1, 0]);

/// Version of this engine, compared against `min_ver` of an index.
pub const ENGINE_VER: Version = Version::new(&[0, 3, 0]);

#[derive(Debug, Error)]
pub enum UpdateJsonError {
    #[error("invalid update index: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported schema version [{found}], supported range is [{min}] to [{max}]")]
    UnsupportedSchema {
        found: Version,
        min: Version,
        max: Version,
    },
    #[error("index requires engine [{required}] but this engine is [{running}]")]
    EngineTooOld { required: Version, running: Version },
    #[error("invalid sha256 checksum [{0}]")]
    InvalidChecksum(String),
    #[error("index entry has an empty name")]
    EmptyName,
    #[error("invalid version string [{0}]")]
    InvalidVersion(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

// --- VERSION ---

/// Dotted numeric version, 1 to 4 segments. Serialized as a string.
/// Comparison pads the shorter side with zeros, so `1.0` equals `1.0.0`.
#[derive(Debug, Clone)]
pub struct Version {
    segments: [u32; 4],
    /// Segment count as written, kept so serialization round-trips.
    len: usize,
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.segments == other.segments
    }
}

impl Eq for Version {}

impl Version {
    /// Builds a version from up to 4 segments. Extra segments are dropped.
    pub const fn new(segments: &[u32]) -> Self {
        let len = if segments.len() > 4 { 4 } else { segments.len() };
        let mut buf = [0u32; 4];
        let mut i = 0;
        while i < len {
            buf[i] = segments[i];
            i += 1;
        }
        Self { segments: buf, len }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.segments.cmp(&other.segments)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.segments[..self.len.max(1)]
            .iter()
            .map(u32::to_string)
            .collect();
        write!(f, "{}", parts.join("."))
    }
}

impl FromStr for Version {
    type Err = UpdateJsonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        if parts.is_empty() || parts.len() > 4 {
            return Err(UpdateJsonError::InvalidVersion(s.to_string()));
        }
        let mut segments = Vec::with_capacity(parts.len());
        for part in parts {
            let n: u32 = part
                .parse()
                .map_err(|_| UpdateJsonError::InvalidVersion(s.to_string()))?;
            segments.push(n);
        }
        Ok(Self::new(&segments))
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

// --- INDEX MODEL ---

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FileMetadata {
    /// RFC 3339 timestamp of the last modification on the server.
    pub updated_at: String,
    pub file_size: u64,
    /// Lowercase hex sha256 of the file content, 64 characters.
    pub sha256: String,
}

impl FileMetadata {
    fn validate(&self) -> Result<(), UpdateJsonError> {
        let ok = self.sha256.len() == 64
            && hex::decode(&self.sha256).map_or(false, |b| b.len() == 32);
        if ok {
            Ok(())
        } else {
            Err(UpdateJsonError::InvalidChecksum(self.sha256.clone()))
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ScriptInfo {
    pub title: String,
    pub desc: String,
    pub author: String,
    pub version: Version,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IndexEntry {
    Folder {
        name: String,
        children: Vec<IndexEntry>,
    },
    Script {
        name: String,
        file_metadata: FileMetadata,
        script_info: ScriptInfo,
    },
    NonScriptFile {
        name: String,
        file_metadata: FileMetadata,
    },
}

impl IndexEntry {
    pub fn name(&self) -> &str {
        match self {
            Self::Folder { name, .. }
            | Self::Script { name, .. }
            | Self::NonScriptFile { name, .. } => name,
        }
    }

    fn validate(&self) -> Result<(), UpdateJsonError> {
        if self.name().is_empty() {
            return Err(UpdateJsonError::EmptyName);
        }
        match self {
            Self::Folder { children, .. } => {
                for child in children {
                    child.validate()?;
                }
                Ok(())
            }
            Self::Script { file_metadata, .. } | Self::NonScriptFile { file_metadata, .. } => {
                file_metadata.validate()
            }
        }
    }
}

/// Root document of an update channel.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UpdateIndex {
    pub schema_ver: Version,
    /// Minimum engine version able to consume this index. The wire key is
    /// fixed by the format.
    #[serde(rename = "pebakery_min_ver")]
    pub engine_min_ver: Version,
    /// RFC 3339 timestamp of index generation.
    pub created_at: String,
    pub index: Vec<IndexEntry>,
}

impl UpdateIndex {
    /// Parses and fully validates an index document.
    pub fn from_json(s: &str) -> Result<Self, UpdateJsonError> {
        let index: Self = serde_json::from_str(s)?;
        index.validate()?;
        Ok(index)
    }

    pub fn from_file(path: &Path) -> Result<Self, UpdateJsonError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn to_json(&self) -> Result<String, UpdateJsonError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_file(&self, path: &Path) -> Result<(), UpdateJsonError> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), UpdateJsonError> {
        if self.schema_ver < SCHEMA_VER_MIN || SCHEMA_VER_MAX < self.schema_ver {
            return Err(UpdateJsonError::UnsupportedSchema {
                found: self.schema_ver.clone(),
                min: SCHEMA_VER_MIN,
                max: SCHEMA_VER_MAX,
            });
        }
        if ENGINE_VER < self.engine_min_ver {
            return Err(UpdateJsonError::EngineTooOld {
                required: self.engine_min_ver.clone(),
                running: ENGINE_VER,
            });
        }
        for entry in &self.index {
            entry.validate()?;
        }
        Ok(())
    }

    /// Resolves a `/`-separated path inside the index tree.
    pub fn find(&self, path: &str) -> Option<&IndexEntry> {
        let mut components = path.split('/').filter(|c| !c.is_empty());
        let first = components.next()?;
        let mut current = self
            .index
            .iter()
            .find(|e| e.name().eq_ignore_ascii_case(first))?;
        for comp in components {
            let IndexEntry::Folder { children, .. } = current else {
                return None;
            };
            current = children
                .iter()
                .find(|e| e.name().eq_ignore_ascii_case(comp))?;
        }
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_SHA: &str =
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    fn sample_json() -> String {
        format!(
            r#"{{
  "schema_ver": "1.0",
  "pebakery_min_ver": "0.1.0",
  "created_at": "2023-04-01T12:00:00Z",
  "index": [
    {{
      "kind": "folder",
      "name": "Apps",
      "children": [
        {{
          "kind": "script",
          "name": "tool.script",
          "file_metadata": {{
            "updated_at": "2023-04-01T11:00:00Z",
            "file_size": 2048,
            "sha256": "{SAMPLE_SHA}"
          }},
          "script_info": {{
            "title": "Tool",
            "desc": "A tool",
            "author": "someone",
            "version": "1.2"
          }}
        }}
      ]
    }},
    {{
      "kind": "non_script_file",
      "name": "readme.txt",
      "file_metadata": {{
        "updated_at": "2023-04-01T11:00:00Z",
        "file_size": 128,
        "sha256": "{SAMPLE_SHA}"
      }}
    }}
  ]
}}"#
        )
    }

    #[test]
    fn test_parse_and_validate_sample() {
        // --- Execute ---
        let index = UpdateIndex::from_json(&sample_json()).unwrap();

        // --- Assert ---
        assert_eq!(index.schema_ver, Version::new(&[1, 0]));
        assert_eq!(index.index.len(), 2);
        let IndexEntry::Folder { name, children } = &index.index[0] else {
            panic!("expected folder");
        };
        assert_eq!(name, "Apps");
        let IndexEntry::Script { script_info, .. } = &children[0] else {
            panic!("expected script");
        };
        assert_eq!(script_info.title, "Tool");
        assert_eq!(script_info.version, Version::new(&[1, 2]));
    }

    #[test]
    fn test_unsupported_schema_is_rejected() {
        // --- Setup ---
        let json = sample_json().replace("\"schema_ver\": \"1.0\"", "\"schema_ver\": \"2.0\"");

        // --- Execute & Assert ---
        let err = UpdateIndex::from_json(&json).unwrap_err();
        assert!(matches!(err, UpdateJsonError::UnsupportedSchema { .. }));
    }

    #[test]
    fn test_too_new_min_engine_is_rejected() {
        // --- Setup ---
        let json = sample_json().replace("\"0.1.0\"", "\"99.0.0\"");

        // --- Execute & Assert ---
        let err = UpdateIndex::from_json(&json).unwrap_err();
        assert!(matches!(err, UpdateJsonError::EngineTooOld { .. }));
    }

    #[test]
    fn test_malformed_checksum_is_rejected() {
        // --- Setup: truncated hex ---
        let json = sample_json().replace(SAMPLE_SHA, "deadbeef");

        // --- Execute & Assert ---
        let err = UpdateIndex::from_json(&json).unwrap_err();
        assert!(matches!(err, UpdateJsonError::InvalidChecksum(_)));
    }

    #[test]
    fn test_json_roundtrip_preserves_wire_keys() {
        // --- Setup ---
        let index = UpdateIndex::from_json(&sample_json()).unwrap();

        // --- Execute ---
        let out = index.to_json().unwrap();

        // --- Assert: wire keys and version strings survive ---
        assert!(out.contains("\"pebakery_min_ver\": \"0.1.0\""));
        assert!(out.contains("\"kind\": \"non_script_file\""));
        assert!(out.contains("\"version\": \"1.2\""));
        let again = UpdateIndex::from_json(&out).unwrap();
        assert_eq!(again.index.len(), 2);
    }

    #[test]
    fn test_version_ordering_pads_with_zeros() {
        let a: Version = "1.0".parse().unwrap();
        let b: Version = "1.0.0".parse().unwrap();
        let c: Version = "1.0.1".parse().unwrap();
        assert_eq!(a.cmp(&b), Ordering::Equal);
        assert!(a < c);
        assert!("1.2.3.4.5".parse::<Version>().is_err());
        assert!("1.x".parse::<Version>().is_err());
    }

    #[test]
    fn test_find_resolves_nested_paths() {
        // --- Setup ---
        let index = UpdateIndex::from_json(&sample_json()).unwrap();

        // --- Execute & Assert ---
        let entry = index.find("Apps/tool.script").unwrap();
        assert!(matches!(entry, IndexEntry::Script { .. }));
        assert!(index.find("Apps/missing.script").is_none());
        assert!(index.find("readme.txt").is_some());
    }
}
