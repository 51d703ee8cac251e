//! Checkpoint keys and the on-disk checkpoint manifest.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::MayoError;
use crate::persistence::{atomic_write_json, load_json};

/// Identifies a checkpoint to load.
///
/// The evaluator passes keys through to the checkpoint store untouched.
/// Textual form: `latest`, an epoch number, or any other name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum CheckpointKey {
    /// Most recent checkpoint in the store.
    #[default]
    Latest,
    /// Checkpoint saved at the end of an epoch.
    Epoch(u64),
    /// Checkpoint saved under an explicit name.
    Named(String),
}

impl fmt::Display for CheckpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => f.write_str("latest"),
            Self::Epoch(epoch) => write!(f, "{epoch}"),
            Self::Named(name) => f.write_str(name),
        }
    }
}

impl FromStr for CheckpointKey {
    type Err = MayoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(MayoError::invalid_input("empty checkpoint key"));
        }
        if s.eq_ignore_ascii_case("latest") {
            return Ok(Self::Latest);
        }
        Ok(s.parse::<u64>()
            .map(Self::Epoch)
            .unwrap_or_else(|_| Self::Named(s.to_string())))
    }
}

impl Serialize for CheckpointKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Epoch(epoch) => serializer.serialize_u64(*epoch),
            other => serializer.serialize_str(&other.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for CheckpointKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct KeyVisitor;

        impl Visitor<'_> for KeyVisitor {
            type Value = CheckpointKey;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an epoch number or a checkpoint name")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(CheckpointKey::Epoch(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                u64::try_from(v)
                    .map(CheckpointKey::Epoch)
                    .map_err(|_| E::custom(format!("negative epoch {v}")))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                v.parse().map_err(E::custom)
            }

            // Env and YAML layers hand non-integer scalars over typed.
            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
                Ok(CheckpointKey::Named(format!("{v:?}")))
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<Self::Value, E> {
                Ok(CheckpointKey::Named(v.to_string()))
            }
        }

        deserializer.deserialize_any(KeyVisitor)
    }
}

/// One checkpoint recorded in the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    /// Integer epoch the checkpoint was saved at.
    pub epoch: u64,
    /// Exact training progress in epochs, possibly fractional.
    pub epoch_progress: f64,
    /// Recorded predictions, relative to the checkpoint directory.
    pub predictions: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Hex SHA-256 of the predictions file, verified on load when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// Index of the checkpoints in a directory, stored as `checkpoints.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointManifest {
    /// Whether the recorded weights are exponential moving averages.
    #[serde(default)]
    pub moving_average: bool,
    #[serde(default)]
    pub checkpoints: Vec<CheckpointEntry>,
}

impl CheckpointManifest {
    pub const FILE_NAME: &'static str = "checkpoints.json";

    pub fn path(dir: &Path) -> PathBuf {
        dir.join(Self::FILE_NAME)
    }

    /// Read the manifest in `dir`; a missing manifest is an empty one.
    pub fn load(dir: &Path) -> Result<Self, MayoError> {
        Ok(load_json(&Self::path(dir))?.unwrap_or_default())
    }

    pub fn save(&self, dir: &Path) -> Result<(), MayoError> {
        atomic_write_json(&Self::path(dir), self)?;
        Ok(())
    }

    /// Add `entry` to the manifest in `dir`, replacing any entry for the same
    /// epoch, and write it back.
    pub fn record(dir: &Path, entry: CheckpointEntry) -> Result<Self, MayoError> {
        let mut manifest = Self::load(dir)?;
        manifest.checkpoints.retain(|c| c.epoch != entry.epoch);
        manifest.checkpoints.push(entry);
        manifest.checkpoints.sort_by_key(|c| c.epoch);
        manifest.save(dir)?;
        Ok(manifest)
    }

    /// Epochs with a checkpoint, ascending.
    pub fn epochs(&self) -> Vec<u64> {
        let mut epochs: Vec<u64> = self.checkpoints.iter().map(|c| c.epoch).collect();
        epochs.sort_unstable();
        epochs.dedup();
        epochs
    }

    pub fn resolve(&self, key: &CheckpointKey) -> Result<&CheckpointEntry, MayoError> {
        let found = match key {
            CheckpointKey::Latest => self.checkpoints.iter().max_by_key(|c| c.epoch),
            CheckpointKey::Epoch(epoch) => self.checkpoints.iter().find(|c| c.epoch == *epoch),
            CheckpointKey::Named(name) => self
                .checkpoints
                .iter()
                .find(|c| c.name.as_deref() == Some(name.as_str())),
        };
        found.ok_or_else(|| MayoError::not_found(format!("checkpoint {key}")))
    }
}
