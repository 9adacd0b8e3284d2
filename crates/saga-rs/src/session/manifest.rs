//! Atomic session manifest.
//!
//! A small `manifest.json` in the session directory records where the
//! compression pipeline stands: the current containers, the watermark
//! (ordinal of the last compressed message), and turn bookkeeping. Saved via
//! temp file + rename after every state change, so a restart resumes from a
//! consistent point. The archive remains the source of truth for what was
//! compressed; the manifest only says where the live window begins.

use crate::ContainerId;
use crate::error::ManifestError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name of the manifest inside a session directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Durable pipeline position for one session.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SessionManifest {
    pub session_id: String,
    /// Aggregate the session currently occupies.
    pub current_aggregate: ContainerId,
    /// Unit the session currently occupies (nested in the aggregate).
    pub current_unit: ContainerId,
    /// Ordinal of the last compressed (pruned) message; 0 means nothing has
    /// been compressed yet.
    pub watermark: u64,
    /// Messages recorded over the session's lifetime.
    pub turns: u64,
    pub updated_at: DateTime<Utc>,
}

impl SessionManifest {
    pub fn new(
        session_id: impl Into<String>,
        aggregate: ContainerId,
        unit: ContainerId,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            current_aggregate: aggregate,
            current_unit: unit,
            watermark: 0,
            turns: 0,
            updated_at: Utc::now(),
        }
    }

    fn path(dir: &Path) -> PathBuf {
        dir.join(MANIFEST_FILE)
    }

    /// Atomic write: serialize to a temp file, then rename into place.
    pub fn save(&self, dir: &Path) -> Result<(), ManifestError> {
        std::fs::create_dir_all(dir).map_err(|e| ManifestError::Io {
            path: dir.to_path_buf(),
            source: e,
        })?;

        let final_path = Self::path(dir);
        let tmp_path = dir.join(".manifest.json.tmp");

        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&tmp_path, json).map_err(|e| ManifestError::Io {
            path: tmp_path.clone(),
            source: e,
        })?;
        std::fs::rename(&tmp_path, &final_path).map_err(|e| ManifestError::Io {
            path: final_path,
            source: e,
        })?;
        Ok(())
    }

    /// Load a session's manifest. `None` when the session has never saved one.
    pub fn load(dir: &Path) -> Result<Option<Self>, ManifestError> {
        let path = Self::path(dir);
        if !path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&path).map_err(|e| ManifestError::Io {
            path: path.clone(),
            source: e,
        })?;
        Ok(Some(serde_json::from_str(&json)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> SessionManifest {
        SessionManifest::new(
            "story-1",
            ContainerId::new("Greyhollow"),
            ContainerId::new("The Drowned Inn"),
        )
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = manifest();
        m.watermark = 17;
        m.turns = 42;
        m.save(dir.path()).unwrap();

        let loaded = SessionManifest::load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.session_id, "story-1");
        assert_eq!(loaded.watermark, 17);
        assert_eq!(loaded.turns, 42);
        assert_eq!(loaded.current_unit.as_str(), "The Drowned Inn");
    }

    #[test]
    fn missing_manifest_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SessionManifest::load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn no_temp_file_left_after_save() {
        let dir = tempfile::tempdir().unwrap();
        manifest().save(dir.path()).unwrap();
        assert!(!dir.path().join(".manifest.json.tmp").exists());
        assert!(dir.path().join(MANIFEST_FILE).exists());
    }
}
