use std::fs;
use std::path::{Path, PathBuf};

use sqlpanel_core::state::{PanelState, PersistError, PersistenceSlot};

/// Persistence slot backed by one JSON file.
#[derive(Debug, Clone)]
pub struct FileSlot {
    path: PathBuf,
}

impl FileSlot {
    #[must_use]
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PersistenceSlot for FileSlot {
    fn read(&self) -> Result<Option<PanelState>, PersistError> {
        if !self.path.exists() {
            return Ok(None);
        }

        let raw = fs::read_to_string(&self.path).map_err(|source| PersistError::Read {
            path: self.path.clone(),
            source,
        })?;

        if raw.trim().is_empty() {
            return Ok(None);
        }

        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| PersistError::Parse {
                path: self.path.clone(),
                source,
            })
    }

    fn write(&mut self, snapshot: &PanelState) -> Result<(), PersistError> {
        if let Some(parent_dir) = self.path.parent() {
            fs::create_dir_all(parent_dir).map_err(|source| PersistError::CreateDir {
                path: parent_dir.to_path_buf(),
                source,
            })?;
        }

        let rendered =
            serde_json::to_string(snapshot).map_err(|source| PersistError::Encode { source })?;

        fs::write(&self.path, rendered).map_err(|source| PersistError::Write {
            path: self.path.clone(),
            source,
        })
    }
}
