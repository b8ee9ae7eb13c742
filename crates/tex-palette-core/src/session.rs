//! Persistence of the palettizer tables between runs.

use crate::error::{PaletteError, Result};
use crate::palettizer::Palettizer;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::info;

/// Bumped whenever the persisted layout changes incompatibly.
pub const SESSION_VERSION: u32 = 1;

/// Restores and persists the palettizer state.
pub trait SessionStore {
    /// `None` when there is no prior session.
    fn restore(&self) -> Result<Option<Palettizer>>;
    fn persist(&self, palettizer: &Palettizer) -> Result<()>;
}

#[derive(Serialize)]
struct SessionOut<'a> {
    version: u32,
    #[serde(flatten)]
    palettizer: &'a Palettizer,
}

#[derive(Deserialize)]
struct SessionIn {
    version: u32,
    #[serde(flatten)]
    palettizer: Palettizer,
}

/// Session stored as one JSON document.
#[derive(Debug, Clone)]
pub struct JsonSessionStore {
    path: PathBuf,
}

impl JsonSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStore for JsonSessionStore {
    fn restore(&self) -> Result<Option<Palettizer>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let file = fs::File::open(&self.path)?;
        let session: SessionIn = serde_json::from_reader(BufReader::new(file))?;
        if session.version != SESSION_VERSION {
            return Err(PaletteError::read(
                self.path.display().to_string(),
                format!("unsupported session version {}", session.version),
            ));
        }
        let mut palettizer = session.palettizer;
        palettizer.relink();
        info!(path = %self.path.display(), textures = palettizer.textures().len(), "session restored");
        Ok(Some(palettizer))
    }

    fn persist(&self, palettizer: &Palettizer) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = fs::File::create(&self.path)?;
        serde_json::to_writer_pretty(
            BufWriter::new(file),
            &SessionOut {
                version: SESSION_VERSION,
                palettizer,
            },
        )?;
        info!(path = %self.path.display(), "session saved");
        Ok(())
    }
}
