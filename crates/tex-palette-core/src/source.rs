use crate::store::{ImageHeader, ImageStore};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

/// One candidate source file (plus optional separate alpha file) for a texture.
///
/// The header is fetched lazily: the first query in a session re-probes the file when it is
/// unknown or its modification time moved, later queries reuse the cached answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceImage {
    filename: String,
    alpha_filename: Option<String>,
    header: Option<ImageHeader>,
    last_modified: Option<u64>,
    #[serde(skip)]
    checked: bool,
    #[serde(skip)]
    model_count: u32,
}

impl SourceImage {
    pub fn new(filename: impl Into<String>, alpha_filename: Option<String>) -> Self {
        Self {
            filename: filename.into(),
            alpha_filename,
            header: None,
            last_modified: None,
            checked: false,
            model_count: 0,
        }
    }

    /// Key identifying a `(filename, alpha_filename)` pair within one texture.
    pub fn key_for(filename: &str, alpha_filename: Option<&str>) -> String {
        format!("{}:{}", filename, alpha_filename.unwrap_or(""))
    }

    pub fn key(&self) -> String {
        Self::key_for(&self.filename, self.alpha_filename.as_deref())
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn alpha_filename(&self) -> Option<&str> {
        self.alpha_filename.as_deref()
    }

    /// Number of model references to this exact source seen this session.
    pub fn model_count(&self) -> u32 {
        self.model_count
    }

    pub(crate) fn increment_model_count(&mut self) {
        self.model_count += 1;
    }

    pub(crate) fn reset_session(&mut self) {
        self.model_count = 0;
        self.checked = false;
    }

    pub fn is_size_known(&self) -> bool {
        self.header.is_some()
    }

    pub fn header(&self) -> Option<ImageHeader> {
        self.header
    }

    pub fn x_size(&self) -> u32 {
        self.header.map(|h| h.width).unwrap_or(0)
    }

    pub fn y_size(&self) -> u32 {
        self.header.map(|h| h.height).unwrap_or(0)
    }

    pub fn channels(&self) -> Option<u8> {
        self.header.map(|h| h.channels)
    }

    pub fn last_modified(&self) -> Option<u64> {
        self.last_modified
    }

    /// Ensures the size and channel count are known; returns false if the file is unreadable.
    pub fn get_size(&mut self, io: &dyn ImageStore) -> bool {
        if self.checked {
            return self.header.is_some();
        }
        self.checked = true;
        let stamp = io.modified(Path::new(&self.filename));
        if self.header.is_some() && stamp.is_some() && stamp == self.last_modified {
            return true;
        }
        self.last_modified = stamp;
        match io.probe(Path::new(&self.filename)) {
            Ok(mut header) => {
                if self.alpha_filename.is_some() && header.channels % 2 == 1 {
                    // separate alpha file adds an alpha channel to a color-only image
                    header.channels += 1;
                }
                debug!(file = %self.filename, w = header.width, h = header.height, ch = header.channels, "probed source");
                self.header = Some(header);
                true
            }
            Err(e) => {
                warn!(file = %self.filename, error = %e, "source image unreadable");
                self.header = None;
                false
            }
        }
    }
}
