use crate::placement::OmitReason;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Counts describing the state of a palettizer after a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunReport {
    pub num_groups: usize,
    pub num_textures: usize,
    pub num_models: usize,
    /// Placements packed onto a shared palette page.
    pub num_palettized: usize,
    /// Placements copied standalone, by reason.
    pub omitted: BTreeMap<String, usize>,
    pub num_pages: usize,
    pub surprise_textures: Vec<String>,
    pub surprise_models: Vec<String>,
    /// Textures referenced by no model.
    pub unused_textures: Vec<String>,
}

impl RunReport {
    pub(crate) fn note_omitted(&mut self, reason: OmitReason) {
        let key = format!("{:?}", reason).to_lowercase();
        *self.omitted.entry(key).or_default() += 1;
    }

    pub fn num_omitted(&self) -> usize {
        self.omitted.values().sum()
    }

    /// Returns a human-readable summary of the report.
    pub fn summary(&self) -> String {
        format!(
            "Groups: {}, Textures: {}, Models: {}, Palettized: {}, Standalone: {}, Pages: {}, Surprises: {} textures / {} models",
            self.num_groups,
            self.num_textures,
            self.num_models,
            self.num_palettized,
            self.num_omitted(),
            self.num_pages,
            self.surprise_textures.len(),
            self.surprise_models.len(),
        )
    }
}
