//! Core library for palettizing the textures of a set of models.
//!
//! - Groups: textures are assigned to the smallest set of named groups that every model using
//!   them can see; groups depend on each other and more specific groups win ties.
//! - Pages: each group packs its textures onto shared palette images (MaxRects, best area fit);
//!   textures that cannot or should not share a page are copied standalone.
//! - Incremental: records persist between runs, and generated images are diffed against the
//!   previous run so only stale files are rewritten or removed.
//!
//! Quick example:
//! ```ignore
//! use tex_palette_core::prelude::*;
//! # fn main() -> anyhow::Result<()> {
//! let rules = RuleSet::from_path("textures.yaml")?;
//! let mut io = FsImageStore::new();
//! let mut p = Palettizer::new(PaletteConfig::default());
//! p.read_rules(&rules)?;
//! let mut models = vec![ModelManifest::from_path("hero.model.json")?];
//! p.load_models(&mut models);
//! p.process_command_line_models(&rules, &io, false);
//! p.generate_images(&mut io, false);
//! println!("{}", p.report().summary());
//! # Ok(()) }
//! ```

pub mod compositing;
pub mod config;
pub mod dest;
pub mod error;
pub mod group;
pub mod manifest;
pub mod model;
pub mod packer;
pub mod palettizer;
pub mod placement;
pub mod properties;
pub mod report;
pub mod rules;
pub mod session;
pub mod source;
pub mod store;
pub mod texture;

pub use config::*;
pub use dest::{DestImage, DestPlan, DestSignature, canonical_filename, diff_dests};
pub use error::*;
pub use group::{Groups, PalettePage, TextureGroup};
pub use manifest::{ModelManifest, ModelSource, TextureRefSpec, TextureRemap};
pub use model::{ModelRecord, TextureReference};
pub use palettizer::Palettizer;
pub use placement::{OmitReason, PlacedAt, Placement, UvRange};
pub use properties::{TextureProperties, TextureRequest};
pub use report::RunReport;
pub use rules::{GroupDefinition, Matcher, ModelDirectives, RuleSet, TextureDirectives};
pub use session::{JsonSessionStore, SessionStore};
pub use source::SourceImage;
pub use store::{FsImageStore, ImageHeader, ImageStore, MemoryImageStore};
pub use texture::TextureRecord;

/// Convenience prelude for common types and functions.
/// Importing `tex_palette_core::prelude::*` brings the primary APIs into scope.
pub mod prelude {
    pub use crate::config::{ImageType, PaletteConfig, PaletteConfigBuilder};
    pub use crate::manifest::{ModelManifest, ModelSource, TextureRefSpec};
    pub use crate::palettizer::Palettizer;
    pub use crate::placement::OmitReason;
    pub use crate::rules::{Matcher, RuleSet};
    pub use crate::session::{JsonSessionStore, SessionStore};
    pub use crate::store::{FsImageStore, ImageStore, MemoryImageStore};
}
