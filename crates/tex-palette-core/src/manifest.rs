//! Model collaborator: the narrow view of a model file the palettizer needs.

use crate::error::{PaletteError, Result};
use crate::placement::UvRange;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One texture reference found while scanning a model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextureRefSpec {
    pub texture: String,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alpha_filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uv_range: Option<UvRange>,
}

impl TextureRefSpec {
    /// A reference using the whole texture once, named after its file stem.
    pub fn new(filename: impl Into<String>) -> Self {
        let filename = filename.into();
        let texture = Path::new(&filename)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| filename.clone());
        Self {
            texture,
            filename,
            alpha_filename: None,
            uv_range: None,
        }
    }

    pub fn named(mut self, texture: impl Into<String>) -> Self {
        self.texture = texture.into();
        self
    }

    pub fn with_alpha(mut self, alpha_filename: impl Into<String>) -> Self {
        self.alpha_filename = Some(alpha_filename.into());
        self
    }

    pub fn with_uv(mut self, min: [f64; 2], max: [f64; 2]) -> Self {
        self.uv_range = Some(UvRange { min, max });
        self
    }
}

/// Anything the palettizer can scan for texture references.
pub trait ModelSource {
    fn name(&self) -> &str;
    fn scan_texture_references(&mut self) -> Result<Vec<TextureRefSpec>>;
}

/// JSON description of one model: its name and the textures it uses.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelManifest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub textures: Vec<TextureRefSpec>,
}

impl ModelManifest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            textures: Vec::new(),
        }
    }

    pub fn with_texture(mut self, spec: TextureRefSpec) -> Self {
        self.textures.push(spec);
        self
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Reads a manifest; a missing name defaults to the file stem.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| PaletteError::read(path.display().to_string(), e))?;
        let mut manifest: Self = serde_json::from_str(&text)
            .map_err(|e| PaletteError::read(path.display().to_string(), e))?;
        if manifest.name.is_empty() {
            manifest.name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
        }
        Ok(manifest)
    }
}

impl ModelSource for ModelManifest {
    fn name(&self) -> &str {
        &self.name
    }

    fn scan_texture_references(&mut self) -> Result<Vec<TextureRefSpec>> {
        Ok(self.textures.clone())
    }
}

/// How one texture reference of a model must be rewritten.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextureRemap {
    pub texture: String,
    pub group: Option<String>,
    /// Image that now carries the texture: a palette page or a standalone copy.
    pub image: Option<String>,
    /// UV transform applied to the model's coordinates, in image space.
    pub scale: [f64; 2],
    pub offset: [f64; 2],
}
