use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Output image file types the palettizer can generate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ImageType {
    Png,
    Jpeg,
    Bmp,
    Tga,
}

impl ImageType {
    /// File extension used for generated images of this type.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Bmp => "bmp",
            Self::Tga => "tga",
        }
    }

    pub fn image_format(&self) -> image::ImageFormat {
        match self {
            Self::Png => image::ImageFormat::Png,
            Self::Jpeg => image::ImageFormat::Jpeg,
            Self::Bmp => image::ImageFormat::Bmp,
            Self::Tga => image::ImageFormat::Tga,
        }
    }

    /// False when the encoder cannot store an alpha channel.
    pub fn supports_alpha(&self) -> bool {
        !matches!(self, Self::Jpeg)
    }
}

impl FromStr for ImageType {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpg" | "jpeg" => Ok(Self::Jpeg),
            "bmp" => Ok(Self::Bmp),
            "tga" => Ok(Self::Tga),
            _ => Err(()),
        }
    }
}

/// Texel format a texture is declared with in the rewritten models.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum TextureFormat {
    #[default]
    Unspecified,
    Rgba,
    Rgb,
    Alpha,
    Luminance,
    LuminanceAlpha,
}

impl TextureFormat {
    /// Natural format for an image with `channels` channels.
    pub fn for_channels(channels: u8) -> Self {
        match channels {
            1 => Self::Luminance,
            2 => Self::LuminanceAlpha,
            3 => Self::Rgb,
            _ => Self::Rgba,
        }
    }
}

impl FromStr for TextureFormat {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rgba" => Ok(Self::Rgba),
            "rgb" => Ok(Self::Rgb),
            "alpha" => Ok(Self::Alpha),
            "luminance" | "l" => Ok(Self::Luminance),
            "luminance_alpha" | "la" => Ok(Self::LuminanceAlpha),
            "unspecified" => Ok(Self::Unspecified),
            _ => Err(()),
        }
    }
}

/// Minification / magnification filter requested for a texture.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    #[default]
    Unspecified,
    Nearest,
    Linear,
    Mipmap,
}

impl FromStr for FilterMode {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nearest" => Ok(Self::Nearest),
            "linear" => Ok(Self::Linear),
            "mipmap" => Ok(Self::Mipmap),
            "unspecified" => Ok(Self::Unspecified),
            _ => Err(()),
        }
    }
}

/// Session-wide palettizing parameters. Persisted with the session so later runs reuse them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaletteConfig {
    /// Width of every palette page in pixels.
    pub palette_width: u32,
    /// Height of every palette page in pixels.
    pub palette_height: u32,
    /// Pixels reserved around each texture on a palette page (filled by edge extrusion).
    pub margin: u32,
    /// UV extent (percent of the texture) above which a texture is not palettized.
    pub repeat_threshold: f64,
    /// Round texture sizes taken from source images up to a power of two.
    pub force_power_of_two: bool,
    /// Output directory template; `%g` expands to the group's directory (or its name).
    #[serde(default = "default_map_dir")]
    pub map_dir: String,
    /// Group assigned to models no rule gives a group.
    #[serde(default = "default_group_name")]
    pub default_group: String,
    /// File type of generated images. `None` means no usable output type.
    pub image_type: Option<ImageType>,
    /// Directory a relative `map_dir` is resolved against. Supplied per run, never persisted.
    #[serde(skip)]
    pub map_root: Option<String>,
}

impl Default for PaletteConfig {
    fn default() -> Self {
        Self {
            palette_width: 512,
            palette_height: 512,
            margin: 2,
            repeat_threshold: 250.0,
            force_power_of_two: true,
            map_dir: default_map_dir(),
            default_group: default_group_name(),
            image_type: Some(ImageType::Png),
            map_root: None,
        }
    }
}

impl PaletteConfig {
    /// Validates the configuration parameters.
    ///
    /// Returns a `Config` error if no output image type is available or the
    /// palette page cannot hold even a 1x1 texture with its margin.
    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::PaletteError;

        if self.image_type.is_none() {
            return Err(PaletteError::Config(
                "no valid output image type; set `imagetype` in the rules file".into(),
            ));
        }
        if self.palette_width == 0 || self.palette_height == 0 {
            return Err(PaletteError::Config(format!(
                "palette size {}x{} is empty",
                self.palette_width, self.palette_height
            )));
        }
        let reserved = self.margin.saturating_mul(2);
        if reserved >= self.palette_width || reserved >= self.palette_height {
            return Err(PaletteError::Config(format!(
                "margin ({}) * 2 leaves no room on a {}x{} palette",
                self.margin, self.palette_width, self.palette_height
            )));
        }
        if !(self.repeat_threshold > 0.0) {
            return Err(PaletteError::Config(format!(
                "repeat threshold must be positive, got {}",
                self.repeat_threshold
            )));
        }
        Ok(())
    }

    /// Output directory for images belonging to a group with directory `group_dir`.
    pub fn map_dir_for(&self, group_dir: &str) -> String {
        let dir = self.map_dir.replace("%g", group_dir);
        match self.map_root.as_deref() {
            Some(root) if !root.is_empty() && !Path::new(&dir).is_absolute() => {
                format!("{}/{}", root.trim_end_matches(['/', '\\']), dir)
            }
            _ => dir,
        }
    }

    /// Create a fluent builder for `PaletteConfig`.
    pub fn builder() -> PaletteConfigBuilder {
        PaletteConfigBuilder::new()
    }
}

fn default_map_dir() -> String {
    "%g".into()
}
fn default_group_name() -> String {
    "default".into()
}

/// Builder for `PaletteConfig` for ergonomic construction.
#[derive(Debug, Default, Clone)]
pub struct PaletteConfigBuilder {
    cfg: PaletteConfig,
}

impl PaletteConfigBuilder {
    pub fn new() -> Self {
        Self {
            cfg: PaletteConfig::default(),
        }
    }
    pub fn palette_size(mut self, w: u32, h: u32) -> Self {
        self.cfg.palette_width = w;
        self.cfg.palette_height = h;
        self
    }
    pub fn margin(mut self, v: u32) -> Self {
        self.cfg.margin = v;
        self
    }
    pub fn repeat_threshold(mut self, v: f64) -> Self {
        self.cfg.repeat_threshold = v;
        self
    }
    pub fn force_power_of_two(mut self, v: bool) -> Self {
        self.cfg.force_power_of_two = v;
        self
    }
    pub fn map_dir(mut self, v: impl Into<String>) -> Self {
        self.cfg.map_dir = v.into();
        self
    }
    pub fn map_root(mut self, v: impl Into<String>) -> Self {
        self.cfg.map_root = Some(v.into());
        self
    }
    pub fn default_group(mut self, v: impl Into<String>) -> Self {
        self.cfg.default_group = v.into();
        self
    }
    pub fn image_type(mut self, v: Option<ImageType>) -> Self {
        self.cfg.image_type = v;
        self
    }
    pub fn build(self) -> PaletteConfig {
        self.cfg
    }
}
