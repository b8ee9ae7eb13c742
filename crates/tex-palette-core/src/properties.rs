use crate::config::{FilterMode, TextureFormat};
use serde::{Deserialize, Serialize};

/// Properties that decide how a texture is stored; a change forces it to be laid out again.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TextureProperties {
    pub channels: Option<u8>,
    pub format: TextureFormat,
    pub min_filter: FilterMode,
    pub mag_filter: FilterMode,
}

impl TextureProperties {
    pub fn uses_alpha(&self) -> bool {
        matches!(self.channels, Some(2) | Some(4))
    }

    /// Fills every still-unspecified property with its natural default.
    pub fn fully_define(&mut self) {
        if let Some(channels) = self.channels {
            let natural = TextureFormat::for_channels(channels);
            self.format = match (self.format, channels) {
                (TextureFormat::Unspecified, _) => natural,
                // an alpha format on an image without alpha degrades to its color format
                (TextureFormat::Rgba, 3) => TextureFormat::Rgb,
                (TextureFormat::LuminanceAlpha, 1) => TextureFormat::Luminance,
                (format, _) => format,
            };
        }
        if self.min_filter == FilterMode::Unspecified {
            self.min_filter = FilterMode::Linear;
        }
        if self.mag_filter == FilterMode::Unspecified {
            self.mag_filter = FilterMode::Linear;
        }
    }
}

/// What the matching rules asked for a texture in the current run. Never persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TextureRequest {
    /// Explicit final size in pixels.
    pub size: Option<(u32, u32)>,
    /// Final size as a percentage of the source size.
    pub scale: Option<f64>,
    pub channels: Option<u8>,
    pub format: Option<TextureFormat>,
    #[serde(rename = "minfilter")]
    pub min_filter: Option<FilterMode>,
    #[serde(rename = "magfilter")]
    pub mag_filter: Option<FilterMode>,
    pub omit: bool,
    pub margin: Option<u32>,
    #[serde(rename = "repeat")]
    pub repeat_threshold: Option<f64>,
}

impl TextureRequest {
    /// Overlays `other` onto `self`; options set in `other` win.
    pub fn merge(&mut self, other: &TextureRequest) {
        if other.size.is_some() {
            self.size = other.size;
            self.scale = None;
        }
        if other.scale.is_some() {
            self.scale = other.scale;
            self.size = None;
        }
        if other.channels.is_some() {
            self.channels = other.channels;
        }
        if other.format.is_some() {
            self.format = other.format;
        }
        if other.min_filter.is_some() {
            self.min_filter = other.min_filter;
        }
        if other.mag_filter.is_some() {
            self.mag_filter = other.mag_filter;
        }
        self.omit |= other.omit;
        if other.margin.is_some() {
            self.margin = other.margin;
        }
        if other.repeat_threshold.is_some() {
            self.repeat_threshold = other.repeat_threshold;
        }
    }
}
