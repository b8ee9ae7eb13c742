//! Generated output images and the differencer that keeps them in step with what is required.

use crate::config::TextureFormat;
use crate::packer::Rect;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// One texture blitted onto a palette page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageOccupant {
    pub rect: Rect,
    pub margin: u32,
    pub content: TextureContent,
}

/// Everything that decides the pixels of a texture once resampled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TextureContent {
    pub texture: String,
    pub source: Option<String>,
    pub source_modified: Option<u64>,
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub format: TextureFormat,
}

/// Content signature of a generated image; the image is regenerated when it changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DestSignature {
    Texture(TextureContent),
    Page {
        width: u32,
        height: u32,
        occupants: Vec<PageOccupant>,
    },
}

/// A generated image, keyed by canonical output filename.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DestImage {
    pub filename: String,
    pub signature: DestSignature,
}

impl DestImage {
    pub fn new(filename: impl Into<String>, signature: DestSignature) -> Self {
        Self {
            filename: filename.into(),
            signature,
        }
    }
}

/// Normalises an output path so equal files compare equal: forward slashes, no `./` prefix.
pub fn canonical_filename(path: &str) -> String {
    let mut s = path.replace('\\', "/");
    while let Some(rest) = s.strip_prefix("./") {
        s = rest.to_string();
    }
    while s.contains("//") {
        s = s.replace("//", "/");
    }
    s
}

/// Work needed to bring the generated files in line with the required set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DestPlan {
    /// Previously generated, no longer required.
    pub remove: Vec<String>,
    /// Required and not previously generated.
    pub copy: Vec<String>,
    /// Required and previously generated, but with a different signature.
    pub refresh: Vec<String>,
    /// Required and up to date.
    pub unchanged: Vec<String>,
}

impl DestPlan {
    /// Files that must be (re)written, in filename order within each kind.
    pub fn to_generate(&self) -> impl Iterator<Item = &String> {
        self.copy.iter().chain(self.refresh.iter())
    }

    pub fn is_noop(&self) -> bool {
        self.remove.is_empty() && self.copy.is_empty() && self.refresh.is_empty()
    }
}

/// Lock-step walk over two filename-sorted tables.
///
/// With `redo_all` every old file is removed and every new file is generated regardless of
/// signatures.
pub fn diff_dests<S: PartialEq>(
    new: &BTreeMap<String, S>,
    old: &BTreeMap<String, S>,
    redo_all: bool,
) -> DestPlan {
    let mut plan = DestPlan::default();
    if redo_all {
        plan.remove = old.keys().cloned().collect();
        plan.copy = new.keys().cloned().collect();
        return plan;
    }

    let mut ni = new.iter().peekable();
    let mut oi = old.iter().peekable();
    loop {
        match (ni.peek(), oi.peek()) {
            (Some((nk, nv)), Some((ok, ov))) => match nk.cmp(ok) {
                Ordering::Less => {
                    plan.copy.push((*nk).clone());
                    ni.next();
                }
                Ordering::Greater => {
                    plan.remove.push((*ok).clone());
                    oi.next();
                }
                Ordering::Equal => {
                    if nv != ov {
                        plan.refresh.push((*nk).clone());
                    } else {
                        plan.unchanged.push((*nk).clone());
                    }
                    ni.next();
                    oi.next();
                }
            },
            (Some((nk, _)), None) => {
                plan.copy.push((*nk).clone());
                ni.next();
            }
            (None, Some((ok, _))) => {
                plan.remove.push((*ok).clone());
                oi.next();
            }
            (None, None) => break,
        }
    }
    plan
}
