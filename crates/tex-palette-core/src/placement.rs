use crate::packer::Rect;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Why a placement is not packed onto a shared palette page.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OmitReason {
    #[default]
    None,
    /// A matching rule said `omit`.
    Explicit,
    /// No source image could be read, so the size is unknown.
    SizeUnknown,
    /// It would be the only texture on its palette page.
    Solitary,
    /// The models tile it further than the repeat threshold allows.
    Repeats,
    /// It does not fit on an empty palette page.
    TooBig,
}

/// Range of UV coordinates a model uses on a texture.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct UvRange {
    pub min: [f64; 2],
    pub max: [f64; 2],
}

impl UvRange {
    /// The whole texture exactly once.
    pub fn full() -> Self {
        Self {
            min: [0.0, 0.0],
            max: [1.0, 1.0],
        }
    }

    pub fn union(&self, other: &UvRange) -> UvRange {
        UvRange {
            min: [self.min[0].min(other.min[0]), self.min[1].min(other.min[1])],
            max: [self.max[0].max(other.max[0]), self.max[1].max(other.max[1])],
        }
    }

    pub fn extent(&self) -> [f64; 2] {
        [
            (self.max[0] - self.min[0]).max(0.0),
            (self.max[1] - self.min[1]).max(0.0),
        ]
    }
}

/// Position of a placement on one of its group's palette pages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlacedAt {
    pub page: u32,
    /// Texture pixels, excluding the margin.
    pub rect: Rect,
}

/// Inputs to [`Placement::determine_size`] gathered from the owning texture and the config.
#[derive(Debug, Clone, Copy)]
pub struct SizeRequest {
    pub texture_size: Option<(u32, u32)>,
    pub omit: bool,
    pub margin: u32,
    pub repeat_threshold: f64,
    pub palette_size: (u32, u32),
}

/// The assignment of one texture to one group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Placement {
    id: u64,
    texture: String,
    group: String,
    size: Option<(u32, u32)>,
    margin: u32,
    omit_reason: OmitReason,
    placed: Option<PlacedAt>,
    dest: Option<String>,
    #[serde(skip)]
    uv_range: Option<UvRange>,
    #[serde(skip)]
    reference_count: u32,
    #[serde(skip)]
    forced: bool,
}

impl Placement {
    pub(crate) fn new(id: u64, texture: &str, group: &str) -> Self {
        Self {
            id,
            texture: texture.to_string(),
            group: group.to_string(),
            size: None,
            margin: 0,
            omit_reason: OmitReason::None,
            placed: None,
            dest: None,
            uv_range: None,
            reference_count: 0,
            forced: false,
        }
    }

    /// Identity of this placement; stable for as long as the texture stays in the group.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn texture(&self) -> &str {
        &self.texture
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Required pixel size on a palette page, once determined.
    pub fn size(&self) -> Option<(u32, u32)> {
        self.size
    }

    pub fn margin(&self) -> u32 {
        self.margin
    }

    pub fn omit_reason(&self) -> OmitReason {
        self.omit_reason
    }

    pub fn is_omitted(&self) -> bool {
        self.omit_reason != OmitReason::None
    }

    pub fn placed(&self) -> Option<PlacedAt> {
        self.placed
    }

    pub fn is_placed(&self) -> bool {
        self.placed.is_some()
    }

    /// Canonical filename of the standalone image generated for this placement, if any.
    pub fn dest(&self) -> Option<&str> {
        self.dest.as_deref()
    }

    pub fn uv_range(&self) -> Option<UvRange> {
        self.uv_range
    }

    pub fn reference_count(&self) -> u32 {
        self.reference_count
    }

    /// True if this placement was sent back for re-layout during the current session.
    pub fn was_force_replaced(&self) -> bool {
        self.forced
    }

    /// Drops the current palette position so the placement is laid out again.
    pub fn force_replace(&mut self) {
        if self.placed.is_some() {
            debug!(texture = %self.texture, group = %self.group, "force re-layout");
        }
        self.placed = None;
        self.forced = true;
    }

    pub(crate) fn begin_session(&mut self) {
        self.forced = false;
    }

    pub(crate) fn clear_references(&mut self) {
        self.uv_range = None;
        self.reference_count = 0;
    }

    pub(crate) fn note_reference(&mut self, uv: Option<UvRange>) {
        self.reference_count += 1;
        let uv = uv.unwrap_or_else(UvRange::full);
        self.uv_range = Some(match self.uv_range {
            Some(prev) => prev.union(&uv),
            None => uv,
        });
    }

    pub(crate) fn place_at(&mut self, at: PlacedAt) {
        self.placed = Some(at);
    }

    pub(crate) fn set_omit_reason(&mut self, reason: OmitReason) {
        self.omit_reason = reason;
    }

    pub(crate) fn set_dest(&mut self, dest: Option<String>) {
        self.dest = dest;
    }

    /// Recomputes the required size and omission status. A change of size or margin
    /// forces the placement to be laid out again.
    pub fn determine_size(&mut self, req: &SizeRequest) {
        let uv = self.uv_range.unwrap_or_else(UvRange::full);
        let extent = uv.extent();
        let mut reason = OmitReason::None;
        let pad = req.margin.saturating_mul(2);
        let size = match req.texture_size {
            Some((w, h)) => {
                let rw = ((w as f64 * extent[0]).ceil() as u32).max(1);
                let rh = ((h as f64 * extent[1]).ceil() as u32).max(1);
                Some((rw, rh))
            }
            None => None,
        };

        if req.omit {
            reason = OmitReason::Explicit;
        } else if let Some((rw, rh)) = size {
            let threshold = req.repeat_threshold / 100.0;
            if extent[0] > threshold || extent[1] > threshold {
                reason = OmitReason::Repeats;
            } else if rw.saturating_add(pad) > req.palette_size.0
                || rh.saturating_add(pad) > req.palette_size.1
            {
                reason = OmitReason::TooBig;
            }
        } else {
            reason = OmitReason::SizeUnknown;
        }

        if size != self.size || req.margin != self.margin {
            self.force_replace();
        }
        self.size = size;
        self.margin = req.margin;
        self.omit_reason = reason;
        if reason != OmitReason::None {
            self.placed = None;
        }
    }

    /// UV scale and offset mapping the model's original coordinates onto the page,
    /// in image space (origin at the top-left of the page).
    pub fn uv_transform(&self, page_size: (u32, u32)) -> Option<([f64; 2], [f64; 2])> {
        let at = self.placed?;
        let uv = self.uv_range.unwrap_or_else(UvRange::full);
        let extent = uv.extent();
        let (pw, ph) = (page_size.0 as f64, page_size.1 as f64);
        let su = if extent[0] > 0.0 { at.rect.w as f64 / (extent[0] * pw) } else { 0.0 };
        let sv = if extent[1] > 0.0 { at.rect.h as f64 / (extent[1] * ph) } else { 0.0 };
        let ou = at.rect.x as f64 / pw - uv.min[0] * su;
        let ov = at.rect.y as f64 / ph - uv.min[1] * sv;
        Some(([su, sv], [ou, ov]))
    }
}
