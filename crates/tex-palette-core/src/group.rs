use crate::dest::DestImage;
use crate::packer::{MaxRectsPacker, Rect};
use crate::placement::{OmitReason, PlacedAt, Placement};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// One shared palette image of a group.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PalettePage {
    pub id: u32,
    pub width: u32,
    pub height: u32,
}

fn first_level() -> u32 {
    1
}

/// A named bucket of textures that may share palette pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextureGroup {
    name: String,
    dirname: Option<String>,
    #[serde(default = "first_level")]
    dependency_level: u32,
    depends_on: BTreeSet<String>,
    next_placement_id: u64,
    next_page_id: u32,
    pages: Vec<PalettePage>,
    /// Palette page images generated by the last update, keyed by canonical filename.
    written_pages: BTreeMap<String, DestImage>,
    #[serde(skip)]
    textures: BTreeSet<String>,
}

impl TextureGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dirname: None,
            dependency_level: 1,
            depends_on: BTreeSet::new(),
            next_placement_id: 1,
            next_page_id: 0,
            pages: Vec::new(),
            written_pages: BTreeMap::new(),
            textures: BTreeSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dirname(&self) -> Option<&str> {
        self.dirname.as_deref()
    }

    pub fn set_dirname(&mut self, dirname: impl Into<String>) {
        self.dirname = Some(dirname.into());
    }

    /// Directory substituted for `%g` in the map directory template.
    pub fn dir_or_name(&self) -> &str {
        self.dirname.as_deref().unwrap_or(&self.name)
    }

    /// Lower levels are more specific and win ties during group cover selection.
    pub fn dependency_level(&self) -> u32 {
        self.dependency_level
    }

    pub fn depends_on(&self) -> &BTreeSet<String> {
        &self.depends_on
    }

    pub fn add_depends(&mut self, other: impl Into<String>) {
        self.depends_on.insert(other.into());
    }

    pub fn clear_depends(&mut self) {
        self.depends_on.clear();
    }

    /// Number of textures currently assigned to this group.
    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn textures(&self) -> &BTreeSet<String> {
        &self.textures
    }

    pub fn pages(&self) -> &[PalettePage] {
        &self.pages
    }

    pub fn page(&self, id: u32) -> Option<&PalettePage> {
        self.pages.iter().find(|p| p.id == id)
    }

    pub fn written_pages(&self) -> &BTreeMap<String, DestImage> {
        &self.written_pages
    }

    pub(crate) fn set_written_pages(&mut self, pages: BTreeMap<String, DestImage>) {
        self.written_pages = pages;
    }

    /// Creates the placement recording that `texture` now belongs to this group.
    pub fn prepare(&mut self, texture: &str) -> Placement {
        self.textures.insert(texture.to_string());
        let id = self.next_placement_id;
        self.next_placement_id += 1;
        Placement::new(id, texture, &self.name)
    }

    /// Forgets a placement that is being destroyed.
    pub fn unprepare(&mut self, placement: &Placement) {
        self.textures.remove(placement.texture());
    }

    pub(crate) fn relink_texture(&mut self, texture: &str) {
        self.textures.insert(texture.to_string());
    }

    /// Forgets every page so all placements are laid out from scratch next time.
    pub(crate) fn reset_pages(&mut self) {
        self.pages.clear();
        self.next_page_id = 0;
    }

    /// Lays out every unplaced, non-omitted placement of this group on its pages,
    /// opening new pages as needed, then flags placements alone on a page as solitary.
    ///
    /// `placements` must be every placement of this group.
    pub(crate) fn place_all(&mut self, placements: &mut [&mut Placement], palette_size: (u32, u32)) {
        let mut packers: BTreeMap<u32, MaxRectsPacker> = self
            .pages
            .iter()
            .map(|p| (p.id, MaxRectsPacker::new(p.width, p.height)))
            .collect();
        let mut counts: BTreeMap<u32, usize> = BTreeMap::new();

        for p in placements.iter_mut() {
            // solitary occupants keep their spot; their status is decided again below
            if p.omit_reason() == OmitReason::Solitary && p.is_placed() {
                p.set_omit_reason(OmitReason::None);
            }
            if p.is_omitted() {
                continue;
            }
            let Some(at) = p.placed() else { continue };
            match packers.get_mut(&at.page) {
                Some(packer) => {
                    packer.occupy(at.rect.expand(p.margin()));
                    *counts.entry(at.page).or_default() += 1;
                }
                None => p.force_replace(),
            }
        }

        let mut pending: Vec<usize> = (0..placements.len())
            .filter(|&i| {
                let p = &placements[i];
                !p.is_omitted() && !p.is_placed() && p.size().is_some()
            })
            .collect();
        pending.sort_by(|&a, &b| {
            let area = |i: usize| {
                let (w, h) = placements[i].size().unwrap_or((0, 0));
                w as u64 * h as u64
            };
            area(b)
                .cmp(&area(a))
                .then_with(|| placements[a].texture().cmp(placements[b].texture()))
        });

        for idx in pending {
            let p = &mut placements[idx];
            let Some((w, h)) = p.size() else { continue };
            let m = p.margin();
            let pad = m.saturating_mul(2);
            let (rw, rh) = (w.saturating_add(pad), h.saturating_add(pad));

            let mut target: Option<(u32, Rect)> = None;
            for (id, packer) in packers.iter_mut() {
                if let Some(r) = packer.insert(rw, rh) {
                    target = Some((*id, r));
                    break;
                }
            }
            if target.is_none() {
                let id = self.next_page_id;
                self.next_page_id += 1;
                self.pages.push(PalettePage {
                    id,
                    width: palette_size.0,
                    height: palette_size.1,
                });
                let mut packer = MaxRectsPacker::new(palette_size.0, palette_size.1);
                target = packer.insert(rw, rh).map(|r| (id, r));
                packers.insert(id, packer);
            }
            match target {
                Some((page, r)) => {
                    p.place_at(PlacedAt {
                        page,
                        rect: Rect::new(r.x + m, r.y + m, w, h),
                    });
                    *counts.entry(page).or_default() += 1;
                    debug!(group = %self.name, texture = %p.texture(), page, x = r.x + m, y = r.y + m, "placed");
                }
                None => {
                    warn!(group = %self.name, texture = %p.texture(), w, h, "does not fit an empty palette page");
                    p.set_omit_reason(OmitReason::TooBig);
                }
            }
        }

        self.pages
            .retain(|page| counts.get(&page.id).copied().unwrap_or(0) > 0);

        for p in placements.iter_mut() {
            if p.is_omitted() {
                continue;
            }
            if let Some(at) = p.placed() {
                if counts.get(&at.page).copied().unwrap_or(0) == 1 {
                    p.set_omit_reason(OmitReason::Solitary);
                }
            }
        }
    }
}

/// Name-keyed table of groups; the only place groups are created.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Groups {
    map: BTreeMap<String, TextureGroup>,
}

impl Groups {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the named group, creating it on first reference.
    pub fn get_or_create(&mut self, name: &str) -> &mut TextureGroup {
        self.map
            .entry(name.to_string())
            .or_insert_with(|| TextureGroup::new(name))
    }

    pub fn get(&self, name: &str) -> Option<&TextureGroup> {
        self.map.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut TextureGroup> {
        self.map.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TextureGroup> {
        self.map.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut TextureGroup> {
        self.map.values_mut()
    }

    pub fn names(&self) -> Vec<String> {
        self.map.keys().cloned().collect()
    }

    /// `requested` plus every group reachable through `depends_on`. Cycles are harmless.
    pub fn complete_closure(&self, requested: &BTreeSet<String>) -> BTreeSet<String> {
        let mut complete = BTreeSet::new();
        let mut stack: Vec<&str> = requested.iter().map(String::as_str).collect();
        while let Some(name) = stack.pop() {
            if !complete.insert(name.to_string()) {
                continue;
            }
            if let Some(group) = self.map.get(name) {
                stack.extend(
                    group
                        .depends_on
                        .iter()
                        .filter(|d| !complete.contains(*d))
                        .map(String::as_str),
                );
            }
        }
        complete
    }

    /// Level 1 for groups nobody depends on; otherwise one more than the highest level of any
    /// dependent. Levels are capped at the number of groups so cycles terminate.
    pub fn compute_dependency_levels(&mut self) {
        let cap = (self.map.len() as u32).max(1);
        let edges: Vec<(String, String)> = self
            .map
            .values()
            .flat_map(|g| g.depends_on.iter().map(move |d| (g.name.clone(), d.clone())))
            .collect();
        let mut levels: BTreeMap<String, u32> = self.map.keys().map(|k| (k.clone(), 1)).collect();

        for _ in 0..cap {
            let mut changed = false;
            for (from, to) in &edges {
                let want = (levels.get(from).copied().unwrap_or(1) + 1).min(cap);
                let level = levels.entry(to.clone()).or_insert(1);
                if *level < want {
                    *level = want;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        for (name, level) in levels {
            if let Some(group) = self.map.get_mut(&name) {
                group.dependency_level = level;
            }
        }
    }
}
