use crate::compositing;
use crate::config::PaletteConfig;
use crate::dest::{DestImage, DestSignature, TextureContent, canonical_filename, diff_dests};
use crate::error::Result;
use crate::group::Groups;
use crate::model::ModelRecord;
use crate::placement::{Placement, SizeRequest};
use crate::properties::{TextureProperties, TextureRequest};
use crate::rules::TextureDirectives;
use crate::source::SourceImage;
use crate::store::ImageStore;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, error, info, warn};

/// One logical texture: its candidate sources, group assignment and placements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextureRecord {
    name: String,
    sources: BTreeMap<String, SourceImage>,
    groups: BTreeSet<String>,
    placements: BTreeMap<String, Placement>,
    properties: TextureProperties,
    size: Option<(u32, u32)>,
    is_surprise: bool,
    ever_read_image: bool,
    forced_grayscale: bool,
    forced_unalpha: bool,
    dests: BTreeMap<String, DestImage>,

    #[serde(skip)]
    preferred_source: Option<String>,
    #[serde(skip)]
    referencing_models: BTreeSet<String>,
    #[serde(skip)]
    explicit_groups: BTreeSet<String>,
    #[serde(skip)]
    pre_match_properties: TextureProperties,
    #[serde(skip)]
    request: TextureRequest,
    #[serde(skip)]
    read_source: bool,
    #[serde(skip)]
    source_pixels: Option<DynamicImage>,
    #[serde(skip)]
    dest_pixels: Option<DynamicImage>,
}

fn load_pixels(source: &SourceImage, io: &dyn ImageStore) -> Result<DynamicImage> {
    let color = io.read(Path::new(source.filename()))?;
    match source.alpha_filename() {
        Some(alpha) => {
            let mask = io.read(Path::new(alpha))?;
            Ok(compositing::merge_alpha(&color, &mask))
        }
        None => Ok(color),
    }
}

impl TextureRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sources: BTreeMap::new(),
            groups: BTreeSet::new(),
            placements: BTreeMap::new(),
            properties: TextureProperties::default(),
            size: None,
            is_surprise: true,
            ever_read_image: false,
            forced_grayscale: false,
            forced_unalpha: false,
            dests: BTreeMap::new(),
            preferred_source: None,
            referencing_models: BTreeSet::new(),
            explicit_groups: BTreeSet::new(),
            pre_match_properties: TextureProperties::default(),
            request: TextureRequest::default(),
            read_source: false,
            source_pixels: None,
            dest_pixels: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sources(&self) -> &BTreeMap<String, SourceImage> {
        &self.sources
    }

    /// Returns the source record for this file pair, adding it on first request.
    pub fn get_source(&mut self, filename: &str, alpha_filename: Option<&str>) -> &mut SourceImage {
        let key = SourceImage::key_for(filename, alpha_filename);
        match self.sources.entry(key) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                self.preferred_source = None;
                self.read_source = false;
                self.source_pixels = None;
                self.dest_pixels = None;
                e.insert(SourceImage::new(filename, alpha_filename.map(str::to_string)))
            }
        }
    }

    /// Groups the texture is currently assigned to.
    pub fn groups(&self) -> &BTreeSet<String> {
        &self.groups
    }

    pub fn explicit_groups(&self) -> &BTreeSet<String> {
        &self.explicit_groups
    }

    pub fn placements(&self) -> &BTreeMap<String, Placement> {
        &self.placements
    }

    pub fn placement(&self, group: &str) -> Option<&Placement> {
        self.placements.get(group)
    }

    pub fn placement_mut(&mut self, group: &str) -> Option<&mut Placement> {
        self.placements.get_mut(group)
    }

    pub fn referencing_models(&self) -> &BTreeSet<String> {
        &self.referencing_models
    }

    pub fn properties(&self) -> &TextureProperties {
        &self.properties
    }

    pub fn request(&self) -> &TextureRequest {
        &self.request
    }

    /// Final pixel size, once known.
    pub fn size(&self) -> Option<(u32, u32)> {
        self.size
    }

    pub fn is_surprise(&self) -> bool {
        self.is_surprise
    }

    pub fn was_ever_read(&self) -> bool {
        self.ever_read_image
    }

    /// Standalone images generated by the last update, keyed by filename.
    pub fn dests(&self) -> &BTreeMap<String, DestImage> {
        &self.dests
    }

    pub(crate) fn begin_session(&mut self) {
        for source in self.sources.values_mut() {
            source.reset_session();
        }
        for placement in self.placements.values_mut() {
            placement.begin_session();
            placement.clear_references();
        }
        self.referencing_models.clear();
        self.preferred_source = None;
        self.read_source = false;
        self.source_pixels = None;
        self.dest_pixels = None;
    }

    pub(crate) fn note_model(&mut self, model: &str, source_key: &str) {
        self.referencing_models.insert(model.to_string());
        if let Some(source) = self.sources.get_mut(source_key) {
            source.increment_model_count();
            self.preferred_source = None;
        }
    }

    pub(crate) fn relink(&mut self, groups: &mut Groups) {
        self.groups = self.placements.keys().cloned().collect();
        for group in &self.groups {
            groups.get_or_create(group).relink_texture(&self.name);
        }
    }

    /// Key of the source used for size and pixel queries.
    ///
    /// Sources referenced by a model win over unreferenced ones, then larger pixel area, then
    /// newer modification time. If none has a known size the first key is returned.
    pub fn preferred_source_key(&mut self, io: &dyn ImageStore) -> Option<String> {
        if let Some(key) = &self.preferred_source {
            if self.sources.contains_key(key) {
                return Some(key.clone());
            }
        }
        let any_referenced = self.sources.values().any(|s| s.model_count() > 0);
        let mut best: Option<(&String, u64, u64)> = None;
        for (key, source) in self.sources.iter_mut() {
            if any_referenced && source.model_count() == 0 {
                continue;
            }
            if !source.get_size(io) {
                continue;
            }
            let area = source.x_size() as u64 * source.y_size() as u64;
            let stamp = source.last_modified().unwrap_or(0);
            let better = match best {
                None => true,
                Some((_, best_area, best_stamp)) => (area, stamp) > (best_area, best_stamp),
            };
            if better {
                best = Some((key, area, stamp));
            }
        }
        let chosen = best
            .map(|(k, _, _)| k.clone())
            .or_else(|| self.sources.keys().next().cloned());
        self.preferred_source = chosen.clone();
        chosen
    }

    pub fn preferred_source(&mut self, io: &dyn ImageStore) -> Option<&SourceImage> {
        let key = self.preferred_source_key(io)?;
        self.sources.get(&key)
    }

    /// Reads the preferred source's pixels now, even if a previous session already probed them.
    pub(crate) fn force_read(&mut self, io: &dyn ImageStore) {
        self.read_source_image(io);
    }

    fn read_source_image(&mut self, io: &dyn ImageStore) -> Option<&DynamicImage> {
        if !self.read_source {
            self.read_source = true;
            self.ever_read_image = true;
            let key = self.preferred_source_key(io);
            let loaded = match key.as_ref().and_then(|k| self.sources.get(k)) {
                Some(source) => match load_pixels(source, io) {
                    Ok(image) => Some(image),
                    Err(e) => {
                        warn!(texture = %self.name, error = %e, "cannot read source pixels");
                        None
                    }
                },
                None => None,
            };
            self.source_pixels = loaded;
        }
        self.source_pixels.as_ref()
    }

    /// The preferred source resampled to the final size and channel count.
    pub fn dest_image(&mut self, io: &dyn ImageStore) -> Option<&DynamicImage> {
        if self.dest_pixels.is_none() {
            let (w, h) = self.size?;
            let channels = self.properties.channels.unwrap_or(4);
            let built = self
                .read_source_image(io)
                .map(|src| compositing::resample(src, w, h, channels));
            self.dest_pixels = built;
        }
        self.dest_pixels.as_ref()
    }

    /// Everything that decides this texture's output pixels.
    pub fn content(&mut self, io: &dyn ImageStore) -> Option<TextureContent> {
        let (width, height) = self.size?;
        let source = self.preferred_source_key(io);
        let source_modified = source
            .as_ref()
            .and_then(|k| self.sources.get(k))
            .and_then(|s| s.last_modified());
        Some(TextureContent {
            texture: self.name.clone(),
            source,
            source_modified,
            width,
            height,
            channels: self.properties.channels.unwrap_or(4),
            format: self.properties.format,
        })
    }

    /// Smallest-ish set of groups such that every referencing model shares at least one.
    pub fn compute_cover(
        &self,
        models: &BTreeMap<String, ModelRecord>,
        groups: &Groups,
    ) -> BTreeSet<String> {
        let mut explicit = BTreeSet::new();
        let mut picks: Vec<String> = Vec::new();
        let mut users: Vec<&ModelRecord> = Vec::new();
        let mut needed: Vec<&ModelRecord> = Vec::new();
        for name in &self.referencing_models {
            let Some(model) = models.get(name) else { continue };
            users.push(model);
            match model.complete_groups().intersection(&self.explicit_groups).next() {
                Some(g) => {
                    explicit.insert(g.clone());
                }
                None => needed.push(model),
            }
        }

        while !needed.is_empty() {
            let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
            for m in &needed {
                for g in m.complete_groups() {
                    *counts.entry(g.as_str()).or_default() += 1;
                }
            }
            assert!(
                !counts.is_empty(),
                "texture {} is used by models that need no group; models must be cross-linked first",
                self.name
            );

            // most models satisfied, then lowest level, then least shared; first name on full ties
            let mut best: Option<(&str, usize, u32, usize)> = None;
            for (&g, &n) in &counts {
                let (level, load) = match groups.get(g) {
                    Some(group) => {
                        let own = usize::from(self.groups.contains(g));
                        (group.dependency_level(), group.texture_count().saturating_sub(own))
                    }
                    None => (1, 0),
                };
                let better = match best {
                    None => true,
                    Some((_, bn, bl, bload)) => n
                        .cmp(&bn)
                        .then_with(|| bl.cmp(&level))
                        .then_with(|| bload.cmp(&load))
                        == Ordering::Greater,
                };
                if better {
                    best = Some((g, n, level, load));
                }
            }
            let Some((chosen, ..)) = best else { break };
            let chosen = chosen.to_string();
            needed.retain(|m| !m.complete_groups().contains(&chosen));
            picks.push(chosen);
        }

        // later picks can make earlier ones redundant; drop those, newest first, explicit last
        let mut result: BTreeSet<String> = explicit.iter().cloned().chain(picks.iter().cloned()).collect();
        let order: Vec<&String> = picks.iter().rev().chain(explicit.iter().rev()).collect();
        for g in order {
            result.remove(g);
            let covered = users
                .iter()
                .all(|m| !m.complete_groups().is_disjoint(&result));
            if !covered {
                result.insert(g.clone());
            }
        }
        result
    }

    /// Makes the placements match `chosen`, keeping placements of groups present in both.
    pub fn assign_to_groups(&mut self, chosen: BTreeSet<String>, groups: &mut Groups) {
        let old = std::mem::take(&mut self.placements);
        let mut merged: Vec<(String, Placement)> = Vec::with_capacity(chosen.len());
        let mut ni = chosen.iter().peekable();
        let mut oi = old.into_iter().peekable();
        loop {
            let order = match (ni.peek(), oi.peek()) {
                (Some(n), Some((o, _))) => n.as_str().cmp(o.as_str()),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => break,
            };
            match order {
                Ordering::Less => {
                    if let Some(name) = ni.next() {
                        debug!(texture = %self.name, group = %name, "assigned");
                        let placement = groups.get_or_create(name).prepare(&self.name);
                        merged.push((name.clone(), placement));
                    }
                }
                Ordering::Greater => {
                    if let Some((name, placement)) = oi.next() {
                        debug!(texture = %self.name, group = %name, "unassigned");
                        groups.get_or_create(&name).unprepare(&placement);
                    }
                }
                Ordering::Equal => {
                    ni.next();
                    if let Some(kept) = oi.next() {
                        merged.push(kept);
                    }
                }
            }
        }
        self.placements = merged.into_iter().collect();
        self.groups = chosen;
    }

    /// Sends every placement back for re-layout.
    pub fn force_replace(&mut self) {
        for placement in self.placements.values_mut() {
            placement.force_replace();
        }
    }

    pub(crate) fn pre_match(&mut self, io: &dyn ImageStore) {
        self.pre_match_properties = self.properties.clone();
        self.explicit_groups.clear();
        self.request = TextureRequest::default();
        self.is_surprise = true;
        let channels = self.preferred_source(io).and_then(|s| s.channels());
        self.properties = TextureProperties {
            channels,
            ..TextureProperties::default()
        };
    }

    pub(crate) fn apply_directives(&mut self, directives: &TextureDirectives) {
        self.explicit_groups
            .extend(directives.groups.iter().cloned());
        self.request.merge(&directives.request);
        if directives.claimed {
            self.is_surprise = false;
        }
    }

    pub(crate) fn post_match(&mut self, io: &dyn ImageStore, config: &PaletteConfig) {
        let mut source_size = None;
        let mut source_channels = None;
        if let Some(key) = self.preferred_source_key(io) {
            if let Some(source) = self.sources.get_mut(&key) {
                if source.get_size(io) {
                    source_size = Some((source.x_size(), source.y_size()));
                    source_channels = source.channels();
                }
            }
        }

        self.size = match (self.request.size, self.request.scale, source_size) {
            (Some(size), _, _) => Some(size),
            (None, Some(scale), Some((w, h))) => Some((
                ((w as f64 * scale / 100.0).round() as u32).max(1),
                ((h as f64 * scale / 100.0).round() as u32).max(1),
            )),
            (None, _, Some((w, h))) if config.force_power_of_two => Some((
                w.checked_next_power_of_two().unwrap_or(w),
                h.checked_next_power_of_two().unwrap_or(h),
            )),
            (None, _, source) => source,
        };

        self.properties.channels = source_channels;
        if let Some(channels) = self.request.channels {
            self.properties.channels = Some(channels);
        } else {
            if matches!(self.properties.channels, Some(3) | Some(4)) {
                self.consider_grayscale(io);
            }
            if matches!(self.properties.channels, Some(2) | Some(4)) {
                self.consider_unalpha(io);
            }
        }
        if let Some(format) = self.request.format {
            self.properties.format = format;
        }
        if let Some(filter) = self.request.min_filter {
            self.properties.min_filter = filter;
        }
        if let Some(filter) = self.request.mag_filter {
            self.properties.mag_filter = filter;
        }
        self.properties.fully_define();

        if self.properties != self.pre_match_properties {
            debug!(texture = %self.name, before = ?self.pre_match_properties, after = ?self.properties, "properties changed");
            self.force_replace();
        }
        self.dest_pixels = None;
    }

    fn drop_channels(&mut self, by: u8) {
        if let Some(c) = self.properties.channels.as_mut() {
            *c = c.saturating_sub(by).max(1);
        }
    }

    fn consider_grayscale(&mut self, io: &dyn ImageStore) {
        if !self.read_source && self.ever_read_image {
            if self.forced_grayscale {
                self.drop_channels(2);
            }
            return;
        }
        let Some(gray) = self.read_source_image(io).map(compositing::is_grayscale) else {
            return;
        };
        self.forced_grayscale = gray;
        if gray {
            debug!(texture = %self.name, "grayscale image, dropping color channels");
            self.drop_channels(2);
        }
    }

    fn consider_unalpha(&mut self, io: &dyn ImageStore) {
        if !self.read_source && self.ever_read_image {
            if self.forced_unalpha {
                self.drop_channels(1);
            }
            return;
        }
        let Some(opaque) = self.read_source_image(io).map(compositing::is_opaque) else {
            return;
        };
        self.forced_unalpha = opaque;
        if opaque {
            debug!(texture = %self.name, "fully opaque image, dropping alpha channel");
            self.drop_channels(1);
        }
    }

    pub(crate) fn determine_placement_size(&mut self, config: &PaletteConfig) {
        let req = SizeRequest {
            texture_size: self.size,
            omit: self.request.omit,
            margin: self.request.margin.unwrap_or(config.margin),
            repeat_threshold: self.request.repeat_threshold.unwrap_or(config.repeat_threshold),
            palette_size: (config.palette_width, config.palette_height),
        };
        for placement in self.placements.values_mut() {
            placement.determine_size(&req);
            if placement.is_omitted() {
                debug!(texture = %self.name, group = %placement.group(), reason = ?placement.omit_reason(), "not palettized");
            }
        }
    }

    /// Writes the standalone image of every omitted placement, removing ones no longer needed.
    /// Returns false if any write or removal failed.
    pub fn copy_unplaced(
        &mut self,
        io: &mut dyn ImageStore,
        config: &PaletteConfig,
        groups: &Groups,
        redo_all: bool,
    ) -> bool {
        let Some(kind) = config.image_type else {
            error!(texture = %self.name, "no output image type configured");
            return false;
        };
        let content = self.content(&*io);

        let mut required: BTreeMap<String, DestImage> = BTreeMap::new();
        for placement in self.placements.values_mut() {
            match (&content, placement.is_omitted()) {
                (Some(content), true) => {
                    let dir = groups
                        .get(placement.group())
                        .map(|g| g.dir_or_name())
                        .unwrap_or(placement.group());
                    let filename = canonical_filename(&format!(
                        "{}/{}.{}",
                        config.map_dir_for(dir),
                        self.name,
                        kind.extension()
                    ));
                    required.entry(filename.clone()).or_insert_with(|| {
                        DestImage::new(filename.clone(), DestSignature::Texture(content.clone()))
                    });
                    placement.set_dest(Some(filename));
                }
                _ => placement.set_dest(None),
            }
        }

        let plan = diff_dests(&required, &self.dests, redo_all);
        let mut ok = true;
        for filename in &plan.remove {
            match io.remove(Path::new(filename)) {
                Ok(()) => info!(file = %filename, "removed"),
                Err(e) => {
                    error!(file = %filename, error = %e, "cannot remove");
                    ok = false;
                }
            }
        }
        for filename in plan.to_generate() {
            let written = match self.dest_image(&*io) {
                Some(image) => io.write(Path::new(filename), image, kind),
                None => Err(crate::error::PaletteError::write(
                    filename.clone(),
                    "source pixels unavailable",
                )),
            };
            match written {
                Ok(()) => info!(texture = %self.name, file = %filename, "wrote"),
                Err(e) => {
                    error!(texture = %self.name, error = %e, "cannot write");
                    required.remove(filename);
                    ok = false;
                }
            }
        }
        self.dests = required;
        ok
    }
}
