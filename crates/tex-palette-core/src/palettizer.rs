use crate::compositing;
use crate::config::PaletteConfig;
use crate::dest::{DestImage, DestSignature, PageOccupant, canonical_filename, diff_dests};
use crate::error::Result;
use crate::group::{Groups, TextureGroup};
use crate::manifest::{ModelSource, TextureRemap};
use crate::model::{ModelRecord, TextureReference};
use crate::placement::{PlacedAt, Placement};
use crate::report::RunReport;
use crate::rules::Matcher;
use crate::source::SourceImage;
use crate::store::ImageStore;
use crate::texture::TextureRecord;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, error, info, instrument};

// remaps survive a JSON round trip, so compare coordinates with a tolerance
fn same_remaps(a: &[TextureRemap], b: &[TextureRemap]) -> bool {
    let close = |x: [f64; 2], y: [f64; 2]| (x[0] - y[0]).abs() < 1e-9 && (x[1] - y[1]).abs() < 1e-9;
    a.len() == b.len()
        && a.iter().zip(b).all(|(x, y)| {
            x.texture == y.texture
                && x.group == y.group
                && x.image == y.image
                && close(x.scale, y.scale)
                && close(x.offset, y.offset)
        })
}

/// Owns every group, texture and model record, and runs the palettizing pipeline over them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Palettizer {
    config: PaletteConfig,
    groups: Groups,
    textures: BTreeMap<String, TextureRecord>,
    models: BTreeMap<String, ModelRecord>,
    #[serde(skip)]
    command_line_models: BTreeSet<String>,
}

impl Palettizer {
    pub fn new(config: PaletteConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn config(&self) -> &PaletteConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut PaletteConfig {
        &mut self.config
    }

    pub fn groups(&self) -> &Groups {
        &self.groups
    }

    pub fn textures(&self) -> &BTreeMap<String, TextureRecord> {
        &self.textures
    }

    pub fn models(&self) -> &BTreeMap<String, ModelRecord> {
        &self.models
    }

    /// Models loaded since the last pipeline run.
    pub fn command_line_models(&self) -> &BTreeSet<String> {
        &self.command_line_models
    }

    /// Returns the named group, creating it on first reference.
    pub fn get_group(&mut self, name: &str) -> &mut TextureGroup {
        self.groups.get_or_create(name)
    }

    /// Looks a group up without creating it.
    pub fn test_group(&self, name: &str) -> Option<&TextureGroup> {
        self.groups.get(name)
    }

    pub fn default_group(&mut self) -> &mut TextureGroup {
        let name = self.config.default_group.clone();
        self.groups.get_or_create(&name)
    }

    pub fn get_texture(&mut self, name: &str) -> &mut TextureRecord {
        self.textures
            .entry(name.to_string())
            .or_insert_with(|| TextureRecord::new(name))
    }

    pub fn texture(&self, name: &str) -> Option<&TextureRecord> {
        self.textures.get(name)
    }

    pub fn get_model(&mut self, name: &str) -> &mut ModelRecord {
        self.models
            .entry(name.to_string())
            .or_insert_with(|| ModelRecord::new(name))
    }

    pub fn model(&self, name: &str) -> Option<&ModelRecord> {
        self.models.get(name)
    }

    /// Rebuilds every derived link after the tables were deserialized.
    pub fn relink(&mut self) {
        let referenced: Vec<String> = self
            .models
            .values()
            .flat_map(|m| m.references().iter().map(|r| r.texture.clone()))
            .collect();
        for name in referenced {
            self.get_texture(&name);
        }
        for texture in self.textures.values_mut() {
            texture.relink(&mut self.groups);
        }
        self.cross_link_all();
    }

    /// Reads group definitions and settings, then validates the resulting configuration.
    #[instrument(skip_all)]
    pub fn read_rules(&mut self, matcher: &dyn Matcher) -> Result<()> {
        for group in self.groups.iter_mut() {
            group.clear_depends();
        }
        for def in matcher.group_definitions() {
            for dep in &def.depends_on {
                self.groups.get_or_create(dep);
            }
            let group = self.groups.get_or_create(&def.name);
            if let Some(dir) = &def.dir {
                group.set_dirname(dir.clone());
            }
            for dep in def.depends_on {
                group.add_depends(dep);
            }
        }
        matcher.apply_settings(&mut self.config);
        self.config.validate()?;
        let default_group = self.config.default_group.clone();
        self.groups.get_or_create(&default_group);
        self.groups.compute_dependency_levels();
        info!(groups = self.groups.len(), "rules read");
        Ok(())
    }

    /// Registers a model's texture references, replacing what was known about it.
    pub fn load_model(&mut self, source: &mut dyn ModelSource) -> Result<()> {
        let name = source.name().to_string();
        let specs = source.scan_texture_references()?;
        let mut references = Vec::with_capacity(specs.len());
        for spec in specs {
            let filename = canonical_filename(&spec.filename);
            let alpha = spec.alpha_filename.as_deref().map(canonical_filename);
            let previous_group = self
                .models
                .get(&name)
                .and_then(|m| m.references().iter().find(|r| r.texture == spec.texture))
                .and_then(|r| r.group.clone());
            let source_key = self
                .get_texture(&spec.texture)
                .get_source(&filename, alpha.as_deref())
                .key();
            references.push(TextureReference {
                texture: spec.texture,
                source_key,
                filename,
                alpha_filename: alpha,
                uv_range: spec.uv_range,
                group: previous_group,
            });
        }
        debug!(model = %name, references = references.len(), "model loaded");
        self.get_model(&name).set_references(references);
        self.command_line_models.insert(name);
        Ok(())
    }

    /// Loads every model, logging failures. Returns false if any model could not be read.
    #[instrument(skip_all)]
    pub fn load_models<M: ModelSource>(&mut self, sources: &mut [M]) -> bool {
        let mut ok = true;
        for source in sources.iter_mut() {
            if let Err(e) = self.load_model(source) {
                error!(model = %source.name(), error = %e, "cannot load model");
                ok = false;
            }
        }
        ok
    }

    /// Runs the pipeline over the models loaded in this invocation and the textures they use.
    pub fn process_command_line_models(
        &mut self,
        matcher: &dyn Matcher,
        io: &dyn ImageStore,
        force_texture_read: bool,
    ) {
        let models = self.command_line_models.clone();
        let textures: BTreeSet<String> = models
            .iter()
            .filter_map(|m| self.models.get(m))
            .flat_map(|m| m.texture_names())
            .collect();
        self.run_pipeline(models, textures, matcher, io, force_texture_read);
    }

    /// Runs the pipeline over every known model and texture.
    pub fn process_all(&mut self, matcher: &dyn Matcher, io: &dyn ImageStore, force_texture_read: bool) {
        let models: BTreeSet<String> = self.models.keys().cloned().collect();
        let referenced: Vec<String> = self
            .models
            .values()
            .flat_map(|m| m.texture_names())
            .collect();
        for name in referenced {
            self.get_texture(&name);
        }
        let textures: BTreeSet<String> = self.textures.keys().cloned().collect();
        self.run_pipeline(models, textures, matcher, io, force_texture_read);
    }

    #[instrument(skip_all, fields(models = model_names.len(), textures = texture_names.len()))]
    fn run_pipeline(
        &mut self,
        model_names: BTreeSet<String>,
        texture_names: BTreeSet<String>,
        matcher: &dyn Matcher,
        io: &dyn ImageStore,
        force_texture_read: bool,
    ) {
        for texture in self.textures.values_mut() {
            texture.begin_session();
        }

        let default_group = self.config.default_group.clone();
        self.groups.get_or_create(&default_group);
        for name in &model_names {
            let directives = matcher.match_model(name);
            if let Some(d) = &directives {
                for g in &d.groups {
                    self.groups.get_or_create(g);
                }
            }
            let model = self.get_model(name);
            model.pre_match();
            if let Some(d) = &directives {
                model.apply_directives(d);
            }
            model.post_match(&default_group);
        }

        self.cross_link_all();

        for name in &texture_names {
            let directives = matcher.match_texture(name);
            if let Some(d) = &directives {
                for g in &d.groups {
                    self.groups.get_or_create(g);
                }
            }
            let config = &self.config;
            let Some(texture) = self.textures.get_mut(name) else { continue };
            if force_texture_read {
                texture.force_read(io);
            }
            texture.pre_match(io);
            if let Some(d) = &directives {
                texture.apply_directives(d);
            }
            texture.post_match(io, config);
        }

        self.assign_groups(&texture_names);

        for model in self.models.values_mut() {
            model.choose_placements(&mut self.textures, &self.groups);
        }

        for name in &texture_names {
            if let Some(texture) = self.textures.get_mut(name) {
                texture.determine_placement_size(&self.config);
            }
        }

        self.place_all();
        self.command_line_models.clear();
    }

    /// Finalizes every model's complete group set and records which models use which sources.
    fn cross_link_all(&mut self) {
        let mut uses: Vec<(String, String, String)> = Vec::new();
        for model in self.models.values_mut() {
            model.cross_link(&self.groups);
            for r in model.references() {
                uses.push((r.texture.clone(), model.name().to_string(), r.source_key.clone()));
            }
        }
        for (texture, model, source_key) in uses {
            self.get_texture(&texture).note_model(&model, &source_key);
        }
    }

    #[instrument(skip_all)]
    fn assign_groups(&mut self, texture_names: &BTreeSet<String>) {
        let mut assigned = 0usize;
        for name in texture_names {
            let Some(texture) = self.textures.get_mut(name) else { continue };
            let cover = texture.compute_cover(&self.models, &self.groups);
            texture.assign_to_groups(cover, &mut self.groups);
            if !texture.groups().is_empty() {
                assigned += 1;
            }
        }
        info!(assigned, "textures assigned to groups");
    }

    /// Lays out every group's unplaced placements on its palette pages.
    #[instrument(skip_all)]
    pub fn place_all(&mut self) {
        let palette = (self.config.palette_width, self.config.palette_height);
        for name in self.groups.names() {
            let mut placements: Vec<&mut Placement> = self
                .textures
                .values_mut()
                .filter_map(|t| t.placement_mut(&name))
                .collect();
            if let Some(group) = self.groups.get_mut(&name) {
                group.place_all(&mut placements, palette);
            }
        }
    }

    /// Forgets every palette layout so all placements are packed again on the next run.
    pub fn reset_images(&mut self) {
        for group in self.groups.iter_mut() {
            group.reset_pages();
        }
        for texture in self.textures.values_mut() {
            texture.force_replace();
        }
        info!("palette layouts reset");
    }

    fn page_filename(&self, group: &TextureGroup, page: u32) -> Option<String> {
        let kind = self.config.image_type?;
        Some(canonical_filename(&format!(
            "{}/{}_palette_{}.{}",
            self.config.map_dir_for(group.dir_or_name()),
            group.name(),
            page,
            kind.extension()
        )))
    }

    /// Writes every standalone texture copy and palette page that is missing or out of date,
    /// and removes generated files that are no longer needed.
    /// Returns false if any image could not be written or removed.
    #[instrument(skip_all, fields(redo_all))]
    pub fn generate_images(&mut self, io: &mut dyn ImageStore, redo_all: bool) -> bool {
        let mut ok = true;
        for texture in self.textures.values_mut() {
            ok &= texture.copy_unplaced(io, &self.config, &self.groups, redo_all);
        }
        for name in self.groups.names() {
            ok &= self.update_pages(&name, io, redo_all);
        }
        info!(ok, "images generated");
        ok
    }

    fn update_pages(&mut self, group_name: &str, io: &mut dyn ImageStore, redo_all: bool) -> bool {
        let Some(kind) = self.config.image_type else {
            error!(group = %group_name, "no output image type configured");
            return false;
        };
        let Some(group) = self.groups.get(group_name) else { return true };

        let mut by_page: BTreeMap<u32, Vec<(String, PlacedAt, u32)>> = BTreeMap::new();
        for texture in self.textures.values() {
            if let Some(p) = texture.placement(group_name) {
                if let (false, Some(at)) = (p.is_omitted(), p.placed()) {
                    by_page
                        .entry(at.page)
                        .or_default()
                        .push((texture.name().to_string(), at, p.margin()));
                }
            }
        }

        let mut pages: Vec<(String, u32, u32, Vec<(String, PlacedAt, u32)>)> = Vec::new();
        for page in group.pages() {
            let Some(occupants) = by_page.remove(&page.id) else { continue };
            if let Some(filename) = self.page_filename(group, page.id) {
                pages.push((filename, page.width, page.height, occupants));
            }
        }
        let previous = group.written_pages().clone();

        let mut required: BTreeMap<String, DestImage> = BTreeMap::new();
        for (filename, width, height, occupants) in &pages {
            let mut signed = Vec::with_capacity(occupants.len());
            for (texture, at, margin) in occupants {
                if let Some(content) = self.textures.get_mut(texture).and_then(|t| t.content(&*io)) {
                    signed.push(PageOccupant {
                        rect: at.rect,
                        margin: *margin,
                        content,
                    });
                }
            }
            let signature = DestSignature::Page {
                width: *width,
                height: *height,
                occupants: signed,
            };
            required.insert(filename.clone(), DestImage::new(filename.clone(), signature));
        }

        let plan = diff_dests(&required, &previous, redo_all);
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
        for (filename, width, height, occupants) in &pages {
            if !plan.to_generate().any(|f| f == filename) {
                continue;
            }
            let mut images: Vec<(DynamicImage, u32, u32, u32)> = Vec::with_capacity(occupants.len());
            let mut complete = true;
            for (texture, at, margin) in occupants {
                match self.textures.get_mut(texture).and_then(|t| t.dest_image(&*io).cloned()) {
                    Some(image) => images.push((image, at.rect.x, at.rect.y, *margin)),
                    None => {
                        error!(group = %group_name, texture = %texture, "texture pixels unavailable");
                        complete = false;
                    }
                }
            }
            let written = if complete {
                let entries: Vec<(&DynamicImage, u32, u32, u32)> =
                    images.iter().map(|(img, x, y, m)| (img, *x, *y, *m)).collect();
                let page = compositing::compose_page(*width, *height, &entries);
                io.write(Path::new(filename), &page, kind)
            } else {
                Err(crate::error::PaletteError::write(filename.clone(), "missing texture pixels"))
            };
            match written {
                Ok(()) => info!(group = %group_name, file = %filename, textures = occupants.len(), "wrote palette"),
                Err(e) => {
                    error!(group = %group_name, error = %e, "cannot write palette");
                    required.remove(filename);
                    ok = false;
                }
            }
        }

        if let Some(group) = self.groups.get_mut(group_name) {
            group.set_written_pages(required);
        }
        ok
    }

    /// Names of models whose rewritten form is out of date.
    pub fn models_needing_update(&self, redo_all: bool) -> Vec<String> {
        self.models
            .values()
            .filter(|m| {
                redo_all
                    || m.is_stale()
                    || !match (m.written(), self.remap_model(m.name())) {
                        (Some(written), Some(current)) => same_remaps(written, &current),
                        _ => false,
                    }
            })
            .map(|m| m.name().to_string())
            .collect()
    }

    /// Records that the model was rewritten with its current remap table.
    pub fn mark_model_updated(&mut self, name: &str) {
        if let Some(remap) = self.remap_model(name) {
            if let Some(model) = self.models.get_mut(name) {
                model.mark_written(remap);
            }
        }
    }

    /// How each texture reference of the model must be rewritten.
    pub fn remap_model(&self, name: &str) -> Option<Vec<TextureRemap>> {
        let model = self.models.get(name)?;
        let remaps = model
            .references()
            .iter()
            .map(|r| {
                let placement = r
                    .group
                    .as_deref()
                    .and_then(|g| self.textures.get(&r.texture)?.placement(g));
                let identity = TextureRemap {
                    texture: r.texture.clone(),
                    group: r.group.clone(),
                    image: Some(r.filename.clone()),
                    scale: [1.0, 1.0],
                    offset: [0.0, 0.0],
                };
                let Some(p) = placement else { return identity };
                if let Some(dest) = p.dest() {
                    return TextureRemap {
                        image: Some(dest.to_string()),
                        ..identity
                    };
                }
                let on_page = p.placed().filter(|_| !p.is_omitted()).and_then(|at| {
                    let group = self.groups.get(p.group())?;
                    let page = group.page(at.page)?;
                    let (scale, offset) = p.uv_transform((page.width, page.height))?;
                    Some((self.page_filename(group, at.page), scale, offset))
                });
                match on_page {
                    Some((image, scale, offset)) => TextureRemap {
                        image,
                        scale,
                        offset,
                        ..identity
                    },
                    None => identity,
                }
            })
            .collect();
        Some(remaps)
    }

    pub fn report(&self) -> RunReport {
        let mut report = RunReport {
            num_groups: self.groups.len(),
            num_textures: self.textures.len(),
            num_models: self.models.len(),
            num_pages: self.groups.iter().map(|g| g.pages().len()).sum(),
            ..Default::default()
        };
        for texture in self.textures.values() {
            for p in texture.placements().values() {
                if p.is_omitted() {
                    report.note_omitted(p.omit_reason());
                } else if p.is_placed() {
                    report.num_palettized += 1;
                }
            }
            if texture.is_surprise() && !texture.referencing_models().is_empty() {
                report.surprise_textures.push(texture.name().to_string());
            }
            if texture.referencing_models().is_empty() {
                report.unused_textures.push(texture.name().to_string());
            }
        }
        report.surprise_models = self
            .models
            .values()
            .filter(|m| m.is_surprise())
            .map(|m| m.name().to_string())
            .collect();
        report
    }

    /// Source records for a texture, keyed the way model references key them.
    pub fn source(&self, texture: &str, filename: &str, alpha: Option<&str>) -> Option<&SourceImage> {
        self.textures
            .get(texture)?
            .sources()
            .get(&SourceImage::key_for(filename, alpha))
    }
}
