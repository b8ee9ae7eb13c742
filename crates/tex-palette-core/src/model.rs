use crate::group::Groups;
use crate::manifest::TextureRemap;
use crate::placement::UvRange;
use crate::rules::ModelDirectives;
use crate::texture::TextureRecord;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// One use of a texture by a model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextureReference {
    pub texture: String,
    /// Key of the source image record on the texture.
    pub source_key: String,
    pub filename: String,
    pub alpha_filename: Option<String>,
    pub uv_range: Option<UvRange>,
    /// Group whose placement this reference uses, once chosen.
    pub group: Option<String>,
}

/// One model file and the groups it needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRecord {
    name: String,
    references: Vec<TextureReference>,
    requested_groups: BTreeSet<String>,
    complete_groups: BTreeSet<String>,
    is_surprise: bool,
    stale: bool,
    /// Remap table as of the last rewrite.
    written: Option<Vec<TextureRemap>>,
    #[serde(skip)]
    data_loaded: bool,
}

impl ModelRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            references: Vec::new(),
            requested_groups: BTreeSet::new(),
            complete_groups: BTreeSet::new(),
            is_surprise: true,
            stale: true,
            written: None,
            data_loaded: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn references(&self) -> &[TextureReference] {
        &self.references
    }

    /// Distinct names of the textures this model uses.
    pub fn texture_names(&self) -> BTreeSet<String> {
        self.references.iter().map(|r| r.texture.clone()).collect()
    }

    pub fn requested_groups(&self) -> &BTreeSet<String> {
        &self.requested_groups
    }

    /// Requested groups plus everything they transitively depend on.
    pub fn complete_groups(&self) -> &BTreeSet<String> {
        &self.complete_groups
    }

    pub fn is_surprise(&self) -> bool {
        self.is_surprise
    }

    /// True when the model's texture assignments changed since it was last rewritten.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn written(&self) -> Option<&[TextureRemap]> {
        self.written.as_deref()
    }

    pub(crate) fn mark_written(&mut self, remap: Vec<TextureRemap>) {
        self.stale = false;
        self.written = Some(remap);
    }

    /// True once references were loaded in this invocation.
    pub fn has_data(&self) -> bool {
        self.data_loaded
    }

    pub(crate) fn set_references(&mut self, references: Vec<TextureReference>) {
        if self.references != references {
            self.stale = true;
        }
        self.references = references;
        self.data_loaded = true;
    }

    pub(crate) fn pre_match(&mut self) {
        self.requested_groups.clear();
        self.is_surprise = true;
    }

    pub(crate) fn apply_directives(&mut self, directives: &ModelDirectives) {
        self.requested_groups.extend(directives.groups.iter().cloned());
        if directives.claimed {
            self.is_surprise = false;
        }
    }

    pub(crate) fn post_match(&mut self, default_group: &str) {
        if self.requested_groups.is_empty() {
            self.requested_groups.insert(default_group.to_string());
        }
    }

    pub(crate) fn cross_link(&mut self, groups: &Groups) {
        self.complete_groups = groups.complete_closure(&self.requested_groups);
    }

    /// Picks, for every reference, the placement it will use: the previous choice while it is
    /// still one of the texture's groups, otherwise the most specific group the model needs.
    pub(crate) fn choose_placements(
        &mut self,
        textures: &mut BTreeMap<String, TextureRecord>,
        groups: &Groups,
    ) {
        let level = |g: &str| groups.get(g).map(|g| g.dependency_level()).unwrap_or(1);
        for r in self.references.iter_mut() {
            let Some(texture) = textures.get_mut(&r.texture) else {
                continue;
            };
            let candidates: Vec<&String> = texture
                .groups()
                .iter()
                .filter(|g| self.complete_groups.contains(*g))
                .collect();
            let keep = r
                .group
                .as_ref()
                .filter(|g| candidates.iter().any(|c| *c == *g))
                .cloned();
            let chosen = keep.or_else(|| {
                candidates
                    .iter()
                    .min_by(|a, b| level(a).cmp(&level(b)).then_with(|| a.cmp(b)))
                    .map(|g| (*g).clone())
            });
            if chosen != r.group {
                debug!(model = %self.name, texture = %r.texture, group = ?chosen, "placement chosen");
                r.group = chosen;
                self.stale = true;
            }
            if let Some(g) = &r.group {
                if let Some(p) = texture.placement_mut(g) {
                    p.note_reference(r.uv_range);
                }
            }
        }
    }
}
