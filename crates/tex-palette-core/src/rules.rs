//! Matching rules: name patterns mapped to groups and per-texture requests.

use crate::config::{ImageType, PaletteConfig};
use crate::error::{PaletteError, Result};
use crate::properties::TextureRequest;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A group declared by the rules, with its directory and dependencies.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupDefinition {
    pub name: String,
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// What the rules say about one model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelDirectives {
    pub groups: Vec<String>,
    /// A terminal rule matched, so the model is accounted for.
    pub claimed: bool,
}

/// What the rules say about one texture.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextureDirectives {
    pub groups: Vec<String>,
    pub request: TextureRequest,
    pub claimed: bool,
}

/// Source of group definitions, settings and per-record directives.
pub trait Matcher {
    fn group_definitions(&self) -> Vec<GroupDefinition>;
    fn apply_settings(&self, config: &mut PaletteConfig);
    /// `None` when no rule matches the model.
    fn match_model(&self, name: &str) -> Option<ModelDirectives>;
    /// `None` when no rule matches the texture.
    fn match_texture(&self, name: &str) -> Option<TextureDirectives>;
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct Settings {
    imagetype: Option<String>,
    palette: Option<(u32, u32)>,
    margin: Option<u32>,
    repeat: Option<f64>,
    powertwo: Option<bool>,
    map_dir: Option<String>,
    default_group: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct TextureRuleDoc {
    patterns: Vec<String>,
    #[serde(default)]
    groups: Vec<String>,
    #[serde(default)]
    cont: bool,
    #[serde(flatten)]
    request: TextureRequest,
}

#[derive(Debug, Clone, Deserialize)]
struct ModelRuleDoc {
    patterns: Vec<String>,
    #[serde(default)]
    groups: Vec<String>,
    #[serde(default)]
    cont: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RulesDoc {
    settings: Settings,
    groups: Vec<GroupDefinition>,
    textures: Vec<TextureRuleDoc>,
    models: Vec<ModelRuleDoc>,
}

#[derive(Debug, Clone)]
struct TextureRule {
    set: GlobSet,
    groups: Vec<String>,
    cont: bool,
    request: TextureRequest,
}

#[derive(Debug, Clone)]
struct ModelRule {
    set: GlobSet,
    groups: Vec<String>,
    cont: bool,
}

/// Ordered rules read from a YAML document.
///
/// Every rule whose patterns match is merged in order; the first matching rule without `cont`
/// ends the scan and claims the record.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    settings: Settings,
    groups: Vec<GroupDefinition>,
    textures: Vec<TextureRule>,
    models: Vec<ModelRule>,
}

fn compile(patterns: &[String]) -> Result<GlobSet> {
    if patterns.is_empty() {
        return Err(PaletteError::Rules("rule without patterns".into()));
    }
    let mut b = GlobSetBuilder::new();
    for p in patterns {
        b.add(Glob::new(p)?);
    }
    Ok(b.build()?)
}

impl RuleSet {
    /// No settings, no groups, no rules: every record is a surprise.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let doc: RulesDoc = serde_yaml::from_str(text)?;
        let textures = doc
            .textures
            .into_iter()
            .map(|r| {
                Ok(TextureRule {
                    set: compile(&r.patterns)?,
                    groups: r.groups,
                    cont: r.cont,
                    request: r.request,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let models = doc
            .models
            .into_iter()
            .map(|r| {
                Ok(ModelRule {
                    set: compile(&r.patterns)?,
                    groups: r.groups,
                    cont: r.cont,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            settings: doc.settings,
            groups: doc.groups,
            textures,
            models,
        })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| PaletteError::read(path.display().to_string(), e))?;
        Self::from_yaml_str(&text)
    }

    pub fn texture_rule_count(&self) -> usize {
        self.textures.len()
    }

    pub fn model_rule_count(&self) -> usize {
        self.models.len()
    }
}

impl Matcher for RuleSet {
    fn group_definitions(&self) -> Vec<GroupDefinition> {
        self.groups.clone()
    }

    fn apply_settings(&self, config: &mut PaletteConfig) {
        let s = &self.settings;
        if let Some(kind) = &s.imagetype {
            // an unknown type leaves no usable output type, which validation rejects
            config.image_type = kind.parse::<ImageType>().ok();
        }
        if let Some((w, h)) = s.palette {
            config.palette_width = w;
            config.palette_height = h;
        }
        if let Some(m) = s.margin {
            config.margin = m;
        }
        if let Some(r) = s.repeat {
            config.repeat_threshold = r;
        }
        if let Some(p) = s.powertwo {
            config.force_power_of_two = p;
        }
        if let Some(d) = &s.map_dir {
            config.map_dir = d.clone();
        }
        if let Some(g) = &s.default_group {
            config.default_group = g.clone();
        }
    }

    fn match_model(&self, name: &str) -> Option<ModelDirectives> {
        let mut out: Option<ModelDirectives> = None;
        for rule in self.models.iter().filter(|r| r.set.is_match(name)) {
            let d = out.get_or_insert_with(ModelDirectives::default);
            d.groups.extend(rule.groups.iter().cloned());
            if !rule.cont {
                d.claimed = true;
                break;
            }
        }
        out
    }

    fn match_texture(&self, name: &str) -> Option<TextureDirectives> {
        let mut out: Option<TextureDirectives> = None;
        for rule in self.textures.iter().filter(|r| r.set.is_match(name)) {
            let d = out.get_or_insert_with(TextureDirectives::default);
            d.groups.extend(rule.groups.iter().cloned());
            d.request.merge(&rule.request);
            if !rule.cont {
                d.claimed = true;
                break;
            }
        }
        out
    }
}
