use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet};
use tex_palette_core::prelude::*;
use tex_palette_core::rules::{GroupDefinition, ModelDirectives, TextureDirectives};

/// Matcher backed by plain maps: model name -> groups, texture name -> explicit groups.
#[derive(Default)]
struct MapMatcher {
    groups: Vec<GroupDefinition>,
    models: BTreeMap<String, Vec<String>>,
    textures: BTreeMap<String, Vec<String>>,
}

impl MapMatcher {
    fn group(mut self, name: &str, depends_on: &[&str]) -> Self {
        self.groups.push(GroupDefinition {
            name: name.into(),
            dir: None,
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    fn model(mut self, name: &str, groups: &[&str]) -> Self {
        self.models
            .insert(name.into(), groups.iter().map(|s| s.to_string()).collect());
        self
    }

    fn texture(mut self, name: &str, groups: &[&str]) -> Self {
        self.textures
            .insert(name.into(), groups.iter().map(|s| s.to_string()).collect());
        self
    }
}

impl Matcher for MapMatcher {
    fn group_definitions(&self) -> Vec<GroupDefinition> {
        self.groups.clone()
    }

    fn apply_settings(&self, _config: &mut PaletteConfig) {}

    fn match_model(&self, name: &str) -> Option<ModelDirectives> {
        self.models.get(name).map(|groups| ModelDirectives {
            groups: groups.clone(),
            claimed: true,
        })
    }

    fn match_texture(&self, name: &str) -> Option<TextureDirectives> {
        self.textures.get(name).map(|groups| TextureDirectives {
            groups: groups.clone(),
            claimed: true,
            ..Default::default()
        })
    }
}

fn manifest(name: &str, textures: &[&str]) -> ModelManifest {
    textures.iter().fold(ModelManifest::new(name), |m, t| {
        m.with_texture(TextureRefSpec::new(format!("maps/{t}.png")).named(*t))
    })
}

fn run(matcher: &MapMatcher, models: Vec<ModelManifest>) -> Palettizer {
    let io = MemoryImageStore::new();
    let mut p = Palettizer::new(PaletteConfig::default());
    p.read_rules(matcher).expect("rules");
    let mut models = models;
    assert!(p.load_models(&mut models));
    p.process_command_line_models(matcher, &io, false);
    p
}

fn groups_of(p: &Palettizer, texture: &str) -> Vec<String> {
    p.texture(texture)
        .expect("texture")
        .groups()
        .iter()
        .cloned()
        .collect()
}

#[test]
fn shared_parent_group_satisfies_both_models() {
    let m = MapMatcher::default()
        .group("broad", &[])
        .group("chars", &["broad"])
        .group("props", &["broad"])
        .model("hero", &["chars"])
        .model("crate", &["props"]);
    let p = run(&m, vec![manifest("hero", &["shared"]), manifest("crate", &["shared"])]);
    assert_eq!(groups_of(&p, "shared"), vec!["broad"]);
}

#[test]
fn disjoint_models_each_get_a_group() {
    let m = MapMatcher::default()
        .group("g1", &[])
        .group("g2", &[])
        .model("a", &["g1"])
        .model("b", &["g2"]);
    let p = run(&m, vec![manifest("a", &["x"]), manifest("b", &["x"])]);
    assert_eq!(groups_of(&p, "x"), vec!["g1", "g2"]);
}

#[test]
fn lower_dependency_level_wins() {
    let m = MapMatcher::default()
        .group("broad", &[])
        .group("chars", &["broad"])
        .model("hero", &["chars"]);
    let p = run(&m, vec![manifest("hero", &["face"])]);
    assert_eq!(p.test_group("chars").expect("chars").dependency_level(), 1);
    assert_eq!(p.test_group("broad").expect("broad").dependency_level(), 2);
    assert_eq!(groups_of(&p, "face"), vec!["chars"]);
}

#[test]
fn less_shared_group_wins_on_equal_level() {
    let m = MapMatcher::default()
        .group("g1", &[])
        .group("g2", &[])
        .model("only_g1", &["g1"])
        .model("either", &["g1", "g2"]);
    // "a_tex" is assigned first and lands in g1, so g2 is less shared for "b_tex"
    let p = run(
        &m,
        vec![manifest("only_g1", &["a_tex"]), manifest("either", &["b_tex"])],
    );
    assert_eq!(groups_of(&p, "a_tex"), vec!["g1"]);
    assert_eq!(groups_of(&p, "b_tex"), vec!["g2"]);
}

#[test]
fn full_tie_takes_first_group_by_name() {
    let m = MapMatcher::default()
        .group("beta", &[])
        .group("alpha", &[])
        .model("m", &["beta", "alpha"]);
    let p = run(&m, vec![manifest("m", &["t"])]);
    assert_eq!(groups_of(&p, "t"), vec!["alpha"]);
}

#[test]
fn explicit_assignment_is_kept_exactly() {
    let m = MapMatcher::default()
        .group("g1", &[])
        .group("g3", &[])
        .group("wide", &[])
        .model("a", &["g3", "g1"])
        .model("b", &["g3", "wide"])
        .texture("y", &["g3"]);
    let p = run(&m, vec![manifest("a", &["y"]), manifest("b", &["y"])]);
    assert_eq!(groups_of(&p, "y"), vec!["g3"]);
    assert!(!p.texture("y").expect("y").is_surprise());
}

#[test]
fn explicit_group_outside_model_groups_is_ignored() {
    let m = MapMatcher::default()
        .group("g1", &[])
        .group("elsewhere", &[])
        .model("a", &["g1"])
        .texture("z", &["elsewhere"]);
    let p = run(&m, vec![manifest("a", &["z"])]);
    assert_eq!(groups_of(&p, "z"), vec!["g1"]);
}

#[test]
fn model_without_rule_uses_default_group() {
    let m = MapMatcher::default();
    let p = run(&m, vec![manifest("loose", &["t"])]);
    assert_eq!(groups_of(&p, "t"), vec!["default"]);
    assert!(p.model("loose").expect("model").is_surprise());
}

#[test]
fn dependency_cycle_terminates() {
    let m = MapMatcher::default()
        .group("a", &["b"])
        .group("b", &["a"])
        .model("m", &["a"]);
    let p = run(&m, vec![manifest("m", &["t"])]);
    let model = p.model("m").expect("model");
    assert_eq!(
        model.complete_groups().iter().cloned().collect::<Vec<_>>(),
        vec!["a", "b"]
    );
    for g in ["a", "b"] {
        assert!(p.test_group(g).expect("group").dependency_level() <= p.groups().len() as u32);
    }
    assert_eq!(groups_of(&p, "t").len(), 1);
}

#[test]
fn rerun_keeps_groups_and_placement_identity() {
    let m = MapMatcher::default()
        .group("g1", &[])
        .group("g2", &[])
        .model("a", &["g1"])
        .model("b", &["g2"]);
    let io = MemoryImageStore::new();
    let mut p = Palettizer::new(PaletteConfig::default());
    p.read_rules(&m).expect("rules");
    let mut models = vec![manifest("a", &["x", "y"]), manifest("b", &["x"])];
    assert!(p.load_models(&mut models));
    p.process_command_line_models(&m, &io, false);

    let snapshot = |p: &Palettizer| -> BTreeMap<String, Vec<(String, u64)>> {
        p.textures()
            .iter()
            .map(|(name, t)| {
                let ids = t
                    .placements()
                    .iter()
                    .map(|(g, pl)| (g.clone(), pl.id()))
                    .collect();
                (name.clone(), ids)
            })
            .collect()
    };
    let first = snapshot(&p);

    assert!(p.load_models(&mut models));
    p.process_command_line_models(&m, &io, false);
    assert_eq!(snapshot(&p), first);
}

#[test]
fn dropped_reference_destroys_placement() {
    let m = MapMatcher::default()
        .group("g1", &[])
        .group("g2", &[])
        .model("a", &["g1"])
        .model("b", &["g2"]);
    let io = MemoryImageStore::new();
    let mut p = Palettizer::new(PaletteConfig::default());
    p.read_rules(&m).expect("rules");
    let mut models = vec![manifest("a", &["x"]), manifest("b", &["x"])];
    assert!(p.load_models(&mut models));
    p.process_all(&m, &io, false);
    assert_eq!(groups_of(&p, "x"), vec!["g1", "g2"]);
    let kept_id = p.texture("x").and_then(|t| t.placement("g1")).map(|pl| pl.id());

    let mut models = vec![manifest("a", &["x"]), manifest("b", &[])];
    assert!(p.load_models(&mut models));
    p.process_all(&m, &io, false);
    assert_eq!(groups_of(&p, "x"), vec!["g1"]);
    assert_eq!(
        p.texture("x").and_then(|t| t.placement("g1")).map(|pl| pl.id()),
        kept_id
    );
    assert!(!p.test_group("g2").expect("g2").textures().contains("x"));
}

#[test]
fn random_covers_are_satisfying_and_minimal() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for round in 0..40 {
        let n_groups = rng.gen_range(2..8);
        let names: Vec<String> = (0..n_groups).map(|i| format!("g{i}")).collect();
        let mut m = MapMatcher::default();
        for name in &names {
            let deps: Vec<&str> = names
                .iter()
                .filter(|other| *other != name && rng.gen_bool(0.2))
                .map(String::as_str)
                .collect();
            m = m.group(name, &deps);
        }

        let n_textures = rng.gen_range(1..10);
        let textures: Vec<String> = (0..n_textures).map(|i| format!("t{i}")).collect();
        for t in &textures {
            if rng.gen_bool(0.3) {
                let g = &names[rng.gen_range(0..names.len())];
                m = m.texture(t, &[g.as_str()]);
            }
        }

        let n_models = rng.gen_range(1..8);
        let mut manifests = Vec::new();
        for i in 0..n_models {
            let name = format!("m{i}");
            let k = rng.gen_range(1..=3);
            let requested: Vec<&str> = (0..k)
                .map(|_| names[rng.gen_range(0..names.len())].as_str())
                .collect();
            m = m.model(&name, &requested);
            let used: Vec<&str> = textures
                .iter()
                .filter(|_| rng.gen_bool(0.5))
                .map(String::as_str)
                .collect();
            manifests.push(manifest(&name, &used));
        }

        let p = run(&m, manifests);
        for (name, texture) in p.textures() {
            let assigned: BTreeSet<String> = texture.groups().clone();
            let users: Vec<&BTreeSet<String>> = texture
                .referencing_models()
                .iter()
                .map(|m| p.model(m).expect("model").complete_groups())
                .collect();
            for complete in &users {
                assert!(
                    !complete.is_disjoint(&assigned),
                    "round {round}: {name} assigned {assigned:?} misses model groups {complete:?}"
                );
            }
            for g in &assigned {
                let mut without = assigned.clone();
                without.remove(g);
                assert!(
                    users.iter().any(|c| c.is_disjoint(&without)),
                    "round {round}: {name} keeps redundant group {g} in {assigned:?}"
                );
            }
            assert_eq!(
                texture.placements().keys().cloned().collect::<BTreeSet<_>>(),
                assigned
            );
        }
    }
}
