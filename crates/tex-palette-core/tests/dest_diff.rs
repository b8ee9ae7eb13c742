use image::{DynamicImage, Rgba, RgbaImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use tex_palette_core::prelude::*;
use tex_palette_core::{canonical_filename, diff_dests};

fn keys(v: &[String]) -> BTreeSet<String> {
    v.iter().cloned().collect()
}

#[test]
fn diff_is_a_true_set_difference() {
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..200 {
        let mut old: BTreeMap<String, u8> = BTreeMap::new();
        let mut new: BTreeMap<String, u8> = BTreeMap::new();
        for i in 0..rng.gen_range(0..12) {
            let name = format!("f{:02}.png", rng.gen_range(0..16) + i % 2);
            if rng.gen_bool(0.6) {
                old.insert(name.clone(), rng.gen_range(0..3));
            }
            if rng.gen_bool(0.6) {
                new.insert(name, rng.gen_range(0..3));
            }
        }

        let plan = diff_dests(&new, &old, false);
        let old_keys: BTreeSet<String> = old.keys().cloned().collect();
        let new_keys: BTreeSet<String> = new.keys().cloned().collect();

        assert_eq!(keys(&plan.remove), &old_keys - &new_keys);
        assert_eq!(keys(&plan.copy), &new_keys - &old_keys);
        let both: BTreeSet<String> = &old_keys & &new_keys;
        let stale: BTreeSet<String> = both.iter().filter(|k| old[*k] != new[*k]).cloned().collect();
        assert_eq!(keys(&plan.refresh), stale);

        let mut covered = keys(&plan.unchanged);
        covered.extend(keys(&plan.copy));
        covered.extend(keys(&plan.refresh));
        assert_eq!(covered, new_keys);
        assert_eq!(
            plan.unchanged.len() + plan.copy.len() + plan.refresh.len(),
            new.len()
        );
    }
}

#[test]
fn redo_removes_everything_then_regenerates_everything() {
    let old: BTreeMap<String, u8> = [("a", 1u8), ("b", 2u8)].map(|(k, v)| (k.to_string(), v)).into();
    let new: BTreeMap<String, u8> = [("b", 2u8), ("c", 3u8)].map(|(k, v)| (k.to_string(), v)).into();
    let plan = diff_dests(&new, &old, true);
    assert_eq!(plan.remove, vec!["a", "b"]);
    assert_eq!(plan.copy, vec!["b", "c"]);
    assert!(plan.refresh.is_empty());
    assert!(plan.unchanged.is_empty());
}

#[test]
fn unchanged_tables_need_no_work() {
    let old: BTreeMap<String, u8> = [("a", 1u8), ("b", 2u8)].map(|(k, v)| (k.to_string(), v)).into();
    let plan = diff_dests(&old, &old, false);
    assert!(plan.is_noop());
    assert_eq!(plan.unchanged, vec!["a", "b"]);
}

#[test]
fn filenames_are_canonical() {
    assert_eq!(canonical_filename("./maps\\chars//hero.png"), "maps/chars/hero.png");
    assert_eq!(canonical_filename("maps/x.png"), "maps/x.png");
}

fn solid(w: u32, h: u32, rgba: [u8; 4]) -> DynamicImage {
    DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba(rgba)))
}

fn generated(p: &Palettizer) -> BTreeSet<PathBuf> {
    let mut out: BTreeSet<PathBuf> = p
        .textures()
        .values()
        .flat_map(|t| t.dests().keys().map(PathBuf::from))
        .collect();
    for g in p.groups().iter() {
        out.extend(g.written_pages().keys().map(PathBuf::from));
    }
    out
}

#[test]
fn full_redo_rewrites_every_generated_image() {
    let rules = RuleSet::from_yaml_str(
        r#"
settings:
  map_dir: "out/%g"
textures:
  - patterns: ["logo"]
    omit: true
"#,
    )
    .expect("rules");
    let mut io = MemoryImageStore::new();
    io.insert("maps/a.png", solid(16, 16, [255, 0, 0, 128]));
    io.insert("maps/b.png", solid(16, 16, [0, 255, 0, 128]));
    io.insert("maps/logo.png", solid(32, 32, [0, 0, 255, 128]));
    let mut models = vec![
        ModelManifest::new("m")
            .with_texture(TextureRefSpec::new("maps/a.png"))
            .with_texture(TextureRefSpec::new("maps/b.png"))
            .with_texture(TextureRefSpec::new("maps/logo.png")),
    ];

    let mut p = Palettizer::new(PaletteConfig::default());
    p.read_rules(&rules).expect("rules");
    assert!(p.load_models(&mut models));
    p.process_command_line_models(&rules, &io, false);
    assert!(p.generate_images(&mut io, false));

    let first = generated(&p);
    assert_eq!(
        first,
        BTreeSet::from([
            PathBuf::from("out/default/default_palette_0.png"),
            PathBuf::from("out/default/logo.png"),
        ])
    );
    for f in &first {
        assert!(io.contains(f));
    }

    // nothing changed: nothing is written or removed
    io.clear_log();
    assert!(p.load_models(&mut models));
    p.process_command_line_models(&rules, &io, false);
    assert!(p.generate_images(&mut io, false));
    assert!(io.writes().is_empty());
    assert!(io.removals().is_empty());

    io.clear_log();
    assert!(p.generate_images(&mut io, true));
    let removed: BTreeSet<PathBuf> = io.removals().iter().cloned().collect();
    let written: BTreeSet<PathBuf> = io.writes().iter().cloned().collect();
    assert_eq!(removed, first);
    assert_eq!(written, first);
    for f in &first {
        assert!(io.contains(f));
    }
}

#[test]
fn no_longer_required_images_are_removed() {
    let rules = RuleSet::from_yaml_str("textures:\n  - patterns: [\"logo\"]\n    omit: true\n")
        .expect("rules");
    let mut io = MemoryImageStore::new();
    io.insert("maps/logo.png", solid(8, 8, [1, 2, 3, 255]));
    let mut p = Palettizer::new(PaletteConfig::default());
    p.read_rules(&rules).expect("rules");
    let mut models = vec![ModelManifest::new("m").with_texture(TextureRefSpec::new("maps/logo.png"))];
    assert!(p.load_models(&mut models));
    p.process_command_line_models(&rules, &io, false);
    assert!(p.generate_images(&mut io, false));
    assert!(io.contains("default/logo.png"));

    let mut models = vec![ModelManifest::new("m")];
    assert!(p.load_models(&mut models));
    p.process_all(&rules, &io, false);
    io.clear_log();
    assert!(p.generate_images(&mut io, false));
    assert_eq!(io.removals(), &[PathBuf::from("default/logo.png")]);
    assert!(!io.contains("default/logo.png"));
}
