use image::{DynamicImage, GenericImageView, Rgba, RgbaImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tex_palette_core::packer::{MaxRectsPacker, Rect};
use tex_palette_core::prelude::*;

fn disjoint(rects: &[Rect]) -> bool {
    for i in 0..rects.len() {
        for j in (i + 1)..rects.len() {
            if rects[i].intersects(&rects[j]) {
                return false;
            }
        }
    }
    true
}

#[test]
fn maxrects_disjoint_and_in_bounds() {
    let mut rng = StdRng::seed_from_u64(9);
    let mut p = MaxRectsPacker::new(256, 256);
    let mut placed = Vec::new();
    for _ in 0..60 {
        let (w, h) = (rng.gen_range(4..48), rng.gen_range(4..48));
        if let Some(r) = p.insert(w, h) {
            assert_eq!((r.w, r.h), (w, h));
            assert!(r.right() <= 256 && r.bottom() <= 256);
            placed.push(r);
        }
    }
    assert!(placed.len() > 10);
    assert!(disjoint(&placed));
}

#[test]
fn maxrects_is_deterministic() {
    let sizes = [(40, 20), (16, 64), (33, 33), (8, 8), (64, 10), (20, 40)];
    let run = || {
        let mut p = MaxRectsPacker::new(128, 128);
        sizes.iter().map(|&(w, h)| p.insert(w, h)).collect::<Vec<_>>()
    };
    assert_eq!(run(), run());
}

#[test]
fn occupied_space_is_respected() {
    let mut p = MaxRectsPacker::new(64, 64);
    p.occupy(Rect::new(0, 0, 32, 64));
    let r = p.insert(32, 64).expect("fits beside");
    assert_eq!((r.x, r.y), (32, 0));
    assert!(p.insert(1, 1).is_none());
}

fn solid(w: u32, h: u32, rgba: [u8; 4]) -> DynamicImage {
    DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba(rgba)))
}

fn palettizer(config: PaletteConfig, rules: &RuleSet) -> Palettizer {
    let mut p = Palettizer::new(config);
    p.read_rules(rules).expect("rules");
    p
}

fn placement_of<'a>(p: &'a Palettizer, texture: &str) -> &'a tex_palette_core::Placement {
    p.texture(texture)
        .and_then(|t| t.placement("default"))
        .expect("placement")
}

#[test]
fn group_textures_share_a_page_with_margins() {
    let rules = RuleSet::empty();
    let cfg = PaletteConfig::builder().palette_size(128, 128).margin(2).build();
    let mut p = palettizer(cfg, &rules);
    let mut io = MemoryImageStore::new();
    let mut m = ModelManifest::new("m");
    for (i, name) in ["a", "b", "c", "d"].iter().enumerate() {
        io.insert(format!("maps/{name}.png"), solid(32, 32, [i as u8 * 60, 10, 200, 255]));
        m = m.with_texture(TextureRefSpec::new(format!("maps/{name}.png")));
    }
    assert!(p.load_models(&mut [m]));
    p.process_command_line_models(&rules, &io, false);

    let group = p.test_group("default").expect("group");
    assert_eq!(group.pages().len(), 1);
    let mut reserved = Vec::new();
    for name in ["a", "b", "c", "d"] {
        let pl = placement_of(&p, name);
        assert_eq!(pl.omit_reason(), OmitReason::None, "{name}");
        let at = pl.placed().expect("placed");
        assert_eq!(at.page, 0);
        assert_eq!((at.rect.w, at.rect.h), (32, 32));
        let r = at.rect.expand(2);
        assert!(r.right() <= 128 && r.bottom() <= 128);
        reserved.push(r);
    }
    assert!(disjoint(&reserved));
    assert_eq!(p.report().num_palettized, 4);
}

#[test]
fn overflow_opens_a_new_page_and_a_lone_texture_is_solitary() {
    let rules = RuleSet::empty();
    let cfg = PaletteConfig::builder().palette_size(64, 64).margin(0).build();
    let mut p = palettizer(cfg, &rules);
    let mut io = MemoryImageStore::new();
    let mut m = ModelManifest::new("m");
    for name in ["a", "b", "c", "d", "e"] {
        io.insert(format!("maps/{name}.png"), solid(32, 32, [200, 10, 10, 255]));
        m = m.with_texture(TextureRefSpec::new(format!("maps/{name}.png")));
    }
    assert!(p.load_models(&mut [m]));
    p.process_command_line_models(&rules, &io, false);

    assert_eq!(p.test_group("default").expect("group").pages().len(), 2);
    let solitary: Vec<&str> = ["a", "b", "c", "d", "e"]
        .into_iter()
        .filter(|n| placement_of(&p, n).omit_reason() == OmitReason::Solitary)
        .collect();
    // sorted by area then name, so the last one spills over
    assert_eq!(solitary, vec!["e"]);
}

#[test]
fn single_texture_group_is_solitary() {
    let rules = RuleSet::empty();
    let mut p = palettizer(PaletteConfig::default(), &rules);
    let mut io = MemoryImageStore::new();
    io.insert("maps/only.png", solid(16, 16, [1, 2, 3, 255]));
    assert!(p.load_models(&mut [ModelManifest::new("m").with_texture(TextureRefSpec::new("maps/only.png"))]));
    p.process_command_line_models(&rules, &io, false);
    assert_eq!(placement_of(&p, "only").omit_reason(), OmitReason::Solitary);
}

#[test]
fn omission_reasons() {
    let rules = RuleSet::from_yaml_str(
        "textures:\n  - patterns: [\"tiled_ok\"]\n    repeat: 400\n  - patterns: [\"skip\"]\n    omit: true\n",
    )
    .expect("rules");
    let cfg = PaletteConfig::builder().palette_size(128, 128).build();
    let mut p = palettizer(cfg, &rules);
    let mut io = MemoryImageStore::new();
    for name in ["huge", "tiled", "tiled_ok", "skip", "half"] {
        let size = if name == "huge" { 256 } else { 32 };
        io.insert(format!("maps/{name}.png"), solid(size, size, [9, 90, 180, 255]));
    }
    let m = ModelManifest::new("m")
        .with_texture(TextureRefSpec::new("maps/huge.png"))
        .with_texture(TextureRefSpec::new("maps/tiled.png").with_uv([0.0, 0.0], [3.0, 1.0]))
        .with_texture(TextureRefSpec::new("maps/tiled_ok.png").with_uv([0.0, 0.0], [3.0, 1.0]))
        .with_texture(TextureRefSpec::new("maps/skip.png"))
        .with_texture(TextureRefSpec::new("maps/half.png").with_uv([0.25, 0.25], [0.75, 0.75]))
        .with_texture(TextureRefSpec::new("maps/missing.png"));
    assert!(p.load_models(&mut [m]));
    p.process_command_line_models(&rules, &io, false);

    assert_eq!(placement_of(&p, "huge").omit_reason(), OmitReason::TooBig);
    assert_eq!(placement_of(&p, "tiled").omit_reason(), OmitReason::Repeats);
    assert_eq!(placement_of(&p, "skip").omit_reason(), OmitReason::Explicit);
    assert_eq!(placement_of(&p, "missing").omit_reason(), OmitReason::SizeUnknown);
    assert_eq!(placement_of(&p, "half").size(), Some((16, 16)));
    assert_eq!(placement_of(&p, "tiled_ok").size(), Some((96, 32)));
    assert_eq!(placement_of(&p, "tiled_ok").omit_reason(), OmitReason::None);
    assert_eq!(placement_of(&p, "half").omit_reason(), OmitReason::None);
    assert_eq!(p.report().num_omitted(), 4);
}

#[test]
fn page_pixels_extrude_edges_without_bleeding() {
    let rules = RuleSet::empty();
    let cfg = PaletteConfig::builder().palette_size(64, 64).margin(2).build();
    let mut p = palettizer(cfg, &rules);
    let mut io = MemoryImageStore::new();
    io.insert("maps/red.png", solid(16, 16, [255, 0, 0, 255]));
    io.insert("maps/green.png", solid(16, 16, [0, 255, 0, 128]));
    let m = ModelManifest::new("m")
        .with_texture(TextureRefSpec::new("maps/red.png"))
        .with_texture(TextureRefSpec::new("maps/green.png"));
    assert!(p.load_models(&mut [m]));
    p.process_command_line_models(&rules, &io, false);
    assert!(p.generate_images(&mut io, false));

    let page = io.get("default/default_palette_0.png").expect("page written");
    assert_eq!(page.dimensions(), (64, 64));
    for (name, color) in [("red", [255, 0, 0, 255]), ("green", [0, 255, 0, 128])] {
        let r = placement_of(&p, name).placed().expect("placed").rect;
        let expanded = r.expand(2);
        for y in expanded.y..expanded.bottom() {
            for x in expanded.x..expanded.right() {
                assert_eq!(page.get_pixel(x, y).0, color, "{name} at {x},{y}");
            }
        }
    }

    let remap = p.remap_model("m").expect("remap");
    let red = remap.iter().find(|r| r.texture == "red").expect("red");
    let rect = placement_of(&p, "red").placed().expect("placed").rect;
    assert_eq!(red.image.as_deref(), Some("default/default_palette_0.png"));
    assert_eq!(red.scale, [0.25, 0.25]);
    assert_eq!(red.offset, [rect.x as f64 / 64.0, rect.y as f64 / 64.0]);
}

/// Every placed rectangle, margin included, keyed by group and page.
fn page_rects(p: &Palettizer) -> std::collections::BTreeMap<(String, u32), Vec<Rect>> {
    let mut pages: std::collections::BTreeMap<(String, u32), Vec<Rect>> = Default::default();
    for t in p.textures().values() {
        for pl in t.placements().values() {
            if let Some(at) = pl.placed() {
                pages
                    .entry((pl.group().to_string(), at.page))
                    .or_default()
                    .push(at.rect.expand(pl.margin()));
            }
        }
    }
    pages
}

fn assert_layout_sound(p: &Palettizer) {
    for ((group, page), rects) in page_rects(p) {
        assert!(disjoint(&rects), "overlap on {group} page {page}: {rects:?}");
        assert!(
            p.test_group(&group).and_then(|g| g.page(page)).is_some(),
            "{group} page {page} was dropped while still occupied"
        );
    }
}

#[test]
fn incremental_runs_never_stack_textures_on_one_spot() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = JsonSessionStore::new(dir.path().join("textures.session.json"));
    let rules = RuleSet::empty();
    let mut io = MemoryImageStore::new();
    io.insert("maps/a.png", solid(32, 32, [255, 0, 0, 255]));
    io.insert("maps/b.png", solid(32, 32, [0, 0, 255, 255]));
    let m1 = || ModelManifest::new("m1").with_texture(TextureRefSpec::new("maps/a.png"));
    let m2 = || ModelManifest::new("m2").with_texture(TextureRefSpec::new("maps/b.png"));
    let session = |models: &mut [ModelManifest], all: bool| {
        let mut p = match store.restore().expect("restore") {
            Some(p) => p,
            None => Palettizer::new(PaletteConfig::builder().palette_size(128, 128).margin(2).build()),
        };
        p.read_rules(&rules).expect("rules");
        assert!(p.load_models(models));
        if all {
            p.process_all(&rules, &io, false);
        } else {
            p.process_command_line_models(&rules, &io, false);
        }
        assert_layout_sound(&p);
        store.persist(&p).expect("persist");
        p
    };

    let p = session(&mut [m1()], false);
    assert_eq!(placement_of(&p, "a").omit_reason(), OmitReason::Solitary);

    // m1 is not part of this run, but its texture still holds its spot
    let p = session(&mut [m2()], false);
    assert_eq!(p.test_group("default").expect("group").pages().len(), 1);
    assert_eq!(placement_of(&p, "a").omit_reason(), OmitReason::None);
    assert_eq!(placement_of(&p, "b").omit_reason(), OmitReason::None);

    let p = session(&mut [m1(), m2()], false);
    let a = placement_of(&p, "a").placed().expect("a placed");
    let b = placement_of(&p, "b").placed().expect("b placed");
    assert_eq!(a.page, b.page);
    assert!(!a.rect.expand(2).intersects(&b.rect.expand(2)));

    // b loses its only model, leaving a alone on the page again
    let p = session(&mut [ModelManifest::new("m2")], true);
    assert!(placement_of_opt(&p, "b").is_none());
    assert_eq!(placement_of(&p, "a").omit_reason(), OmitReason::Solitary);
    assert_eq!(placement_of(&p, "a").placed(), Some(a));
}

fn placement_of_opt<'a>(p: &'a Palettizer, texture: &str) -> Option<&'a tex_palette_core::Placement> {
    p.texture(texture).and_then(|t| t.placement("default"))
}

#[test]
fn absurd_rule_sizes_are_too_big_rather_than_overflowing() {
    let rules = RuleSet::from_yaml_str(
        "textures:\n  - patterns: [\"wide\"]\n    size: [4294967295, 1]\n    margin: 4294967295\n",
    )
    .expect("rules");
    let mut p = palettizer(PaletteConfig::default(), &rules);
    let mut io = MemoryImageStore::new();
    io.insert("maps/wide.png", solid(8, 8, [1, 1, 1, 255]));
    assert!(p.load_models(&mut [ModelManifest::new("m").with_texture(TextureRefSpec::new("maps/wide.png"))]));
    p.process_command_line_models(&rules, &io, false);
    assert_eq!(placement_of(&p, "wide").omit_reason(), OmitReason::TooBig);
    assert!(p.test_group("default").expect("group").pages().is_empty());
}
