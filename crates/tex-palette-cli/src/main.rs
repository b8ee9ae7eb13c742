use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use globset::{Glob, GlobSetBuilder};
use tex_palette_core::prelude::*;
use tex_palette_core::RunReport;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

#[derive(Parser, Debug)]
#[command(
    name = "tex-palette",
    about = "Palettize the textures referenced by a set of model manifests",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Show progress bars (disable with --no-progress or --quiet)
    #[arg(long, default_value_t = true, action=ArgAction::Set, global=true, help_heading = "Logging/UX")]
    progress: bool,
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action=ArgAction::Count, global=true, help_heading = "Logging/UX")]
    verbose: u8,
    /// Quiet mode (overrides verbose)
    #[arg(
        short,
        long,
        default_value_t = false,
        global = true,
        help_heading = "Logging/UX"
    )]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load model manifests, assign their textures to groups and regenerate palette images
    Run(RunArgs),
    /// Print the report of a saved session without processing anything
    Report(ReportArgs),
}

#[derive(Parser, Debug, Clone)]
struct RunArgs {
    // Input/Output
    /// Model manifest files or directories to search for `*.json` manifests
    #[arg(help_heading = "Input/Output")]
    models: Vec<PathBuf>,
    /// YAML matching rules (groups, settings, texture and model rules)
    #[arg(long, help_heading = "Input/Output")]
    rules: Option<PathBuf>,
    /// Session file carrying state between runs
    #[arg(long, default_value = "textures.session.json", help_heading = "Input/Output")]
    session: PathBuf,
    /// Directory the map directory template is resolved against
    #[arg(long, help_heading = "Input/Output")]
    map_root: Option<PathBuf>,
    /// Include patterns (glob). If set, only manifests matching any pattern are considered
    #[arg(long, help_heading = "Input/Output")]
    include: Vec<String>,
    /// Exclude patterns (glob). Manifests matching any pattern will be ignored
    #[arg(long, help_heading = "Input/Output")]
    exclude: Vec<String>,

    // Processing
    /// Reprocess every model and texture in the session, not just the ones named here
    #[arg(long, default_value_t = false, help_heading = "Processing")]
    all: bool,
    /// Regenerate every image and rewrite every model even if nothing changed
    #[arg(long, default_value_t = false, help_heading = "Processing")]
    redo: bool,
    /// Re-read source pixels even when the stored probe results look current
    #[arg(long, default_value_t = false, help_heading = "Processing")]
    force_read: bool,
    /// Forget every palette layout and pack all groups from scratch
    #[arg(long, default_value_t = false, help_heading = "Processing")]
    reset: bool,

    // Palette
    /// Palette page size, e.g. 512x512
    #[arg(long, help_heading = "Palette")]
    palette_size: Option<String>,
    /// Margin in pixels around each texture on a palette page
    #[arg(long, help_heading = "Palette")]
    margin: Option<u32>,
    /// Group for models no rule assigns
    #[arg(long, help_heading = "Palette")]
    default_group: Option<String>,
    /// Output image type: png | jpg | bmp | tga
    #[arg(long, help_heading = "Palette")]
    image_type: Option<String>,

    // Export
    /// Export the run report (JSON) to this file
    #[arg(long, help_heading = "Export")]
    report: Option<PathBuf>,
    /// Print the merged configuration (session, rules, CLI) and exit
    #[arg(long, default_value_t = false, help_heading = "Export")]
    print_config: bool,
    /// Output format for --print-config: json|yaml
    #[arg(long, default_value = "json", value_parser = ["json", "yaml"], help_heading = "Export")]
    print_config_format: String,
    /// Dry run: assign and lay out, but do not write images, remaps or the session
    #[arg(long, default_value_t = false, help_heading = "Export")]
    dry_run: bool,
}

#[derive(Parser, Debug, Clone)]
struct ReportArgs {
    /// Session file to read
    #[arg(long, default_value = "textures.session.json")]
    session: PathBuf,
    /// Output format: text|json
    #[arg(long, default_value = "text", value_parser = ["text", "json"])]
    format: String,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing_with_level(cli.quiet, cli.verbose);
    match &cli.command {
        Commands::Run(args) => run_palettize(args, cli.progress && !cli.quiet),
        Commands::Report(args) => run_report(args),
    }
}

fn run_palettize(cli: &RunArgs, show_progress: bool) -> anyhow::Result<()> {
    let store = JsonSessionStore::new(&cli.session);
    let mut palettizer = match store
        .restore()
        .with_context(|| format!("restore session {}", cli.session.display()))?
    {
        Some(p) => p,
        None => {
            info!(session = %cli.session.display(), "starting a new session");
            Palettizer::new(PaletteConfig::default())
        }
    };

    let rules = match &cli.rules {
        Some(path) => {
            RuleSet::from_path(path).with_context(|| format!("read rules {}", path.display()))?
        }
        None => RuleSet::empty(),
    };
    palettizer.read_rules(&rules)?;
    apply_overrides(palettizer.config_mut(), cli)?;
    palettizer.config().validate()?;

    if cli.print_config {
        match cli.print_config_format.as_str() {
            "yaml" => println!("{}", serde_yaml::to_string(palettizer.config())?),
            _ => println!("{}", serde_json::to_string_pretty(palettizer.config())?),
        }
        return Ok(());
    }

    if cli.reset {
        palettizer.reset_images();
    }

    let paths = gather_manifests(&cli.models, &cli.include, &cli.exclude)?;
    let (mut manifests, mut ok) = load_manifests_with_progress(&paths, show_progress);
    info!(count = manifests.len(), "loaded model manifests");
    let manifest_paths: BTreeMap<String, PathBuf> = manifests
        .iter()
        .map(|(m, p)| (m.name.clone(), p.clone()))
        .collect();
    let mut sources: Vec<ModelManifest> = manifests.drain(..).map(|(m, _)| m).collect();
    ok &= palettizer.load_models(&mut sources);

    let mut io = FsImageStore::new();
    if cli.all {
        palettizer.process_all(&rules, &io, cli.force_read);
    } else {
        palettizer.process_command_line_models(&rules, &io, cli.force_read);
    }

    if !cli.dry_run {
        ok &= palettizer.generate_images(&mut io, cli.redo);
        ok &= write_remaps(&mut palettizer, &manifest_paths, cli.redo);
        store
            .persist(&palettizer)
            .with_context(|| format!("write session {}", cli.session.display()))?;
    }

    let report = palettizer.report();
    println!("{}", report.summary());
    if let Some(path) = &cli.report {
        if cli.dry_run {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            fs::write(path, serde_json::to_string_pretty(&report)?)
                .with_context(|| format!("write {}", path.display()))?;
            info!(?path, "report exported");
        }
    }

    if !ok {
        anyhow::bail!("some models or images could not be processed; see the log above");
    }
    Ok(())
}

fn run_report(args: &ReportArgs) -> anyhow::Result<()> {
    let store = JsonSessionStore::new(&args.session);
    let Some(palettizer) = store
        .restore()
        .with_context(|| format!("restore session {}", args.session.display()))?
    else {
        anyhow::bail!("no session at {}", args.session.display());
    };
    let report = palettizer.report();
    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => print_report(&report),
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("{}", report.summary());
    for (reason, count) in &report.omitted {
        println!("  standalone ({reason}): {count}");
    }
    if !report.surprise_models.is_empty() {
        println!("  models matched by no rule: {}", report.surprise_models.join(", "));
    }
    if !report.surprise_textures.is_empty() {
        println!("  textures matched by no rule: {}", report.surprise_textures.join(", "));
    }
    if !report.unused_textures.is_empty() {
        println!("  unused textures: {}", report.unused_textures.join(", "));
    }
}

fn apply_overrides(cfg: &mut PaletteConfig, cli: &RunArgs) -> anyhow::Result<()> {
    if let Some(size) = &cli.palette_size {
        let (w, h) = parse_size(size)?;
        cfg.palette_width = w;
        cfg.palette_height = h;
    }
    if let Some(m) = cli.margin {
        cfg.margin = m;
    }
    if let Some(g) = &cli.default_group {
        cfg.default_group = g.clone();
    }
    if let Some(kind) = &cli.image_type {
        cfg.image_type = Some(
            kind.parse::<ImageType>()
                .map_err(|_| anyhow::anyhow!("unknown image type: {}", kind))?,
        );
    }
    // resolved when filenames are built; the persisted map_dir stays relative
    cfg.map_root = cli
        .map_root
        .as_ref()
        .map(|root| root.to_string_lossy().replace('\\', "/"));
    Ok(())
}

fn parse_size(s: &str) -> anyhow::Result<(u32, u32)> {
    let (w, h) = s
        .to_ascii_lowercase()
        .split_once('x')
        .map(|(w, h)| (w.trim().to_string(), h.trim().to_string()))
        .ok_or_else(|| anyhow::anyhow!("palette size must look like WxH: {}", s))?;
    Ok((
        w.parse().with_context(|| format!("palette width in {}", s))?,
        h.parse().with_context(|| format!("palette height in {}", s))?,
    ))
}

/// Writes `<stem>.palette.json` next to every loaded manifest whose model needs rewriting.
fn write_remaps(
    palettizer: &mut Palettizer,
    manifest_paths: &BTreeMap<String, PathBuf>,
    redo: bool,
) -> bool {
    let mut ok = true;
    for name in palettizer.models_needing_update(redo) {
        let Some(manifest) = manifest_paths.get(&name) else {
            warn!(model = %name, "needs rewriting but was not loaded in this run");
            continue;
        };
        let Some(remap) = palettizer.remap_model(&name) else { continue };
        let out_path = manifest.with_extension("palette.json");
        let body = serde_json::json!({ "model": name, "textures": remap });
        let written = serde_json::to_string_pretty(&body)
            .map_err(anyhow::Error::from)
            .and_then(|text| {
                fs::write(&out_path, text).with_context(|| format!("write {}", out_path.display()))
            });
        match written {
            Ok(()) => {
                info!(model = %name, path = %out_path.display(), "model remapped");
                palettizer.mark_model_updated(&name);
            }
            Err(e) => {
                error!(model = %name, error = %e, "cannot write remap");
                ok = false;
            }
        }
    }
    ok
}

fn gather_manifests(
    inputs: &[PathBuf],
    include: &[String],
    exclude: &[String],
) -> anyhow::Result<Vec<PathBuf>> {
    let mut inc_set = None;
    if !include.is_empty() {
        let mut b = GlobSetBuilder::new();
        for pat in include {
            b.add(Glob::new(pat)?);
        }
        inc_set = Some(b.build()?);
    }
    let mut exc_set = None;
    if !exclude.is_empty() {
        let mut b = GlobSetBuilder::new();
        for pat in exclude {
            b.add(Glob::new(pat)?);
        }
        exc_set = Some(b.build()?);
    }
    let mut list: Vec<PathBuf> = Vec::new();
    for path in inputs {
        if path.is_file() {
            if !should_skip(path, inc_set.as_ref(), exc_set.as_ref()) && is_manifest(path) {
                list.push(path.to_path_buf());
            }
        } else {
            for entry in WalkDir::new(path)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let p = entry.path();
                if p.is_file() && !should_skip(p, inc_set.as_ref(), exc_set.as_ref()) && is_manifest(p)
                {
                    list.push(p.to_path_buf());
                }
            }
        }
    }
    Ok(list)
}

fn should_skip(
    p: &Path,
    include: Option<&globset::GlobSet>,
    exclude: Option<&globset::GlobSet>,
) -> bool {
    let s = p.to_string_lossy().replace('\\', "/");
    if let Some(ex) = exclude {
        if ex.is_match(&s) {
            return true;
        }
    }
    if let Some(inc) = include {
        if !inc.is_match(&s) {
            return true;
        }
    }
    false
}

// remap tables and sessions share the extension but are outputs
fn is_manifest(p: &Path) -> bool {
    let name = p
        .file_name()
        .map(|s| s.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    name.ends_with(".json") && !name.ends_with(".palette.json") && !name.ends_with(".session.json")
}

fn load_manifests_with_progress(
    paths: &[PathBuf],
    progress: bool,
) -> (Vec<(ModelManifest, PathBuf)>, bool) {
    use indicatif::{ProgressBar, ProgressStyle};
    let bar = if progress {
        let b = ProgressBar::new(paths.len() as u64);
        if let Ok(style) = ProgressStyle::with_template(
            "{spinner:.green} loading {pos}/{len} [{elapsed_precise}] {wide_msg}",
        ) {
            b.set_style(style);
        }
        Some(b)
    } else {
        None
    };
    let mut ok = true;
    let mut list = Vec::with_capacity(paths.len());
    for p in paths {
        let msg = p.file_name().and_then(|s| s.to_str()).unwrap_or("");
        if let Some(b) = &bar {
            b.set_message(msg.to_string());
        }
        match ModelManifest::from_path(p) {
            Ok(manifest) => list.push((manifest, p.clone())),
            Err(e) => {
                error!(?p, error = %e, "skip manifest");
                ok = false;
            }
        }
        if let Some(b) = &bar {
            b.inc(1);
        }
    }
    if let Some(b) = &bar {
        b.finish_and_clear();
    }
    (list, ok)
}

fn init_tracing_with_level(quiet: bool, verbose: u8) {
    let level = if quiet {
        "error".to_string()
    } else {
        match verbose {
            0 => "info".into(),
            1 => "debug".into(),
            _ => "trace".into(),
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
