mod apply;
mod error;
mod tags;
mod trackinfo;

use anyhow::{Context, Result};
use apply::ApplyOptions;
use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;
use tags::LoftyWriter;

#[derive(Parser)]
#[command(name = "reflac", version, about = "Tag an album's audio files from a TRACKINFO file")]
struct Cli {
    /// TRACKINFO file describing the album
    trackinfo: PathBuf,

    /// Write tagged copies here instead of tagging the input files in place
    output_dir: Option<PathBuf>,

    /// Show what would be written without touching any file
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Keep source file names for copies in the output directory
    #[arg(long, requires = "output_dir")]
    keep_names: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    run(Cli::parse())
}

fn run(cli: Cli) -> Result<()> {
    if let Some(out) = &cli.output_dir {
        if !out.is_dir() {
            anyhow::bail!("Not a directory: {}", out.display());
        }
    }

    let mode = if cli.dry_run {
        "DRY RUN (nothing will be written)"
    } else if cli.output_dir.is_some() {
        "COPYING"
    } else {
        "TAGGING IN PLACE"
    };

    let version = env!("CARGO_PKG_VERSION");
    println!("reflac v{} -- {}\n", version, mode.bold());

    println!("Parsing: {}", cli.trackinfo.display().to_string().dimmed());
    let album = trackinfo::parse_file(&cli.trackinfo)
        .with_context(|| format!("Failed to read {}", cli.trackinfo.display()))?;

    for dir in album.input_dirs() {
        println!("Input:   {}", dir.display().to_string().dimmed());
    }
    println!("Found {} tracks\n", album.titles.len().to_string().bold());

    let options = ApplyOptions {
        output_dir: cli.output_dir.clone(),
        keep_names: cli.keep_names,
    };
    let mut writer = LoftyWriter;
    let plan = if cli.dry_run {
        apply::plan(&album, &options, &writer)
    } else {
        apply::apply(&album, &options, &mut writer)
    }
    .context("Tagging failed")?;

    for track in &plan.tracks {
        let source_name = track
            .source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let target = if track.in_place() {
            track.title().to_string()
        } else {
            track.target.display().to_string()
        };

        println!(
            "  #{}  {}  {} {}",
            track.number,
            target.green(),
            "<-".dimmed(),
            source_name.dimmed()
        );
    }

    if plan.cover_count() > 0 {
        println!("\nCovers: {}", plan.cover_count());
    }

    println!();
    if cli.dry_run {
        println!("Would tag {} files", plan.tracks.len().to_string().bold());
    } else {
        println!("Tagged {} files successfully", plan.tracks.len().to_string().bold());
    }
    Ok(())
}
