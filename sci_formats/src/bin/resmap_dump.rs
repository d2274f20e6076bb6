use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use sci_formats::{DirectoryVolumes, MapFormat, ResourceMap, read_resource_map};
use walkdir::WalkDir;

#[derive(Parser, Debug)]
#[command(about = "Dump SCI resource.map indexes", version)]
struct Args {
    /// Game directory containing resource.map and its volumes (may repeat)
    #[arg(long = "game", value_name = "DIR", conflicts_with = "root")]
    games: Vec<PathBuf>,

    /// Directory scanned recursively for resource.map files when --game is not used
    #[arg(long = "root", value_name = "DIR", conflicts_with = "games")]
    root: Option<PathBuf>,

    /// Skip layout auto-detection and force this map format
    #[arg(long, value_enum, value_name = "FORMAT")]
    format: Option<FormatArg>,

    /// Emit the parsed map as JSON instead of a summary
    #[arg(long)]
    json: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Sci0,
    Sci0Alt,
    Sci1,
    Sci11,
}

impl From<FormatArg> for MapFormat {
    fn from(arg: FormatArg) -> MapFormat {
        match arg {
            FormatArg::Sci0 => MapFormat::Sci0,
            FormatArg::Sci0Alt => MapFormat::Sci0Alt,
            FormatArg::Sci1 => MapFormat::Sci1,
            FormatArg::Sci11 => MapFormat::Sci11,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let games = resolve_game_dirs(&args)?;
    if games.is_empty() {
        bail!("no game directories with a resource.map to dump");
    }

    let hint = args.format.map(MapFormat::from);
    for dir in games {
        dump_game(&dir, hint, args.json)?;
    }

    Ok(())
}

fn resolve_game_dirs(args: &Args) -> Result<Vec<PathBuf>> {
    let mut games = Vec::new();

    if !args.games.is_empty() {
        games.extend(args.games.iter().cloned());
    } else if let Some(root) = args.root.as_ref() {
        for entry in WalkDir::new(root).into_iter().filter_map(|res| res.ok()) {
            if entry.file_type().is_file()
                && entry
                    .file_name()
                    .to_str()
                    .map(|name| name.eq_ignore_ascii_case("resource.map"))
                    .unwrap_or(false)
            {
                if let Some(parent) = entry.path().parent() {
                    games.push(parent.to_path_buf());
                }
            }
        }
    }

    games.sort();
    games.dedup();

    Ok(games)
}

fn dump_game(dir: &Path, hint: Option<MapFormat>, json: bool) -> Result<()> {
    let map_path = find_map_file(dir)?;
    let volumes =
        DirectoryVolumes::scan(dir).with_context(|| format!("scanning {}", dir.display()))?;
    if volumes.is_empty() {
        eprintln!(
            "[resmap_dump] warning: {} has no resource volumes",
            dir.display()
        );
    }

    let map = read_resource_map(&map_path, &volumes, hint)
        .with_context(|| format!("reading {}", map_path.display()))?;

    if map.truncated() {
        eprintln!(
            "[resmap_dump] warning: {} ended after {} of {} records",
            map_path.display(),
            map.records_read,
            map.records_expected
        );
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&map)?);
    } else {
        print_summary(dir, &map);
    }

    Ok(())
}

fn find_map_file(dir: &Path) -> Result<PathBuf> {
    for entry in fs::read_dir(dir)
        .with_context(|| format!("reading {}", dir.display()))?
        .filter_map(|entry| entry.ok())
    {
        if entry
            .file_name()
            .to_str()
            .map(|name| name.eq_ignore_ascii_case("resource.map"))
            .unwrap_or(false)
        {
            return Ok(entry.path());
        }
    }
    bail!("no resource.map in {}", dir.display());
}

fn print_summary(dir: &Path, map: &ResourceMap) {
    let mut per_type: BTreeMap<&'static str, usize> = BTreeMap::new();
    let mut alternates = 0usize;
    for entry in &map.entries {
        *per_type.entry(entry.id.rtype.name()).or_default() += 1;
        alternates += entry.sources.len() - 1;
    }

    println!(
        "{}: {} map, {} resources, {} alternate sources",
        dir.display(),
        map.format.label(),
        map.entries.len(),
        alternates
    );
    for (name, count) in per_type {
        println!("  {name:<12} {count}");
    }
}
