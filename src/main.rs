use anyhow::Result;
use std::path::{Path, PathBuf};
use std::time::Duration;

use photosift::pipeline::PipelineUpdate;
use photosift::{Config, Library, LoadError, SortMode};

struct CliArgs {
    config_path: Option<PathBuf>,
    sort: Option<SortMode>,
    command: Command,
}

enum Command {
    Index { folder: PathBuf },
    Search { folder: PathBuf, query: String },
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = None;
    let mut sort = None;
    let mut positional: Vec<String> = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("photosift {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--sort" | "-s" => {
                if i + 1 < args.len() {
                    match args[i + 1].parse::<SortMode>() {
                        Ok(mode) => sort = Some(mode),
                        Err(e) => {
                            eprintln!("Error: {}", e);
                            std::process::exit(1);
                        }
                    }
                    i += 1;
                } else {
                    eprintln!("Error: --sort requires a mode argument (date|size|name)");
                    std::process::exit(1);
                }
            }
            other if other.starts_with('-') => {
                eprintln!("Unknown argument: {}", other);
                print_help();
                std::process::exit(1);
            }
            other => positional.push(other.to_string()),
        }
        i += 1;
    }

    let command = match positional.first().map(String::as_str) {
        Some("index") if positional.len() == 2 => Command::Index {
            folder: PathBuf::from(&positional[1]),
        },
        Some("search") if positional.len() >= 3 => Command::Search {
            folder: PathBuf::from(&positional[1]),
            query: positional[2..].join(" "),
        },
        _ => {
            print_help();
            std::process::exit(1);
        }
    };

    CliArgs {
        config_path,
        sort,
        command,
    }
}

fn print_help() {
    println!(
        r#"photosift - photo indexing and hybrid search

USAGE:
    photosift [OPTIONS] index <FOLDER>
    photosift [OPTIONS] search <FOLDER> <QUERY>...

OPTIONS:
    --config, -c PATH   Path to config file
    --sort, -s MODE     Collection order: date, size, or name
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    PHOTOSIFT_LOG       Log level (trace, debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/photosift/config.toml

Queries match tags by substring and face names after a "with" keyword
("dog park", "beach with Tina and Sam"); anything else falls back to
semantic search over stored captions."#
    );
}

fn main() -> Result<()> {
    let args = parse_args();

    let _ = photosift::logging::init(Some(Config::config_dir().join("logs")));

    let config = match args.config_path {
        Some(ref path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let mut library = Library::open(config)?;
    if let Some(mode) = args.sort {
        library.set_sort(mode);
    }

    match args.command {
        Command::Index { folder } => run_index(&mut library, &folder),
        Command::Search { folder, query } => run_search(&mut library, &folder, &query),
    }
}

fn load_or_report(library: &mut Library, folder: &Path) -> Result<()> {
    if let Err(e) = library.load_folder(folder) {
        match &e {
            LoadError::FolderNotFound(_) => eprintln!("Folder not found: {}", folder.display()),
            LoadError::NotADirectory(_) => eprintln!("Not a directory: {}", folder.display()),
            LoadError::PermissionDenied(_) => {
                eprintln!("Permission denied: {}", folder.display())
            }
            LoadError::NoImagesFound(_) => eprintln!("No images found in {}", folder.display()),
        }
        return Err(e.into());
    }
    Ok(())
}

fn run_index(library: &mut Library, folder: &Path) -> Result<()> {
    load_or_report(library, folder)?;

    let total = library.photos().len();
    let cached = library.photos().iter().filter(|p| p.cached).count();
    println!("{} photos ({} cached, {} to enrich)", total, cached, total - cached);

    // Drive the pipelines to completion, echoing their progress
    while library.has_active_pipelines() {
        for event in library.poll_updates() {
            let kind = event.kind.display_name();
            match event.update {
                PipelineUpdate::Started { total } => {
                    println!("[{}] processing {} photos", kind, total)
                }
                PipelineUpdate::Progress {
                    processed,
                    total,
                    path,
                } => println!("[{}] {}/{} {}", kind, processed, total, path),
                PipelineUpdate::Completed { processed, failed } => {
                    if failed > 0 {
                        println!("[{}] done: {} processed, {} failed", kind, processed, failed)
                    } else {
                        println!("[{}] done: {} processed", kind, processed)
                    }
                }
                PipelineUpdate::Cancelled => println!("[{}] cancelled", kind),
                PipelineUpdate::Failed { error } => eprintln!("[{}] failed: {}", kind, error),
            }
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    Ok(())
}

fn run_search(library: &mut Library, folder: &Path, query: &str) -> Result<()> {
    load_or_report(library, folder)?;

    // The semantic fallback may call the embedding provider, so the query
    // resolves on a worker thread and we block on its channel
    let results = library
        .request_search(query)
        .recv()
        .map_err(|_| anyhow::anyhow!("search worker exited unexpectedly"))??;
    if results.is_empty() {
        println!("No matches for \"{}\"", query);
        return Ok(());
    }

    for photo in &results {
        let date = photo.modified.format("%Y-%m-%d");
        let size_kb = photo.size_bytes as f64 / 1024.0;
        let tags = if photo.tags.is_empty() {
            "(pending)"
        } else {
            photo.tags.as_str()
        };
        println!(
            "{}  {}  {:.1} KB  {}  [{}]",
            photo.path.display(),
            date,
            size_kb,
            photo.location,
            tags
        );
    }
    println!("{} match(es)", results.len());

    Ok(())
}
