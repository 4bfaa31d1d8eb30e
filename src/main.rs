use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

use photosim::{logging, CancelFlag, Config, PassControl, PhotoSimilarity};

/// Hash similarity used by `--duplicates` when no threshold is given.
const DEFAULT_DUPLICATE_THRESHOLD: f32 = 0.9;

enum Command {
    Cluster,
    Similar(i64),
    Duplicates(i64),
}

struct Args {
    config_path: Option<PathBuf>,
    command: Option<Command>,
    threshold: Option<f32>,
    limit: usize,
}

fn parse_args() -> Result<Args> {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args {
        config_path: None,
        command: None,
        threshold: None,
        limit: 20,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("photosim {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                parsed.config_path = Some(PathBuf::from(value(&args, i, "--config")?));
                i += 1;
            }
            "--cluster" => parsed.command = Some(Command::Cluster),
            "--similar" => {
                let id = value(&args, i, "--similar")?;
                parsed.command = Some(Command::Similar(
                    id.parse().with_context(|| format!("Invalid photo id: {}", id))?,
                ));
                i += 1;
            }
            "--duplicates" => {
                let id = value(&args, i, "--duplicates")?;
                parsed.command = Some(Command::Duplicates(
                    id.parse().with_context(|| format!("Invalid photo id: {}", id))?,
                ));
                i += 1;
            }
            "--threshold" | "-t" => {
                let threshold = value(&args, i, "--threshold")?;
                parsed.threshold = Some(
                    threshold
                        .parse()
                        .with_context(|| format!("Invalid threshold: {}", threshold))?,
                );
                i += 1;
            }
            "--limit" | "-n" => {
                let limit = value(&args, i, "--limit")?;
                parsed.limit = limit
                    .parse()
                    .with_context(|| format!("Invalid limit: {}", limit))?;
                i += 1;
            }
            other => {
                print_help();
                bail!("Unknown argument: {}", other);
            }
        }
        i += 1;
    }

    Ok(parsed)
}

fn value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str> {
    match args.get(i + 1) {
        Some(v) => Ok(v.as_str()),
        None => bail!("{} requires a value", flag),
    }
}

fn print_help() {
    println!(
        r#"photosim - photo similarity search and clustering

USAGE:
    photosim [OPTIONS] <COMMAND>

COMMANDS:
    --cluster               Run a clustering pass over all embeddings
    --similar ID            Find photos similar to ID across all signals
    --duplicates ID         Find near-duplicates of ID by perceptual hash

OPTIONS:
    --config, -c PATH       Path to config file
    --threshold, -t F       Similarity threshold in [0, 1]
    --limit, -n N           Maximum number of results (default 20)
    --version, -V           Show version
    --help, -h              Show this help message

ENVIRONMENT:
    PHOTOSIM_CONFIG         Path to config file (overrides default location)
    PHOTOSIM_LOG            Log filter (trace, debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/photosim/config.toml"#
    );
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args()?;

    let _ = logging::init(Some(Config::config_dir().join("logs")));

    let config = match &args.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let Some(command) = args.command else {
        print_help();
        return Ok(());
    };

    let service = PhotoSimilarity::open(&config)
        .with_context(|| format!("Failed to open database {}", config.db_path.display()))?;

    match command {
        Command::Cluster => {
            let cancel = CancelFlag::new();
            let handler_flag = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Interrupt received, cancelling clustering pass");
                    handler_flag.cancel();
                }
            });
            let summary = service.run_clustering_pass(PassControl::new(cancel)).await?;
            print_json(&summary)?;
        }
        Command::Similar(id) => {
            let threshold = args.threshold.unwrap_or(config.similarity.threshold);
            let results = service.find_similar(id, threshold, args.limit).await?;
            print_json(&results)?;
        }
        Command::Duplicates(id) => {
            let threshold = args.threshold.unwrap_or(DEFAULT_DUPLICATE_THRESHOLD);
            let matches = service.find_near_duplicates(id, threshold, args.limit).await?;
            print_json(&matches)?;
        }
    }

    Ok(())
}
