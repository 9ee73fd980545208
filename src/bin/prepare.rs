//! Split the manifest and populate the audio cache ahead of training.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use birdclips::{build_datasets, BadEntry, Config};

#[derive(Parser, Debug)]
#[command(name = "birdclips-prepare", about = "Verify, cache and split a labeled audio manifest")]
struct Args {
    /// TOML config file
    #[arg(short, long)]
    config: PathBuf,

    /// Override the manifest path from the config
    #[arg(short, long)]
    manifest: Option<PathBuf>,

    /// Debug logging and progress bars
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let mut config = match Config::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config {:?}: {}", args.config, e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(manifest) = args.manifest {
        config.manifest = manifest;
    }
    config.verbose |= args.verbose;

    let default_filter = if config.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();
    log::debug!("Loaded config from {:?}", args.config);

    let (train, valid) = match build_datasets(&config) {
        Ok(pair) => pair,
        Err(e) => {
            log::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    for ds in [&train, &valid] {
        let unreadable = ds
            .bad_files()
            .iter()
            .filter(|b| matches!(b, BadEntry::Unreadable { .. }))
            .count();
        log::info!(
            "{}: {} rows, {} unreadable files, manifest {:?}",
            ds.name(),
            ds.len(),
            unreadable,
            ds.formatted_csv()
        );
    }
    log::info!("{} classes: {:?}", train.num_classes(), train.classes().0);

    ExitCode::SUCCESS
}
