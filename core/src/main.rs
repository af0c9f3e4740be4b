use burn::backend::{Autodiff, NdArray};
use clap::Parser;
use log::{error, info, warn};
use mammotrain_core::cli::report::{OptionsReport, SummaryReport};
use mammotrain_core::cli::Cli;
use mammotrain_core::{run, TrainingHistory};
use std::path::Path;
use std::process;

type TrainBackend = Autodiff<NdArray<f32>>;

fn main() {
    let cli = Cli::parse();

    // Setup logging
    setup_logging(cli.verbose);

    if !cli.img_folder.is_dir() {
        eprintln!("Error: {} is not a directory", cli.img_folder.display());
        process::exit(1);
    }

    let options = match cli.train_options() {
        Ok(options) => options,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };
    let settings = cli.runtime_settings();
    println!("\n{}", OptionsReport::new(&options, &settings));

    let device = Default::default();
    let history = match run::<TrainBackend>(&cli.img_folder, &options, &settings, &device) {
        Ok(history) => history,
        Err(e) => {
            error!("Training failed: {}", e);
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    match history.summary() {
        Some(summary) => println!("\n{}", SummaryReport::new(&summary)),
        None => warn!("No epoch completed, nothing to summarize"),
    }

    if let Some(path) = &cli.history_out {
        if let Err(e) = write_history(&history, path) {
            eprintln!("Error: failed to write history: {}", e);
            process::exit(1);
        }
        info!("Wrote training history to {}", path.display());
    }
}

fn setup_logging(verbose: bool) {
    if verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Info)
            .init();
    }
}

/// JSON when built with the `json` feature and the path ends in `.json`,
/// CSV otherwise
fn write_history(history: &TrainingHistory, path: &Path) -> mammotrain_core::Result<()> {
    #[cfg(feature = "json")]
    if path.extension().is_some_and(|e| e.eq_ignore_ascii_case("json")) {
        return history.save_json(path);
    }
    history.save_csv(path)
}
