//! Headless acquisition runner: loads the JSON configuration, drives an
//! offline (file-backed) microscope through the automation keywords and
//! prints a summary of the search.
//!
//! Exit codes: 0 on a clean run, 2 on a configuration failure, 1 on any
//! other error.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::error;

use stem4d_rs::automate::{Keyword, Session};
use stem4d_rs::config;
use stem4d_rs::hardware::{OfflineMicroscope, SharedMicroscope};

/// stem4d-acquire runs the survey-to-search acquisition sequence without a
/// microscope attached, scanning regions out of a survey image file.
#[derive(Parser)]
#[command(version, about)]
struct Opts {
    /// Path to the JSON configuration file.
    #[arg(short, long, default_value = "lib/assets/config.json")]
    config: PathBuf,

    /// Survey image backing the offline column.
    #[arg(short, long, default_value = "lib/assets/img_3.bmp")]
    survey: PathBuf,

    /// Directory the region files are written into; overrides the
    /// configured save path.
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Enable the autofocus correction during the search.
    #[arg(long)]
    autofocus: bool,

    /// Enable the background emission monitor during the search.
    #[arg(long)]
    emission: bool,

    /// Keywords to execute, in order.
    #[arg(default_values_t = [
        String::from("Scan"),
        String::from("Cluster"),
        String::from("Mark"),
        String::from("Tighten"),
        String::from("Search"),
    ])]
    keywords: Vec<String>,
}

fn run(opts: Opts) -> Result<(), ExitCode> {
    let mut settings = match config::load(&opts.config) {
        Ok(settings) => settings,
        Err(err) => {
            error!("configuration failure in {}: {err}", opts.config.display());
            return Err(ExitCode::from(2));
        }
    };
    if let Some(out) = &opts.out {
        settings.save_path = out.display().to_string();
    }

    let offline = OfflineMicroscope::from_file(&opts.survey).map_err(|err| {
        error!("could not load survey {}: {err}", opts.survey.display());
        ExitCode::FAILURE
    })?;
    let mut session =
        Session::new(settings, SharedMicroscope::new(offline)).map_err(|err| {
            error!("could not start the session: {err}");
            ExitCode::FAILURE
        })?;
    if opts.autofocus {
        session.enable_autofocus();
    }
    if opts.emission {
        session.monitor_emission();
    }

    for word in &opts.keywords {
        let keyword: Keyword = word.parse().map_err(|err| {
            error!("{err}");
            ExitCode::FAILURE
        })?;
        session.run_keyword(keyword).map_err(|err| {
            error!("keyword {word} failed: {err}");
            ExitCode::FAILURE
        })?;
    }

    if let Some(summary) = session.last_search() {
        match serde_json::to_string_pretty(summary) {
            Ok(json) => println!("{json}"),
            Err(err) => error!("could not serialise the run summary: {err}"),
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    match run(Opts::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => code,
    }
}
