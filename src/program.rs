use std::env::current_dir;
use std::fs::create_dir_all;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Error};
use clap::Parser;
use console::Term;
use dialoguer::Select;

use crate::flac::Harvester;
use crate::flac::blacklist::Blacklist;
use crate::flac::io::directory::sweep::{SweepSummary, Sweeper};
use crate::flac::io::tags::{LoftyTagReader, TagReader};
use crate::flac::io::{Config, config_path_from_env};
use crate::flac::pool::WorkerPool;
use crate::flac::processor::ItemProcessor;
use crate::flac::sender::RequestSender;

/// The name of the cargo package.
const NAME: &str = env!("CARGO_PKG_NAME");

/// The version of the cargo package.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The authors who created the package.
const AUTHORS: &str = env!("CARGO_PKG_AUTHORS");

/// What a run does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    /// Search, download and validate new tracks.
    Fetch,
    /// Sweep the existing library.
    Clean,
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "fetch" | "0" => Ok(Mode::Fetch),
            "clean" | "1" => Ok(Mode::Clean),
            other => Err(format!("unknown mode \"{other}\", expected fetch (0) or clean (1)")),
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "flac_downloader", version, about = "Bulk music downloader with tag validation")]
pub(crate) struct Args {
    /// fetch (0) or clean (1). Prompts when omitted.
    #[arg(short, long)]
    pub(crate) mode: Option<Mode>,

    /// Config file. Defaults to $CONFIG_FILE/conf.$ENVIRONMENT.toml.
    #[arg(short, long)]
    pub(crate) config: Option<PathBuf>,
}

/// A program class that handles the flow of the downloader and its steps of execution.
pub(crate) struct Program {
    args: Args,
}

impl Program {
    pub(crate) fn new(args: Args) -> Self {
        Self { args }
    }

    /// Runs the downloader program.
    pub(crate) fn run(&self) -> Result<(), Error> {
        Term::stdout().set_title("flac downloader");
        trace!("Starting flac downloader...");
        trace!("Program Name: {}", NAME);
        trace!("Program Version: {}", VERSION);
        trace!("Program Authors: {}", AUTHORS);
        let working_dir = current_dir().context("Failed to get working directory")?;
        trace!("Program Working Directory: {}", working_dir.display());

        let config_path = self.args.config.clone().unwrap_or_else(config_path_from_env);
        trace!("Checking if config file {} exists...", config_path.display());
        if !config_path.exists() {
            Config::create_default(&config_path)
                .with_context(|| format!("Failed to create config file {}", config_path.display()))?;
            info!(
                "Created a default config at {}. Edit it and run again.",
                config_path.display()
            );
            return Ok(());
        }

        let config = Config::load(&config_path)
            .with_context(|| format!("Failed to load config {}", config_path.display()))?;

        match self.args.mode.unwrap_or_else(select_mode) {
            Mode::Fetch => run_fetch(&config),
            Mode::Clean => run_clean(&config),
        }
    }
}

/// Asks which mode to run. Without an attended terminal the answer is [Mode::Fetch].
fn select_mode() -> Mode {
    if !console::user_attended() {
        trace!("No terminal attached, defaulting to fetch mode");
        return Mode::Fetch;
    }

    let selection = Select::new()
        .with_prompt("What would you like to do?")
        .items(&["Fetch new music", "Clean the library"])
        .default(0)
        .interact();

    match selection {
        Ok(1) => Mode::Clean,
        Ok(_) => Mode::Fetch,
        Err(err) => {
            warn!("Failed to read mode selection: {}. Defaulting to fetch.", err);
            Mode::Fetch
        }
    }
}

fn run_fetch(config: &Config) -> Result<(), Error> {
    let save_dir = config.save_dir();
    create_dir_all(&save_dir).with_context(|| format!("Failed to create {}", save_dir.display()))?;

    let sender = Arc::new(
        RequestSender::new(&config.catalog, config.request_timeout()).context("Failed to build HTTP client")?,
    );
    let tag_reader: Arc<dyn TagReader> = Arc::new(LoftyTagReader);
    let processor = ItemProcessor::from_config(config, sender.clone(), sender.clone(), tag_reader);
    let pool = WorkerPool::new(config.worker_count, config.failure_penalty())
        .context("Failed to create download worker pool")?;

    let mut harvester = Harvester::new(config, sender, processor, pool);
    if !console::user_attended_stderr() {
        harvester = harvester.hide_progress();
    }

    let summary = harvester.run()?;
    info!(
        "Finished: {} keyword(s), {} page(s), {} task(s). {} kept, {} rejected, {} skipped, {} failed.",
        summary.keywords,
        summary.pages,
        summary.tasks,
        summary.kept,
        summary.rejected,
        summary.skipped,
        summary.failed
    );
    Ok(())
}

fn run_clean(config: &Config) -> Result<(), Error> {
    let root = config.save_dir();
    let blacklist = Blacklist::new(&config.clean.exclude_keywords);
    if blacklist.is_empty() {
        warn!("No exclusion keywords configured, only title mismatches will be removed");
    }
    let sweeper = Sweeper::new(Arc::new(LoftyTagReader), blacklist, &config.files.cover_file_name);

    let mut total = SweepSummary::default();
    for pass in 1..=config.clean.passes {
        info!("Clean pass {}/{} over {}", pass, config.clean.passes, root.display());
        match sweeper.sweep(&root) {
            Ok(summary) => total.absorb(summary),
            Err(err) => error!("Clean pass {} failed: {}", pass, err),
        }
    }

    info!(
        "Clean finished: {} file(s) removed ({} title mismatch, {} excluded), {} director(ies) pruned, {} unreadable.",
        total.files_removed(),
        total.removed_title_mismatch,
        total.removed_excluded,
        total.dirs_pruned,
        total.unreadable
    );
    Ok(())
}
