//! framesync command-line front-end.
//!
//! Every command operates on the dataset working tree given by `--path`
//! (default: the current directory), except `clone`, which creates one.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use humansize::{format_size, BINARY};
use tracing_subscriber::EnvFilter;

use framesync::cache::LinkMode;
use framesync::config::Settings;
use framesync::dataset::{
    DownloadOptions, LocalDataset, PublishOptions, PublishReport, SyncContext,
};
use framesync::vcs::{CommitOutcome, PushOutcome, RepoStatus};

/// Sync versioned media datasets through a shared content cache.
#[derive(Parser)]
#[command(name = "framesync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Dataset working directory
    #[arg(global = true, long, default_value = ".")]
    path: PathBuf,

    /// Settings file (default: <config dir>/framesync/config.toml)
    #[arg(global = true, long)]
    config: Option<PathBuf>,

    /// Log filter when RUST_LOG is unset
    #[arg(global = true, long, default_value = "info")]
    log_level: String,

    /// Hide progress bars
    #[arg(global = true, long)]
    no_meter: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Clone a dataset repository
    Clone {
        dataset_id: String,

        /// Destination directory (default: the dataset id)
        dest: Option<PathBuf>,

        /// Reset to this revision after cloning
        #[arg(long)]
        checkout: Option<String>,
    },

    /// Fetch and reset to the remote branch
    Pull,

    /// Reset the working tree to a revision
    Checkout { rev: String },

    /// Queue local JPEG images for upload
    Stage {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Remove images from the upload queue
    Unstage {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Show repository and staging status
    Status,

    /// Show uncommitted manifest and associated file changes
    Diff,

    /// Show commit history
    Log,

    /// Show a commit
    Show { rev: Option<String> },

    /// Check the manifest
    Validate,

    /// Commit manifest and associated file changes
    Commit { message: String },

    /// Push commits to the remote
    Push,

    /// Download frames listed in the manifest
    Download(DownloadArgs),

    /// Upload staged images and add them to the manifest
    UploadImages {
        /// Don't copy images into the cache and data directory
        #[arg(long)]
        skip_copy: bool,

        /// Attempts to recover from spurious server errors
        #[arg(short, long)]
        tries: Option<u32>,
    },

    /// Upload staged images, then commit and push
    Publish {
        message: String,

        /// Attempts to recover from spurious server errors
        #[arg(short, long)]
        tries: Option<u32>,
    },
}

#[derive(Args, Debug)]
struct DownloadArgs {
    /// Also download analytics data
    #[arg(short = 'a', long)]
    include_analytics: bool,

    /// Skip primary images (analytics only)
    #[arg(long, requires = "include_analytics")]
    no_images: bool,

    /// Concurrent downloads
    #[arg(short, long)]
    pool_size: Option<usize>,

    /// Symlink instead of hardlink cache entries
    #[arg(short, long)]
    symlink: bool,

    /// Attempts to recover from spurious server errors
    #[arg(short, long)]
    tries: Option<u32>,
}

impl DownloadArgs {
    fn options(&self, settings: &Settings) -> DownloadOptions {
        DownloadOptions {
            include_images: !self.no_images,
            include_analytics: self.include_analytics,
            pool_size: self.pool_size.unwrap_or(settings.pool_size),
            link_mode: LinkMode::from_symlink_flag(self.symlink),
            tries: self.tries.unwrap_or(settings.tries),
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("{} {:#}", "Error:".red().bold(), err);
            ExitCode::FAILURE
        }
    }
}

fn context(settings: &Settings, cli: &Cli) -> Result<SyncContext> {
    settings
        .sync_context(!cli.no_meter)
        .context("Failed to set up network and version control clients")
}

fn open(settings: &Settings, cli: &Cli) -> Result<LocalDataset> {
    let ctx = context(settings, cli)?;
    LocalDataset::open(&cli.path, &ctx)
        .with_context(|| format!("Failed to open dataset at {}", cli.path.display()))
}

/// Returns Ok(false) when the command ran but did not fully succeed.
fn run(cli: Cli) -> Result<bool> {
    let mut settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;

    match &cli.command {
        Commands::Clone {
            dataset_id,
            dest,
            checkout,
        } => {
            let ctx = context(&settings, &cli)?;
            let mut options = settings.clone_options();
            options.checkout = checkout.clone();
            let dataset = LocalDataset::clone_dataset(dataset_id, dest.clone(), &ctx, &options)
                .with_context(|| format!("Failed to clone dataset {}", dataset_id))?;
            println!(
                "{} {}",
                "Cloned into".green(),
                dataset.root().display()
            );
        }
        Commands::Pull => {
            open(&settings, &cli)?.pull()?;
            println!("{}", "Up to date with remote".green());
        }
        Commands::Checkout { rev } => {
            open(&settings, &cli)?.checkout(rev)?;
            println!("Checked out {}", rev.cyan());
        }
        Commands::Stage { paths } => {
            let added = open(&settings, &cli)?.stage(paths.as_slice())?;
            println!("Staged {} new image(s)", added);
        }
        Commands::Unstage { paths } => {
            let removed = open(&settings, &cli)?.unstage(paths.as_slice())?;
            println!("Unstaged {} image(s)", removed);
        }
        Commands::Status => {
            let dataset = open(&settings, &cli)?;
            let branch = dataset.repository().current_branch()?;
            println!("On branch {}", branch.cyan());
            print_status(&dataset.status()?);
            let staged = dataset.staged()?;
            if !staged.is_empty() {
                println!("Images staged for upload:");
                for path in staged {
                    println!("  {}", path.display().to_string().green());
                }
            }
        }
        Commands::Diff => print!("{}", open(&settings, &cli)?.diff()?),
        Commands::Log => print!("{}", open(&settings, &cli)?.log()?),
        Commands::Show { rev } => print!("{}", open(&settings, &cli)?.show(rev.as_deref())?),
        Commands::Validate => {
            let manifest = open(&settings, &cli)?.validate()?;
            println!(
                "{} ({} frames)",
                "Manifest valid".green(),
                manifest.frames.len()
            );
        }
        Commands::Commit { message } => match open(&settings, &cli)?.commit(message)? {
            CommitOutcome::Committed => println!("{}", "Committed".green()),
            CommitOutcome::NothingToCommit => println!("{}", "Nothing to commit".yellow()),
        },
        Commands::Push => match open(&settings, &cli)?.push()? {
            PushOutcome::Accepted => println!("{}", "Push accepted".green()),
            PushOutcome::UpToDate => println!("{}", "Everything up-to-date".yellow()),
        },
        Commands::Download(args) => {
            if let Some(tries) = args.tries {
                settings.tries = tries;
            }
            let options = args.options(&settings);
            let report = open(&settings, &cli)?.download(&options)?;
            let summary = format!(
                "{} frames, {} unique, {} cached, {} downloaded, {} failed",
                report.frames,
                report.unique_hashes,
                report.cache_hits,
                report.downloaded,
                report.failed
            );
            if report.is_success() {
                println!("{}", summary.green());
            } else {
                println!("{}", summary.red().bold());
                return Ok(false);
            }
        }
        Commands::UploadImages { skip_copy, tries } => {
            if let Some(tries) = tries {
                settings.tries = *tries;
            }
            let options = PublishOptions {
                copy_to_cache: !skip_copy,
                pool_size: settings.pool_size,
                ..Default::default()
            };
            let report = open(&settings, &cli)?.publish_staged(&options)?;
            return Ok(print_publish(&report));
        }
        Commands::Publish { message, tries } => {
            if let Some(tries) = tries {
                settings.tries = *tries;
            }
            let options = PublishOptions {
                pool_size: settings.pool_size,
                ..Default::default()
            };
            let report = open(&settings, &cli)?.publish(message, &options)?;
            return Ok(print_publish(&report));
        }
    }
    Ok(true)
}

fn print_status(status: &RepoStatus) {
    if status.is_clean() {
        println!("{}", "Working tree clean".green());
        return;
    }
    let section = |title: &str, paths: &[String], color: fn(&str) -> colored::ColoredString| {
        if paths.is_empty() {
            return;
        }
        println!("{}:", title);
        for path in paths {
            println!("  {}", color(path));
        }
    };
    section("Staged new files", &status.added_staged, |s| s.green());
    section("Staged modifications", &status.modified_staged, |s| s.green());
    section("Modified", &status.modified_working, |s| s.red());
    section("Untracked", &status.added_working, |s| s.red());
    for entry in &status.other {
        let code = format!(
            "{}{}",
            entry.index.unwrap_or(' '),
            entry.working.unwrap_or(' ')
        );
        match &entry.dest {
            Some(dest) => println!("  {} {} -> {}", code.yellow(), entry.source, dest),
            None => println!("  {} {}", code.yellow(), entry.source),
        }
    }
}

fn print_publish(report: &PublishReport) -> bool {
    let summary = format!(
        "{} staged, {} uploaded ({}), {} already present, {} frames added",
        report.staged,
        report.uploaded,
        format_size(report.bytes_uploaded, BINARY),
        report.skipped_existing,
        report.frames_added
    );
    if report.is_success() {
        println!("{}", summary.green());
        true
    } else {
        println!("{}", summary.red().bold());
        println!(
            "{} {} upload(s) failed; staging and manifest left unchanged",
            "Error:".red().bold(),
            report.failed
        );
        false
    }
}
