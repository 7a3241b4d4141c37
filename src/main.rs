//! Phoenix - queue media downloads through yt-dlp
//!
//! Paste one or more URLs, pick (or let Phoenix suggest) a quality profile,
//! and the queue downloads them with a bounded number of yt-dlp processes.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use phoenix::cli::{render_until_done, OutputMode};
use phoenix::downloader::profile::{is_known_profile, suggest_profile, QUALITY_PROFILES};
use phoenix::queue::{update_channel, Downloader, DownloaderConfig};
use phoenix::utils::{self, SettingsStore};
use phoenix::{DownloadTask, ToolCommand};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "phoenix", version, about = "Queue media downloads through yt-dlp")]
struct Args {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download one or more URLs
    Download {
        #[arg(required = true)]
        urls: Vec<String>,

        /// Quality profile name; suggested per URL when omitted
        #[arg(short, long)]
        quality: Option<String>,

        /// Output directory (defaults to the configured one)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Maximum parallel downloads (defaults to the configured value)
        #[arg(short = 'j', long)]
        max_concurrent: Option<usize>,

        /// yt-dlp program to run
        #[arg(long)]
        yt_dlp: Option<PathBuf>,

        /// Print every update as JSON
        #[arg(long)]
        json: bool,

        /// Also print raw yt-dlp output
        #[arg(long)]
        show_log: bool,
    },
    /// List quality profiles
    Profiles,
    /// Show which profile a URL would get
    Suggest { url: String },
    /// Show the current settings
    Settings {
        /// Only print the settings file location
        #[arg(long)]
        path: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    utils::logging::init(args.verbose, &utils::log_dir());

    let store = SettingsStore::open_default();

    match args.command {
        Command::Download {
            urls,
            quality,
            output_dir,
            max_concurrent,
            yt_dlp,
            json,
            show_log,
        } => {
            let mut settings = store.load();
            if let Some(dir) = output_dir {
                settings.output_directory = dir;
            }
            if let Some(n) = max_concurrent {
                settings.max_concurrent_downloads = n.max(1);
            }
            if let Some(q) = &quality {
                if !is_known_profile(q) {
                    bail!("Unknown quality profile {:?}. See `phoenix profiles`", q);
                }
            }

            let tool = yt_dlp.map(ToolCommand::new).unwrap_or_else(ToolCommand::locate);
            let config = DownloaderConfig::from_settings(&settings, tool);
            let mode = if json {
                OutputMode::Json
            } else {
                OutputMode::Human { show_log }
            };

            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(async move {
                let (tx, rx) = update_channel();
                let downloader = Downloader::new(config, tx);

                let mut expected = HashSet::new();
                for url in urls {
                    let profile = quality.clone().unwrap_or_else(|| {
                        suggest_profile(&url, &settings.default_quality).to_string()
                    });
                    let task = DownloadTask::new(url, profile, settings.output_directory.clone());
                    expected.insert(downloader.add_task(task).await?);
                }

                let summary = tokio::select! {
                    summary = render_until_done(rx, expected, mode) => summary,
                    _ = tokio::signal::ctrl_c() => {
                        warn!("Interrupted, cancelling downloads");
                        downloader.shutdown().await;
                        return Ok(());
                    }
                };

                downloader.shutdown().await;
                info!(
                    "Finished: {} completed, {} failed, {} cancelled",
                    summary.completed, summary.failed, summary.cancelled
                );
                if summary.failed > 0 {
                    bail!("{} of {} downloads failed", summary.failed, summary.total());
                }
                Ok::<(), anyhow::Error>(())
            })
        }
        Command::Profiles => {
            for profile in QUALITY_PROFILES.iter() {
                println!("{:<26} {:?}  {}", profile.key, profile.content_type, profile.description);
            }
            Ok(())
        }
        Command::Suggest { url } => {
            let settings = store.load();
            println!("{}", suggest_profile(&url, &settings.default_quality));
            Ok(())
        }
        Command::Settings { path } => {
            if path {
                println!("{}", store.path().display());
            } else {
                let settings = store.load();
                println!("{}", serde_json::to_string_pretty(&settings)?);
            }
            Ok(())
        }
    }
}
