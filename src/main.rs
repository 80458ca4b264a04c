mod browser;
mod chunks;
mod driver;
mod error;
mod output;
mod parser;
mod reduce;
mod scanner;
mod service_worker;
mod settings;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};

use output::Summary;
use parser::{descriptor, Candidate};
use settings::Settings;

#[derive(Parser)]
#[command(
    name = "gql_harvest",
    about = "Harvest GraphQL operation ids from a web app's JavaScript bundles"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the app in Chrome, discover its bundles and extract operations
    Run {
        /// Output file (default from config: endpoints.json)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Max bundles to scan (default: all selected)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Show the browser window
        #[arg(long)]
        headed: bool,
        /// Override the entry route
        #[arg(long)]
        entry_url: Option<String>,
    },
    /// Extract operations from saved bundle files, no browser
    Scan {
        /// Bundle files to scan
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Output file (default from config: endpoints.json)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut settings = Settings::load().context("Failed to load settings")?;

    let result = match cli.command {
        Commands::Run {
            output,
            limit,
            headed,
            entry_url,
        } => {
            if let Some(path) = output {
                settings.output = path;
            }
            if let Some(url) = entry_url {
                settings.entry_url = url;
            }
            if headed {
                settings.headless = false;
            }

            let report = driver::run(&settings, limit).await?;
            println!(
                "Chunks: {} candidates (registry {}) | Bundles: {} listed, {} scanned ({} ok, {} errors, {} candidates)",
                report.chunk_candidates,
                if report.registry_ready { "ready" } else { "not ready" },
                report.manifest_entries,
                report.selected_bundles,
                report.scan.ok,
                report.scan.errors,
                report.scan.candidates,
            );
            output::write_result_set(&settings.output, &report.result)
                .with_context(|| format!("Failed to write {}", settings.output.display()))?;
            println!("{}", Summary::of(&report.result));
            println!("Pipeline took {}", format_duration(report.elapsed));
            Ok(())
        }
        Commands::Scan { files, output } => {
            if let Some(path) = output {
                settings.output = path;
            }
            println!("Scanning {} files...", files.len());
            let candidates = scan_files(&files, settings.minimal_window)?;
            let set = reduce::reduce(candidates, Utc::now());
            output::write_result_set(&settings.output, &set)
                .with_context(|| format!("Failed to write {}", settings.output.display()))?;
            println!("{}", Summary::of(&set));
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

/// Extract candidates from local files in parallel, concatenated in
/// argument order.
fn scan_files(files: &[PathBuf], minimal_window: usize) -> anyhow::Result<Vec<Candidate>> {
    use indicatif::{ProgressBar, ProgressStyle};
    use rayon::prelude::*;

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")?
            .progress_chars("#>-"),
    );

    let per_file: Vec<anyhow::Result<Vec<Candidate>>> = files
        .par_iter()
        .map(|path| {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let found = descriptor::extract_candidates(&text, minimal_window);
            pb.inc(1);
            Ok(found)
        })
        .collect();
    pb.finish_and_clear();

    let mut all = Vec::new();
    for found in per_file {
        all.extend(found?);
    }
    Ok(all)
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn scan_fixture_file() {
        let files = vec![PathBuf::from("tests/fixtures/bundle.js")];
        let set = reduce::reduce(scan_files(&files, 500).unwrap(), Utc::now());
        let names: Vec<&str> = set.endpoints.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["Bookmarks", "CreateTweet", "TweetDetail", "UserByScreenName"]
        );
        assert_eq!(set.with_features(), 3);
    }

    #[test]
    fn scan_missing_file_fails() {
        let files = vec![PathBuf::from("tests/fixtures/does-not-exist.js")];
        assert!(scan_files(&files, 500).is_err());
    }

    #[test]
    fn durations() {
        assert_eq!(format_duration(Duration::from_millis(2500)), "2.5s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m 5s");
    }
}
