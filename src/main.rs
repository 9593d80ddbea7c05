use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime};

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use iptv_m3u_fetch::config::{self, Overrides, Settings};
use iptv_m3u_fetch::listing::Ranking;
use iptv_m3u_fetch::site::{self, DownloadHook, DumpSite, Region};
use iptv_m3u_fetch::{artifact, pipeline};

#[derive(Parser)]
#[command(name = "iptv_m3u_fetch", about = "Pick the freshest multicast IPTV source and fetch its M3U playlist")]
struct Cli {
    /// Settings file (TOML/JSON/YAML); defaults to ./iptv_m3u_fetch.* when present
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Do not write the provenance line into the playlist
    #[arg(long, global = true)]
    no_stamp: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct FetchArgs {
    /// Directory holding exported listing rows (<region>.json)
    #[arg(long)]
    rows_dir: PathBuf,
    /// Directory the browser downloads into
    #[arg(long)]
    download_dir: Option<PathBuf>,
    /// Directory the final playlist is written to
    #[arg(short, long)]
    output_dir: Option<PathBuf>,
    /// Seconds to wait for the download to land
    #[arg(short, long)]
    timeout: Option<u64>,
    /// Command that clicks through and downloads the selected entry
    #[arg(last = true, required = true)]
    download_cmd: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Rank the multicast IPs in a rows dump
    Rank {
        /// JSON array of {text, links} rows
        rows: PathBuf,
        /// Which entry to mark (1 = freshest)
        #[arg(short = 'n', long)]
        rank: Option<usize>,
    },
    /// Fetch the playlist for one region
    Run {
        /// Region keyword
        #[arg(short, long)]
        keyword: Option<String>,
        /// Which freshest IP to take (1 = freshest)
        #[arg(short = 'n', long)]
        rank: Option<usize>,
        /// Direct listing URL for the region
        #[arg(long)]
        url: Option<String>,
        #[command(flatten)]
        fetch: FetchArgs,
    },
    /// Fetch playlists for every region in a regions file
    Batch {
        /// One region per line: name[|keyword[|url]]
        #[arg(long)]
        regions: PathBuf,
        #[arg(short = 'n', long)]
        rank: Option<usize>,
        #[command(flatten)]
        fetch: FetchArgs,
    },
    /// Wait for the next playlist to appear in a directory
    Wait {
        #[arg(short, long)]
        dir: Option<PathBuf>,
        #[arg(short, long)]
        timeout: Option<u64>,
    },
    /// Write or refresh the provenance line of a playlist
    Stamp {
        #[arg(short, long)]
        file: PathBuf,
        #[arg(long)]
        ip: String,
        #[arg(short = 'n', long)]
        rank: usize,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut overrides = Overrides {
        no_stamp: cli.no_stamp,
        ..Default::default()
    };

    let result = match cli.command {
        Commands::Rank { rows, rank } => {
            overrides.rank = rank;
            let settings = Settings::load(cli.config.as_deref(), &overrides)?;
            let rows = site::load_rows(&rows).with_context(|| format!("Failed to load rows from {}", rows.display()))?;
            let ranking = Ranking::from_rows(&rows, &settings.multicast_marker);
            println!("{} valid multicast IPs (1 = freshest):", ranking.len());
            for line in ranking.render(settings.rank) {
                println!("{}", line);
            }
            let entry = ranking.select(settings.rank)?;
            println!("\nSelected #{}: {} ({}) -> {}", settings.rank, entry.ip, entry.label, entry.link);
            Ok(())
        }
        Commands::Run { keyword, rank, url, fetch } => {
            overrides.keyword = keyword;
            overrides.rank = rank;
            apply_fetch_overrides(&mut overrides, &fetch);
            let mut settings = Settings::load(cli.config.as_deref(), &overrides)?;
            if io::stdin().is_terminal() && config::nothing_explicit(&overrides) {
                config::prompt_interactively(&mut settings, io::stdin().lock(), io::stdout())?;
            }
            info!(keyword = %settings.keyword, rank = settings.rank, "Starting single run");

            let mut region = Region::from_keyword(&settings.keyword);
            region.url = url;
            let mut site = build_site(&settings, &fetch)?;
            let output = settings.output_path();

            let outcome = pipeline::run_region(&settings, &mut site, &region, &output)?;
            println!("\nDone: {}", outcome.region);
            println!("  Rank:     #{} freshest valid multicast IP", outcome.rank);
            println!("  Source:   {} ({}, via {})", outcome.ip, outcome.label, outcome.strategy);
            println!("  Playlist: {}", outcome.path.display());
            Ok(())
        }
        Commands::Batch { regions, rank, fetch } => {
            overrides.rank = rank;
            apply_fetch_overrides(&mut overrides, &fetch);
            let settings = Settings::load(cli.config.as_deref(), &overrides)?;
            let regions = site::load_regions(&regions)?;
            if regions.is_empty() {
                bail!("No regions listed.");
            }
            let mut site = build_site(&settings, &fetch)?;

            println!("Batch: {} regions, rank {}", regions.len(), settings.rank);
            let report = pipeline::run_batch(&settings, &mut site, &regions);
            report.print();
            if report.succeeded.is_empty() {
                bail!("Every region failed.");
            }
            Ok(())
        }
        Commands::Wait { dir, timeout } => {
            overrides.download_dir = dir;
            overrides.download_timeout_secs = timeout;
            let settings = Settings::load(cli.config.as_deref(), &overrides)?;
            wait_for_playlist(&settings)
        }
        Commands::Stamp { file, ip, rank } => {
            artifact::stamp::try_stamp(&file, &ip, rank)
                .with_context(|| format!("Failed to stamp {}", file.display()))?;
            println!("Stamped {}", file.display());
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn apply_fetch_overrides(overrides: &mut Overrides, fetch: &FetchArgs) {
    overrides.download_dir = fetch.download_dir.clone();
    overrides.output_dir = fetch.output_dir.clone();
    overrides.download_timeout_secs = fetch.timeout;
}

fn build_site(settings: &Settings, fetch: &FetchArgs) -> anyhow::Result<DumpSite> {
    if !fetch.rows_dir.is_dir() {
        bail!("Rows directory {} does not exist", fetch.rows_dir.display());
    }
    let hook = DownloadHook::from_command_line(&fetch.download_cmd, &settings.download_dir, settings.download_timeout())
        .context("Missing download command")?;
    Ok(DumpSite::new(&fetch.rows_dir, hook))
}

fn wait_for_playlist(settings: &Settings) -> anyhow::Result<()> {
    let watcher = settings.watcher();
    let before = watcher.snapshot();
    println!(
        "Watching {} for .{} files ({} already present, {}s timeout)...",
        display_dir(watcher.dir()),
        settings.extension,
        before.len(),
        settings.download_timeout_secs
    );
    match watcher.wait_for_new_file(&before, SystemTime::now(), settings.download_timeout()) {
        Some(path) => {
            println!("{}", path.display());
            Ok(())
        }
        None => bail!("No new playlist within {}s", settings.download_timeout_secs),
    }
}

fn display_dir(p: &Path) -> String {
    p.canonicalize()
        .unwrap_or_else(|_| p.to_path_buf())
        .display()
        .to_string()
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else {
        format!("{}m {}s", secs / 60, secs % 60)
    }
}
