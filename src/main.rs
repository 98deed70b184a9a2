#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::cargo)]
#![warn(clippy::perf)]
#![warn(clippy::complexity)]
#![warn(clippy::style)]
#![allow(clippy::multiple_crate_versions)]

use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result, bail};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use m3u_grabber::{
    RunStats,
    resolver::{
        LinkResolver, ScrapeResolver, Strategy, YtDlpResolver,
        ytdlp::{self, COOKIES_ENV},
    },
    run,
    util::{FetchConfig, spawn_ct_watcher},
};
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    select,
};
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, info, warn};

/// Resolves channel pages into direct .m3u8 stream links and writes an M3U playlist
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Channel info file: `name | group | logo | id` lines followed by page URLs
    #[arg(short, long, default_value = "../youtube_channel_info.txt")]
    input: PathBuf,

    /// Where to write the playlist [default: stdout]
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Request timeout in seconds
    #[arg(short, long, default_value_t = 12, value_parser = clap::value_parser!(u64).range(1..))]
    timeout: u64,

    /// Worker count hint. Lines are always resolved one at a time
    #[arg(short, long, default_value_t = 4)]
    concurrency: usize,

    /// How page URLs are turned into stream links
    #[arg(short, long, value_enum, default_value_t = Strategy::Scrape)]
    strategy: Strategy,

    /// Path to the yt-dlp executable, used by the `yt-dlp` strategy
    #[arg(long = "yt-dlp", default_value = "yt-dlp")]
    yt_dlp: PathBuf,

    /// Hide the progress bar
    #[arg(long)]
    no_progress: bool,

    /// Log per-line diagnostics
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.debug { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let input = tokio::fs::read(&args.input)
        .await
        .with_context(|| format!("Reading input file {}", args.input.display()))?;
    let input = String::from_utf8_lossy(&input);

    debug!(
        "Worker count hint is {}, resolving sequentially",
        args.concurrency
    );

    let progress = init_progress_bar(args.no_progress)?;

    let ct = CancellationToken::new();
    spawn_ct_watcher(ct.clone());

    // Dropping the unfinished run drops its resolver, which removes any cookie
    // file and kills a running yt-dlp
    let stats = select! {
        () = ct.cancelled() => {
            progress.abandon();
            bail!("Interrupted before the playlist was complete");
        }
        stats = grab(&args, &input, &progress) => stats?,
    };
    progress.finish_and_clear();

    if let Some(path) = &args.output {
        info!("Playlist written to {}", path.display());
    }
    info!(
        "{} channels, {} links resolved ({} fell back), {} comments",
        stats.channels,
        stats.links - stats.fallbacks,
        stats.fallbacks,
        stats.comments
    );

    Ok(())
}

async fn grab(args: &Args, input: &str, progress: &ProgressBar) -> Result<RunStats> {
    let timeout = Duration::from_secs(args.timeout);
    let output = args.output.as_ref();

    match args.strategy {
        Strategy::Scrape => {
            let resolver = ScrapeResolver::new(FetchConfig::with_timeout(timeout))?;
            write_playlist(input, &resolver, output, progress).await
        }
        Strategy::YtDlp => {
            if !ytdlp::is_installed(&args.yt_dlp, timeout).await {
                warn!(
                    "`{}` is not available, every link will fall back",
                    args.yt_dlp.display()
                );
            }

            let mut resolver = YtDlpResolver::new(&args.yt_dlp, timeout);
            let cookies = std::env::var(COOKIES_ENV)
                .ok()
                .filter(|c| !c.trim().is_empty());
            if let Some(cookies) = cookies {
                resolver = resolver.with_cookies(&cookies)?;
                debug!("Using cookies from {COOKIES_ENV}");
            }
            // The cookie file is removed when `resolver` drops, on error too
            write_playlist(input, &resolver, output, progress).await
        }
    }
}

async fn write_playlist<R: LinkResolver>(
    input: &str,
    resolver: &R,
    output: Option<&PathBuf>,
    progress: &ProgressBar,
) -> Result<RunStats> {
    let writer: Box<dyn AsyncWrite + Unpin + Send> = match output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Creating output directory {}", parent.display()))?;
            }
            let file = tokio::fs::File::create(path)
                .await
                .with_context(|| format!("Creating output file {}", path.display()))?;
            Box::new(file)
        }
        None => Box::new(tokio::io::stdout()),
    };

    let (stats, mut writer) = run(input, resolver, writer, progress).await?;
    writer.shutdown().await.context("Closing playlist output")?;

    Ok(stats)
}

fn init_progress_bar(hidden: bool) -> Result<ProgressBar> {
    if hidden {
        return Ok(ProgressBar::hidden());
    }

    let pb = ProgressBar::new(0);
    pb.set_style(ProgressStyle::with_template(
        "[{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} lines {msg}",
    )?);
    Ok(pb)
}
