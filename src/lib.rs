#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::cargo)]
#![warn(clippy::perf)]
#![warn(clippy::complexity)]
#![warn(clippy::style)]
#![allow(clippy::multiple_crate_versions)]

use anyhow::Result;
use indicatif::ProgressBar;
use tokio::io::AsyncWrite;
use tracing::debug;

use channel::InputLine;
use playlist::PlaylistWriter;
use resolver::{FALLBACK_URL, LinkResolver};
use util::truncate_string;

pub mod channel;
pub mod playlist;
pub mod resolver;
pub mod util;

/// Counters reported once a playlist has been written
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    pub lines: usize,
    pub channels: usize,
    pub comments: usize,
    pub links: usize,
    pub fallbacks: usize,
}

/// Converts the channel info file into an M3U playlist.
///
/// Lines are handled strictly one after another and written out as soon as they
/// are done, so output order always follows input order.
///
/// # Errors
/// Only errors when writing to `output` fails. Resolution failures end up as
/// [`FALLBACK_URL`] entries.
pub async fn run<R, W>(
    input: &str,
    resolver: &R,
    output: W,
    progress: &ProgressBar,
) -> Result<(RunStats, W)>
where
    R: LinkResolver,
    W: AsyncWrite + Unpin,
{
    let lines = input.lines().collect::<Vec<&str>>();
    progress.set_length(lines.len() as u64);

    let mut stats = RunStats::default();
    let mut playlist = PlaylistWriter::new(output);
    playlist.write_header().await?;

    for line in lines {
        stats.lines += 1;
        match InputLine::classify(line) {
            InputLine::Skip => {}
            InputLine::Channel(entry) => {
                debug!("Channel: {}", entry.name);
                progress.set_message(truncate_string(&entry.name, 40));
                stats.channels += 1;
                playlist.write_channel(&entry).await?;
            }
            InputLine::Comment(text) => {
                debug!("Not a channel line, keeping as comment: {text}");
                stats.comments += 1;
                playlist.write_comment(&text).await?;
            }
            InputLine::Url(url) => {
                let link = resolver.resolve(&url).await;
                debug!("{url} -> {link}");
                stats.links += 1;
                if link == FALLBACK_URL {
                    stats.fallbacks += 1;
                }
                playlist.write_link(&link).await?;
            }
        }
        progress.inc(1);
    }

    let output = playlist.finish().await?;
    Ok((stats, output))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoResolver;

    impl LinkResolver for EchoResolver {
        async fn resolve(&self, url: &str) -> String {
            if url.contains("dead") {
                FALLBACK_URL.to_string()
            } else {
                format!("{url}/index.m3u8")
            }
        }
    }

    #[tokio::test]
    async fn counts_every_kind_of_line() {
        let input = "A | news | logo | a.id\nhttps://a.example\n\n~~ skipped\nnote\nB | x | y | z\nhttps://dead.example\n";
        let (stats, out) = run(input, &EchoResolver, Vec::new(), &ProgressBar::hidden())
            .await
            .unwrap();

        assert_eq!(
            stats,
            RunStats {
                lines: 7,
                channels: 2,
                comments: 1,
                links: 2,
                fallbacks: 1,
            }
        );

        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("https://a.example/index.m3u8\n"));
        assert!(!out.contains("skipped"));
    }
}
