use clap::ValueEnum;

pub mod scrape;
pub mod ytdlp;

pub use scrape::ScrapeResolver;
pub use ytdlp::YtDlpResolver;

/// Written in place of any link that could not be resolved, so the playlist
/// always stays loadable
pub const FALLBACK_URL: &str =
    "https://raw.githubusercontent.com/benmoose39/YouTube_to_m3u/main/assets/moose_na.m3u";

/// Turns a source page URL into a playable stream URL.
///
/// Implementations never fail: anything that goes wrong resolves to
/// [`FALLBACK_URL`].
#[allow(async_fn_in_trait)]
pub trait LinkResolver {
    async fn resolve(&self, url: &str) -> String;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Strategy {
    /// Scan the page (and its scripts) for `.m3u8` links
    #[default]
    Scrape,
    /// Ask `yt-dlp` for the available formats and pick the best one
    #[value(name = "yt-dlp")]
    YtDlp,
}
