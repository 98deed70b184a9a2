use anyhow::{Context, Result};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::channel::ChannelEntry;

pub const EPG_URL: &str = "https://github.com/botallen/epg/releases/download/latest/epg.xml";

pub const BANNER: &str = indoc::indoc! {r"

    #########################################################################
    #      ____            _           _   __  __                           #
    #     |  _ \ _ __ ___ (_) ___  ___| |_|  \/  | ___   ___  ___  ___      #
    #     | |_) | '__/ _ \| |/ _ \/ __| __| |\/| |/ _ \ / _ \/ __|/ _ \     #
    #     |  __/| | | (_) | |  __/ (__| |_| |  | | (_) | (_) \__ \  __/     #
    #     |_|   |_|  \___// |\___|\___|\__|_|  |_|\___/ \___/|___/\___|     #
    #                   |__/                                                #
    #                                  >> https://github.com/benmoose39     #
    #########################################################################
"};

/// Streams M3U output line by line into any async writer
pub struct PlaylistWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> PlaylistWriter<W> {
    pub const fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Writes the `#EXTM3U` directive and the banner
    ///
    /// # Errors
    /// Errors when the underlying writer fails
    pub async fn write_header(&mut self) -> Result<()> {
        self.write(&format!("#EXTM3U x-tvg-url=\"{EPG_URL}\"\n{BANNER}\n"))
            .await
    }

    /// # Errors
    /// Errors when the underlying writer fails
    pub async fn write_channel(&mut self, entry: &ChannelEntry) -> Result<()> {
        self.write(&format!("\n{}\n", extinf_line(entry))).await
    }

    /// # Errors
    /// Errors when the underlying writer fails
    pub async fn write_comment(&mut self, text: &str) -> Result<()> {
        self.write(&format!("\n# {text}\n")).await
    }

    /// # Errors
    /// Errors when the underlying writer fails
    pub async fn write_link(&mut self, link: &str) -> Result<()> {
        self.write(&format!("{link}\n")).await
    }

    /// Flushes and hands back the underlying writer
    ///
    /// # Errors
    /// Errors when flushing fails
    pub async fn finish(mut self) -> Result<W> {
        self.inner.flush().await.context("Flushing playlist output")?;
        Ok(self.inner)
    }

    async fn write(&mut self, s: &str) -> Result<()> {
        self.inner
            .write_all(s.as_bytes())
            .await
            .context("Writing playlist output")
    }
}

#[must_use]
pub fn extinf_line(entry: &ChannelEntry) -> String {
    format!(
        "#EXTINF:-1 group-title=\"{}\" tvg-logo=\"{}\" tvg-id=\"{}\", {}",
        title_case(&entry.group),
        entry.logo_url,
        entry.external_id,
        entry.name
    )
}

/// Uppercases the first letter of every word and lowercases the rest.
///
/// Any non-letter character (digits, apostrophes, spaces) starts a new word.
#[must_use]
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_word = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if in_word {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(c);
            in_word = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(group: &str) -> ChannelEntry {
        ChannelEntry {
            name: "Euronews PT".to_string(),
            group: group.to_string(),
            logo_url: "https://logo.example/e.png".to_string(),
            external_id: "euronews.pt".to_string(),
        }
    }

    #[test]
    fn title_case_words() {
        assert_eq!(title_case("news channels"), "News Channels");
        assert_eq!(title_case("SPORTS"), "Sports");
        assert_eq!(title_case("música ao vivo"), "Música Ao Vivo");
        assert_eq!(title_case("3d movies"), "3D Movies");
        assert_eq!(title_case(""), "");
    }

    #[test]
    fn extinf_line_carries_all_fields() {
        assert_eq!(
            extinf_line(&entry("news")),
            "#EXTINF:-1 group-title=\"News\" tvg-logo=\"https://logo.example/e.png\" tvg-id=\"euronews.pt\", Euronews PT"
        );
    }

    #[tokio::test]
    async fn writes_header_then_entries_in_order() {
        let mut writer = PlaylistWriter::new(Vec::new());
        writer.write_header().await.unwrap();
        writer.write_channel(&entry("news")).await.unwrap();
        writer.write_link("https://cdn.example/live.m3u8").await.unwrap();
        writer.write_comment("broken line").await.unwrap();

        let out = String::from_utf8(writer.finish().await.unwrap()).unwrap();
        assert!(out.starts_with(&format!("#EXTM3U x-tvg-url=\"{EPG_URL}\"\n")));
        assert!(out.contains("https://github.com/benmoose39"));

        let tail = out.split_once(BANNER).unwrap().1;
        assert_eq!(
            tail,
            "\n\n#EXTINF:-1 group-title=\"News\" tvg-logo=\"https://logo.example/e.png\" tvg-id=\"euronews.pt\", Euronews PT\nhttps://cdn.example/live.m3u8\n\n# broken line\n"
        );
    }
}
