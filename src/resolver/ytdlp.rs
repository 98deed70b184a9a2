use std::{
    ffi::OsStr,
    io::{ErrorKind, Write},
    path::PathBuf,
    process::Stdio,
    sync::LazyLock,
    time::Duration,
};

use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::Deserialize;
use tempfile::NamedTempFile;
use tracing::{debug, instrument};

use super::{FALLBACK_URL, LinkResolver};

/// Environment variable holding a Netscape cookie jar for authenticated extraction
pub const COOKIES_ENV: &str = "YOUTUBE_COOKIES";

static DIMENSIONS_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*[xX×]\s*(\d+)").unwrap());
static PROGRESSIVE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(\d{3,4})p").unwrap());

/// The subset of `yt-dlp --dump-single-json` output needed to pick a stream
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractedInfo {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub formats: Vec<FormatDescriptor>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FormatDescriptor {
    #[serde(default)]
    pub height: Option<f64>,
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default)]
    pub format_note: Option<String>,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub ext: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl FormatDescriptor {
    /// Vertical resolution from the `height` field, a `WIDTHxHEIGHT`
    /// resolution or a `720p` style note
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn vertical_resolution(&self) -> Option<u32> {
        if let Some(height) = self.height.filter(|h| h.is_finite() && *h > 0.0) {
            return Some(height as u32);
        }

        let notes = [self.resolution.as_deref(), self.format_note.as_deref()];
        notes
            .iter()
            .flatten()
            .find_map(|note| {
                DIMENSIONS_REGEX
                    .captures(note)
                    .and_then(|c| c[2].parse().ok())
            })
            .or_else(|| {
                notes.iter().flatten().find_map(|note| {
                    PROGRESSIVE_REGEX
                        .captures(note)
                        .and_then(|c| c[1].parse().ok())
                })
            })
    }

    #[must_use]
    pub fn is_hls(&self) -> bool {
        [&self.protocol, &self.ext, &self.url]
            .into_iter()
            .flatten()
            .any(|s| s.to_ascii_lowercase().contains("m3u8"))
    }

    fn playable_url(&self) -> Option<&str> {
        self.url.as_deref().filter(|u| !u.is_empty())
    }
}

/// Picks the stream URL out of an extraction result.
///
/// HLS wins over resolution: the highest HLS format is preferred, then the
/// highest format with any URL. Formats without a known resolution are only
/// considered when none has one. Returns `None` when nothing is usable.
#[must_use]
pub fn select_stream(info: &ExtractedInfo) -> Option<String> {
    let mut ranked = info
        .formats
        .iter()
        .filter_map(|f| f.vertical_resolution().map(|h| (h, f)))
        .collect::<Vec<(u32, &FormatDescriptor)>>();
    ranked.sort_by(|(a, _), (b, _)| b.cmp(a));

    let best = if ranked.is_empty() {
        // yt-dlp lists formats from worst to best
        let unranked = info.formats.iter().rev().collect::<Vec<&FormatDescriptor>>();
        pick(&unranked)
    } else {
        pick(&ranked.into_iter().map(|(_, f)| f).collect::<Vec<&FormatDescriptor>>())
    };

    best.or_else(|| info.url.clone().filter(|u| !u.is_empty()))
}

fn pick(formats: &[&FormatDescriptor]) -> Option<String> {
    formats
        .iter()
        .find(|f| f.is_hls() && f.playable_url().is_some())
        .or_else(|| formats.iter().find(|f| f.playable_url().is_some()))
        .and_then(|f| f.playable_url())
        .map(ToString::to_string)
}

/// Checks if `yt-dlp` is installed / available at the given path
///
/// A binary that does not answer `--version` within `timeout` is killed and
/// counts as unavailable.
pub async fn is_installed(program: impl AsRef<OsStr>, timeout: Duration) -> bool {
    debug!("Checking for yt-dlp installation");
    let mut command = tokio::process::Command::new(program);
    command
        .arg("--version")
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .stdout(Stdio::null())
        .kill_on_drop(true);

    match tokio::time::timeout(timeout, command.status()).await {
        Ok(status) => status.is_ok_and(|s| s.success()),
        Err(_) => {
            debug!("yt-dlp did not answer --version within {timeout:?}");
            false
        }
    }
}

/// Resolves links by delegating format discovery to `yt-dlp`
pub struct YtDlpResolver {
    program: PathBuf,
    timeout: Duration,
    cookies: Option<NamedTempFile>,
}

impl YtDlpResolver {
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
            cookies: None,
        }
    }

    /// Stores the cookie jar in a private temporary file which lives as long as
    /// the resolver
    ///
    /// # Errors
    /// Errors when the temporary file cannot be written
    pub fn with_cookies(mut self, cookies: &str) -> Result<Self> {
        // Created with 0600 permissions, removed on drop
        let mut file = tempfile::Builder::new()
            .prefix("m3u-grabber-cookies-")
            .suffix(".txt")
            .tempfile()
            .context("Creating cookie file")?;
        file.write_all(cookies.as_bytes())
            .and_then(|()| file.flush())
            .context("Writing cookie file")?;

        self.cookies = Some(file);
        Ok(self)
    }

    #[must_use]
    pub const fn has_cookies(&self) -> bool {
        self.cookies.is_some()
    }

    fn args(&self, url: &str) -> Vec<String> {
        let mut args = vec![
            "--dump-single-json".to_string(),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--socket-timeout".to_string(),
            self.timeout.as_secs().max(1).to_string(),
        ];

        if let Some(cookies) = &self.cookies {
            args.push("--cookies".to_string());
            args.push(cookies.path().to_string_lossy().into_owned());
        }

        args.push(url.to_string());
        args
    }

    /// Runs the extractor and decodes its JSON dump
    ///
    /// # Errors
    /// Errors when `yt-dlp` is missing, times out, exits unsuccessfully or
    /// prints something that is not JSON
    #[instrument(skip(self))]
    pub async fn extract(&self, url: &str) -> Result<ExtractedInfo> {
        let child = match tokio::process::Command::new(&self.program)
            .args(self.args(url))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                bail!("`{}` is not installed or available in PATH!", self.program.display())
            }
            Err(e) => bail!("Unable to spawn yt-dlp: {e}"),
        };

        // Extraction may take several requests, give it a few socket timeouts
        let out = tokio::time::timeout(self.timeout * 5, child.wait_with_output())
            .await
            .context("yt-dlp timed out")?
            .context("Waiting for yt-dlp")?;

        if !out.status.success() {
            debug!("yt-dlp stderr: {}", String::from_utf8_lossy(&out.stderr).trim());
            bail!("yt-dlp exited with {}", out.status);
        }

        serde_json::from_slice(&out.stdout).context("Parsing yt-dlp output")
    }
}

impl LinkResolver for YtDlpResolver {
    async fn resolve(&self, url: &str) -> String {
        let url = url.trim();
        match self.extract(url).await {
            Ok(info) => select_stream(&info).unwrap_or_else(|| {
                debug!("yt-dlp returned no usable format for {url}");
                FALLBACK_URL.to_string()
            }),
            Err(e) => {
                debug!("Extraction failed for {url}: {e:#}");
                FALLBACK_URL.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(height: Option<f64>, protocol: &str, url: &str) -> FormatDescriptor {
        FormatDescriptor {
            height,
            protocol: Some(protocol.to_string()),
            url: Some(url.to_string()),
            ..FormatDescriptor::default()
        }
    }

    fn info(formats: Vec<FormatDescriptor>) -> ExtractedInfo {
        ExtractedInfo { url: None, formats }
    }

    #[test]
    fn hls_beats_higher_resolution() {
        let info = info(vec![
            format(Some(1080.0), "https", "https://cdn.example/1080.mp4"),
            format(Some(480.0), "m3u8_native", "https://cdn.example/480/index.m3u8"),
        ]);
        assert_eq!(
            select_stream(&info).as_deref(),
            Some("https://cdn.example/480/index.m3u8")
        );
    }

    #[test]
    fn highest_resolution_without_hls() {
        let info = info(vec![
            format(Some(360.0), "https", "https://cdn.example/360.mp4"),
            format(Some(720.0), "https", "https://cdn.example/720.mp4"),
        ]);
        assert_eq!(
            select_stream(&info).as_deref(),
            Some("https://cdn.example/720.mp4")
        );
    }

    #[test]
    fn highest_hls_among_several() {
        let info = info(vec![
            format(Some(720.0), "m3u8", "https://cdn.example/720.m3u8"),
            format(Some(1080.0), "m3u8", "https://cdn.example/1080.m3u8"),
            format(Some(240.0), "m3u8", "https://cdn.example/240.m3u8"),
        ]);
        assert_eq!(
            select_stream(&info).as_deref(),
            Some("https://cdn.example/1080.m3u8")
        );
    }

    #[test]
    fn hls_detected_from_extension_or_url() {
        let by_ext = FormatDescriptor {
            ext: Some("m3u8".to_string()),
            ..FormatDescriptor::default()
        };
        assert!(by_ext.is_hls());
        assert!(format(None, "https", "https://cdn.example/a.m3u8?x=1").is_hls());
        assert!(!format(None, "https", "https://cdn.example/a.mp4").is_hls());
    }

    #[test]
    fn resolution_from_notes() {
        let dims = FormatDescriptor {
            resolution: Some("1280x720".to_string()),
            ..FormatDescriptor::default()
        };
        assert_eq!(dims.vertical_resolution(), Some(720));

        let note = FormatDescriptor {
            format_note: Some("HD 1080p60".to_string()),
            ..FormatDescriptor::default()
        };
        assert_eq!(note.vertical_resolution(), Some(1080));

        let audio = FormatDescriptor {
            resolution: Some("audio only".to_string()),
            ..FormatDescriptor::default()
        };
        assert_eq!(audio.vertical_resolution(), None);
    }

    #[test]
    fn formats_without_url_are_skipped() {
        let mut no_url = format(Some(1080.0), "m3u8", "");
        no_url.url = None;
        let info = info(vec![no_url, format(Some(360.0), "https", "https://cdn.example/360.mp4")]);
        assert_eq!(
            select_stream(&info).as_deref(),
            Some("https://cdn.example/360.mp4")
        );
    }

    #[test]
    fn unranked_formats_prefer_last_hls() {
        let info = info(vec![
            format(None, "m3u8", "https://cdn.example/low.m3u8"),
            format(None, "m3u8", "https://cdn.example/high.m3u8"),
            format(None, "https", "https://cdn.example/other.mp4"),
        ]);
        assert_eq!(
            select_stream(&info).as_deref(),
            Some("https://cdn.example/high.m3u8")
        );
    }

    #[test]
    fn top_level_url_when_no_formats() {
        let info = ExtractedInfo {
            url: Some("https://cdn.example/direct.m3u8".to_string()),
            formats: Vec::new(),
        };
        assert_eq!(
            select_stream(&info).as_deref(),
            Some("https://cdn.example/direct.m3u8")
        );
        assert_eq!(select_stream(&ExtractedInfo::default()), None);
    }

    #[test]
    fn parses_yt_dlp_json() {
        let json = r#"{
            "id": "abc",
            "title": "Live",
            "formats": [
                {"format_id": "91", "height": 144, "protocol": "m3u8_native", "ext": "mp4", "url": "https://manifest.example/91.m3u8"},
                {"format_id": "sb0", "height": null, "resolution": "audio only", "url": "https://i.example/sb"}
            ]
        }"#;
        let info: ExtractedInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.formats.len(), 2);
        assert_eq!(info.formats[0].vertical_resolution(), Some(144));
        assert_eq!(
            select_stream(&info).as_deref(),
            Some("https://manifest.example/91.m3u8")
        );
    }

    #[test]
    fn cookie_file_is_removed_on_drop() {
        let resolver = YtDlpResolver::new("yt-dlp", Duration::from_secs(5))
            .with_cookies("# Netscape HTTP Cookie File\n")
            .unwrap();
        assert!(resolver.has_cookies());

        let path = resolver.cookies.as_ref().unwrap().path().to_path_buf();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "# Netscape HTTP Cookie File\n"
        );
        assert!(resolver.args("https://x.example").contains(&path.to_string_lossy().into_owned()));

        drop(resolver);
        assert!(!path.exists());
    }
}
