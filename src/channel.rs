/// Lines starting with this marker are ignored entirely
pub const SKIP_MARKER: &str = "~~";

/// Channel metadata parsed from a `name | group | logo | id` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEntry {
    pub name: String,
    pub group: String,
    pub logo_url: String,
    pub external_id: String,
}

/// A single classified line of the channel info file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputLine {
    /// Blank or `~~` line, produces no output
    Skip,
    Channel(ChannelEntry),
    /// Metadata line that did not split into enough fields, kept verbatim
    Comment(String),
    /// Source page to resolve into a stream link
    Url(String),
}

impl InputLine {
    /// Classifies a raw input line. Never fails; malformed metadata degrades to
    /// [`InputLine::Comment`].
    #[must_use]
    pub fn classify(raw: &str) -> Self {
        let line = raw.trim();
        if line.is_empty() || line.starts_with(SKIP_MARKER) {
            return Self::Skip;
        }

        if is_http_url(line) {
            return Self::Url(line.to_string());
        }

        let parts = line.split('|').map(str::trim).collect::<Vec<&str>>();
        match parts.as_slice() {
            [name, group, logo_url, external_id, ..] => Self::Channel(ChannelEntry {
                name: (*name).to_string(),
                group: (*group).to_string(),
                logo_url: (*logo_url).to_string(),
                external_id: (*external_id).to_string(),
            }),
            _ => Self::Comment(line.to_string()),
        }
    }
}

fn is_http_url(line: &str) -> bool {
    ["http://", "https://"].iter().any(|scheme| {
        line.get(..scheme.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
    })
}
