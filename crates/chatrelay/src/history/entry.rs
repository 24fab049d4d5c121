//! A single history message and its persisted line form.
//!
//! Line grammar: `[<datetime>] <<nickname>> <content>`. Content never spans
//! lines; embedded newlines are collapsed to spaces when written.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};

/// Timestamp format written to log files.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Additional format accepted when replaying older logs.
const LEGACY_TIMESTAMP_FORMAT: &str = "%m/%d/%Y %I:%M:%S %p";

const IMAGE_EXTENSIONS: [&str; 5] = [".png", ".jpg", ".jpeg", ".gif", ".webp"];

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Local>,
    pub sender: String,
    pub content: String,
    /// Whether the line addressed the bot. Not persisted.
    pub highlighted: bool,
    /// Image URLs found in `content`.
    pub image_urls: Vec<String>,
}

impl HistoryEntry {
    /// Create an entry stamped with the current local time.
    pub fn new(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self::at(Local::now(), sender, content)
    }

    /// Create an entry with an explicit timestamp.
    pub fn at(
        timestamp: DateTime<Local>,
        sender: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let content = content.into();
        let image_urls = extract_image_urls(&content);
        Self {
            timestamp,
            sender: sender.into(),
            content,
            highlighted: false,
            image_urls,
        }
    }

    pub fn with_highlight(mut self, highlighted: bool) -> Self {
        self.highlighted = highlighted;
        self
    }

    /// Replace the content, refreshing the extracted image URLs.
    pub fn set_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
        self.image_urls = extract_image_urls(&self.content);
    }

    /// Render the persisted form of this entry.
    pub fn to_line(&self) -> String {
        format!(
            "[{}] <{}> {}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.sender,
            collapse_newlines(&self.content)
        )
    }

    /// Parse a persisted line. Returns `None` for anything that does not
    /// match the grammar.
    pub fn parse_line(line: &str) -> Option<Self> {
        let rest = line.trim_end_matches(['\r', '\n']).strip_prefix('[')?;
        let (stamp, rest) = rest.split_once("] <")?;
        let (sender, content) = rest.split_once('>')?;
        if sender.is_empty() || sender.contains(char::is_whitespace) {
            return None;
        }
        let content = content.strip_prefix(' ').unwrap_or(content);
        let timestamp = parse_timestamp(stamp)?;
        Some(Self::at(timestamp, sender, content))
    }
}

fn parse_timestamp(stamp: &str) -> Option<DateTime<Local>> {
    let naive = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(stamp, LEGACY_TIMESTAMP_FORMAT))
        .ok()?;
    Local.from_local_datetime(&naive).earliest()
}

fn collapse_newlines(content: &str) -> String {
    content.replace("\r\n", " ").replace(['\n', '\r'], " ")
}

/// Find `http(s)` URLs pointing at images. Query strings and fragments are
/// ignored for the extension check but kept in the returned URL.
pub fn extract_image_urls(content: &str) -> Vec<String> {
    content
        .split_whitespace()
        .map(|word| word.trim_matches(|c: char| "<>()[]\"',".contains(c)))
        .filter(|word| word.starts_with("http://") || word.starts_with("https://"))
        .filter(|word| {
            let path = word.split(['?', '#']).next().unwrap_or(word).to_lowercase();
            IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
        })
        .map(str::to_string)
        .collect()
}
