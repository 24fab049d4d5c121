//! Append-only conversation log backed by a plain-text file.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::{ConversationKey, HistoryEntry};
use crate::error::{RelayError, Result};

/// Ordered messages of one conversation session plus where they live on disk.
///
/// The persisted file is only ever appended to, except for rotation (which
/// keeps the newest lines and writes a backup) and explicit erase (which
/// moves the file to a backup). Edits and `erase_last` touch memory only.
#[derive(Debug)]
pub struct ConversationLog {
    key: ConversationKey,
    session: String,
    is_channel: bool,
    reply_to: String,
    root: PathBuf,
    path: PathBuf,
    entries: Vec<HistoryEntry>,
}

impl ConversationLog {
    /// Replay a session log from disk, or start empty when none exists.
    ///
    /// At most `max_lines` newest lines are kept in memory (`0` keeps
    /// everything). When the file holds more than twice that, it is backed up
    /// and rewritten with only the newest `max_lines` lines. Lines that do
    /// not parse are skipped with a warning.
    pub fn load(
        root: impl Into<PathBuf>,
        key: ConversationKey,
        session: impl Into<String>,
        max_lines: usize,
    ) -> Result<Self> {
        let root = root.into();
        let session = session.into();
        let path = log_path(&root, &key, &session);
        let mut log = Self {
            is_channel: key.is_channel(),
            reply_to: key.source.clone(),
            key,
            session,
            root,
            path,
            entries: Vec::new(),
        };

        // Raw bytes: one undecodable line must not make the whole log unreadable.
        let content = match fs::read(&log.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No history at {}, starting empty", log.path.display());
                return Ok(log);
            }
            Err(e) => return Err(RelayError::io(&log.path, e)),
        };

        let lines: Vec<&[u8]> = content
            .split(|&b| b == b'\n')
            .filter(|l| !l.trim_ascii().is_empty())
            .collect();
        let keep_from = if max_lines == 0 {
            0
        } else {
            lines.len().saturating_sub(max_lines)
        };

        if max_lines > 0 && lines.len() > max_lines * 2 {
            rotate(&log.path, &lines[keep_from..])?;
        }

        let mut skipped = 0usize;
        for raw in &lines[keep_from..] {
            match std::str::from_utf8(raw).ok().and_then(HistoryEntry::parse_line) {
                Some(entry) => log.entries.push(entry),
                None => {
                    skipped += 1;
                    warn!(
                        "Skipping malformed history line in {}: {:?}",
                        log.path.display(),
                        String::from_utf8_lossy(raw)
                    );
                }
            }
        }

        info!(
            "Loaded {} message(s) for {} [{}]{}",
            log.entries.len(),
            log.key,
            log.session,
            if skipped > 0 {
                format!(", {skipped} malformed line(s) skipped")
            } else {
                String::new()
            }
        );
        Ok(log)
    }

    pub fn key(&self) -> &ConversationKey {
        &self.key
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn is_channel(&self) -> bool {
        self.is_channel
    }

    /// Where replies for this conversation are sent.
    pub fn reply_to(&self) -> &str {
        &self.reply_to
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Persist the entry, then add it to memory. On a write failure memory is
    /// left unchanged.
    pub fn append(&mut self, entry: HistoryEntry) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| RelayError::io(parent, e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| RelayError::io(&self.path, e))?;
        writeln!(file, "{}", entry.to_line()).map_err(|e| RelayError::io(&self.path, e))?;

        self.entries.push(entry);
        Ok(())
    }

    /// Drop the newest `n` messages from memory. Returns how many were removed.
    pub fn erase_last(&mut self, n: usize) -> usize {
        let removed = n.min(self.entries.len());
        self.entries.truncate(self.entries.len() - removed);
        removed
    }

    /// Move the persisted file to a timestamped backup and clear memory.
    /// Returns the backup path, or `None` if nothing was persisted yet.
    pub fn erase_persisted(&mut self) -> Result<Option<PathBuf>> {
        self.entries.clear();
        if !self.path.exists() {
            return Ok(None);
        }
        let backup = backup_path(&self.path);
        fs::rename(&self.path, &backup).map_err(|e| RelayError::io(&self.path, e))?;
        info!("Erased history for {} [{}], backup at {}", self.key, self.session, backup.display());
        Ok(Some(backup))
    }

    /// Replace the content of the message `offset` positions from the end
    /// (1 is the newest).
    pub fn edit_at(&mut self, offset: usize, content: impl Into<String>) -> Result<()> {
        let len = self.entries.len();
        if offset == 0 || offset > len {
            return Err(RelayError::OffsetOutOfRange { offset, len });
        }
        self.entries[len - offset].set_content(content);
        Ok(())
    }

    /// Point this log at another session file. Memory is kept as is.
    pub fn rename(&mut self, session: impl Into<String>) {
        self.session = session.into();
        self.path = log_path(&self.root, &self.key, &self.session);
    }

    /// The newest `n` messages in chronological order (`0` means all).
    pub fn last_messages(&self, n: usize) -> &[HistoryEntry] {
        if n == 0 || n >= self.entries.len() {
            &self.entries
        } else {
            &self.entries[self.entries.len() - n..]
        }
    }
}

/// `{root}/{network}/{source}/{session}.log`, each component sanitized.
pub fn log_path(root: &Path, key: &ConversationKey, session: &str) -> PathBuf {
    root.join(sanitize_component(&key.network))
        .join(sanitize_component(&key.source))
        .join(format!("{}.log", sanitize_component(session)))
}

fn sanitize_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let base = format!("{file_name}.bk-{}", epoch_secs());
    let mut candidate = path.with_file_name(&base);
    let mut n = 1;
    while candidate.exists() {
        candidate = path.with_file_name(format!("{base}-{n}"));
        n += 1;
    }
    candidate
}

/// Back up the full file, then atomically replace it with `keep`. Kept lines
/// are written back byte for byte.
fn rotate(path: &Path, keep: &[&[u8]]) -> Result<()> {
    let backup = backup_path(path);
    fs::copy(path, &backup).map_err(|e| RelayError::io(&backup, e))?;

    let tmp = path.with_extension("log.tmp");
    let mut body = Vec::with_capacity(keep.iter().map(|l| l.len() + 1).sum());
    for line in keep {
        body.extend_from_slice(line);
        body.push(b'\n');
    }
    fs::write(&tmp, body).map_err(|e| RelayError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| RelayError::io(path, e))?;

    info!(
        "Rotated {} down to {} line(s), backup at {}",
        path.display(),
        keep.len(),
        backup.display()
    );
    Ok(())
}

/// Current unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
