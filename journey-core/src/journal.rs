//! Append-only journal of the simulated conversation.
//!
//! Every entry is persisted as part of a single pretty-printed JSON array.
//! The file is rewritten in full after each append, via a temporary file and
//! a rename, so the last good snapshot survives an interrupted write.

use crate::generator::{FAILURE_PREFIX, PLACEHOLDER_PREFIX};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Header line of the rendered prompt context.
pub const CONTEXT_HEADER: &str = "--- Conversation History ---";

/// Errors that reject an append.
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("Decision references unknown entry: {0}")]
    UnknownReference(EntryId),

    #[error("Entry at {at} is earlier than the last entry at {last}")]
    OutOfOrder {
        at: DateTime<Utc>,
        last: DateTime<Utc>,
    },
}

/// Errors from reading or writing the journal file.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Identifier of a journal entry: `<author slug>_<6 hex chars>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(String);

impl EntryId {
    /// Generate a fresh id for an entry written by `author`.
    pub fn generate(author: &str) -> Self {
        let slug: String = author
            .chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(char::to_lowercase)
            .collect();
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("{slug}_{}", &suffix[..6]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntryId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Kind-specific payload of an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EntryBody {
    /// Generated (or placeholder/error) message text.
    Message { content: String },

    /// A protocol or plan change justified by earlier entries.
    Decision {
        title: String,
        details: String,
        #[serde(rename = "referencedMessageIds")]
        referenced_message_ids: Vec<EntryId>,
    },
}

impl EntryBody {
    /// The `type` tag written to disk.
    pub fn kind(&self) -> &'static str {
        match self {
            EntryBody::Message { .. } => "message",
            EntryBody::Decision { .. } => "decision",
        }
    }
}

/// One immutable record in the journal.
///
/// On disk each entry is a flat object whose keys come in a fixed order:
/// `id, type, timestamp, author, authorRole`, then the kind-specific fields.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JournalEntry {
    pub id: EntryId,

    pub timestamp: DateTime<Utc>,

    pub author: String,

    #[serde(rename = "authorRole")]
    pub author_role: String,

    #[serde(flatten)]
    pub body: EntryBody,
}

impl Serialize for JournalEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let fields = match &self.body {
            EntryBody::Message { .. } => 6,
            EntryBody::Decision { .. } => 8,
        };
        let mut map = serializer.serialize_map(Some(fields))?;
        map.serialize_entry("id", &self.id)?;
        map.serialize_entry("type", self.body.kind())?;
        map.serialize_entry("timestamp", &self.timestamp)?;
        map.serialize_entry("author", &self.author)?;
        map.serialize_entry("authorRole", &self.author_role)?;
        match &self.body {
            EntryBody::Message { content } => {
                map.serialize_entry("content", content)?;
            }
            EntryBody::Decision {
                title,
                details,
                referenced_message_ids,
            } => {
                map.serialize_entry("title", title)?;
                map.serialize_entry("details", details)?;
                map.serialize_entry("referencedMessageIds", referenced_message_ids)?;
            }
        }
        map.end()
    }
}

impl JournalEntry {
    /// Build a message entry.
    pub fn message(
        author: impl Into<String>,
        author_role: impl Into<String>,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let author = author.into();
        Self {
            id: EntryId::generate(&author),
            body: EntryBody::Message {
                content: content.into(),
            },
            timestamp,
            author,
            author_role: author_role.into(),
        }
    }

    /// Build a decision entry.
    pub fn decision(
        author: impl Into<String>,
        author_role: impl Into<String>,
        title: impl Into<String>,
        details: impl Into<String>,
        referenced_message_ids: Vec<EntryId>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let author = author.into();
        Self {
            id: EntryId::generate(&author),
            body: EntryBody::Decision {
                title: title.into(),
                details: details.into(),
                referenced_message_ids,
            },
            timestamp,
            author,
            author_role: author_role.into(),
        }
    }

    pub fn is_decision(&self) -> bool {
        matches!(self.body, EntryBody::Decision { .. })
    }

    /// Message content, or the title of a decision.
    pub fn headline(&self) -> &str {
        match &self.body {
            EntryBody::Message { content } => content,
            EntryBody::Decision { title, .. } => title,
        }
    }

    /// One line of prompt context: `[timestamp] author: headline`.
    pub fn render_line(&self) -> String {
        format!(
            "[{}] {}: {}",
            format_timestamp(&self.timestamp),
            self.author,
            self.headline()
        )
    }
}

/// Timestamps are rendered exactly as they are stored on disk.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Counts derived from the journal for end-of-run reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JournalSummary {
    pub messages: usize,
    pub decisions: usize,
    /// Messages whose generation exhausted its retries.
    pub failed_messages: usize,
    /// Messages produced without a backend.
    pub placeholder_messages: usize,
    /// Entry count per author.
    pub by_author: BTreeMap<String, usize>,
}

/// The ordered, append-only entry sequence and its backing file.
#[derive(Debug, Default)]
pub struct Journal {
    entries: Vec<JournalEntry>,
    path: Option<PathBuf>,
    consecutive_persist_failures: u32,
}

impl Journal {
    /// Create an empty journal persisted to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            entries: Vec::new(),
            path: Some(path.into()),
            consecutive_persist_failures: 0,
        }
    }

    /// Create an empty journal that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Read a persisted journal back. New appends go to the same file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).await?;
        let entries: Vec<JournalEntry> = serde_json::from_str(&content)?;

        Ok(Self {
            entries,
            path: Some(path.to_path_buf()),
            consecutive_persist_failures: 0,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&JournalEntry> {
        self.entries.last()
    }

    pub fn get(&self, id: &EntryId) -> Option<&JournalEntry> {
        self.entries.iter().find(|e| &e.id == id)
    }

    pub fn contains(&self, id: &EntryId) -> bool {
        self.get(id).is_some()
    }

    /// Number of persists that have failed since the last success.
    pub fn consecutive_persist_failures(&self) -> u32 {
        self.consecutive_persist_failures
    }

    /// Append a message and persist.
    pub async fn append_message(
        &mut self,
        author: &str,
        author_role: &str,
        content: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<&JournalEntry, JournalError> {
        self.append(JournalEntry::message(author, author_role, content, at))
            .await
    }

    /// Append a decision and persist.
    ///
    /// Every referenced id must already be in the journal.
    pub async fn append_decision(
        &mut self,
        author: &str,
        author_role: &str,
        title: impl Into<String>,
        details: impl Into<String>,
        referenced_message_ids: Vec<EntryId>,
        at: DateTime<Utc>,
    ) -> Result<&JournalEntry, JournalError> {
        self.append(JournalEntry::decision(
            author,
            author_role,
            title,
            details,
            referenced_message_ids,
            at,
        ))
        .await
    }

    /// Validate, append, then persist the whole journal.
    ///
    /// A failed persist is reported but does not undo the append.
    pub async fn append(&mut self, entry: JournalEntry) -> Result<&JournalEntry, JournalError> {
        if let Some(last) = self.entries.last() {
            if entry.timestamp < last.timestamp {
                return Err(JournalError::OutOfOrder {
                    at: entry.timestamp,
                    last: last.timestamp,
                });
            }
        }

        if let EntryBody::Decision {
            referenced_message_ids,
            ..
        } = &entry.body
        {
            if let Some(missing) = referenced_message_ids.iter().find(|id| !self.contains(id)) {
                return Err(JournalError::UnknownReference(missing.clone()));
            }
        }

        self.entries.push(entry);
        self.persist_or_report().await;

        let index = self.entries.len() - 1;
        Ok(&self.entries[index])
    }

    /// Conditioning context for the next generation call.
    ///
    /// Derived fresh on every call; identical journal state yields identical text.
    pub fn render_as_prompt_context(&self) -> String {
        let mut out = String::from(CONTEXT_HEADER);
        out.push('\n');
        for entry in &self.entries {
            out.push_str(&entry.render_line());
            out.push('\n');
        }
        out
    }

    /// Write the full entry sequence to disk.
    ///
    /// Writes `<file>.tmp` and renames it over the target. An in-memory
    /// journal has nothing to write.
    pub async fn persist(&self) -> Result<(), PersistError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await?;
            }
        }

        let content = serde_json::to_string_pretty(&self.entries)?;
        let tmp = temp_path(path);
        if let Err(e) = write_then_rename(&tmp, path, content.as_bytes()).await {
            // Best effort; the rename may already have consumed it.
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Persist, logging instead of propagating any failure.
    ///
    /// Returns whether the write succeeded.
    pub async fn persist_or_report(&mut self) -> bool {
        match self.persist().await {
            Ok(()) => {
                self.consecutive_persist_failures = 0;
                true
            }
            Err(e) => {
                self.consecutive_persist_failures += 1;
                tracing::error!(
                    error = %e,
                    entries = self.entries.len(),
                    consecutive_failures = self.consecutive_persist_failures,
                    "Failed to save journal"
                );
                false
            }
        }
    }

    /// Tally entries by kind and author.
    pub fn summary(&self) -> JournalSummary {
        let mut summary = JournalSummary::default();
        for entry in &self.entries {
            *summary.by_author.entry(entry.author.clone()).or_default() += 1;
            match &entry.body {
                EntryBody::Message { content } => {
                    summary.messages += 1;
                    if content.starts_with(FAILURE_PREFIX) {
                        summary.failed_messages += 1;
                    } else if content.starts_with(PLACEHOLDER_PREFIX) {
                        summary.placeholder_messages += 1;
                    }
                }
                EntryBody::Decision { .. } => summary.decisions += 1,
            }
        }
        summary
    }

    /// The entries a decision cites, in citation order.
    ///
    /// `None` if `id` is not a decision in this journal.
    pub fn evidence_for(&self, id: &EntryId) -> Option<Vec<&JournalEntry>> {
        match &self.get(id)?.body {
            EntryBody::Decision {
                referenced_message_ids,
                ..
            } => Some(
                referenced_message_ids
                    .iter()
                    .filter_map(|r| self.get(r))
                    .collect(),
            ),
            EntryBody::Message { .. } => None,
        }
    }
}

/// Flush the new snapshot to disk before it replaces the old one.
async fn write_then_rename(tmp: &Path, path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(tmp).await?;
    file.write_all(content).await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(tmp, path).await
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
