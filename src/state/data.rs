/// Shared data structures for the index
///
/// These structs represent the rows that flow between
/// the database layer and its callers (discovery, queries, presentation).
use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::color::TagColor;

/// Primary key of a `File` row
pub type FileId = i64;

/// Primary key of a `Tag` row
pub type TagId = i64;

/// One on-disk image in the index
#[derive(Debug, Clone, PartialEq)]
pub struct File {
    /// Unique database ID
    pub id: FileId,
    /// Absolute path, unique across the index
    pub path: PathBuf,
    /// Hex content digest, the dedup key
    pub content_hash: String,
    /// When discovery first indexed the file
    pub date_added: DateTime<Utc>,
}

/// A user-visible label
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub id: TagId,
    /// Unique name (e.g. "PNG", "2024-05-01", "Holidays")
    pub name: String,
    pub color: TagColor,
}

/// Association between a file and a tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileTag {
    pub id: i64,
    pub file_id: FileId,
    pub tag_id: TagId,
}

/// What `Library::upsert_file` did with a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertStatus {
    /// A new File row was inserted
    Created,
    /// The path was already indexed
    KnownPath,
    /// The path is new but its content is already indexed under another path;
    /// the path was recorded as a duplicate of that file
    DuplicateContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// The File row the path now resolves to
    pub file_id: FileId,
    pub status: UpsertStatus,
    /// When that File row was first indexed
    pub date_added: DateTime<Utc>,
}

impl UpsertOutcome {
    pub fn created(&self) -> bool {
        self.status == UpsertStatus::Created
    }
}

/// Column order of a File row query
pub(crate) const FILE_COLUMNS: &str = "id, path, hash, dateAdded";

pub(crate) fn file_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<File> {
    let path: String = row.get(1)?;
    let millis: i64 = row.get(3)?;
    Ok(File {
        id: row.get(0)?,
        path: PathBuf::from(path),
        content_hash: row.get(2)?,
        date_added: DateTime::from_timestamp_millis(millis).unwrap_or_default(),
    })
}

pub(crate) fn tag_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Tag> {
    let color: String = row.get(2)?;
    Ok(Tag {
        id: row.get(0)?,
        name: row.get(1)?,
        // Colors are validated on the way in; fall back rather than fail a listing
        color: color.parse().unwrap_or_default(),
    })
}
