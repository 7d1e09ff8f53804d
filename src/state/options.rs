/// Application options
///
/// This struct stores every user-tunable setting.
/// It is serialized to JSON and stored in the single-row `Options` table,
/// next to the index tables, so the database file carries its own settings.
use std::path::PathBuf;

use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};

use crate::scan::ExclusionSet;

/// Rows per page when the caller does not say otherwise
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Edge length of generated thumbnails, in pixels (square)
pub const DEFAULT_THUMBNAIL_SIZE: u32 = 256;

/// All persisted settings
///
/// Missing fields fall back to their defaults when loading, so options
/// written by an older build keep loading.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Options {
    /// Location of the SQLite index
    pub database_path: PathBuf,

    /// Directory substrings discovery skips (hidden directories are always skipped)
    pub excluded_dirs: ExclusionSet,

    /// Offset from UTC used for the date-bucket tag, in whole hours
    pub utc_offset_hours: i32,

    /// Newest files first when paging
    pub sort_desc: bool,

    /// Tag color picker works in RGB instead of HSV
    pub use_rgb: bool,

    /// Rows per page for infinite scroll
    pub page_size: u32,

    /// Thumbnail edge length in pixels
    pub thumbnail_size: u32,

    /// Maximum thumbnails kept in memory
    pub thumbnail_cache_capacity: usize,

    /// EXIF fields shown next to a selected image
    pub exif_fields: Vec<String>,

    /// Set until the options have been saved once
    pub first_boot: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            excluded_dirs: ExclusionSet::new(),
            utc_offset_hours: 0,
            sort_desc: true,
            use_rgb: false,
            page_size: DEFAULT_PAGE_SIZE,
            thumbnail_size: DEFAULT_THUMBNAIL_SIZE,
            thumbnail_cache_capacity: 512,
            exif_fields: vec!["DateTime".to_string()],
            first_boot: true,
        }
    }
}

impl Options {
    /// Convert to JSON string for database storage
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse from JSON string (from database)
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// UTC offset as a chrono zone, clamped to the valid ±23h range
    pub fn utc_offset(&self) -> FixedOffset {
        let hours = self.utc_offset_hours.clamp(-23, 23);
        FixedOffset::east_opt(hours * 3600).unwrap_or_else(|| Utc.fix())
    }
}

/// Database path in the user's data directory, named after the platform:
/// - Linux: ~/.local/share/tag-vault/linux.db
/// - macOS: ~/Library/Application Support/tag-vault/macos.db
/// - Windows: %APPDATA%\tag-vault\windows.db
pub fn default_database_path() -> PathBuf {
    let mut path = dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."));

    path.push("tag-vault");
    path.push(format!("{}.db", std::env::consts::OS));
    path
}
