use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use super::data::{
    file_from_row, tag_from_row, File, FileId, Tag, TagId, UpsertOutcome, UpsertStatus,
    FILE_COLUMNS,
};
use super::options::{self, Options, DEFAULT_PAGE_SIZE};
use crate::color::{TagColor, DEFAULT_TAG_COLOR};
use crate::error::{Error, Result};

/// Image types that get a tag up front, before any file of that type is seen
pub const FORMAT_TAGS: &[&str] = &[
    "PNG", "JPG", "WEBP", "GIF", "BMP", "TIFF", "AVIF", "HEIC", "QOI",
];

const SELECT_FILE_BY_PATH: &str = "SELECT id, dateAdded FROM File WHERE path = ?1";
const SELECT_FILE_BY_HASH: &str = "SELECT id, dateAdded FROM File WHERE hash = ?1";
const INSERT_FILE: &str = "INSERT INTO File (path, hash, dateAdded) VALUES (?1, ?2, ?3)";
const INSERT_DUPLICATE: &str = "INSERT OR IGNORE INTO Duplicate (path, fileId) VALUES (?1, ?2)";

/// The Library manages the SQLite index database.
/// It stores files, tags and their associations, plus the options row.
///
/// A single connection behind a mutex serializes every statement, which makes
/// the Library safe to share across threads (`Arc<Library>`); the discovery
/// writer and thumbnail readers take turns on it.
pub struct Library {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl Library {
    /// Open (or create) the index at `db_path` and initialize the schema.
    ///
    /// Failures here are setup failures: nothing can run without the index.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();

        // Ensure the parent directory exists
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }

        let conn = Connection::open(&db_path).map_err(Error::StoreSetup)?;
        let library = Self::with_connection(conn, db_path)?;
        info!("Index opened at {}", library.db_path.display());
        Ok(library)
    }

    /// Open the index at the platform default location
    pub fn open_default() -> Result<Self> {
        Self::open(options::default_database_path())
    }

    /// Private, throwaway index (tests, previews)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(Error::StoreSetup)?;
        Self::with_connection(conn, PathBuf::from(":memory:"))
    }

    fn with_connection(conn: Connection, db_path: PathBuf) -> Result<Self> {
        configure_pragmas(&conn).map_err(Error::StoreSetup)?;
        init_schema(&conn).map_err(Error::StoreSetup)?;
        Ok(Library {
            conn: Mutex::new(conn),
            db_path,
        })
    }

    /// Get the path to the database file
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| Error::Poisoned)
    }

    /// Compile the discovery statements ahead of a walk so a broken store
    /// fails the walk up front instead of once per file.
    pub fn prepare_discovery(&self) -> Result<()> {
        let conn = self.conn()?;
        for sql in [SELECT_FILE_BY_PATH, SELECT_FILE_BY_HASH, INSERT_FILE, INSERT_DUPLICATE] {
            conn.prepare_cached(sql).map_err(Error::StoreSetup)?;
        }
        Ok(())
    }

    // ── Files ────────────────────────────────────────────────────

    /// Record `path` with content digest `hash`.
    ///
    /// The content hash is the dedup key: a path already in the index resolves
    /// to its row, a new path whose content is already indexed is recorded as a
    /// duplicate of that row, and only genuinely new content inserts a File.
    pub fn upsert_file(&self, path: &Path, hash: &str, now: DateTime<Utc>) -> Result<UpsertOutcome> {
        let path = path_key(path);
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let by_path: Option<(FileId, i64)> = tx
            .prepare_cached(SELECT_FILE_BY_PATH)?
            .query_row(params![path], |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()?;

        let outcome = if let Some((file_id, millis)) = by_path {
            UpsertOutcome {
                file_id,
                status: UpsertStatus::KnownPath,
                date_added: DateTime::from_timestamp_millis(millis).unwrap_or_default(),
            }
        } else {
            let by_hash: Option<(FileId, i64)> = tx
                .prepare_cached(SELECT_FILE_BY_HASH)?
                .query_row(params![hash], |row| Ok((row.get(0)?, row.get(1)?)))
                .optional()?;

            match by_hash {
                Some((file_id, millis)) => {
                    tx.prepare_cached(INSERT_DUPLICATE)?
                        .execute(params![path, file_id])?;
                    UpsertOutcome {
                        file_id,
                        status: UpsertStatus::DuplicateContent,
                        date_added: DateTime::from_timestamp_millis(millis).unwrap_or_default(),
                    }
                }
                None => {
                    tx.prepare_cached(INSERT_FILE)?
                        .execute(params![path, hash, now.timestamp_millis()])?;
                    UpsertOutcome {
                        file_id: tx.last_insert_rowid(),
                        status: UpsertStatus::Created,
                        date_added: now,
                    }
                }
            }
        };

        tx.commit()?;
        Ok(outcome)
    }

    /// Page through files ordered by insertion recency.
    ///
    /// Ties on the timestamp are broken by row id, so consecutive pages never
    /// overlap or skip rows.
    pub fn query_page(&self, offset: u64, limit: u32, newest_first: bool) -> Result<Vec<PathBuf>> {
        let sql = if newest_first {
            "SELECT path FROM File ORDER BY dateAdded DESC, id DESC LIMIT ?1 OFFSET ?2"
        } else {
            "SELECT path FROM File ORDER BY dateAdded ASC, id ASC LIMIT ?1 OFFSET ?2"
        };

        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(sql)?;
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);
        let paths = stmt
            .query_map(params![limit, offset], |row| row.get::<_, String>(0))?
            .map(|path| path.map(PathBuf::from))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(paths)
    }

    /// Distinct paths of files carrying a tag whose name matches the SQL LIKE
    /// `pattern` (case-insensitive for ASCII). An empty or all-wildcard
    /// pattern returns the first page instead.
    pub fn query_by_tag_substring(&self, pattern: &str) -> Result<Vec<PathBuf>> {
        if pattern.trim().chars().all(|c| c == '%') {
            return self.query_page(0, DEFAULT_PAGE_SIZE, true);
        }

        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT f.path FROM File f
             WHERE EXISTS (
                 SELECT 1 FROM FileTag ft
                 JOIN Tag t ON t.id = ft.tagId
                 WHERE ft.fileId = f.id AND t.name LIKE ?1
             )
             ORDER BY f.dateAdded DESC, f.id DESC",
        )?;
        let paths = stmt
            .query_map(params![pattern], |row| row.get::<_, String>(0))?
            .map(|path| path.map(PathBuf::from))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(paths)
    }

    /// Drop every indexed path at or below `prefix`.
    ///
    /// A File whose content also sits at a recorded duplicate outside the
    /// prefix is kept: that duplicate becomes the File's path and the row keeps
    /// its id and tags. Other Files are deleted along with their tag links.
    /// Returns the number of File rows deleted.
    pub fn remove_by_path_prefix(&self, prefix: &Path) -> Result<usize> {
        let exact = path_key(prefix);
        let below = format!(
            "{}{}%",
            escape_like(exact.trim_end_matches(MAIN_SEPARATOR)),
            escape_like(&MAIN_SEPARATOR.to_string())
        );

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM Duplicate WHERE path = ?1 OR path LIKE ?2 ESCAPE '\\'",
            params![exact, below],
        )?;

        let doomed: Vec<FileId> = tx
            .prepare("SELECT id FROM File WHERE path = ?1 OR path LIKE ?2 ESCAPE '\\'")?
            .query_map(params![exact, below], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;

        let mut removed = 0;
        let mut promoted = 0;
        for file_id in doomed {
            // Duplicates under the prefix are already gone, so any left survive
            let survivor: Option<(i64, String)> = tx
                .query_row(
                    "SELECT id, path FROM Duplicate WHERE fileId = ?1 ORDER BY path LIMIT 1",
                    params![file_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            match survivor {
                Some((duplicate_id, path)) => {
                    tx.execute("DELETE FROM Duplicate WHERE id = ?1", params![duplicate_id])?;
                    tx.execute("UPDATE File SET path = ?1 WHERE id = ?2", params![path, file_id])?;
                    debug!("File #{} now indexed at {}", file_id, path);
                    promoted += 1;
                }
                None => {
                    removed += tx.execute("DELETE FROM File WHERE id = ?1", params![file_id])?;
                }
            }
        }
        tx.commit()?;

        if removed + promoted > 0 {
            info!(
                "Removed {} indexed files under {} ({} kept through a copy elsewhere)",
                removed,
                prefix.display(),
                promoted
            );
        }
        Ok(removed)
    }

    pub fn file_by_path(&self, path: &Path) -> Result<Option<File>> {
        let conn = self.conn()?;
        let file = conn
            .query_row(
                &format!("SELECT {FILE_COLUMNS} FROM File WHERE path = ?1"),
                params![path_key(path)],
                file_from_row,
            )
            .optional()?;
        Ok(file)
    }

    pub fn file_id_by_path(&self, path: &Path) -> Result<Option<FileId>> {
        Ok(self.file_by_path(path)?.map(|file| file.id))
    }

    /// When the file at `path` entered the index
    pub fn date_added(&self, path: &Path) -> Result<Option<DateTime<Utc>>> {
        Ok(self.file_by_path(path)?.map(|file| file.date_added))
    }

    /// Other locations holding the same content as `file_id`
    pub fn duplicates_of(&self, file_id: FileId) -> Result<Vec<PathBuf>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare_cached("SELECT path FROM Duplicate WHERE fileId = ?1 ORDER BY path")?;
        let paths = stmt
            .query_map(params![file_id], |row| row.get::<_, String>(0))?
            .map(|path| path.map(PathBuf::from))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(paths)
    }

    /// Get a count of files in the index
    pub fn file_count(&self) -> Result<i64> {
        self.count("SELECT COUNT(*) FROM File")
    }

    pub fn duplicate_count(&self) -> Result<i64> {
        self.count("SELECT COUNT(*) FROM Duplicate")
    }

    // ── Tags ─────────────────────────────────────────────────────

    /// Insert the tag if no tag has this name yet; return its id either way.
    /// An existing tag keeps its color.
    pub fn ensure_tag(&self, name: &str, color: TagColor) -> Result<TagId> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidArgument("tag name cannot be empty".to_string()));
        }

        let conn = self.conn()?;
        conn.prepare_cached("INSERT OR IGNORE INTO Tag (name, color) VALUES (?1, ?2)")?
            .execute(params![name, color.to_hex()])?;
        let id = conn
            .prepare_cached("SELECT id FROM Tag WHERE name = ?1")?
            .query_row(params![name], |row| row.get(0))?;
        Ok(id)
    }

    /// Like `ensure_tag`, with the color given as `#RRGGBB` text
    pub fn ensure_tag_hex(&self, name: &str, color_hex: &str) -> Result<TagId> {
        self.ensure_tag(name, color_hex.parse()?)
    }

    /// Link a file and a tag. Returns false if they were already linked.
    pub fn attach_tag(&self, file_id: FileId, tag_id: TagId) -> Result<bool> {
        let conn = self.conn()?;
        let inserted = conn
            .prepare_cached("INSERT OR IGNORE INTO FileTag (fileId, tagId) VALUES (?1, ?2)")?
            .execute(params![file_id, tag_id])?;
        Ok(inserted == 1)
    }

    /// Unlink a file and a tag. Returns false if they were not linked.
    pub fn detach_tag(&self, file_id: FileId, tag_id: TagId) -> Result<bool> {
        let conn = self.conn()?;
        let removed = conn
            .prepare_cached("DELETE FROM FileTag WHERE fileId = ?1 AND tagId = ?2")?
            .execute(params![file_id, tag_id])?;
        Ok(removed > 0)
    }

    /// Create one tag per well-known image type, leaving existing ones alone
    pub fn seed_format_tags(&self) -> Result<()> {
        for name in FORMAT_TAGS {
            self.ensure_tag(name, DEFAULT_TAG_COLOR)?;
        }
        debug!("Seeded {} image type tags", FORMAT_TAGS.len());
        Ok(())
    }

    /// All tags, alphabetically
    pub fn tags(&self) -> Result<Vec<Tag>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached("SELECT id, name, color FROM Tag ORDER BY name")?;
        let tags = stmt
            .query_map([], tag_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tags)
    }

    pub fn tag_by_name(&self, name: &str) -> Result<Option<Tag>> {
        let conn = self.conn()?;
        let tag = conn
            .query_row(
                "SELECT id, name, color FROM Tag WHERE name = ?1",
                params![name.trim()],
                tag_from_row,
            )
            .optional()?;
        Ok(tag)
    }

    pub fn tag_color(&self, tag_id: TagId) -> Result<Option<TagColor>> {
        let conn = self.conn()?;
        let color: Option<String> = conn
            .query_row("SELECT color FROM Tag WHERE id = ?1", params![tag_id], |row| {
                row.get(0)
            })
            .optional()?;
        color.map(|hex| hex.parse()).transpose()
    }

    /// Recolor a tag. Returns false if no tag has this id.
    pub fn set_tag_color(&self, tag_id: TagId, color: TagColor) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE Tag SET color = ?1 WHERE id = ?2",
            params![color.to_hex(), tag_id],
        )?;
        Ok(updated > 0)
    }

    /// Tags attached to a file, alphabetically
    pub fn tags_for_file(&self, file_id: FileId) -> Result<Vec<Tag>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT t.id, t.name, t.color FROM FileTag ft
             JOIN Tag t ON t.id = ft.tagId
             WHERE ft.fileId = ?1
             ORDER BY t.name",
        )?;
        let tags = stmt
            .query_map(params![file_id], tag_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tags)
    }

    pub fn tag_count(&self) -> Result<i64> {
        self.count("SELECT COUNT(*) FROM Tag")
    }

    pub fn file_tag_count(&self) -> Result<i64> {
        self.count("SELECT COUNT(*) FROM FileTag")
    }

    // ── Options ──────────────────────────────────────────────────

    /// Options saved in this index, `None` before the first save
    pub fn load_options(&self) -> Result<Option<Options>> {
        let conn = self.conn()?;
        let json: Option<String> = conn
            .query_row("SELECT settings_json FROM Options WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(json.map(|json| Options::from_json(&json)).transpose()?)
    }

    /// Write the single options row. The first save ends `first_boot`.
    pub fn save_options(&self, options: &mut Options) -> Result<()> {
        let conn = self.conn()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM Options WHERE id = 1)",
            [],
            |row| row.get(0),
        )?;
        options.first_boot = !exists;

        let json = options.to_json()?;
        conn.execute(
            "INSERT INTO Options (id, settings_json) VALUES (1, ?1)
             ON CONFLICT(id) DO UPDATE SET settings_json = excluded.settings_json",
            params![json],
        )?;
        Ok(())
    }

    // ── Maintenance ──────────────────────────────────────────────

    pub fn vacuum(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch("VACUUM").map_err(|e| {
            warn!("Failed to vacuum index: {}", e);
            Error::Store(e)
        })
    }

    fn count(&self, sql: &str) -> Result<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(sql, [], |row| row.get(0))?;
        Ok(count)
    }
}

// Implement Debug for better error messages
impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library")
            .field("db_path", &self.db_path)
            .finish()
    }
}

fn configure_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 10000;",
    )
}

/// Create all tables and indexes if they don't exist.
fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS File (
            id          INTEGER PRIMARY KEY NOT NULL,
            path        TEXT NOT NULL UNIQUE,
            hash        TEXT NOT NULL UNIQUE,
            dateAdded   INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_file_date_added
            ON File(dateAdded DESC, id DESC);

        CREATE TABLE IF NOT EXISTS Tag (
            id          INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL UNIQUE,
            color       TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS FileTag (
            id          INTEGER PRIMARY KEY NOT NULL,
            fileId      INTEGER NOT NULL REFERENCES File(id) ON DELETE CASCADE,
            tagId       INTEGER NOT NULL REFERENCES Tag(id) ON DELETE CASCADE
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_filetag_pair
            ON FileTag(fileId, tagId);

        CREATE INDEX IF NOT EXISTS idx_filetag_tag
            ON FileTag(tagId);

        CREATE TABLE IF NOT EXISTS Duplicate (
            id          INTEGER PRIMARY KEY NOT NULL,
            path        TEXT NOT NULL UNIQUE,
            fileId      INTEGER NOT NULL REFERENCES File(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS Options (
            id              INTEGER PRIMARY KEY NOT NULL CHECK (id = 1),
            settings_json   TEXT NOT NULL
        );",
    )?;
    debug!("Index schema initialized");
    Ok(())
}

/// Paths are stored as text; non-UTF-8 segments are replaced lossily.
fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
