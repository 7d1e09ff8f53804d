/// State management module
///
/// This module handles everything persisted in the index database:
/// - Database connection, schema and statements (library.rs)
/// - Row types shared with callers (data.rs)
/// - User options stored next to the index (options.rs)
/// - Paging and tag search for the presentation layer (query.rs)

pub mod data;
pub mod library;
pub mod options;
pub mod query;

pub use data::{File, FileId, FileTag, Tag, TagId, UpsertOutcome, UpsertStatus};
pub use library::Library;
pub use options::Options;
pub use query::{PageCursor, QueryLayer};
