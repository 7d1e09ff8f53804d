/// Filesystem discovery
///
/// Walks directory trees, filters them against the exclusion rules and the
/// image allowlist, hashes every candidate and records it in the index:
/// - Exclusion rules and the allowlist (filter.rs)
/// - Streaming content digests (hasher.rs)
/// - The walk itself and its automatic tags (discovery.rs)

pub mod discovery;
pub mod filter;
pub mod hasher;

pub use discovery::{date_tag_name, discover_in_background, DiscoveryEngine, DiscoveryReport};
pub use filter::{extension_of, is_excluded, is_indexable_image, ExclusionSet, INDEXED_EXTENSIONS};
pub use hasher::content_hash;
