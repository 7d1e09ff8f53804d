/// Directory exclusion rules and the image allowlist used by discovery
use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Extensions discovery indexes, lowercase without the dot. SVG and ICO are
/// displayable but deliberately not indexed.
pub const INDEXED_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "bmp", "gif", "tiff", "webp", "heic", "avif", "avi", "qoi", "raw", "dng",
];

/// User-configured substrings; a directory whose absolute path contains any
/// of them is skipped together with its whole subtree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExclusionSet {
    patterns: BTreeSet<String>,
}

impl ExclusionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty patterns are ignored, they would match every path.
    pub fn insert(&mut self, pattern: impl Into<String>) -> bool {
        let pattern = pattern.into();
        if pattern.is_empty() {
            return false;
        }
        self.patterns.insert(pattern)
    }

    pub fn remove(&mut self, pattern: &str) -> bool {
        self.patterns.remove(pattern)
    }

    pub fn contains(&self, pattern: &str) -> bool {
        self.patterns.contains(pattern)
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(String::as_str)
    }

    /// First pattern occurring in `path`, case-sensitive
    pub fn matching_pattern(&self, path: &str) -> Option<&str> {
        self.iter().find(|pattern| path.contains(pattern))
    }
}

impl<S: Into<String>> FromIterator<S> for ExclusionSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = ExclusionSet::new();
        for pattern in iter {
            set.insert(pattern);
        }
        set
    }
}

/// Whether a directory should be skipped: its path contains an exclusion
/// pattern, or its last segment is hidden (starts with `.`).
///
/// Pure string check, the path is never stat'ed.
pub fn is_excluded(path: &Path, exclusions: &ExclusionSet) -> bool {
    let hidden = path
        .file_name()
        .map(|name| name.to_string_lossy().starts_with('.'))
        .unwrap_or(false);

    hidden || exclusions.matching_pattern(&path.to_string_lossy()).is_some()
}

/// Lowercased extension of `path`, if it has one
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
}

/// Whether discovery should index this file, judged by extension alone
pub fn is_indexable_image(path: &Path) -> bool {
    extension_of(path)
        .map(|ext| INDEXED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn games() -> ExclusionSet {
        ["Games"].into_iter().collect()
    }

    #[test]
    fn test_pattern_substring_excludes() {
        assert!(is_excluded(Path::new("/home/u/Games"), &games()));
        assert!(is_excluded(Path::new("/home/u/Games/steam"), &games()));
        assert!(is_excluded(Path::new("/home/u/OldGamesArchive"), &games()));
        assert!(!is_excluded(Path::new("/home/u/Pictures"), &games()));
    }

    #[test]
    fn test_pattern_is_case_sensitive() {
        assert!(!is_excluded(Path::new("/home/u/games"), &games()));
    }

    #[test]
    fn test_hidden_directory_excluded_without_patterns() {
        let none = ExclusionSet::new();
        assert!(is_excluded(Path::new("/home/u/.cache"), &none));
        assert!(!is_excluded(Path::new("/home/u/.cache/thumbs"), &none));
        assert!(!is_excluded(Path::new("/home/u/pics.d"), &none));
        assert!(!is_excluded(Path::new("/"), &none));
    }

    #[test]
    fn test_empty_pattern_is_ignored() {
        let mut set = ExclusionSet::new();
        assert!(!set.insert(""));
        assert!(set.is_empty());
        assert!(!is_excluded(Path::new("/home/u/Pictures"), &set));
    }

    #[test]
    fn test_allowlist() {
        assert!(is_indexable_image(Path::new("/a/cat.PNG")));
        assert!(is_indexable_image(Path::new("/a/cat.jpeg")));
        assert!(is_indexable_image(Path::new("/a/scan.dng")));
        assert!(!is_indexable_image(Path::new("/a/logo.svg")));
        assert!(!is_indexable_image(Path::new("/a/favicon.ico")));
        assert!(!is_indexable_image(Path::new("/a/notes.txt")));
        assert!(!is_indexable_image(Path::new("/a/README")));
    }

    #[test]
    fn test_serializes_as_list() {
        let set: ExclusionSet = ["go", "Games"].into_iter().collect();
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"["Games","go"]"#);
        let back: ExclusionSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
    }
}
