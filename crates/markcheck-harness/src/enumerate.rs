//! Fixture discovery.

use std::path::{Path, PathBuf};

/// Expand `pattern` relative to `root` into a sorted list of regular files.
///
/// An invalid pattern or an unreadable directory yields an empty list; a
/// suite with nothing to run simply reports zero tests.
#[must_use]
pub fn expand(root: &Path, pattern: &str) -> Vec<PathBuf> {
    let full = root.join(pattern);
    let Some(full) = full.to_str() else {
        return Vec::new();
    };
    let Ok(paths) = glob::glob(full) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = paths
        .filter_map(Result::ok)
        .filter(|path| is_regular_file(path))
        .collect();
    files.sort();
    files
}

/// True when `path` names a regular file (symlinks are followed).
#[must_use]
pub fn is_regular_file(path: &Path) -> bool {
    std::fs::metadata(path).is_ok_and(|meta| meta.is_file())
}

/// `path` relative to `root`, with `/` separators, for messages and
/// diagnostic labels.
#[must_use]
pub fn display_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_sorted_regular_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let test = dir.path().join("test");
        std::fs::create_dir_all(test.join("subdir")).unwrap();
        std::fs::write(test.join("b.xml"), "<b/>").unwrap();
        std::fs::write(test.join("a.xml"), "<a/>").unwrap();
        std::fs::write(test.join("notes.txt"), "").unwrap();

        let all = expand(dir.path(), "test/*");
        let names: Vec<String> = all.iter().map(|p| display_path(dir.path(), p)).collect();
        assert_eq!(names, ["test/a.xml", "test/b.xml", "test/notes.txt"]);

        let xml = expand(dir.path(), "test/*.xml");
        assert_eq!(xml.len(), 2);
    }

    #[test]
    fn bad_pattern_or_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(expand(dir.path(), "test/[").is_empty());
        assert!(expand(dir.path(), "nowhere/*").is_empty());
    }
}
