use std::{fs, path::{Path, PathBuf}};

use anyhow::{Context, Result};
use regex::Regex;
use walkdir::WalkDir;

/// Create `path` and its parents; a file already sitting there is an error.
pub fn ensure_dir_exists(path: &Path) -> Result<()> {
    if path.is_dir() {
        return Ok(());
    }
    if path.exists() {
        anyhow::bail!("{} exists and is not a directory", path.display());
    }
    fs::create_dir_all(path).with_context(|| format!("Failed to create directory {}", path.display()))
}

/// Translate a filename wildcard (`*` and `?`) into an anchored regex.
fn wildcard_regex(pattern: &str) -> Result<Regex> {
    let mut re = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).with_context(|| format!("Invalid filename pattern {pattern:?}"))
}

/// First file directly inside `dir` matching one of `patterns`.
///
/// Patterns are tried in order; within one pattern the lexicographically
/// smallest file name wins. A missing directory yields `Ok(None)`.
pub fn first_match(dir: &Path, patterns: &[String]) -> Result<Option<PathBuf>> {
    if !dir.is_dir() {
        return Ok(None);
    }

    let mut names = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to list {}", dir.display()))?;
        if entry.file_type().is_file() {
            names.push(entry.into_path());
        }
    }

    for pattern in patterns {
        let re = wildcard_regex(pattern)?;
        let hit = names.iter().find(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| re.is_match(name))
        });
        if let Some(path) = hit {
            return Ok(Some(path.clone()));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_escapes_dots() {
        let re = wildcard_regex("wtlst_ava_*.csv").unwrap();
        assert!(re.is_match("wtlst_ava_21.csv"));
        assert!(!re.is_match("wtlst_ava_21xcsv"));
        assert!(!re.is_match("old_wtlst_ava_21.csv"));
    }

    #[test]
    fn pattern_order_beats_name_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.CSV"), "").unwrap();
        fs::write(dir.path().join("b.csv"), "").unwrap();
        fs::write(dir.path().join("c.csv"), "").unwrap();

        let hit = first_match(dir.path(), &["*.csv".into(), "*.CSV".into()]).unwrap().unwrap();
        assert!(hit.ends_with("b.csv"));
    }

    #[test]
    fn ensure_dir_rejects_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("data_out");
        fs::write(&file, "").unwrap();
        assert!(ensure_dir_exists(&file).is_err());
        ensure_dir_exists(&dir.path().join("a/b")).unwrap();
        assert!(dir.path().join("a/b").is_dir());
    }

    #[test]
    fn missing_dir_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(first_match(&dir.path().join("nope"), &["*".into()]).unwrap().is_none());
    }
}
