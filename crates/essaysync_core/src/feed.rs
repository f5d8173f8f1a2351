use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use walkdir::WalkDir;

use crate::runtime::{ResolvedPaths, normalize_for_display};

pub const CHANGED_FILES_ENV: &str = "CHANGED_FILES";

/// Where the list of essays to sync comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedSource {
    /// Paths given on the command line.
    Explicit(Vec<String>),
    /// Every markdown file under the essays dir.
    All,
    /// The `CHANGED_FILES` environment variable.
    ChangedFiles,
}

/// Resolve `source` into the ordered paths to reconcile. Discovered essays are
/// reported relative to the project root.
pub fn collect_feed<F>(
    source: &FeedSource,
    paths: &ResolvedPaths,
    lookup_env: F,
) -> Result<Vec<String>>
where
    F: Fn(&str) -> Option<String>,
{
    match source {
        FeedSource::Explicit(files) => Ok(files.clone()),
        FeedSource::All => Ok(discover_essays(&paths.essays_dir)?
            .iter()
            .map(|path| {
                let relative = path.strip_prefix(&paths.project_root).unwrap_or(path.as_path());
                normalize_for_display(relative)
            })
            .collect()),
        FeedSource::ChangedFiles => Ok(parse_changed_files(
            lookup_env(CHANGED_FILES_ENV).as_deref(),
        )),
    }
}

/// Split a CI-provided changed-file list. Absent or blank input yields nothing.
pub fn parse_changed_files(raw: Option<&str>) -> Vec<String> {
    raw.map(|value| value.split_whitespace().map(ToString::to_string).collect())
        .unwrap_or_default()
}

/// Every markdown file under `essays_dir`, in path order.
pub fn discover_essays(essays_dir: &Path) -> Result<Vec<PathBuf>> {
    if !essays_dir.exists() {
        return Ok(Vec::new());
    }

    let mut out = Vec::new();
    for entry in WalkDir::new(essays_dir).follow_links(false) {
        let entry = entry.with_context(|| format!("failed to walk {}", essays_dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("md") {
            continue;
        }
        out.push(path.to_path_buf());
    }
    out.sort();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use std::path::Path;

    use tempfile::tempdir;

    use super::{CHANGED_FILES_ENV, FeedSource, collect_feed, discover_essays, parse_changed_files};
    use crate::runtime::{
        PathOverrides, ResolutionContext, ResolvedPaths, resolve_paths_with_lookup,
    };

    fn paths(project_root: &Path) -> ResolvedPaths {
        resolve_paths_with_lookup(
            &ResolutionContext {
                cwd: project_root.to_path_buf(),
            },
            &PathOverrides::default(),
            |_| None,
        )
    }

    #[test]
    fn tokens_keep_their_order() {
        assert_eq!(
            parse_changed_files(Some("essays/b.md essays/a.md  /abs/c.md")),
            vec!["essays/b.md", "essays/a.md", "/abs/c.md"]
        );
    }

    #[test]
    fn blank_or_absent_feed_is_empty() {
        assert!(parse_changed_files(None).is_empty());
        assert!(parse_changed_files(Some("")).is_empty());
        assert!(parse_changed_files(Some("  \n\t ")).is_empty());
    }

    #[test]
    fn newline_separated_feeds_split_too() {
        assert_eq!(
            parse_changed_files(Some("one.md\ntwo.md\r\n")),
            vec!["one.md", "two.md"]
        );
    }

    #[test]
    fn discover_finds_nested_markdown_only() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("essays");
        fs::create_dir_all(root.join("2025")).expect("create dirs");
        fs::write(root.join("b.md"), "# B").expect("write");
        fs::write(root.join("2025").join("a.md"), "# A").expect("write");
        fs::write(root.join("notes.txt"), "skip").expect("write");

        let found = discover_essays(&root).expect("discover");
        assert_eq!(found, vec![root.join("2025").join("a.md"), root.join("b.md")]);
    }

    #[test]
    fn missing_essays_dir_is_empty() {
        let temp = tempdir().expect("tempdir");
        assert!(
            discover_essays(&temp.path().join("nope"))
                .expect("discover")
                .is_empty()
        );
    }

    #[test]
    fn changed_files_feed_reads_the_environment() {
        let temp = tempdir().expect("tempdir");
        let files = collect_feed(&FeedSource::ChangedFiles, &paths(temp.path()), |key| {
            (key == CHANGED_FILES_ENV).then(|| "essays/a.md essays/b.md".to_string())
        })
        .expect("collect");
        assert_eq!(files, vec!["essays/a.md", "essays/b.md"]);

        let empty = collect_feed(&FeedSource::ChangedFiles, &paths(temp.path()), |_| None)
            .expect("collect");
        assert!(empty.is_empty());
    }

    #[test]
    fn explicit_files_ignore_the_environment() {
        let temp = tempdir().expect("tempdir");
        let files = collect_feed(
            &FeedSource::Explicit(vec!["one.md".to_string()]),
            &paths(temp.path()),
            |_| Some("other.md".to_string()),
        )
        .expect("collect");
        assert_eq!(files, vec!["one.md"]);
    }

    #[test]
    fn all_lists_essays_relative_to_project_root() {
        let temp = tempdir().expect("tempdir");
        let essays = temp.path().join("essays");
        fs::create_dir_all(essays.join("2025")).expect("create dirs");
        fs::write(essays.join("z.md"), "# Z").expect("write");
        fs::write(essays.join("2025").join("a.md"), "# A").expect("write");

        let files = collect_feed(&FeedSource::All, &paths(temp.path()), |_| None)
            .expect("collect");
        assert_eq!(files, vec!["essays/2025/a.md", "essays/z.md"]);
    }
}
