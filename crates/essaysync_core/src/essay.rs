use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::SyncError;

static PAGE_ID_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!-- notion-page-id: ([a-f0-9-]+) -->").expect("invalid page id marker regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EssayFile {
    pub path: PathBuf,
    pub title: String,
    pub page_id: Option<String>,
    /// Content with the marker comment removed, trimmed.
    pub body: String,
}

pub fn read_essay(path: &Path) -> Result<EssayFile, SyncError> {
    let content = fs::read_to_string(path).map_err(|source| SyncError::file_access(path, source))?;
    Ok(parse_essay(path, &content))
}

pub fn parse_essay(path: &Path, content: &str) -> EssayFile {
    EssayFile {
        path: path.to_path_buf(),
        title: extract_title(content).unwrap_or_else(|| fallback_title(path)),
        page_id: extract_page_id(content),
        body: strip_marker(content),
    }
}

/// First `# heading` line, trimmed.
pub fn extract_title(content: &str) -> Option<String> {
    content.lines().find_map(|line| {
        line.strip_prefix("# ")
            .filter(|rest| !rest.is_empty())
            .map(|rest| rest.trim().to_string())
    })
}

pub fn extract_page_id(content: &str) -> Option<String> {
    PAGE_ID_MARKER
        .captures(content)
        .and_then(|captures| captures.get(1))
        .map(|id| id.as_str().to_string())
}

pub fn strip_marker(content: &str) -> String {
    PAGE_ID_MARKER.replace_all(content, "").trim().to_string()
}

pub fn render_with_marker(body: &str, page_id: &str) -> String {
    format!("{body}\n\n<!-- notion-page-id: {page_id} -->\n")
}

/// Persist `body` plus the marker for `page_id`. Returns false when the file
/// already holds exactly that content.
pub fn write_marker(path: &Path, body: &str, page_id: &str) -> Result<bool, SyncError> {
    let rendered = render_with_marker(body, page_id);
    if let Ok(existing) = fs::read_to_string(path)
        && existing == rendered
    {
        return Ok(false);
    }
    fs::write(path, rendered).map_err(|source| SyncError::file_access(path, source))?;
    Ok(true)
}

fn fallback_title(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}
