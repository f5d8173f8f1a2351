use std::path::PathBuf;

use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("missing required configuration: {0}")]
    MissingConfig(&'static str),
    #[error(
        "NOTION_PARENT_PAGE_ID and NOTION_DATABASE_ID are mutually exclusive; configure only one parent scope"
    )]
    ConflictingParent,
    #[error("invalid configuration for {key}: {message}")]
    InvalidConfig { key: &'static str, message: String },
    #[error("failed to access {}: {source}", path.display())]
    FileAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Notion API error [{code}] (HTTP {status}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },
}

impl SyncError {
    pub fn file_access(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileAccess {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    FileAccess,
    Remote,
    Other,
}

impl FailureKind {
    /// Classify a per-file failure by walking its cause chain.
    pub fn classify(error: &anyhow::Error) -> Self {
        for cause in error.chain() {
            if let Some(sync_error) = cause.downcast_ref::<SyncError>() {
                match sync_error {
                    SyncError::FileAccess { .. } => return Self::FileAccess,
                    SyncError::Api { .. } => return Self::Remote,
                    _ => {}
                }
            }
            if cause.downcast_ref::<std::io::Error>().is_some() {
                return Self::FileAccess;
            }
            if cause.downcast_ref::<reqwest::Error>().is_some() {
                return Self::Remote;
            }
        }
        Self::Other
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::FileAccess => "file_access",
            Self::Remote => "remote",
            Self::Other => "other",
        }
    }
}
