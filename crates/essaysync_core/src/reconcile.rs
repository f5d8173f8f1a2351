use std::env;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::blocks::{Block, markdown_to_blocks};
use crate::config::{EssaySyncConfig, SyncSettings};
use crate::error::FailureKind;
use crate::essay::{read_essay, write_marker};
use crate::feed::{FeedSource, collect_feed};
use crate::gateway::{
    append_blocks_in_chunks, create_page_with_blocks, list_all_children, resolve_title_property,
};
use crate::notion::{NotionApi, NotionClient, ParentScope};
use crate::runtime::ResolvedPaths;

/// How an already-synced page gets its content replaced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplaceStrategy {
    /// Keep the page; delete every child block, then append the new ones.
    #[default]
    DeleteThenAppend,
    /// Archive the page and create a fresh one. Fewer calls, new page id.
    ArchiveAndRecreate,
}

impl ReplaceStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DeleteThenAppend => "replace",
            Self::ArchiveAndRecreate => "recreate",
        }
    }
}

impl FromStr for ReplaceStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "replace" | "delete-then-append" => Ok(Self::DeleteThenAppend),
            "recreate" | "archive-and-recreate" => Ok(Self::ArchiveAndRecreate),
            other => Err(format!(
                "unknown strategy `{other}` (expected `replace` or `recreate`)"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncContext {
    pub parent: ParentScope,
    pub title_property: String,
    pub strategy: ReplaceStrategy,
    pub dry_run: bool,
}

impl SyncContext {
    /// Resolve the title property once for the whole run. Dry runs skip the lookup.
    pub fn resolve<A: NotionApi>(api: &mut A, settings: &SyncSettings, dry_run: bool) -> Self {
        let title_property = if dry_run {
            settings.fallback_title_property.clone()
        } else {
            resolve_title_property(api, &settings.parent, &settings.fallback_title_property)
        };
        Self {
            parent: settings.parent.clone(),
            title_property,
            strategy: settings.strategy,
            dry_run,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Created,
    Updated,
    Recreated,
    WouldCreate,
    WouldUpdate,
    Failed,
}

impl SyncAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Recreated => "recreated",
            Self::WouldCreate => "would_create",
            Self::WouldUpdate => "would_update",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncFileResult {
    pub path: String,
    pub title: Option<String>,
    pub action: SyncAction,
    pub page_id: Option<String>,
    pub blocks: usize,
    pub failure: Option<FailureKind>,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub success: bool,
    pub dry_run: bool,
    pub strategy: ReplaceStrategy,
    pub requested: usize,
    pub created: usize,
    pub updated: usize,
    pub recreated: usize,
    pub failed: usize,
    pub deleted_blocks: usize,
    pub skipped_deletes: usize,
    pub errors: Vec<String>,
    pub files: Vec<SyncFileResult>,
    pub request_count: usize,
}

/// Outcome of replacing the content of an existing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    pub page_id: String,
    pub deleted_blocks: usize,
    pub skipped_deletes: usize,
}

struct EssayOutcome {
    title: String,
    action: SyncAction,
    page_id: Option<String>,
    blocks: usize,
    deleted_blocks: usize,
    skipped_deletes: usize,
}

/// Printed when the feed names no files.
pub const NOTHING_TO_SYNC: &str = "No changed essay files to sync";

#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub source: FeedSource,
    pub strategy: Option<ReplaceStrategy>,
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub enum SyncOutcome {
    NothingToSync,
    Completed(SyncReport),
}

pub fn sync_from_env(
    paths: &ResolvedPaths,
    config: &EssaySyncConfig,
    request: &SyncRequest,
) -> Result<SyncOutcome> {
    run_sync(
        paths,
        config,
        |key| env::var(key).ok(),
        request,
        |settings| NotionClient::new(settings.client.clone()),
    )
}

/// Validate settings, read the feed, then connect and reconcile.
///
/// Settings are checked before the feed is read, so a misconfigured run fails
/// even when nothing changed. An empty feed never connects.
pub fn run_sync<A, L, C>(
    paths: &ResolvedPaths,
    config: &EssaySyncConfig,
    lookup_env: L,
    request: &SyncRequest,
    connect: C,
) -> Result<SyncOutcome>
where
    A: NotionApi,
    L: Fn(&str) -> Option<String>,
    C: FnOnce(&SyncSettings) -> Result<A>,
{
    let mut settings = SyncSettings::resolve(config, &lookup_env)?;
    if let Some(strategy) = request.strategy {
        settings.strategy = strategy;
    }

    let files = collect_feed(&request.source, paths, &lookup_env)?;
    if files.is_empty() {
        return Ok(SyncOutcome::NothingToSync);
    }

    info!(
        count = files.len(),
        strategy = settings.strategy.as_str(),
        dry_run = request.dry_run,
        "Syncing essays"
    );
    let mut api = connect(&settings)?;
    let context = SyncContext::resolve(&mut api, &settings, request.dry_run);
    Ok(SyncOutcome::Completed(sync_files_with_api(
        &mut api, paths, &context, &files,
    )))
}

/// Reconcile each file in order. A failing file is logged and recorded; the
/// remaining files still run.
pub fn sync_files_with_api<A: NotionApi>(
    api: &mut A,
    paths: &ResolvedPaths,
    context: &SyncContext,
    files: &[String],
) -> SyncReport {
    let mut report = SyncReport {
        success: true,
        dry_run: context.dry_run,
        strategy: context.strategy,
        requested: files.len(),
        created: 0,
        updated: 0,
        recreated: 0,
        failed: 0,
        deleted_blocks: 0,
        skipped_deletes: 0,
        errors: Vec::new(),
        files: Vec::new(),
        request_count: 0,
    };
    let requests_before = api.request_count();

    for raw in files {
        let path = paths.resolve_essay_path(raw);
        match sync_essay_with_api(api, context, &path) {
            Ok(outcome) => {
                match outcome.action {
                    SyncAction::Created => report.created += 1,
                    SyncAction::Updated => report.updated += 1,
                    SyncAction::Recreated => report.recreated += 1,
                    _ => {}
                }
                report.deleted_blocks += outcome.deleted_blocks;
                report.skipped_deletes += outcome.skipped_deletes;
                report.files.push(SyncFileResult {
                    path: raw.clone(),
                    title: Some(outcome.title),
                    action: outcome.action,
                    page_id: outcome.page_id,
                    blocks: outcome.blocks,
                    failure: None,
                    detail: None,
                });
            }
            Err(err) => {
                let kind = FailureKind::classify(&err);
                let message = format!("{err:#}");
                error!(path = %raw, kind = kind.as_str(), "Failed to sync: {message}");
                report.failed += 1;
                report.errors.push(format!("{raw}: {message}"));
                report.files.push(SyncFileResult {
                    path: raw.clone(),
                    title: None,
                    action: SyncAction::Failed,
                    page_id: None,
                    blocks: 0,
                    failure: Some(kind),
                    detail: Some(message),
                });
            }
        }
    }

    report.success = report.failed == 0;
    report.request_count = api.request_count().saturating_sub(requests_before);
    report
}

fn sync_essay_with_api<A: NotionApi>(
    api: &mut A,
    context: &SyncContext,
    path: &Path,
) -> Result<EssayOutcome> {
    let essay = read_essay(path)?;
    let blocks = markdown_to_blocks(&essay.body);

    if context.dry_run {
        let action = if essay.page_id.is_some() {
            SyncAction::WouldUpdate
        } else {
            SyncAction::WouldCreate
        };
        return Ok(EssayOutcome {
            title: essay.title,
            action,
            page_id: essay.page_id,
            blocks: blocks.len(),
            deleted_blocks: 0,
            skipped_deletes: 0,
        });
    }

    match essay.page_id.as_deref() {
        None => {
            let page_id = create_page_with_blocks(
                api,
                &context.parent,
                &context.title_property,
                &essay.title,
                &blocks,
            )?;
            write_marker(path, &essay.body, &page_id).with_context(|| {
                format!("page {page_id} was created but its id could not be recorded")
            })?;
            info!(page_id = %page_id, "Created: \"{}\"", essay.title);
            Ok(EssayOutcome {
                title: essay.title,
                action: SyncAction::Created,
                page_id: Some(page_id),
                blocks: blocks.len(),
                deleted_blocks: 0,
                skipped_deletes: 0,
            })
        }
        Some(existing) => {
            let replacement = replace_content(api, context, existing, &essay.title, &blocks)?;
            write_marker(path, &essay.body, &replacement.page_id).with_context(|| {
                format!(
                    "page {} was synced but its id could not be recorded",
                    replacement.page_id
                )
            })?;
            let action = match context.strategy {
                ReplaceStrategy::DeleteThenAppend => SyncAction::Updated,
                ReplaceStrategy::ArchiveAndRecreate => SyncAction::Recreated,
            };
            info!(page_id = %replacement.page_id, previous = %existing, "Updated: \"{}\"", essay.title);
            Ok(EssayOutcome {
                title: essay.title,
                action,
                page_id: Some(replacement.page_id),
                blocks: blocks.len(),
                deleted_blocks: replacement.deleted_blocks,
                skipped_deletes: replacement.skipped_deletes,
            })
        }
    }
}

/// Make an existing page hold `title` and `blocks` using the context's strategy.
pub fn replace_content<A: NotionApi>(
    api: &mut A,
    context: &SyncContext,
    page_id: &str,
    title: &str,
    blocks: &[Block],
) -> Result<Replacement> {
    match context.strategy {
        ReplaceStrategy::DeleteThenAppend => {
            api.update_page_title(page_id, &context.title_property, title)
                .with_context(|| format!("failed to update title of {page_id}"))?;

            let existing = list_all_children(api, page_id)?;
            let mut deleted_blocks = 0;
            let mut skipped_deletes = 0;
            for child in &existing {
                match api.delete_block(&child.id) {
                    Ok(()) => deleted_blocks += 1,
                    Err(err) => {
                        warn!(block_id = %child.id, "Could not delete block: {err:#}");
                        skipped_deletes += 1;
                    }
                }
            }

            append_blocks_in_chunks(api, page_id, blocks)?;
            Ok(Replacement {
                page_id: page_id.to_string(),
                deleted_blocks,
                skipped_deletes,
            })
        }
        ReplaceStrategy::ArchiveAndRecreate => {
            api.archive_page(page_id)
                .with_context(|| format!("failed to archive {page_id}"))?;
            let new_page_id = create_page_with_blocks(
                api,
                &context.parent,
                &context.title_property,
                title,
                blocks,
            )?;
            Ok(Replacement {
                page_id: new_page_id,
                deleted_blocks: 0,
                skipped_deletes: 0,
            })
        }
    }
}
