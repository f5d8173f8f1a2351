//! Batch-limit aware operations layered over [`NotionApi`].
//!
//! Notion caps every children write and listing at 100 items, so anything
//! larger is split into ordered slices and issued one request at a time.

use anyhow::{Context, Result};
use tracing::warn;

use crate::blocks::Block;
use crate::notion::{ChildBlock, NotionApi, ParentScope};

pub const MAX_BLOCKS_PER_REQUEST: usize = 100;

/// Title property of a standalone page; databases name theirs.
pub const PAGE_TITLE_PROPERTY: &str = "title";

/// Create a page with the first slice of blocks inline and append the rest.
pub fn create_page_with_blocks<A: NotionApi>(
    api: &mut A,
    parent: &ParentScope,
    title_property: &str,
    title: &str,
    blocks: &[Block],
) -> Result<String> {
    let inline = &blocks[..blocks.len().min(MAX_BLOCKS_PER_REQUEST)];
    let page_id = api
        .create_page(parent, title_property, title, inline)
        .with_context(|| format!("failed to create page \"{title}\""))?;

    if blocks.len() > MAX_BLOCKS_PER_REQUEST {
        append_blocks_in_chunks(api, &page_id, &blocks[MAX_BLOCKS_PER_REQUEST..])?;
    }
    Ok(page_id)
}

/// Returns the number of append requests issued.
pub fn append_blocks_in_chunks<A: NotionApi>(
    api: &mut A,
    page_id: &str,
    blocks: &[Block],
) -> Result<usize> {
    let mut calls = 0;
    for chunk in blocks.chunks(MAX_BLOCKS_PER_REQUEST) {
        api.append_block_children(page_id, chunk)
            .with_context(|| format!("failed to append blocks to {page_id}"))?;
        calls += 1;
    }
    Ok(calls)
}

pub fn list_all_children<A: NotionApi>(api: &mut A, block_id: &str) -> Result<Vec<ChildBlock>> {
    let mut children = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
        let page = api
            .list_block_children(block_id, cursor.as_deref(), MAX_BLOCKS_PER_REQUEST)
            .with_context(|| format!("failed to list children of {block_id}"))?;
        children.extend(page.results);
        cursor = if page.has_more { page.next_cursor } else { None };
        if cursor.is_none() {
            break;
        }
    }
    Ok(children)
}

/// Name of the property that holds page titles under `parent`.
///
/// Database schemas are free to rename it, so the schema is consulted; if that
/// fails or has no title column, `fallback` is used.
pub fn resolve_title_property<A: NotionApi>(
    api: &mut A,
    parent: &ParentScope,
    fallback: &str,
) -> String {
    let database_id = match parent {
        ParentScope::Page(_) => return PAGE_TITLE_PROPERTY.to_string(),
        ParentScope::Database(id) => id,
    };

    match api.retrieve_database(database_id) {
        Ok(schema) => match schema.title_property() {
            Some(name) => name.to_string(),
            None => {
                warn!(database_id, fallback, "database schema has no title property");
                fallback.to_string()
            }
        },
        Err(error) => {
            warn!(database_id, fallback, error = %format!("{error:#}"), "could not read database schema");
            fallback.to_string()
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::BTreeMap;

    use anyhow::bail;
    use serde_json::json;

    use crate::blocks::Block;
    use crate::error::SyncError;
    use crate::notion::{ChildBlock, ChildrenPage, DatabaseSchema, NotionApi, ParentScope};

    #[derive(Debug, Clone, PartialEq)]
    pub enum Call {
        RetrieveDatabase(String),
        CreatePage {
            parent: ParentScope,
            title_property: String,
            title: String,
            children: usize,
        },
        UpdateTitle {
            page_id: String,
            title: String,
        },
        Archive(String),
        List {
            block_id: String,
            cursor: Option<String>,
        },
        Delete(String),
        Append {
            block_id: String,
            children: usize,
        },
    }

    /// In-memory Notion: pages own ordered children, every call is recorded.
    ///
    /// `pages` and `child_ids` move in lockstep; child ids are stable per page
    /// (`<page>-child-<n>`) so deletes do not renumber the survivors.
    #[derive(Default)]
    pub struct MockApi {
        pub calls: Vec<Call>,
        pub pages: BTreeMap<String, Vec<Block>>,
        pub child_ids: BTreeMap<String, Vec<String>>,
        pub archived: Vec<String>,
        pub schema: Option<DatabaseSchema>,
        pub fail_delete: Vec<String>,
        pub fail_create_titles: Vec<String>,
        pub next_id: usize,
        pub next_child: BTreeMap<String, usize>,
    }

    impl MockApi {
        pub fn with_page(mut self, page_id: &str, blocks: Vec<Block>) -> Self {
            self.attach(page_id, &blocks);
            self
        }

        fn attach(&mut self, page_id: &str, blocks: &[Block]) {
            let counter = self.next_child.entry(page_id.to_string()).or_default();
            let ids = self.child_ids.entry(page_id.to_string()).or_default();
            for _ in blocks {
                ids.push(child_id(page_id, *counter));
                *counter += 1;
            }
            self.pages
                .entry(page_id.to_string())
                .or_default()
                .extend(blocks.iter().cloned());
        }

        pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
            self.calls.iter().filter(|call| predicate(call)).count()
        }

        pub fn append_sizes(&self) -> Vec<usize> {
            self.calls
                .iter()
                .filter_map(|call| match call {
                    Call::Append { children, .. } => Some(*children),
                    _ => None,
                })
                .collect()
        }
    }

    pub fn numbered_blocks(count: usize) -> Vec<Block> {
        (0..count)
            .map(|index| Block::new(json!({ "type": "paragraph", "n": index })))
            .collect()
    }

    fn child_id(page_id: &str, index: usize) -> String {
        format!("{page_id}-child-{index}")
    }

    impl NotionApi for MockApi {
        fn retrieve_database(&mut self, database_id: &str) -> anyhow::Result<DatabaseSchema> {
            self.calls
                .push(Call::RetrieveDatabase(database_id.to_string()));
            match &self.schema {
                Some(schema) => Ok(schema.clone()),
                None => bail!("object_not_found"),
            }
        }

        fn create_page(
            &mut self,
            parent: &ParentScope,
            title_property: &str,
            title: &str,
            children: &[Block],
        ) -> anyhow::Result<String> {
            self.calls.push(Call::CreatePage {
                parent: parent.clone(),
                title_property: title_property.to_string(),
                title: title.to_string(),
                children: children.len(),
            });
            if self.fail_create_titles.iter().any(|item| item == title) {
                return Err(SyncError::Api {
                    status: 400,
                    code: "validation_error".to_string(),
                    message: format!("cannot create {title}"),
                }
                .into());
            }
            self.next_id += 1;
            let page_id = format!("{:08x}-0000-4000-8000-000000000000", self.next_id);
            self.attach(&page_id, children);
            Ok(page_id)
        }

        fn update_page_title(
            &mut self,
            page_id: &str,
            _title_property: &str,
            title: &str,
        ) -> anyhow::Result<()> {
            self.calls.push(Call::UpdateTitle {
                page_id: page_id.to_string(),
                title: title.to_string(),
            });
            if !self.pages.contains_key(page_id) {
                bail!("object_not_found: {page_id}");
            }
            Ok(())
        }

        fn archive_page(&mut self, page_id: &str) -> anyhow::Result<()> {
            self.calls.push(Call::Archive(page_id.to_string()));
            if self.pages.remove(page_id).is_none() {
                bail!("object_not_found: {page_id}");
            }
            self.child_ids.remove(page_id);
            self.archived.push(page_id.to_string());
            Ok(())
        }

        fn list_block_children(
            &mut self,
            block_id: &str,
            start_cursor: Option<&str>,
            page_size: usize,
        ) -> anyhow::Result<ChildrenPage> {
            self.calls.push(Call::List {
                block_id: block_id.to_string(),
                cursor: start_cursor.map(ToString::to_string),
            });
            let Some(ids) = self.child_ids.get(block_id) else {
                bail!("object_not_found: {block_id}");
            };
            let start = start_cursor
                .and_then(|cursor| cursor.parse::<usize>().ok())
                .unwrap_or(0);
            let end = (start + page_size).min(ids.len());
            let results = ids[start..end]
                .iter()
                .map(|id| ChildBlock { id: id.clone() })
                .collect();
            let has_more = end < ids.len();
            Ok(ChildrenPage {
                results,
                has_more,
                next_cursor: has_more.then(|| end.to_string()),
            })
        }

        fn delete_block(&mut self, block_id: &str) -> anyhow::Result<()> {
            self.calls.push(Call::Delete(block_id.to_string()));
            if self.fail_delete.iter().any(|item| item == block_id) {
                bail!("conflict_error: {block_id}");
            }
            for (page_id, ids) in &mut self.child_ids {
                if let Some(position) = ids.iter().position(|id| id == block_id) {
                    ids.remove(position);
                    if let Some(blocks) = self.pages.get_mut(page_id) {
                        blocks.remove(position);
                    }
                    return Ok(());
                }
            }
            bail!("object_not_found: {block_id}")
        }

        fn append_block_children(
            &mut self,
            block_id: &str,
            children: &[Block],
        ) -> anyhow::Result<()> {
            self.calls.push(Call::Append {
                block_id: block_id.to_string(),
                children: children.len(),
            });
            if !self.pages.contains_key(block_id) {
                bail!("object_not_found: {block_id}");
            }
            self.attach(block_id, children);
            Ok(())
        }

        fn request_count(&self) -> usize {
            self.calls.len()
        }
    }
}
