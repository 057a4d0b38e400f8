//! Data-source collaborators that supply exportable rows.

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use exportkit_core::OwnerId;
use exportkit_exports::{ExportFilters, Row};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("data source unavailable: {0}")]
    Unavailable(String),
    #[error("data source rejected query: {0}")]
    Rejected(String),
}

/// One page of rows plus the total number of matches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourcePage {
    pub rows: Vec<Row>,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionQuery {
    pub filters: ExportFilters,
    pub page: u32,
    pub page_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentQuery {
    /// `"all"` disables status filtering.
    pub status: String,
    pub search: Option<String>,
    pub page: u32,
    pub page_size: u32,
}

#[async_trait]
pub trait SessionSource: Send + Sync {
    async fn get_all(&self, owner: OwnerId, query: SessionQuery) -> Result<SourcePage, SourceError>;
}

#[async_trait]
pub trait AgentSource: Send + Sync {
    async fn get_all(&self, owner: OwnerId, query: AgentQuery) -> Result<SourcePage, SourceError>;
}

/// In-memory session rows for tests/dev.
///
/// Filters: `status` and `agent_id` match the same-named fields, the date
/// range applies to `started_at` (RFC3339), `search` is a substring match
/// over string fields.
#[derive(Debug, Default)]
pub struct InMemorySessionSource {
    rows: RwLock<Vec<(OwnerId, Row)>>,
}

impl InMemorySessionSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, owner: OwnerId, row: Row) {
        if let Ok(mut rows) = self.rows.write() {
            rows.push((owner, row));
        }
    }
}

#[async_trait]
impl SessionSource for InMemorySessionSource {
    async fn get_all(&self, owner: OwnerId, query: SessionQuery) -> Result<SourcePage, SourceError> {
        let rows = self
            .rows
            .read()
            .map_err(|_| SourceError::Unavailable("session rows lock poisoned".to_string()))?;

        let matching: Vec<Row> = rows
            .iter()
            .filter(|(o, row)| *o == owner && session_matches(row, &query.filters))
            .map(|(_, row)| row.clone())
            .collect();

        Ok(paginate(matching, query.page, query.page_size))
    }
}

/// In-memory agent rows for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryAgentSource {
    rows: RwLock<Vec<(OwnerId, Row)>>,
}

impl InMemoryAgentSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, owner: OwnerId, row: Row) {
        if let Ok(mut rows) = self.rows.write() {
            rows.push((owner, row));
        }
    }
}

#[async_trait]
impl AgentSource for InMemoryAgentSource {
    async fn get_all(&self, owner: OwnerId, query: AgentQuery) -> Result<SourcePage, SourceError> {
        let rows = self
            .rows
            .read()
            .map_err(|_| SourceError::Unavailable("agent rows lock poisoned".to_string()))?;

        let matching: Vec<Row> = rows
            .iter()
            .filter(|(o, row)| {
                *o == owner
                    && (query.status == "all" || field_eq(row, "status", &query.status))
                    && query.search.as_deref().is_none_or(|s| contains_text(row, s))
            })
            .map(|(_, row)| row.clone())
            .collect();

        Ok(paginate(matching, query.page, query.page_size))
    }
}

fn paginate(rows: Vec<Row>, page: u32, page_size: u32) -> SourcePage {
    let total = rows.len();
    let offset = (page.max(1) as usize - 1) * page_size as usize;
    SourcePage {
        rows: rows.into_iter().skip(offset).take(page_size as usize).collect(),
        total,
    }
}

fn session_matches(row: &Row, filters: &ExportFilters) -> bool {
    if let Some(status) = &filters.status {
        if !field_eq(row, "status", status) {
            return false;
        }
    }
    if let Some(agent_id) = &filters.agent_id {
        if !field_eq(row, "agent_id", agent_id) {
            return false;
        }
    }
    if filters.date_from.is_some() || filters.date_to.is_some() {
        let Some(started_at) = timestamp(row, "started_at") else {
            return false;
        };
        if filters.date_from.is_some_and(|from| started_at < from) {
            return false;
        }
        if filters.date_to.is_some_and(|to| started_at > to) {
            return false;
        }
    }
    if let Some(search) = &filters.search {
        if !contains_text(row, search) {
            return false;
        }
    }
    true
}

fn field_eq(row: &Row, key: &str, expected: &str) -> bool {
    match row.get(key) {
        Some(Value::String(s)) => s == expected,
        Some(other) => other.to_string() == expected,
        None => false,
    }
}

fn timestamp(row: &Row, key: &str) -> Option<DateTime<Utc>> {
    row.get(key)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn contains_text(row: &Row, needle: &str) -> bool {
    let needle = needle.to_lowercase();
    row.values()
        .filter_map(Value::as_str)
        .any(|s| s.to_lowercase().contains(&needle))
}
