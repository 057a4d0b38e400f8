//! Fetches source rows and serializes them into an export payload.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use exportkit_core::OwnerId;
use exportkit_exports::{DataType, ExportFilters, ExportFormat, SerializeError, render};

use super::sources::{
    AgentQuery, AgentSource, SessionQuery, SessionSource, SourceError, SourcePage,
};

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("no sessions matched the export filters")]
    EmptyResultSet,
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Serialize(#[from] SerializeError),
}

/// Serialized export payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedExport {
    pub bytes: Vec<u8>,
    pub row_count: usize,
    /// Matches reported by the source; above `row_count` when the single
    /// fetch was cut short by the page size.
    pub source_total: usize,
    pub content_type: &'static str,
}

#[derive(Clone)]
pub struct ExportGenerator {
    sessions: Arc<dyn SessionSource>,
    agents: Arc<dyn AgentSource>,
    page_size: u32,
}

impl ExportGenerator {
    /// `page_size` is requested from the sources in a single call to
    /// approximate "every matching row".
    pub fn new(
        sessions: Arc<dyn SessionSource>,
        agents: Arc<dyn AgentSource>,
        page_size: u32,
    ) -> Self {
        Self {
            sessions,
            agents,
            page_size,
        }
    }

    pub async fn generate(
        &self,
        owner: OwnerId,
        data_type: DataType,
        format: ExportFormat,
        filters: ExportFilters,
    ) -> Result<GeneratedExport, GenerationError> {
        let page = self.fetch(owner, data_type, filters).await?;
        if page.total > page.rows.len() {
            warn!(
                %owner,
                %data_type,
                total = page.total,
                fetched = page.rows.len(),
                page_size = self.page_size,
                "source has more rows than one fetch returns; export is truncated"
            );
        }
        let bytes = render(format, &page.rows)?;

        debug!(%owner, %data_type, rows = page.rows.len(), bytes = bytes.len(), "export generated");

        Ok(GeneratedExport {
            bytes,
            row_count: page.rows.len(),
            source_total: page.total,
            content_type: format.content_type(),
        })
    }

    async fn fetch(
        &self,
        owner: OwnerId,
        data_type: DataType,
        filters: ExportFilters,
    ) -> Result<SourcePage, GenerationError> {
        match data_type {
            DataType::Sessions => {
                let page = self.fetch_sessions(owner, filters).await?;
                if page.rows.is_empty() {
                    return Err(GenerationError::EmptyResultSet);
                }
                Ok(page)
            }
            DataType::Agents => self.fetch_agents(owner, filters).await,
            // Not a union: only one dataset is exported, picked by which
            // filters are present.
            DataType::All if filters.has_session_criteria() => {
                self.fetch_sessions(owner, filters).await
            }
            DataType::All => self.fetch_agents(owner, filters).await,
        }
    }

    async fn fetch_sessions(
        &self,
        owner: OwnerId,
        filters: ExportFilters,
    ) -> Result<SourcePage, GenerationError> {
        let query = SessionQuery {
            filters,
            page: 1,
            page_size: self.page_size,
        };
        Ok(self.sessions.get_all(owner, query).await?)
    }

    async fn fetch_agents(
        &self,
        owner: OwnerId,
        filters: ExportFilters,
    ) -> Result<SourcePage, GenerationError> {
        let query = AgentQuery {
            status: "all".to_string(),
            search: filters.search,
            page: 1,
            page_size: self.page_size,
        };
        Ok(self.agents.get_all(owner, query).await?)
    }
}
