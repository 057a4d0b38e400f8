//! Service wiring: stores, collaborators and the export services on top.

use std::sync::Arc;

use exportkit_infra::{
    Clock, ExportConfig, SystemClock,
    exports::{
        AgentSource, ArtifactStore, AuditSink, EphemeralArtifacts, ExportGenerator,
        ExportRequestCoordinator, InMemoryAgentSource, InMemoryExportJobStore,
        InMemoryScheduleStore, InMemorySessionSource, LocalObjectStorage, ScheduleManager,
        SessionSource, TracingAuditSink,
    },
};

/// Services shared by every handler.
#[derive(Clone)]
pub struct AppServices {
    pub exports: Arc<ExportRequestCoordinator>,
    pub schedules: Arc<ScheduleManager>,
    /// Serves the signed `/storage` links it issues.
    pub storage: Arc<LocalObjectStorage>,
}

/// External collaborators the services are built on.
#[derive(Clone)]
pub struct Collaborators {
    pub sessions: Arc<dyn SessionSource>,
    pub agents: Arc<dyn AgentSource>,
    pub audit: Arc<dyn AuditSink>,
    pub clock: Arc<dyn Clock>,
}

impl Default for Collaborators {
    /// Empty in-memory data sources, log-backed audit, wall clock.
    fn default() -> Self {
        Self {
            sessions: Arc::new(InMemorySessionSource::new()),
            agents: Arc::new(InMemoryAgentSource::new()),
            audit: Arc::new(TracingAuditSink),
            clock: Arc::new(SystemClock),
        }
    }
}

pub fn build_services(config: &ExportConfig, collaborators: Collaborators) -> AppServices {
    let Collaborators {
        sessions,
        agents,
        audit,
        clock,
    } = collaborators;

    let storage = Arc::new(LocalObjectStorage::new(
        config.signing_secret.as_bytes().to_vec(),
        config.public_base_url.clone(),
        clock.clone(),
    ));
    let artifacts = ArtifactStore::new(
        storage.clone(),
        Arc::new(EphemeralArtifacts::new()),
        config.bucket.clone(),
        config.url_ttl.as_secs(),
        config.public_base_url.clone(),
    );
    let generator = ExportGenerator::new(sessions, agents, config.fetch_page_size);

    let exports = Arc::new(ExportRequestCoordinator::new(
        InMemoryExportJobStore::arc(),
        generator,
        artifacts,
        audit.clone(),
        clock.clone(),
    ));
    let schedules = Arc::new(ScheduleManager::new(InMemoryScheduleStore::arc(), audit, clock));

    AppServices {
        exports,
        schedules,
        storage,
    }
}
