//! Drives export jobs through `Pending -> Processing -> Completed | Failed`.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use exportkit_core::{ExportId, OwnerId};
use exportkit_exports::{CompletedArtifact, ExportJob, ExportRequest, file_name, storage_path};

use crate::clock::Clock;

use super::artifacts::ArtifactStore;
use super::audit::{AuditAction, AuditEvent, AuditSink};
use super::error::ExportError;
use super::generator::{ExportGenerator, GeneratedExport, GenerationError};
use super::storage::StoredObject;
use super::store::{ExportJobStore, Page, PageRequest};

/// Result of `create`: the terminal job and its download link.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreatedExport {
    pub export: ExportJob,
    pub download_url: Option<String>,
}

/// Job ids currently being driven by this process.
#[derive(Debug, Default)]
struct InFlight {
    ids: Mutex<HashSet<ExportId>>,
}

impl InFlight {
    fn acquire(&self, id: ExportId) -> Result<InFlightGuard<'_>, ExportError> {
        let mut ids = self
            .ids
            .lock()
            .map_err(|_| ExportError::Conflict("in-flight registry poisoned".to_string()))?;
        if !ids.insert(id) {
            return Err(ExportError::Conflict(format!("export {id} is already processing")));
        }
        Ok(InFlightGuard { owner: self, id })
    }
}

struct InFlightGuard<'a> {
    owner: &'a InFlight,
    id: ExportId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut ids) = self.owner.ids.lock() {
            ids.remove(&self.id);
        }
    }
}

pub struct ExportRequestCoordinator {
    jobs: Arc<dyn ExportJobStore>,
    generator: ExportGenerator,
    artifacts: ArtifactStore,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    in_flight: InFlight,
}

impl ExportRequestCoordinator {
    pub fn new(
        jobs: Arc<dyn ExportJobStore>,
        generator: ExportGenerator,
        artifacts: ArtifactStore,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            jobs,
            generator,
            artifacts,
            audit,
            clock,
            in_flight: InFlight::default(),
        }
    }

    /// Persist a pending job and run it to a terminal state in-request.
    ///
    /// On failure the `Failed` record is already stored when the error is
    /// returned.
    pub async fn create(
        &self,
        owner: OwnerId,
        request: ExportRequest,
    ) -> Result<CreatedExport, ExportError> {
        let now = self.clock.now();
        let job = ExportJob::new(owner, request, now);
        let id = self.jobs.insert(job.clone())?;

        info!(
            export_id = %id,
            %owner,
            data_type = %job.data_type,
            format = job.format.extension(),
            "export created"
        );
        self.audit.record(
            AuditEvent::new(AuditAction::ExportCreated, owner, id, now).with_details(json!({
                "data_type": job.data_type,
                "format": job.format,
            })),
        );

        let export = self.process(owner, id).await?;
        Ok(CreatedExport {
            download_url: export.download_url.clone(),
            export,
        })
    }

    /// Drive a pending job through generation and storage.
    ///
    /// Once the job is `Processing` every error ends it `Failed` with the
    /// cause persisted before the error is returned.
    pub async fn process(&self, owner: OwnerId, id: ExportId) -> Result<ExportJob, ExportError> {
        let _guard = self.in_flight.acquire(id)?;

        let mut job = self.load(owner, id)?;
        job.mark_processing(self.clock.now())?;
        self.jobs.update(&job)?;
        debug!(export_id = %id, "export processing");

        let generated = match self
            .generator
            .generate(owner, job.data_type, job.format, job.filters.clone())
            .await
        {
            Ok(generated) => generated,
            Err(err) => {
                let failure = Failure {
                    kind: generation_kind(&err),
                    message: err.to_string(),
                    error: ExportError::from_generation(id, &err),
                };
                return Err(self.fail(job, failure));
            }
        };

        match self.complete(owner, job.clone(), generated).await {
            Ok(completed) => Ok(completed),
            Err(err) => Err(self.fail(job, Failure::from(err))),
        }
    }

    pub fn list_exports(&self, owner: OwnerId, page: PageRequest) -> Result<Page<ExportJob>, ExportError> {
        Ok(self.jobs.list(owner, page)?)
    }

    pub fn get_export(&self, owner: OwnerId, id: ExportId) -> Result<ExportJob, ExportError> {
        self.load(owner, id)
    }

    /// Remove the record and any in-process artifact bytes.
    pub fn delete_export(&self, owner: OwnerId, id: ExportId) -> Result<(), ExportError> {
        let job = self.jobs.delete(owner, id)?.ok_or(ExportError::NotFound)?;

        if let (Some(storage), Some(path)) = (job.storage(), job.storage_path.as_deref()) {
            if let Err(err) = self.artifacts.discard(owner, storage, path) {
                warn!(export_id = %id, error = %err, "failed to release export artifact");
            }
        }

        info!(export_id = %id, %owner, "export deleted");
        self.audit
            .record(AuditEvent::new(AuditAction::ExportDeleted, owner, id, self.clock.now()));
        Ok(())
    }

    /// Return the cached link while it is valid, otherwise issue and persist
    /// a new one.
    pub async fn refresh_download_url(&self, owner: OwnerId, id: ExportId) -> Result<String, ExportError> {
        let mut job = self.load(owner, id)?;
        let now = self.clock.now();

        if let Some(url) = job.valid_download_url(now) {
            debug!(export_id = %id, "download url still valid");
            return Ok(url.to_string());
        }

        let storage = job.storage().ok_or_else(|| {
            ExportError::Conflict(format!(
                "cannot refresh download url of a {} export",
                job.status.name()
            ))
        })?;
        let path = job.storage_path.clone().ok_or(ExportError::NotFound)?;

        let renewed = self.artifacts.reissue(owner, storage, &path, now).await?;
        job.renew_download_url(renewed.download_url.clone(), renewed.expires_at, now)?;
        self.jobs.update(&job)?;

        info!(export_id = %id, expires_at = %renewed.expires_at, "download url refreshed");
        self.audit
            .record(AuditEvent::new(AuditAction::ExportUrlRefreshed, owner, id, now));
        Ok(renewed.download_url)
    }

    /// Serve an in-process artifact by download token.
    pub fn download_ephemeral(&self, owner: OwnerId, token: &str) -> Result<StoredObject, ExportError> {
        Ok(self.artifacts.ephemeral().fetch(owner, token, self.clock.now())?)
    }

    /// Store the artifact and persist the `Completed` job.
    async fn complete(
        &self,
        owner: OwnerId,
        mut job: ExportJob,
        generated: GeneratedExport,
    ) -> Result<ExportJob, ExportError> {
        let id = job.id;
        let name = file_name(job.data_type, job.format, self.clock.now());
        let path = storage_path(owner, &name);
        let size = generated.bytes.len() as u64;

        let completed_at = self.clock.now();
        let stored = self
            .artifacts
            .store(owner, &path, generated.bytes, generated.content_type, completed_at)
            .await?;

        job.mark_completed(
            CompletedArtifact {
                file_name: name,
                file_size_bytes: size,
                storage_path: path,
                storage: stored.storage,
                download_url: stored.download_url,
                download_url_expires_at: stored.expires_at,
            },
            completed_at,
        )?;
        self.jobs.update(&job)?;

        info!(
            export_id = %id,
            rows = generated.row_count,
            bytes = size,
            storage = ?stored.storage,
            "export completed"
        );
        self.audit.record(
            AuditEvent::new(AuditAction::ExportCompleted, owner, id, completed_at).with_details(
                json!({ "file_size_bytes": size, "storage": stored.storage }),
            ),
        );
        Ok(job)
    }

    fn load(&self, owner: OwnerId, id: ExportId) -> Result<ExportJob, ExportError> {
        self.jobs.get(owner, id)?.ok_or(ExportError::NotFound)
    }

    /// Persist `Failed` and hand back the error that caused it.
    ///
    /// If the failed record itself cannot be stored, that store error wins.
    fn fail(&self, mut job: ExportJob, failure: Failure) -> ExportError {
        let now = self.clock.now();
        let details = json!({
            "kind": failure.kind,
            "error": failure.message,
            "data_type": job.data_type,
            "format": job.format,
            "filters": job.filters,
        });

        if let Err(e) = job.mark_failed(failure.message.clone(), details, now) {
            return e.into();
        }
        if let Err(e) = self.jobs.update(&job) {
            return e.into();
        }

        warn!(export_id = %job.id, kind = failure.kind, error = %failure.message, "export failed");
        self.audit.record(
            AuditEvent::new(AuditAction::ExportFailed, job.owner, job.id, now)
                .with_details(json!({ "error": failure.message })),
        );
        failure.error
    }
}

struct Failure {
    kind: &'static str,
    message: String,
    error: ExportError,
}

impl From<ExportError> for Failure {
    fn from(error: ExportError) -> Self {
        Self {
            kind: error.code(),
            message: error.to_string(),
            error,
        }
    }
}

fn generation_kind(err: &GenerationError) -> &'static str {
    match err {
        GenerationError::EmptyResultSet => "empty_result_set",
        GenerationError::Source(_) => "source",
        GenerationError::Serialize(_) => "serialize",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::exports::artifacts::EphemeralArtifacts;
    use crate::exports::artifacts::tests::DownStorage;
    use crate::exports::audit::InMemoryAuditSink;
    use crate::exports::sources::{
        AgentQuery, AgentSource, InMemoryAgentSource, InMemorySessionSource, SourceError, SourcePage,
    };
    use crate::exports::storage::{LocalObjectStorage, ObjectStorage};
    use crate::exports::store::{InMemoryExportJobStore, StoreError};
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use exportkit_exports::{DataType, ExportFilters, ExportFormat, ExportStatus, Row, StorageKind};
    use serde_json::Value;

    struct BrokenAgents;

    #[async_trait]
    impl AgentSource for BrokenAgents {
        async fn get_all(&self, _: OwnerId, _: AgentQuery) -> Result<SourcePage, SourceError> {
            Err(SourceError::Unavailable("agents api timed out".to_string()))
        }
    }

    struct Harness {
        owner: OwnerId,
        clock: Arc<ManualClock>,
        jobs: Arc<InMemoryExportJobStore>,
        audit: Arc<InMemoryAuditSink>,
        coordinator: ExportRequestCoordinator,
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
    }

    fn row(v: Value) -> Row {
        v.as_object().cloned().unwrap()
    }

    fn harness_with(
        storage: Option<Arc<dyn ObjectStorage>>,
        agents: Option<Arc<dyn AgentSource>>,
    ) -> Harness {
        let owner = OwnerId::new();
        let clock = Arc::new(ManualClock::new(t0()));

        let sessions = Arc::new(InMemorySessionSource::new());
        sessions.push(owner, row(json!({"id": "s1", "status": "completed"})));

        let agents: Arc<dyn AgentSource> = match agents {
            Some(agents) => agents,
            None => {
                let agents = Arc::new(InMemoryAgentSource::new());
                for (id, name) in [("a1", "Ada"), ("a2", "Grace, \"Amazing\""), ("a3", "Linus")] {
                    agents.push(owner, row(json!({"id": id, "name": name, "status": "active"})));
                }
                agents
            }
        };

        let storage: Arc<dyn ObjectStorage> = match storage {
            Some(storage) => storage,
            None => Arc::new(LocalObjectStorage::new("secret", "http://svc.test", clock.clone())),
        };
        let artifacts = ArtifactStore::new(
            storage,
            Arc::new(EphemeralArtifacts::new()),
            "exports",
            86_400,
            "http://svc.test",
        );

        let jobs = InMemoryExportJobStore::arc();
        let audit = Arc::new(InMemoryAuditSink::new());
        let coordinator = ExportRequestCoordinator::new(
            jobs.clone(),
            ExportGenerator::new(sessions, agents, 10_000),
            artifacts,
            audit.clone(),
            clock.clone(),
        );

        Harness {
            owner,
            clock,
            jobs,
            audit,
            coordinator,
        }
    }

    fn harness() -> Harness {
        harness_with(None, None)
    }

    fn request(data_type: DataType, format: ExportFormat, filters: ExportFilters) -> ExportRequest {
        ExportRequest {
            data_type,
            format,
            filters,
        }
    }

    #[tokio::test]
    async fn agents_csv_completes_with_24h_link() {
        let h = harness();
        let created = h
            .coordinator
            .create(h.owner, request(DataType::Agents, ExportFormat::Csv, Default::default()))
            .await
            .unwrap();

        let job = &created.export;
        assert_eq!(
            job.status,
            ExportStatus::Completed {
                storage: StorageKind::Persistent
            }
        );
        assert!(job.file_size_bytes.unwrap() > 0);
        assert!(created.download_url.is_some());
        assert_eq!(
            job.download_url_expires_at.unwrap(),
            job.completed_at.unwrap() + Duration::hours(24)
        );
        assert!(job.file_name.as_deref().unwrap().starts_with("agents-export-"));

        let stored = h.jobs.get(h.owner, job.id).unwrap().unwrap();
        assert_eq!(&stored, job);
        assert_eq!(
            h.audit.actions(),
            vec![AuditAction::ExportCreated, AuditAction::ExportCompleted]
        );
    }

    #[tokio::test]
    async fn empty_session_export_fails_durably() {
        let h = harness();
        let filters = ExportFilters {
            status: Some("nothing-matches".into()),
            ..Default::default()
        };
        let err = h
            .coordinator
            .create(h.owner, request(DataType::Sessions, ExportFormat::Json, filters))
            .await
            .unwrap_err();

        let ExportError::EmptyResultSet { export_id } = err else {
            panic!("expected EmptyResultSet, got {err:?}");
        };
        let job = h.jobs.get(h.owner, export_id).unwrap().unwrap();
        assert_eq!(job.status, ExportStatus::Failed);
        assert!(job.error_message.is_some());
        assert_eq!(job.error_details.as_ref().unwrap()["kind"], "empty_result_set");
        assert!(job.download_url.is_none());
        assert_eq!(
            h.audit.actions(),
            vec![AuditAction::ExportCreated, AuditAction::ExportFailed]
        );
    }

    #[tokio::test]
    async fn source_failure_is_a_generation_failure() {
        let h = harness_with(None, Some(Arc::new(BrokenAgents)));
        let err = h
            .coordinator
            .create(h.owner, request(DataType::Agents, ExportFormat::Csv, Default::default()))
            .await
            .unwrap_err();

        let ExportError::Generation { export_id, message } = err else {
            panic!("expected Generation, got {err:?}");
        };
        assert!(message.contains("timed out"));
        let job = h.jobs.get(h.owner, export_id).unwrap().unwrap();
        assert_eq!(job.status, ExportStatus::Failed);
        assert_eq!(job.error_details.as_ref().unwrap()["kind"], "source");
    }

    #[tokio::test]
    async fn refresh_is_idempotent_until_expiry() {
        let h = harness();
        let created = h
            .coordinator
            .create(h.owner, request(DataType::Agents, ExportFormat::Json, Default::default()))
            .await
            .unwrap();
        let id = created.export.id;
        let original = created.download_url.unwrap();

        h.clock.advance(Duration::hours(1));
        let first = h.coordinator.refresh_download_url(h.owner, id).await.unwrap();
        let second = h.coordinator.refresh_download_url(h.owner, id).await.unwrap();
        assert_eq!(first, original);
        assert_eq!(second, original);

        h.clock.advance(Duration::hours(24));
        let renewed = h.coordinator.refresh_download_url(h.owner, id).await.unwrap();
        assert_ne!(renewed, original);

        let stored = h.jobs.get(h.owner, id).unwrap().unwrap();
        assert_eq!(stored.download_url.as_deref(), Some(renewed.as_str()));
        assert_eq!(
            stored.download_url_expires_at,
            Some(h.clock.now() + Duration::hours(24))
        );
        assert_eq!(h.audit.actions().last(), Some(&AuditAction::ExportUrlRefreshed));
    }

    #[tokio::test]
    async fn storage_outage_degrades_to_ephemeral() {
        let h = harness_with(Some(Arc::new(DownStorage)), None);
        let created = h
            .coordinator
            .create(h.owner, request(DataType::Agents, ExportFormat::Csv, Default::default()))
            .await
            .unwrap();
        assert_eq!(created.export.storage(), Some(StorageKind::Ephemeral));

        let url = created.download_url.unwrap();
        assert!(url.starts_with("http://svc.test/artifacts/"));
        let token = url.rsplit('/').next().unwrap();
        let object = h.coordinator.download_ephemeral(h.owner, token).unwrap();
        assert_eq!(object.content_type, "text/csv");
        assert!(String::from_utf8(object.bytes).unwrap().contains("\"Grace, \"\"Amazing\"\"\""));

        h.clock.advance(Duration::hours(25));
        let renewed = h
            .coordinator
            .refresh_download_url(h.owner, created.export.id)
            .await
            .unwrap();
        assert_ne!(renewed, url);

        h.coordinator.delete_export(h.owner, created.export.id).unwrap();
        let token = renewed.rsplit('/').next().unwrap();
        assert!(matches!(
            h.coordinator.download_ephemeral(h.owner, token),
            Err(ExportError::NotFound)
        ));
    }

    #[tokio::test]
    async fn finished_jobs_cannot_be_reprocessed() {
        let h = harness();
        let created = h
            .coordinator
            .create(h.owner, request(DataType::Agents, ExportFormat::Csv, Default::default()))
            .await
            .unwrap();
        let err = h.coordinator.process(h.owner, created.export.id).await.unwrap_err();
        assert!(matches!(err, ExportError::Conflict(_)));
    }

    #[test]
    fn in_flight_guard_rejects_second_driver() {
        let in_flight = InFlight::default();
        let id = ExportId::new();

        let guard = in_flight.acquire(id).unwrap();
        assert!(matches!(in_flight.acquire(id), Err(ExportError::Conflict(_))));
        drop(guard);
        assert!(in_flight.acquire(id).is_ok());
    }

    #[tokio::test]
    async fn foreign_owner_sees_not_found() {
        let h = harness();
        let created = h
            .coordinator
            .create(h.owner, request(DataType::Agents, ExportFormat::Csv, Default::default()))
            .await
            .unwrap();
        let stranger = OwnerId::new();
        let id = created.export.id;

        assert!(matches!(h.coordinator.get_export(stranger, id), Err(ExportError::NotFound)));
        assert!(matches!(h.coordinator.delete_export(stranger, id), Err(ExportError::NotFound)));
        assert!(matches!(
            h.coordinator.refresh_download_url(stranger, id).await,
            Err(ExportError::NotFound)
        ));
        assert!(h.coordinator.get_export(h.owner, id).is_ok());
    }

    #[tokio::test]
    async fn failed_export_has_no_link_to_refresh() {
        let h = harness_with(None, Some(Arc::new(BrokenAgents)));
        let err = h
            .coordinator
            .create(h.owner, request(DataType::Agents, ExportFormat::Csv, Default::default()))
            .await
            .unwrap_err();
        let ExportError::Generation { export_id, .. } = err else {
            panic!("expected Generation");
        };
        assert!(matches!(
            h.coordinator.refresh_download_url(h.owner, export_id).await,
            Err(ExportError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn listing_is_newest_first() {
        let h = harness();
        for _ in 0..3 {
            h.coordinator
                .create(h.owner, request(DataType::Agents, ExportFormat::Csv, Default::default()))
                .await
                .unwrap();
            h.clock.advance(Duration::minutes(1));
        }
        let page = h.coordinator.list_exports(h.owner, PageRequest::new(1, 2)).unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 2);
        assert!(page.items[0].created_at > page.items[1].created_at);
    }

    /// Accepts every write except the one that marks a job completed.
    struct RejectsCompletion {
        inner: InMemoryExportJobStore,
    }

    impl ExportJobStore for RejectsCompletion {
        fn insert(&self, job: ExportJob) -> Result<ExportId, StoreError> {
            self.inner.insert(job)
        }

        fn get(&self, owner: OwnerId, id: ExportId) -> Result<Option<ExportJob>, StoreError> {
            self.inner.get(owner, id)
        }

        fn update(&self, job: &ExportJob) -> Result<(), StoreError> {
            if matches!(job.status, ExportStatus::Completed { .. }) {
                return Err(StoreError::Storage("disk full".to_string()));
            }
            self.inner.update(job)
        }

        fn list(&self, owner: OwnerId, page: PageRequest) -> Result<Page<ExportJob>, StoreError> {
            self.inner.list(owner, page)
        }

        fn delete(&self, owner: OwnerId, id: ExportId) -> Result<Option<ExportJob>, StoreError> {
            self.inner.delete(owner, id)
        }
    }

    #[tokio::test]
    async fn failure_after_generation_still_ends_failed() {
        let owner = OwnerId::new();
        let clock = Arc::new(ManualClock::new(t0()));
        let agents = Arc::new(InMemoryAgentSource::new());
        agents.push(owner, row(json!({"id": "a1", "name": "Ada"})));

        let jobs = Arc::new(RejectsCompletion {
            inner: InMemoryExportJobStore::new(),
        });
        let audit = Arc::new(InMemoryAuditSink::new());
        let coordinator = ExportRequestCoordinator::new(
            jobs.clone(),
            ExportGenerator::new(Arc::new(InMemorySessionSource::new()), agents, 10_000),
            ArtifactStore::new(
                Arc::new(LocalObjectStorage::new("secret", "http://svc.test", clock.clone())),
                Arc::new(EphemeralArtifacts::new()),
                "exports",
                86_400,
                "http://svc.test",
            ),
            audit.clone(),
            clock,
        );

        let err = coordinator
            .create(owner, request(DataType::Agents, ExportFormat::Csv, Default::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::Store(_)));

        let page = jobs.list(owner, PageRequest::default()).unwrap();
        let job = &page.items[0];
        assert_eq!(job.status, ExportStatus::Failed);
        assert!(job.error_message.as_deref().unwrap().contains("disk full"));
        assert_eq!(job.error_details.as_ref().unwrap()["kind"], "store_error");
        assert!(job.download_url.is_none());
        assert_eq!(
            audit.actions(),
            vec![AuditAction::ExportCreated, AuditAction::ExportFailed]
        );
    }
}
