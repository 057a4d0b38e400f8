//! Record storage for export jobs and schedules.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

use exportkit_core::{ExportId, OwnerId, ScheduleId};
use exportkit_exports::{ExportJob, ExportSchedule};

/// Record store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("record already exists: {0}")]
    AlreadyExists(String),
    #[error("version conflict: expected {expected}, found {actual}")]
    VersionConflict { expected: u64, actual: u64 },
    #[error("storage error: {0}")]
    Storage(String),
}

/// 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    pub const MAX_PAGE_SIZE: u32 = 100;

    /// Clamp to `page >= 1` and `1 <= page_size <= MAX_PAGE_SIZE`.
    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page: page.max(1),
            page_size: page_size.clamp(1, Self::MAX_PAGE_SIZE),
        }
    }

    fn offset(&self) -> usize {
        (self.page as usize - 1) * self.page_size as usize
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, 20)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: u32,
    pub page_size: u32,
}

/// Export job store abstraction. Reads are owner-scoped; a record owned by
/// someone else is reported as absent.
pub trait ExportJobStore: Send + Sync {
    fn insert(&self, job: ExportJob) -> Result<ExportId, StoreError>;

    fn get(&self, owner: OwnerId, id: ExportId) -> Result<Option<ExportJob>, StoreError>;

    /// Overwrite an existing job.
    fn update(&self, job: &ExportJob) -> Result<(), StoreError>;

    /// Newest first.
    fn list(&self, owner: OwnerId, page: PageRequest) -> Result<Page<ExportJob>, StoreError>;

    /// Returns the removed job, if it existed and was owned by `owner`.
    fn delete(&self, owner: OwnerId, id: ExportId) -> Result<Option<ExportJob>, StoreError>;
}

/// Schedule store abstraction.
pub trait ScheduleStore: Send + Sync {
    fn insert(&self, schedule: ExportSchedule) -> Result<ScheduleId, StoreError>;

    fn get(&self, owner: OwnerId, id: ScheduleId) -> Result<Option<ExportSchedule>, StoreError>;

    /// Overwrite an existing schedule (last writer wins).
    fn update(&self, schedule: &ExportSchedule) -> Result<(), StoreError>;

    /// Overwrite only while the stored version is still `expected`.
    fn update_versioned(&self, schedule: &ExportSchedule, expected: u64) -> Result<(), StoreError>;

    fn list(&self, owner: OwnerId) -> Result<Vec<ExportSchedule>, StoreError>;

    fn delete(&self, owner: OwnerId, id: ScheduleId) -> Result<bool, StoreError>;

    /// Enabled schedules across all owners whose `next_run_at <= now`.
    fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<ExportSchedule>, StoreError>;
}

fn poisoned<E>(_: E) -> StoreError {
    StoreError::Storage("lock poisoned".to_string())
}

/// In-memory export job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryExportJobStore {
    jobs: RwLock<HashMap<ExportId, ExportJob>>,
}

impl InMemoryExportJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl ExportJobStore for InMemoryExportJobStore {
    fn insert(&self, job: ExportJob) -> Result<ExportId, StoreError> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::AlreadyExists(job.id.to_string()));
        }
        let id = job.id;
        jobs.insert(id, job);
        Ok(id)
    }

    fn get(&self, owner: OwnerId, id: ExportId) -> Result<Option<ExportJob>, StoreError> {
        let jobs = self.jobs.read().map_err(poisoned)?;
        Ok(jobs.get(&id).filter(|j| j.owner == owner).cloned())
    }

    fn update(&self, job: &ExportJob) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        match jobs.get_mut(&job.id) {
            Some(existing) if existing.owner == job.owner => {
                *existing = job.clone();
                Ok(())
            }
            _ => Err(StoreError::NotFound(job.id.to_string())),
        }
    }

    fn list(&self, owner: OwnerId, page: PageRequest) -> Result<Page<ExportJob>, StoreError> {
        let jobs = self.jobs.read().map_err(poisoned)?;
        let mut owned: Vec<_> = jobs.values().filter(|j| j.owner == owner).collect();
        owned.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.as_uuid().cmp(a.id.as_uuid()))
        });

        let total = owned.len();
        let items = owned
            .into_iter()
            .skip(page.offset())
            .take(page.page_size as usize)
            .cloned()
            .collect();

        Ok(Page {
            items,
            total,
            page: page.page,
            page_size: page.page_size,
        })
    }

    fn delete(&self, owner: OwnerId, id: ExportId) -> Result<Option<ExportJob>, StoreError> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        let owned = jobs.get(&id).is_some_and(|j| j.owner == owner);
        if owned {
            Ok(jobs.remove(&id))
        } else {
            Ok(None)
        }
    }
}

impl<S> ExportJobStore for Arc<S>
where
    S: ExportJobStore + ?Sized,
{
    fn insert(&self, job: ExportJob) -> Result<ExportId, StoreError> {
        (**self).insert(job)
    }

    fn get(&self, owner: OwnerId, id: ExportId) -> Result<Option<ExportJob>, StoreError> {
        (**self).get(owner, id)
    }

    fn update(&self, job: &ExportJob) -> Result<(), StoreError> {
        (**self).update(job)
    }

    fn list(&self, owner: OwnerId, page: PageRequest) -> Result<Page<ExportJob>, StoreError> {
        (**self).list(owner, page)
    }

    fn delete(&self, owner: OwnerId, id: ExportId) -> Result<Option<ExportJob>, StoreError> {
        (**self).delete(owner, id)
    }
}

/// In-memory schedule store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryScheduleStore {
    schedules: RwLock<HashMap<ScheduleId, ExportSchedule>>,
}

impl InMemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl ScheduleStore for InMemoryScheduleStore {
    fn insert(&self, schedule: ExportSchedule) -> Result<ScheduleId, StoreError> {
        let mut schedules = self.schedules.write().map_err(poisoned)?;
        if schedules.contains_key(&schedule.id) {
            return Err(StoreError::AlreadyExists(schedule.id.to_string()));
        }
        let id = schedule.id;
        schedules.insert(id, schedule);
        Ok(id)
    }

    fn get(&self, owner: OwnerId, id: ScheduleId) -> Result<Option<ExportSchedule>, StoreError> {
        let schedules = self.schedules.read().map_err(poisoned)?;
        Ok(schedules.get(&id).filter(|s| s.owner == owner).cloned())
    }

    fn update(&self, schedule: &ExportSchedule) -> Result<(), StoreError> {
        let mut schedules = self.schedules.write().map_err(poisoned)?;
        match schedules.get_mut(&schedule.id) {
            Some(existing) if existing.owner == schedule.owner => {
                *existing = schedule.clone();
                Ok(())
            }
            _ => Err(StoreError::NotFound(schedule.id.to_string())),
        }
    }

    fn update_versioned(&self, schedule: &ExportSchedule, expected: u64) -> Result<(), StoreError> {
        let mut schedules = self.schedules.write().map_err(poisoned)?;
        match schedules.get_mut(&schedule.id) {
            Some(existing) if existing.owner == schedule.owner => {
                if existing.version != expected {
                    return Err(StoreError::VersionConflict {
                        expected,
                        actual: existing.version,
                    });
                }
                *existing = schedule.clone();
                Ok(())
            }
            _ => Err(StoreError::NotFound(schedule.id.to_string())),
        }
    }

    fn list(&self, owner: OwnerId) -> Result<Vec<ExportSchedule>, StoreError> {
        let schedules = self.schedules.read().map_err(poisoned)?;
        let mut owned: Vec<_> = schedules
            .values()
            .filter(|s| s.owner == owner)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(owned)
    }

    fn delete(&self, owner: OwnerId, id: ScheduleId) -> Result<bool, StoreError> {
        let mut schedules = self.schedules.write().map_err(poisoned)?;
        let owned = schedules.get(&id).is_some_and(|s| s.owner == owner);
        if owned {
            schedules.remove(&id);
        }
        Ok(owned)
    }

    fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<ExportSchedule>, StoreError> {
        let schedules = self.schedules.read().map_err(poisoned)?;
        let mut due: Vec<_> = schedules
            .values()
            .filter(|s| s.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|s| s.next_run_at);
        Ok(due)
    }
}

impl<S> ScheduleStore for Arc<S>
where
    S: ScheduleStore + ?Sized,
{
    fn insert(&self, schedule: ExportSchedule) -> Result<ScheduleId, StoreError> {
        (**self).insert(schedule)
    }

    fn get(&self, owner: OwnerId, id: ScheduleId) -> Result<Option<ExportSchedule>, StoreError> {
        (**self).get(owner, id)
    }

    fn update(&self, schedule: &ExportSchedule) -> Result<(), StoreError> {
        (**self).update(schedule)
    }

    fn update_versioned(&self, schedule: &ExportSchedule, expected: u64) -> Result<(), StoreError> {
        (**self).update_versioned(schedule, expected)
    }

    fn list(&self, owner: OwnerId) -> Result<Vec<ExportSchedule>, StoreError> {
        (**self).list(owner)
    }

    fn delete(&self, owner: OwnerId, id: ScheduleId) -> Result<bool, StoreError> {
        (**self).delete(owner, id)
    }

    fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<ExportSchedule>, StoreError> {
        (**self).list_due(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use exportkit_exports::{DataType, ExportFormat, ExportRequest, Frequency, NewSchedule};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
    }

    fn job(owner: OwnerId, at: DateTime<Utc>) -> ExportJob {
        ExportJob::new(
            owner,
            ExportRequest {
                data_type: DataType::Sessions,
                format: ExportFormat::Json,
                filters: Default::default(),
            },
            at,
        )
    }

    fn schedule(owner: OwnerId, next_run_at: DateTime<Utc>, enabled: bool) -> ExportSchedule {
        let new = NewSchedule {
            name: "s".to_string(),
            enabled,
            data_type: DataType::Agents,
            format: ExportFormat::Csv,
            filters: Default::default(),
            frequency: Frequency::Daily,
            frequency_config: Default::default(),
            delivery_method: Default::default(),
            webhook: None,
            retry_policy: Default::default(),
        };
        ExportSchedule::new(owner, new, next_run_at, t0())
    }

    #[test]
    fn insert_and_get_is_owner_scoped() {
        let store = InMemoryExportJobStore::new();
        let owner = OwnerId::new();
        let id = store.insert(job(owner, t0())).unwrap();

        assert!(store.get(owner, id).unwrap().is_some());
        assert!(store.get(OwnerId::new(), id).unwrap().is_none());
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let store = InMemoryExportJobStore::new();
        let j = job(OwnerId::new(), t0());
        store.insert(j.clone()).unwrap();
        assert!(matches!(store.insert(j), Err(StoreError::AlreadyExists(_))));
    }

    #[test]
    fn update_by_foreign_owner_is_not_found() {
        let store = InMemoryExportJobStore::new();
        let mut j = job(OwnerId::new(), t0());
        store.insert(j.clone()).unwrap();
        j.owner = OwnerId::new();
        assert!(matches!(store.update(&j), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn list_pages_newest_first() {
        let store = InMemoryExportJobStore::new();
        let owner = OwnerId::new();
        for i in 0..5 {
            store.insert(job(owner, t0() + Duration::minutes(i))).unwrap();
        }
        store.insert(job(OwnerId::new(), t0())).unwrap();

        let first = store.list(owner, PageRequest::new(1, 2)).unwrap();
        assert_eq!(first.total, 5);
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.items[0].created_at, t0() + Duration::minutes(4));

        let last = store.list(owner, PageRequest::new(3, 2)).unwrap();
        assert_eq!(last.items.len(), 1);
        assert_eq!(last.items[0].created_at, t0());
    }

    #[test]
    fn page_request_is_clamped() {
        let p = PageRequest::new(0, 10_000);
        assert_eq!(p.page, 1);
        assert_eq!(p.page_size, PageRequest::MAX_PAGE_SIZE);
        assert_eq!(PageRequest::new(2, 0).page_size, 1);
    }

    #[test]
    fn delete_only_removes_owned_jobs() {
        let store = InMemoryExportJobStore::new();
        let owner = OwnerId::new();
        let id = store.insert(job(owner, t0())).unwrap();

        assert!(store.delete(OwnerId::new(), id).unwrap().is_none());
        assert!(store.delete(owner, id).unwrap().is_some());
        assert!(store.get(owner, id).unwrap().is_none());
    }

    #[test]
    fn due_schedules_skip_disabled_and_future() {
        let store = InMemoryScheduleStore::new();
        let owner = OwnerId::new();
        let due = store.insert(schedule(owner, t0(), true)).unwrap();
        store.insert(schedule(owner, t0(), false)).unwrap();
        store.insert(schedule(owner, t0() + Duration::hours(1), true)).unwrap();

        let found = store.list_due(t0()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, due);
    }

    #[test]
    fn schedule_delete_is_hard_and_scoped() {
        let store = InMemoryScheduleStore::new();
        let owner = OwnerId::new();
        let id = store.insert(schedule(owner, t0(), true)).unwrap();

        assert!(!store.delete(OwnerId::new(), id).unwrap());
        assert!(store.delete(owner, id).unwrap());
        assert!(store.list(owner).unwrap().is_empty());
    }

    #[test]
    fn versioned_update_rejects_a_moved_record() {
        let store = InMemoryScheduleStore::new();
        let owner = OwnerId::new();
        let original = schedule(owner, t0(), true);
        store.insert(original.clone()).unwrap();

        let mut first = original.clone();
        first.name = "first".to_string();
        first.version = 2;
        store.update_versioned(&first, 1).unwrap();

        let mut second = original;
        second.name = "second".to_string();
        second.version = 2;
        assert!(matches!(
            store.update_versioned(&second, 1),
            Err(StoreError::VersionConflict {
                expected: 1,
                actual: 2
            })
        ));
        assert_eq!(store.get(owner, first.id).unwrap().unwrap().name, "first");
    }
}
