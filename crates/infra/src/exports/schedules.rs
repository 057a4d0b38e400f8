//! Recurring export definitions.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info};

use exportkit_core::{OwnerId, ScheduleId};
use exportkit_exports::{ExportSchedule, NewSchedule, SchedulePatch, next_run};

use crate::clock::Clock;

use super::audit::{AuditAction, AuditEvent, AuditSink};
use super::error::ExportError;
use super::store::ScheduleStore;

/// CRUD over schedules, owner-scoped. `next_run_at` is recomputed whenever
/// the recurrence changes and left alone otherwise.
pub struct ScheduleManager {
    schedules: Arc<dyn ScheduleStore>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl ScheduleManager {
    pub fn new(schedules: Arc<dyn ScheduleStore>, audit: Arc<dyn AuditSink>, clock: Arc<dyn Clock>) -> Self {
        Self {
            schedules,
            audit,
            clock,
        }
    }

    pub fn create(&self, owner: OwnerId, new: NewSchedule) -> Result<ExportSchedule, ExportError> {
        new.validate()?;
        let now = self.clock.now();
        let next_run_at = next_run(&new.frequency, &new.frequency_config, now);
        let schedule = ExportSchedule::new(owner, new, next_run_at, now);
        self.schedules.insert(schedule.clone())?;

        info!(
            schedule_id = %schedule.id,
            %owner,
            frequency = schedule.frequency.as_str(),
            next_run_at = %schedule.next_run_at,
            "schedule created"
        );
        self.audit.record(
            AuditEvent::new(AuditAction::ScheduleCreated, owner, schedule.id, now)
                .with_details(json!({ "next_run_at": schedule.next_run_at })),
        );
        Ok(schedule)
    }

    pub fn get(&self, owner: OwnerId, id: ScheduleId) -> Result<ExportSchedule, ExportError> {
        self.schedules.get(owner, id)?.ok_or(ExportError::NotFound)
    }

    pub fn list(&self, owner: OwnerId) -> Result<Vec<ExportSchedule>, ExportError> {
        Ok(self.schedules.list(owner)?)
    }

    pub fn update(
        &self,
        owner: OwnerId,
        id: ScheduleId,
        patch: SchedulePatch,
    ) -> Result<ExportSchedule, ExportError> {
        let mut schedule = self.get(owner, id)?;
        let read_version = schedule.version;
        let versioned = patch.expected_version.is_some();
        let now = self.clock.now();
        let recompute = patch.touches_recurrence();

        schedule.apply_patch(patch, now)?;
        if recompute {
            schedule.next_run_at = next_run(&schedule.frequency, &schedule.frequency_config, now);
        }
        // The version check above ran against our read; repeat it at write time.
        if versioned {
            self.schedules.update_versioned(&schedule, read_version)?;
        } else {
            self.schedules.update(&schedule)?;
        }

        info!(
            schedule_id = %id,
            version = schedule.version,
            enabled = schedule.enabled,
            recomputed = recompute,
            "schedule updated"
        );
        self.audit.record(
            AuditEvent::new(AuditAction::ScheduleUpdated, owner, id, now).with_details(json!({
                "version": schedule.version,
                "next_run_at": schedule.next_run_at,
            })),
        );
        Ok(schedule)
    }

    pub fn toggle_enabled(
        &self,
        owner: OwnerId,
        id: ScheduleId,
        enabled: bool,
    ) -> Result<ExportSchedule, ExportError> {
        self.update(owner, id, SchedulePatch::enabled_only(enabled))
    }

    /// Hard delete.
    pub fn delete(&self, owner: OwnerId, id: ScheduleId) -> Result<(), ExportError> {
        if !self.schedules.delete(owner, id)? {
            return Err(ExportError::NotFound);
        }
        info!(schedule_id = %id, %owner, "schedule deleted");
        self.audit
            .record(AuditEvent::new(AuditAction::ScheduleDeleted, owner, id, self.clock.now()));
        Ok(())
    }

    /// Enabled schedules whose trigger time has passed, across owners.
    pub fn list_due(&self) -> Result<Vec<ExportSchedule>, ExportError> {
        Ok(self.schedules.list_due(self.clock.now())?)
    }

    /// Stamp a firing and advance to the next trigger time.
    pub fn record_run(&self, owner: OwnerId, id: ScheduleId) -> Result<ExportSchedule, ExportError> {
        let mut schedule = self.get(owner, id)?;
        let read_version = schedule.version;
        let now = self.clock.now();

        schedule.last_run_at = Some(now);
        schedule.next_run_at = next_run(&schedule.frequency, &schedule.frequency_config, now);
        schedule.version += 1;
        schedule.updated_at = now;
        self.schedules.update_versioned(&schedule, read_version)?;

        debug!(schedule_id = %id, next_run_at = %schedule.next_run_at, "schedule run recorded");
        Ok(schedule)
    }
}
