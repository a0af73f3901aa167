use crate::auth::AuthContext;
use crate::domains::attachment::AttachmentStore;
use crate::domains::catalog::repository::CatalogRepository;
use crate::domains::permission::{can_act, Role, ScopeAction};
use crate::domains::progress::events::{DomainEvent, DomainEventKind, NotificationDispatcher};
use crate::domains::progress::machine;
use crate::domains::progress::repository::ProgressRepository;
use crate::domains::progress::types::{
    ActivityProgress, ActivityStatus, PendingValidation, PhaseStatus, ProgressRecord,
    ProgressRecordResponse, RejectActivity, ScopeFilter, SubmitActivity, ValidateActivity,
};
use crate::domains::user::repository::UserDirectory;
use crate::domains::user::types::UserProfile;
use crate::errors::{ServiceError, ServiceResult, ValidationError};
use crate::types::{PaginatedResult, PaginationParams, ALL_SPECIALTIES};
use crate::utils::TimeSource;
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

/// How many times a command re-loads and re-applies itself after losing a
/// version race before surfacing the conflict to the caller.
const MAX_WRITE_ATTEMPTS: u32 = 3;

/// The validation workflow coordinator.
///
/// Every command runs the same sequence: load the record, resolve the owner,
/// consult the authorization scope resolver, apply the state-machine
/// transition, recompute the phase aggregate, persist atomically, emit a
/// domain event. Guards run before any mutation, so a failed command leaves
/// no observable partial state.
#[async_trait]
pub trait ProgressService: Send + Sync {
    /// Resident submits an activity: `pendiente -> completado`
    async fn submit_activity(
        &self,
        record_id: Uuid,
        activity_index: usize,
        cmd: SubmitActivity,
        auth: &AuthContext,
    ) -> ServiceResult<ProgressRecordResponse>;

    /// Supervisor validates a completed activity: `completado -> validado`
    async fn validate_activity(
        &self,
        record_id: Uuid,
        activity_index: usize,
        cmd: ValidateActivity,
        auth: &AuthContext,
    ) -> ServiceResult<ProgressRecordResponse>;

    /// Supervisor rejects a completed activity: `completado -> rechazado`
    async fn reject_activity(
        &self,
        record_id: Uuid,
        activity_index: usize,
        cmd: RejectActivity,
        auth: &AuthContext,
    ) -> ServiceResult<ProgressRecordResponse>;

    /// Drive a record's overall status. Supervisors get the guarded path;
    /// administrators force the target state without re-checking guards.
    async fn set_phase_status(
        &self,
        record_id: Uuid,
        target: PhaseStatus,
        auth: &AuthContext,
    ) -> ServiceResult<ProgressRecordResponse>;

    /// Admin-only override of a single activity status, bypassing the
    /// activity state machine guards
    async fn set_activity_status(
        &self,
        record_id: Uuid,
        activity_index: usize,
        target: ActivityStatus,
        auth: &AuthContext,
    ) -> ServiceResult<ProgressRecordResponse>;

    /// Bulk provisioning: one record per catalog phase of the resident's
    /// program, each with one entry per catalog activity
    async fn initialize_progress(
        &self,
        resident_id: Uuid,
        auth: &AuthContext,
    ) -> ServiceResult<Vec<ProgressRecordResponse>>;

    async fn get_record(
        &self,
        record_id: Uuid,
        auth: &AuthContext,
    ) -> ServiceResult<ProgressRecordResponse>;

    async fn list_for_resident(
        &self,
        user_id: Uuid,
        auth: &AuthContext,
    ) -> ServiceResult<Vec<ProgressRecordResponse>>;

    /// Completed activities awaiting validation inside the caller's
    /// authorization window
    async fn pending_validations(
        &self,
        params: PaginationParams,
        auth: &AuthContext,
    ) -> ServiceResult<PaginatedResult<PendingValidation>>;

    /// Cascade for user deletion; returns the number of records removed
    async fn delete_records_for_resident(
        &self,
        user_id: Uuid,
        auth: &AuthContext,
    ) -> ServiceResult<u64>;

    /// Cascade for hospital deletion; returns the number of records removed
    async fn delete_records_for_hospital(
        &self,
        hospital_id: Uuid,
        auth: &AuthContext,
    ) -> ServiceResult<u64>;
}

/// Implementation of the workflow coordinator
#[derive(Clone)]
pub struct ProgressServiceImpl {
    repo: Arc<dyn ProgressRepository>,
    catalog_repo: Arc<dyn CatalogRepository>,
    directory: Arc<dyn UserDirectory>,
    attachments: Arc<dyn AttachmentStore>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    clock: Arc<dyn TimeSource>,
}

impl ProgressServiceImpl {
    pub fn new(
        repo: Arc<dyn ProgressRepository>,
        catalog_repo: Arc<dyn CatalogRepository>,
        directory: Arc<dyn UserDirectory>,
        attachments: Arc<dyn AttachmentStore>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            repo,
            catalog_repo,
            directory,
            attachments,
            dispatcher,
            clock,
        }
    }

    fn authorize(
        &self,
        auth: &AuthContext,
        owner: &UserProfile,
        action: ScopeAction,
    ) -> ServiceResult<()> {
        if can_act(&auth.scope(), &owner.subject_scope(), action) {
            Ok(())
        } else {
            Err(ServiceError::PermissionDenied(
                "You do not have permission to act on this progress record".to_string(),
            ))
        }
    }

    /// Notification dispatch is best-effort: the committed transition is the
    /// source of truth, so a delivery failure is logged and swallowed.
    async fn emit(&self, kind: DomainEventKind, record_id: Uuid, activity_index: Option<usize>, auth: &AuthContext) {
        let event = DomainEvent {
            kind,
            record_id,
            activity_index,
            actor_id: auth.user_id,
            occurred_at: self.clock.now(),
        };
        if let Err(e) = self.dispatcher.emit(event).await {
            log::warn!(
                "Notification dispatch failed for record {} ({}): {}",
                record_id,
                kind.as_str(),
                e
            );
        }
    }

    fn should_retry(err: &ServiceError, attempt: u32) -> bool {
        matches!(err, ServiceError::Domain(d) if d.is_retryable())
            && attempt + 1 < MAX_WRITE_ATTEMPTS
    }

    /// Scope window for cross-record worklist queries, compiled from the
    /// caller's affiliation. Mirrors the resolver's rule table.
    fn scope_filter(&self, auth: &AuthContext) -> ServiceResult<ScopeFilter> {
        match auth.role {
            Role::Administrator => Ok(ScopeFilter::All),
            Role::Tutor => {
                let hospital_id = auth.hospital_id.ok_or_else(|| {
                    ServiceError::PermissionDenied(
                        "Tutor without a hospital has no validation scope".to_string(),
                    )
                })?;
                let specialty = match auth.specialty.as_deref() {
                    Some(ALL_SPECIALTIES) => None,
                    Some(s) => Some(s.to_string()),
                    None => {
                        return Err(ServiceError::PermissionDenied(
                            "Tutor without a specialty has no validation scope".to_string(),
                        ))
                    }
                };
                Ok(ScopeFilter::Hospital {
                    hospital_id,
                    specialty,
                })
            }
            Role::ZoneSupervisor => {
                let zone = auth.zone.clone().ok_or_else(|| {
                    ServiceError::PermissionDenied(
                        "Zone supervisor without a zone has no validation scope".to_string(),
                    )
                })?;
                Ok(ScopeFilter::Zone(zone))
            }
            Role::Professor => {
                let society_id = auth.society_id.ok_or_else(|| {
                    ServiceError::PermissionDenied(
                        "Professor without a society has no validation scope".to_string(),
                    )
                })?;
                Ok(ScopeFilter::Society(society_id))
            }
            Role::Resident | Role::Participant => Err(ServiceError::PermissionDenied(
                "Residents and participants cannot list pending validations".to_string(),
            )),
        }
    }
}

#[async_trait]
impl ProgressService for ProgressServiceImpl {
    async fn submit_activity(
        &self,
        record_id: Uuid,
        activity_index: usize,
        cmd: SubmitActivity,
        auth: &AuthContext,
    ) -> ServiceResult<ProgressRecordResponse> {
        use crate::validation::Validate;
        cmd.validate()?;

        let mut attempt = 0;
        loop {
            let mut record = self.repo.find_by_id(record_id).await?;
            let owner = self.directory.resolve(record.resident_id).await?;
            self.authorize(auth, &owner, ScopeAction::Submit)?;

            let def_id = record.activity(activity_index)?.activity_def_id;
            let def = self.catalog_repo.find_activity_by_id(def_id).await?;

            if def.requires_attachment {
                let attached = self.attachments.list_for(record_id, activity_index).await?;
                if attached.is_empty() {
                    return Err(ServiceError::Domain(
                        ValidationError::custom(
                            "an attachment is required before this activity can be submitted",
                        )
                        .into(),
                    ));
                }
            }

            let now = self.clock.now();
            machine::submit(record.activity_mut(activity_index)?, &def, &cmd, now)?;
            machine::recompute_phase(&mut record, now);

            match self.repo.save(&record).await.map_err(ServiceError::from) {
                Ok(saved) => {
                    log::info!(
                        "Activity {} of record {} submitted by {}",
                        activity_index,
                        record_id,
                        auth.user_id
                    );
                    self.emit(
                        DomainEventKind::ActivitySubmitted,
                        record_id,
                        Some(activity_index),
                        auth,
                    )
                    .await;
                    return Ok(saved.into());
                }
                Err(e) if Self::should_retry(&e, attempt) => {
                    log::debug!(
                        "Version conflict on record {}, retrying ({}/{})",
                        record_id,
                        attempt + 1,
                        MAX_WRITE_ATTEMPTS
                    );
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn validate_activity(
        &self,
        record_id: Uuid,
        activity_index: usize,
        cmd: ValidateActivity,
        auth: &AuthContext,
    ) -> ServiceResult<ProgressRecordResponse> {
        use crate::validation::Validate;
        cmd.validate()?;

        let mut attempt = 0;
        loop {
            let mut record = self.repo.find_by_id(record_id).await?;
            let owner = self.directory.resolve(record.resident_id).await?;
            self.authorize(auth, &owner, ScopeAction::Validate)?;

            let now = self.clock.now();
            machine::validate(record.activity_mut(activity_index)?, &cmd, now)?;
            machine::recompute_phase(&mut record, now);

            match self.repo.save(&record).await.map_err(ServiceError::from) {
                Ok(saved) => {
                    log::info!(
                        "Activity {} of record {} validated by {}",
                        activity_index,
                        record_id,
                        auth.user_id
                    );
                    self.emit(
                        DomainEventKind::ActivityValidated,
                        record_id,
                        Some(activity_index),
                        auth,
                    )
                    .await;
                    return Ok(saved.into());
                }
                Err(e) if Self::should_retry(&e, attempt) => {
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn reject_activity(
        &self,
        record_id: Uuid,
        activity_index: usize,
        cmd: RejectActivity,
        auth: &AuthContext,
    ) -> ServiceResult<ProgressRecordResponse> {
        use crate::validation::Validate;
        cmd.validate()?;

        let mut attempt = 0;
        loop {
            let mut record = self.repo.find_by_id(record_id).await?;
            let owner = self.directory.resolve(record.resident_id).await?;
            self.authorize(auth, &owner, ScopeAction::Reject)?;

            let now = self.clock.now();
            machine::reject(record.activity_mut(activity_index)?, &cmd.comentarios, now)?;
            machine::recompute_phase(&mut record, now);

            match self.repo.save(&record).await.map_err(ServiceError::from) {
                Ok(saved) => {
                    log::info!(
                        "Activity {} of record {} rejected by {}",
                        activity_index,
                        record_id,
                        auth.user_id
                    );
                    self.emit(
                        DomainEventKind::ActivityRejected,
                        record_id,
                        Some(activity_index),
                        auth,
                    )
                    .await;
                    return Ok(saved.into());
                }
                Err(e) if Self::should_retry(&e, attempt) => {
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn set_phase_status(
        &self,
        record_id: Uuid,
        target: PhaseStatus,
        auth: &AuthContext,
    ) -> ServiceResult<ProgressRecordResponse> {
        // The admin path forces the target without re-checking the aggregate
        // guards; the supervisor path always re-checks them. The asymmetry
        // is intentional.
        let force = matches!(auth.role, Role::Administrator);

        let mut attempt = 0;
        loop {
            let mut record = self.repo.find_by_id(record_id).await?;
            let owner = self.directory.resolve(record.resident_id).await?;
            self.authorize(auth, &owner, ScopeAction::SetPhaseStatus)?;

            let now = self.clock.now();
            machine::set_phase_status(&mut record, target, auth.user_id, force, now)?;

            match self.repo.save(&record).await.map_err(ServiceError::from) {
                Ok(saved) => {
                    log::info!(
                        "Record {} set to '{}' by {}{}",
                        record_id,
                        target.as_str(),
                        auth.user_id,
                        if force { " (forced)" } else { "" }
                    );
                    self.emit(DomainEventKind::PhaseStatusChanged, record_id, None, auth)
                        .await;
                    return Ok(saved.into());
                }
                Err(e) if Self::should_retry(&e, attempt) => {
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn set_activity_status(
        &self,
        record_id: Uuid,
        activity_index: usize,
        target: ActivityStatus,
        auth: &AuthContext,
    ) -> ServiceResult<ProgressRecordResponse> {
        auth.authorize_admin()?;

        let mut attempt = 0;
        loop {
            let mut record = self.repo.find_by_id(record_id).await?;

            let now = self.clock.now();
            machine::force_set_activity(record.activity_mut(activity_index)?, target, now);
            machine::recompute_phase(&mut record, now);

            match self.repo.save(&record).await.map_err(ServiceError::from) {
                Ok(saved) => {
                    log::info!(
                        "Activity {} of record {} forced to '{}' by {}",
                        activity_index,
                        record_id,
                        target.as_str(),
                        auth.user_id
                    );
                    self.emit(
                        DomainEventKind::ActivityStatusForced,
                        record_id,
                        Some(activity_index),
                        auth,
                    )
                    .await;
                    return Ok(saved.into());
                }
                Err(e) if Self::should_retry(&e, attempt) => {
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn initialize_progress(
        &self,
        resident_id: Uuid,
        auth: &AuthContext,
    ) -> ServiceResult<Vec<ProgressRecordResponse>> {
        // Invitation acceptance: the trainee activates their own account, or
        // an administrator provisions on their behalf
        if auth.user_id != resident_id {
            auth.authorize_admin()?;
        }

        let profile = self.directory.resolve(resident_id).await?;
        if !profile.role.is_trainee() {
            return Err(ServiceError::Domain(
                ValidationError::relationship(
                    "progress records can only be initialized for residents and participants",
                )
                .into(),
            ));
        }

        if self.repo.exists_for_resident(resident_id).await? {
            return Err(crate::errors::DomainError::AlreadyInitialized(resident_id).into());
        }

        let now = self.clock.now();
        let phases = self.catalog_repo.phases_for_program(profile.program_type).await?;

        let mut records = Vec::with_capacity(phases.len());
        for (i, phase) in phases.iter().enumerate() {
            let defs = self.catalog_repo.activities_for_phase(phase.id).await?;
            let actividades = defs
                .iter()
                .map(|def| {
                    if def.requires_validation {
                        ActivityProgress::new_pending(def.id)
                    } else {
                        ActivityProgress::new_validated(def.id, now)
                    }
                })
                .collect();

            // The lowest-numbered phase opens immediately; later phases wait
            // behind the force-set escape hatch
            let estado = if i == 0 {
                PhaseStatus::InProgress
            } else {
                PhaseStatus::Blocked
            };

            let mut record =
                ProgressRecord::new(resident_id, phase.id, estado, actividades, now);
            machine::recompute_phase(&mut record, now);
            records.push(record);
        }

        self.repo.create_all(&records).await?;
        log::info!(
            "Initialized {} progress records for resident {}",
            records.len(),
            resident_id
        );

        for record in &records {
            self.emit(DomainEventKind::ProgressInitialized, record.id, None, auth)
                .await;
        }

        Ok(records.into_iter().map(Into::into).collect())
    }

    async fn get_record(
        &self,
        record_id: Uuid,
        auth: &AuthContext,
    ) -> ServiceResult<ProgressRecordResponse> {
        let record = self.repo.find_by_id(record_id).await?;
        let owner = self.directory.resolve(record.resident_id).await?;
        self.authorize(auth, &owner, ScopeAction::View)?;

        Ok(record.into())
    }

    async fn list_for_resident(
        &self,
        user_id: Uuid,
        auth: &AuthContext,
    ) -> ServiceResult<Vec<ProgressRecordResponse>> {
        let owner = self.directory.resolve(user_id).await?;
        self.authorize(auth, &owner, ScopeAction::View)?;

        let records = self.repo.find_by_resident(user_id).await?;
        Ok(records.into_iter().map(Into::into).collect())
    }

    async fn pending_validations(
        &self,
        params: PaginationParams,
        auth: &AuthContext,
    ) -> ServiceResult<PaginatedResult<PendingValidation>> {
        let filter = self.scope_filter(auth)?;
        Ok(self.repo.pending_validations(&filter, params).await?)
    }

    async fn delete_records_for_resident(
        &self,
        user_id: Uuid,
        auth: &AuthContext,
    ) -> ServiceResult<u64> {
        auth.authorize_admin()?;
        let removed = self.repo.delete_for_resident(user_id).await?;
        log::info!("Removed {} progress records for resident {}", removed, user_id);
        Ok(removed)
    }

    async fn delete_records_for_hospital(
        &self,
        hospital_id: Uuid,
        auth: &AuthContext,
    ) -> ServiceResult<u64> {
        auth.authorize_admin()?;
        let removed = self.repo.delete_for_hospital(hospital_id).await?;
        log::info!(
            "Removed {} progress records for hospital {}",
            removed,
            hospital_id
        );
        Ok(removed)
    }
}
