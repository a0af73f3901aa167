use uuid::Uuid;

use crate::domains::permission::Role;
use crate::types::ALL_SPECIALTIES;

/// What an actor is trying to do to a progress record (or its owner).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeAction {
    /// Read a record or the list of records
    View,
    /// Submit an activity on a record
    Submit,
    /// Validate a completed activity
    Validate,
    /// Reject a completed activity
    Reject,
    /// Drive a record's overall phase status
    SetPhaseStatus,
    /// Override an individual activity status (admin escape hatch)
    SetActivityStatus,
    /// Edit the record owner's user data
    EditUser,
}

impl ScopeAction {
    /// Actions reserved for the supervisory roles. Trainees can never
    /// perform these, not even against their own records.
    pub fn requires_supervisor(&self) -> bool {
        matches!(
            self,
            ScopeAction::Validate
                | ScopeAction::Reject
                | ScopeAction::SetPhaseStatus
                | ScopeAction::SetActivityStatus
        )
    }
}

/// The acting user's organizational affiliation, flattened for the rule table.
#[derive(Debug, Clone)]
pub struct ActorScope {
    pub user_id: Uuid,
    pub role: Role,
    pub hospital_id: Option<Uuid>,
    pub zone: Option<String>,
    pub specialty: Option<String>,
    pub society_id: Option<Uuid>,
}

/// The record owner's affiliation as resolved through the user directory.
/// `hospital_zone` is the zone of the owner's hospital, not the denormalized
/// copy on the user row.
#[derive(Debug, Clone)]
pub struct SubjectScope {
    pub user_id: Uuid,
    pub hospital_id: Option<Uuid>,
    pub hospital_zone: Option<String>,
    pub specialty: Option<String>,
    pub society_id: Option<Uuid>,
}

/// Authorization scope resolver.
///
/// Pure predicate deciding whether `actor` may perform `action` against a
/// record owned by `subject`. The whole permission matrix lives here; callers
/// never re-derive any part of it. The resolver is binary: it allows or
/// denies the operation, it never narrows the data returned.
pub fn can_act(actor: &ActorScope, subject: &SubjectScope, action: ScopeAction) -> bool {
    if action.requires_supervisor() && !actor.role.is_supervisor() {
        return false;
    }

    match actor.role {
        Role::Administrator => true,

        Role::Resident | Role::Participant => actor.user_id == subject.user_id,

        Role::Tutor => {
            let same_hospital = match (actor.hospital_id, subject.hospital_id) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            };
            let specialty_matches = match actor.specialty.as_deref() {
                Some(ALL_SPECIALTIES) => true,
                Some(s) => subject.specialty.as_deref() == Some(s),
                None => false,
            };
            same_hospital && specialty_matches
        }

        Role::ZoneSupervisor => match (actor.zone.as_deref(), subject.hospital_zone.as_deref()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },

        Role::Professor => {
            subject.society_id.is_some() && actor.society_id == subject.society_id
        }
    }
}
