use crate::errors::{DomainError, DomainResult};
use crate::domains::permission::{Role, SubjectScope};
use crate::types::ProgramType;
use crate::validation::{Validate, ValidationBuilder};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Hospital reference entity. Zone is the geographic grouping zone
/// supervisors are scoped by.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hospital {
    pub id: Uuid,
    pub name: String,
    pub zone: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partner society reference entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Society {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Core User entity - represents a user in the system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub hospital_id: Option<Uuid>,
    /// Denormalized from the hospital at assignment time
    pub zone: Option<String>,
    pub specialty: Option<String>,
    pub society_id: Option<Uuid>,
    /// Assigned supervisor, stored as an opaque id
    pub tutor_id: Option<Uuid>,
    pub program_type: ProgramType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        matches!(self.role, Role::Administrator)
    }

    pub fn is_trainee(&self) -> bool {
        self.role.is_trainee()
    }
}

/// Flattened affiliation snapshot resolved through the user directory.
/// `hospital_zone` is read from the hospital row, not the denormalized copy.
#[derive(Debug, Clone)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub name: String,
    pub role: Role,
    pub hospital_id: Option<Uuid>,
    pub hospital_zone: Option<String>,
    pub specialty: Option<String>,
    pub society_id: Option<Uuid>,
    pub program_type: ProgramType,
}

impl UserProfile {
    /// Shape consumed by the authorization scope resolver
    pub fn subject_scope(&self) -> SubjectScope {
        SubjectScope {
            user_id: self.user_id,
            hospital_id: self.hospital_id,
            hospital_zone: self.hospital_zone.clone(),
            specialty: self.specialty.clone(),
            society_id: self.society_id,
        }
    }
}

/// NewUser DTO - used when an invitation is accepted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub role: String,
    pub hospital_id: Option<Uuid>,
    pub specialty: Option<String>,
    pub society_id: Option<Uuid>,
    pub tutor_id: Option<Uuid>,
    pub program_type: String,
}

impl Validate for NewUser {
    fn validate(&self) -> DomainResult<()> {
        ValidationBuilder::new("name", Some(self.name.clone()))
            .required()
            .min_length(2)
            .max_length(100)
            .validate()?;

        ValidationBuilder::new("email", Some(self.email.clone()))
            .required()
            .email()
            .validate()?;

        ValidationBuilder::new("role", Some(self.role.clone()))
            .required()
            .one_of(
                &["administrador", "residente", "participante", "tutor", "profesor", "csm"],
                Some("Invalid role"),
            )
            .validate()?;

        ValidationBuilder::new("program_type", Some(self.program_type.clone()))
            .required()
            .one_of(&["residentes", "sociedades"], Some("Invalid program type"))
            .validate()?;

        Ok(())
    }
}

/// UpdateUser DTO - used by admin/tutor edit operations
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateUser {
    pub name: Option<String>,
    pub email: Option<String>,
    pub hospital_id: Option<Uuid>,
    pub specialty: Option<String>,
    pub tutor_id: Option<Uuid>,
}

impl Validate for UpdateUser {
    fn validate(&self) -> DomainResult<()> {
        if let Some(name) = &self.name {
            ValidationBuilder::new("name", Some(name.clone()))
                .min_length(2)
                .max_length(100)
                .validate()?;
        }

        if let Some(email) = &self.email {
            ValidationBuilder::new("email", Some(email.clone()))
                .email()
                .validate()?;
        }

        Ok(())
    }
}

impl UpdateUser {
    /// Check whether the update payload carries any field changes.
    pub fn is_empty_update(&self) -> bool {
        self.name.is_none()
            && self.email.is_none()
            && self.hospital_id.is_none()
            && self.specialty.is_none()
            && self.tutor_id.is_none()
    }
}

/// UserRow - SQLite row representation for mapping from database
#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: String,
    pub hospital_id: Option<String>,
    pub zone: Option<String>,
    pub specialty: Option<String>,
    pub society_id: Option<String>,
    pub tutor_id: Option<String>,
    pub program_type: String,
    pub created_at: String,
    pub updated_at: String,
}

impl UserRow {
    /// Convert database row to domain entity
    pub fn into_entity(self) -> DomainResult<User> {
        let parse_uuid = |s: &Option<String>| -> DomainResult<Option<Uuid>> {
            match s {
                Some(id) => Uuid::parse_str(id)
                    .map(Some)
                    .map_err(|_| DomainError::InvalidUuid(id.clone())),
                None => Ok(None),
            }
        };

        let parse_datetime = |s: &str| -> DomainResult<DateTime<Utc>> {
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| DomainError::Internal(format!("Invalid date format: {}", s)))
        };

        Ok(User {
            id: Uuid::parse_str(&self.id).map_err(|_| DomainError::InvalidUuid(self.id))?,
            name: self.name,
            email: self.email,
            role: Role::from_str(&self.role)
                .ok_or_else(|| DomainError::Internal(format!("Invalid role: {}", self.role)))?,
            hospital_id: parse_uuid(&self.hospital_id)?,
            zone: self.zone,
            specialty: self.specialty,
            society_id: parse_uuid(&self.society_id)?,
            tutor_id: parse_uuid(&self.tutor_id)?,
            program_type: ProgramType::from_str(&self.program_type).ok_or_else(|| {
                DomainError::Internal(format!("Invalid program type: {}", self.program_type))
            })?,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

/// UserResponse DTO - used for API responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: String,
    pub hospital_id: Option<Uuid>,
    pub zone: Option<String>,
    pub specialty: Option<String>,
    pub society_id: Option<Uuid>,
    pub tutor_id: Option<Uuid>,
    pub program_type: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            role: user.role.as_str().to_string(),
            hospital_id: user.hospital_id,
            zone: user.zone,
            specialty: user.specialty,
            society_id: user.society_id,
            tutor_id: user.tutor_id,
            program_type: user.program_type.as_str().to_string(),
            created_at: user.created_at.to_rfc3339(),
            updated_at: user.updated_at.to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user() -> NewUser {
        NewUser {
            name: "Ana Ruiz".to_string(),
            email: "ana.ruiz@example.com".to_string(),
            role: "residente".to_string(),
            hospital_id: Some(Uuid::new_v4()),
            specialty: Some("Urology".to_string()),
            society_id: None,
            tutor_id: None,
            program_type: "residentes".to_string(),
        }
    }

    #[test]
    fn test_new_user_validation() {
        assert!(new_user().validate().is_ok());

        let bad = NewUser { email: "not-an-email".to_string(), ..new_user() };
        assert!(bad.validate().is_err());

        let bad = NewUser { role: "director".to_string(), ..new_user() };
        assert!(bad.validate().is_err());

        let bad = NewUser { program_type: "otro".to_string(), ..new_user() };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_update_user_empty_detection() {
        assert!(UpdateUser::default().is_empty_update());

        let update = UpdateUser { specialty: Some("Cardiology".to_string()), ..Default::default() };
        assert!(!update.is_empty_update());
    }
}
