use std::fmt;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Database errors
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Record not found: {0} with ID {1}")]
    NotFound(String, String),

    #[error("Conflict error: {0}")]
    Conflict(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Database error: {0}")]
    Other(String),
}

impl serde::Serialize for DbError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("DbError", 2)?;
        match self {
            DbError::Sqlx(err) => {
                state.serialize_field("type", "Sqlx")?;
                state.serialize_field("message", &err.to_string())?;
            }
            DbError::Transaction(s) => {
                state.serialize_field("type", "Transaction")?;
                state.serialize_field("message", s)?;
            }
            DbError::Query(s) => {
                state.serialize_field("type", "Query")?;
                state.serialize_field("message", s)?;
            }
            DbError::NotFound(s1, s2) => {
                state.serialize_field("type", "NotFound")?;
                state.serialize_field("message", &format!("Record not found: {} with ID {}", s1, s2))?;
            }
            DbError::Conflict(s) => {
                state.serialize_field("type", "Conflict")?;
                state.serialize_field("message", s)?;
            }
            DbError::Migration(s) => {
                state.serialize_field("type", "Migration")?;
                state.serialize_field("message", s)?;
            }
            DbError::Other(s) => {
                state.serialize_field("type", "Other")?;
                state.serialize_field("message", s)?;
            }
        }
        state.end()
    }
}

/// Manual Clone implementation for DbError
impl Clone for DbError {
    fn clone(&self) -> Self {
        match self {
            DbError::Sqlx(err) => DbError::Other(format!("SQLx error: {}", err)),
            DbError::Transaction(s) => DbError::Transaction(s.clone()),
            DbError::Query(s) => DbError::Query(s.clone()),
            DbError::NotFound(s1, s2) => DbError::NotFound(s1.clone(), s2.clone()),
            DbError::Conflict(s) => DbError::Conflict(s.clone()),
            DbError::Migration(s) => DbError::Migration(s.clone()),
            DbError::Other(s) => DbError::Other(s.clone()),
        }
    }
}

/// Domain-level errors
#[derive(Debug, Error, Clone, Serialize)]
pub enum DomainError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Invalid UUID: {0}")]
    InvalidUuid(String),

    #[error("Entity not found: {0} with ID {1}")]
    EntityNotFound(String, Uuid),

    #[error("Activity index {index} out of range for record {record_id} (length {len})")]
    ActivityIndexOutOfRange {
        record_id: Uuid,
        index: usize,
        len: usize,
    },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Invalid transition: cannot {action} an activity in state '{from}'")]
    InvalidTransition {
        from: String,
        action: String,
    },

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Progress already initialized for resident {0}")]
    AlreadyInitialized(Uuid),

    #[error("Concurrent modification of {entity_type} {id}: stale version")]
    Conflict {
        entity_type: String,
        id: Uuid,
    },

    #[error("Cannot delete {entity_type} with ID {id} due to dependent records in: {}", .dependencies.join(", "))]
    DependentRecordsExist {
        entity_type: String,
        id: Uuid,
        dependencies: Vec<String>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DomainError {
    /// Whether re-loading and re-applying the same command may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DomainError::Conflict { .. } | DomainError::Database(DbError::Conflict(_))
        )
    }

    /// Stable machine-readable code for the UI boundary.
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::Database(DbError::NotFound(_, _)) => "not_found",
            DomainError::Database(DbError::Conflict(_)) => "conflict",
            DomainError::Database(_) => "database_error",
            DomainError::InvalidUuid(_) => "invalid_argument",
            DomainError::EntityNotFound(_, _) => "not_found",
            DomainError::ActivityIndexOutOfRange { .. } => "not_found",
            DomainError::Validation(_) => "validation_failed",
            DomainError::InvalidTransition { .. } => "invalid_transition",
            DomainError::PreconditionFailed(_) => "precondition_failed",
            DomainError::AlreadyInitialized(_) => "already_initialized",
            DomainError::Conflict { .. } => "conflict",
            DomainError::DependentRecordsExist { .. } => "dependent_records_exist",
            DomainError::Internal(_) => "internal_error",
        }
    }
}

/// Service-level errors (application specific)
#[derive(Debug, Error, Clone, Serialize)]
pub enum ServiceError {
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Cannot delete record due to dependencies in: {}", .0.join(", "))]
    DependenciesPreventDeletion(Vec<String>),

    #[error("External service error: {0}")]
    ExternalService(String),
}

impl ServiceError {
    /// Stable machine-readable code for the UI boundary. Guard violations
    /// always surface as one of these, never as an opaque internal error.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Domain(d) => d.code(),
            ServiceError::PermissionDenied(_) => "forbidden",
            ServiceError::DependenciesPreventDeletion(_) => "dependent_records_exist",
            ServiceError::ExternalService(_) => "external_service_error",
        }
    }
}

/// Validation errors
#[derive(Debug, Error, Clone, Serialize)]
pub enum ValidationError {
    #[error("Field '{field}' is required")]
    Required {
        field: String,
    },

    #[error("Field '{field}' must be at least {min} characters")]
    MinLength {
        field: String,
        min: usize,
    },

    #[error("Field '{field}' cannot exceed {max} characters")]
    MaxLength {
        field: String,
        max: usize,
    },

    #[error("Field '{field}' must be between {min} and {max}")]
    Range {
        field: String,
        min: String,
        max: String,
    },

    #[error("Field '{field}' contains invalid format: {reason}")]
    Format {
        field: String,
        reason: String,
    },

    #[error("Field '{field}' must be unique")]
    Unique {
        field: String,
    },

    #[error("Field '{field}' contains an invalid value: {reason}")]
    InvalidValue {
        field: String,
        reason: String,
    },

    #[error("Relationship error: {0}")]
    Relationship(String),

    #[error("Validation error: {0}")]
    Custom(String),
}

impl ValidationError {
    pub fn required(field: &str) -> Self {
        Self::Required {
            field: field.to_string(),
        }
    }

    pub fn min_length(field: &str, min: usize) -> Self {
        Self::MinLength {
            field: field.to_string(),
            min,
        }
    }

    pub fn max_length(field: &str, max: usize) -> Self {
        Self::MaxLength {
            field: field.to_string(),
            max,
        }
    }

    pub fn range<T: fmt::Display>(field: &str, min: T, max: T) -> Self {
        Self::Range {
            field: field.to_string(),
            min: min.to_string(),
            max: max.to_string(),
        }
    }

    pub fn format(field: &str, reason: &str) -> Self {
        Self::Format {
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn unique(field: &str) -> Self {
        Self::Unique {
            field: field.to_string(),
        }
    }

    pub fn invalid_value(field: &str, reason: &str) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn relationship(message: &str) -> Self {
        Self::Relationship(message.to_string())
    }

    pub fn custom(message: &str) -> Self {
        Self::Custom(message.to_string())
    }
}
