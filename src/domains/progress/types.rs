use crate::errors::{DomainError, DomainResult};
use crate::validation::{Validate, ValidationBuilder};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Status of a single embedded activity-progress entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityStatus {
    Pending,
    Completed,
    Rejected,
    Validated,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityStatus::Pending => "pendiente",
            ActivityStatus::Completed => "completado",
            ActivityStatus::Rejected => "rechazado",
            ActivityStatus::Validated => "validado",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pendiente" => Some(ActivityStatus::Pending),
            "completado" => Some(ActivityStatus::Completed),
            "rechazado" => Some(ActivityStatus::Rejected),
            "validado" => Some(ActivityStatus::Validated),
            _ => None,
        }
    }

    /// Done for the purposes of phase completion: completed or validated
    pub fn is_done(&self) -> bool {
        matches!(self, ActivityStatus::Completed | ActivityStatus::Validated)
    }
}

/// Overall status of a progress record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhaseStatus {
    Blocked,
    InProgress,
    Completed,
    Validated,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseStatus::Blocked => "bloqueada",
            PhaseStatus::InProgress => "en progreso",
            PhaseStatus::Completed => "completado",
            PhaseStatus::Validated => "validado",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "bloqueada" => Some(PhaseStatus::Blocked),
            "en progreso" => Some(PhaseStatus::InProgress),
            "completado" => Some(PhaseStatus::Completed),
            "validado" => Some(PhaseStatus::Validated),
            _ => None,
        }
    }
}

/// Embedded activity-progress entry. Identified by its index within the
/// owning record; never addressed outside its parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityProgress {
    pub activity_def_id: Uuid,
    pub estado: ActivityStatus,
    pub comentarios_residente: Option<String>,
    pub comentarios_tutor: Option<String>,
    pub comentarios_rechazo: Option<String>,
    pub firma_digital: Option<String>,
    pub fecha_realizacion: Option<DateTime<Utc>>,
    pub fecha_validacion: Option<DateTime<Utc>>,
    pub fecha_rechazo: Option<DateTime<Utc>>,
    // Surgery-type activities only
    pub cirugia: Option<String>,
    pub otra_cirugia: Option<String>,
    pub nombre_cirujano: Option<String>,
    pub porcentaje_participacion: Option<i64>,
}

impl ActivityProgress {
    pub fn new_pending(activity_def_id: Uuid) -> Self {
        Self {
            activity_def_id,
            estado: ActivityStatus::Pending,
            comentarios_residente: None,
            comentarios_tutor: None,
            comentarios_rechazo: None,
            firma_digital: None,
            fecha_realizacion: None,
            fecha_validacion: None,
            fecha_rechazo: None,
            cirugia: None,
            otra_cirugia: None,
            nombre_cirujano: None,
            porcentaje_participacion: None,
        }
    }

    /// Entry for a catalog activity that needs no validation: born validated
    pub fn new_validated(activity_def_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            estado: ActivityStatus::Validated,
            fecha_validacion: Some(now),
            ..Self::new_pending(activity_def_id)
        }
    }
}

/// The central mutable entity: one record per (resident, phase)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub id: Uuid,
    pub resident_id: Uuid,
    pub phase_id: Uuid,
    pub estado_general: PhaseStatus,
    pub actividades: Vec<ActivityProgress>,
    pub fecha_fin: Option<DateTime<Utc>>,
    pub validado_por: Option<Uuid>,
    /// Optimistic-concurrency counter, bumped on every persisted write
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProgressRecord {
    pub fn new(
        resident_id: Uuid,
        phase_id: Uuid,
        estado_general: PhaseStatus,
        actividades: Vec<ActivityProgress>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            resident_id,
            phase_id,
            estado_general,
            actividades,
            fecha_fin: None,
            validado_por: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Every activity is completed or validated
    pub fn all_done(&self) -> bool {
        self.actividades.iter().all(|a| a.estado.is_done())
    }

    /// Every activity is validated
    pub fn all_validated(&self) -> bool {
        self.actividades
            .iter()
            .all(|a| a.estado == ActivityStatus::Validated)
    }

    pub fn activity(&self, index: usize) -> DomainResult<&ActivityProgress> {
        self.actividades
            .get(index)
            .ok_or(DomainError::ActivityIndexOutOfRange {
                record_id: self.id,
                index,
                len: self.actividades.len(),
            })
    }

    pub fn activity_mut(&mut self, index: usize) -> DomainResult<&mut ActivityProgress> {
        let len = self.actividades.len();
        let id = self.id;
        self.actividades
            .get_mut(index)
            .ok_or(DomainError::ActivityIndexOutOfRange {
                record_id: id,
                index,
                len,
            })
    }
}

/// Submit command payload (resident side)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitActivity {
    pub comentarios: Option<String>,
    pub fecha_realizacion: Option<DateTime<Utc>>,
    pub cirugia: Option<String>,
    pub otra_cirugia: Option<String>,
    pub nombre_cirujano: Option<String>,
    pub porcentaje_participacion: Option<i64>,
}

impl SubmitActivity {
    pub fn has_surgery_fields(&self) -> bool {
        self.cirugia.is_some()
            || self.otra_cirugia.is_some()
            || self.nombre_cirujano.is_some()
            || self.porcentaje_participacion.is_some()
    }
}

impl Validate for SubmitActivity {
    fn validate(&self) -> DomainResult<()> {
        if let Some(comentarios) = &self.comentarios {
            ValidationBuilder::new("comentarios", Some(comentarios.clone()))
                .max_length(2000)
                .validate()?;
        }

        if let Some(porcentaje) = self.porcentaje_participacion {
            ValidationBuilder::new("porcentaje_participacion", Some(porcentaje))
                .range(0, 100)
                .validate()?;
        }

        Ok(())
    }
}

/// Validate command payload (supervisor side)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateActivity {
    pub comentarios: Option<String>,
    pub firma_digital: String,
}

impl Validate for ValidateActivity {
    fn validate(&self) -> DomainResult<()> {
        ValidationBuilder::new("firma_digital", Some(self.firma_digital.clone()))
            .required()
            .not_blank()
            .max_length(200)
            .validate()?;

        if let Some(comentarios) = &self.comentarios {
            ValidationBuilder::new("comentarios", Some(comentarios.clone()))
                .max_length(2000)
                .validate()?;
        }

        Ok(())
    }
}

/// Reject command payload (supervisor side)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectActivity {
    pub comentarios: String,
}

impl Validate for RejectActivity {
    fn validate(&self) -> DomainResult<()> {
        ValidationBuilder::new("comentarios", Some(self.comentarios.clone()))
            .required()
            .not_blank()
            .max_length(2000)
            .validate()?;

        Ok(())
    }
}

/// Scope window applied to cross-record queries like the pending-validation
/// worklist. Compiled from the caller's affiliation by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeFilter {
    All,
    Hospital {
        hospital_id: Uuid,
        /// None when the tutor's specialty is the ALL sentinel
        specialty: Option<String>,
    },
    Zone(String),
    Society(Uuid),
}

/// Flattened worklist row: one completed activity awaiting validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingValidation {
    pub record_id: Uuid,
    pub resident_id: Uuid,
    pub resident_name: String,
    pub phase_id: Uuid,
    pub phase_name: String,
    pub activity_index: i64,
    pub activity_def_id: Uuid,
    pub activity_name: String,
    pub fecha_realizacion: Option<String>,
    pub comentarios_residente: Option<String>,
}

/// ActivityProgressResponse DTO - embedded entry as exposed to callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityProgressResponse {
    pub activity_def_id: Uuid,
    pub estado: String,
    pub comentarios_residente: Option<String>,
    pub comentarios_tutor: Option<String>,
    pub comentarios_rechazo: Option<String>,
    pub firma_digital: Option<String>,
    pub fecha_realizacion: Option<String>,
    pub fecha_validacion: Option<String>,
    pub fecha_rechazo: Option<String>,
    pub cirugia: Option<String>,
    pub otra_cirugia: Option<String>,
    pub nombre_cirujano: Option<String>,
    pub porcentaje_participacion: Option<i64>,
}

impl From<ActivityProgress> for ActivityProgressResponse {
    fn from(entry: ActivityProgress) -> Self {
        Self {
            activity_def_id: entry.activity_def_id,
            estado: entry.estado.as_str().to_string(),
            comentarios_residente: entry.comentarios_residente,
            comentarios_tutor: entry.comentarios_tutor,
            comentarios_rechazo: entry.comentarios_rechazo,
            firma_digital: entry.firma_digital,
            fecha_realizacion: entry.fecha_realizacion.map(|d| d.to_rfc3339()),
            fecha_validacion: entry.fecha_validacion.map(|d| d.to_rfc3339()),
            fecha_rechazo: entry.fecha_rechazo.map(|d| d.to_rfc3339()),
            cirugia: entry.cirugia,
            otra_cirugia: entry.otra_cirugia,
            nombre_cirujano: entry.nombre_cirujano,
            porcentaje_participacion: entry.porcentaje_participacion,
        }
    }
}

/// ProgressRecordResponse DTO - used for API responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressRecordResponse {
    pub id: Uuid,
    pub resident_id: Uuid,
    pub phase_id: Uuid,
    pub estado_general: String,
    pub actividades: Vec<ActivityProgressResponse>,
    pub fecha_fin: Option<String>,
    pub validado_por: Option<Uuid>,
    pub version: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl From<ProgressRecord> for ProgressRecordResponse {
    fn from(record: ProgressRecord) -> Self {
        Self {
            id: record.id,
            resident_id: record.resident_id,
            phase_id: record.phase_id,
            estado_general: record.estado_general.as_str().to_string(),
            actividades: record.actividades.into_iter().map(Into::into).collect(),
            fecha_fin: record.fecha_fin.map(|d| d.to_rfc3339()),
            validado_por: record.validado_por,
            version: record.version,
            created_at: record.created_at.to_rfc3339(),
            updated_at: record.updated_at.to_rfc3339(),
        }
    }
}

/// ProgressRecordRow - SQLite row representation for mapping from database
#[derive(Debug, Clone, FromRow)]
pub struct ProgressRecordRow {
    pub id: String,
    pub resident_id: String,
    pub phase_id: String,
    pub estado_general: String,
    pub fecha_fin: Option<String>,
    pub validado_por: Option<String>,
    pub version: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// ActivityProgressRow - SQLite row representation for embedded entries
#[derive(Debug, Clone, FromRow)]
pub struct ActivityProgressRow {
    pub record_id: String,
    pub activity_index: i64,
    pub activity_def_id: String,
    pub estado: String,
    pub comentarios_residente: Option<String>,
    pub comentarios_tutor: Option<String>,
    pub comentarios_rechazo: Option<String>,
    pub firma_digital: Option<String>,
    pub fecha_realizacion: Option<String>,
    pub fecha_validacion: Option<String>,
    pub fecha_rechazo: Option<String>,
    pub cirugia: Option<String>,
    pub otra_cirugia: Option<String>,
    pub nombre_cirujano: Option<String>,
    pub porcentaje_participacion: Option<i64>,
}

fn parse_datetime(s: &str) -> DomainResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| DomainError::Internal(format!("Invalid date format: {}", s)))
}

fn parse_optional_datetime(s: &Option<String>) -> DomainResult<Option<DateTime<Utc>>> {
    s.as_ref().map(|v| parse_datetime(v)).transpose()
}

impl ActivityProgressRow {
    pub fn into_entity(self) -> DomainResult<ActivityProgress> {
        Ok(ActivityProgress {
            activity_def_id: Uuid::parse_str(&self.activity_def_id)
                .map_err(|_| DomainError::InvalidUuid(self.activity_def_id))?,
            estado: ActivityStatus::from_str(&self.estado).ok_or_else(|| {
                DomainError::Internal(format!("Invalid activity status: {}", self.estado))
            })?,
            comentarios_residente: self.comentarios_residente,
            comentarios_tutor: self.comentarios_tutor,
            comentarios_rechazo: self.comentarios_rechazo,
            firma_digital: self.firma_digital,
            fecha_realizacion: parse_optional_datetime(&self.fecha_realizacion)?,
            fecha_validacion: parse_optional_datetime(&self.fecha_validacion)?,
            fecha_rechazo: parse_optional_datetime(&self.fecha_rechazo)?,
            cirugia: self.cirugia,
            otra_cirugia: self.otra_cirugia,
            nombre_cirujano: self.nombre_cirujano,
            porcentaje_participacion: self.porcentaje_participacion,
        })
    }
}

impl ProgressRecordRow {
    /// Convert database row plus its ordered entries to the domain entity
    pub fn into_entity(self, actividades: Vec<ActivityProgress>) -> DomainResult<ProgressRecord> {
        let parse_uuid = |s: String| -> DomainResult<Uuid> {
            Uuid::parse_str(&s).map_err(|_| DomainError::InvalidUuid(s))
        };

        Ok(ProgressRecord {
            id: parse_uuid(self.id)?,
            resident_id: parse_uuid(self.resident_id)?,
            phase_id: parse_uuid(self.phase_id)?,
            estado_general: PhaseStatus::from_str(&self.estado_general).ok_or_else(|| {
                DomainError::Internal(format!("Invalid phase status: {}", self.estado_general))
            })?,
            actividades,
            fecha_fin: parse_optional_datetime(&self.fecha_fin)?,
            validado_por: self.validado_por.map(parse_uuid).transpose()?,
            version: self.version,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}
