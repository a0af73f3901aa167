use crate::errors::{DomainError, DomainResult};
use crate::types::ProgramType;
use crate::validation::{Validate, ValidationBuilder};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Kind of work a catalog activity represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityKind {
    Theory,
    Practice,
    Evaluation,
    Observation,
    Surgery,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Theory => "teoria",
            ActivityKind::Practice => "practica",
            ActivityKind::Evaluation => "evaluacion",
            ActivityKind::Observation => "observacion",
            ActivityKind::Surgery => "cirugia",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "teoria" => Some(ActivityKind::Theory),
            "practica" => Some(ActivityKind::Practice),
            "evaluacion" => Some(ActivityKind::Evaluation),
            "observacion" => Some(ActivityKind::Observation),
            "cirugia" => Some(ActivityKind::Surgery),
            _ => None,
        }
    }
}

/// Phase entity - an ordered stage of the training program
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    pub id: Uuid,
    pub numero: i64,
    pub name: String,
    pub program_type: ProgramType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Catalog activity - a unit of work residents complete within a phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityDef {
    pub id: Uuid,
    pub phase_id: Uuid,
    pub orden: i64,
    pub name: String,
    pub kind: ActivityKind,
    pub requires_validation: bool,
    pub requires_attachment: bool,
    pub requires_signature: bool,
    pub requires_participation_percentage: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ActivityDef {
    pub fn is_surgery(&self) -> bool {
        matches!(self.kind, ActivityKind::Surgery)
    }
}

/// NewPhase DTO - used when creating a catalog phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPhase {
    pub numero: i64,
    pub name: String,
    pub program_type: String,
}

impl Validate for NewPhase {
    fn validate(&self) -> DomainResult<()> {
        ValidationBuilder::new("numero", Some(self.numero))
            .min(1)
            .validate()?;

        ValidationBuilder::new("name", Some(self.name.clone()))
            .required()
            .min_length(2)
            .max_length(100)
            .validate()?;

        ValidationBuilder::new("program_type", Some(self.program_type.clone()))
            .required()
            .one_of(&["residentes", "sociedades"], Some("Invalid program type"))
            .validate()?;

        Ok(())
    }
}

/// NewActivityDef DTO - used when creating a catalog activity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewActivityDef {
    pub phase_id: Uuid,
    pub orden: i64,
    pub name: String,
    pub kind: String,
    pub requires_validation: bool,
    pub requires_attachment: bool,
    pub requires_signature: bool,
    pub requires_participation_percentage: bool,
}

impl Validate for NewActivityDef {
    fn validate(&self) -> DomainResult<()> {
        ValidationBuilder::new("orden", Some(self.orden))
            .min(1)
            .validate()?;

        ValidationBuilder::new("name", Some(self.name.clone()))
            .required()
            .min_length(2)
            .max_length(200)
            .validate()?;

        ValidationBuilder::new("kind", Some(self.kind.clone()))
            .required()
            .one_of(
                &["teoria", "practica", "evaluacion", "observacion", "cirugia"],
                Some("Invalid activity kind"),
            )
            .validate()?;

        Ok(())
    }
}

/// PhaseRow - SQLite row representation for mapping from database
#[derive(Debug, Clone, FromRow)]
pub struct PhaseRow {
    pub id: String,
    pub numero: i64,
    pub name: String,
    pub program_type: String,
    pub created_at: String,
    pub updated_at: String,
}

impl PhaseRow {
    pub fn into_entity(self) -> DomainResult<Phase> {
        Ok(Phase {
            id: Uuid::parse_str(&self.id).map_err(|_| DomainError::InvalidUuid(self.id))?,
            numero: self.numero,
            name: self.name,
            program_type: ProgramType::from_str(&self.program_type).ok_or_else(|| {
                DomainError::Internal(format!("Invalid program type: {}", self.program_type))
            })?,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

/// ActivityDefRow - SQLite row representation for mapping from database
#[derive(Debug, Clone, FromRow)]
pub struct ActivityDefRow {
    pub id: String,
    pub phase_id: String,
    pub orden: i64,
    pub name: String,
    pub kind: String,
    pub requires_validation: i64,
    pub requires_attachment: i64,
    pub requires_signature: i64,
    pub requires_participation_percentage: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl ActivityDefRow {
    pub fn into_entity(self) -> DomainResult<ActivityDef> {
        Ok(ActivityDef {
            id: Uuid::parse_str(&self.id).map_err(|_| DomainError::InvalidUuid(self.id))?,
            phase_id: Uuid::parse_str(&self.phase_id)
                .map_err(|_| DomainError::InvalidUuid(self.phase_id))?,
            orden: self.orden,
            name: self.name,
            kind: ActivityKind::from_str(&self.kind)
                .ok_or_else(|| DomainError::Internal(format!("Invalid activity kind: {}", self.kind)))?,
            requires_validation: self.requires_validation != 0,
            requires_attachment: self.requires_attachment != 0,
            requires_signature: self.requires_signature != 0,
            requires_participation_percentage: self.requires_participation_percentage != 0,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

pub(crate) fn parse_datetime(s: &str) -> DomainResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| DomainError::Internal(format!("Invalid date format: {}", s)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_kind_codec() {
        for kind in [
            ActivityKind::Theory,
            ActivityKind::Practice,
            ActivityKind::Evaluation,
            ActivityKind::Observation,
            ActivityKind::Surgery,
        ] {
            assert_eq!(ActivityKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(ActivityKind::from_str("otro"), None);
    }

    #[test]
    fn test_new_phase_validation() {
        let phase = NewPhase {
            numero: 1,
            name: "Fase inicial".to_string(),
            program_type: "residentes".to_string(),
        };
        assert!(phase.validate().is_ok());

        let bad = NewPhase {
            numero: 0,
            name: "Fase inicial".to_string(),
            program_type: "residentes".to_string(),
        };
        assert!(bad.validate().is_err());

        let bad = NewPhase {
            numero: 1,
            name: "Fase".to_string(),
            program_type: "otro".to_string(),
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_new_activity_def_validation() {
        let def = NewActivityDef {
            phase_id: Uuid::new_v4(),
            orden: 1,
            name: "Cirugia tutelada".to_string(),
            kind: "cirugia".to_string(),
            requires_validation: true,
            requires_attachment: false,
            requires_signature: true,
            requires_participation_percentage: true,
        };
        assert!(def.validate().is_ok());

        let bad = NewActivityDef { kind: "taller".to_string(), ..def };
        assert!(bad.validate().is_err());
    }
}
