use crate::domains::catalog::types::{
    ActivityDef, ActivityDefRow, NewActivityDef, NewPhase, Phase, PhaseRow,
};
use crate::errors::{DbError, DomainError, DomainResult};
use crate::types::ProgramType;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{query, query_as, query_scalar, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

/// Trait defining phase/activity catalog repository operations
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn create_phase(&self, new_phase: &NewPhase) -> DomainResult<Phase>;
    async fn create_activity(&self, new_activity: &NewActivityDef) -> DomainResult<ActivityDef>;

    async fn find_phase_by_id(&self, id: Uuid) -> DomainResult<Phase>;
    async fn find_activity_by_id(&self, id: Uuid) -> DomainResult<ActivityDef>;

    /// All phases of a program, ordered by `numero`
    async fn phases_for_program(&self, program_type: ProgramType) -> DomainResult<Vec<Phase>>;

    /// All catalog activities of a phase, ordered by `orden`
    async fn activities_for_phase(&self, phase_id: Uuid) -> DomainResult<Vec<ActivityDef>>;

    async fn count_activities_for_phase(&self, phase_id: Uuid) -> DomainResult<i64>;

    async fn delete_activity_with_tx<'t>(
        &self,
        id: Uuid,
        tx: &mut Transaction<'t, Sqlite>,
    ) -> DomainResult<()>;

    async fn delete_phase_with_tx<'t>(
        &self,
        id: Uuid,
        tx: &mut Transaction<'t, Sqlite>,
    ) -> DomainResult<()>;
}

/// SQLite implementation for CatalogRepository
#[derive(Debug, Clone)]
pub struct SqliteCatalogRepository {
    pool: SqlitePool,
}

impl SqliteCatalogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CatalogRepository for SqliteCatalogRepository {
    async fn create_phase(&self, new_phase: &NewPhase) -> DomainResult<Phase> {
        let id = Uuid::new_v4();
        let now = Utc::now().to_rfc3339();

        query(
            "INSERT INTO phases (id, numero, name, program_type, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(new_phase.numero)
        .bind(&new_phase.name)
        .bind(&new_phase.program_type)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(DbError::from)?;

        self.find_phase_by_id(id).await
    }

    async fn create_activity(&self, new_activity: &NewActivityDef) -> DomainResult<ActivityDef> {
        let id = Uuid::new_v4();
        let now = Utc::now().to_rfc3339();

        query(
            "INSERT INTO activity_defs (id, phase_id, orden, name, kind, requires_validation, \
             requires_attachment, requires_signature, requires_participation_percentage, \
             created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(new_activity.phase_id.to_string())
        .bind(new_activity.orden)
        .bind(&new_activity.name)
        .bind(&new_activity.kind)
        .bind(new_activity.requires_validation as i64)
        .bind(new_activity.requires_attachment as i64)
        .bind(new_activity.requires_signature as i64)
        .bind(new_activity.requires_participation_percentage as i64)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(DbError::from)?;

        self.find_activity_by_id(id).await
    }

    async fn find_phase_by_id(&self, id: Uuid) -> DomainResult<Phase> {
        let row = query_as::<_, PhaseRow>("SELECT * FROM phases WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::from)?
            .ok_or_else(|| DomainError::EntityNotFound("Phase".to_string(), id))?;

        row.into_entity()
    }

    async fn find_activity_by_id(&self, id: Uuid) -> DomainResult<ActivityDef> {
        let row = query_as::<_, ActivityDefRow>("SELECT * FROM activity_defs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::from)?
            .ok_or_else(|| DomainError::EntityNotFound("ActivityDef".to_string(), id))?;

        row.into_entity()
    }

    async fn phases_for_program(&self, program_type: ProgramType) -> DomainResult<Vec<Phase>> {
        let rows = query_as::<_, PhaseRow>(
            "SELECT * FROM phases WHERE program_type = ? ORDER BY numero ASC",
        )
        .bind(program_type.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::from)?;

        rows.into_iter().map(|r| r.into_entity()).collect()
    }

    async fn activities_for_phase(&self, phase_id: Uuid) -> DomainResult<Vec<ActivityDef>> {
        let rows = query_as::<_, ActivityDefRow>(
            "SELECT * FROM activity_defs WHERE phase_id = ? ORDER BY orden ASC",
        )
        .bind(phase_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::from)?;

        rows.into_iter().map(|r| r.into_entity()).collect()
    }

    async fn count_activities_for_phase(&self, phase_id: Uuid) -> DomainResult<i64> {
        let count: i64 = query_scalar("SELECT COUNT(*) FROM activity_defs WHERE phase_id = ?")
            .bind(phase_id.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(DbError::from)?;

        Ok(count)
    }

    async fn delete_activity_with_tx<'t>(
        &self,
        id: Uuid,
        tx: &mut Transaction<'t, Sqlite>,
    ) -> DomainResult<()> {
        let result = query("DELETE FROM activity_defs WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut **tx)
            .await
            .map_err(DbError::from)?;

        if result.rows_affected() == 0 {
            Err(DomainError::EntityNotFound("ActivityDef".to_string(), id))
        } else {
            Ok(())
        }
    }

    async fn delete_phase_with_tx<'t>(
        &self,
        id: Uuid,
        tx: &mut Transaction<'t, Sqlite>,
    ) -> DomainResult<()> {
        let result = query("DELETE FROM phases WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut **tx)
            .await
            .map_err(DbError::from)?;

        if result.rows_affected() == 0 {
            Err(DomainError::EntityNotFound("Phase".to_string(), id))
        } else {
            Ok(())
        }
    }
}
