use crate::domains::progress::types::{
    ActivityProgress, ActivityProgressRow, PendingValidation, ProgressRecord, ProgressRecordRow,
    ScopeFilter,
};
use crate::errors::{DbError, DomainError, DomainResult};
use crate::types::{PaginatedResult, PaginationParams};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{query, query_as, query_scalar, Row, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

/// Trait defining progress record repository operations.
///
/// A record and its embedded activity entries are one unit of persistence:
/// every write rewrites the entries inside the same transaction that updates
/// the parent row, and the parent carries the optimistic-concurrency version.
#[async_trait]
pub trait ProgressRepository: Send + Sync {
    async fn create_with_tx<'t>(
        &self,
        record: &ProgressRecord,
        tx: &mut Transaction<'t, Sqlite>,
    ) -> DomainResult<()>;

    /// Create every record of a bulk provisioning in one transaction
    async fn create_all(&self, records: &[ProgressRecord]) -> DomainResult<()>;

    async fn find_by_id(&self, id: Uuid) -> DomainResult<ProgressRecord>;

    /// All records of a resident, ordered by phase number
    async fn find_by_resident(&self, resident_id: Uuid) -> DomainResult<Vec<ProgressRecord>>;

    async fn exists_for_resident(&self, resident_id: Uuid) -> DomainResult<bool>;

    /// Compare-and-swap write: succeeds only when the stored version still
    /// matches `record.version`, and returns the record with the bumped
    /// version. A lost race surfaces as `DomainError::Conflict`.
    async fn save(&self, record: &ProgressRecord) -> DomainResult<ProgressRecord>;

    /// Flattened worklist of completed activities inside the given scope
    async fn pending_validations(
        &self,
        filter: &ScopeFilter,
        params: PaginationParams,
    ) -> DomainResult<PaginatedResult<PendingValidation>>;

    async fn delete_for_resident(&self, resident_id: Uuid) -> DomainResult<u64>;

    async fn delete_for_resident_with_tx<'t>(
        &self,
        resident_id: Uuid,
        tx: &mut Transaction<'t, Sqlite>,
    ) -> DomainResult<u64>;

    /// Bulk-delete the records of every trainee attached to a hospital
    async fn delete_for_hospital(&self, hospital_id: Uuid) -> DomainResult<u64>;

    /// Delete a phase's records, preserving validated history
    async fn delete_for_phase_with_tx<'t>(
        &self,
        phase_id: Uuid,
        tx: &mut Transaction<'t, Sqlite>,
    ) -> DomainResult<u64>;

    /// Strip the embedded entry for a deleted catalog activity from every
    /// non-validated record, compacting the remaining indices
    async fn remove_activity_entries_with_tx<'t>(
        &self,
        activity_def_id: Uuid,
        tx: &mut Transaction<'t, Sqlite>,
    ) -> DomainResult<u64>;
}

/// SQLite implementation for ProgressRepository
#[derive(Debug, Clone)]
pub struct SqliteProgressRepository {
    pool: SqlitePool,
}

impl SqliteProgressRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn insert_entries<'t>(
        record_id: Uuid,
        actividades: &[ActivityProgress],
        tx: &mut Transaction<'t, Sqlite>,
    ) -> DomainResult<()> {
        for (index, entry) in actividades.iter().enumerate() {
            query(
                "INSERT INTO activity_progress (record_id, activity_index, activity_def_id, \
                 estado, comentarios_residente, comentarios_tutor, comentarios_rechazo, \
                 firma_digital, fecha_realizacion, fecha_validacion, fecha_rechazo, cirugia, \
                 otra_cirugia, nombre_cirujano, porcentaje_participacion) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(record_id.to_string())
            .bind(index as i64)
            .bind(entry.activity_def_id.to_string())
            .bind(entry.estado.as_str())
            .bind(&entry.comentarios_residente)
            .bind(&entry.comentarios_tutor)
            .bind(&entry.comentarios_rechazo)
            .bind(&entry.firma_digital)
            .bind(entry.fecha_realizacion.map(|d| d.to_rfc3339()))
            .bind(entry.fecha_validacion.map(|d| d.to_rfc3339()))
            .bind(entry.fecha_rechazo.map(|d| d.to_rfc3339()))
            .bind(&entry.cirugia)
            .bind(&entry.otra_cirugia)
            .bind(&entry.nombre_cirujano)
            .bind(entry.porcentaje_participacion)
            .execute(&mut **tx)
            .await
            .map_err(DbError::from)?;
        }
        Ok(())
    }

    async fn load_entries(&self, record_id: Uuid) -> DomainResult<Vec<ActivityProgress>> {
        let rows = query_as::<_, ActivityProgressRow>(
            "SELECT * FROM activity_progress WHERE record_id = ? ORDER BY activity_index ASC",
        )
        .bind(record_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::from)?;

        rows.into_iter().map(|r| r.into_entity()).collect()
    }
}

#[async_trait]
impl ProgressRepository for SqliteProgressRepository {
    async fn create_with_tx<'t>(
        &self,
        record: &ProgressRecord,
        tx: &mut Transaction<'t, Sqlite>,
    ) -> DomainResult<()> {
        let result = query(
            "INSERT INTO progress_records (id, resident_id, phase_id, estado_general, \
             fecha_fin, validado_por, version, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(record.resident_id.to_string())
        .bind(record.phase_id.to_string())
        .bind(record.estado_general.as_str())
        .bind(record.fecha_fin.map(|d| d.to_rfc3339()))
        .bind(record.validado_por.map(|v| v.to_string()))
        .bind(record.version)
        .bind(record.created_at.to_rfc3339())
        .bind(record.updated_at.to_rfc3339())
        .execute(&mut **tx)
        .await;

        match result {
            Ok(_) => {}
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                return Err(DomainError::AlreadyInitialized(record.resident_id));
            }
            Err(e) => return Err(DbError::from(e).into()),
        }

        Self::insert_entries(record.id, &record.actividades, tx).await
    }

    async fn create_all(&self, records: &[ProgressRecord]) -> DomainResult<()> {
        let mut tx = self.pool.begin().await.map_err(DbError::from)?;

        for record in records {
            if let Err(e) = self.create_with_tx(record, &mut tx).await {
                let _ = tx.rollback().await;
                return Err(e);
            }
        }

        tx.commit().await.map_err(DbError::from)?;
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> DomainResult<ProgressRecord> {
        let row = query_as::<_, ProgressRecordRow>("SELECT * FROM progress_records WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::from)?
            .ok_or_else(|| DomainError::EntityNotFound("ProgressRecord".to_string(), id))?;

        let actividades = self.load_entries(id).await?;
        row.into_entity(actividades)
    }

    async fn find_by_resident(&self, resident_id: Uuid) -> DomainResult<Vec<ProgressRecord>> {
        let rows = query_as::<_, ProgressRecordRow>(
            "SELECT pr.* FROM progress_records pr \
             JOIN phases ph ON ph.id = pr.phase_id \
             WHERE pr.resident_id = ? ORDER BY ph.numero ASC",
        )
        .bind(resident_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::from)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let record_id = Uuid::parse_str(&row.id)
                .map_err(|_| DomainError::InvalidUuid(row.id.clone()))?;
            let actividades = self.load_entries(record_id).await?;
            records.push(row.into_entity(actividades)?);
        }
        Ok(records)
    }

    async fn exists_for_resident(&self, resident_id: Uuid) -> DomainResult<bool> {
        let count: i64 = query_scalar("SELECT COUNT(*) FROM progress_records WHERE resident_id = ?")
            .bind(resident_id.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(DbError::from)?;

        Ok(count > 0)
    }

    async fn save(&self, record: &ProgressRecord) -> DomainResult<ProgressRecord> {
        let mut tx = self.pool.begin().await.map_err(DbError::from)?;
        let now = Utc::now();

        let result = query(
            "UPDATE progress_records SET estado_general = ?, fecha_fin = ?, validado_por = ?, \
             version = ?, updated_at = ? WHERE id = ? AND version = ?",
        )
        .bind(record.estado_general.as_str())
        .bind(record.fecha_fin.map(|d| d.to_rfc3339()))
        .bind(record.validado_por.map(|v| v.to_string()))
        .bind(record.version + 1)
        .bind(now.to_rfc3339())
        .bind(record.id.to_string())
        .bind(record.version)
        .execute(&mut *tx)
        .await
        .map_err(DbError::from)?;

        if result.rows_affected() == 0 {
            let _ = tx.rollback().await;
            let exists: i64 = query_scalar("SELECT COUNT(*) FROM progress_records WHERE id = ?")
                .bind(record.id.to_string())
                .fetch_one(&self.pool)
                .await
                .map_err(DbError::from)?;
            return if exists == 0 {
                Err(DomainError::EntityNotFound(
                    "ProgressRecord".to_string(),
                    record.id,
                ))
            } else {
                Err(DomainError::Conflict {
                    entity_type: "ProgressRecord".to_string(),
                    id: record.id,
                })
            };
        }

        // Embedded entries are rewritten wholesale with the parent
        query("DELETE FROM activity_progress WHERE record_id = ?")
            .bind(record.id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(DbError::from)?;

        Self::insert_entries(record.id, &record.actividades, &mut tx).await?;

        tx.commit().await.map_err(DbError::from)?;

        let mut saved = record.clone();
        saved.version = record.version + 1;
        saved.updated_at = now;
        Ok(saved)
    }

    async fn pending_validations(
        &self,
        filter: &ScopeFilter,
        params: PaginationParams,
    ) -> DomainResult<PaginatedResult<PendingValidation>> {
        let from = " FROM activity_progress ap \
                    JOIN progress_records pr ON pr.id = ap.record_id \
                    JOIN users u ON u.id = pr.resident_id \
                    JOIN phases ph ON ph.id = pr.phase_id \
                    JOIN activity_defs ad ON ad.id = ap.activity_def_id \
                    WHERE ap.estado = 'completado'";

        // Every filter value binds as TEXT, so the scope clause reduces to a
        // SQL fragment plus its string binds
        let (clause, binds): (&str, Vec<String>) = match filter {
            ScopeFilter::All => ("", vec![]),
            ScopeFilter::Hospital {
                hospital_id,
                specialty: Some(specialty),
            } => (
                " AND u.hospital_id = ? AND u.specialty = ?",
                vec![hospital_id.to_string(), specialty.clone()],
            ),
            ScopeFilter::Hospital {
                hospital_id,
                specialty: None,
            } => (" AND u.hospital_id = ?", vec![hospital_id.to_string()]),
            ScopeFilter::Zone(zone) => (
                " AND u.hospital_id IN (SELECT id FROM hospitals WHERE zone = ?)",
                vec![zone.clone()],
            ),
            ScopeFilter::Society(society_id) => {
                (" AND u.society_id = ?", vec![society_id.to_string()])
            }
        };

        let count_sql = format!("SELECT COUNT(*){}{}", from, clause);
        let mut count_query = query_scalar::<_, i64>(&count_sql);
        for bind in &binds {
            count_query = count_query.bind(bind);
        }
        let total = count_query
            .fetch_one(&self.pool)
            .await
            .map_err(DbError::from)?;

        let offset = (params.page.saturating_sub(1) as i64) * params.per_page as i64;
        let data_sql = format!(
            "SELECT pr.id AS record_id, pr.resident_id AS resident_id, \
             u.name AS resident_name, pr.phase_id AS phase_id, ph.name AS phase_name, \
             ap.activity_index AS activity_index, ap.activity_def_id AS activity_def_id, \
             ad.name AS activity_name, ap.fecha_realizacion AS fecha_realizacion, \
             ap.comentarios_residente AS comentarios_residente{}{} \
             ORDER BY ap.fecha_realizacion ASC, pr.id ASC, ap.activity_index ASC \
             LIMIT ? OFFSET ?",
            from, clause
        );
        let mut data_query = query(&data_sql);
        for bind in &binds {
            data_query = data_query.bind(bind);
        }
        let rows = data_query
            .bind(params.per_page as i64)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::from)?;

        let parse_uuid = |s: String| -> DomainResult<Uuid> {
            Uuid::parse_str(&s).map_err(|_| DomainError::InvalidUuid(s))
        };

        let items = rows
            .into_iter()
            .map(|row| {
                Ok(PendingValidation {
                    record_id: parse_uuid(row.get("record_id"))?,
                    resident_id: parse_uuid(row.get("resident_id"))?,
                    resident_name: row.get("resident_name"),
                    phase_id: parse_uuid(row.get("phase_id"))?,
                    phase_name: row.get("phase_name"),
                    activity_index: row.get("activity_index"),
                    activity_def_id: parse_uuid(row.get("activity_def_id"))?,
                    activity_name: row.get("activity_name"),
                    fecha_realizacion: row.get("fecha_realizacion"),
                    comentarios_residente: row.get("comentarios_residente"),
                })
            })
            .collect::<DomainResult<Vec<_>>>()?;

        Ok(PaginatedResult::new(items, total as u64, params))
    }

    async fn delete_for_resident(&self, resident_id: Uuid) -> DomainResult<u64> {
        let mut tx = self.pool.begin().await.map_err(DbError::from)?;
        match self.delete_for_resident_with_tx(resident_id, &mut tx).await {
            Ok(removed) => {
                tx.commit().await.map_err(DbError::from)?;
                Ok(removed)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }

    async fn delete_for_resident_with_tx<'t>(
        &self,
        resident_id: Uuid,
        tx: &mut Transaction<'t, Sqlite>,
    ) -> DomainResult<u64> {
        query(
            "DELETE FROM activity_progress WHERE record_id IN \
             (SELECT id FROM progress_records WHERE resident_id = ?)",
        )
        .bind(resident_id.to_string())
        .execute(&mut **tx)
        .await
        .map_err(DbError::from)?;

        let result = query("DELETE FROM progress_records WHERE resident_id = ?")
            .bind(resident_id.to_string())
            .execute(&mut **tx)
            .await
            .map_err(DbError::from)?;

        Ok(result.rows_affected())
    }

    async fn delete_for_hospital(&self, hospital_id: Uuid) -> DomainResult<u64> {
        let mut tx = self.pool.begin().await.map_err(DbError::from)?;

        let result = async {
            query(
                "DELETE FROM activity_progress WHERE record_id IN \
                 (SELECT pr.id FROM progress_records pr \
                  JOIN users u ON u.id = pr.resident_id WHERE u.hospital_id = ?)",
            )
            .bind(hospital_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(DbError::from)?;

            let result = query(
                "DELETE FROM progress_records WHERE resident_id IN \
                 (SELECT id FROM users WHERE hospital_id = ?)",
            )
            .bind(hospital_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(DbError::from)?;

            Ok::<u64, DomainError>(result.rows_affected())
        }
        .await;

        match result {
            Ok(removed) => {
                tx.commit().await.map_err(DbError::from)?;
                Ok(removed)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }

    async fn delete_for_phase_with_tx<'t>(
        &self,
        phase_id: Uuid,
        tx: &mut Transaction<'t, Sqlite>,
    ) -> DomainResult<u64> {
        // Validated records are history and survive the phase
        query(
            "DELETE FROM activity_progress WHERE record_id IN \
             (SELECT id FROM progress_records WHERE phase_id = ? AND estado_general != 'validado')",
        )
        .bind(phase_id.to_string())
        .execute(&mut **tx)
        .await
        .map_err(DbError::from)?;

        let result = query(
            "DELETE FROM progress_records WHERE phase_id = ? AND estado_general != 'validado'",
        )
        .bind(phase_id.to_string())
        .execute(&mut **tx)
        .await
        .map_err(DbError::from)?;

        Ok(result.rows_affected())
    }

    async fn remove_activity_entries_with_tx<'t>(
        &self,
        activity_def_id: Uuid,
        tx: &mut Transaction<'t, Sqlite>,
    ) -> DomainResult<u64> {
        let affected = query(
            "SELECT DISTINCT ap.record_id FROM activity_progress ap \
             JOIN progress_records pr ON pr.id = ap.record_id \
             WHERE ap.activity_def_id = ? AND pr.estado_general != 'validado'",
        )
        .bind(activity_def_id.to_string())
        .fetch_all(&mut **tx)
        .await
        .map_err(DbError::from)?;

        let result = query(
            "DELETE FROM activity_progress WHERE activity_def_id = ? AND record_id IN \
             (SELECT id FROM progress_records WHERE estado_general != 'validado')",
        )
        .bind(activity_def_id.to_string())
        .execute(&mut **tx)
        .await
        .map_err(DbError::from)?;

        // Compact the surviving indices of each touched record and bump its
        // version so concurrent writers lose their race
        let now = Utc::now().to_rfc3339();
        for row in affected {
            let record_id: String = row.get("record_id");

            let entries = query_as::<_, ActivityProgressRow>(
                "SELECT * FROM activity_progress WHERE record_id = ? ORDER BY activity_index ASC",
            )
            .bind(&record_id)
            .fetch_all(&mut **tx)
            .await
            .map_err(DbError::from)?;

            query("DELETE FROM activity_progress WHERE record_id = ?")
                .bind(&record_id)
                .execute(&mut **tx)
                .await
                .map_err(DbError::from)?;

            for (index, entry) in entries.into_iter().enumerate() {
                query(
                    "INSERT INTO activity_progress (record_id, activity_index, activity_def_id, \
                     estado, comentarios_residente, comentarios_tutor, comentarios_rechazo, \
                     firma_digital, fecha_realizacion, fecha_validacion, fecha_rechazo, cirugia, \
                     otra_cirugia, nombre_cirujano, porcentaje_participacion) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(&record_id)
                .bind(index as i64)
                .bind(&entry.activity_def_id)
                .bind(&entry.estado)
                .bind(&entry.comentarios_residente)
                .bind(&entry.comentarios_tutor)
                .bind(&entry.comentarios_rechazo)
                .bind(&entry.firma_digital)
                .bind(&entry.fecha_realizacion)
                .bind(&entry.fecha_validacion)
                .bind(&entry.fecha_rechazo)
                .bind(&entry.cirugia)
                .bind(&entry.otra_cirugia)
                .bind(&entry.nombre_cirujano)
                .bind(entry.porcentaje_participacion)
                .execute(&mut **tx)
                .await
                .map_err(DbError::from)?;
            }

            query("UPDATE progress_records SET version = version + 1, updated_at = ? WHERE id = ?")
                .bind(&now)
                .bind(&record_id)
                .execute(&mut **tx)
                .await
                .map_err(DbError::from)?;
        }

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::progress::types::{ActivityStatus, PhaseStatus};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_pool() -> SqlitePool {
        let _ = env_logger::builder().is_test(true).try_init();

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::db_migration::initialize_database(&pool).await.unwrap();
        pool
    }

    struct Seed {
        hospital_id: Uuid,
        resident_id: Uuid,
        phase_id: Uuid,
        def_ids: Vec<Uuid>,
    }

    async fn seed_org(pool: &SqlitePool, def_count: usize) -> Seed {
        let hospital_id = Uuid::new_v4();
        let resident_id = Uuid::new_v4();
        let phase_id = Uuid::new_v4();
        let now = Utc::now().to_rfc3339();

        query("INSERT INTO hospitals (id, name, zone, created_at, updated_at) VALUES (?, ?, ?, ?, ?)")
            .bind(hospital_id.to_string())
            .bind("Hospital Central")
            .bind("norte")
            .bind(&now)
            .bind(&now)
            .execute(pool)
            .await
            .unwrap();

        query(
            "INSERT INTO users (id, name, email, role, hospital_id, zone, specialty, program_type, \
             created_at, updated_at) VALUES (?, ?, ?, 'residente', ?, 'norte', 'Urology', \
             'residentes', ?, ?)",
        )
        .bind(resident_id.to_string())
        .bind("Ana Ruiz")
        .bind(format!("{}@example.com", resident_id))
        .bind(hospital_id.to_string())
        .bind(&now)
        .bind(&now)
        .execute(pool)
        .await
        .unwrap();

        query(
            "INSERT INTO phases (id, numero, name, program_type, created_at, updated_at) \
             VALUES (?, 1, 'Fase 1', 'residentes', ?, ?)",
        )
        .bind(phase_id.to_string())
        .bind(&now)
        .bind(&now)
        .execute(pool)
        .await
        .unwrap();

        let mut def_ids = Vec::new();
        for orden in 1..=def_count as i64 {
            let def_id = Uuid::new_v4();
            query(
                "INSERT INTO activity_defs (id, phase_id, orden, name, kind, requires_validation, \
                 created_at, updated_at) VALUES (?, ?, ?, ?, 'practica', 1, ?, ?)",
            )
            .bind(def_id.to_string())
            .bind(phase_id.to_string())
            .bind(orden)
            .bind(format!("Actividad {}", orden))
            .bind(&now)
            .bind(&now)
            .execute(pool)
            .await
            .unwrap();
            def_ids.push(def_id);
        }

        Seed {
            hospital_id,
            resident_id,
            phase_id,
            def_ids,
        }
    }

    fn make_record(seed: &Seed) -> ProgressRecord {
        ProgressRecord::new(
            seed.resident_id,
            seed.phase_id,
            PhaseStatus::InProgress,
            seed.def_ids
                .iter()
                .map(|id| ActivityProgress::new_pending(*id))
                .collect(),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_create_and_find_round_trip() {
        let pool = test_pool().await;
        let repo = SqliteProgressRepository::new(pool.clone());
        let seed = seed_org(&pool, 2).await;

        let record = make_record(&seed);
        repo.create_all(std::slice::from_ref(&record)).await.unwrap();

        let loaded = repo.find_by_id(record.id).await.unwrap();
        assert_eq!(loaded.resident_id, seed.resident_id);
        assert_eq!(loaded.estado_general, PhaseStatus::InProgress);
        assert_eq!(loaded.actividades.len(), 2);
        assert_eq!(loaded.actividades[0].activity_def_id, seed.def_ids[0]);
        assert_eq!(loaded.actividades[1].activity_def_id, seed.def_ids[1]);
        assert_eq!(loaded.version, 0);

        assert!(repo.exists_for_resident(seed.resident_id).await.unwrap());
        assert!(!repo.exists_for_resident(Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn test_save_bumps_version_and_detects_stale_writer() {
        let pool = test_pool().await;
        let repo = SqliteProgressRepository::new(pool.clone());
        let seed = seed_org(&pool, 1).await;

        let record = make_record(&seed);
        repo.create_all(std::slice::from_ref(&record)).await.unwrap();

        let mut loaded = repo.find_by_id(record.id).await.unwrap();
        loaded.actividades[0].estado = ActivityStatus::Completed;
        loaded.actividades[0].fecha_realizacion = Some(Utc::now());

        let saved = repo.save(&loaded).await.unwrap();
        assert_eq!(saved.version, 1);

        let reloaded = repo.find_by_id(record.id).await.unwrap();
        assert_eq!(reloaded.actividades[0].estado, ActivityStatus::Completed);
        assert_eq!(reloaded.version, 1);

        // A writer still holding version 0 loses the race
        let err = repo.save(&loaded).await.unwrap_err();
        assert!(matches!(err, DomainError::Conflict { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_save_missing_record_is_not_found() {
        let pool = test_pool().await;
        let repo = SqliteProgressRepository::new(pool.clone());
        let seed = seed_org(&pool, 1).await;

        let record = make_record(&seed);
        let err = repo.save(&record).await.unwrap_err();
        assert!(matches!(err, DomainError::EntityNotFound(_, _)));
    }

    #[tokio::test]
    async fn test_duplicate_resident_phase_pair_rejected() {
        let pool = test_pool().await;
        let repo = SqliteProgressRepository::new(pool.clone());
        let seed = seed_org(&pool, 1).await;

        let record = make_record(&seed);
        repo.create_all(std::slice::from_ref(&record)).await.unwrap();

        let duplicate = make_record(&seed);
        let err = repo.create_all(std::slice::from_ref(&duplicate)).await.unwrap_err();
        assert!(matches!(err, DomainError::AlreadyInitialized(id) if id == seed.resident_id));

        // The failed bulk write left nothing behind
        assert!(repo.find_by_id(duplicate.id).await.is_err());
    }

    #[tokio::test]
    async fn test_pending_validations_scope_filters() {
        let pool = test_pool().await;
        let repo = SqliteProgressRepository::new(pool.clone());
        let seed = seed_org(&pool, 2).await;

        let record = make_record(&seed);
        repo.create_all(std::slice::from_ref(&record)).await.unwrap();

        let mut loaded = repo.find_by_id(record.id).await.unwrap();
        loaded.actividades[1].estado = ActivityStatus::Completed;
        loaded.actividades[1].fecha_realizacion = Some(Utc::now());
        loaded.actividades[1].comentarios_residente = Some("Hecha".to_string());
        repo.save(&loaded).await.unwrap();

        let params = PaginationParams::default();

        // Hospital window sees the completed entry
        let filter = ScopeFilter::Hospital {
            hospital_id: seed.hospital_id,
            specialty: None,
        };
        let pending = repo.pending_validations(&filter, params).await.unwrap();
        assert_eq!(pending.total, 1);
        assert_eq!(pending.items.len(), 1);
        assert_eq!(pending.items[0].record_id, record.id);
        assert_eq!(pending.items[0].activity_index, 1);
        assert_eq!(pending.items[0].resident_name, "Ana Ruiz");
        assert_eq!(pending.items[0].activity_name, "Actividad 2");

        // Specialty narrowing
        let filter = ScopeFilter::Hospital {
            hospital_id: seed.hospital_id,
            specialty: Some("Urology".to_string()),
        };
        assert_eq!(repo.pending_validations(&filter, params).await.unwrap().total, 1);

        let filter = ScopeFilter::Hospital {
            hospital_id: seed.hospital_id,
            specialty: Some("Cardiology".to_string()),
        };
        assert_eq!(repo.pending_validations(&filter, params).await.unwrap().total, 0);

        // Foreign hospital sees nothing
        let filter = ScopeFilter::Hospital {
            hospital_id: Uuid::new_v4(),
            specialty: None,
        };
        assert_eq!(repo.pending_validations(&filter, params).await.unwrap().total, 0);

        // Zone window resolves through the hospital
        assert_eq!(
            repo.pending_validations(&ScopeFilter::Zone("norte".to_string()), params)
                .await
                .unwrap()
                .total,
            1
        );
        assert_eq!(
            repo.pending_validations(&ScopeFilter::Zone("sur".to_string()), params)
                .await
                .unwrap()
                .total,
            0
        );

        // No society on the resident, so every society window is empty
        assert_eq!(
            repo.pending_validations(&ScopeFilter::Society(Uuid::new_v4()), params)
                .await
                .unwrap()
                .total,
            0
        );

        let all = repo.pending_validations(&ScopeFilter::All, params).await.unwrap();
        assert_eq!(all.total, 1);
        assert_eq!(all.total_pages, 1);

        // A page past the end is empty but keeps the total
        let page2 = repo
            .pending_validations(&ScopeFilter::All, PaginationParams { page: 2, per_page: 20 })
            .await
            .unwrap();
        assert_eq!(page2.total, 1);
        assert!(page2.items.is_empty());
    }

    #[tokio::test]
    async fn test_delete_for_phase_preserves_validated_history() {
        let pool = test_pool().await;
        let repo = SqliteProgressRepository::new(pool.clone());
        let seed = seed_org(&pool, 1).await;

        // Second resident in the same phase
        let other_resident = Uuid::new_v4();
        let now = Utc::now().to_rfc3339();
        query(
            "INSERT INTO users (id, name, email, role, hospital_id, zone, specialty, program_type, \
             created_at, updated_at) VALUES (?, ?, ?, 'residente', ?, 'norte', 'Urology', \
             'residentes', ?, ?)",
        )
        .bind(other_resident.to_string())
        .bind("Luis Gil")
        .bind(format!("{}@example.com", other_resident))
        .bind(seed.hospital_id.to_string())
        .bind(&now)
        .bind(&now)
        .execute(&pool)
        .await
        .unwrap();

        let open_record = make_record(&seed);
        let mut validated_record = ProgressRecord::new(
            other_resident,
            seed.phase_id,
            PhaseStatus::Validated,
            vec![{
                let mut e = ActivityProgress::new_pending(seed.def_ids[0]);
                e.estado = ActivityStatus::Validated;
                e
            }],
            Utc::now(),
        );
        validated_record.validado_por = Some(Uuid::new_v4());
        repo.create_all(&[open_record.clone(), validated_record.clone()])
            .await
            .unwrap();

        let mut tx = pool.begin().await.unwrap();
        let removed = repo
            .delete_for_phase_with_tx(seed.phase_id, &mut tx)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(removed, 1);
        assert!(repo.find_by_id(open_record.id).await.is_err());
        assert!(repo.find_by_id(validated_record.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_remove_activity_entries_compacts_indices() {
        let pool = test_pool().await;
        let repo = SqliteProgressRepository::new(pool.clone());
        let seed = seed_org(&pool, 3).await;

        let record = make_record(&seed);
        repo.create_all(std::slice::from_ref(&record)).await.unwrap();

        let mut tx = pool.begin().await.unwrap();
        let removed = repo
            .remove_activity_entries_with_tx(seed.def_ids[1], &mut tx)
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(removed, 1);

        let loaded = repo.find_by_id(record.id).await.unwrap();
        assert_eq!(loaded.actividades.len(), 2);
        assert_eq!(loaded.actividades[0].activity_def_id, seed.def_ids[0]);
        assert_eq!(loaded.actividades[1].activity_def_id, seed.def_ids[2]);
        // Concurrent writers holding the old version lose their race
        assert_eq!(loaded.version, record.version + 1);
    }

    #[tokio::test]
    async fn test_remove_activity_entries_skips_validated_records() {
        let pool = test_pool().await;
        let repo = SqliteProgressRepository::new(pool.clone());
        let seed = seed_org(&pool, 2).await;

        let mut record = make_record(&seed);
        record.estado_general = PhaseStatus::Validated;
        for entry in &mut record.actividades {
            entry.estado = ActivityStatus::Validated;
        }
        repo.create_all(std::slice::from_ref(&record)).await.unwrap();

        let mut tx = pool.begin().await.unwrap();
        let removed = repo
            .remove_activity_entries_with_tx(seed.def_ids[0], &mut tx)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(removed, 0);
        let loaded = repo.find_by_id(record.id).await.unwrap();
        assert_eq!(loaded.actividades.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_for_resident_removes_records_and_entries() {
        let pool = test_pool().await;
        let repo = SqliteProgressRepository::new(pool.clone());
        let seed = seed_org(&pool, 2).await;

        let record = make_record(&seed);
        repo.create_all(std::slice::from_ref(&record)).await.unwrap();

        let removed = repo.delete_for_resident(seed.resident_id).await.unwrap();
        assert_eq!(removed, 1);
        assert!(repo.find_by_id(record.id).await.is_err());

        let orphaned: i64 = query_scalar("SELECT COUNT(*) FROM activity_progress WHERE record_id = ?")
            .bind(record.id.to_string())
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(orphaned, 0);
    }

    #[tokio::test]
    async fn test_delete_for_hospital_cascade() {
        let pool = test_pool().await;
        let repo = SqliteProgressRepository::new(pool.clone());
        let seed = seed_org(&pool, 1).await;

        let record = make_record(&seed);
        repo.create_all(std::slice::from_ref(&record)).await.unwrap();

        let removed = repo.delete_for_hospital(seed.hospital_id).await.unwrap();
        assert_eq!(removed, 1);
        assert!(repo.find_by_id(record.id).await.is_err());
    }
}
