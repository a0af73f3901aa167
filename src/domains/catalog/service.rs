use crate::auth::AuthContext;
use crate::domains::catalog::repository::CatalogRepository;
use crate::domains::catalog::types::{ActivityDef, NewActivityDef, NewPhase, Phase};
use crate::domains::progress::repository::ProgressRepository;
use crate::errors::{DbError, DomainError, ServiceResult};
use crate::validation::Validate;
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

/// Trait defining catalog service operations.
///
/// Reference-data CRUD proper lives outside the core; what belongs here is
/// the deletion side, because catalog deletes cascade into progress records
/// under the rules the record store enforces.
#[async_trait]
pub trait CatalogService: Send + Sync {
    async fn create_phase(&self, new_phase: NewPhase, auth: &AuthContext) -> ServiceResult<Phase>;

    async fn create_activity(
        &self,
        new_activity: NewActivityDef,
        auth: &AuthContext,
    ) -> ServiceResult<ActivityDef>;

    /// Delete a catalog activity and strip the matching embedded entry from
    /// every progress record that is not yet validated.
    async fn delete_activity(&self, id: Uuid, auth: &AuthContext) -> ServiceResult<()>;

    /// Delete a phase. Blocked while catalog activities reference it;
    /// cascades to the phase's progress records, preserving validated ones.
    async fn delete_phase(&self, id: Uuid, auth: &AuthContext) -> ServiceResult<()>;
}

/// Implementation of the catalog service
#[derive(Clone)]
pub struct CatalogServiceImpl {
    pool: SqlitePool,
    repo: Arc<dyn CatalogRepository>,
    progress_repo: Arc<dyn ProgressRepository>,
}

impl CatalogServiceImpl {
    pub fn new(
        pool: SqlitePool,
        repo: Arc<dyn CatalogRepository>,
        progress_repo: Arc<dyn ProgressRepository>,
    ) -> Self {
        Self {
            pool,
            repo,
            progress_repo,
        }
    }
}

#[async_trait]
impl CatalogService for CatalogServiceImpl {
    async fn create_phase(&self, new_phase: NewPhase, auth: &AuthContext) -> ServiceResult<Phase> {
        auth.authorize_admin()?;
        new_phase.validate()?;

        let phase = self.repo.create_phase(&new_phase).await?;
        log::info!("Phase {} ({}) created", phase.id, phase.name);
        Ok(phase)
    }

    async fn create_activity(
        &self,
        new_activity: NewActivityDef,
        auth: &AuthContext,
    ) -> ServiceResult<ActivityDef> {
        auth.authorize_admin()?;
        new_activity.validate()?;

        // The phase must exist before an activity can hang off it
        self.repo.find_phase_by_id(new_activity.phase_id).await?;

        let def = self.repo.create_activity(&new_activity).await?;
        log::info!("Catalog activity {} ({}) created in phase {}", def.id, def.name, def.phase_id);
        Ok(def)
    }

    async fn delete_activity(&self, id: Uuid, auth: &AuthContext) -> ServiceResult<()> {
        auth.authorize_admin()?;

        let def = self.repo.find_activity_by_id(id).await?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DomainError::Database(DbError::from(e)))?;

        let result = async {
            let stripped = self
                .progress_repo
                .remove_activity_entries_with_tx(def.id, &mut tx)
                .await?;
            self.repo.delete_activity_with_tx(id, &mut tx).await?;
            Ok::<u64, DomainError>(stripped)
        }
        .await;

        match result {
            Ok(stripped) => {
                tx.commit()
                    .await
                    .map_err(|e| DomainError::Database(DbError::from(e)))?;
                log::info!(
                    "Catalog activity {} deleted, {} embedded entries stripped",
                    id,
                    stripped
                );
                Ok(())
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e.into())
            }
        }
    }

    async fn delete_phase(&self, id: Uuid, auth: &AuthContext) -> ServiceResult<()> {
        auth.authorize_admin()?;

        let phase = self.repo.find_phase_by_id(id).await?;

        let activity_count = self.repo.count_activities_for_phase(id).await?;
        if activity_count > 0 {
            return Err(DomainError::DependentRecordsExist {
                entity_type: "Phase".to_string(),
                id,
                dependencies: vec!["activity_defs".to_string()],
            }
            .into());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DomainError::Database(DbError::from(e)))?;

        let result = async {
            let removed = self
                .progress_repo
                .delete_for_phase_with_tx(id, &mut tx)
                .await?;
            self.repo.delete_phase_with_tx(id, &mut tx).await?;
            Ok::<u64, DomainError>(removed)
        }
        .await;

        match result {
            Ok(removed) => {
                tx.commit()
                    .await
                    .map_err(|e| DomainError::Database(DbError::from(e)))?;
                log::info!(
                    "Phase {} ({}) deleted, {} non-validated progress records removed",
                    id,
                    phase.name,
                    removed
                );
                Ok(())
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e.into())
            }
        }
    }
}
