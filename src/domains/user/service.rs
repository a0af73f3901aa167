use crate::auth::AuthContext;
use crate::domains::permission::{can_act, ScopeAction};
use crate::domains::progress::repository::ProgressRepository;
use crate::domains::progress::service::ProgressService;
use crate::domains::user::repository::UserRepository;
use crate::domains::user::types::{NewUser, UpdateUser, UserResponse};
use crate::errors::{DbError, DomainError, ServiceError, ServiceResult};
use crate::validation::{validate_unique, Validate};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

/// Trait defining user service operations
#[async_trait]
pub trait UserService: Send + Sync {
    /// Invitation-acceptance flow: create the user and, for trainees,
    /// bulk-initialize their progress records.
    async fn provision_user(&self, new_user: NewUser, auth: &AuthContext)
        -> ServiceResult<UserResponse>;

    async fn get_user(&self, id: Uuid, auth: &AuthContext) -> ServiceResult<UserResponse>;

    async fn update_user(
        &self,
        id: Uuid,
        update: UpdateUser,
        auth: &AuthContext,
    ) -> ServiceResult<UserResponse>;

    /// Delete a user and cascade-delete their progress records.
    /// Returns the number of records removed.
    async fn delete_user(&self, id: Uuid, auth: &AuthContext) -> ServiceResult<u64>;
}

/// Implementation of the user service
#[derive(Clone)]
pub struct UserServiceImpl {
    pool: SqlitePool,
    repo: Arc<dyn UserRepository>,
    progress_repo: Arc<dyn ProgressRepository>,
    progress_service: Arc<dyn ProgressService>,
}

impl UserServiceImpl {
    pub fn new(
        pool: SqlitePool,
        repo: Arc<dyn UserRepository>,
        progress_repo: Arc<dyn ProgressRepository>,
        progress_service: Arc<dyn ProgressService>,
    ) -> Self {
        Self {
            pool,
            repo,
            progress_repo,
            progress_service,
        }
    }
}

#[async_trait]
impl UserService for UserServiceImpl {
    async fn provision_user(
        &self,
        new_user: NewUser,
        auth: &AuthContext,
    ) -> ServiceResult<UserResponse> {
        auth.authorize_admin()?;
        new_user.validate()?;

        validate_unique(&self.pool, "users", "email", &new_user.email, None, "email").await?;

        let user = self.repo.create(&new_user).await?;
        log::info!("User {} provisioned with role {}", user.id, user.role.as_str());

        if user.is_trainee() {
            self.progress_service.initialize_progress(user.id, auth).await?;
        }

        Ok(user.into())
    }

    async fn get_user(&self, id: Uuid, auth: &AuthContext) -> ServiceResult<UserResponse> {
        let profile = self.repo.resolve(id).await?;
        if !can_act(&auth.scope(), &profile.subject_scope(), ScopeAction::View) {
            return Err(ServiceError::PermissionDenied(
                "You do not have permission to view this user".to_string(),
            ));
        }

        let user = self.repo.find_by_id(id).await?;
        Ok(user.into())
    }

    async fn update_user(
        &self,
        id: Uuid,
        update: UpdateUser,
        auth: &AuthContext,
    ) -> ServiceResult<UserResponse> {
        update.validate()?;

        let profile = self.repo.resolve(id).await?;
        if !can_act(&auth.scope(), &profile.subject_scope(), ScopeAction::EditUser) {
            return Err(ServiceError::PermissionDenied(
                "You do not have permission to edit this user".to_string(),
            ));
        }

        if update.is_empty_update() {
            let user = self.repo.find_by_id(id).await?;
            return Ok(user.into());
        }

        if let Some(email) = &update.email {
            let exclude = id.to_string();
            validate_unique(&self.pool, "users", "email", email, Some(exclude.as_str()), "email")
                .await?;
        }

        let user = self.repo.update(id, &update).await?;
        Ok(user.into())
    }

    async fn delete_user(&self, id: Uuid, auth: &AuthContext) -> ServiceResult<u64> {
        auth.authorize_admin()?;

        // Confirm existence before opening the transaction
        self.repo.find_by_id(id).await?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DomainError::Database(DbError::from(e)))?;

        let result = async {
            let removed = self
                .progress_repo
                .delete_for_resident_with_tx(id, &mut tx)
                .await?;
            self.repo.delete_with_tx(id, &mut tx).await?;
            Ok::<u64, DomainError>(removed)
        }
        .await;

        match result {
            Ok(removed) => {
                tx.commit()
                    .await
                    .map_err(|e| DomainError::Database(DbError::from(e)))?;
                log::info!("User {} deleted, {} progress records removed", id, removed);
                Ok(removed)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e.into())
            }
        }
    }
}
