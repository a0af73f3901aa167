use std::sync::Arc;

// Public modules
pub mod auth;
pub mod domains;
pub mod errors;
pub mod types;
pub mod utils;
pub mod validation;

// Private modules
mod db_migration;

use domains::attachment::{AttachmentStore, NullAttachmentStore};
use domains::catalog::repository::SqliteCatalogRepository;
use domains::progress::events::{LoggingDispatcher, NotificationDispatcher};
use domains::progress::repository::SqliteProgressRepository;
use domains::progress::service::{ProgressService, ProgressServiceImpl};
use domains::user::repository::SqliteUserRepository;
use domains::user::service::{UserService, UserServiceImpl};
use errors::DbResult;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use utils::{SystemTimeSource, TimeSource};

/// Connect to the database and apply pending migrations.
/// This must run before any repository is used.
pub async fn init_db(database_url: &str) -> DbResult<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    db_migration::initialize_database(&pool).await?;
    Ok(pool)
}

/// Wired collaborators the embedding application can override per concern.
pub struct CoreServices {
    pub progress: Arc<dyn ProgressService>,
    pub users: Arc<dyn UserService>,
}

/// Build the workflow services with the default collaborators: logging
/// notification dispatcher, empty attachment store, wall-clock time source.
pub fn build_services(pool: SqlitePool) -> CoreServices {
    build_services_with(
        pool,
        Arc::new(NullAttachmentStore),
        Arc::new(LoggingDispatcher),
        Arc::new(SystemTimeSource),
    )
}

/// Build the workflow services with explicit collaborators.
pub fn build_services_with(
    pool: SqlitePool,
    attachments: Arc<dyn AttachmentStore>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    clock: Arc<dyn TimeSource>,
) -> CoreServices {
    let user_repo = Arc::new(SqliteUserRepository::new(pool.clone()));
    let catalog_repo = Arc::new(SqliteCatalogRepository::new(pool.clone()));
    let progress_repo = Arc::new(SqliteProgressRepository::new(pool.clone()));

    let progress: Arc<dyn ProgressService> = Arc::new(ProgressServiceImpl::new(
        progress_repo.clone(),
        catalog_repo,
        user_repo.clone(),
        attachments,
        dispatcher,
        clock,
    ));

    let users: Arc<dyn UserService> = Arc::new(UserServiceImpl::new(
        pool,
        user_repo,
        progress_repo,
        progress.clone(),
    ));

    CoreServices { progress, users }
}
