use crate::domains::permission::Role;
use crate::domains::user::types::{NewUser, UpdateUser, User, UserProfile, UserRow};
use crate::errors::{DbError, DomainError, DomainResult};
use crate::types::ProgramType;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{query, query_as, query_scalar, Row, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

/// Directory lookup used by the workflow coordinator to resolve a record
/// owner's organizational affiliation. Back-references stay opaque ids; the
/// directory is the only place they are turned into data.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn resolve(&self, user_id: Uuid) -> DomainResult<UserProfile>;
}

/// Trait defining user repository operations
#[async_trait]
pub trait UserRepository: UserDirectory + Send + Sync {
    async fn create(&self, new_user: &NewUser) -> DomainResult<User>;
    async fn create_with_tx<'t>(
        &self,
        new_user: &NewUser,
        tx: &mut Transaction<'t, Sqlite>,
    ) -> DomainResult<User>;

    async fn find_by_id(&self, id: Uuid) -> DomainResult<User>;
    async fn find_by_email(&self, email: &str) -> DomainResult<User>;

    async fn update(&self, id: Uuid, update: &UpdateUser) -> DomainResult<User>;

    async fn delete_with_tx<'t>(
        &self,
        id: Uuid,
        tx: &mut Transaction<'t, Sqlite>,
    ) -> DomainResult<()>;

    /// Resident/participant ids attached to a hospital, used by cascades
    async fn trainee_ids_for_hospital(&self, hospital_id: Uuid) -> DomainResult<Vec<Uuid>>;
}

/// SQLite implementation for UserRepository
#[derive(Debug, Clone)]
pub struct SqliteUserRepository {
    pool: SqlitePool,
}

impl SqliteUserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_row_to_entity(row: UserRow) -> DomainResult<User> {
        row.into_entity()
    }

    async fn hospital_zone(&self, hospital_id: Uuid) -> DomainResult<Option<String>> {
        let zone: Option<String> = query_scalar("SELECT zone FROM hospitals WHERE id = ?")
            .bind(hospital_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::from)?;
        Ok(zone)
    }
}

#[async_trait]
impl UserDirectory for SqliteUserRepository {
    async fn resolve(&self, user_id: Uuid) -> DomainResult<UserProfile> {
        let row = query(
            "SELECT u.id, u.name, u.role, u.hospital_id, u.specialty, u.society_id, \
             u.program_type, h.zone AS hospital_zone \
             FROM users u LEFT JOIN hospitals h ON h.id = u.hospital_id \
             WHERE u.id = ?",
        )
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::from)?
        .ok_or_else(|| DomainError::EntityNotFound("User".to_string(), user_id))?;

        let id_str: String = row.get("id");
        let role_str: String = row.get("role");
        let hospital_id: Option<String> = row.get("hospital_id");
        let society_id: Option<String> = row.get("society_id");
        let program_type_str: String = row.get("program_type");

        Ok(UserProfile {
            user_id: Uuid::parse_str(&id_str).map_err(|_| DomainError::InvalidUuid(id_str))?,
            name: row.get("name"),
            role: Role::from_str(&role_str)
                .ok_or_else(|| DomainError::Internal(format!("Invalid role: {}", role_str)))?,
            hospital_id: hospital_id
                .map(|h| Uuid::parse_str(&h).map_err(|_| DomainError::InvalidUuid(h)))
                .transpose()?,
            hospital_zone: row.get("hospital_zone"),
            specialty: row.get("specialty"),
            society_id: society_id
                .map(|s| Uuid::parse_str(&s).map_err(|_| DomainError::InvalidUuid(s)))
                .transpose()?,
            program_type: ProgramType::from_str(&program_type_str).ok_or_else(|| {
                DomainError::Internal(format!("Invalid program type: {}", program_type_str))
            })?,
        })
    }
}

#[async_trait]
impl UserRepository for SqliteUserRepository {
    async fn create(&self, new_user: &NewUser) -> DomainResult<User> {
        let mut tx = self.pool.begin().await.map_err(DbError::from)?;
        match self.create_with_tx(new_user, &mut tx).await {
            Ok(user) => {
                tx.commit().await.map_err(DbError::from)?;
                Ok(user)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }

    async fn create_with_tx<'t>(
        &self,
        new_user: &NewUser,
        tx: &mut Transaction<'t, Sqlite>,
    ) -> DomainResult<User> {
        let id = Uuid::new_v4();
        let now = Utc::now().to_rfc3339();

        // Denormalize the hospital zone onto the user row at assignment time
        let zone = match new_user.hospital_id {
            Some(hospital_id) => {
                let zone: Option<String> = query_scalar("SELECT zone FROM hospitals WHERE id = ?")
                    .bind(hospital_id.to_string())
                    .fetch_optional(&mut **tx)
                    .await
                    .map_err(DbError::from)?;
                match zone {
                    Some(z) => Some(z),
                    None => {
                        return Err(DomainError::EntityNotFound(
                            "Hospital".to_string(),
                            hospital_id,
                        ))
                    }
                }
            }
            None => None,
        };

        query(
            "INSERT INTO users (id, name, email, role, hospital_id, zone, specialty, \
             society_id, tutor_id, program_type, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(&new_user.name)
        .bind(&new_user.email)
        .bind(&new_user.role)
        .bind(new_user.hospital_id.map(|h| h.to_string()))
        .bind(&zone)
        .bind(&new_user.specialty)
        .bind(new_user.society_id.map(|s| s.to_string()))
        .bind(new_user.tutor_id.map(|t| t.to_string()))
        .bind(&new_user.program_type)
        .bind(&now)
        .bind(&now)
        .execute(&mut **tx)
        .await
        .map_err(DbError::from)?;

        let row = query_as::<_, UserRow>("SELECT * FROM users WHERE id = ?")
            .bind(id.to_string())
            .fetch_one(&mut **tx)
            .await
            .map_err(DbError::from)?;

        Self::map_row_to_entity(row)
    }

    async fn find_by_id(&self, id: Uuid) -> DomainResult<User> {
        let row = query_as::<_, UserRow>("SELECT * FROM users WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::from)?
            .ok_or_else(|| DomainError::EntityNotFound("User".to_string(), id))?;

        Self::map_row_to_entity(row)
    }

    async fn find_by_email(&self, email: &str) -> DomainResult<User> {
        let row = query_as::<_, UserRow>("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::from)?
            .ok_or_else(|| {
                DomainError::Database(DbError::NotFound("User".to_string(), email.to_string()))
            })?;

        Self::map_row_to_entity(row)
    }

    async fn update(&self, id: Uuid, update: &UpdateUser) -> DomainResult<User> {
        let existing = self.find_by_id(id).await?;
        let now = Utc::now().to_rfc3339();

        let name = update.name.clone().unwrap_or(existing.name);
        let email = update.email.clone().unwrap_or(existing.email);
        let hospital_id = update.hospital_id.or(existing.hospital_id);
        let specialty = update.specialty.clone().or(existing.specialty);
        let tutor_id = update.tutor_id.or(existing.tutor_id);

        // Re-derive the denormalized zone if the hospital changed
        let zone = match hospital_id {
            Some(h) if update.hospital_id.is_some() => self.hospital_zone(h).await?,
            _ => existing.zone,
        };

        query(
            "UPDATE users SET name = ?, email = ?, hospital_id = ?, zone = ?, specialty = ?, \
             tutor_id = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&name)
        .bind(&email)
        .bind(hospital_id.map(|h| h.to_string()))
        .bind(&zone)
        .bind(&specialty)
        .bind(tutor_id.map(|t| t.to_string()))
        .bind(&now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(DbError::from)?;

        self.find_by_id(id).await
    }

    async fn delete_with_tx<'t>(
        &self,
        id: Uuid,
        tx: &mut Transaction<'t, Sqlite>,
    ) -> DomainResult<()> {
        let result = query("DELETE FROM users WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut **tx)
            .await
            .map_err(DbError::from)?;

        if result.rows_affected() == 0 {
            Err(DomainError::EntityNotFound("User".to_string(), id))
        } else {
            Ok(())
        }
    }

    async fn trainee_ids_for_hospital(&self, hospital_id: Uuid) -> DomainResult<Vec<Uuid>> {
        let rows = query(
            "SELECT id FROM users WHERE hospital_id = ? AND role IN ('residente', 'participante')",
        )
        .bind(hospital_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::from)?;

        rows.into_iter()
            .map(|row| {
                let id: String = row.get("id");
                Uuid::parse_str(&id).map_err(|_| DomainError::InvalidUuid(id))
            })
            .collect()
    }
}
