use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::{NotSet, Set, Unchanged};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection,
    DbErr, EntityTrait, QueryFilter, QueryOrder, SqlErr, TransactionTrait,
};
use tracing::{debug, info};

use common::{ApiKey, EventKind, Job, JobEvent, JobStatus, JobStore, StoreError, StoreResult, User};

use crate::entity::{api_keys, job_events, jobs, users};
use crate::schema;

/// SQLite-backed job store.
///
/// Holds a single pooled connection: SQLite serializes writers anyway, and a
/// single shared handle is what keeps a `:memory:` database alive across
/// calls in tests.
pub struct SqlStore {
    db: DatabaseConnection,
}

impl SqlStore {
    /// Open (creating if necessary) the database at `db_path` and bootstrap
    /// the schema.
    pub async fn connect(db_path: &str) -> StoreResult<Self> {
        let url = format!("sqlite://{db_path}?mode=rwc");
        info!("Opening job store at {}", db_path);
        Self::connect_url(&url).await
    }

    /// An in-memory store, used by tests.
    pub async fn in_memory() -> StoreResult<Self> {
        Self::connect_url("sqlite::memory:").await
    }

    async fn connect_url(url: &str) -> StoreResult<Self> {
        let mut opt = ConnectOptions::new(url.to_string());
        opt.max_connections(1).sqlx_logging(false);

        let db = Database::connect(opt).await.map_err(map_db_err)?;
        let store = Self { db };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> StoreResult<()> {
        for stmt in schema::DDL {
            self.db.execute_unprepared(stmt).await.map_err(map_db_err)?;
        }
        debug!("Schema bootstrap complete");
        Ok(())
    }

    /// Load a job row and verify the requested transition against the state
    /// machine. Runs inside the caller's transaction.
    async fn job_for_transition<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &str,
        to: JobStatus,
    ) -> StoreResult<(jobs::Model, JobStatus)> {
        let row = jobs::Entity::find_by_id(id.to_string())
            .one(conn)
            .await
            .map_err(map_db_err)?
            .ok_or(StoreError::NotFound)?;
        let from: JobStatus = row.status.parse()?;
        if !from.can_transition_to(to) {
            return Err(StoreError::IllegalTransition { from, to });
        }
        Ok((row, from))
    }
}

#[async_trait]
impl JobStore for SqlStore {
    async fn create_user(&self, user: &User) -> StoreResult<()> {
        users::ActiveModel {
            id: Set(user.id.clone()),
            name: Set(user.name.clone()),
            email: Set(user.email.clone()),
            created_at: Set(user.created_at),
            is_active: Set(user.is_active),
        }
        .insert(&self.db)
        .await
        .map_err(map_db_err)?;
        Ok(())
    }

    async fn get_user(&self, id: &str) -> StoreResult<Option<User>> {
        let row = users::Entity::find_by_id(id.to_string())
            .one(&self.db)
            .await
            .map_err(map_db_err)?;
        Ok(row.map(to_user))
    }

    async fn get_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let row = users::Entity::find()
            .filter(users::Column::Email.eq(email))
            .one(&self.db)
            .await
            .map_err(map_db_err)?;
        Ok(row.map(to_user))
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        let rows = users::Entity::find()
            .order_by_desc(users::Column::CreatedAt)
            .all(&self.db)
            .await
            .map_err(map_db_err)?;
        Ok(rows.into_iter().map(to_user).collect())
    }

    async fn set_user_active(&self, id: &str, active: bool) -> StoreResult<()> {
        let row = users::Entity::find_by_id(id.to_string())
            .one(&self.db)
            .await
            .map_err(map_db_err)?
            .ok_or(StoreError::NotFound)?;
        users::ActiveModel {
            id: Unchanged(row.id),
            is_active: Set(active),
            ..Default::default()
        }
        .update(&self.db)
        .await
        .map_err(map_db_err)?;
        Ok(())
    }

    async fn create_api_key(&self, key: &ApiKey) -> StoreResult<()> {
        api_keys::ActiveModel {
            id: Set(key.id.clone()),
            user_id: Set(key.user_id.clone()),
            key_hash: Set(key.key_hash.clone()),
            name: Set(key.name.clone()),
            created_at: Set(key.created_at),
            last_used_at: Set(key.last_used_at),
            is_active: Set(key.is_active),
        }
        .insert(&self.db)
        .await
        .map_err(map_db_err)?;
        Ok(())
    }

    async fn get_api_key_by_hash(&self, key_hash: &str) -> StoreResult<Option<ApiKey>> {
        let row = api_keys::Entity::find()
            .filter(api_keys::Column::KeyHash.eq(key_hash))
            .one(&self.db)
            .await
            .map_err(map_db_err)?;
        Ok(row.map(to_api_key))
    }

    async fn list_api_keys(&self, user_id: Option<&str>) -> StoreResult<Vec<ApiKey>> {
        let mut query = api_keys::Entity::find().order_by_desc(api_keys::Column::CreatedAt);
        if let Some(user_id) = user_id {
            query = query.filter(api_keys::Column::UserId.eq(user_id));
        }
        let rows = query.all(&self.db).await.map_err(map_db_err)?;
        Ok(rows.into_iter().map(to_api_key).collect())
    }

    async fn revoke_api_key(&self, id: &str) -> StoreResult<()> {
        let row = api_keys::Entity::find_by_id(id.to_string())
            .one(&self.db)
            .await
            .map_err(map_db_err)?
            .ok_or(StoreError::NotFound)?;
        api_keys::ActiveModel {
            id: Unchanged(row.id),
            is_active: Set(false),
            ..Default::default()
        }
        .update(&self.db)
        .await
        .map_err(map_db_err)?;
        Ok(())
    }

    async fn touch_api_key(&self, id: &str, at: DateTime<Utc>) -> StoreResult<()> {
        let row = api_keys::Entity::find_by_id(id.to_string())
            .one(&self.db)
            .await
            .map_err(map_db_err)?
            .ok_or(StoreError::NotFound)?;
        api_keys::ActiveModel {
            id: Unchanged(row.id),
            last_used_at: Set(Some(at)),
            ..Default::default()
        }
        .update(&self.db)
        .await
        .map_err(map_db_err)?;
        Ok(())
    }

    async fn create_job(&self, job: &Job) -> StoreResult<()> {
        jobs::ActiveModel {
            id: Set(job.id.clone()),
            user_id: Set(job.user_id.clone()),
            status: Set(job.status.to_string()),
            success: Set(job.success),
            created_at: Set(job.created_at),
            start_time: Set(job.start_time),
            end_time: Set(job.end_time),
            container_id: Set(job.container_id.clone()),
            zip_file_path: Set(job.zip_file_path.clone()),
        }
        .insert(&self.db)
        .await
        .map_err(map_db_err)?;
        Ok(())
    }

    async fn get_job(&self, id: &str, user_id: Option<&str>) -> StoreResult<Option<Job>> {
        let mut query = jobs::Entity::find().filter(jobs::Column::Id.eq(id));
        if let Some(user_id) = user_id {
            query = query.filter(jobs::Column::UserId.eq(user_id));
        }
        let row = query.one(&self.db).await.map_err(map_db_err)?;
        row.map(to_job).transpose()
    }

    async fn list_jobs(&self, user_id: Option<&str>) -> StoreResult<Vec<Job>> {
        let mut query = jobs::Entity::find().order_by_desc(jobs::Column::CreatedAt);
        if let Some(user_id) = user_id {
            query = query.filter(jobs::Column::UserId.eq(user_id));
        }
        let rows = query.all(&self.db).await.map_err(map_db_err)?;
        rows.into_iter().map(to_job).collect()
    }

    async fn update_job_status(
        &self,
        id: &str,
        status: JobStatus,
        start_time: Option<DateTime<Utc>>,
        container_id: Option<&str>,
    ) -> StoreResult<()> {
        let txn = self.db.begin().await.map_err(map_db_err)?;
        let (row, _) = self.job_for_transition(&txn, id, status).await?;

        let mut update = jobs::ActiveModel {
            id: Unchanged(row.id),
            status: Set(status.to_string()),
            ..Default::default()
        };
        if let Some(start_time) = start_time {
            update.start_time = Set(Some(start_time));
        }
        if let Some(container_id) = container_id {
            update.container_id = Set(Some(container_id.to_string()));
        }
        update.update(&txn).await.map_err(map_db_err)?;
        txn.commit().await.map_err(map_db_err)?;
        Ok(())
    }

    async fn complete_job(&self, id: &str, success: bool, end_time: DateTime<Utc>) -> StoreResult<()> {
        let txn = self.db.begin().await.map_err(map_db_err)?;
        let (row, _) = self
            .job_for_transition(&txn, id, JobStatus::Completed)
            .await?;

        jobs::ActiveModel {
            id: Unchanged(row.id),
            status: Set(JobStatus::Completed.to_string()),
            success: Set(Some(success)),
            end_time: Set(Some(end_time)),
            ..Default::default()
        }
        .update(&txn)
        .await
        .map_err(map_db_err)?;
        txn.commit().await.map_err(map_db_err)?;
        Ok(())
    }

    async fn fail_job(&self, id: &str, reason: &str, end_time: DateTime<Utc>) -> StoreResult<()> {
        let txn = self.db.begin().await.map_err(map_db_err)?;
        let (row, from) = self.job_for_transition(&txn, id, JobStatus::Failed).await?;

        // Repeating a failure is a no-op; the original reason stands.
        if from == JobStatus::Failed {
            txn.commit().await.map_err(map_db_err)?;
            return Ok(());
        }

        jobs::ActiveModel {
            id: Unchanged(row.id.clone()),
            status: Set(JobStatus::Failed.to_string()),
            success: Set(Some(false)),
            end_time: Set(Some(end_time)),
            ..Default::default()
        }
        .update(&txn)
        .await
        .map_err(map_db_err)?;

        job_events::ActiveModel {
            sequence: NotSet,
            job_id: Set(row.id),
            kind: Set(EventKind::Log.as_str().to_string()),
            data: Set(Some(reason.to_string())),
            success: Set(None),
            timestamp: Set(end_time),
        }
        .insert(&txn)
        .await
        .map_err(map_db_err)?;

        txn.commit().await.map_err(map_db_err)?;
        Ok(())
    }

    async fn add_job_event(&self, job_id: &str, event: &JobEvent) -> StoreResult<()> {
        let exists = jobs::Entity::find_by_id(job_id.to_string())
            .one(&self.db)
            .await
            .map_err(map_db_err)?
            .is_some();
        if !exists {
            return Err(StoreError::NotFound);
        }

        job_events::ActiveModel {
            sequence: NotSet,
            job_id: Set(job_id.to_string()),
            kind: Set(event.kind.as_str().to_string()),
            data: Set(event.data.clone()),
            success: Set(event.success),
            timestamp: Set(event.timestamp),
        }
        .insert(&self.db)
        .await
        .map_err(map_db_err)?;
        Ok(())
    }

    async fn job_events(&self, job_id: &str) -> StoreResult<Vec<JobEvent>> {
        let rows = job_events::Entity::find()
            .filter(job_events::Column::JobId.eq(job_id))
            .order_by_asc(job_events::Column::Sequence)
            .all(&self.db)
            .await
            .map_err(map_db_err)?;
        rows.into_iter().map(to_event).collect()
    }
}

fn map_db_err(err: DbErr) -> StoreError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(msg)) => StoreError::Conflict(msg),
        Some(SqlErr::ForeignKeyConstraintViolation(msg)) => StoreError::InvalidInput(msg),
        _ => StoreError::Transient(err.to_string()),
    }
}

fn to_user(row: users::Model) -> User {
    User {
        id: row.id,
        name: row.name,
        email: row.email,
        created_at: row.created_at,
        is_active: row.is_active,
    }
}

fn to_api_key(row: api_keys::Model) -> ApiKey {
    ApiKey {
        id: row.id,
        user_id: row.user_id,
        key_hash: row.key_hash,
        name: row.name,
        created_at: row.created_at,
        last_used_at: row.last_used_at,
        is_active: row.is_active,
    }
}

fn to_job(row: jobs::Model) -> StoreResult<Job> {
    Ok(Job {
        status: row.status.parse()?,
        id: row.id,
        user_id: row.user_id,
        success: row.success,
        created_at: row.created_at,
        start_time: row.start_time,
        end_time: row.end_time,
        container_id: row.container_id,
        zip_file_path: row.zip_file_path,
    })
}

fn to_event(row: job_events::Model) -> StoreResult<JobEvent> {
    Ok(JobEvent {
        kind: row.kind.parse()?,
        sequence: row.sequence,
        data: row.data,
        success: row.success,
        timestamp: row.timestamp,
    })
}
