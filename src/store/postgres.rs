//! PostgreSQL-backed authoritative store. All objects live in one `_sys_notification_objects` table in the
//! configured schema, keyed by (resource, owner, name); revisions come from a shared sequence.

use super::{check_version, merge_status, merge_update, ObjectKey, ObjectStore, WatchEvent};
use crate::config::StoreConfig;
use crate::error::{AppError, ConfigError};
use crate::model::GenericObject;
use crate::scope::Scope;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{ConnectOptions, PgConnection, PgPool, Row};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

const OBJECTS_TABLE: &str = "_sys_notification_objects";
const REVISION_SEQUENCE: &str = "_sys_notification_revision";

/// Global objects are stored with an empty owner.
fn owner_column(owner: &Scope) -> &str {
    owner.user().unwrap_or("")
}

fn decode(row: &PgRow) -> Result<GenericObject, AppError> {
    let Json(mut object): Json<GenericObject> = row.try_get("payload")?;
    let version: i64 = row.try_get("version")?;
    object.metadata.resource_version = version as u64;
    Ok(object)
}

/// Postgres-backed store. The watch feed carries this process's own writes only.
pub struct PgStore {
    pool: PgPool,
    schema: String,
    /// Serializes writes so events are published in revision order.
    write_lock: Mutex<()>,
    events: broadcast::Sender<WatchEvent>,
}

impl PgStore {
    /// Connect, creating the database if needed, and ensure the schema objects exist.
    pub async fn connect(config: &StoreConfig) -> Result<Self, AppError> {
        let url = config
            .database_url
            .as_deref()
            .ok_or(ConfigError::MissingSetting("store.database_url"))?;
        ensure_database_exists(url).await?;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(url)
            .await?;
        let store = PgStore::from_pool(pool, &config.schema, config.watch_buffer);
        store.ensure_tables().await?;
        Ok(store)
    }

    pub fn from_pool(pool: PgPool, schema: &str, watch_buffer: usize) -> Self {
        let (events, _) = broadcast::channel(watch_buffer.max(1));
        PgStore {
            pool,
            schema: schema.to_string(),
            write_lock: Mutex::new(()),
            events,
        }
    }

    fn table(&self) -> String {
        format!("{}.{}", self.schema, OBJECTS_TABLE)
    }

    fn sequence(&self) -> String {
        format!("{}.{}", self.schema, REVISION_SEQUENCE)
    }

    /// Create schema, revision sequence and object table if they do not exist.
    pub async fn ensure_tables(&self) -> Result<(), AppError> {
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", self.schema))
            .execute(&self.pool)
            .await?;
        sqlx::query(&format!("CREATE SEQUENCE IF NOT EXISTS {}", self.sequence()))
            .execute(&self.pool)
            .await?;
        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                resource TEXT NOT NULL,
                owner TEXT NOT NULL DEFAULT '',
                name TEXT NOT NULL,
                payload JSONB NOT NULL,
                version BIGINT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (resource, owner, name)
            )
            "#,
            self.table()
        );
        sqlx::query(&ddl).execute(&self.pool).await?;
        Ok(())
    }

    fn publish(&self, event: WatchEvent) {
        let _ = self.events.send(event);
    }

    async fn next_revision(&self, conn: &mut PgConnection) -> Result<u64, AppError> {
        let revision: i64 = sqlx::query_scalar(&format!("SELECT nextval('{}')", self.sequence()))
            .fetch_one(conn)
            .await?;
        Ok(revision as u64)
    }

    async fn fetch(&self, conn: &mut PgConnection, key: &ObjectKey, for_update: bool) -> Result<Option<GenericObject>, AppError> {
        let sql = format!(
            "SELECT payload, version FROM {} WHERE resource = $1 AND owner = $2 AND name = $3{}",
            self.table(),
            if for_update { " FOR UPDATE" } else { "" }
        );
        let row = sqlx::query(&sql)
            .bind(&key.resource)
            .bind(owner_column(&key.owner))
            .bind(&key.name)
            .fetch_optional(conn)
            .await?;
        row.as_ref().map(decode).transpose()
    }

    async fn replace(
        &self,
        conn: &mut PgConnection,
        key: &ObjectKey,
        object: &GenericObject,
    ) -> Result<(), AppError> {
        sqlx::query(&format!(
            "UPDATE {} SET payload = $4, version = $5, updated_at = NOW() WHERE resource = $1 AND owner = $2 AND name = $3",
            self.table()
        ))
        .bind(&key.resource)
        .bind(owner_column(&key.owner))
        .bind(&key.name)
        .bind(Json(object))
        .bind(object.resource_version() as i64)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Shared body of `update` and `update_status`: lock the row, check the version, write the merge.
    async fn rewrite<F>(&self, resource: &str, object: GenericObject, op: &'static str, merge: F) -> Result<GenericObject, AppError>
    where
        F: FnOnce(&GenericObject, GenericObject, u64) -> GenericObject + Send,
    {
        let _guard = self.write_lock.lock().await;
        let key = ObjectKey::of(resource, &object);
        let mut tx = self.pool.begin().await?;
        let current = self
            .fetch(&mut tx, &key, true)
            .await?
            .ok_or_else(|| AppError::not_found(resource, &key.name))?;
        check_version(resource, &current, &object)?;
        let revision = self.next_revision(&mut tx).await?;
        let next = merge(&current, object, revision);
        self.replace(&mut tx, &key, &next).await?;
        tx.commit().await?;
        tracing::debug!(resource, name = %key.name, owner = %key.owner, revision, "{}", op);
        self.publish(WatchEvent::Applied {
            resource: resource.to_string(),
            object: Arc::new(next.clone()),
        });
        Ok(next)
    }
}

#[async_trait]
impl ObjectStore for PgStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<GenericObject>, AppError> {
        let mut conn = self.pool.acquire().await?;
        self.fetch(&mut conn, key, false).await
    }

    async fn list(&self, resource: &str) -> Result<(Vec<GenericObject>, u64), AppError> {
        // Holding the write lock keeps the reported revision consistent with the rows read.
        let _guard = self.write_lock.lock().await;
        let rows = sqlx::query(&format!(
            "SELECT payload, version FROM {} WHERE resource = $1 ORDER BY owner, name",
            self.table()
        ))
        .bind(resource)
        .fetch_all(&self.pool)
        .await?;
        let revision: i64 = sqlx::query_scalar(&format!(
            "SELECT CASE WHEN is_called THEN last_value ELSE 0 END FROM {}",
            self.sequence()
        ))
        .fetch_one(&self.pool)
        .await?;
        let objects = rows.iter().map(decode).collect::<Result<Vec<_>, _>>()?;
        Ok((objects, revision as u64))
    }

    async fn create(&self, resource: &str, mut object: GenericObject) -> Result<GenericObject, AppError> {
        let _guard = self.write_lock.lock().await;
        let key = ObjectKey::of(resource, &object);
        let mut tx = self.pool.begin().await?;
        let revision = self.next_revision(&mut tx).await?;
        object.metadata.resource_version = revision;
        object.metadata.uid = Some(Uuid::new_v4());
        object.metadata.creation_timestamp = Some(Utc::now());
        let inserted = sqlx::query(&format!(
            "INSERT INTO {} (resource, owner, name, payload, version) VALUES ($1, $2, $3, $4, $5) ON CONFLICT DO NOTHING",
            self.table()
        ))
        .bind(resource)
        .bind(owner_column(&key.owner))
        .bind(&key.name)
        .bind(Json(&object))
        .bind(revision as i64)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if inserted == 0 {
            return Err(AppError::AlreadyExists {
                kind: resource.to_string(),
                name: key.name,
            });
        }
        tx.commit().await?;
        tracing::debug!(resource, name = %key.name, owner = %key.owner, revision, "create");
        self.publish(WatchEvent::Applied {
            resource: resource.to_string(),
            object: Arc::new(object.clone()),
        });
        Ok(object)
    }

    async fn update(&self, resource: &str, object: GenericObject) -> Result<GenericObject, AppError> {
        self.rewrite(resource, object, "update", merge_update).await
    }

    async fn update_status(&self, resource: &str, object: GenericObject) -> Result<GenericObject, AppError> {
        self.rewrite(resource, object, "update status", merge_status).await
    }

    async fn delete(&self, key: &ObjectKey) -> Result<GenericObject, AppError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(&format!(
            "DELETE FROM {} WHERE resource = $1 AND owner = $2 AND name = $3 RETURNING payload, version",
            self.table()
        ))
        .bind(&key.resource)
        .bind(owner_column(&key.owner))
        .bind(&key.name)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::not_found(&key.resource, &key.name))?;
        let removed = decode(&row)?;
        let revision = self.next_revision(&mut tx).await?;
        tx.commit().await?;
        tracing::debug!(resource = %key.resource, name = %key.name, owner = %key.owner, revision, "delete");
        self.publish(WatchEvent::Deleted {
            key: key.clone(),
            revision,
        });
        Ok(removed)
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }

    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Ensure the database named in `database_url` exists, creating it through the `postgres`
/// maintenance database if not.
pub async fn ensure_database_exists(database_url: &str) -> Result<(), AppError> {
    let (admin_url, db_name) = parse_db_name_from_url(database_url)?;
    if db_name.is_empty() || db_name == "postgres" {
        return Ok(());
    }
    let opts = PgConnectOptions::from_str(&admin_url)
        .map_err(|e| AppError::BadRequest(format!("invalid DATABASE_URL: {}", e)))?;
    let mut conn: PgConnection = opts.connect().await?;
    let exists: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(&db_name)
        .fetch_one(&mut conn)
        .await?;
    if !exists.0 {
        tracing::info!(database = %db_name, "creating database");
        sqlx::query(&format!("CREATE DATABASE {}", quote_ident(&db_name)))
            .execute(&mut conn)
            .await?;
    }
    Ok(())
}

fn parse_db_name_from_url(url: &str) -> Result<(String, String), AppError> {
    let path_start = url
        .rfind('/')
        .ok_or_else(|| AppError::BadRequest("DATABASE_URL: no path".into()))?
        + 1;
    let db_name = url[path_start..].split('?').next().unwrap_or("").trim();
    Ok((format!("{}postgres", &url[..path_start]), db_name.to_string()))
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
