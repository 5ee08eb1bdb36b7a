//! SQLite-backed implementation of the core store traits.
//!
//! Partial updates are whole-row read-modify-write inside a transaction so
//! `last_modified` handling stays in one place ([`SubmissionRecord::apply`]).
//! Connectivity failures map to [`StoreError::Unavailable`] and are retried
//! by callers; everything else is a query error.

use async_trait::async_trait;
use junction_core::store::{
    CollectionRecord, CollectionStore, RecordChanges, StoreError, SubmissionRecord,
    SubmissionStore,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::Duration;

use crate::config::DatabaseConfig;

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Open the connection pool, creating the database file if needed.
pub async fn connect(config: &DatabaseConfig) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&config.url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect_with(options)
        .await?;
    Ok(pool)
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn map_err(e: sqlx::Error) -> StoreError {
    let transient = matches!(
        e,
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
    );
    if transient {
        StoreError::Unavailable(e.to_string())
    } else {
        StoreError::Query(e.to_string())
    }
}

fn record_from_row(row: &SqliteRow) -> Result<SubmissionRecord, StoreError> {
    let status: String = row.try_get("status").map_err(map_err)?;
    Ok(SubmissionRecord {
        group_name: row.try_get("group_name").map_err(map_err)?,
        status: status.parse().map_err(StoreError::Query)?,
        error: row.try_get("error").map_err(map_err)?,
        message: row.try_get("message").map_err(map_err)?,
        created: row.try_get("created").map_err(map_err)?,
        last_modified: row.try_get("last_modified").map_err(map_err)?,
        avalon_chosen: row.try_get("avalon_chosen").map_err(map_err)?,
        avalon_pid: row.try_get("avalon_pid").map_err(map_err)?,
        avalon_url: row.try_get("avalon_url").map_err(map_err)?,
        locked: row.try_get("locked").map_err(map_err)?,
        api_hash: row.try_get("api_hash").map_err(map_err)?,
    })
}

const SELECT_SUBMISSION: &str = "SELECT group_name, status, error, message, created, \
     last_modified, avalon_chosen, avalon_pid, avalon_url, locked, api_hash \
     FROM media_objects WHERE group_name = ?1";

#[async_trait]
impl SubmissionStore for SqliteStore {
    async fn upsert_registration(
        &self,
        group_name: &str,
        api_hash: &str,
    ) -> Result<SubmissionRecord, StoreError> {
        let now = junction_core::store::now_utc();
        sqlx::query(
            "INSERT INTO media_objects \
                 (group_name, status, error, message, created, last_modified, \
                  avalon_chosen, avalon_pid, avalon_url, locked, api_hash) \
             VALUES (?1, 'received', 0, 'object received', ?2, ?2, '', '', '', 0, ?3) \
             ON CONFLICT(group_name) DO UPDATE SET \
                 status = 'received', \
                 error = 0, \
                 message = 'object received', \
                 last_modified = ?2, \
                 api_hash = ?3",
        )
        .bind(group_name)
        .bind(&now)
        .bind(api_hash)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;

        let row = sqlx::query(SELECT_SUBMISSION)
            .bind(group_name)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)?;
        record_from_row(&row)
    }

    async fn find(&self, group_name: &str) -> Result<Option<SubmissionRecord>, StoreError> {
        let row = sqlx::query(SELECT_SUBMISSION)
            .bind(group_name)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn update(&self, group_name: &str, changes: RecordChanges) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_err)?;

        let row = sqlx::query(SELECT_SUBMISSION)
            .bind(group_name)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_err)?
            .ok_or_else(|| StoreError::NotFound(format!("submission '{group_name}'")))?;
        let mut record = record_from_row(&row)?;
        record.apply(changes);

        sqlx::query(
            "UPDATE media_objects SET \
                 status = ?2, error = ?3, message = ?4, last_modified = ?5, \
                 avalon_chosen = ?6, avalon_pid = ?7, avalon_url = ?8, locked = ?9 \
             WHERE group_name = ?1",
        )
        .bind(group_name)
        .bind(record.status.as_str())
        .bind(record.error)
        .bind(&record.message)
        .bind(&record.last_modified)
        .bind(&record.avalon_chosen)
        .bind(&record.avalon_pid)
        .bind(&record.avalon_url)
        .bind(record.locked)
        .execute(&mut *tx)
        .await
        .map_err(map_err)?;

        tx.commit().await.map_err(map_err)
    }

    async fn delete(&self, group_name: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM media_objects WHERE group_name = ?1")
            .bind(group_name)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn any_locked(&self) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM media_objects WHERE locked = 1) AS found")
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)?;
        row.try_get("found").map_err(map_err)
    }
}

#[async_trait]
impl CollectionStore for SqliteStore {
    async fn find(
        &self,
        name: &str,
        url: &str,
    ) -> Result<Option<CollectionRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT name, pid, avalon_url, fullname FROM collections \
             WHERE name = ?1 AND avalon_url = ?2",
        )
        .bind(name)
        .bind(url)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)?;

        row.map(|row| {
            Ok(CollectionRecord {
                name: row.try_get("name").map_err(map_err)?,
                pid: row.try_get("pid").map_err(map_err)?,
                avalon_url: row.try_get("avalon_url").map_err(map_err)?,
                fullname: row.try_get("fullname").map_err(map_err)?,
            })
        })
        .transpose()
    }

    async fn insert(&self, record: CollectionRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO collections (name, pid, avalon_url, fullname) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(name, avalon_url) DO UPDATE SET \
                 pid = excluded.pid, fullname = excluded.fullname",
        )
        .bind(&record.name)
        .bind(&record.pid)
        .bind(&record.avalon_url)
        .bind(&record.fullname)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn update_pid(&self, name: &str, url: &str, pid: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE collections SET pid = ?3 WHERE name = ?1 AND avalon_url = ?2",
        )
        .bind(name)
        .bind(url)
        .bind(pid)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("collection '{name}'")));
        }
        Ok(())
    }
}
