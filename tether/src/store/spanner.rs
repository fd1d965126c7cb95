use anyhow::Context;
use async_trait::async_trait;
use google_cloud_spanner::client::{Client, ClientConfig};
use google_cloud_spanner::row::Row;
use google_cloud_spanner::statement::Statement;
use log::*;
use std::time::Instant;
use time::OffsetDateTime;

use super::{LeaseStore, WriteOutcome};
use crate::error::StoreError;
use crate::record::{LeaseRecord, Version};

/// Lease table in Cloud Spanner. One row per lock name; conditional writes
/// are DML statements guarded on `version`, so the affected row count tells
/// applied from conflict.
pub struct SpannerLeaseStore {
    client: Client,
    table: String,
}

impl SpannerLeaseStore {
    /// Connects with application default credentials. `db` is the full
    /// database path, `projects/p/instances/i/databases/d`.
    pub async fn connect(db: &str, table: &str) -> Result<Self, StoreError> {
        let config = ClientConfig::default()
            .with_auth()
            .await
            .context("spanner auth")?;
        let client = Client::new(db, config)
            .await
            .context("spanner client")?;
        Ok(Self::from_client(client, table))
    }

    pub fn from_client(client: Client, table: &str) -> Self {
        Self {
            client,
            table: table.to_string(),
        }
    }

    /// DDL for the lease table. Expiry is stored as unix nanoseconds.
    ///
    /// This store never creates its table. Apply the statement when
    /// provisioning the database, e.g. with
    /// `gcloud spanner databases ddl update <db> --instance=<i> --ddl="..."`
    /// or a schema migration, before calling [`connect`](Self::connect).
    pub fn ddl(table: &str) -> String {
        format!(
            "create table {table} (\
             name string(max) not null, \
             owner string(max) not null, \
             version int64 not null, \
             expires_at int64 not null, \
             payload bytes(max)\
             ) primary key (name)"
        )
    }

    async fn execute(&self, stmt: Statement) -> Result<i64, StoreError> {
        let mut tx = self
            .client
            .begin_read_write_transaction()
            .await
            .context("spanner begin transaction")?;
        let res = tx.update(stmt).await;
        let res = tx.end(res, None).await;
        let (_, rows) = res.context("spanner commit")?;
        Ok(rows)
    }
}

fn to_outcome(rows: i64) -> WriteOutcome {
    if rows == 1 {
        WriteOutcome::Applied
    } else {
        WriteOutcome::Conflict
    }
}

fn malformed(name: &str, reason: impl Into<String>) -> StoreError {
    StoreError::Malformed {
        name: name.to_string(),
        reason: reason.into(),
    }
}

fn version_param(name: &str, v: Version) -> Result<i64, StoreError> {
    i64::try_from(v.get()).map_err(|_| malformed(name, format!("version {v} out of range")))
}

fn bind_record(stmt: &mut Statement, record: &LeaseRecord) -> Result<(), StoreError> {
    let expires_at = i64::try_from(record.expires_at.unix_timestamp_nanos())
        .map_err(|_| malformed(&record.name, "expiry out of range"))?;
    stmt.add_param("name", &record.name);
    stmt.add_param("owner", &record.owner);
    stmt.add_param("version", &version_param(&record.name, record.version)?);
    stmt.add_param("expires_at", &expires_at);
    stmt.add_param("payload", &record.payload);
    Ok(())
}

fn decode(name: &str, row: &Row) -> Result<LeaseRecord, StoreError> {
    let owner = row.column_by_name::<String>("owner").context("owner column")?;
    let version = row.column_by_name::<i64>("version").context("version column")?;
    let expires_at = row
        .column_by_name::<i64>("expires_at")
        .context("expires_at column")?;
    let payload = row
        .column_by_name::<Option<Vec<u8>>>("payload")
        .context("payload column")?;

    let version = u64::try_from(version).map_err(|_| malformed(name, "negative version"))?;
    let expires_at = OffsetDateTime::from_unix_timestamp_nanos(expires_at as i128)
        .map_err(|e| malformed(name, e.to_string()))?;

    Ok(LeaseRecord {
        name: name.to_string(),
        owner,
        version: Version::new(version),
        expires_at,
        payload,
    })
}

#[async_trait]
impl LeaseStore for SpannerLeaseStore {
    async fn read(&self, name: &str) -> Result<Option<LeaseRecord>, StoreError> {
        let start = Instant::now();
        let mut stmt = Statement::new(format!(
            "select owner, version, expires_at, payload from {} where name = @name",
            self.table
        ));
        stmt.add_param("name", &name.to_string());
        let mut tx = self.client.single().await.context("spanner single")?;
        let mut iter = tx.query(stmt).await.context("spanner query")?;
        let record = match iter.next().await.context("spanner read row")? {
            Some(row) => Some(decode(name, &row)?),
            None => None,
        };

        debug!("read name={name} took {:?}", start.elapsed());
        Ok(record)
    }

    async fn create_if_absent(&self, record: &LeaseRecord) -> Result<WriteOutcome, StoreError> {
        let start = Instant::now();
        let mut stmt = Statement::new(format!(
            "insert into {t} (name, owner, version, expires_at, payload) \
             select @name, @owner, @version, @expires_at, @payload from unnest([1]) \
             where not exists (select 1 from {t} where name = @name)",
            t = self.table
        ));
        bind_record(&mut stmt, record)?;
        let rows = self.execute(stmt).await?;
        debug!(
            "create name={}, rows={rows} took {:?}",
            record.name,
            start.elapsed()
        );
        Ok(to_outcome(rows))
    }

    async fn update_if_version(
        &self,
        expected: Version,
        record: &LeaseRecord,
    ) -> Result<WriteOutcome, StoreError> {
        let start = Instant::now();
        let mut stmt = Statement::new(format!(
            "update {} set owner = @owner, version = @version, \
             expires_at = @expires_at, payload = @payload \
             where name = @name and version = @expected",
            self.table
        ));
        bind_record(&mut stmt, record)?;
        stmt.add_param("expected", &version_param(&record.name, expected)?);
        let rows = self.execute(stmt).await?;
        debug!(
            "update name={}, expected={expected}, rows={rows} took {:?}",
            record.name,
            start.elapsed()
        );
        Ok(to_outcome(rows))
    }

    async fn delete_if_version(
        &self,
        name: &str,
        expected: Version,
    ) -> Result<WriteOutcome, StoreError> {
        let start = Instant::now();
        let mut stmt = Statement::new(format!(
            "delete from {} where name = @name and version = @expected",
            self.table
        ));
        stmt.add_param("name", &name.to_string());
        stmt.add_param("expected", &version_param(name, expected)?);
        let rows = self.execute(stmt).await?;
        debug!(
            "delete name={name}, expected={expected}, rows={rows} took {:?}",
            start.elapsed()
        );
        Ok(to_outcome(rows))
    }
}
