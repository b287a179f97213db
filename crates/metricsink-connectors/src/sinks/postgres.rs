//! PostgreSQL sink.
//!
//! Persists mapped monitoring events into a schema-qualified table,
//! creating the schema, table and indices on first use. Every operation
//! opens a fresh connection from stored parameters and releases it on all
//! exit paths — there is no pool, which trades per-call latency for a
//! pipeline with exactly one in-flight statement at a time.
//!
//! Storage failures do not propagate out of the gateway: execution and
//! fetch stages are classified separately into [`ExecOutcome`], logged at
//! error and warn level respectively, and surface to callers as "no
//! confirmed effect" (`None` rows).

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde_json::Value;
use sqlx::postgres::types::PgInterval;
use sqlx::postgres::PgConnectOptions;
use sqlx::{ConnectOptions, Connection};
use tracing;

use crate::error::Result;
use crate::record::map_event;
use crate::sql::{self, Statement, TableRef};
use crate::traits::EventSink;

/// Connection parameters for the destination database. Assembled once at
/// startup and reused to open a new connection per operation.
#[derive(Debug, Clone)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl ConnectionParams {
    /// `host:port` form for log lines. Credentials never appear in logs.
    pub fn uri(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database)
    }
}

/// A persisted metrics row, decoded from `RETURNING *`.
#[derive(Debug, PartialEq, sqlx::FromRow)]
pub struct MetricRow {
    pub time_stamp: NaiveDateTime,
    pub url: String,
    pub agent: Option<String>,
    pub response_time: Option<PgInterval>,
    pub status_code: i32,
    pub ip: Option<String>,
    pub content_validation: Option<bool>,
    pub comment: Option<String>,
}

/// Outcome of a storage operation.
///
/// Distinguishes the four states the original flattened into "rows or
/// null": the caller-visible contract stays null-on-failure via
/// [`ExecOutcome::rows`], while the cause remains inspectable.
#[derive(Debug)]
pub enum ExecOutcome {
    /// Statement ran and returned rows.
    Rows(Vec<MetricRow>),
    /// Statement ran but produced no result rows.
    NoRows,
    /// Statement execution failed; logged, not propagated.
    StatementFailed(String),
    /// Statement ran but the result could not be fetched or decoded.
    FetchFailed(String),
}

impl ExecOutcome {
    /// Collapse to the legacy contract: rows on success, `None` otherwise.
    pub fn rows(self) -> Option<Vec<MetricRow>> {
        match self {
            ExecOutcome::Rows(rows) => Some(rows),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ExecOutcome::StatementFailed(_) | ExecOutcome::FetchFailed(_)
        )
    }
}

/// Executes statements against the destination database, one fresh
/// connection per call.
#[derive(Debug, Clone)]
pub struct PostgresGateway {
    params: ConnectionParams,
}

impl PostgresGateway {
    pub fn new(params: ConnectionParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    /// Execute one parameterized statement and fetch its result rows.
    pub async fn execute(&self, stmt: &Statement) -> ExecOutcome {
        let mut conn = match self.params.connect_options().connect().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!(uri = %self.params.uri(), error = %e, "failed to open storage connection");
                return ExecOutcome::StatementFailed(e.to_string());
            }
        };
        tracing::debug!(uri = %self.params.uri(), sql = %stmt.sql, "sending SQL query");

        let mut query = sqlx::query_as::<_, MetricRow>(&stmt.sql);
        for arg in &stmt.args {
            query = query.bind(arg.clone());
        }

        let outcome = match query.fetch_all(&mut conn).await {
            Ok(rows) if rows.is_empty() => ExecOutcome::NoRows,
            Ok(rows) => ExecOutcome::Rows(rows),
            Err(e) => classify(e),
        };

        // Graceful release; the connection drops either way.
        let _ = conn.close().await;
        outcome
    }

    /// Execute a sequence of argument-less DDL statements on one
    /// connection, stopping at the first failure.
    pub async fn execute_ddl(&self, statements: &[String]) -> ExecOutcome {
        let mut conn = match self.params.connect_options().connect().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!(uri = %self.params.uri(), error = %e, "failed to open storage connection");
                return ExecOutcome::StatementFailed(e.to_string());
            }
        };

        for stmt in statements {
            tracing::debug!(sql = %stmt, "sending DDL statement");
            if let Err(e) = sqlx::query(stmt).execute(&mut conn).await {
                tracing::error!(sql = %stmt, error = %e, "error executing DDL statement");
                let _ = conn.close().await;
                return ExecOutcome::StatementFailed(e.to_string());
            }
        }

        let _ = conn.close().await;
        ExecOutcome::NoRows
    }
}

/// Split sqlx failures into the execution tier (logged as errors) and the
/// fetch/decode tier (logged as warnings).
fn classify(e: sqlx::Error) -> ExecOutcome {
    match e {
        sqlx::Error::RowNotFound
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::TypeNotFound { .. } => {
            tracing::warn!(error = %e, "not possible to fetch query result");
            ExecOutcome::FetchFailed(e.to_string())
        }
        other => {
            tracing::error!(error = %other, "error executing SQL query");
            ExecOutcome::StatementFailed(other.to_string())
        }
    }
}

/// The website-metrics sink: maps events, builds statements, and persists
/// them through a [`PostgresGateway`].
pub struct PostgresSink {
    gateway: PostgresGateway,
    table: TableRef,
    owner: String,
    table_ready: bool,
}

impl PostgresSink {
    /// Create a sink for `schema.table`. The connecting user owns the
    /// schema when it has to be created.
    pub fn new(params: ConnectionParams, schema: &str, table: &str) -> Result<Self> {
        let owner = params.user.clone();
        let table = TableRef::new(schema, table)?;
        Ok(Self {
            gateway: PostgresGateway::new(params),
            table,
            owner,
            table_ready: false,
        })
    }

    pub fn table(&self) -> &TableRef {
        &self.table
    }

    /// Create the destination schema, table and indices if absent.
    /// Idempotent; a storage failure is logged and retried on the next
    /// insert rather than propagated.
    pub async fn ensure_table(&mut self) -> Result<()> {
        if self.table_ready {
            return Ok(());
        }
        let statements =
            sql::build_create_table(self.table.schema(), self.table.table(), &self.owner)?;
        let outcome = self.gateway.execute_ddl(&statements).await;
        if !outcome.is_failure() {
            self.table_ready = true;
            tracing::info!(table = %self.table.qualified(), "destination table ready");
        }
        Ok(())
    }

    /// Map and insert a batch of events, returning the persisted rows.
    ///
    /// An empty batch is a warning and a no-op. A malformed event aborts
    /// the whole batch with `MappingError` before anything is executed —
    /// no partial insert. Storage failures yield `Ok(None)`.
    pub async fn insert(&mut self, events: &[Value]) -> Result<Option<Vec<MetricRow>>> {
        if events.is_empty() {
            tracing::warn!("insertion query called but no data supplied; operation skipped");
            return Ok(None);
        }

        let rows = events.iter().map(map_event).collect::<Result<Vec<_>>>()?;

        self.ensure_table().await?;

        let stmt = match sql::build_insert(&self.table, &rows)? {
            Some(stmt) => stmt,
            None => return Ok(None),
        };

        match self.gateway.execute(&stmt).await {
            ExecOutcome::Rows(rows) => {
                tracing::info!(rows = rows.len(), table = %self.table.qualified(), "successfully inserted rows");
                Ok(Some(rows))
            }
            ExecOutcome::NoRows => {
                tracing::warn!(table = %self.table.qualified(), "insert returned no confirmed rows");
                Ok(None)
            }
            outcome => {
                tracing::debug!(?outcome, "insert had no confirmed effect");
                Ok(None)
            }
        }
    }

    /// Delete rows matching all given filters, returning the removed rows.
    ///
    /// # Errors
    ///
    /// `GuardError` when `filters` is empty — the statement is never built,
    /// let alone executed.
    pub async fn delete(&self, filters: &[(String, String)]) -> Result<Option<Vec<MetricRow>>> {
        let stmt = sql::build_delete(&self.table, filters)?;
        match self.gateway.execute(&stmt).await {
            ExecOutcome::Rows(rows) => {
                tracing::info!(rows = rows.len(), table = %self.table.qualified(), "successfully removed rows");
                Ok(Some(rows))
            }
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl EventSink for PostgresSink {
    async fn start(&mut self) -> Result<()> {
        self.ensure_table().await
    }

    async fn persist(&mut self, events: &[Value]) -> Result<Option<Vec<MetricRow>>> {
        self.insert(events).await
    }
}
