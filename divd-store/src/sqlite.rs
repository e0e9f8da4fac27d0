//! SQLite Store
//!
//! sqlx-backed implementation of the [`Store`] trait. The pool is held to
//! a single connection: SQLite permits limited write concurrency, and a
//! single writer avoids persistent "database is locked" failures under
//! concurrent handlers and workers. Lease and rate-budget
//! read-modify-writes additionally serialize on an async mutex so the
//! select-then-update pairs are atomic against in-process callers.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use tokio::sync::Mutex;
use uuid::Uuid;

use divd_core::{
    queue_backoff, ApiUser, CallLog, Dividend, Job, JobStatus, JobType, NewJob, PlanType,
    QueueItem, RateBudget, RateDecision, RateLimits, Subscription, SubscriptionActivity, Ticker,
};
use divd_core::types::queue::LEASE_TTL_MINUTES;

use crate::error::{StoreError, StoreResult};
use crate::schema::DIVD_SCHEMA;
use crate::{
    DividendFilter, FailOutcome, JobFilter, JobSort, QueueDepth, Store, StoreStats, UpsertSummary,
};

/// sqlx/SQLite-backed store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    /// Serializes multi-statement read-modify-writes (lease, budget)
    rmw_lock: Mutex<()>,
}

impl SqliteStore {
    /// Open (creating if missing) and initialize the database.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let opts = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::Invalid(format!("bad database url: {}", e)))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self {
            pool,
            rmw_lock: Mutex::new(()),
        };
        store.init_schema().await?;
        Ok(store)
    }

    /// Apply the schema; idempotent.
    pub async fn init_schema(&self) -> StoreResult<()> {
        for statement in DIVD_SCHEMA.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::debug!("store schema initialized");
        Ok(())
    }

    /// Borrow the underlying pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

// ==================== Row decoding ====================

fn parse_uuid(row: &SqliteRow, column: &str) -> StoreResult<Uuid> {
    let raw: String = row
        .try_get(column)
        .map_err(|e| StoreError::Invalid(e.to_string()))?;
    Uuid::parse_str(&raw).map_err(|e| StoreError::Invalid(format!("{}: {}", column, e)))
}

fn parse_json(row: &SqliteRow, column: &str) -> StoreResult<serde_json::Value> {
    let raw: String = row
        .try_get(column)
        .map_err(|e| StoreError::Invalid(e.to_string()))?;
    serde_json::from_str(&raw).map_err(|e| StoreError::Invalid(format!("{}: {}", column, e)))
}

fn row_to_ticker(row: &SqliteRow) -> StoreResult<Ticker> {
    Ok(Ticker {
        symbol: row.try_get("symbol").map_err(decode_err)?,
        is_active: row.try_get("is_active").map_err(decode_err)?,
        created_at: row.try_get("created_at").map_err(decode_err)?,
        last_dividend_update: row.try_get("last_dividend_update").map_err(decode_err)?,
        update_frequency_hours: row.try_get("update_frequency_hours").map_err(decode_err)?,
    })
}

fn row_to_dividend(row: &SqliteRow) -> StoreResult<Dividend> {
    let amount_raw: String = row.try_get("amount").map_err(decode_err)?;
    Ok(Dividend {
        ticker: row.try_get("ticker").map_err(decode_err)?,
        ex_dividend_date: row.try_get("ex_dividend_date").map_err(decode_err)?,
        declaration_date: row.try_get("declaration_date").map_err(decode_err)?,
        record_date: row.try_get("record_date").map_err(decode_err)?,
        pay_date: row.try_get("pay_date").map_err(decode_err)?,
        amount: Decimal::from_str(&amount_raw)
            .map_err(|e| StoreError::Invalid(format!("amount: {}", e)))?,
        currency: row.try_get("currency").map_err(decode_err)?,
        frequency: row.try_get::<i64, _>("frequency").map_err(decode_err)? as i32,
        dividend_type: row.try_get("dividend_type").map_err(decode_err)?,
        polygon_id: row.try_get("polygon_id").map_err(decode_err)?,
        data_source: row.try_get("data_source").map_err(decode_err)?,
        created_at: row.try_get("created_at").map_err(decode_err)?,
        updated_at: row.try_get("updated_at").map_err(decode_err)?,
    })
}

fn row_to_job(row: &SqliteRow) -> StoreResult<Job> {
    let job_type_raw: String = row.try_get("job_type").map_err(decode_err)?;
    let status_raw: String = row.try_get("status").map_err(decode_err)?;
    let symbols_raw: String = row.try_get("ticker_symbols").map_err(decode_err)?;
    Ok(Job {
        id: parse_uuid(row, "id")?,
        job_type: JobType::parse(&job_type_raw)
            .ok_or_else(|| StoreError::Invalid(format!("job_type: {}", job_type_raw)))?,
        status: JobStatus::parse(&status_raw)
            .ok_or_else(|| StoreError::Invalid(format!("status: {}", status_raw)))?,
        ticker_symbols: serde_json::from_str(&symbols_raw)
            .map_err(|e| StoreError::Invalid(format!("ticker_symbols: {}", e)))?,
        total: row.try_get::<i64, _>("total").map_err(decode_err)? as u32,
        processed: row.try_get::<i64, _>("processed").map_err(decode_err)? as u32,
        failed: row.try_get::<i64, _>("failed").map_err(decode_err)? as u32,
        priority: row.try_get::<i64, _>("priority").map_err(decode_err)? as i32,
        force: row.try_get("force_refresh").map_err(decode_err)?,
        created_at: row.try_get("created_at").map_err(decode_err)?,
        started_at: row.try_get("started_at").map_err(decode_err)?,
        completed_at: row.try_get("completed_at").map_err(decode_err)?,
        estimated_completion: row.try_get("estimated_completion").map_err(decode_err)?,
        metadata: parse_json(row, "metadata")?,
        error_message: row.try_get("error_message").map_err(decode_err)?,
    })
}

fn row_to_queue_item(row: &SqliteRow) -> StoreResult<QueueItem> {
    Ok(QueueItem {
        id: parse_uuid(row, "id")?,
        job_id: parse_uuid(row, "job_id")?,
        ticker_symbol: row.try_get("ticker_symbol").map_err(decode_err)?,
        priority: row.try_get::<i64, _>("priority").map_err(decode_err)? as i32,
        retry_count: row.try_get::<i64, _>("retry_count").map_err(decode_err)? as u32,
        max_retries: row.try_get::<i64, _>("max_retries").map_err(decode_err)? as u32,
        scheduled_at: row.try_get("scheduled_at").map_err(decode_err)?,
        locked_at: row.try_get("locked_at").map_err(decode_err)?,
        locked_by: row.try_get("locked_by").map_err(decode_err)?,
        error_message: row.try_get("error_message").map_err(decode_err)?,
        created_at: row.try_get("created_at").map_err(decode_err)?,
    })
}

fn row_to_user(row: &SqliteRow) -> StoreResult<ApiUser> {
    let plan_raw: String = row.try_get("plan_type").map_err(decode_err)?;
    Ok(ApiUser {
        id: parse_uuid(row, "id")?,
        api_key: row.try_get("api_key").map_err(decode_err)?,
        user_name: row.try_get("user_name").map_err(decode_err)?,
        plan_type: PlanType::parse(&plan_raw)
            .ok_or_else(|| StoreError::Invalid(format!("plan_type: {}", plan_raw)))?,
        max_subscriptions: row.try_get::<i64, _>("max_subscriptions").map_err(decode_err)? as u32,
        is_active: row.try_get("is_active").map_err(decode_err)?,
        created_at: row.try_get("created_at").map_err(decode_err)?,
    })
}

fn row_to_subscription(row: &SqliteRow) -> StoreResult<Subscription> {
    Ok(Subscription {
        user_id: parse_uuid(row, "user_id")?,
        ticker_symbol: row.try_get("ticker_symbol").map_err(decode_err)?,
        priority: row.try_get::<i64, _>("priority").map_err(decode_err)? as i32,
        subscribed_at: row.try_get("subscribed_at").map_err(decode_err)?,
        notification_enabled: row.try_get("notification_enabled").map_err(decode_err)?,
        auto_update_enabled: row.try_get("auto_update_enabled").map_err(decode_err)?,
        last_dividend_check: row.try_get("last_dividend_check").map_err(decode_err)?,
    })
}

fn row_to_call_log(row: &SqliteRow) -> StoreResult<CallLog> {
    Ok(CallLog {
        id: parse_uuid(row, "id")?,
        service_name: row.try_get("service_name").map_err(decode_err)?,
        endpoint: row.try_get("endpoint").map_err(decode_err)?,
        ticker_symbol: row.try_get("ticker_symbol").map_err(decode_err)?,
        response_status: row.try_get::<i64, _>("response_status").map_err(decode_err)? as u16,
        response_time_ms: row.try_get::<i64, _>("response_time_ms").map_err(decode_err)? as u64,
        rate_limit_remaining: row.try_get("rate_limit_remaining").map_err(decode_err)?,
        error_message: row.try_get("error_message").map_err(decode_err)?,
        metadata: parse_json(row, "metadata")?,
        created_at: row.try_get("created_at").map_err(decode_err)?,
    })
}

fn row_to_budget(row: &SqliteRow) -> StoreResult<RateBudget> {
    Ok(RateBudget {
        service_name: row.try_get("service_name").map_err(decode_err)?,
        minute_count: row.try_get::<i64, _>("minute_count").map_err(decode_err)? as u32,
        hour_count: row.try_get::<i64, _>("hour_count").map_err(decode_err)? as u32,
        day_count: row.try_get::<i64, _>("day_count").map_err(decode_err)? as u32,
        reset_minute: row.try_get("reset_minute").map_err(decode_err)?,
        reset_hour: row.try_get("reset_hour").map_err(decode_err)?,
        reset_day: row.try_get("reset_day").map_err(decode_err)?,
        last_call_time: row.try_get("last_call_time").map_err(decode_err)?,
    })
}

fn decode_err(err: sqlx::Error) -> StoreError {
    StoreError::Invalid(err.to_string())
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_ticker(&self, symbol: &str) -> StoreResult<Ticker> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO tickers (symbol, is_active, created_at, update_frequency_hours)
             VALUES (?1, 1, ?2, 24)
             ON CONFLICT(symbol) DO UPDATE SET is_active = 1",
        )
        .bind(symbol)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT * FROM tickers WHERE symbol = ?1")
            .bind(symbol)
            .fetch_one(&self.pool)
            .await?;
        row_to_ticker(&row)
    }

    async fn get_ticker(&self, symbol: &str) -> StoreResult<Option<Ticker>> {
        let row = sqlx::query("SELECT * FROM tickers WHERE symbol = ?1")
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_ticker(&r)).transpose()
    }

    async fn touch_ticker_update(&self, symbol: &str, at: DateTime<Utc>) -> StoreResult<()> {
        let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tickers WHERE symbol = ?1")
            .bind(symbol)
            .fetch_one(&self.pool)
            .await?;
        if exists == 0 {
            return Err(StoreError::NotFound(format!("ticker {}", symbol)));
        }
        sqlx::query(
            "UPDATE tickers SET last_dividend_update = ?2
             WHERE symbol = ?1
               AND (last_dividend_update IS NULL OR last_dividend_update < ?2)",
        )
        .bind(symbol)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_dividends(
        &self,
        ticker: &str,
        records: &[Dividend],
    ) -> StoreResult<UpsertSummary> {
        let mut summary = UpsertSummary::default();
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        for record in records {
            if let Err(err) = record.validate() {
                summary.errors += 1;
                summary.error_messages.push(err.to_string());
                continue;
            }
            sqlx::query(
                "INSERT INTO dividends (
                    ticker, ex_dividend_date, declaration_date, record_date, pay_date,
                    amount, currency, frequency, dividend_type, polygon_id, data_source,
                    created_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)
                 ON CONFLICT(ticker, ex_dividend_date) DO UPDATE SET
                    declaration_date = excluded.declaration_date,
                    record_date = excluded.record_date,
                    pay_date = excluded.pay_date,
                    amount = excluded.amount,
                    currency = excluded.currency,
                    frequency = excluded.frequency,
                    dividend_type = excluded.dividend_type,
                    polygon_id = excluded.polygon_id,
                    data_source = excluded.data_source,
                    updated_at = excluded.updated_at",
            )
            .bind(ticker)
            .bind(record.ex_dividend_date)
            .bind(record.declaration_date)
            .bind(record.record_date)
            .bind(record.pay_date)
            .bind(record.amount.to_string())
            .bind(&record.currency)
            .bind(record.frequency as i64)
            .bind(&record.dividend_type)
            .bind(&record.polygon_id)
            .bind(&record.data_source)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            summary.inserted += 1;
        }
        tx.commit().await?;
        Ok(summary)
    }

    async fn dividends_for_ticker(
        &self,
        ticker: &str,
        filter: &DividendFilter,
    ) -> StoreResult<Vec<Dividend>> {
        let rows = sqlx::query(
            "SELECT * FROM dividends
             WHERE ticker = ?1
               AND (?2 IS NULL OR ex_dividend_date >= ?2)
               AND (?3 IS NULL OR ex_dividend_date <= ?3)
             ORDER BY ex_dividend_date DESC
             LIMIT ?4 OFFSET ?5",
        )
        .bind(ticker)
        .bind(filter.start_date)
        .bind(filter.end_date)
        .bind(filter.limit.map(|l| l as i64).unwrap_or(-1))
        .bind(filter.offset.unwrap_or(0) as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_dividend).collect()
    }

    async fn dividends_for_tickers(
        &self,
        tickers: &[String],
        filter: &DividendFilter,
    ) -> StoreResult<Vec<Dividend>> {
        let ticker_json = serde_json::to_string(tickers)
            .map_err(|e| StoreError::Invalid(e.to_string()))?;
        let rows = sqlx::query(
            "SELECT * FROM dividends
             WHERE ticker IN (SELECT value FROM json_each(?1))
               AND (?2 IS NULL OR ex_dividend_date >= ?2)
               AND (?3 IS NULL OR ex_dividend_date <= ?3)
             ORDER BY ticker ASC, ex_dividend_date DESC
             LIMIT ?4 OFFSET ?5",
        )
        .bind(ticker_json)
        .bind(filter.start_date)
        .bind(filter.end_date)
        .bind(filter.limit.map(|l| l as i64).unwrap_or(-1))
        .bind(filter.offset.unwrap_or(0) as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_dividend).collect()
    }

    async fn dividends_all(&self, filter: &DividendFilter) -> StoreResult<Vec<Dividend>> {
        let rows = sqlx::query(
            "SELECT * FROM dividends
             WHERE (?1 IS NULL OR ex_dividend_date >= ?1)
               AND (?2 IS NULL OR ex_dividend_date <= ?2)
             ORDER BY ticker ASC, ex_dividend_date DESC
             LIMIT ?3 OFFSET ?4",
        )
        .bind(filter.start_date)
        .bind(filter.end_date)
        .bind(filter.limit.map(|l| l as i64).unwrap_or(-1))
        .bind(filter.offset.unwrap_or(0) as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_dividend).collect()
    }

    async fn create_job(&self, new: NewJob) -> StoreResult<Job> {
        let job = Job::create(new, Utc::now());
        sqlx::query(
            "INSERT INTO api_jobs (
                id, job_type, status, ticker_symbols, total, processed, failed,
                priority, force_refresh, created_at, estimated_completion, metadata
             ) VALUES (?1, ?2, ?3, ?4, ?5, 0, 0, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(job.id.to_string())
        .bind(job.job_type.as_str())
        .bind(job.status.as_str())
        .bind(serde_json::to_string(&job.ticker_symbols).map_err(|e| StoreError::Invalid(e.to_string()))?)
        .bind(job.total as i64)
        .bind(job.priority as i64)
        .bind(job.force)
        .bind(job.created_at)
        .bind(job.estimated_completion)
        .bind(job.metadata.to_string())
        .execute(&self.pool)
        .await?;
        Ok(job)
    }

    async fn get_job(&self, id: Uuid) -> StoreResult<Option<Job>> {
        let row = sqlx::query("SELECT * FROM api_jobs WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_job(&r)).transpose()
    }

    async fn list_jobs(&self, filter: &JobFilter) -> StoreResult<Vec<Job>> {
        let order_column = match filter.sort {
            JobSort::CreatedAt => "created_at",
            JobSort::Priority => "priority",
        };
        let direction = if filter.descending { "DESC" } else { "ASC" };
        let sql = format!(
            "SELECT * FROM api_jobs
             WHERE (?1 IS NULL OR status = ?1)
               AND (?2 IS NULL OR job_type = ?2)
             ORDER BY {} {}
             LIMIT ?3 OFFSET ?4",
            order_column, direction
        );
        let rows = sqlx::query(&sql)
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.job_type.map(|t| t.as_str()))
            .bind(filter.limit as i64)
            .bind(filter.offset as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_job).collect()
    }

    async fn mark_job_processing(&self, id: Uuid) -> StoreResult<()> {
        sqlx::query(
            "UPDATE api_jobs SET status = 'processing', started_at = ?2
             WHERE id = ?1 AND status = 'pending'",
        )
        .bind(id.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn advance_job(&self, id: Uuid, d_processed: u32, d_failed: u32) -> StoreResult<Job> {
        sqlx::query(
            "UPDATE api_jobs
             SET processed = processed + ?2, failed = failed + ?3
             WHERE id = ?1 AND status IN ('pending', 'processing')",
        )
        .bind(id.to_string())
        .bind(d_processed as i64)
        .bind(d_failed as i64)
        .execute(&self.pool)
        .await?;
        self.get_job(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("job {}", id)))
    }

    async fn finalize_job_if_drained(&self, id: Uuid) -> StoreResult<Option<JobStatus>> {
        let _guard = self.rmw_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let remaining: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM job_queue WHERE job_id = ?1")
                .bind(id.to_string())
                .fetch_one(&mut *tx)
                .await?;
        let row = sqlx::query("SELECT * FROM api_jobs WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("job {}", id)))?;
        let job = row_to_job(&row)?;
        if job.status != JobStatus::Processing || remaining > 0 {
            tx.commit().await?;
            return Ok(None);
        }
        let status = if job.processed > 0 {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        };
        sqlx::query("UPDATE api_jobs SET status = ?2, completed_at = ?3 WHERE id = ?1")
            .bind(id.to_string())
            .bind(status.as_str())
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(Some(status))
    }

    async fn cancel_job(&self, id: Uuid) -> StoreResult<Job> {
        let _guard = self.rmw_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT * FROM api_jobs WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("job {}", id)))?;
        let job = row_to_job(&row)?;
        if job.status != JobStatus::Pending {
            return Err(StoreError::Conflict(format!(
                "job {} is {} and cannot be cancelled",
                id,
                job.status.as_str()
            )));
        }
        let now = Utc::now();
        sqlx::query(
            "UPDATE api_jobs
             SET status = 'cancelled', error_message = 'Job cancelled by user', completed_at = ?2
             WHERE id = ?1",
        )
        .bind(id.to_string())
        .bind(now)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM job_queue WHERE job_id = ?1")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        self.get_job(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("job {}", id)))
    }

    async fn enqueue(&self, job_id: Uuid, symbols: &[String], priority: i32) -> StoreResult<u32> {
        let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM api_jobs WHERE id = ?1")
            .bind(job_id.to_string())
            .fetch_one(&self.pool)
            .await?;
        if exists == 0 {
            return Err(StoreError::NotFound(format!("job {}", job_id)));
        }
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        for symbol in symbols {
            let item = QueueItem::new(job_id, symbol.clone(), priority, now);
            sqlx::query(
                "INSERT INTO job_queue (
                    id, job_id, ticker_symbol, priority, retry_count, max_retries,
                    scheduled_at, created_at
                 ) VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, ?6)",
            )
            .bind(item.id.to_string())
            .bind(job_id.to_string())
            .bind(&item.ticker_symbol)
            .bind(item.priority as i64)
            .bind(item.max_retries as i64)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(symbols.len() as u32)
    }

    async fn lease_queue_items(&self, limit: u32, worker_id: &str) -> StoreResult<Vec<QueueItem>> {
        let _guard = self.rmw_lock.lock().await;
        let now = Utc::now();
        let lease_expiry = now - chrono::Duration::minutes(LEASE_TTL_MINUTES);

        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query(
            "SELECT id FROM job_queue
             WHERE scheduled_at <= ?1
               AND (locked_at IS NULL OR locked_at < ?2)
             ORDER BY priority DESC, scheduled_at ASC
             LIMIT ?3",
        )
        .bind(now)
        .bind(lease_expiry)
        .bind(limit as i64)
        .fetch_all(&mut *tx)
        .await?;

        let ids: Vec<String> = rows
            .iter()
            .map(|r| r.try_get::<String, _>("id").map_err(decode_err))
            .collect::<StoreResult<_>>()?;
        if ids.is_empty() {
            tx.commit().await?;
            return Ok(Vec::new());
        }

        let id_json =
            serde_json::to_string(&ids).map_err(|e| StoreError::Invalid(e.to_string()))?;
        sqlx::query(
            "UPDATE job_queue SET locked_at = ?1, locked_by = ?2
             WHERE id IN (SELECT value FROM json_each(?3))",
        )
        .bind(now)
        .bind(worker_id)
        .bind(&id_json)
        .execute(&mut *tx)
        .await?;

        let rows = sqlx::query(
            "SELECT * FROM job_queue
             WHERE id IN (SELECT value FROM json_each(?1))
             ORDER BY priority DESC, scheduled_at ASC",
        )
        .bind(&id_json)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;
        rows.iter().map(row_to_queue_item).collect()
    }

    async fn complete_item(&self, id: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM job_queue WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fail_item(&self, id: Uuid, error: &str) -> StoreResult<FailOutcome> {
        let _guard = self.rmw_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT * FROM job_queue WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("queue item {}", id)))?;
        let item = row_to_queue_item(&row)?;

        if item.retries_exhausted_by_next_failure() {
            sqlx::query("DELETE FROM job_queue WHERE id = ?1")
                .bind(id.to_string())
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            return Ok(FailOutcome::Exhausted);
        }

        let retry_count = item.retry_count + 1;
        let next_attempt_at = Utc::now()
            + chrono::Duration::from_std(queue_backoff(retry_count)).unwrap_or_default();
        sqlx::query(
            "UPDATE job_queue
             SET retry_count = ?2, error_message = ?3, scheduled_at = ?4,
                 locked_at = NULL, locked_by = NULL
             WHERE id = ?1",
        )
        .bind(id.to_string())
        .bind(retry_count as i64)
        .bind(error)
        .bind(next_attempt_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(FailOutcome::Retried {
            retry_count,
            next_attempt_at,
        })
    }

    async fn queue_depth(&self, job_id: Uuid) -> StoreResult<QueueDepth> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS remaining,
                    COALESCE(SUM(CASE WHEN locked_at IS NOT NULL THEN 1 ELSE 0 END), 0) AS processing
             FROM job_queue WHERE job_id = ?1",
        )
        .bind(job_id.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(QueueDepth {
            remaining: row.try_get::<i64, _>("remaining").map_err(decode_err)? as u32,
            processing: row.try_get::<i64, _>("processing").map_err(decode_err)? as u32,
        })
    }

    async fn check_and_reserve(
        &self,
        service: &str,
        limits: &RateLimits,
        now: DateTime<Utc>,
    ) -> StoreResult<RateDecision> {
        let _guard = self.rmw_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT * FROM rate_limits WHERE service_name = ?1")
            .bind(service)
            .fetch_optional(&mut *tx)
            .await?;
        let mut budget = match row {
            Some(row) => row_to_budget(&row)?,
            None => RateBudget::new(service, now),
        };
        let decision = budget.check_and_reserve(limits, now);
        sqlx::query(
            "INSERT INTO rate_limits (
                service_name, minute_count, hour_count, day_count,
                reset_minute, reset_hour, reset_day, last_call_time
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(service_name) DO UPDATE SET
                minute_count = excluded.minute_count,
                hour_count = excluded.hour_count,
                day_count = excluded.day_count,
                reset_minute = excluded.reset_minute,
                reset_hour = excluded.reset_hour,
                reset_day = excluded.reset_day,
                last_call_time = excluded.last_call_time",
        )
        .bind(&budget.service_name)
        .bind(budget.minute_count as i64)
        .bind(budget.hour_count as i64)
        .bind(budget.day_count as i64)
        .bind(budget.reset_minute)
        .bind(budget.reset_hour)
        .bind(budget.reset_day)
        .bind(budget.last_call_time)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(decision)
    }

    async fn time_until_next_call(
        &self,
        service: &str,
        limits: &RateLimits,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let row = sqlx::query("SELECT * FROM rate_limits WHERE service_name = ?1")
            .bind(service)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(row) => row_to_budget(&row)?.time_until_next_call(limits, now),
            None => 0,
        })
    }

    async fn record_call(&self, log: &CallLog) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO api_call_logs (
                id, service_name, endpoint, ticker_symbol, response_status,
                response_time_ms, rate_limit_remaining, error_message, metadata, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(log.id.to_string())
        .bind(&log.service_name)
        .bind(&log.endpoint)
        .bind(&log.ticker_symbol)
        .bind(log.response_status as i64)
        .bind(log.response_time_ms as i64)
        .bind(log.rate_limit_remaining)
        .bind(&log.error_message)
        .bind(log.metadata.to_string())
        .bind(log.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_calls(&self, service: &str, since: DateTime<Utc>) -> StoreResult<Vec<CallLog>> {
        let rows = sqlx::query(
            "SELECT * FROM api_call_logs
             WHERE service_name = ?1 AND created_at >= ?2
             ORDER BY created_at ASC",
        )
        .bind(service)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_call_log).collect()
    }

    async fn get_user_by_key(&self, api_key: &str) -> StoreResult<Option<ApiUser>> {
        let row = sqlx::query("SELECT * FROM api_users WHERE api_key = ?1 AND is_active = 1")
            .bind(api_key)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_user(&r)).transpose()
    }

    async fn get_user(&self, id: Uuid) -> StoreResult<Option<ApiUser>> {
        let row = sqlx::query("SELECT * FROM api_users WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_user(&r)).transpose()
    }

    async fn upsert_user(&self, user: &ApiUser) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO api_users (
                id, api_key, user_name, plan_type, max_subscriptions, is_active, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                api_key = excluded.api_key,
                user_name = excluded.user_name,
                plan_type = excluded.plan_type,
                max_subscriptions = excluded.max_subscriptions,
                is_active = excluded.is_active",
        )
        .bind(user.id.to_string())
        .bind(&user.api_key)
        .bind(&user.user_name)
        .bind(user.plan_type.as_str())
        .bind(user.max_subscriptions as i64)
        .bind(user.is_active)
        .bind(user.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn subscribe(
        &self,
        user_id: Uuid,
        ticker: &str,
        priority: i32,
    ) -> StoreResult<Subscription> {
        let _guard = self.rmw_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let max: i64 = sqlx::query_scalar("SELECT max_subscriptions FROM api_users WHERE id = ?1")
            .bind(user_id.to_string())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("user {}", user_id)))?;

        let existing = sqlx::query(
            "SELECT * FROM user_subscriptions WHERE user_id = ?1 AND ticker_symbol = ?2",
        )
        .bind(user_id.to_string())
        .bind(ticker)
        .fetch_optional(&mut *tx)
        .await?;

        if existing.is_some() {
            sqlx::query(
                "UPDATE user_subscriptions SET priority = ?3
                 WHERE user_id = ?1 AND ticker_symbol = ?2",
            )
            .bind(user_id.to_string())
            .bind(ticker)
            .bind(priority.clamp(1, 2) as i64)
            .execute(&mut *tx)
            .await?;
        } else {
            let current: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM user_subscriptions WHERE user_id = ?1")
                    .bind(user_id.to_string())
                    .fetch_one(&mut *tx)
                    .await?;
            if current >= max {
                return Err(StoreError::Conflict(format!(
                    "Subscription limit reached, limit={}, current={}",
                    max, current
                )));
            }
            let subscription = Subscription::new(user_id, ticker, priority, Utc::now());
            sqlx::query(
                "INSERT INTO user_subscriptions (
                    user_id, ticker_symbol, priority, subscribed_at,
                    notification_enabled, auto_update_enabled
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .bind(user_id.to_string())
            .bind(ticker)
            .bind(subscription.priority as i64)
            .bind(subscription.subscribed_at)
            .bind(subscription.notification_enabled)
            .bind(subscription.auto_update_enabled)
            .execute(&mut *tx)
            .await?;
        }

        let row = sqlx::query(
            "SELECT * FROM user_subscriptions WHERE user_id = ?1 AND ticker_symbol = ?2",
        )
        .bind(user_id.to_string())
        .bind(ticker)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        row_to_subscription(&row)
    }

    async fn unsubscribe(&self, user_id: Uuid, ticker: &str) -> StoreResult<()> {
        let result = sqlx::query(
            "DELETE FROM user_subscriptions WHERE user_id = ?1 AND ticker_symbol = ?2",
        )
        .bind(user_id.to_string())
        .bind(ticker)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "subscription {} for user {}",
                ticker, user_id
            )));
        }
        Ok(())
    }

    async fn list_subscriptions(&self, user_id: Uuid) -> StoreResult<Vec<Subscription>> {
        let rows = sqlx::query(
            "SELECT * FROM user_subscriptions WHERE user_id = ?1 ORDER BY subscribed_at DESC",
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_subscription).collect()
    }

    async fn log_subscription_activity(
        &self,
        activity: &SubscriptionActivity,
    ) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO subscription_activity (
                id, user_id, ticker_symbol, action, detail, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(activity.id.to_string())
        .bind(activity.user_id.to_string())
        .bind(&activity.ticker_symbol)
        .bind(&activity.action)
        .bind(activity.detail.to_string())
        .bind(activity.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn stats(&self) -> StoreResult<StoreStats> {
        let tickers: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tickers")
            .fetch_one(&self.pool)
            .await?;
        let dividends: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dividends")
            .fetch_one(&self.pool)
            .await?;
        let jobs_pending: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM api_jobs WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await?;
        let jobs_processing: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM api_jobs WHERE status = 'processing'")
                .fetch_one(&self.pool)
                .await?;
        let queue_items: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM job_queue")
            .fetch_one(&self.pool)
            .await?;
        Ok(StoreStats {
            tickers: tickers as u64,
            dividends: dividends as u64,
            jobs_pending: jobs_pending as u64,
            jobs_processing: jobs_processing as u64,
            queue_items: queue_items as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    async fn test_store() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:").await.unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_ticker_round_trip() {
        let store = test_store().await;
        let created = store.upsert_ticker("AAPL").await.unwrap();
        assert!(created.is_active);
        assert!(created.last_dividend_update.is_none());

        let again = store.upsert_ticker("AAPL").await.unwrap();
        assert_eq!(created.created_at, again.created_at);

        let now = Utc::now();
        store.touch_ticker_update("AAPL", now).await.unwrap();
        let loaded = store.get_ticker("AAPL").await.unwrap().unwrap();
        assert_eq!(loaded.last_dividend_update, Some(now));
    }

    #[tokio::test]
    async fn test_dividend_upsert_and_filters() {
        let store = test_store().await;
        store.upsert_ticker("AAPL").await.unwrap();

        let now = Utc::now();
        let records = vec![
            Dividend::new("AAPL", date(2024, 2, 9), Decimal::new(24, 2), now),
            Dividend::new("AAPL", date(2024, 5, 10), Decimal::new(25, 2), now),
            Dividend::new("AAPL", date(2024, 8, 12), Decimal::new(25, 2), now),
        ];
        let summary = store.upsert_dividends("AAPL", &records).await.unwrap();
        assert_eq!(summary.inserted, 3);
        assert_eq!(summary.errors, 0);

        // Re-applying the batch does not duplicate rows
        store.upsert_dividends("AAPL", &records).await.unwrap();
        let all = store
            .dividends_for_ticker("AAPL", &DividendFilter::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].ex_dividend_date, date(2024, 8, 12)); // newest first

        let windowed = store
            .dividends_for_ticker(
                "AAPL",
                &DividendFilter {
                    start_date: Some(date(2024, 4, 1)),
                    end_date: Some(date(2024, 6, 30)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(windowed.len(), 1);
        assert_eq!(windowed[0].ex_dividend_date, date(2024, 5, 10));
    }

    #[tokio::test]
    async fn test_job_queue_lifecycle() {
        let store = test_store().await;
        let job = store
            .create_job(NewJob::dividend_update(
                vec!["AAPL".into(), "MSFT".into()],
                2,
                false,
            ))
            .await
            .unwrap();
        store
            .enqueue(job.id, &["AAPL".to_string(), "MSFT".to_string()], 2)
            .await
            .unwrap();

        let leased = store.lease_queue_items(5, "worker-1").await.unwrap();
        assert_eq!(leased.len(), 2);
        assert!(store.lease_queue_items(5, "worker-2").await.unwrap().is_empty());

        store.mark_job_processing(job.id).await.unwrap();
        store.complete_item(leased[0].id).await.unwrap();
        store.advance_job(job.id, 1, 0).await.unwrap();
        assert_eq!(store.finalize_job_if_drained(job.id).await.unwrap(), None);

        match store.fail_item(leased[1].id, "upstream 500").await.unwrap() {
            FailOutcome::Retried { retry_count, .. } => assert_eq!(retry_count, 1),
            FailOutcome::Exhausted => panic!("should retry first"),
        }
        // Rescheduled into the future, so not leasable yet
        assert!(store.lease_queue_items(5, "worker-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_pending_job_purges_queue() {
        let store = test_store().await;
        let job = store
            .create_job(NewJob::dividend_update(vec!["X".into(), "Y".into()], 1, false))
            .await
            .unwrap();
        store
            .enqueue(job.id, &["X".to_string(), "Y".to_string()], 1)
            .await
            .unwrap();

        let cancelled = store.cancel_job(job.id).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert_eq!(store.queue_depth(job.id).await.unwrap().remaining, 0);
        assert!(matches!(
            store.cancel_job(job.id).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_rate_budget_persists() {
        let store = test_store().await;
        let limits = RateLimits::polygon();
        let now = Utc::now();
        for _ in 0..5 {
            assert!(store
                .check_and_reserve("polygon", &limits, now)
                .await
                .unwrap()
                .is_admitted());
        }
        assert!(!store
            .check_and_reserve("polygon", &limits, now)
            .await
            .unwrap()
            .is_admitted());
        assert!(store
            .time_until_next_call("polygon", &limits, now)
            .await
            .unwrap()
            > 0);
    }

    #[tokio::test]
    async fn test_subscription_cap_enforced() {
        let store = test_store().await;
        let mut user = ApiUser::new("tk_sql_user", PlanType::Free, Utc::now());
        user.max_subscriptions = 1;
        store.upsert_user(&user).await.unwrap();

        store.subscribe(user.id, "AAPL", 1).await.unwrap();
        assert!(matches!(
            store.subscribe(user.id, "MSFT", 1).await,
            Err(StoreError::Conflict(_))
        ));

        store.unsubscribe(user.id, "AAPL").await.unwrap();
        assert!(matches!(
            store.unsubscribe(user.id, "AAPL").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_inactive_user_not_returned_by_key() {
        let store = test_store().await;
        let mut user = ApiUser::new("tk_gone_user", PlanType::Basic, Utc::now());
        user.is_active = false;
        store.upsert_user(&user).await.unwrap();
        assert!(store
            .get_user_by_key("tk_gone_user")
            .await
            .unwrap()
            .is_none());
    }
}
