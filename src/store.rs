use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use sqlx::QueryBuilder;
use tracing::info;

use crate::db::Db;
use crate::models::Attempt;

/// Upper bound on rows per INSERT statement.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Persistence layer for attempts: bulk insert with sequence-assigned ids,
/// full-table truncation, and the window aggregates behind the
/// store-sourced report builder.
#[derive(Clone)]
pub struct AttemptStore {
    db: Db,
    chunk_size: usize,
}

impl AttemptStore {
    pub fn new(db: Db) -> Self {
        Self {
            db,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Chunk size only affects statement sizing, never the persisted rows.
    pub fn with_chunk_size(db: Db, chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk size must be positive");
        Self { db, chunk_size }
    }

    /// Persist transient attempts in order, assigning each a fresh id from
    /// `attempts_id_seq` in submission order.
    ///
    /// Each chunk commits on its own: if chunk k fails, chunks 1..k-1 stay
    /// durable and the error propagates. Callers must treat a failed call
    /// as having persisted an unspecified prefix of chunks.
    pub async fn insert_many(&self, attempts: &mut [Attempt]) -> Result<()> {
        if attempts.is_empty() {
            return Ok(());
        }
        let total = attempts.len();
        for chunk in attempts.chunks_mut(self.chunk_size) {
            self.insert_chunk(chunk).await?;
        }
        info!("inserted {} attempts", total);
        Ok(())
    }

    async fn insert_chunk(&self, chunk: &mut [Attempt]) -> Result<()> {
        let mut tx = self.db.begin().await.context("failed to open transaction")?;

        // Reserve len(chunk) ids in one round trip; nextval order is the
        // assignment order.
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT nextval('attempts_id_seq') FROM generate_series(1, $1)",
        )
        .bind(chunk.len() as i64)
        .fetch_all(&mut *tx)
        .await
        .context("failed to reserve attempt ids")?;

        for (attempt, id) in chunk.iter_mut().zip(&ids) {
            attempt.id = Some(*id);
        }

        let mut qb = QueryBuilder::new(
            "INSERT INTO attempts (id, user_id, created_at, attempt_type, is_correct, \
             oauth_consumer_key, lis_result_sourcedid, lis_outcome_service_url) ",
        );
        qb.push_values(chunk.iter(), |mut row, attempt| {
            row.push_bind(attempt.id)
                .push_bind(&attempt.user_id)
                .push_bind(attempt.created_at)
                .push_bind(attempt.attempt_type.as_str())
                .push_bind(attempt.is_correct)
                .push_bind(&attempt.oauth_consumer_key)
                .push_bind(&attempt.lis_result_sourcedid)
                .push_bind(&attempt.lis_outcome_service_url);
        });
        qb.build()
            .execute(&mut *tx)
            .await
            .context("failed to insert attempt chunk")?;

        tx.commit().await.context("failed to commit attempt chunk")?;
        Ok(())
    }

    /// Remove every persisted attempt. The id sequence is left untouched,
    /// so ids keep increasing across truncations.
    pub async fn truncate(&self) -> Result<()> {
        sqlx::query("TRUNCATE attempts")
            .execute(&self.db)
            .await
            .context("failed to truncate attempts")?;
        info!("attempts truncated");
        Ok(())
    }

    pub async fn count_operations(&self, start: NaiveDateTime, end: NaiveDateTime) -> Result<u64> {
        let n: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM attempts WHERE created_at >= $1 AND created_at <= $2",
        )
        .bind(start)
        .bind(end)
        .fetch_one(&self.db)
        .await?;
        Ok(n as u64)
    }

    pub async fn count_unique_users(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<u64> {
        let n: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT user_id) FROM attempts \
             WHERE created_at >= $1 AND created_at <= $2",
        )
        .bind(start)
        .bind(end)
        .fetch_one(&self.db)
        .await?;
        Ok(n as u64)
    }

    pub async fn count_success_submits(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<u64> {
        let n: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM attempts \
             WHERE attempt_type = 'submit' AND is_correct = TRUE \
             AND created_at >= $1 AND created_at <= $2",
        )
        .bind(start)
        .bind(end)
        .fetch_one(&self.db)
        .await?;
        Ok(n as u64)
    }

    pub async fn count_failure_submits(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<u64> {
        let n: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM attempts \
             WHERE attempt_type = 'submit' AND is_correct = FALSE \
             AND created_at >= $1 AND created_at <= $2",
        )
        .bind(start)
        .bind(end)
        .fetch_one(&self.db)
        .await?;
        Ok(n as u64)
    }

    /// Per-user submit counts in the window; users with no submits are
    /// absent from the result.
    pub async fn submit_counts_by_user(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<(String, u64)>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT user_id, COUNT(*) FROM attempts \
             WHERE attempt_type = 'submit' \
             AND created_at >= $1 AND created_at <= $2 \
             GROUP BY user_id",
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.db)
        .await?;
        Ok(rows.into_iter().map(|(u, n)| (u, n as u64)).collect())
    }
}
