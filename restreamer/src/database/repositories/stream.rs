//! Stream repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::{DestinationDbModel, StreamDbModel};
use crate::database::time;
use crate::domain::{DestinationState, Stream, StreamState};
use crate::{Error, Result};

/// Stream repository trait.
///
/// All operations are plain read/modify/write; callers are responsible for
/// serializing concurrent transitions of the same stream (the lifecycle
/// manager's per-stream locks).
#[async_trait]
pub trait StreamRepository: Send + Sync {
    async fn get_stream(&self, id: &str) -> Result<Stream>;
    async fn find_stream_by_api_key(&self, api_key: &str) -> Result<Option<Stream>>;
    async fn list_streams(&self) -> Result<Vec<Stream>>;
    async fn create_stream(&self, stream: &Stream) -> Result<()>;
    /// Persist the whole stream aggregate (row + destination rows).
    async fn update_stream(&self, stream: &Stream) -> Result<()>;
    async fn update_stream_state(
        &self,
        id: &str,
        state: StreamState,
        started_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<()>;
    async fn update_destination_state(
        &self,
        stream_id: &str,
        destination_id: &str,
        state: DestinationState,
        last_error: Option<&str>,
    ) -> Result<()>;
    async fn delete_stream(&self, id: &str) -> Result<()>;
}

/// SQLx implementation of StreamRepository.
pub struct SqlxStreamRepository {
    pool: SqlitePool,
}

impl SqlxStreamRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn destinations_for(&self, stream_id: &str) -> Result<Vec<DestinationDbModel>> {
        let rows = sqlx::query_as::<_, DestinationDbModel>(
            "SELECT * FROM destinations WHERE stream_id = ? ORDER BY position",
        )
        .bind(stream_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl StreamRepository for SqlxStreamRepository {
    async fn get_stream(&self, id: &str) -> Result<Stream> {
        let row = sqlx::query_as::<_, StreamDbModel>("SELECT * FROM streams WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Stream", id))?;

        let destinations = self.destinations_for(&row.id).await?;
        row.into_domain(destinations)
    }

    async fn find_stream_by_api_key(&self, api_key: &str) -> Result<Option<Stream>> {
        let row = sqlx::query_as::<_, StreamDbModel>("SELECT * FROM streams WHERE api_key = ?")
            .bind(api_key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let destinations = self.destinations_for(&row.id).await?;
                Ok(Some(row.into_domain(destinations)?))
            }
            None => Ok(None),
        }
    }

    async fn list_streams(&self) -> Result<Vec<Stream>> {
        let rows = sqlx::query_as::<_, StreamDbModel>("SELECT * FROM streams ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;

        let mut streams = Vec::with_capacity(rows.len());
        for row in rows {
            let destinations = self.destinations_for(&row.id).await?;
            streams.push(row.into_domain(destinations)?);
        }
        Ok(streams)
    }

    async fn create_stream(&self, stream: &Stream) -> Result<()> {
        let model = StreamDbModel::from_domain(stream);
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO streams (
                id, name, api_key, state, last_error, ffmpeg_flags,
                created_at, started_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&model.id)
        .bind(&model.name)
        .bind(&model.api_key)
        .bind(&model.state)
        .bind(&model.last_error)
        .bind(&model.ffmpeg_flags)
        .bind(model.created_at)
        .bind(model.started_at)
        .bind(model.updated_at)
        .execute(&mut *tx)
        .await?;

        for (position, dest) in stream.destinations.iter().enumerate() {
            let row = DestinationDbModel::from_domain(&stream.id, position, dest);
            insert_destination(&mut tx, &row).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn update_stream(&self, stream: &Stream) -> Result<()> {
        let model = StreamDbModel::from_domain(stream);
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE streams SET
                name = ?,
                state = ?,
                last_error = ?,
                ffmpeg_flags = ?,
                started_at = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&model.name)
        .bind(&model.state)
        .bind(&model.last_error)
        .bind(&model.ffmpeg_flags)
        .bind(model.started_at)
        .bind(model.updated_at)
        .bind(&model.id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("Stream", &stream.id));
        }

        // Destination rows are replaced wholesale; the set is small and this
        // keeps ordering and removals trivially correct.
        sqlx::query("DELETE FROM destinations WHERE stream_id = ?")
            .bind(&stream.id)
            .execute(&mut *tx)
            .await?;

        for (position, dest) in stream.destinations.iter().enumerate() {
            let row = DestinationDbModel::from_domain(&stream.id, position, dest);
            insert_destination(&mut tx, &row).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn update_stream_state(
        &self,
        id: &str,
        state: StreamState,
        started_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<()> {
        let result =
            sqlx::query("UPDATE streams SET state = ?, started_at = ?, updated_at = ? WHERE id = ?")
                .bind(state.as_str())
                .bind(started_at.map(time::to_ms))
                .bind(time::now_ms())
                .bind(id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("Stream", id));
        }
        Ok(())
    }

    async fn update_destination_state(
        &self,
        stream_id: &str,
        destination_id: &str,
        state: DestinationState,
        last_error: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE destinations SET state = ?, last_error = ? WHERE stream_id = ? AND id = ?",
        )
        .bind(state.as_str())
        .bind(last_error)
        .bind(stream_id)
        .bind(destination_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("Destination", destination_id));
        }
        Ok(())
    }

    async fn delete_stream(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM streams WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("Stream", id));
        }
        Ok(())
    }
}

async fn insert_destination(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    row: &DestinationDbModel,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO destinations (
            id, stream_id, position, platform, server_url, stream_key,
            state, enabled, last_error, ffmpeg_flags
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&row.id)
    .bind(&row.stream_id)
    .bind(row.position)
    .bind(&row.platform)
    .bind(&row.server_url)
    .bind(&row.stream_key)
    .bind(&row.state)
    .bind(row.enabled)
    .bind(&row.last_error)
    .bind(&row.ffmpeg_flags)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
