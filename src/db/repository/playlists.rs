//! Playlist repository for database operations

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::db::models::PlaylistRow;
use crate::models::{Playlist, SyncStatus};

const PLAYLIST_COLUMNS: &str =
    "id, name, source, status, last_error, last_synced_at, dropped_records";

/// Create or update a playlist
pub async fn upsert_playlist(pool: &PgPool, playlist: &Playlist) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO playlists (id, name, source_kind, source, status, last_error, last_synced_at, dropped_records)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (id) DO UPDATE SET
            name = EXCLUDED.name,
            source_kind = EXCLUDED.source_kind,
            source = EXCLUDED.source,
            status = EXCLUDED.status,
            last_error = EXCLUDED.last_error,
            last_synced_at = EXCLUDED.last_synced_at,
            dropped_records = EXCLUDED.dropped_records,
            updated_at = NOW()
        "#,
    )
    .bind(playlist.id)
    .bind(&playlist.name)
    .bind(playlist.kind().to_string())
    .bind(Json(&playlist.source))
    .bind(playlist.status.to_string())
    .bind(&playlist.last_error)
    .bind(playlist.last_synced_at)
    .bind(playlist.dropped_records as i32)
    .execute(pool)
    .await?;

    Ok(())
}

/// Find playlist by ID
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<PlaylistRow>, sqlx::Error> {
    let query = format!("SELECT {} FROM playlists WHERE id = $1", PLAYLIST_COLUMNS);
    sqlx::query_as::<_, PlaylistRow>(&query)
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// All playlists, oldest first
pub async fn list_all(pool: &PgPool) -> Result<Vec<PlaylistRow>, sqlx::Error> {
    let query = format!("SELECT {} FROM playlists ORDER BY created_at, id", PLAYLIST_COLUMNS);
    sqlx::query_as::<_, PlaylistRow>(&query).fetch_all(pool).await
}

/// Delete a playlist; catalog rows and favorites go with it (CASCADE)
pub async fn delete_playlist(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM playlists WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Update the sync state; returns false when the playlist does not exist
pub async fn update_status(
    pool: &PgPool,
    id: Uuid,
    status: SyncStatus,
    last_error: Option<&str>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE playlists
        SET status = $2, last_error = $3, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(status.to_string())
    .bind(last_error)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Record a successful cycle inside the changeset transaction
pub async fn record_sync(
    conn: &mut PgConnection,
    id: Uuid,
    synced_at: DateTime<Utc>,
    dropped_records: usize,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE playlists
        SET status = 'idle', last_error = NULL, last_synced_at = $2,
            dropped_records = $3, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(synced_at)
    .bind(dropped_records.min(i32::MAX as usize) as i32)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() > 0)
}
