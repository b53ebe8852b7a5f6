//! Favorites repository

use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::db::models::FavoriteRow;

/// Add a favorite; an existing one keeps its original timestamp
pub async fn add(pool: &PgPool, playlist_id: Uuid, channel_id: &str) -> Result<FavoriteRow, sqlx::Error> {
    sqlx::query_as::<_, FavoriteRow>(
        r#"
        INSERT INTO favorites (playlist_id, channel_id)
        VALUES ($1, $2)
        ON CONFLICT (playlist_id, channel_id) DO UPDATE SET channel_id = EXCLUDED.channel_id
        RETURNING playlist_id, channel_id, added_at
        "#,
    )
    .bind(playlist_id)
    .bind(channel_id)
    .fetch_one(pool)
    .await
}

pub async fn remove(pool: &PgPool, playlist_id: Uuid, channel_id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM favorites WHERE playlist_id = $1 AND channel_id = $2")
        .bind(playlist_id)
        .bind(channel_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn get_by_playlist(pool: &PgPool, playlist_id: Uuid) -> Result<Vec<FavoriteRow>, sqlx::Error> {
    sqlx::query_as::<_, FavoriteRow>(
        r#"
        SELECT playlist_id, channel_id, added_at
        FROM favorites
        WHERE playlist_id = $1
        ORDER BY added_at, channel_id
        "#,
    )
    .bind(playlist_id)
    .fetch_all(pool)
    .await
}

/// Favorite channel ids, read inside the changeset transaction
pub async fn channel_ids(conn: &mut PgConnection, playlist_id: Uuid) -> Result<Vec<String>, sqlx::Error> {
    let rows: Vec<(String,)> = sqlx::query_as("SELECT channel_id FROM favorites WHERE playlist_id = $1")
        .bind(playlist_id)
        .fetch_all(conn)
        .await?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}
