//! Catalog repository: categories, channels and EPG entries of a playlist
//!
//! Reads go straight to the pool. Writes go through [`CatalogWriter`], which
//! holds one transaction for a whole changeset and batches rows through
//! `UNNEST` upserts.

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::db::models::{CategoryRow, ChannelRow, EpgRow};
use crate::models::{Category, CatchUp, Channel, EpgEntry};

const BATCH_SIZE: usize = 500;

pub async fn get_categories(pool: &PgPool, playlist_id: Uuid) -> Result<Vec<CategoryRow>, sqlx::Error> {
    sqlx::query_as::<_, CategoryRow>(
        r#"
        SELECT id, name, sort_order, media_kind
        FROM categories
        WHERE playlist_id = $1
        ORDER BY sort_order, id
        "#,
    )
    .bind(playlist_id)
    .fetch_all(pool)
    .await
}

pub async fn get_channels(pool: &PgPool, playlist_id: Uuid) -> Result<Vec<ChannelRow>, sqlx::Error> {
    sqlx::query_as::<_, ChannelRow>(
        r#"
        SELECT id, name, stream_url, logo_url, category_id, epg_id, media_kind,
               channel_number, catchup, stale
        FROM channels
        WHERE playlist_id = $1
        ORDER BY sort_order, id
        "#,
    )
    .bind(playlist_id)
    .fetch_all(pool)
    .await
}

pub async fn get_epg(pool: &PgPool, playlist_id: Uuid) -> Result<Vec<EpgRow>, sqlx::Error> {
    sqlx::query_as::<_, EpgRow>(
        r#"
        SELECT id, channel_id, title, start_at, end_at, description
        FROM epg_entries
        WHERE playlist_id = $1
        ORDER BY channel_id, start_at
        "#,
    )
    .bind(playlist_id)
    .fetch_all(pool)
    .await
}

/// Transactional writer for one changeset
pub struct CatalogWriter<'a> {
    tx: Transaction<'a, Postgres>,
    playlist_id: Uuid,
    rows_written: usize,
}

impl<'a> CatalogWriter<'a> {
    pub async fn new(pool: &PgPool, playlist_id: Uuid) -> Result<CatalogWriter<'static>, sqlx::Error> {
        let tx = pool.begin().await?;

        Ok(CatalogWriter {
            tx,
            playlist_id,
            rows_written: 0,
        })
    }

    /// Connection of the open transaction, for statements outside this module
    pub fn conn(&mut self) -> &mut PgConnection {
        &mut *self.tx
    }

    pub async fn upsert_categories(&mut self, categories: &[&Category]) -> Result<(), sqlx::Error> {
        for batch in categories.chunks(BATCH_SIZE) {
            let ids: Vec<&str> = batch.iter().map(|c| c.id.as_str()).collect();
            let names: Vec<&str> = batch.iter().map(|c| c.name.as_str()).collect();
            let orders: Vec<i32> = batch.iter().map(|c| c.order as i32).collect();
            let kinds: Vec<String> = batch.iter().map(|c| c.media_kind.to_string()).collect();

            sqlx::query(
                r#"
                INSERT INTO categories (playlist_id, id, name, sort_order, media_kind)
                SELECT $1, * FROM UNNEST($2::text[], $3::text[], $4::int4[], $5::text[])
                ON CONFLICT (playlist_id, id) DO UPDATE SET
                    name = EXCLUDED.name,
                    sort_order = EXCLUDED.sort_order,
                    media_kind = EXCLUDED.media_kind
                "#,
            )
            .bind(self.playlist_id)
            .bind(&ids)
            .bind(&names)
            .bind(&orders)
            .bind(&kinds)
            .execute(&mut *self.tx)
            .await?;

            self.rows_written += batch.len();
        }
        Ok(())
    }

    /// Upsert channels; `positions` carries each channel's index in the new set
    pub async fn upsert_channels(&mut self, channels: &[(usize, &Channel)]) -> Result<(), sqlx::Error> {
        for batch in channels.chunks(BATCH_SIZE) {
            let ids: Vec<&str> = batch.iter().map(|(_, c)| c.id.as_str()).collect();
            let names: Vec<&str> = batch.iter().map(|(_, c)| c.name.as_str()).collect();
            let urls: Vec<&str> = batch.iter().map(|(_, c)| c.stream_url.as_str()).collect();
            let logos: Vec<Option<&str>> = batch.iter().map(|(_, c)| c.logo_url.as_deref()).collect();
            let categories: Vec<&str> = batch.iter().map(|(_, c)| c.category_id.as_str()).collect();
            let epg_ids: Vec<Option<&str>> = batch.iter().map(|(_, c)| c.epg_id.as_deref()).collect();
            let kinds: Vec<String> = batch.iter().map(|(_, c)| c.media_kind.to_string()).collect();
            let numbers: Vec<Option<i32>> = batch
                .iter()
                .map(|(_, c)| c.number.and_then(|n| i32::try_from(n).ok()))
                .collect();
            let catchups: Vec<Option<Json<&CatchUp>>> =
                batch.iter().map(|(_, c)| c.catchup.as_ref().map(Json)).collect();
            let stale: Vec<bool> = batch.iter().map(|(_, c)| c.stale).collect();
            let positions: Vec<i32> = batch.iter().map(|(p, _)| *p as i32).collect();

            sqlx::query(
                r#"
                INSERT INTO channels (playlist_id, id, name, stream_url, logo_url, category_id, epg_id,
                                      media_kind, channel_number, catchup, stale, sort_order)
                SELECT $1, * FROM UNNEST($2::text[], $3::text[], $4::text[], $5::text[], $6::text[],
                                         $7::text[], $8::text[], $9::int4[], $10::jsonb[], $11::bool[],
                                         $12::int4[])
                ON CONFLICT (playlist_id, id) DO UPDATE SET
                    name = EXCLUDED.name,
                    stream_url = EXCLUDED.stream_url,
                    logo_url = EXCLUDED.logo_url,
                    category_id = EXCLUDED.category_id,
                    epg_id = EXCLUDED.epg_id,
                    media_kind = EXCLUDED.media_kind,
                    channel_number = EXCLUDED.channel_number,
                    catchup = EXCLUDED.catchup,
                    stale = EXCLUDED.stale,
                    sort_order = EXCLUDED.sort_order
                "#,
            )
            .bind(self.playlist_id)
            .bind(&ids)
            .bind(&names)
            .bind(&urls)
            .bind(&logos)
            .bind(&categories)
            .bind(&epg_ids)
            .bind(&kinds)
            .bind(&numbers)
            .bind(&catchups)
            .bind(&stale)
            .bind(&positions)
            .execute(&mut *self.tx)
            .await?;

            self.rows_written += batch.len();
        }
        Ok(())
    }

    pub async fn upsert_epg(&mut self, entries: &[&EpgEntry]) -> Result<(), sqlx::Error> {
        for batch in entries.chunks(BATCH_SIZE) {
            let ids: Vec<&str> = batch.iter().map(|e| e.id.as_str()).collect();
            let channels: Vec<&str> = batch.iter().map(|e| e.channel_id.as_str()).collect();
            let titles: Vec<&str> = batch.iter().map(|e| e.title.as_str()).collect();
            let starts: Vec<DateTime<Utc>> = batch.iter().map(|e| e.start).collect();
            let ends: Vec<DateTime<Utc>> = batch.iter().map(|e| e.end).collect();
            let descriptions: Vec<Option<&str>> = batch.iter().map(|e| e.description.as_deref()).collect();

            sqlx::query(
                r#"
                INSERT INTO epg_entries (playlist_id, id, channel_id, title, start_at, end_at, description)
                SELECT $1, * FROM UNNEST($2::text[], $3::text[], $4::text[], $5::timestamptz[],
                                         $6::timestamptz[], $7::text[])
                ON CONFLICT (playlist_id, id) DO UPDATE SET
                    channel_id = EXCLUDED.channel_id,
                    title = EXCLUDED.title,
                    start_at = EXCLUDED.start_at,
                    end_at = EXCLUDED.end_at,
                    description = EXCLUDED.description
                "#,
            )
            .bind(self.playlist_id)
            .bind(&ids)
            .bind(&channels)
            .bind(&titles)
            .bind(&starts)
            .bind(&ends)
            .bind(&descriptions)
            .execute(&mut *self.tx)
            .await?;

            self.rows_written += batch.len();
        }
        Ok(())
    }

    pub async fn delete_channels(&mut self, ids: &[String]) -> Result<u64, sqlx::Error> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM channels WHERE playlist_id = $1 AND id = ANY($2)")
            .bind(self.playlist_id)
            .bind(ids)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn mark_channels_stale(&mut self, ids: &[String]) -> Result<u64, sqlx::Error> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("UPDATE channels SET stale = TRUE WHERE playlist_id = $1 AND id = ANY($2)")
            .bind(self.playlist_id)
            .bind(ids)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    /// Renumber `sort_order` to follow `ids`; channels not listed (stale
    /// favorites) keep their relative order after them
    pub async fn reorder_channels(&mut self, ids: &[&str]) -> Result<u64, sqlx::Error> {
        let mut changed = 0;
        for (n, batch) in ids.chunks(BATCH_SIZE).enumerate() {
            let offset = n * BATCH_SIZE;
            let positions: Vec<i32> = (0..batch.len()).map(|i| (offset + i) as i32).collect();
            let result = sqlx::query(
                r#"
                UPDATE channels ch SET sort_order = o.pos
                FROM UNNEST($2::text[], $3::int4[]) AS o(id, pos)
                WHERE ch.playlist_id = $1 AND ch.id = o.id AND ch.sort_order <> o.pos
                "#,
            )
            .bind(self.playlist_id)
            .bind(batch)
            .bind(&positions)
            .execute(&mut *self.tx)
            .await?;
            changed += result.rows_affected();
        }

        let result = sqlx::query(
            r#"
            UPDATE channels ch SET sort_order = r.pos
            FROM (
                SELECT id, ($3 + ROW_NUMBER() OVER (ORDER BY sort_order, id) - 1)::int4 AS pos
                FROM channels
                WHERE playlist_id = $1 AND NOT (id = ANY($2))
            ) r
            WHERE ch.playlist_id = $1 AND ch.id = r.id AND ch.sort_order <> r.pos
            "#,
        )
        .bind(self.playlist_id)
        .bind(ids)
        .bind(ids.len() as i32)
        .execute(&mut *self.tx)
        .await?;
        Ok(changed + result.rows_affected())
    }

    /// Delete categories that no remaining channel refers to
    pub async fn delete_unreferenced_categories(&mut self, ids: &[String]) -> Result<u64, sqlx::Error> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"
            DELETE FROM categories cat
            WHERE cat.playlist_id = $1 AND cat.id = ANY($2)
              AND NOT EXISTS (
                  SELECT 1 FROM channels ch
                  WHERE ch.playlist_id = cat.playlist_id AND ch.category_id = cat.id
              )
            "#,
        )
        .bind(self.playlist_id)
        .bind(ids)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_epg(&mut self, ids: &[String]) -> Result<u64, sqlx::Error> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM epg_entries WHERE playlist_id = $1 AND id = ANY($2)")
            .bind(self.playlist_id)
            .bind(ids)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    /// Commit the transaction
    pub async fn finish(self) -> Result<usize, sqlx::Error> {
        self.tx.commit().await?;
        Ok(self.rows_written)
    }
}
