//! Queries against the `content` table.

use serde::Serialize;
use sqlx::{FromRow, PgConnection};

use crate::db::DbError;

/// Upper bound on `content.url`, matching the column type.
pub const MAX_URL_LEN: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct ContentRow {
    pub id: i32,
    pub url: String,
    pub body: Option<String>,
}

pub async fn insert(
    conn: &mut PgConnection,
    url: &str,
    body: Option<&str>,
) -> Result<ContentRow, DbError> {
    let row = sqlx::query_as::<_, ContentRow>(
        "INSERT INTO content (url, body)
         VALUES ($1, $2)
         RETURNING id, url, body",
    )
    .bind(url)
    .bind(body)
    .fetch_one(&mut *conn)
    .await?;
    Ok(row)
}

/// Inserts or replaces the body stored for `url`.
pub async fn upsert(
    conn: &mut PgConnection,
    url: &str,
    body: Option<&str>,
) -> Result<ContentRow, DbError> {
    let row = sqlx::query_as::<_, ContentRow>(
        "INSERT INTO content (url, body)
         VALUES ($1, $2)
         ON CONFLICT (url) DO UPDATE SET body = excluded.body
         RETURNING id, url, body",
    )
    .bind(url)
    .bind(body)
    .fetch_one(&mut *conn)
    .await?;
    Ok(row)
}

pub async fn get(conn: &mut PgConnection, id: i32) -> Result<Option<ContentRow>, DbError> {
    let row = sqlx::query_as::<_, ContentRow>("SELECT id, url, body FROM content WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row)
}

pub async fn list(
    conn: &mut PgConnection,
    limit: i64,
    offset: i64,
) -> Result<Vec<ContentRow>, DbError> {
    let rows = sqlx::query_as::<_, ContentRow>(
        "SELECT id, url, body
         FROM content
         ORDER BY id ASC
         LIMIT $1 OFFSET $2",
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

/// Returns the number of rows removed.
pub async fn delete_by_url(conn: &mut PgConnection, url: &str) -> Result<u64, DbError> {
    let deleted = sqlx::query("DELETE FROM content WHERE url = $1")
        .bind(url)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    Ok(deleted)
}
