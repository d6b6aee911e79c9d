use crate::domain::{Coordinate, Post, Radius};
use crate::error::{ServiceError, ServiceResult};
use crate::geo::{haversine_distance, BoundingBox, GeoIndex, PostStore};
use crate::propagation::posts::PostWriter;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection, PgPool};
use std::collections::HashSet;
use tracing::debug;
use transactional_outbox::{OutboxEvent, SqlxOutboxRepository};
use uuid::Uuid;

#[derive(Debug, FromRow)]
struct PostRow {
    id: Uuid,
    author_id: Uuid,
    latitude: f64,
    longitude: f64,
    content_ref: String,
    created_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<PostRow> for Post {
    type Error = ServiceError;

    fn try_from(row: PostRow) -> Result<Self, Self::Error> {
        Ok(Post {
            id: row.id,
            author_id: row.author_id,
            coordinate: Coordinate::new(row.latitude, row.longitude)?,
            content_ref: row.content_ref,
            created_at: row.created_at,
            deleted_at: row.deleted_at,
        })
    }
}

fn into_posts(rows: Vec<PostRow>) -> ServiceResult<Vec<Post>> {
    rows.into_iter().map(Post::try_from).collect()
}

const POST_COLUMNS: &str =
    "id, author_id, latitude, longitude, content_ref, created_at, deleted_at";

/// Posts table access. Also serves as the database-backed [`GeoIndex`].
#[derive(Clone)]
pub struct PgPostRepository {
    pool: PgPool,
    outbox: std::sync::Arc<SqlxOutboxRepository>,
}

impl PgPostRepository {
    pub fn new(pool: PgPool) -> Self {
        let outbox = std::sync::Arc::new(SqlxOutboxRepository::new(pool.clone()));
        Self { pool, outbox }
    }

    /// Every live post, for warming an in-process index
    pub async fn load_live(&self) -> ServiceResult<Vec<Post>> {
        let rows = sqlx::query_as::<_, PostRow>(&format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE deleted_at IS NULL"
        ))
        .fetch_all(&self.pool)
        .await?;
        into_posts(rows)
    }

    /// Insert a live post unless it, or its author, was already deleted.
    /// `false` when nothing was written.
    pub async fn insert_in(conn: &mut PgConnection, post: &Post) -> ServiceResult<bool> {
        lock(&mut *conn, POST_LOCK, post.id).await?;
        lock(&mut *conn, AUTHOR_LOCK, post.author_id).await?;

        let result = sqlx::query(
            r#"
            INSERT INTO posts (id, author_id, latitude, longitude, content_ref, created_at, deleted_at)
            SELECT $1, $2, $3, $4, $5, $6, $7
            WHERE NOT EXISTS (SELECT 1 FROM deleted_posts WHERE post_id = $1)
              AND NOT EXISTS (SELECT 1 FROM deleted_authors WHERE author_id = $2)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(post.id)
        .bind(post.author_id)
        .bind(post.coordinate.latitude())
        .bind(post.coordinate.longitude())
        .bind(&post.content_ref)
        .bind(post.created_at)
        .bind(post.deleted_at)
        .execute(&mut *conn)
        .await?;

        let inserted = result.rows_affected() > 0;
        if !inserted {
            debug!(post_id = %post.id, "Post already stored or deleted, not inserted");
        }
        Ok(inserted)
    }

    /// Soft-delete a post owned by `author_id`. `false` if missing, deleted or not owned.
    pub async fn tombstone_owned_in(
        conn: &mut PgConnection,
        author_id: Uuid,
        post_id: Uuid,
    ) -> ServiceResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE posts SET deleted_at = NOW()
            WHERE id = $1 AND author_id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(post_id)
        .bind(author_id)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Tombstone a post. The deletion is remembered even when the post has
    /// not arrived yet. `true` only if a live row was tombstoned.
    pub async fn tombstone_in(conn: &mut PgConnection, post_id: Uuid) -> ServiceResult<bool> {
        lock(&mut *conn, POST_LOCK, post_id).await?;

        sqlx::query("INSERT INTO deleted_posts (post_id) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(post_id)
            .execute(&mut *conn)
            .await?;

        let result =
            sqlx::query("UPDATE posts SET deleted_at = NOW() WHERE id = $1 AND deleted_at IS NULL")
                .bind(post_id)
                .execute(&mut *conn)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Tombstone every post by `author_id`, including ones that arrive later.
    pub async fn tombstone_by_author_in(
        conn: &mut PgConnection,
        author_id: Uuid,
    ) -> ServiceResult<u64> {
        lock(&mut *conn, AUTHOR_LOCK, author_id).await?;

        sqlx::query("INSERT INTO deleted_authors (author_id) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(author_id)
            .execute(&mut *conn)
            .await?;

        let result = sqlx::query(
            "UPDATE posts SET deleted_at = NOW() WHERE author_id = $1 AND deleted_at IS NULL",
        )
        .bind(author_id)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected())
    }
}

/// Advisory lock namespaces. A creation takes both, in this order; a
/// deletion takes the one it names. Held until the transaction ends.
const POST_LOCK: i32 = 1;
const AUTHOR_LOCK: i32 = 2;

async fn lock(conn: &mut PgConnection, space: i32, id: Uuid) -> ServiceResult<()> {
    sqlx::query("SELECT pg_advisory_xact_lock($1, hashtext($2::text))")
        .bind(space)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

#[async_trait]
impl GeoIndex for PgPostRepository {
    /// Bounding box on the indexed columns, then the exact haversine filter
    async fn query(&self, center: Coordinate, radius: Radius) -> ServiceResult<HashSet<Uuid>> {
        if radius.is_empty() {
            return Ok(HashSet::new());
        }

        let bbox = BoundingBox::around(center, radius);
        let ((lo1, hi1), (lo2, hi2)) = bbox.lon_pair();

        let rows = sqlx::query_as::<_, PostRow>(&format!(
            r#"
            SELECT {POST_COLUMNS}
            FROM posts
            WHERE deleted_at IS NULL
              AND latitude BETWEEN $1 AND $2
              AND (longitude BETWEEN $3 AND $4 OR longitude BETWEEN $5 AND $6)
            "#
        ))
        .bind(bbox.min_lat)
        .bind(bbox.max_lat)
        .bind(lo1)
        .bind(hi1)
        .bind(lo2)
        .bind(hi2)
        .fetch_all(&self.pool)
        .await?;

        let candidates = rows.len();
        let found: HashSet<Uuid> = into_posts(rows)?
            .into_iter()
            .filter(|post| haversine_distance(center, post.coordinate) <= radius.meters())
            .map(|post| post.id)
            .collect();

        debug!(candidates, matched = found.len(), "Radius query on posts table");
        Ok(found)
    }

    async fn upsert(&self, post: &Post) -> ServiceResult<()> {
        let mut tx = self.pool.begin().await?;
        Self::insert_in(&mut *tx, post).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn remove(&self, post_id: Uuid) -> ServiceResult<bool> {
        let mut tx = self.pool.begin().await?;
        let removed = Self::tombstone_in(&mut *tx, post_id).await?;
        tx.commit().await?;
        Ok(removed)
    }

    async fn remove_by_author(&self, author_id: Uuid) -> ServiceResult<u64> {
        let mut tx = self.pool.begin().await?;
        let removed = Self::tombstone_by_author_in(&mut *tx, author_id).await?;
        tx.commit().await?;
        Ok(removed)
    }
}

#[async_trait]
impl PostStore for PgPostRepository {
    async fn get(&self, post_id: Uuid) -> ServiceResult<Option<Post>> {
        let row = sqlx::query_as::<_, PostRow>(&format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Post::try_from).transpose()
    }

    async fn get_many(&self, post_ids: &[Uuid]) -> ServiceResult<Vec<Post>> {
        if post_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, PostRow>(&format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE id = ANY($1) AND deleted_at IS NULL"
        ))
        .bind(post_ids)
        .fetch_all(&self.pool)
        .await?;

        into_posts(rows)
    }

    async fn authored_between(
        &self,
        author_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> ServiceResult<Vec<Post>> {
        let rows = sqlx::query_as::<_, PostRow>(&format!(
            r#"
            SELECT {POST_COLUMNS}
            FROM posts
            WHERE author_id = $1
              AND deleted_at IS NULL
              AND created_at >= $2
              AND created_at < $3
            ORDER BY created_at ASC
            "#
        ))
        .bind(author_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        into_posts(rows)
    }
}

#[async_trait]
impl PostWriter for PgPostRepository {
    async fn create_with_event(&self, post: &Post, event: &OutboxEvent) -> ServiceResult<()> {
        let mut tx = self.pool.begin().await?;
        Self::insert_in(&mut *tx, post).await?;
        self.outbox.insert(&mut tx, event).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete_owned_with_event(
        &self,
        author_id: Uuid,
        post_id: Uuid,
        event: &OutboxEvent,
    ) -> ServiceResult<bool> {
        let mut tx = self.pool.begin().await?;
        if !Self::tombstone_owned_in(&mut *tx, author_id, post_id).await? {
            tx.rollback().await?;
            return Ok(false);
        }
        self.outbox.insert(&mut tx, event).await?;
        tx.commit().await?;
        Ok(true)
    }
}
