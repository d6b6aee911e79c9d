use super::{haversine_distance, BoundingBox, GeoIndex, PostStore};
use crate::domain::{Coordinate, Post, Radius};
use crate::error::ServiceResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use std::collections::HashSet;
use tracing::debug;
use uuid::Uuid;

/// Default cell edge, about 1.1 km north-south
pub const DEFAULT_CELL_SIZE_DEG: f64 = 0.01;

type CellKey = (i32, i32);

/// In-process geo index bucketing live posts into a lat/long grid.
///
/// Every map is sharded (`DashMap`), so writers only contend per shard.
/// Lock order is posts → cells/by_author. Queries collect cell contents
/// before touching `posts` and never hold both.
pub struct GridGeoIndex {
    cell_deg: f64,
    cells: DashMap<CellKey, HashSet<Uuid>>,
    posts: DashMap<Uuid, Post>,
    by_author: DashMap<Uuid, HashSet<Uuid>>,
    /// Deleted posts; a late upsert must not resurrect them
    tombstones: DashSet<Uuid>,
    deleted_authors: DashSet<Uuid>,
}

impl Default for GridGeoIndex {
    fn default() -> Self {
        Self::new(DEFAULT_CELL_SIZE_DEG)
    }
}

impl GridGeoIndex {
    pub fn new(cell_deg: f64) -> Self {
        let cell_deg = if cell_deg.is_finite() && cell_deg > 0.0 {
            cell_deg
        } else {
            DEFAULT_CELL_SIZE_DEG
        };

        Self {
            cell_deg,
            cells: DashMap::new(),
            posts: DashMap::new(),
            by_author: DashMap::new(),
            tombstones: DashSet::new(),
            deleted_authors: DashSet::new(),
        }
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_deg
    }

    /// Number of live posts
    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    /// Bulk load, e.g. from the system of record at startup
    pub fn warm<I>(&self, posts: I) -> usize
    where
        I: IntoIterator<Item = Post>,
    {
        let mut loaded = 0;
        for post in posts {
            if self.insert(post) {
                loaded += 1;
            }
        }
        loaded
    }

    fn row(&self, lat: f64) -> i32 {
        ((lat + 90.0) / self.cell_deg).floor() as i32
    }

    fn col(&self, lon: f64) -> i32 {
        ((lon + 180.0) / self.cell_deg).floor() as i32
    }

    fn cell_of(&self, c: Coordinate) -> CellKey {
        (self.row(c.latitude()), self.col(c.longitude()))
    }

    fn insert(&self, post: Post) -> bool {
        if post.is_deleted() {
            self.delete(post.id);
            return false;
        }

        let entry = match self.posts.entry(post.id) {
            dashmap::mapref::entry::Entry::Occupied(_) => return false,
            dashmap::mapref::entry::Entry::Vacant(entry) => entry,
        };
        // Checked under the posts shard lock; see `delete`
        if self.tombstones.contains(&post.id) || self.deleted_authors.contains(&post.author_id) {
            debug!(post_id = %post.id, "Ignoring upsert of deleted post");
            return false;
        }

        let id = post.id;
        let author_id = post.author_id;
        let key = self.cell_of(post.coordinate);
        {
            // Keep the shard locked until the secondary maps agree
            let _live = entry.insert(post);
            self.cells.entry(key).or_default().insert(id);
            self.by_author.entry(author_id).or_default().insert(id);
        }

        // `remove_by_author` flags the author before reading `by_author`, and
        // we wrote `by_author` before reading the flag, so one side sees the other
        if self.deleted_authors.contains(&author_id) {
            self.delete(id);
            return false;
        }
        true
    }

    fn delete(&self, post_id: Uuid) -> bool {
        // Tombstone first so a concurrent insert sees it once it holds the shard
        self.tombstones.insert(post_id);

        let Some((_, post)) = self.posts.remove(&post_id) else {
            return false;
        };

        let key = self.cell_of(post.coordinate);
        if let Some(mut ids) = self.cells.get_mut(&key) {
            ids.remove(&post_id);
        }
        self.cells.remove_if(&key, |_, ids| ids.is_empty());

        if let Some(mut ids) = self.by_author.get_mut(&post.author_id) {
            ids.remove(&post_id);
        }
        self.by_author
            .remove_if(&post.author_id, |_, ids| ids.is_empty());
        true
    }

    fn candidates(&self, bbox: &BoundingBox) -> Vec<Uuid> {
        let row_lo = self.row(bbox.min_lat);
        let row_hi = self.row(bbox.max_lat);
        let col_ranges: Vec<(i32, i32)> = bbox
            .lon_ranges
            .iter()
            .map(|(lo, hi)| (self.col(*lo), self.col(*hi)))
            .collect();

        let rows = (row_hi - row_lo + 1).max(0) as u64;
        let cols: u64 = col_ranges
            .iter()
            .map(|(lo, hi)| (hi - lo + 1).max(0) as u64)
            .sum();

        let mut ids = Vec::new();
        if rows.saturating_mul(cols) > self.cells.len() as u64 {
            // Box covers more cells than are populated: walk the populated ones
            for cell in self.cells.iter() {
                let (row, col) = *cell.key();
                let in_cols = col_ranges.iter().any(|(lo, hi)| col >= *lo && col <= *hi);
                if row >= row_lo && row <= row_hi && in_cols {
                    ids.extend(cell.value().iter().copied());
                }
            }
        } else {
            for row in row_lo..=row_hi {
                for (lo, hi) in &col_ranges {
                    for col in *lo..=*hi {
                        if let Some(cell) = self.cells.get(&(row, col)) {
                            ids.extend(cell.iter().copied());
                        }
                    }
                }
            }
        }
        ids
    }

    fn query_now(&self, center: Coordinate, radius: Radius) -> HashSet<Uuid> {
        if radius.is_empty() {
            return HashSet::new();
        }

        let bbox = BoundingBox::around(center, radius);
        self.candidates(&bbox)
            .into_iter()
            .filter(|id| {
                self.posts
                    .get(id)
                    .map(|post| haversine_distance(center, post.coordinate) <= radius.meters())
                    .unwrap_or(false)
            })
            .collect()
    }
}

#[async_trait]
impl GeoIndex for GridGeoIndex {
    async fn query(&self, center: Coordinate, radius: Radius) -> ServiceResult<HashSet<Uuid>> {
        Ok(self.query_now(center, radius))
    }

    async fn upsert(&self, post: &Post) -> ServiceResult<()> {
        self.insert(post.clone());
        Ok(())
    }

    async fn remove(&self, post_id: Uuid) -> ServiceResult<bool> {
        Ok(self.delete(post_id))
    }

    async fn remove_by_author(&self, author_id: Uuid) -> ServiceResult<u64> {
        self.deleted_authors.insert(author_id);

        let ids: Vec<Uuid> = self
            .by_author
            .get(&author_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();

        let mut removed = 0;
        for id in ids {
            if self.delete(id) {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl PostStore for GridGeoIndex {
    async fn get(&self, post_id: Uuid) -> ServiceResult<Option<Post>> {
        Ok(self.posts.get(&post_id).map(|p| p.clone()))
    }

    async fn get_many(&self, post_ids: &[Uuid]) -> ServiceResult<Vec<Post>> {
        Ok(post_ids
            .iter()
            .filter_map(|id| self.posts.get(id).map(|p| p.clone()))
            .collect())
    }

    async fn authored_between(
        &self,
        author_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> ServiceResult<Vec<Post>> {
        let ids: Vec<Uuid> = self
            .by_author
            .get(&author_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();

        let mut posts: Vec<Post> = ids
            .iter()
            .filter_map(|id| self.posts.get(id).map(|p| p.clone()))
            .filter(|p| p.created_at >= from && p.created_at < to)
            .collect();
        posts.sort_by_key(|p| p.created_at);
        Ok(posts)
    }
}
