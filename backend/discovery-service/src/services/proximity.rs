/// Proximity service - nearby posts, with or without already-viewed ones
use crate::domain::{month_bounds, Coordinate, Post, Radius};
use crate::error::{ServiceError, ServiceResult};
use crate::geo::{haversine_distance, GeoIndex, PostStore};
use crate::ledger::ViewLedger;
use crate::metrics::PROXIMITY_QUERY_DURATION_SECONDS;
use resilience::with_timeout;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

pub struct ProximityResolver {
    index: Arc<dyn GeoIndex>,
    posts: Arc<dyn PostStore>,
    views: Arc<dyn ViewLedger>,
    query_timeout: Duration,
}

impl ProximityResolver {
    pub fn new(
        index: Arc<dyn GeoIndex>,
        posts: Arc<dyn PostStore>,
        views: Arc<dyn ViewLedger>,
        query_timeout: Duration,
    ) -> Self {
        Self {
            index,
            posts,
            views,
            query_timeout,
        }
    }

    /// Every live post within `radius`, viewed or not. No ordering.
    pub async fn find_near(&self, center: Coordinate, radius: Radius) -> ServiceResult<Vec<Post>> {
        self.find_near_with_timeout(center, radius, self.query_timeout)
            .await
    }

    pub async fn find_near_with_timeout(
        &self,
        center: Coordinate,
        radius: Radius,
        timeout: Duration,
    ) -> ServiceResult<Vec<Post>> {
        self.timed("near", timeout, self.collect(center, radius, None))
            .await
    }

    /// Posts within `radius` that `viewer_id` has not viewed yet
    pub async fn find_near_unviewed(
        &self,
        center: Coordinate,
        radius: Radius,
        viewer_id: Uuid,
    ) -> ServiceResult<Vec<Post>> {
        self.find_near_unviewed_with_timeout(center, radius, viewer_id, self.query_timeout)
            .await
    }

    pub async fn find_near_unviewed_with_timeout(
        &self,
        center: Coordinate,
        radius: Radius,
        viewer_id: Uuid,
        timeout: Duration,
    ) -> ServiceResult<Vec<Post>> {
        self.timed(
            "near_unviewed",
            timeout,
            self.collect(center, radius, Some(viewer_id)),
        )
        .await
    }

    /// Fetch a post and record that `viewer_id` has seen it
    pub async fn read_post(&self, viewer_id: Uuid, post_id: Uuid) -> ServiceResult<Post> {
        let post = self
            .posts
            .get(post_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("post {}", post_id)))?;

        self.views.record_view(viewer_id, post_id).await?;
        debug!(viewer_id = %viewer_id, post_id = %post_id, "Recorded view");
        Ok(post)
    }

    /// Live posts viewed during a UTC month, oldest view first.
    ///
    /// Posts deleted since they were viewed are left out.
    pub async fn viewed_in_month(
        &self,
        viewer_id: Uuid,
        year: i32,
        month: u32,
    ) -> ServiceResult<Vec<Post>> {
        let ids = self.views.viewed_in_month(viewer_id, year, month).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut by_id: HashMap<Uuid, Post> = self
            .posts
            .get_many(&ids)
            .await?
            .into_iter()
            .map(|post| (post.id, post))
            .collect();

        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    /// Live posts by `author_id` created during a UTC month, oldest first
    pub async fn uploaded_in_month(
        &self,
        author_id: Uuid,
        year: i32,
        month: u32,
    ) -> ServiceResult<Vec<Post>> {
        let (from, to) = month_bounds(year, month)?;
        self.posts.authored_between(author_id, from, to).await
    }

    pub async fn author_of(&self, post_id: Uuid) -> ServiceResult<Uuid> {
        self.posts
            .get(post_id)
            .await?
            .map(|post| post.author_id)
            .ok_or_else(|| ServiceError::NotFound(format!("post {}", post_id)))
    }

    async fn collect(
        &self,
        center: Coordinate,
        radius: Radius,
        viewer_id: Option<Uuid>,
    ) -> ServiceResult<Vec<Post>> {
        if radius.is_empty() {
            return Ok(Vec::new());
        }

        let mut ids = self.index.query(center, radius).await?;
        if let Some(viewer_id) = viewer_id {
            ids = self.views.filter_unviewed(viewer_id, &ids).await?;
        }
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = ids.into_iter().collect();
        self.posts.get_many(&ids).await
    }

    async fn timed<F>(&self, kind: &str, timeout: Duration, query: F) -> ServiceResult<Vec<Post>>
    where
        F: std::future::Future<Output = ServiceResult<Vec<Post>>>,
    {
        let started = Instant::now();
        let result = match with_timeout(timeout, query).await {
            Ok(result) => result,
            Err(elapsed) => Err(ServiceError::from(elapsed)),
        };
        PROXIMITY_QUERY_DURATION_SECONDS
            .with_label_values(&[kind])
            .observe(started.elapsed().as_secs_f64());
        result
    }
}

/// Nearest first
pub fn sort_by_distance(posts: &mut [Post], center: Coordinate) {
    posts.sort_by(|a, b| {
        haversine_distance(center, a.coordinate).total_cmp(&haversine_distance(center, b.coordinate))
    });
}

/// Newest first
pub fn sort_by_recency(posts: &mut [Post]) {
    posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}
