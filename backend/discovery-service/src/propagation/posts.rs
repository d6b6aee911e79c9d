use super::to_outbox_event;
use crate::domain::{Coordinate, Post};
use crate::error::{ServiceError, ServiceResult};
use crate::geo::GeoIndex;
use async_trait::async_trait;
use event_schema::{LifecycleEvent, PostCreatedEvent};
use std::sync::Arc;
use tracing::{info, warn};
use transactional_outbox::OutboxEvent;
use uuid::Uuid;

/// Post persistence with the outbox write in the same transaction
#[async_trait]
pub trait PostWriter: Send + Sync {
    async fn create_with_event(&self, post: &Post, event: &OutboxEvent) -> ServiceResult<()>;

    /// Soft-delete a post owned by `author_id` and enqueue `event`.
    /// `false` if the post is missing, already deleted or owned by someone else.
    async fn delete_owned_with_event(
        &self,
        author_id: Uuid,
        post_id: Uuid,
        event: &OutboxEvent,
    ) -> ServiceResult<bool>;
}

/// Write side for posts
pub struct PostCommands {
    writer: Arc<dyn PostWriter>,
    /// In-process index updated right after commit, for read-your-writes
    local_index: Option<Arc<dyn GeoIndex>>,
    source: String,
}

impl PostCommands {
    pub fn new(
        writer: Arc<dyn PostWriter>,
        local_index: Option<Arc<dyn GeoIndex>>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            writer,
            local_index,
            source: source.into(),
        }
    }

    pub async fn create_post(
        &self,
        author_id: Uuid,
        coordinate: Coordinate,
        content_ref: &str,
    ) -> ServiceResult<Post> {
        if content_ref.trim().is_empty() {
            return Err(ServiceError::InvalidInput(
                "content_ref must not be empty".to_string(),
            ));
        }

        let post = Post::new(author_id, coordinate, content_ref);
        let event = LifecycleEvent::post_created(
            &self.source,
            PostCreatedEvent {
                post_id: post.id,
                author_id,
                latitude: coordinate.latitude(),
                longitude: coordinate.longitude(),
                content_ref: post.content_ref.clone(),
                created_at: post.created_at,
            },
        )?;

        self.writer
            .create_with_event(&post, &to_outbox_event(&event))
            .await?;

        if let Some(index) = &self.local_index {
            // The post.created event repairs the index if this fails
            if let Err(e) = index.upsert(&post).await {
                warn!(post_id = %post.id, error = %e, "Failed to index new post locally");
            }
        }

        info!(post_id = %post.id, author_id = %author_id, "Post created");
        Ok(post)
    }

    pub async fn delete_post(&self, author_id: Uuid, post_id: Uuid) -> ServiceResult<()> {
        let event = LifecycleEvent::post_deleted(&self.source, post_id, author_id)?;

        let deleted = self
            .writer
            .delete_owned_with_event(author_id, post_id, &to_outbox_event(&event))
            .await?;
        if !deleted {
            return Err(ServiceError::NotFound(format!("post {}", post_id)));
        }

        if let Some(index) = &self.local_index {
            if let Err(e) = index.remove(post_id).await {
                warn!(post_id = %post_id, error = %e, "Failed to tombstone post locally");
            }
        }

        info!(post_id = %post_id, author_id = %author_id, "Post deleted, post.deleted queued");
        Ok(())
    }
}
