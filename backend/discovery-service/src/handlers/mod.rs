/// HTTP surface for discovery-service
pub mod auth;
pub mod posts;
pub mod users;

pub use auth::{UserId, USER_ID_HEADER};
pub use posts::PostResponse;

use crate::error::ServiceResult;
use crate::metrics::serve_metrics;
use crate::propagation::{AccountService, PostCommands};
use crate::services::ProximityResolver;
use actix_web::{web, HttpResponse};
use std::sync::Arc;
use transactional_outbox::OutboxRepository;

/// Shared handler state
pub struct AppState {
    pub resolver: Arc<ProximityResolver>,
    pub posts: Arc<PostCommands>,
    pub accounts: Arc<AccountService>,
    pub outbox: Arc<dyn OutboxRepository>,
    /// Rows at or past this many failures count as exhausted in `/outbox/stats`
    pub outbox_max_retries: i32,
    pub service_name: String,
    /// Used when a proximity request has no `radius`
    pub default_radius_m: f64,
}

pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "service": state.service_name,
    }))
}

pub async fn outbox_stats(state: web::Data<AppState>) -> ServiceResult<HttpResponse> {
    let stats = state.outbox.pending_stats(state.outbox_max_retries).await?;
    Ok(HttpResponse::Ok().json(stats))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/metrics", web::get().to(serve_metrics))
        .route("/outbox/stats", web::get().to(outbox_stats))
        .route("/user", web::delete().to(users::delete_user))
        .service(
            web::scope("/post")
                .route("", web::get().to(posts::read_post))
                .route("", web::post().to(posts::create_post))
                .route("", web::delete().to(posts::delete_post))
                .route("/near", web::get().to(posts::find_near))
                .route("/nearAll", web::get().to(posts::find_near_all))
                .route("/viewed", web::get().to(posts::viewed_in_month))
                .route("/uploaded", web::get().to(posts::uploaded_in_month))
                .route("/author", web::get().to(posts::author_of)),
        );
}
