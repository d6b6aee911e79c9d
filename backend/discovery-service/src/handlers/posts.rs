/// Post handlers - proximity queries, reads, monthly histories, create/delete
use super::auth::UserId;
use super::AppState;
use crate::domain::{Coordinate, Post, Radius};
use crate::error::ServiceResult;
use crate::services::sort_by_distance;
use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearQuery {
    pub lat: f64,
    pub long: f64,
    pub radius: Option<f64>,
    #[serde(default)]
    pub exclude_viewed: bool,
}

#[derive(Debug, Deserialize)]
pub struct PostIdQuery {
    pub post_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct MonthQuery {
    pub year: i32,
    pub month: u32,
}

#[derive(Debug, Deserialize)]
pub struct CreatePostRequest {
    pub latitude: f64,
    pub longitude: f64,
    pub content_ref: String,
}

#[derive(Debug, Deserialize)]
pub struct DeletePostRequest {
    pub post_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PostResponse {
    pub id: Uuid,
    pub author_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub content_ref: String,
    pub created_at: DateTime<Utc>,
}

impl From<Post> for PostResponse {
    fn from(post: Post) -> Self {
        Self {
            id: post.id,
            author_id: post.author_id,
            latitude: post.coordinate.latitude(),
            longitude: post.coordinate.longitude(),
            content_ref: post.content_ref,
            created_at: post.created_at,
        }
    }
}

fn to_response(posts: Vec<Post>) -> Vec<PostResponse> {
    posts.into_iter().map(PostResponse::from).collect()
}

async fn near(
    state: &AppState,
    user: UserId,
    query: &NearQuery,
    exclude_viewed: bool,
) -> ServiceResult<HttpResponse> {
    let center = Coordinate::new(query.lat, query.long)?;
    let radius = Radius::new(query.radius.unwrap_or(state.default_radius_m))?;

    let mut posts = if exclude_viewed {
        state
            .resolver
            .find_near_unviewed(center, radius, user.0)
            .await?
    } else {
        state.resolver.find_near(center, radius).await?
    };
    sort_by_distance(&mut posts, center);

    Ok(HttpResponse::Ok().json(to_response(posts)))
}

/// `GET /post/near`, nearest first
pub async fn find_near(
    state: web::Data<AppState>,
    user: UserId,
    query: web::Query<NearQuery>,
) -> ServiceResult<HttpResponse> {
    near(&state, user, &query, query.exclude_viewed).await
}

/// `GET /post/nearAll`, viewed posts included
pub async fn find_near_all(
    state: web::Data<AppState>,
    user: UserId,
    query: web::Query<NearQuery>,
) -> ServiceResult<HttpResponse> {
    near(&state, user, &query, false).await
}

/// `GET /post`, records the view
pub async fn read_post(
    state: web::Data<AppState>,
    user: UserId,
    query: web::Query<PostIdQuery>,
) -> ServiceResult<HttpResponse> {
    let post = state.resolver.read_post(user.0, query.post_id).await?;
    Ok(HttpResponse::Ok().json(PostResponse::from(post)))
}

pub async fn viewed_in_month(
    state: web::Data<AppState>,
    user: UserId,
    query: web::Query<MonthQuery>,
) -> ServiceResult<HttpResponse> {
    let posts = state
        .resolver
        .viewed_in_month(user.0, query.year, query.month)
        .await?;
    Ok(HttpResponse::Ok().json(to_response(posts)))
}

pub async fn uploaded_in_month(
    state: web::Data<AppState>,
    user: UserId,
    query: web::Query<MonthQuery>,
) -> ServiceResult<HttpResponse> {
    let posts = state
        .resolver
        .uploaded_in_month(user.0, query.year, query.month)
        .await?;
    Ok(HttpResponse::Ok().json(to_response(posts)))
}

/// `GET /post/author`, for other services
pub async fn author_of(
    state: web::Data<AppState>,
    query: web::Query<PostIdQuery>,
) -> ServiceResult<HttpResponse> {
    let author_id = state.resolver.author_of(query.post_id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "post_id": query.post_id,
        "author_id": author_id,
    })))
}

pub async fn create_post(
    state: web::Data<AppState>,
    user: UserId,
    req: web::Json<CreatePostRequest>,
) -> ServiceResult<HttpResponse> {
    let coordinate = Coordinate::new(req.latitude, req.longitude)?;
    let post = state
        .posts
        .create_post(user.0, coordinate, &req.content_ref)
        .await?;
    Ok(HttpResponse::Created().json(PostResponse::from(post)))
}

pub async fn delete_post(
    state: web::Data<AppState>,
    user: UserId,
    req: web::Json<DeletePostRequest>,
) -> ServiceResult<HttpResponse> {
    state.posts.delete_post(user.0, req.post_id).await?;
    Ok(HttpResponse::NoContent().finish())
}
