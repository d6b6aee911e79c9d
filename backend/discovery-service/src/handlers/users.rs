use super::auth::UserId;
use super::AppState;
use crate::error::ServiceResult;
use actix_web::{web, HttpResponse};
use tracing::debug;

/// `DELETE /user`: delete the caller's account.
///
/// Answers 204 whether or not the account still existed, so a client retry
/// after a lost response succeeds. `user.deleted` is queued only when a row
/// was removed; dependent data elsewhere is cleaned up from that event.
pub async fn delete_user(state: web::Data<AppState>, user: UserId) -> ServiceResult<HttpResponse> {
    if !state.accounts.delete_user(user.0).await? {
        debug!(user_id = %user.0, "Account already gone, nothing to announce");
    }
    Ok(HttpResponse::NoContent().finish())
}
