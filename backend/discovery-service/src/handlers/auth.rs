/// Caller identity extracted from the `X-User-Id` header.
///
/// The upstream gateway verifies the token and forwards the user id; this
/// service only parses it.
use crate::error::ServiceError;
use actix_web::{dev::Payload, FromRequest, HttpRequest};
use std::future::{ready, Ready};
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "X-User-Id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserId(pub Uuid);

impl FromRequest for UserId {
    type Error = ServiceError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(
            req.headers()
                .get(USER_ID_HEADER)
                .ok_or_else(|| ServiceError::Unauthorized("missing caller id".to_string()))
                .and_then(|value| {
                    value
                        .to_str()
                        .ok()
                        .and_then(|s| Uuid::parse_str(s.trim()).ok())
                        .map(UserId)
                        .ok_or_else(|| ServiceError::Unauthorized("invalid caller id".to_string()))
                }),
        )
    }
}
