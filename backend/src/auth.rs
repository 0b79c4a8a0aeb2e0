use actix_web::dev::Payload;
use actix_web::{error::ErrorUnauthorized, FromRequest, HttpRequest};
use futures::future::{ready, Ready};
use uuid::Uuid;

/// Caller identity, resolved upstream by the gateway and forwarded as a
/// header. Every record written or read is partitioned by this id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserId(pub Uuid);

const USER_ID_HEADER: &str = "X-User-Id";

impl FromRequest for UserId {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let parsed = req
            .headers()
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|raw| Uuid::parse_str(raw.trim()).ok());

        ready(match parsed {
            Some(id) => Ok(UserId(id)),
            None => Err(ErrorUnauthorized(
                serde_json::json!({ "error": "Missing or invalid X-User-Id header" }),
            )),
        })
    }
}
