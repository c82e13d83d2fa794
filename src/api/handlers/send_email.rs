use crate::relay::{bearer_from_header, NotificationRelay, NotificationRequest};
use axum::{
    extract::Extension,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use tracing::{debug, instrument};

#[utoipa::path(
    post,
    path= "/send-email",
    request_body = NotificationRequest,
    params(
        ("Authorization" = Option<String>, Header, description = "Bearer ID token of the caller"),
    ),
    responses (
        (status = 200, description = "Human-readable delivery result", body = String, content_type = "text/plain"),
        (status = 400, description = "Missing or malformed payload", body = String, content_type = "text/plain"),
    ),
    tag= "relay"
)]
/// Relay an email request. Delivery failures are reported in the body with
/// a `200`; only an unreadable payload is a client error.
#[instrument(skip(headers, relay, payload))]
pub async fn send_email(
    headers: HeaderMap,
    relay: Extension<Arc<NotificationRelay>>,
    payload: Option<Json<NotificationRequest>>,
) -> impl IntoResponse {
    let request: NotificationRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()),
    };

    let bearer = bearer_from_header(
        headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok()),
    );
    debug!(bearer = bearer.is_some(), "send-email request");

    let result = relay.relay(request, bearer).await;

    (StatusCode::OK, result.message().to_string())
}
