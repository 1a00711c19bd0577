use std::sync::Arc;

use hyper::{Body, Request, Response, StatusCode};
use routerify::prelude::RequestExt;
use routerify::Router;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;

use super::error::{Result, ResultExt, RouteError};
use crate::api::macros::make_response;
use crate::global::GlobalState;

pub mod health;
pub mod messages;
pub mod presence;
pub mod rooms;
pub mod ws;

pub fn routes() -> Router<Body, RouteError> {
    Router::builder()
        .get("/health", health::health)
        .get("/presence", presence::online_users)
        .post("/rooms", rooms::create_room)
        .get("/rooms", rooms::list_rooms)
        .get("/rooms/:roomId", rooms::get_room)
        .get("/rooms/:roomId/members", rooms::list_members)
        .post("/rooms/:roomId/members", rooms::add_member)
        .delete("/rooms/:roomId/members/:userId", rooms::remove_member)
        .post("/rooms/:roomId/read", rooms::mark_read)
        .get("/rooms/:roomId/messages", messages::history)
        .post("/rooms/:roomId/messages", messages::send)
        .get("/rooms/:roomId/ws", ws::subscribe)
        .build()
        .expect("failed to build v1 router")
}

pub(super) fn global(req: &Request<Body>) -> Arc<GlobalState> {
    req.data::<Arc<GlobalState>>()
        .expect("missing global state")
        .clone()
}

pub(super) fn param_i64(req: &Request<Body>, name: &str) -> Result<i64> {
    req.param(name)
        .and_then(|value| value.parse().ok())
        .ok_or_else(|| (StatusCode::BAD_REQUEST, "invalid path parameter").into())
}

pub(super) fn query_param(req: &Request<Body>, name: &str) -> Option<String> {
    req.uri().query()?.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}

pub(super) async fn read_json<T: DeserializeOwned>(req: Request<Body>) -> Result<T> {
    let body = hyper::body::to_bytes(req.into_body())
        .await
        .extend_route((StatusCode::BAD_REQUEST, "failed to read request body"))?;

    serde_json::from_slice(&body).extend_route((StatusCode::BAD_REQUEST, "invalid request body"))
}

pub(super) fn success<T: Serialize>(message: &str, data: T) -> Response<Body> {
    make_response!(
        StatusCode::OK,
        json!({ "success": true, "message": message, "data": data })
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_param_picks_the_named_pair() {
        let req = Request::builder()
            .uri("/v1/rooms/7/messages?page=2&per_page=25")
            .body(Body::empty())
            .expect("request");

        assert_eq!(query_param(&req, "page").as_deref(), Some("2"));
        assert_eq!(query_param(&req, "per_page").as_deref(), Some("25"));
        assert_eq!(query_param(&req, "missing"), None);
    }

    #[test]
    fn query_param_without_query_string() {
        let req = Request::builder()
            .uri("/v1/rooms")
            .body(Body::empty())
            .expect("request");

        assert_eq!(query_param(&req, "page"), None);
    }
}
