use hyper::{Body, Request, Response, StatusCode};

use super::super::error::{Result, ResultExt};
use super::super::identity::identity;
use super::{global, success};

/// Ids of currently connected users. Unlike the async pipeline, this is a
/// synchronous read path: a presence store failure surfaces as a typed error.
pub async fn online_users(req: Request<Body>) -> Result<Response<Body>> {
    let global = global(&req);
    identity(&req)?;

    let online = global
        .presence
        .online_user_ids()
        .await
        .extend_route((StatusCode::INTERNAL_SERVER_ERROR, "failed to query presence"))?;

    Ok(success("online users", online))
}
