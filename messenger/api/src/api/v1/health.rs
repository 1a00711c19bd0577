use hyper::{Body, Request, Response};

use super::super::error::Result;
use super::success;

pub async fn health(_: Request<Body>) -> Result<Response<Body>> {
    Ok(success("ok", ()))
}
