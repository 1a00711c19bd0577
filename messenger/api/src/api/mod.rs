use std::sync::Arc;

use anyhow::{Context, Result};
use hyper::{Body, Request, Response, StatusCode};
use routerify::{Router, RouterService};
use serde_json::json;

use self::error::RouteError;
use self::macros::make_response;
use crate::global::GlobalState;

pub mod error;
pub mod identity;
mod macros;
pub mod v1;

pub async fn run(global: Arc<GlobalState>) -> Result<()> {
    let bind_address = global.config.api.bind_address;
    let ctx = global.ctx.clone();

    let service = RouterService::new(routes(&global))
        .map_err(|err| anyhow::anyhow!("failed to build router service: {err}"))?;

    tracing::info!("listening on {bind_address}");

    hyper::Server::try_bind(&bind_address)
        .context("failed to bind api address")?
        .serve(service)
        .with_graceful_shutdown(async move { ctx.cancelled().await })
        .await
        .context("api server failed")
}

fn routes(global: &Arc<GlobalState>) -> Router<Body, RouteError> {
    Router::builder()
        .data(global.clone())
        .scope("/v1", v1::routes())
        .any(not_found)
        .err_handler_with_info(error::error_handler)
        .build()
        .expect("failed to build router")
}

async fn not_found(_: Request<Body>) -> Result<Response<Body>, RouteError> {
    Ok(make_response!(
        StatusCode::NOT_FOUND,
        json!({ "success": false, "message": "not found" })
    ))
}
