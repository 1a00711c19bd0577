use std::fmt::{Debug, Display};

use hyper::{Body, StatusCode};
use routerify::RequestInfo;
use serde_json::json;

use super::macros::make_response;

pub type Result<T, E = RouteError> = std::result::Result<T, E>;

/// A typed business error for the synchronous request paths: the response the
/// client sees plus the source that caused it, kept for logging only.
pub struct RouteError {
    source: Option<anyhow::Error>,
    response: hyper::Response<Body>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShouldLog {
    Yes,
    Debug,
    No,
}

impl RouteError {
    pub fn response(self) -> hyper::Response<Body> {
        self.response
    }

    pub fn should_log(&self) -> ShouldLog {
        if self.response.status().is_server_error() {
            ShouldLog::Yes
        } else if self.source.is_some() {
            ShouldLog::Debug
        } else {
            ShouldLog::No
        }
    }

    fn with_source(self, source: Option<anyhow::Error>) -> Self {
        Self { source, ..self }
    }
}

impl From<(StatusCode, &'_ str)> for RouteError {
    fn from((status, message): (StatusCode, &'_ str)) -> Self {
        Self {
            source: None,
            response: make_response!(status, json!({ "success": false, "message": message })),
        }
    }
}

impl<T> From<(StatusCode, &'_ str, T)> for RouteError
where
    T: Into<anyhow::Error> + Debug + Display,
{
    fn from((status, message, source): (StatusCode, &'_ str, T)) -> Self {
        Self {
            source: Some(source.into()),
            response: make_response!(status, json!({ "success": false, "message": message })),
        }
    }
}

impl From<&'_ str> for RouteError {
    fn from(message: &'_ str) -> Self {
        (StatusCode::INTERNAL_SERVER_ERROR, message).into()
    }
}

impl Debug for RouteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.source {
            Some(err) => write!(f, "RouteError: {err:?}"),
            None => write!(f, "RouteError: {}", self.response.status()),
        }
    }
}

impl Display for RouteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.source {
            Some(err) => write!(f, "RouteError: {err}"),
            None => write!(f, "RouteError: {}", self.response.status()),
        }
    }
}

impl std::error::Error for RouteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.source {
            Some(err) => Some(err.as_ref()),
            None => None,
        }
    }
}

/// Attaches a response to an underlying error, keeping the cause for the
/// error handler's log line.
pub trait ResultExt<T>: Sized {
    fn extend_route<C>(self, ctx: C) -> Result<T>
    where
        RouteError: From<C>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    anyhow::Error: From<E>,
{
    fn extend_route<C>(self, ctx: C) -> Result<T>
    where
        RouteError: From<C>,
    {
        self.map_err(|err| RouteError::from(ctx).with_source(Some(err.into())))
    }
}

pub async fn error_handler(
    err: routerify::RouteError,
    info: RequestInfo,
) -> hyper::Response<Body> {
    match err.downcast::<RouteError>() {
        Ok(err) => {
            match err.should_log() {
                ShouldLog::Yes => tracing::error!(
                    method = %info.method(),
                    path = %info.uri().path(),
                    error = ?err,
                    "request failed"
                ),
                ShouldLog::Debug => tracing::debug!(
                    method = %info.method(),
                    path = %info.uri().path(),
                    error = ?err,
                    "request rejected"
                ),
                ShouldLog::No => {}
            }

            err.response()
        }
        Err(err) => {
            tracing::error!(error = %err, "unhandled route error");

            make_response!(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "success": false, "message": "internal server error" })
            )
        }
    }
}
