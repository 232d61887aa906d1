//! Loader/action handler contracts and their results.
//!
//! # Responsibilities
//! - Define what a route handler receives (`HandlerArgs`) and returns
//! - Define the redirect signal and the route-level error type
//! - Define the `shouldRevalidate` predicate contract
//!
//! # Design Decisions
//! - Handlers are `'static` boxed futures so the executor can spawn them and
//!   let superseded calls finish on their own
//! - Plain closures implement the traits through blanket impls

use std::fmt;
use std::future::Future;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::data::deferred::DeferredData;
use crate::data::submission::{FormData, FormMethod};
use crate::lifecycle::abort::AbortSignal;
use crate::navigation::location::Path;
use crate::routing::{Params, RouteId};

/// The request a handler is invoked for.
#[derive(Debug, Clone)]
pub struct DataRequest {
    /// Target path (basename included).
    pub url: Path,
    pub method: FormMethod,
    pub form_data: Option<FormData>,
    /// Aborted when the owning navigation or fetcher is superseded.
    pub signal: AbortSignal,
}

/// Inputs handed to a loader or action.
#[derive(Debug, Clone)]
pub struct HandlerArgs {
    pub route_id: RouteId,
    pub params: Params,
    pub request: DataRequest,
}

/// A control-flow signal that restarts navigation at `location`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redirect {
    pub location: String,
    pub status: u16,
    /// Replace the current history entry instead of pushing.
    pub replace: bool,
}

/// What a handler settles with when it does not fail.
pub enum HandlerOutput {
    Data(Value),
    /// Data with promise-valued fields that must not block the commit.
    Deferred(DeferredData),
    Redirect(Redirect),
}

impl fmt::Debug for HandlerOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerOutput::Data(v) => f.debug_tuple("Data").field(v).finish(),
            HandlerOutput::Deferred(d) => f.debug_tuple("Deferred").field(d).finish(),
            HandlerOutput::Redirect(r) => f.debug_tuple("Redirect").field(r).finish(),
        }
    }
}

impl From<Value> for HandlerOutput {
    fn from(value: Value) -> Self {
        HandlerOutput::Data(value)
    }
}

impl From<DeferredData> for HandlerOutput {
    fn from(data: DeferredData) -> Self {
        HandlerOutput::Deferred(data)
    }
}

/// Build a 302 redirect output.
pub fn redirect(location: impl Into<String>) -> HandlerOutput {
    HandlerOutput::Redirect(Redirect {
        location: location.into(),
        status: 302,
        replace: false,
    })
}

/// Status-carrying error, e.g. the synthetic 404 for unmatched URLs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: u16,
    pub status_text: String,
    pub data: Value,
    /// Produced by the router itself rather than by a handler.
    pub internal: bool,
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status, self.status_text)
    }
}

/// Failure of a loader, action, render or fetch, recorded in router state.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum RouteError {
    #[error("{0}")]
    Response(ErrorResponse),

    /// A value thrown by a handler.
    #[error("handler error: {0}")]
    Thrown(Value),

    #[error("handler panicked: {0}")]
    Panicked(String),

    #[error("operation aborted")]
    Aborted,
}

impl RouteError {
    /// Error thrown by a handler with a message.
    pub fn thrown(message: impl Into<String>) -> Self {
        RouteError::Thrown(Value::String(message.into()))
    }

    pub fn response(status: u16, status_text: impl Into<String>, data: Value) -> Self {
        RouteError::Response(ErrorResponse {
            status,
            status_text: status_text.into(),
            data,
            internal: false,
        })
    }

    pub fn not_found(pathname: &str) -> Self {
        RouteError::Response(ErrorResponse {
            status: 404,
            status_text: "Not Found".to_string(),
            data: Value::String(format!("No route matches URL \"{pathname}\"")),
            internal: true,
        })
    }

    pub fn method_not_allowed(method: FormMethod, pathname: &str, route_id: &RouteId) -> Self {
        RouteError::Response(ErrorResponse {
            status: 405,
            status_text: "Method Not Allowed".to_string(),
            data: Value::String(format!(
                "You made a {method} request to \"{pathname}\" but did not provide an action for route \"{route_id}\""
            )),
            internal: true,
        })
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        RouteError::Response(ErrorResponse {
            status: 400,
            status_text: "Bad Request".to_string(),
            data: Value::String(message.into()),
            internal: true,
        })
    }

    /// HTTP-like status, if the error carries one.
    pub fn status(&self) -> Option<u16> {
        match self {
            RouteError::Response(r) => Some(r.status),
            _ => None,
        }
    }
}

/// Future returned by a handler.
pub type HandlerFuture = BoxFuture<'static, Result<HandlerOutput, RouteError>>;

/// A loader or action.
pub trait RouteHandler: Send + Sync {
    fn call(&self, args: HandlerArgs) -> HandlerFuture;
}

impl<F, Fut> RouteHandler for F
where
    F: Fn(HandlerArgs) -> Fut + Send + Sync,
    Fut: Future<Output = Result<HandlerOutput, RouteError>> + Send + 'static,
{
    fn call(&self, args: HandlerArgs) -> HandlerFuture {
        Box::pin(self(args))
    }
}

/// Inputs to a route's revalidation predicate.
#[derive(Debug, Clone)]
pub struct ShouldRevalidateArgs {
    pub current_url: Path,
    pub current_params: Params,
    pub next_url: Path,
    pub next_params: Params,
    pub form_method: Option<FormMethod>,
    pub form_data: Option<FormData>,
    pub action_result: Option<Value>,
    pub action_status: Option<u16>,
    /// What the router would decide without the predicate.
    pub default_should_revalidate: bool,
}

/// Per-route override of the default revalidation policy.
pub trait ShouldRevalidate: Send + Sync {
    fn should_revalidate(&self, args: &ShouldRevalidateArgs) -> bool;
}

impl<F> ShouldRevalidate for F
where
    F: Fn(&ShouldRevalidateArgs) -> bool + Send + Sync,
{
    fn should_revalidate(&self, args: &ShouldRevalidateArgs) -> bool {
        self(args)
    }
}
