//! Adapter for handlers that delegate to an external fetch-like operation.
//!
//! The client's own retry and timeout policy is its business; this module only
//! maps its outcome onto handler results so a non-2xx response is treated
//! exactly like an error thrown by the handler.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::data::handler::{HandlerArgs, HandlerFuture, HandlerOutput, Redirect, RouteError, RouteHandler};
use crate::data::submission::{FormData, FormMethod};
use crate::lifecycle::abort::AbortSignal;

/// Request handed to a `FetchClient`.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub method: FormMethod,
    pub body: Option<FormData>,
    pub signal: AbortSignal,
}

/// Response returned by a `FetchClient`.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResponse {
    pub status: u16,
    pub status_text: String,
    /// `Location` header, for 3xx responses.
    pub location: Option<String>,
    pub body: Value,
}

impl FetchResponse {
    pub fn ok(body: Value) -> Self {
        Self {
            status: 200,
            status_text: "OK".to_string(),
            location: None,
            body,
        }
    }

    pub fn redirect(status: u16, location: impl Into<String>) -> Self {
        Self {
            status,
            status_text: "Found".to_string(),
            location: Some(location.into()),
            body: Value::Null,
        }
    }

    /// 2xx → data, 3xx with a location → redirect, anything else → error.
    pub fn into_output(self) -> Result<HandlerOutput, RouteError> {
        match (self.status, self.location) {
            (200..=299, _) => Ok(HandlerOutput::Data(self.body)),
            (300..=399, Some(location)) => Ok(HandlerOutput::Redirect(Redirect {
                location,
                status: self.status,
                replace: false,
            })),
            (status, _) => Err(RouteError::response(status, self.status_text, self.body)),
        }
    }
}

/// An opaque external fetch-like operation.
pub trait FetchClient: Send + Sync {
    fn fetch(&self, request: FetchRequest) -> BoxFuture<'static, Result<FetchResponse, RouteError>>;
}

/// A route handler that forwards the request to a `FetchClient`.
///
/// The request URL is rewritten onto `base_url`; aborting the navigation
/// reaches the client through the forwarded signal.
pub struct FetchHandler {
    client: Arc<dyn FetchClient>,
    base_url: String,
}

impl FetchHandler {
    pub fn new(client: Arc<dyn FetchClient>, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

impl RouteHandler for FetchHandler {
    fn call(&self, args: HandlerArgs) -> HandlerFuture {
        let request = FetchRequest {
            url: format!("{}{}", self.base_url.trim_end_matches('/'), args.request.url.to_href()),
            method: args.request.method,
            body: args.request.form_data.clone(),
            signal: args.request.signal.clone(),
        };
        tracing::trace!(route_id = %args.route_id, url = %request.url, "Delegating handler to fetch client");
        let client = Arc::clone(&self.client);
        Box::pin(async move { client.fetch(request).await?.into_output() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::handler::DataRequest;
    use crate::navigation::location::Path;
    use crate::routing::Params;
    use serde_json::json;
    use std::sync::Mutex;

    #[test]
    fn test_response_mapping() {
        assert!(matches!(
            FetchResponse::ok(json!(1)).into_output(),
            Ok(HandlerOutput::Data(v)) if v == json!(1)
        ));
        assert!(matches!(
            FetchResponse::redirect(303, "/done").into_output(),
            Ok(HandlerOutput::Redirect(r)) if r.location == "/done" && r.status == 303
        ));
        let missing = FetchResponse {
            status: 404,
            status_text: "Not Found".to_string(),
            location: None,
            body: json!("gone"),
        };
        assert_eq!(
            missing.into_output().unwrap_err(),
            RouteError::response(404, "Not Found", json!("gone"))
        );
    }

    #[derive(Default)]
    struct Recording {
        urls: Mutex<Vec<String>>,
    }

    impl FetchClient for Recording {
        fn fetch(&self, request: FetchRequest) -> BoxFuture<'static, Result<FetchResponse, RouteError>> {
            self.urls.lock().unwrap().push(request.url);
            Box::pin(async { Ok(FetchResponse::ok(json!({"ok": true}))) })
        }
    }

    #[tokio::test]
    async fn test_fetch_handler_forwards_url() {
        let client = Arc::new(Recording::default());
        let handler = FetchHandler::new(client.clone(), "https://api.test/");
        let args = HandlerArgs {
            route_id: "r".into(),
            params: Params::new(),
            request: DataRequest {
                url: Path {
                    pathname: "/users/1".to_string(),
                    search: "?x=1".to_string(),
                    hash: String::new(),
                },
                method: FormMethod::Get,
                form_data: None,
                signal: AbortSignal::never(),
            },
        };
        let out = handler.call(args).await.unwrap();
        assert!(matches!(out, HandlerOutput::Data(v) if v == json!({"ok": true})));
        assert_eq!(client.urls.lock().unwrap().as_slice(), ["https://api.test/users/1?x=1"]);
    }
}
