//! Correlation IDs for every request.
//!
//! The layer reads `X-Correlation-ID` (generating a UUID when it is missing or
//! malformed), stores it in the request extensions where
//! [`Request::from_parts`](crate::request::Request::from_parts) picks it up,
//! runs the rest of the stack inside a span carrying the ID, and echoes the ID
//! back on the response.

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::response::Response;
use futures::future::BoxFuture;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::Instrument;
use uuid::Uuid;

/// Header carrying the correlation ID in both directions.
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

/// Build the correlation-id layer.
#[must_use]
pub fn correlation_id_layer() -> CorrelationIdLayer {
    CorrelationIdLayer
}

/// Tower layer producing [`CorrelationIdService`].
#[derive(Clone, Copy, Debug, Default)]
pub struct CorrelationIdLayer;

impl<S> Layer<S> for CorrelationIdLayer {
    type Service = CorrelationIdService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CorrelationIdService { inner }
    }
}

/// Service wrapper installed by [`CorrelationIdLayer`].
#[derive(Clone, Debug)]
pub struct CorrelationIdService<S> {
    inner: S,
}

fn incoming_id(request: &Request) -> Option<Uuid> {
    let raw = request.headers().get(CORRELATION_ID_HEADER)?.to_str().ok()?;
    Uuid::parse_str(raw).ok()
}

impl<S> Service<Request> for CorrelationIdService<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request) -> Self::Future {
        let id = incoming_id(&request).unwrap_or_else(Uuid::new_v4);
        request.extensions_mut().insert(id);

        let span = tracing::debug_span!(
            "request",
            correlation_id = %id,
            method = %request.method(),
            path = %request.uri().path(),
        );
        let fut = self.inner.call(request).instrument(span);

        Box::pin(async move {
            let mut response = fut.await?;
            if let Ok(value) = HeaderValue::from_str(&id.to_string()) {
                response.headers_mut().insert(CORRELATION_ID_HEADER, value);
            }
            Ok(response)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use crate::app::Application;
    use crate::request::Request as HandlerRequest;
    use crate::response::Response as HandlerResponse;
    use axum::body::Body;
    use composable_http_core::Verb;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn echo_app() -> Application {
        let app = Application::new();
        app.route(
            Verb::Get,
            "/id",
            [Arc::new(|req: HandlerRequest, res: HandlerResponse, _next: crate::next::Next| {
                res.text(req.correlation_id().to_string());
            }) as crate::app::NativeHandler],
        )
        .unwrap();
        app
    }

    async fn get(app: &Application, header: Option<&str>) -> (Option<String>, String) {
        let mut builder = http::Request::builder().uri("/id");
        if let Some(value) = header {
            builder = builder.header(CORRELATION_ID_HEADER, value);
        }
        let response = app
            .router()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let echoed = response
            .headers()
            .get(CORRELATION_ID_HEADER)
            .map(|v| v.to_str().unwrap().to_string());
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (echoed, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_generated_id_reaches_handler_and_response() {
        let (echoed, body) = get(&echo_app(), None).await;
        let echoed = echoed.expect("Correlation ID header should be present");
        assert!(Uuid::parse_str(&echoed).is_ok());
        assert_eq!(echoed, body);
    }

    #[tokio::test]
    async fn test_client_id_is_preserved() {
        let id = Uuid::new_v4().to_string();
        let (echoed, body) = get(&echo_app(), Some(&id)).await;
        assert_eq!(echoed.as_deref(), Some(id.as_str()));
        assert_eq!(body, id);
    }

    #[tokio::test]
    async fn test_malformed_id_is_replaced() {
        let (echoed, _) = get(&echo_app(), Some("not-a-uuid")).await;
        let echoed = echoed.unwrap();
        assert_ne!(echoed, "not-a-uuid");
        assert!(Uuid::parse_str(&echoed).is_ok());
    }
}
