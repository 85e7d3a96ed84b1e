//! The response handle shared along a handler chain.

use crate::error::AppError;
use axum::response::IntoResponse;
use http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

#[derive(Default)]
struct Pending {
    status: Option<StatusCode>,
    headers: HeaderMap,
}

struct ResponseInner {
    pending: Mutex<Pending>,
    reply: Mutex<Option<oneshot::Sender<axum::response::Response>>>,
    ended: AtomicBool,
}

/// A cheap-to-clone handle used to answer a request.
///
/// Status and headers can be staged before the body is sent. The first
/// `send` wins; later sends are ignored and return `false`.
///
/// ```ignore
/// res.status(StatusCode::CREATED).json(&order);
/// ```
#[derive(Clone)]
pub struct Response {
    inner: Arc<ResponseInner>,
}

impl Response {
    /// Create a response handle and the receiver the dispatcher awaits.
    #[must_use]
    pub fn channel() -> (Self, oneshot::Receiver<axum::response::Response>) {
        let (tx, rx) = oneshot::channel();
        let response = Self {
            inner: Arc::new(ResponseInner {
                pending: Mutex::new(Pending::default()),
                reply: Mutex::new(Some(tx)),
                ended: AtomicBool::new(false),
            }),
        };
        (response, rx)
    }

    fn pending(&self) -> MutexGuard<'_, Pending> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Stage the status code for the eventual reply.
    pub fn status(&self, status: StatusCode) -> &Self {
        self.pending().status = Some(status);
        self
    }

    /// The staged status code (200 if none was staged).
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        self.pending().status.unwrap_or(StatusCode::OK)
    }

    /// Stage a header for the eventual reply, replacing any previous value.
    pub fn header(&self, name: HeaderName, value: HeaderValue) -> &Self {
        self.pending().headers.insert(name, value);
        self
    }

    /// Whether a reply has been sent.
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.inner.ended.load(Ordering::Acquire)
    }

    /// Send `body` as the reply.
    ///
    /// A staged status overrides the body's own status; staged headers are
    /// added on top of the body's headers. Returns `false` if a reply was
    /// already sent or the client is gone.
    pub fn send(&self, body: impl IntoResponse) -> bool {
        let Some(reply) = self
            .inner
            .reply
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            tracing::debug!("Response already sent, ignoring");
            return false;
        };
        self.inner.ended.store(true, Ordering::Release);

        let mut response = body.into_response();
        {
            let mut pending = self.pending();
            if let Some(status) = pending.status {
                *response.status_mut() = status;
            }
            for (name, value) in pending.headers.drain() {
                if let Some(name) = name {
                    response.headers_mut().insert(name, value);
                }
            }
        }

        reply.send(response).is_ok()
    }

    /// Send `error` with its own status, replacing any staged status.
    pub fn send_error(&self, error: AppError) -> bool {
        self.status(error.status());
        self.send(error)
    }

    /// Send `value` as a JSON body.
    pub fn json<T: Serialize>(&self, value: &T) -> bool {
        self.send(axum::Json(value))
    }

    /// Send a plain-text body.
    pub fn text(&self, body: impl Into<String>) -> bool {
        self.send(body.into())
    }

    /// End the response with the staged status and no body.
    pub fn end(&self) -> bool {
        self.send(())
    }

    /// Send `status` with its canonical reason as a plain-text body.
    pub fn send_status(&self, status: StatusCode) -> bool {
        self.status(status);
        self.send((
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            status.canonical_reason().unwrap_or_default(),
        ))
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status_code())
            .field("ended", &self.is_ended())
            .finish_non_exhaustive()
    }
}
