//! The request handle shared along a handler chain.

use crate::error::BodyError;
use axum::body::{Body, Bytes};
use composable_http_core::Params;
use http::{request::Parts, Extensions, HeaderMap, Method, Uri, Version};
use serde::de::DeserializeOwned;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use uuid::Uuid;

/// Largest body [`Request::body_bytes`] will buffer (matches Axum's default limit).
pub const BODY_LIMIT: usize = 2 * 1024 * 1024;

struct RequestInner {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    correlation_id: Uuid,
    params: RwLock<Params>,
    extensions: Mutex<Extensions>,
    body: Mutex<Option<Body>>,
}

/// A cheap-to-clone handle to the incoming request.
///
/// Every layer of a chain sees the same request. Middleware passes state to
/// later layers through typed extensions:
///
/// ```ignore
/// let auth = handler(|_env: Arc<Env>, req: Request, _res, next: Next| async move {
///     req.insert_extension(User { name: "ada".into() });
///     next.run();
/// });
///
/// let show = handler(|_env: Arc<Env>, req: Request, res: Response, _next| async move {
///     let user: Option<User> = req.extension();
///     res.json(&user);
/// });
/// ```
#[derive(Clone)]
pub struct Request {
    inner: Arc<RequestInner>,
}

impl Request {
    /// Build a handle from the parts of an incoming request.
    ///
    /// The correlation ID is taken from the extensions (set by
    /// [`correlation_id_layer`](crate::middleware::correlation_id_layer)) or generated.
    #[must_use]
    pub fn from_parts(parts: Parts, body: Body) -> Self {
        let correlation_id = parts
            .extensions
            .get::<Uuid>()
            .copied()
            .unwrap_or_else(Uuid::new_v4);

        Self {
            inner: Arc::new(RequestInner {
                method: parts.method,
                uri: parts.uri,
                version: parts.version,
                headers: parts.headers,
                correlation_id,
                params: RwLock::new(Params::new()),
                extensions: Mutex::new(parts.extensions),
                body: Mutex::new(Some(body)),
            }),
        }
    }

    /// Request method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.inner.method
    }

    /// Full request URI.
    #[must_use]
    pub fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    /// Path component of the URI.
    #[must_use]
    pub fn path(&self) -> &str {
        self.inner.uri.path()
    }

    /// Raw query string, if any.
    #[must_use]
    pub fn query(&self) -> Option<&str> {
        self.inner.uri.query()
    }

    /// HTTP version.
    #[must_use]
    pub fn version(&self) -> Version {
        self.inner.version
    }

    /// Request headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.inner.headers
    }

    /// A header value as a string, if present and valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Correlation ID for logs and tracing.
    #[must_use]
    pub fn correlation_id(&self) -> Uuid {
        self.inner.correlation_id
    }

    /// Parameters captured by the layer currently handling the request.
    #[must_use]
    pub fn params(&self) -> Params {
        self.inner
            .params
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// A single captured parameter.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<String> {
        self.inner
            .params
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(ToString::to_string)
    }

    pub(crate) fn set_params(&self, params: Params) {
        *self
            .inner
            .params
            .write()
            .unwrap_or_else(PoisonError::into_inner) = params;
    }

    fn extensions(&self) -> MutexGuard<'_, Extensions> {
        self.inner
            .extensions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a typed value for later layers, returning any previous value.
    pub fn insert_extension<T>(&self, value: T) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.extensions().insert(value)
    }

    /// A copy of a typed value stored by an earlier layer.
    #[must_use]
    pub fn extension<T>(&self) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.extensions().get::<T>().cloned()
    }

    /// Take ownership of the body. Only the first caller gets it.
    #[must_use]
    pub fn take_body(&self) -> Option<Body> {
        self.inner
            .body
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Buffer the whole body, up to [`BODY_LIMIT`] bytes.
    ///
    /// # Errors
    ///
    /// Returns [`BodyError::AlreadyTaken`] if another layer consumed the body,
    /// or [`BodyError::Read`] if reading fails or the limit is exceeded.
    pub async fn body_bytes(&self) -> Result<Bytes, BodyError> {
        let body = self.take_body().ok_or(BodyError::AlreadyTaken)?;
        Ok(axum::body::to_bytes(body, BODY_LIMIT).await?)
    }

    /// Buffer the body and decode it as JSON.
    ///
    /// # Errors
    ///
    /// Same as [`Request::body_bytes`], plus [`BodyError::Json`] for invalid JSON.
    pub async fn json<T: DeserializeOwned>(&self) -> Result<T, BodyError> {
        let bytes = self.body_bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.inner.method)
            .field("uri", &self.inner.uri)
            .field("correlation_id", &self.inner.correlation_id)
            .finish_non_exhaustive()
    }
}
