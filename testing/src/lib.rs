//! # Composable HTTP Testing
//!
//! Helpers shared by the workspace's tests:
//!
//! - [`LogCapture`]: collect formatted `tracing` output in memory
//! - [`TestServer`]: a server on a free local port, with its scope and an HTTP client
//!
//! ## Example
//!
//! ```ignore
//! use composable_http_testing::{LogCapture, TestServer};
//!
//! #[tokio::test(flavor = "current_thread")]
//! async fn test_defect_is_logged() {
//!     let logs = LogCapture::new();
//!     let _guard = logs.install();
//!
//!     let server = TestServer::start().await.unwrap();
//!     // register handlers on server.server().runtime(...)
//!     let response = server.client().get(server.url("/")).send().await.unwrap();
//!
//!     assert_eq!(logs.lines_containing("boom").len(), 1);
//!     server.close().await.unwrap();
//! }
//! ```

use composable_http_runtime::{Scope, ScopeError};
use composable_http_web::{live, Server, ServerError, ServerLayer};
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

/// In-memory sink for formatted `tracing` output.
///
/// [`LogCapture::install`] sets a thread-local default subscriber, so tasks
/// only report into it when they run on the installing thread. Use a
/// `current_thread` runtime in tests that assert on log output.
#[derive(Clone, Debug, Default)]
pub struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    /// Create an empty capture.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a debug-level subscriber writing into this capture.
    ///
    /// The subscriber stays active until the guard is dropped.
    #[must_use]
    pub fn install(&self) -> DefaultGuard {
        let subscriber = tracing_subscriber::registry()
            .with(EnvFilter::new("debug"))
            .with(fmt::layer().with_writer(self.clone()).with_ansi(false));

        tracing::subscriber::set_default(subscriber)
    }

    /// Everything captured so far.
    #[must_use]
    pub fn contents(&self) -> String {
        let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buffer).into_owned()
    }

    /// Captured lines that contain `needle`.
    #[must_use]
    pub fn lines_containing(&self, needle: &str) -> Vec<String> {
        self.contents()
            .lines()
            .filter(|line| line.contains(needle))
            .map(ToString::to_string)
            .collect()
    }
}

/// Writer handed out by [`LogCapture`].
#[derive(Debug)]
pub struct CaptureWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl io::Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = CaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        CaptureWriter {
            buffer: Arc::clone(&self.buffer),
        }
    }
}

/// A server bound to a free port on `127.0.0.1`, owning the scope it was built in.
///
/// Call [`TestServer::close`] at the end of the test; it runs the same
/// teardown as production code (drain handlers, then close the socket).
#[derive(Debug)]
pub struct TestServer {
    scope: Scope,
    server: Server,
    client: reqwest::Client,
}

impl TestServer {
    /// Start a server with the default exit handler.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Listen`] if no local port could be bound.
    pub async fn start() -> Result<Self, ServerError> {
        Self::start_with(live("127.0.0.1", 0)).await
    }

    /// Start a server from a prepared layer.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Listen`] if the layer's address could not be bound.
    pub async fn start_with(layer: ServerLayer) -> Result<Self, ServerError> {
        let mut scope = Scope::new();
        let server = layer.build(&mut scope).await?;

        Ok(Self {
            scope,
            server,
            client: reqwest::Client::new(),
        })
    }

    /// The provisioned server.
    #[must_use]
    pub const fn server(&self) -> &Server {
        &self.server
    }

    /// Absolute URL for `path` on this server.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.server.local_addr())
    }

    /// A client for issuing requests.
    #[must_use]
    pub const fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Close the scope: interrupt and await handlers, then close the socket.
    ///
    /// # Errors
    ///
    /// Returns the first release failure.
    pub async fn close(mut self) -> Result<(), ScopeError> {
        self.scope.close().await
    }
}
