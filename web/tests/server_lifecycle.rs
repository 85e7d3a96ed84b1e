//! End-to-end tests over a real socket.
//!
//! Each test provisions a server on a free port through `ServerLayer`, talks to
//! it with `reqwest`, and tears it down by closing the scope.

#![allow(clippy::expect_used)] // Integration tests can use expect for setup
#![allow(clippy::unwrap_used)] // Integration tests can use unwrap for clarity
#![allow(clippy::panic)] // Handlers under test panic on purpose

use composable_http_core::Cause;
use composable_http_runtime::Scope;
use composable_http_testing::{LogCapture, TestServer};
use composable_http_web::{
    classic, handler, live, ExitHandler, Next, Request, Response, ServerError, CORRELATION_ID_HEADER,
};
use http::StatusCode;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Notify;

#[derive(Default)]
struct Env {
    started: Notify,
    cancelled: AtomicBool,
}

fn explode(message: &str) {
    panic!("{message}");
}

struct FlagOnDrop<'a>(&'a AtomicBool);

impl Drop for FlagOnDrop<'_> {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_json_round_trip() {
    let server = TestServer::start().await.unwrap();
    let rt = server.server().runtime(Arc::new(Env::default()));
    rt.get(
        "/",
        [handler(|_env: Arc<Env>, _req: Request, res: Response, _next| async move {
            res.json(&json!({ "message": "ok" }));
        })],
    )
    .unwrap();

    let response = server.client().get(server.url("/")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key(CORRELATION_ID_HEADER));
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "message": "ok" }));

    server.close().await.unwrap();
}

#[tokio::test(flavor = "current_thread")]
async fn test_defect_is_isolated_and_logged_once() {
    let logs = LogCapture::new();
    let _guard = logs.install();

    let server = TestServer::start().await.unwrap();
    let rt = server.server().runtime(Arc::new(Env::default()));
    rt.get(
        "/explode",
        [handler(|_env: Arc<Env>, _req, _res, _next| async move {
            explode("handler went sideways");
        })],
    )
    .unwrap();
    rt.get(
        "/healthy",
        [handler(|_env: Arc<Env>, _req, res: Response, _next| async move {
            res.text("still here");
        })],
    )
    .unwrap();

    let failed = server
        .client()
        .get(server.url("/explode"))
        .send()
        .await
        .unwrap();
    assert_eq!(failed.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let healthy = server
        .client()
        .get(server.url("/healthy"))
        .send()
        .await
        .unwrap();
    assert_eq!(healthy.status(), StatusCode::OK);
    assert_eq!(healthy.text().await.unwrap(), "still here");

    assert_eq!(logs.lines_containing("handler went sideways").len(), 1);

    server.close().await.unwrap();
}

#[tokio::test]
async fn test_middleware_state_reaches_route() {
    #[derive(Clone)]
    struct Caller(String);

    let server = TestServer::start().await.unwrap();
    let rt = server.server().runtime(Arc::new(Env::default()));
    rt.use_(handler(|_env: Arc<Env>, req: Request, _res, next: Next| async move {
        let caller = req.header("x-caller").unwrap_or("anonymous").to_string();
        req.insert_extension(Caller(caller));
        next.run();
    }))
    .unwrap();
    rt.get(
        "/whoami",
        [handler(|_env: Arc<Env>, req: Request, res: Response, _next| async move {
            let caller: Caller = req.extension().expect("middleware ran first");
            res.text(caller.0);
        })],
    )
    .unwrap();

    let body = server
        .client()
        .get(server.url("/whoami"))
        .header("x-caller", "ada")
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "ada");

    server.close().await.unwrap();
}

#[tokio::test(flavor = "current_thread")]
async fn test_close_interrupts_in_flight_handler() {
    let logs = LogCapture::new();
    let _guard = logs.install();

    let env = Arc::new(Env::default());
    let server = TestServer::start_with(live("127.0.0.1", 0).with_shutdown_timeout(Duration::from_secs(5)))
        .await
        .unwrap();
    let rt = server.server().runtime(Arc::clone(&env));
    rt.get(
        "/slow",
        [handler(|env: Arc<Env>, _req, _res, _next| async move {
            let _flag = FlagOnDrop(&env.cancelled);
            env.started.notify_one();
            tokio::time::sleep(Duration::from_secs(300)).await;
        })],
    )
    .unwrap();

    let client = server.client().clone();
    let url = server.url("/slow");
    let pending = tokio::spawn(async move { client.get(url).send().await });

    env.started.notified().await;
    let supervisor = server.server().supervisor().clone();
    assert_eq!(supervisor.active(), 1);

    server.close().await.unwrap();

    assert!(env.cancelled.load(Ordering::SeqCst));
    assert_eq!(supervisor.active(), 0);
    let response = pending.await.unwrap().unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(logs.lines_containing("ERROR").is_empty(), "{}", logs.contents());
}

#[tokio::test]
async fn test_close_completes_with_stalled_client() {
    let server = TestServer::start_with(
        live("127.0.0.1", 0).with_shutdown_timeout(Duration::from_millis(200)),
    )
    .await
    .unwrap();
    let addr = server.server().local_addr();

    let mut stalled = TcpStream::connect(addr).await.unwrap();
    stalled
        .write_all(b"GET / HTTP/1.1\r\nHost: x\r\n")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let closed = tokio::time::timeout(Duration::from_secs(5), server.close()).await;
    assert!(matches!(closed, Ok(Ok(()))));
    drop(stalled);
}

#[tokio::test]
async fn test_second_bind_fails_with_listen_error() {
    let server = TestServer::start().await.unwrap();
    let port = server.server().local_addr().port();

    let mut scope = Scope::new();
    let err = live("127.0.0.1", port)
        .build(&mut scope)
        .await
        .expect_err("port is taken");
    assert!(matches!(err, ServerError::Listen { .. }));
    assert!(err.to_string().contains(&port.to_string()));

    scope.close().await.unwrap();
    server.close().await.unwrap();
}

#[tokio::test]
async fn test_release_twice_is_harmless() {
    let mut scope = Scope::new();
    let server = live("127.0.0.1", 0).build(&mut scope).await.unwrap();

    server.handle().release().await.unwrap();
    server.handle().release().await.unwrap();
    scope.close().await.unwrap();
    scope.close().await.unwrap();
    assert!(scope.is_closed());
}

#[tokio::test]
async fn test_unmatched_path_is_404() {
    let server = TestServer::start().await.unwrap();

    let response = server
        .client()
        .post(server.url("/nowhere"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Cannot POST /nowhere");

    server.close().await.unwrap();
}

#[tokio::test]
async fn test_custom_exit_handler_and_classic_shim() {
    let exit = ExitHandler::new(|_req, res: Response, _next, cause: Cause| async move {
        res.status(StatusCode::SERVICE_UNAVAILABLE)
            .text(format!("custom: {cause}"));
    });
    let server = TestServer::start_with(live("127.0.0.1", 0).with_exit_handler(exit))
        .await
        .unwrap();
    let rt = server.server().runtime(Arc::new(Env::default()));
    rt.propfind(
        "/dav/:item",
        [classic(|req: Request, res: Response, _next| {
            res.status(StatusCode::MULTI_STATUS)
                .text(req.param("item").unwrap_or_default());
        })],
    )
    .unwrap();
    rt.post(
        "/fail",
        [handler(|_env: Arc<Env>, _req, _res, _next| async move {
            Err::<(), _>(std::io::Error::other("disk on fire"))
        })],
    )
    .unwrap();

    let method = reqwest::Method::from_bytes(b"PROPFIND").unwrap();
    let dav = server
        .client()
        .request(method, server.url("/dav/notes"))
        .send()
        .await
        .unwrap();
    assert_eq!(dav.status(), StatusCode::MULTI_STATUS);
    assert_eq!(dav.text().await.unwrap(), "notes");

    let failed = server
        .client()
        .post(server.url("/fail"))
        .send()
        .await
        .unwrap();
    assert_eq!(failed.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(failed.text().await.unwrap(), "custom: died: disk on fire");

    server.close().await.unwrap();
}
