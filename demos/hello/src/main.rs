//! Hello server.
//!
//! ```text
//! HTTP_PORT=8080 RUST_LOG=info cargo run -p composable-http-hello
//! curl localhost:8080/
//! curl localhost:8080/greet/ada
//! curl -X POST localhost:8080/echo -d '{"any": "json"}'
//! curl localhost:8080/boom          # 500, logged by the exit handler
//! ```

use composable_http_runtime::Scope;
use composable_http_web::{
    handler, AppError, Next, Request, Response, ServerConfig, ServerLayer,
};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Services shared by every handler.
struct Greeter {
    greeting: String,
    served: AtomicU64,
}

#[derive(Serialize)]
struct Greeting<'a> {
    message: String,
    served: u64,
    correlation_id: &'a str,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "composable_http=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env()?;
    info!(address = %config.address(), "Starting hello server");

    let mut scope = Scope::new();
    let server = ServerLayer::new(config).build(&mut scope).await?;

    let rt = server.runtime(Arc::new(Greeter {
        greeting: "Hello".to_string(),
        served: AtomicU64::new(0),
    }));

    rt.use_(handler(|env: Arc<Greeter>, _req: Request, _res, next: Next| async move {
        env.served.fetch_add(1, Ordering::Relaxed);
        next.run();
    }))?;

    rt.get(
        "/",
        [handler(|_env: Arc<Greeter>, _req, res: Response, _next| async move {
            res.json(&serde_json::json!({ "message": "ok" }));
        })],
    )?;

    rt.get(
        "/greet/:name",
        [handler(|env: Arc<Greeter>, req: Request, res: Response, _next| async move {
            let name = req.param("name").unwrap_or_default();
            let id = req.correlation_id().to_string();
            res.json(&Greeting {
                message: format!("{}, {name}!", env.greeting),
                served: env.served.load(Ordering::Relaxed),
                correlation_id: &id,
            });
        })],
    )?;

    rt.post(
        "/echo",
        [handler(|_env: Arc<Greeter>, req: Request, res: Response, _next| async move {
            match req.json::<serde_json::Value>().await {
                Ok(body) => res.json(&body),
                Err(err) => res.send_error(AppError::from(err)),
            };
        })],
    )?;

    rt.get(
        "/boom",
        [handler(|_env: Arc<Greeter>, _req, _res, _next| async move {
            Err::<(), _>(anyhow::anyhow!("the boom route always fails"))
        })],
    )?;

    info!(address = %server.local_addr(), "Ready, press Ctrl+C to stop");
    let signal = tokio::signal::ctrl_c().await;

    info!("Shutting down");
    scope.close().await?;
    info!("Stopped");
    signal.map_err(anyhow::Error::from)
}
