//! froovo demo server.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ net (bind, TLS) ──▶ engine adapter (axum route table)
//!                                              │
//!                                              ▼
//!                                  dispatch chain per request
//!                              ┌─────────────────────────────┐
//!                              │ Request facade (lazy body)  │
//!                              │ middleware → next → …       │
//!                              │ Response facade (end once)  │
//!                              └─────────────────────────────┘
//!     Client Response                          │
//!     ◀───────────────────────────────────────┘
//!
//!     Cross-cutting: config · observability · lifecycle
//! ```
//!
//! Routes mirror the usual walkthrough: a plain hello, chained middlewares,
//! an async body echo, descriptor routing, JSON, CORS and a pub/sub
//! websocket chat.

use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use serde_json::json;

use froovo::config::{load_config, ServerConfig};
use froovo::lifecycle::spawn_signal_listener;
use froovo::observability::{logging, metrics};
use froovo::{
    sync, BoxError, Message, Next, Request, Response, Route, Server, Socket, WebSocketBehavior,
};

#[derive(Debug, Parser)]
#[command(name = "froovo", version, about = "froovo demo server")]
struct Cli {
    /// TOML config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on; overrides the config.
    #[arg(short, long)]
    port: Option<String>,
}

const CHAT_TOPIC: &str = "chat";

/// Broadcasts every message to the other chat members.
struct Chat;

impl WebSocketBehavior for Chat {
    fn open(&self, socket: &Socket) {
        socket.subscribe(CHAT_TOPIC);
        socket.publish(CHAT_TOPIC, format!("{} joined", socket.id()));
    }

    fn message(&self, socket: &Socket, message: Message) {
        socket.publish(CHAT_TOPIC, message);
    }

    fn close(&self, socket: &Socket, _code: u16, _reason: &str) {
        tracing::info!(socket = %socket.id(), "Chat member left");
    }
}

async fn request_logger(req: Request, _res: Response, next: Next) {
    let start = Instant::now();
    next.run().await;
    tracing::info!(
        method = %req.method(),
        url = %req.url(),
        elapsed_us = start.elapsed().as_micros() as u64,
        "Handled"
    );
}

fn register_routes(server: &mut Server) {
    server
        .get("/", |_req: Request, res: Response| async move {
            res.end("Hello from froovo")?;
            Ok::<_, BoxError>(())
        })
        .get(
            "/sync",
            sync(|_req: &Request, res: &Response| res.end("sync handler").map(|_| ())),
        )
        .post("/echo", |req: Request, res: Response| async move {
            let body = req.body().await;
            res.json(&json!({
                "contentType": req.content_type(),
                "body": body.to_json(),
            }))?;
            Ok::<_, BoxError>(())
        })
        .get("/json", |req: Request, res: Response| async move {
            res.json(&json!({
                "query": req.query(),
                "cookies": req.cookies(),
                "userAgent": req.user_agent(),
                "ip": req.ip(),
            }))?;
            Ok::<_, BoxError>(())
        })
        .any("/cors", |_req: Request, res: Response| async move {
            res.enable_public_cors().end("")?;
            Ok::<_, BoxError>(())
        })
        .get("/old", |_req: Request, res: Response| async move {
            res.redirect("/")?;
            Ok::<_, BoxError>(())
        })
        .ws("/chat", Chat);

    server.route([
        Route::get("/users/:id")
            .handler(request_logger)
            .handler(|_req: Request, res: Response| async move {
                res.set_header("X-Powered-By", "froovo");
            })
            .handler(|req: Request, res: Response| async move {
                res.json(&json!({ "id": req.param_named("id"), "params": req.params() }))?;
                Ok::<_, BoxError>(())
            }),
        Route::delete("/users/:id").handler(|_req: Request, res: Response| async move {
            res.status(204).end("")?;
            Ok::<_, BoxError>(())
        }),
    ]);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!("froovo v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let port = cli
        .port
        .clone()
        .unwrap_or_else(|| config.listener.port.to_string());

    let mut server = Server::new(config);
    register_routes(&mut server);

    let running = server.listen(port).await?;
    spawn_signal_listener(running.shutdown_handle());
    tracing::info!(address = %running.local_addr(), "Listening for connections");

    running.wait().await?;
    tracing::info!("Shutdown complete");
    Ok(())
}
