//! Transports for the MCP server
//!
//! - stdio: one session over stdin/stdout, runs until the client disconnects
//! - streamable HTTP: sessions at `/mcp`, plus a `/health` check

use crate::error::ServeError;
use crate::server::{DifyMcpServer, SERVER_NAME};
use axum::extract::State;
use axum::routing::get;
use axum::Json;
use rmcp::serve_server;
use rmcp::transport::io::stdio;
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpService,
};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Health check endpoint handler
async fn health_check(State(server): State<DifyMcpServer>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": SERVER_NAME,
        "workflows": server.registry().list(),
    }))
}

/// Serve one MCP session over stdin/stdout until the client disconnects
pub async fn serve_stdio(server: DifyMcpServer) -> Result<(), ServeError> {
    tracing::info!(
        "Starting MCP server on stdio with {} workflows",
        server.registry().len()
    );
    let running = serve_server(server, stdio())
        .await
        .map_err(|e| ServeError::Stdio(e.to_string()))?;
    let quit_reason = running
        .waiting()
        .await
        .map_err(|e| ServeError::Stdio(e.to_string()))?;
    tracing::info!("MCP stdio server completed: {:?}", quit_reason);
    Ok(())
}

/// Handle for a running HTTP server
#[derive(Debug)]
pub struct HttpServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<(), std::io::Error>>,
}

impl HttpServerHandle {
    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// MCP endpoint URL
    pub fn url(&self) -> String {
        format!("http://{}/mcp", self.local_addr)
    }

    /// Stop accepting connections and wait for the server task
    pub async fn shutdown(mut self) -> Result<(), ServeError> {
        if let Some(tx) = self.shutdown_tx.take() {
            if tx.send(()).is_err() {
                tracing::warn!("Server shutdown signal receiver already dropped");
            }
        }
        self.task.await??;
        tracing::info!("HTTP MCP server on {} stopped", self.local_addr);
        Ok(())
    }
}

/// Bind `host:port` and serve MCP over streamable HTTP
///
/// Port 0 binds a random free port; see [`HttpServerHandle::local_addr`].
pub async fn start_http(
    server: DifyMcpServer,
    host: &str,
    port: u16,
) -> Result<HttpServerHandle, ServeError> {
    let bind_addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|source| ServeError::Bind {
            addr: bind_addr.clone(),
            source,
        })?;
    let local_addr = listener.local_addr()?;

    let handler = server.clone();
    let service = StreamableHttpService::new(
        move || Ok(handler.clone()),
        LocalSessionManager::default().into(),
        Default::default(),
    );
    let router = axum::Router::new()
        .nest_service("/mcp", service)
        .route("/health", get(health_check))
        .with_state(server);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    tracing::info!("HTTP MCP server ready on http://{}/mcp", local_addr);
    Ok(HttpServerHandle {
        local_addr,
        shutdown_tx: Some(shutdown_tx),
        task,
    })
}
