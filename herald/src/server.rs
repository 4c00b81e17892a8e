//! HTTP listeners with graceful shutdown
//!
//! The broadcaster runs two listeners over one shared broker:
//! - the publish listener: `POST /push`, `POST /push/*` and `GET /health`
//! - the stream listener: `GET /event`
//!
//! On shutdown the stream token is cancelled first so every open stream
//! ends, both listeners drain, and finally the broker closes whatever
//! subscriber channels remain.

use axum::{
    http::{header, HeaderValue},
    routing::{get, post},
    Router,
};
use std::future::{Future, IntoFuture};
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::{
    catch_panic::CatchPanicLayer,
    limit::RequestBodyLimitLayer,
    set_header::SetResponseHeaderLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

use crate::{
    config::Config,
    error::{panic_response, Result},
    health::health,
    publish::push_event,
    sse::stream_events,
    state::AppState,
};

/// Router for the publish listener
pub fn publish_router(state: AppState) -> Router {
    let body_limit = state.config().server.body_limit_bytes();

    Router::new()
        .route("/push", post(push_event))
        .route("/push/", post(push_event))
        .route("/push/{*rest}", post(push_event))
        .route("/health", get(health))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(CatchPanicLayer::custom(panic_response))
        .with_state(state)
}

/// Router for the stream listener
///
/// No request timeout: streams stay open for the life of the connection.
pub fn stream_router(state: AppState) -> Router {
    Router::new()
        .route("/event", get(stream_events))
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::new()))
        .layer(CatchPanicLayer::custom(panic_response))
        .with_state(state)
}

/// Server instance
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a server with a broker built from `config`
    pub fn new(config: Config) -> Result<Self> {
        Ok(Self::with_state(AppState::from_config(config)?))
    }

    /// Create a server around existing state
    pub fn with_state(state: AppState) -> Self {
        Self { state }
    }

    /// Get the shared state
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Run until SIGINT or SIGTERM
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(shutdown_signal()).await
    }

    /// Bind the configured addresses and run until `signal` resolves
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let server = &self.state.config().server;
        let publish = TcpListener::bind(server.publish_addr()).await?;
        let stream = TcpListener::bind(server.stream_addr()).await?;

        self.run(publish, stream, signal).await
    }

    /// Run on already bound listeners until `signal` resolves
    pub async fn run<F>(self, publish: TcpListener, stream: TcpListener, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let name = &self.state.config().service.name;
        tracing::info!("Starting {}", name);
        tracing::info!("  - Publish listener: {}", publish.local_addr()?);
        tracing::info!("  - Stream listener: {}", stream.local_addr()?);
        match self.state.broker().delivery_timeout() {
            Some(limit) => tracing::info!("  - Delivery timeout: {} ms", limit.as_millis()),
            None => tracing::info!("  - Delivery timeout: none (blocking handoff)"),
        }

        let shutdown = self.state.shutdown_token();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            signal.await;
            tracing::info!("Shutdown signal received, closing streams...");
            trigger.cancel();
        });

        let publish_server = axum::serve(publish, publish_router(self.state.clone()))
            .with_graceful_shutdown(shutdown.clone().cancelled_owned());
        let stream_server = axum::serve(stream, stream_router(self.state.clone()))
            .with_graceful_shutdown(shutdown.clone().cancelled_owned());

        let served = tokio::try_join!(publish_server.into_future(), stream_server.into_future());

        // one listener failing takes the other down with it
        shutdown.cancel();
        let closed = self.state.broker().close().await;
        tracing::info!(closed, "Server shutdown complete");

        served?;
        Ok(())
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C), starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::Broker;
    use crate::ids::SequentialAllocator;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    async fn read_until(stream: &mut TcpStream, buffer: &mut String, needle: &str) {
        timeout(WAIT, async {
            let mut chunk = [0u8; 1024];
            while !buffer.contains(needle) {
                let n = stream.read(&mut chunk).await.unwrap();
                assert!(n > 0, "connection closed before {needle:?} arrived");
                buffer.push_str(&String::from_utf8_lossy(&chunk[..n]));
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {needle:?}"));
    }

    #[test]
    fn test_server_creation() {
        let server = Server::new(Config::default()).unwrap();
        assert_eq!(server.state().config().server.publish_port, 8080);
    }

    #[tokio::test]
    async fn test_serve_publish_and_shutdown() {
        let state = AppState::new(
            Config::default(),
            Arc::new(Broker::new(Arc::new(SequentialAllocator::new()))),
        );
        let broker = state.broker();

        let publish = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let stream = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let publish_addr = publish.local_addr().unwrap();
        let stream_addr = stream.local_addr().unwrap();

        let (stop, stopped) = oneshot::channel::<()>();
        let server = tokio::spawn(Server::with_state(state).run(publish, stream, async move {
            let _ = stopped.await;
        }));

        let mut listener = TcpStream::connect(stream_addr).await.unwrap();
        listener
            .write_all(b"GET /event HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut received = String::new();
        read_until(&mut listener, &mut received, "\"message\":\"\"").await;
        assert!(received.starts_with("HTTP/1.1 200"));
        assert!(received.contains("text/event-stream"));

        let body = "message=hello";
        let mut publisher = TcpStream::connect(publish_addr).await.unwrap();
        publisher
            .write_all(
                format!(
                    "POST /push HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\
                     Content-Type: application/x-www-form-urlencoded\r\n\
                     Content-Length: {}\r\n\r\n{}",
                    body.len(),
                    body
                )
                .as_bytes(),
            )
            .await
            .unwrap();
        let mut response = String::new();
        read_until(&mut publisher, &mut response, "\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 200"));

        read_until(&mut listener, &mut received, "\"message\":\"hello\"").await;

        stop.send(()).unwrap();
        timeout(WAIT, server).await.unwrap().unwrap().unwrap();
        assert_eq!(broker.subscriber_count().await, 0);
    }
}
