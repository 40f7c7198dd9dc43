//! HTTP server and graceful shutdown.
//!
//! Every request runs on its own task. hyper drops the request future when
//! the client disconnects; the engine task notices through the
//! [`Connection`](crate::transport::Connection) it leaves behind and cancels
//! the request, so after-hooks run even for requests nobody is waiting for.
//!
//! # Graceful shutdown
//!
//! On **SIGTERM** or **Ctrl-C** the server:
//! 1. Immediately stops `listener.accept()`, so no new connections are made.
//! 2. Lets every in-flight connection task run to completion.
//! 3. Waits for every request still draining its after-hooks.
//! 4. Returns from [`Server::serve`], which lets `main` exit cleanly.

use std::future::Future;
use std::net::SocketAddr;

use http_body_util::BodyExt;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::application::{App, Dispatcher};
use crate::error::Error;
use crate::request::RequestView;
use crate::transport::{self, ResponseBody};

enum Bind {
    Addr(SocketAddr),
    Listener(TcpListener),
}

/// The HTTP server.
pub struct Server {
    bind: Bind,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// # Panics
    ///
    /// Panics if `addr` is not a valid `host:port` string.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use ferrule::Server;
    /// let server = Server::bind("0.0.0.0:3000");
    /// ```
    pub fn bind(addr: &str) -> Self {
        let addr: SocketAddr = addr.parse().expect("invalid socket address");
        Self { bind: Bind::Addr(addr) }
    }

    /// Serves on an already bound listener.
    pub fn from_listener(listener: TcpListener) -> Self {
        Self { bind: Bind::Listener(listener) }
    }

    /// Starts accepting connections and dispatching them through `app`.
    ///
    /// Returns only after a full graceful shutdown (SIGTERM or Ctrl-C,
    /// followed by all in-flight requests completing).
    pub async fn serve(self, app: App) -> Result<(), Error> {
        self.serve_with_shutdown(app, shutdown_signal()).await
    }

    /// Like [`serve`](Server::serve), but stops when `shutdown` resolves.
    pub async fn serve_with_shutdown(
        self,
        app: App,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), Error> {
        let listener = match self.bind {
            Bind::Addr(addr) => TcpListener::bind(addr).await?,
            Bind::Listener(listener) => listener,
        };
        let addr = listener.local_addr()?;
        let dispatcher = app.build();

        info!(%addr, env = %dispatcher.config().env, "ferrule listening");

        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // Shutdown wins over queued connections.
                biased;

                () = &mut shutdown => {
                    info!(in_flight = connections.len(), "shutting down, draining connections");
                    break;
                }

                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        connections.spawn(serve_connection(dispatcher.clone(), stream, peer));
                    }
                    Err(e) => error!("accept error: {e}"),
                },

                // Reap finished connections as we go.
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        while connections.join_next().await.is_some() {}
        // A request can outlive its connection while its hooks drain.
        dispatcher.drain().await;

        info!("ferrule stopped");
        Ok(())
    }
}

// ── Connections ───────────────────────────────────────────────────────────────

/// Serves every request of one connection, over HTTP/1.1 or HTTP/2.
async fn serve_connection(dispatcher: Dispatcher, stream: TcpStream, peer: SocketAddr) {
    let service = service_fn(move |req| dispatch(dispatcher.clone(), req, peer));
    let result = ConnBuilder::new(TokioExecutor::new())
        .serve_connection(TokioIo::new(stream), service)
        .await;
    if let Err(e) = result {
        debug!(%peer, "connection ended with error: {e}");
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Hands one request to the engine and waits for its response.
///
/// An `Err` makes hyper abort the exchange without writing anything, which is
/// what a suppressed response asks for.
async fn dispatch(
    dispatcher: Dispatcher,
    req: hyper::Request<hyper::body::Incoming>,
    remote_addr: SocketAddr,
) -> Result<http::Response<ResponseBody>, Error> {
    let (parts, body) = req.into_parts();
    let body = body.collect().await?.to_bytes();
    let request = RequestView::from_parts(parts, body, Some(remote_addr));

    let (transport, connection) = transport::channel();
    let _task = dispatcher.spawn(request, transport);
    connection.response().await.ok_or(Error::Suppressed)
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives.
///
/// On Unix this listens for both **SIGTERM** and **SIGINT** (Ctrl-C).
/// On Windows only Ctrl-C is available.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let sigterm = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
