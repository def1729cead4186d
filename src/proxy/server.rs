//! Forwarding server using hyper
//!
//! Serves one instance's listener. Each accepted connection gets a snapshot
//! of the instance's current upstream dialer.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::error::Result;
use crate::proxy::handler::ProxyHandler;
use crate::proxy::middleware::ProxyAuth;
use crate::proxy::transport::UpstreamDialer;

/// Per-instance forwarding server
pub struct ForwardingServer {
    proxy_id: i32,
    listener: TcpListener,
    auth: Arc<ProxyAuth>,
    dialer: Arc<ArcSwap<UpstreamDialer>>,
    request_timeout: Duration,
    drain_timeout: Duration,
}

impl ForwardingServer {
    pub fn new(
        proxy_id: i32,
        listener: TcpListener,
        auth: Arc<ProxyAuth>,
        dialer: Arc<ArcSwap<UpstreamDialer>>,
        request_timeout: Duration,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            proxy_id,
            listener,
            auth,
            dialer,
            request_timeout,
            drain_timeout,
        }
    }

    /// Serve until shutdown is signalled or accepting fails
    ///
    /// On shutdown, in-flight connections get the drain timeout before they
    /// are aborted; the listener is closed last.
    #[instrument(skip(self, shutdown), fields(proxy_id = self.proxy_id))]
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut connections = JoinSet::new();

        let result = loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, client_addr)) => {
                            debug!("Accepted connection from {}", client_addr);
                            let handler = Arc::new(ProxyHandler::new(
                                self.auth.clone(),
                                self.dialer.load_full(),
                                self.request_timeout,
                            ));
                            connections.spawn(Self::handle_connection(
                                stream,
                                handler,
                                shutdown.clone(),
                            ));
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                            break Err(e.into());
                        }
                    }
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Forwarding server shutting down");
                        break Ok(());
                    }
                }
            }
        };

        self.drain(connections).await;
        drop(self.listener);
        result
    }

    async fn drain(&self, mut connections: JoinSet<()>) {
        if connections.is_empty() {
            return;
        }

        let in_flight = connections.len();
        let drained = tokio::time::timeout(self.drain_timeout, async {
            while connections.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                in_flight = in_flight,
                remaining = connections.len(),
                "Drain timeout elapsed, aborting connections"
            );
            connections.shutdown().await;
        }
    }

    /// Serve one client connection, then run its CONNECT tunnel if one was accepted
    async fn handle_connection(
        stream: TcpStream,
        handler: Arc<ProxyHandler>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let io = TokioIo::new(stream);

        let service_handler = handler.clone();
        let service = service_fn(move |req: Request<Incoming>| {
            let handler = service_handler.clone();
            async move { Ok::<_, Infallible>(handler.handle(req).await) }
        });

        let conn = http1::Builder::new()
            .preserve_header_case(true)
            .title_case_headers(true)
            .serve_connection(io, service)
            .with_upgrades();
        tokio::pin!(conn);

        // Idle keep-alive connections close on shutdown; a request in flight finishes first
        let result = tokio::select! {
            result = conn.as_mut() => result,
            _ = shutdown.changed() => {
                conn.as_mut().graceful_shutdown();
                conn.await
            }
        };

        if let Err(e) = result {
            debug!("Connection error: {}", e);
        }

        if let Some(tunnel) = handler.take_tunnel() {
            tunnel.run().await;
        }
    }
}
