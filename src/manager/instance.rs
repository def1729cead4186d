use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::config::ProxyInstanceConfig;
use crate::error::{FleetError, Result};
use crate::models::{port_for, ProxyConfig, VendorKind};
use crate::proxy::{ForwardingServer, ProxyAuth, UpstreamDialer, UpstreamTarget};

/// Extra time granted to the serving task beyond its own drain timeout
const STOP_SLACK: Duration = Duration::from_secs(2);

struct Running {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// One listening endpoint forwarding through one vendor upstream
pub struct ProxyInstance {
    proxy_id: i32,
    port: u16,
    vendor: VendorKind,
    settings: ProxyInstanceConfig,
    auth: Arc<ProxyAuth>,
    dialer: Arc<ArcSwap<UpstreamDialer>>,
    /// Serializes dialer replacement
    swap_lock: Mutex<()>,
    version: AtomicU64,
    running: Mutex<Option<Running>>,
}

impl ProxyInstance {
    /// Build an instance for a persisted config without binding anything yet
    pub fn new(config: &ProxyConfig, settings: &ProxyInstanceConfig) -> Result<Self> {
        let port = port_for(settings.port_base, config.id)?;
        let target = UpstreamTarget::parse(&config.upstream, config.vendor)?;
        let dialer = UpstreamDialer::new(target, settings.connect_timeout(), 1)?;

        Ok(Self {
            proxy_id: config.id,
            port,
            vendor: config.vendor,
            settings: settings.clone(),
            auth: Arc::new(ProxyAuth::new(
                settings.username.clone(),
                settings.password.clone(),
            )),
            dialer: Arc::new(ArcSwap::from_pointee(dialer)),
            swap_lock: Mutex::new(()),
            version: AtomicU64::new(1),
            running: Mutex::new(None),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Version of the active dialer; bumped on every upstream swap
    pub fn upstream_version(&self) -> u64 {
        self.dialer.load().version()
    }

    pub fn upstream(&self) -> UpstreamTarget {
        self.dialer.load().target().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Bind the port and serve on a background task
    #[instrument(skip(self), fields(proxy_id = self.proxy_id, port = self.port))]
    pub async fn start(&self) -> Result<()> {
        if self.auth.is_closed() {
            return Err(FleetError::Instance(format!(
                "proxy instance {} was stopped and cannot be restarted",
                self.proxy_id
            )));
        }
        if self.is_running() {
            return Ok(());
        }

        let addr = format!("{}:{}", self.settings.bind_host, self.port);
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            FleetError::Instance(format!("failed to bind {}: {}", addr, e))
        })?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server = ForwardingServer::new(
            self.proxy_id,
            listener,
            self.auth.clone(),
            self.dialer.clone(),
            self.settings.request_timeout(),
            self.settings.drain_timeout(),
        );

        let proxy_id = self.proxy_id;
        let task = tokio::spawn(async move {
            if let Err(e) = server.serve(shutdown_rx).await {
                error!(proxy_id = proxy_id, "Forwarding server stopped: {}", e);
            }
        });

        *self.running.lock() = Some(Running { shutdown_tx, task });
        info!("Proxy instance listening on {}", addr);
        Ok(())
    }

    /// Swap in a dialer for a new descriptor; open connections keep the old one
    #[instrument(skip(self, descriptor), fields(proxy_id = self.proxy_id))]
    pub fn update_upstream(&self, descriptor: &str) -> Result<u64> {
        let target = UpstreamTarget::parse(descriptor, self.vendor)?;

        let _guard = self.swap_lock.lock();
        let version = self.version.load(Ordering::SeqCst) + 1;
        let dialer = UpstreamDialer::new(target, self.settings.connect_timeout(), version)?;
        self.dialer.store(Arc::new(dialer));
        self.version.store(version, Ordering::SeqCst);

        info!(version = version, upstream = %self.dialer.load().target().address(), "Upstream swapped");
        Ok(version)
    }

    /// Stop serving; in-flight connections get the drain timeout
    ///
    /// Stopping an instance that is not running is a no-op.
    #[instrument(skip(self), fields(proxy_id = self.proxy_id, port = self.port))]
    pub async fn stop(&self) -> Result<()> {
        self.auth.close();

        let running = self.running.lock().take();
        let Some(Running { shutdown_tx, task }) = running else {
            return Ok(());
        };

        let _ = shutdown_tx.send(true);

        let grace = self.settings.drain_timeout() + STOP_SLACK;
        let abort = task.abort_handle();
        match tokio::time::timeout(grace, task).await {
            Ok(Ok(())) => {
                info!("Proxy instance stopped");
                Ok(())
            }
            Ok(Err(e)) => Err(FleetError::Instance(format!(
                "proxy instance {} task failed: {}",
                self.proxy_id, e
            ))),
            Err(_) => {
                warn!("Proxy instance did not stop in time, aborting");
                abort.abort();
                Err(FleetError::Instance(format!(
                    "proxy instance {} did not stop within {:?}",
                    self.proxy_id, grace
                )))
            }
        }
    }
}
