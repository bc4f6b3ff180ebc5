//! Port forwarding supervisor
//!
//! Owns one forwarder per forwarded port. A reconcile always tears the whole
//! set down and rebuilds it from the config, so the running set is a pure
//! function of the record: `ports` minus the panel port.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{Role, TunnelConfig};
use crate::relay::relay;

/// Loopback host upstream nodes forward to
pub const LOOPBACK: &str = "127.0.0.1";

/// How the supervisor binds and relays
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Address forwarders listen on
    pub listen_host: String,
    /// Close connections idle for this long
    pub idle_timeout: Option<Duration>,
}

impl SupervisorOptions {
    pub fn from_config(config: &TunnelConfig) -> Self {
        Self {
            idle_timeout: match config.idle_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            ..Self::default()
        }
    }
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            listen_host: "0.0.0.0".to_string(),
            idle_timeout: None,
        }
    }
}

/// One forwarder the config asks for
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForwardPlan {
    pub port: u16,
    /// `host:port`; the port always equals the listen port
    pub target: String,
}

/// Forwarders derived from a config
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub forwards: Vec<ForwardPlan>,
    /// Set when the panel port appears in `ports` and was skipped
    pub excluded: Option<u16>,
}

/// Host forwarded traffic goes to for this role
pub fn target_host(config: &TunnelConfig) -> &str {
    match config.role {
        Role::Edge => config
            .upstream_address
            .as_deref()
            .map(str::trim)
            .unwrap_or(LOOPBACK),
        Role::Upstream => LOOPBACK,
    }
}

/// Work out the forwarder set for `config`
pub fn plan(config: &TunnelConfig) -> Plan {
    let host = target_host(config);
    // IPv6 literals need brackets in host:port form
    let host = if host.contains(':') && !host.starts_with('[') {
        format!("[{}]", host)
    } else {
        host.to_string()
    };

    Plan {
        forwards: config
            .forwarded_ports()
            .map(|port| ForwardPlan {
                port,
                target: format!("{}:{}", host, port),
            })
            .collect(),
        excluded: config
            .contains_port(config.excluded_port)
            .then_some(config.excluded_port),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ForwarderState {
    Starting,
    Listening,
    Failed,
    Stopped,
}

/// Point-in-time view of one forwarder
#[derive(Debug, Clone, Serialize)]
pub struct ForwarderStatus {
    pub port: u16,
    pub target: String,
    pub state: ForwarderState,
    pub active_connections: u64,
    pub total_connections: u64,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortFailure {
    pub port: u16,
    pub reason: String,
}

/// Outcome of a reconcile
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub listening: Vec<u16>,
    pub excluded: Option<u16>,
    pub failed: Vec<PortFailure>,
}

impl ReconcileReport {
    /// Nothing came up although something was asked for
    pub fn all_failed(&self) -> bool {
        self.listening.is_empty() && !self.failed.is_empty()
    }
}

#[derive(Default)]
struct Counters {
    active: AtomicU64,
    total: AtomicU64,
}

/// Decrements the active count when a connection task ends
struct ActiveGuard(Arc<Counters>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::Relaxed);
    }
}

struct Forwarder {
    target: String,
    state: ForwarderState,
    last_error: Option<String>,
    counters: Arc<Counters>,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

/// Runs and restarts the forwarder set
pub struct Supervisor {
    options: SupervisorOptions,
    forwarders: DashMap<u16, Forwarder>,
    generation: Mutex<CancellationToken>,
    reconcile_lock: tokio::sync::Mutex<()>,
}

impl Supervisor {
    pub fn new(options: SupervisorOptions) -> Arc<Self> {
        Arc::new(Self {
            options,
            forwarders: DashMap::new(),
            generation: Mutex::new(CancellationToken::new()),
            reconcile_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Tear down every forwarder and start the set `config` asks for
    ///
    /// A port that cannot be bound is reported in `failed` and skipped; the
    /// remaining ports still come up.
    pub async fn reconcile(&self, config: &TunnelConfig) -> ReconcileReport {
        let _guard = self.reconcile_lock.lock().await;

        self.stop_all().await;
        self.forwarders.clear();

        let plan = plan(config);
        let generation = CancellationToken::new();
        *self.generation.lock() = generation.clone();

        let mut report = ReconcileReport {
            excluded: plan.excluded,
            ..Default::default()
        };

        if let Some(port) = plan.excluded {
            tracing::info!("Port {} is the panel port; not forwarding it", port);
        }

        for forward in plan.forwards {
            let port = forward.port;
            self.forwarders.insert(
                port,
                Forwarder {
                    target: forward.target.clone(),
                    state: ForwarderState::Starting,
                    last_error: None,
                    counters: Arc::new(Counters::default()),
                    token: generation.child_token(),
                    task: None,
                },
            );

            let listen_addr = format!("{}:{}", self.options.listen_host, port);
            match TcpListener::bind(&listen_addr).await {
                Ok(listener) => {
                    tracing::info!("Forwarding {} -> {}", listen_addr, forward.target);
                    if let Some(mut entry) = self.forwarders.get_mut(&port) {
                        let task = tokio::spawn(accept_loop(
                            listener,
                            port,
                            forward.target,
                            entry.token.clone(),
                            entry.counters.clone(),
                            self.options.idle_timeout,
                        ));
                        entry.task = Some(task);
                        entry.state = ForwarderState::Listening;
                    }
                    report.listening.push(port);
                }
                Err(e) => {
                    tracing::error!("Failed to bind forwarder on {}: {}", listen_addr, e);
                    if let Some(mut entry) = self.forwarders.get_mut(&port) {
                        entry.state = ForwarderState::Failed;
                        entry.last_error = Some(e.to_string());
                    }
                    report.failed.push(PortFailure {
                        port,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if !report.failed.is_empty() {
            let ports: Vec<String> = report.failed.iter().map(|f| f.port.to_string()).collect();
            tracing::warn!(
                "{} of {} forwarders failed to start (ports: {})",
                report.failed.len(),
                report.failed.len() + report.listening.len(),
                ports.join(", ")
            );
        }

        report
    }

    /// Stop every forwarder and wait until their listeners are released
    pub async fn stop(&self) {
        let _guard = self.reconcile_lock.lock().await;
        self.stop_all().await;
    }

    async fn stop_all(&self) {
        self.generation.lock().cancel();

        let ports: Vec<u16> = self.forwarders.iter().map(|e| *e.key()).collect();
        for port in ports {
            let task = self.forwarders.get_mut(&port).and_then(|mut entry| {
                entry.token.cancel();
                entry.task.take()
            });
            if let Some(task) = task {
                if let Err(e) = task.await {
                    tracing::warn!("Forwarder task for port {} ended abnormally: {}", port, e);
                }
            }
            if let Some(mut entry) = self.forwarders.get_mut(&port) {
                if entry.state == ForwarderState::Listening {
                    entry.state = ForwarderState::Stopped;
                    tracing::debug!("Stopped forwarder on port {}", port);
                }
            }
        }
    }

    /// Ports with a listening forwarder
    pub fn active_ports(&self) -> BTreeSet<u16> {
        self.forwarders
            .iter()
            .filter(|e| e.state == ForwarderState::Listening)
            .map(|e| *e.key())
            .collect()
    }

    pub fn snapshot(&self) -> Vec<ForwarderStatus> {
        let mut statuses: Vec<ForwarderStatus> = self
            .forwarders
            .iter()
            .map(|e| ForwarderStatus {
                port: *e.key(),
                target: e.target.clone(),
                state: e.state,
                active_connections: e.counters.active.load(Ordering::Relaxed),
                total_connections: e.counters.total.load(Ordering::Relaxed),
                last_error: e.last_error.clone(),
            })
            .collect();
        statuses.sort_by_key(|s| s.port);
        statuses
    }
}

async fn accept_loop(
    listener: TcpListener,
    port: u16,
    target: String,
    token: CancellationToken,
    counters: Arc<Counters>,
    idle_timeout: Option<Duration>,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                tracing::debug!("Forwarder on port {} shutting down", port);
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    counters.total.fetch_add(1, Ordering::Relaxed);
                    counters.active.fetch_add(1, Ordering::Relaxed);
                    let guard = ActiveGuard(counters.clone());
                    tokio::spawn(handle_connection(
                        stream,
                        peer_addr,
                        target.clone(),
                        token.clone(),
                        idle_timeout,
                        guard,
                    ));
                }
                Err(e) => {
                    // Usually fd exhaustion; back off instead of spinning
                    tracing::warn!("Accept error on port {}: {}", port, e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    target: String,
    token: CancellationToken,
    idle_timeout: Option<Duration>,
    _guard: ActiveGuard,
) {
    tracing::debug!("Connection from {} -> {}", peer_addr, target);

    let upstream = tokio::select! {
        _ = token.cancelled() => return,
        connected = TcpStream::connect(&target) => match connected {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("Failed to connect to {} for {}: {}", target, peer_addr, e);
                return;
            }
        }
    };

    let _ = stream.set_nodelay(true);
    let _ = upstream.set_nodelay(true);

    tokio::select! {
        _ = token.cancelled() => {
            tracing::debug!("Dropping connection from {} on shutdown", peer_addr);
        }
        result = relay(stream, upstream, idle_timeout) => match result {
            Ok(stats) => tracing::debug!(
                "Connection from {} closed ({} bytes up, {} bytes down)",
                peer_addr,
                stats.client_to_target,
                stats.target_to_client
            ),
            Err(e) => tracing::debug!("Connection from {} ended: {}", peer_addr, e),
        }
    }
}
