// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for zaplink-server.
//!
//! [`ZaplinkRuntime`] composes the whole reconciliation layer (registry,
//! fleet client, tracker, loop guard, poller, orphan reconciler, HTTP
//! server and background workers) from injected collaborators. Nothing in
//! the subsystem is a global: everything is constructed here once and torn
//! down by [`ZaplinkRuntime::shutdown`], which cancels every timer and task
//! the runtime started.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use zaplink_server::runtime::ZaplinkRuntime;
//!
//! let runtime = ZaplinkRuntime::builder()
//!     .registry(registry)
//!     .fleet(fleet)
//!     .bind_addr("0.0.0.0:8080".parse()?)
//!     .webhook_url("https://crm.example.com/webhook/status")
//!     .build()?
//!     .start()
//!     .await?;
//!
//! // ... serve until shutdown ...
//!
//! runtime.shutdown().await;
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use zaplink_fleet::Fleet;
use zaplink_reconciler::{
    ConnectionTracker, LoopGuard, LoopGuardConfig, OrphanReconciler, RecoveryPoller, RetryPolicy,
    TrackerConfig,
};
use zaplink_registry::Registry;

use crate::handlers::{AppState, router};
use crate::sweep_worker::{SweepWorker, SweepWorkerConfig};
use crate::sync_worker::{SyncWorker, SyncWorkerConfig};

/// Builder for a [`ZaplinkRuntime`].
pub struct ZaplinkRuntimeBuilder {
    registry: Option<Arc<dyn Registry>>,
    fleet: Option<Arc<dyn Fleet>>,
    bind_addr: SocketAddr,
    webhook_url: String,
    tracker_config: TrackerConfig,
    guard_config: LoopGuardConfig,
    retry_policy: RetryPolicy,
    sync_interval: Duration,
    sweep_interval: Duration,
}

impl Default for ZaplinkRuntimeBuilder {
    fn default() -> Self {
        Self {
            registry: None,
            fleet: None,
            bind_addr: "0.0.0.0:8080".parse().unwrap(),
            webhook_url: "http://127.0.0.1:8080/webhook/status".to_string(),
            tracker_config: TrackerConfig::default(),
            guard_config: LoopGuardConfig::default(),
            retry_policy: RetryPolicy::default(),
            sync_interval: Duration::from_secs(120),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl ZaplinkRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the instance registry (required).
    pub fn registry(mut self, registry: Arc<dyn Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set the worker fleet client (required).
    pub fn fleet(mut self, fleet: Arc<dyn Fleet>) -> Self {
        self.fleet = Some(fleet);
        self
    }

    /// Set the HTTP bind address. Default: `0.0.0.0:8080`.
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the webhook URL wired into new fleet sessions.
    pub fn webhook_url(mut self, url: impl Into<String>) -> Self {
        self.webhook_url = url.into();
        self
    }

    /// Override the connection tracker configuration.
    pub fn tracker_config(mut self, config: TrackerConfig) -> Self {
        self.tracker_config = config;
        self
    }

    /// Override the loop guard configuration.
    pub fn guard_config(mut self, config: LoopGuardConfig) -> Self {
        self.guard_config = config;
        self
    }

    /// Override the recovery poller's retry policy.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Set the interval between scheduled recovery sweeps. Default: 2 minutes.
    pub fn sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Set the interval between loop-guard purges. Default: 1 minute.
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Build the runtime configuration.
    pub fn build(self) -> Result<ZaplinkRuntimeConfig> {
        let registry = self
            .registry
            .ok_or_else(|| anyhow::anyhow!("registry is required"))?;
        let fleet = self
            .fleet
            .ok_or_else(|| anyhow::anyhow!("fleet is required"))?;

        Ok(ZaplinkRuntimeConfig {
            registry,
            fleet,
            bind_addr: self.bind_addr,
            webhook_url: self.webhook_url,
            tracker_config: self.tracker_config,
            guard_config: self.guard_config,
            retry_policy: self.retry_policy,
            sync_interval: self.sync_interval,
            sweep_interval: self.sweep_interval,
        })
    }
}

/// Configuration for a [`ZaplinkRuntime`].
pub struct ZaplinkRuntimeConfig {
    registry: Arc<dyn Registry>,
    fleet: Arc<dyn Fleet>,
    bind_addr: SocketAddr,
    webhook_url: String,
    tracker_config: TrackerConfig,
    guard_config: LoopGuardConfig,
    retry_policy: RetryPolicy,
    sync_interval: Duration,
    sweep_interval: Duration,
}

impl ZaplinkRuntimeConfig {
    /// Start the runtime: bind the HTTP server and spawn the workers.
    pub async fn start(self) -> Result<ZaplinkRuntime> {
        let tracker = ConnectionTracker::new(self.tracker_config);
        let guard = LoopGuard::new(self.guard_config);

        let poller = Arc::new(RecoveryPoller::new(
            self.registry.clone(),
            self.fleet.clone(),
            tracker.clone(),
            guard.clone(),
            self.retry_policy,
        ));
        let orphan = Arc::new(OrphanReconciler::new(
            self.registry.clone(),
            self.fleet.clone(),
            guard.clone(),
        ));

        let state = Arc::new(AppState {
            registry: self.registry,
            fleet: self.fleet,
            tracker: tracker.clone(),
            poller: poller.clone(),
            orphan,
            webhook_url: self.webhook_url,
        });

        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;
        let local_addr = listener.local_addr()?;

        let server_shutdown = Arc::new(Notify::new());
        let signal = server_shutdown.clone();
        let app = router(state);
        let server_handle = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.notified().await })
                .await;
            if let Err(e) = result {
                warn!(error = %e, "HTTP server exited with error");
            }
        });

        let sync_worker = SyncWorker::new(
            poller,
            SyncWorkerConfig {
                interval: self.sync_interval,
            },
        );
        let sync_shutdown = sync_worker.shutdown_handle();
        let sync_handle = tokio::spawn(async move { sync_worker.run().await });

        let sweep_worker = SweepWorker::new(
            guard.clone(),
            SweepWorkerConfig {
                interval: self.sweep_interval,
            },
        );
        let sweep_shutdown = sweep_worker.shutdown_handle();
        let sweep_handle = tokio::spawn(async move { sweep_worker.run().await });

        info!(addr = %local_addr, "Zaplink reconciliation server ready");

        Ok(ZaplinkRuntime {
            local_addr,
            tracker,
            guard,
            server_shutdown,
            server_handle,
            sync_shutdown,
            sync_handle,
            sweep_shutdown,
            sweep_handle,
        })
    }
}

/// A running zaplink server: HTTP listener plus background workers.
pub struct ZaplinkRuntime {
    local_addr: SocketAddr,
    tracker: ConnectionTracker,
    guard: LoopGuard,
    server_shutdown: Arc<Notify>,
    server_handle: JoinHandle<()>,
    sync_shutdown: Arc<Notify>,
    sync_handle: JoinHandle<()>,
    sweep_shutdown: Arc<Notify>,
    sweep_handle: JoinHandle<()>,
}

impl ZaplinkRuntime {
    /// Create a builder.
    pub fn builder() -> ZaplinkRuntimeBuilder {
        ZaplinkRuntimeBuilder::new()
    }

    /// Address the HTTP server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Gracefully stop the server, the workers, and every timer the
    /// subsystem started (heartbeats, unblock tasks).
    pub async fn shutdown(self) {
        info!("Shutting down zaplink runtime");

        // notify_one leaves a permit behind, so a worker that is mid-sweep
        // rather than parked on notified() still observes the signal.
        self.server_shutdown.notify_one();
        self.sync_shutdown.notify_one();
        self.sweep_shutdown.notify_one();

        let _ = self.server_handle.await;
        let _ = self.sync_handle.await;
        let _ = self.sweep_handle.await;

        self.tracker.shutdown();
        self.guard.shutdown();

        info!("Zaplink runtime shut down");
    }
}
