//! Daemon wiring: supervisor and router tasks sharing one inbox, driven
//! until ctrl-c / SIGTERM.

use std::sync::Arc;

use mqttgw_core::{DeviceRegistry, GatewayConfig, MemoryRegistry};
use mqttgw_transport::{MosquittoCli, Transport};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::inbox::inbox;
use crate::router::Router;
use crate::supervisor::{Supervisor, SupervisorHandle, SupervisorOptions};

/// A running gateway: supervisor and router tasks plus their shared
/// cancellation token.
pub struct Gateway {
    handle: SupervisorHandle,
    cancel: CancellationToken,
    supervisor_task: JoinHandle<()>,
    router_task: JoinHandle<()>,
}

impl Gateway {
    /// Host lifecycle hooks (device started / stopped).
    pub fn handle(&self) -> &SupervisorHandle {
        &self.handle
    }

    /// Cancel both tasks and wait for them. The supervisor terminates every
    /// listener on the way out.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for (name, task) in [("supervisor", self.supervisor_task), ("router", self.router_task)] {
            // Already joined by the caller's select; polling again would panic.
            if task.is_finished() {
                continue;
            }
            if let Err(e) = task.await {
                tracing::warn!("{name} task failed: {e}");
            }
        }
    }
}

/// Start the supervisor and router on the current runtime.
pub fn spawn_gateway<T, R>(
    transport: Arc<T>,
    registry: Arc<R>,
    options: SupervisorOptions,
    cancel: CancellationToken,
) -> Gateway
where
    T: Transport,
    R: DeviceRegistry + 'static,
{
    let (inbox, receiver) = inbox();
    let (supervisor, handle) = Supervisor::new(
        transport,
        Arc::clone(&registry),
        inbox,
        options,
        cancel.clone(),
    );
    let router = Router::new(registry, receiver, cancel.clone());

    Gateway {
        handle,
        cancel,
        supervisor_task: tokio::spawn(supervisor.run()),
        router_task: tokio::spawn(router.run()),
    }
}

/// Run the standalone daemon with the in-memory registry until a shutdown
/// signal arrives.
pub async fn run_daemon(config: GatewayConfig) -> anyhow::Result<()> {
    let transport = Arc::new(MosquittoCli::from_config(&config.transport));
    let options = SupervisorOptions::from_config(&config);
    let registry = Arc::new(MemoryRegistry::with_devices(config.devices));
    let active = registry.devices().iter().filter(|d| d.is_active()).count();
    tracing::info!(
        devices = active,
        poll_interval_secs = options.poll_interval.as_secs(),
        sub_bin = %config.transport.sub_bin,
        "gateway starting"
    );

    let cancel = CancellationToken::new();
    let mut gateway = spawn_gateway(transport, registry, options, cancel);

    tokio::select! {
        () = shutdown_signal() => {}
        _ = &mut gateway.supervisor_task => {
            tracing::warn!("supervisor exited unexpectedly");
        }
        _ = &mut gateway.router_task => {
            tracing::warn!("router exited unexpectedly");
        }
    }

    gateway.shutdown().await;
    tracing::info!("gateway stopped");
    Ok(())
}

/// Resolves on ctrl-c or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    () = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
                    _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                tracing::warn!("failed to register SIGTERM handler: {e}");
                ctrl_c.await;
                tracing::info!("received ctrl-c, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
        tracing::info!("received ctrl-c, shutting down");
    }
}
