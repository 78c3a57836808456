//! Wires the loaded [`crate::config::OrchestratorConfig`] to a detected
//! runtime backend and the HTTP surface (spec §2, §4.10, §6).

use crate::config::OrchestratorConfig;
use crate::http;
use crate::lifecycle::LifecycleManager;
use crate::runtime_detector::RuntimeBackend;
use log::{error, info};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum ServerError {
	#[error("failed to bind http listener on {address}: {source}")]
	Bind { address: SocketAddr, source: std::io::Error },
}

pub struct OrchestratorState {
	pub config: OrchestratorConfig,
	pub lifecycle: Arc<LifecycleManager>,
}

pub struct Orchestrator {
	state: Arc<OrchestratorState>,
	listener: TcpListener,
}

impl Orchestrator {
	pub async fn bind(config: OrchestratorConfig) -> Result<Self, ServerError> {
		let backend = RuntimeBackend::detect();
		info!("detected runtime backend: {backend:?}");

		let lifecycle = Arc::new(LifecycleManager::new(backend, config.cluster.clone(), config.world.clone(), &config.chunk_servers));

		let http_address = SocketAddr::new(config.listen_address.ip(), config.http_port);
		let listener = TcpListener::bind(http_address).await.map_err(|source| ServerError::Bind { address: http_address, source })?;

		let state = Arc::new(OrchestratorState { config, lifecycle });

		Ok(Self { state, listener })
	}

	/// Starts every configured chunk server, then serves the HTTP surface
	/// until `shutdown` fires, then signals every chunk server to stop.
	pub async fn run(self, shutdown: CancellationToken) {
		for (id, result) in self.state.lifecycle.start_all().await {
			if let Err(error) = result {
				error!("chunk server {id} failed to start: {error}");
			}
		}

		let router = http::router(self.state.clone());
		let shutdown_signal = {
			let shutdown = shutdown.clone();
			async move { shutdown.cancelled().await }
		};

		if let Err(error) = axum::serve(self.listener, router).with_graceful_shutdown(shutdown_signal).await {
			error!("http server error: {error}");
		}

		self.state.lifecycle.shutdown().await;
	}
}
