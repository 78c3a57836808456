use clap::Parser;
use env_logger::Env;
use log::info;
use std::path::PathBuf;
use std::time::Instant;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use voxelcluster_orchestrator::config::OrchestratorConfig;
use voxelcluster_orchestrator::server::Orchestrator;

#[derive(Parser)]
#[command(version)]
struct ClArgs {
	/// Path to the cluster layout YAML file (spec §6).
	#[arg(long)]
	config: PathBuf,
}

fn main() -> anyhow::Result<()> {
	let start_time = Instant::now();
	let cl_args = ClArgs::parse();

	env_logger::init_from_env(Env::default().default_filter_or(if cfg!(debug_assertions) { "debug" } else { "info" }));

	info!("voxelcluster orchestrator v{}", env!("CARGO_PKG_VERSION"));

	let config = OrchestratorConfig::load(&cl_args.config)?;

	let runtime = Runtime::new()?;
	let _guard = runtime.enter();

	let orchestrator = runtime.block_on(Orchestrator::bind(config))?;
	let shutdown = CancellationToken::new();

	runtime.spawn({
		let shutdown = shutdown.clone();
		async move {
			let _ = tokio::signal::ctrl_c().await;
			info!("shutdown signal received");
			shutdown.cancel();
		}
	});

	info!("orchestrator ready, {:.0?}", Instant::now() - start_time);

	runtime.block_on(orchestrator.run(shutdown));

	Ok(())
}
