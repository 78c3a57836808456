use clap::Parser;
use env_logger::Env;
use log::info;
use std::path::PathBuf;
use std::time::Instant;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use voxelcluster_chunk_server::config::ChunkConfig;
use voxelcluster_chunk_server::server::ChunkServer;

#[derive(Parser)]
#[command(version)]
struct ClArgs {
	/// Path to a HOCON config file. Ignored if `CHUNK_CONFIG_JSON` or
	/// `CHUNK_CONFIG_YAML_B64` is set (spec §6).
	#[arg(long)]
	config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
	let start_time = Instant::now();
	let cl_args = ClArgs::parse();

	env_logger::init_from_env(Env::default().default_filter_or(if cfg!(debug_assertions) { "debug" } else { "info" }));

	info!("voxelcluster chunk server v{}", env!("CARGO_PKG_VERSION"));

	let config = ChunkConfig::load(cl_args.config.as_deref())?;
	let server_id = config.server_id;

	let runtime = Runtime::new()?;
	let _guard = runtime.enter();

	let server = runtime.block_on(ChunkServer::bind(config))?;
	let shutdown = CancellationToken::new();

	runtime.spawn({
		let shutdown = shutdown.clone();
		async move {
			let _ = tokio::signal::ctrl_c().await;
			info!("shutdown signal received");
			shutdown.cancel();
		}
	});

	info!("server {server_id} ready, {:.0?}", Instant::now() - start_time);

	server.run(shutdown);

	Ok(())
}
