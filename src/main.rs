use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use personai_backend::config::ServiceConfig;
use personai_backend::runtime::BackendRuntime;
use personai_backend::server::serve_backend;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,personai=debug,personai_backend=debug")),
        )
        .init();

    tracing::info!("PersonAI relay starting...");

    let config = ServiceConfig::load();
    let runtime =
        BackendRuntime::bootstrap(config).context("failed to bootstrap backend runtime")?;

    let server_rt = tokio::runtime::Runtime::new().context("failed to start server runtime")?;
    server_rt.block_on(serve_backend(runtime))
}
