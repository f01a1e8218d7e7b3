#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use corral::{Config, Server};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn config_path() -> Result<PathBuf, String> {
    let mut args = std::env::args().skip(1);
    match (args.next().as_deref(), args.next(), args.next()) {
        (Some("-f"), Some(path), None) => Ok(PathBuf::from(path)),
        _ => Err("usage: corral -f CONFIG_FILE".to_string()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = config_path()?;
    let config = Config::load(&path)?;

    let default_level = if config.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    info!(config = %path.display(), "starting corral");
    let server = Server::new(config).await?;
    server.run().await;
    Ok(())
}
