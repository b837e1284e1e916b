use clap::Parser;
use tracing_subscriber::EnvFilter;

use screenrelay::{server, Args, RelayError};

#[tokio::main]
async fn main() -> Result<(), RelayError> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    let config = args.into_config()?;
    server::run(config).await
}
