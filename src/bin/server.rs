//! predacl REST API Server
//!
//! Run with: cargo run --features server --bin predacl-server
//!
//! Configuration comes from the environment (`PREDACL_SECRET` is required);
//! log filtering from `RUST_LOG` (default `info`).

use std::sync::Arc;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use predacl::{server, AclConfig, AclService};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = AclConfig::from_env()?;
    let addr = config.bind_addr.clone();
    let service = Arc::new(AclService::open(config)?);
    service.start()?;

    let app = server::router(service.clone());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "predacl server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    service.stop();
    Ok(())
}
