pub mod constants;
pub mod error;
pub mod models;
mod modules;
pub mod proxy;

use tracing::{error, info};

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run_gateway() -> crate::error::GatewayResult<()> {
    let pool_path = std::env::var("PONTIS_ACCOUNTS_FILE")
        .ok()
        .map(std::path::PathBuf::from);
    let state = proxy::state::build_state(pool_path).await?;

    let pool = state.pool.clone();
    let serve = proxy::server::serve(state);
    tokio::select! {
        result = serve => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    // Pending pool mutations must reach disk before exit.
    pool.flush().await;
    Ok(())
}

pub fn run() {
    init_tracing();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to create runtime: {}", e);
            std::process::exit(1);
        }
    };

    runtime.block_on(async {
        if let Err(e) = run_gateway().await {
            error!("Gateway startup failed: {}", e);
            std::process::exit(1);
        }
    });
}
