use mimalloc::MiMalloc;
use safewalk::{config::CONFIG, web};
use tracing::info;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt::init();

    info!(
        "starting with {} feature mirrors, k={} routes, max {}km",
        CONFIG.servers.len(),
        CONFIG.k_routes,
        CONFIG.max_distance_km
    );

    web::serve().await;

    Ok(())
}
