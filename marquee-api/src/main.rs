use marquee_api::{
    app,
    bootstrap::{system_clock, Backends, Services},
    worker::spawn_workers,
};
use marquee_store::Config;
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "marquee_api=debug,marquee_showtime=debug,marquee_booking=debug,tower_http=debug".into()
    });
    let json_logs = std::env::var("LOG_JSON").map(|v| v == "true").unwrap_or(false);

    if json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let config = Config::load()?;
    tracing::info!("Starting Marquee API on port {}", config.server.port);

    let backends = Backends::connect(&config).await?;
    let services = Services::build(&config, &backends, system_clock())?;
    let _workers = spawn_workers(&config, &backends, &services)?;

    let app = app(services.state(&config, &backends));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
