use biosync::streaming::broadcaster::Broadcaster;
use biosync::streaming::controller::Pipeline;
use biosync::streaming::source::create_source;
use biosync_server::{router, AppState, Cli, ServerConfig};
use clap::Parser;
use std::net::SocketAddr;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "biosync_server=info,biosync=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // .env values feed the clap env fallbacks
    dotenvy::dotenv().ok();
    let config = ServerConfig::from_cli(Cli::parse())?;

    info!("Starting biosync server");

    let broadcaster = Broadcaster::new();
    let source = create_source(config.source.clone())?;
    let mut pipeline = Pipeline::spawn(config.pipeline.clone(), source, broadcaster.clone())?;
    let cancel = pipeline.cancellation_token();

    let app = router(AppState {
        broadcaster,
        subscriber_capacity: config.subscriber_capacity,
    });

    let addr: SocketAddr = config.bind_address().parse()?;
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);
    info!("Datapoint stream: ws://{}/stream", addr);
    info!("Dashboard stream: ws://{}/dashboard", addr);

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {}", e);
                return;
            }
            info!("Shutdown requested");
            cancel.cancel();
        });
    }

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(cancel.clone().cancelled_owned())
        .await?;

    // The server only returns once the token fires; collect the pipeline's verdict
    pipeline.stop().await?;
    info!("Shutdown complete");

    Ok(())
}
