mod api;
mod config;
mod error;
mod quiz;

use std::sync::Arc;
use std::time::Duration;

use warp::Filter;

use config::Config;
use quiz::QuizServer;

const REAPER_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();

    let server = Arc::new(QuizServer::new(
        config.limits.max_connections_per_ip,
        Duration::from_secs(config.limits.ended_room_grace_secs),
    ));
    server.clone().start_reaper(REAPER_SWEEP_INTERVAL);

    let routes = api::quiz_routes::quiz_websocket_route(server.clone())
        .or(api::quiz_routes::health_check(server.clone()))
        .or(api::quiz_routes::stats_endpoint(server));

    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        "Quiz realtime service listening"
    );

    warp::serve(routes).run(config.bind_address()).await;
}
