use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use warp::Filter;

use super::quiz_websocket;
use crate::quiz::QuizServer;

/// WebSocket upgrade route; the remote address feeds the per-origin
/// connection cap.
pub fn quiz_websocket_route(
    server: Arc<QuizServer>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("quiz")
        .and(warp::ws())
        .and(warp::addr::remote())
        .and(with_server(server))
        .map(
            |ws: warp::ws::Ws, remote: Option<SocketAddr>, server: Arc<QuizServer>| {
                ws.on_upgrade(move |websocket| {
                    quiz_websocket::handle_quiz_websocket(websocket, server, remote)
                })
            },
        )
}

pub fn health_check(
    server: Arc<QuizServer>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path::end()
        .and(warp::get())
        .and(with_server(server))
        .and_then(health_handler)
}

async fn health_handler(server: Arc<QuizServer>) -> Result<impl warp::Reply, Infallible> {
    let stats = server.stats().await;
    Ok(warp::reply::json(&serde_json::json!({
        "status": "ok",
        "service": "Quiz Realtime Service",
        "version": env!("CARGO_PKG_VERSION"),
        "activeQuizzes": stats.active_quizzes,
    })))
}

pub fn stats_endpoint(
    server: Arc<QuizServer>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("stats")
        .and(warp::get())
        .and(with_server(server))
        .and_then(stats_handler)
}

async fn stats_handler(server: Arc<QuizServer>) -> Result<impl warp::Reply, Infallible> {
    Ok(warp::reply::json(&server.stats().await))
}

fn with_server(
    server: Arc<QuizServer>,
) -> impl Filter<Extract = (Arc<QuizServer>,), Error = Infallible> + Clone {
    warp::any().map(move || server.clone())
}
