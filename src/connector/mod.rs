use crate::config::Config;
use crate::discovery::Registrar;
use crate::utils::shutdown_signal;
use anyhow::Result;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tracing::{debug, info};
use uuid::Uuid;

/// Run the game connector: register in etcd under the configured name so
/// the rest of the cluster can see it, and accept websocket sessions from
/// game clients until shutdown.
pub async fn run(conf: Config) -> Result<()> {
    let record = conf.etcd.register.to_record();
    let registrar = Registrar::start(&conf.etcd, record).await?;

    let app = Router::new().route("/ws", get(ws_handler));
    let listener = tokio::net::TcpListener::bind(&conf.connector.ws_addr).await?;
    info!("Connector listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    registrar.stop().await;
    Ok(())
}

async fn ws_handler(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(handle_session)
}

/// One game client session. The game protocol lives above this layer; the
/// connector itself only keeps the pipe open.
async fn handle_session(mut socket: WebSocket) {
    let session_id = Uuid::new_v4();
    debug!("Session {} connected", session_id);

    while let Some(Ok(message)) = socket.recv().await {
        match message {
            Message::Text(frame) => {
                if socket.send(Message::Text(frame)).await.is_err() {
                    break;
                }
            }
            Message::Binary(frame) => {
                if socket.send(Message::Binary(frame)).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    debug!("Session {} closed", session_id);
}
