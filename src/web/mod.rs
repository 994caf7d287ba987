pub mod handlers;

use crate::config::{Config, ConnectorConf};
use crate::grpc::pb::user_service_client::UserServiceClient;
use crate::rpc::ClientRegistry;
use crate::utils::shutdown_signal;
use anyhow::Result;
use axum::routing::post;
use axum::Router;
use std::sync::Arc;
use tonic::transport::Channel;
use tower_http::cors::CorsLayer;
use tracing::info;

pub struct AppContext {
    pub user_client: UserServiceClient<Channel>,
    pub connector: ConnectorConf,
}

pub fn router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/register", post(handlers::user::register))
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

/// Run the gateway: resolve the user service through etcd, then serve the
/// HTTP API until a shutdown signal arrives.
pub async fn serve(conf: Config) -> Result<()> {
    let mut clients = ClientRegistry::new(conf.etcd.clone());
    let user_client = clients.client::<UserServiceClient<Channel>>("user").await?;

    let ctx = Arc::new(AppContext {
        user_client,
        connector: conf.connector.clone(),
    });

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", conf.http_port)).await?;
    info!("Gateway listening on {}", listener.local_addr()?);
    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    clients.shutdown().await;
    Ok(())
}
