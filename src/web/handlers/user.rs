use crate::grpc::pb::RegisterParams;
use crate::utils::http::HttpResponse;
use crate::web::AppContext;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tonic::Request;
use tracing::error;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub account: String,
    pub password: String,
    #[serde(default)]
    pub login_platform: i32,
}

/// POST /register: create an account through the user service, then hand the
/// client the connector it should attach to.
pub async fn register(
    State(ctx): State<Arc<AppContext>>,
    Json(req): Json<RegisterRequest>,
) -> impl IntoResponse {
    let params = RegisterParams {
        account: req.account,
        password: req.password,
        login_platform: req.login_platform,
    };

    let mut client = ctx.user_client.clone();
    match client.register(Request::new(params)).await {
        Ok(resp) => {
            let uid = resp.into_inner().uid;
            if uid.is_empty() {
                return Json(HttpResponse::fail(1, "registration failed"));
            }
            Json(HttpResponse::ok(json!({
                "uid": uid,
                "serverInfo": {
                    "host": ctx.connector.client_host,
                    "port": ctx.connector.client_port,
                },
            })))
        }
        Err(status) => {
            error!("User service register call failed: {}", status);
            Json(HttpResponse::fail(1, status.message().to_string()))
        }
    }
}
