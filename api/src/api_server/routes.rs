use axum::routing::post;
use axum::Router;

use crate::api_server::handlers::rpc::rpc;
use crate::ApiState;

pub fn register() -> Router<ApiState> {
    Router::new().route("/", post(rpc))
}
