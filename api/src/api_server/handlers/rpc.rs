use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;
use tracing::error;

use crate::api_server::handlers::methods;
use crate::api_server::handlers::{
    rpc_error, rpc_result, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR,
};
use crate::ApiState;

#[derive(Debug, Deserialize)]
struct RpcRequest {
    #[allow(dead_code)]
    jsonrpc: Option<String>,
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Vec<Value>,
}

const KNOWN_METHODS: &[&str] = &[
    "debug_traceTransaction",
    "debug_traceCall",
    "debug_traceBlockByNumber",
    "debug_traceBlockByHash",
    "trace_call",
    "trace_callMany",
    "trace_replayTransaction",
    "trace_replayBlockTransactions",
    "trace_transaction",
    "trace_block",
];

/// Single JSON-RPC endpoint. The reply is always a well-formed JSON-RPC
/// object with either `result` or `error`.
#[tracing::instrument(skip_all)]
pub async fn rpc(State(state): State<ApiState>, body: String) -> Json<Value> {
    let request: RpcRequest = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(parse_error) => {
            return Json(rpc_error(
                Value::Null,
                if body.trim().starts_with('{') {
                    INVALID_REQUEST
                } else {
                    PARSE_ERROR
                },
                &parse_error.to_string(),
            ));
        }
    };
    let id = request.id.unwrap_or(Value::Null);

    if !KNOWN_METHODS.contains(&request.method.as_str()) {
        return Json(rpc_error(
            id,
            METHOD_NOT_FOUND,
            &format!("the method {} does not exist/is not available", request.method),
        ));
    }

    match methods::dispatch(&state, &request.method, &request.params).await {
        Ok(result) => Json(rpc_result(id, result)),
        Err(error) => {
            error!("{}: {error}", request.method);
            Json(rpc_error(id, error.rpc_code(), &error.to_string()))
        }
    }
}
