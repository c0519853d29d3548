//! Endpoints the agent exposes to peers and to the meta router

use crate::agent::Agent;
use hyper::{body::Bytes, Method, StatusCode};
use router_probe::http::{
    json_response, metrics_response, not_found_response, pong_response, text_response,
    HttpResponse,
};
use router_probe::MetricsCollector;

#[derive(Clone)]
pub struct StatusState {
    pub agent: Agent,
    pub metrics: MetricsCollector,
}

pub async fn handle_request(
    state: StatusState,
    method: Method,
    path: String,
    _body: Bytes,
) -> HttpResponse {
    if method != Method::GET {
        return not_found_response(&path);
    }

    match path.as_str() {
        "/ping" => pong_response(),
        "/route-scores" => json_response(&state.agent.scores().await, false),
        "/server-status" => json_response(&state.agent.record().await, true),
        "/router-status" => match state.agent.cached_snapshot().await {
            Some(snapshot) => json_response(&snapshot, true),
            None => text_response(StatusCode::SERVICE_UNAVAILABLE, "No registry snapshot yet\n"),
        },
        "/metrics" => metrics_response(&state.metrics),
        path => not_found_response(path),
    }
}
