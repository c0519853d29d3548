//! Registry API handlers

use hyper::{body::Bytes, Method, StatusCode};
use router_core::RegistryStore;
use router_probe::http::{
    json_response, metrics_response, not_found_response, ok_response, pong_response,
    text_response, HttpResponse,
};
use router_probe::MetricsCollector;
use tracing::{info, warn};

/// Everything the handlers need, injected at startup
#[derive(Clone)]
pub struct ApiState {
    pub store: RegistryStore,
    pub metrics: MetricsCollector,
}

impl ApiState {
    pub fn new(store: RegistryStore, metrics: MetricsCollector) -> Self {
        Self { store, metrics }
    }
}

pub async fn handle_request(
    state: ApiState,
    method: Method,
    path: String,
    body: Bytes,
) -> HttpResponse {
    match (method, path.as_str()) {
        (Method::POST, "/new-server") => handle_new_server(&state, &body).await,
        (Method::GET, "/full-router") => json_response(&state.store.snapshot().await, true),
        (Method::GET, "/ping") => pong_response(),
        (Method::GET, "/metrics") => metrics_response(&state.metrics),
        (_, path) => not_found_response(path),
    }
}

async fn handle_new_server(state: &ApiState, body: &[u8]) -> HttpResponse {
    match state.store.register_json(body).await {
        Ok(record) => {
            info!("Registered {}/{} at {}", record.role, record.place, record.ip);
            state
                .metrics
                .registrations_total
                .with_label_values(&["ok"])
                .inc();
            state
                .metrics
                .registered_servers
                .set(state.store.server_count().await as i64);
            ok_response()
        }
        Err(e) => {
            warn!("Rejected registration: {}", e);
            state
                .metrics
                .registrations_total
                .with_label_values(&["rejected"])
                .inc();
            // Existing agents expect 500 for any rejected registration
            text_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{}\n", e))
        }
    }
}
