//! Control-path handlers: status endpoint and operator online/offline switches.
//!
//! All three answer 200 with `{"status": "<NodeStatus>"}` in every phase.

use axum::extract::State;
use axum::Json;
use tern_core::StatusBody;
use tracing::info;

use super::AppState;

/// `GET /status`.
pub async fn status_handler(State(state): State<AppState>) -> Json<StatusBody> {
    Json(StatusBody {
        status: state.lifecycle.status(),
    })
}

/// `POST /offline`: stop accepting calls and withdraw registrations.
pub async fn offline_handler(State(state): State<AppState>) -> Json<StatusBody> {
    info!("offline requested");
    Json(StatusBody {
        status: state.lifecycle.go_offline().await,
    })
}

/// `POST /online`: re-register and accept calls again.
pub async fn online_handler(State(state): State<AppState>) -> Json<StatusBody> {
    info!("online requested");
    Json(StatusBody {
        status: state.lifecycle.go_online().await,
    })
}
