//! deployd-api — REST API for deployd.
//!
//! The inbound boundary of the control plane: controlling parties submit
//! fragment requests here and poll the tracker for convergence.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/fragments` | Enqueue a fragment request |
//! | GET | `/api/v1/fragments` | Queue length and recent outcomes |
//! | GET | `/api/v1/resources` | Tracked resources (`?app_instance_id=`) |
//! | GET | `/api/v1/apps/{app_instance_id}/status` | Convergence summary |
//! | DELETE | `/api/v1/resources/{app_instance_id}/{service_id}/{uid}` | Stop tracking a resource |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get};
use deployd_executor::FragmentExecutor;
use deployd_monitor::ResourceStatusTracker;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub executor: Arc<FragmentExecutor>,
    pub tracker: ResourceStatusTracker,
}

/// Build the API router.
pub fn build_router(executor: Arc<FragmentExecutor>, tracker: ResourceStatusTracker) -> Router {
    let state = ApiState { executor, tracker };

    let api_routes = Router::new()
        .route("/fragments", get(handlers::list_fragments).post(handlers::submit_fragment))
        .route("/resources", get(handlers::list_resources))
        .route(
            "/resources/{app_instance_id}/{service_id}/{uid}",
            delete(handlers::remove_resource),
        )
        .route("/apps/{app_instance_id}/status", get(handlers::app_status))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}
