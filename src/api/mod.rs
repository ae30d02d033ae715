pub mod balances;
pub mod health;
pub mod tasks;

use crate::db::Repository;
use crate::orchestration::TaskService;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub tasks: TaskService,
}

impl AppState {
    pub fn new(repo: Arc<Repository>, tasks: TaskService) -> Self {
        Self { repo, tasks }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/v1/balances/:token/:owner", get(balances::get_balance))
        .route("/v1/admin/tasks", get(tasks::list_tasks))
        .route("/v1/admin/tasks/reduce", post(tasks::create_reduce_task))
        .route(
            "/v1/admin/tasks/deduplicate",
            post(tasks::create_deduplicate_task),
        )
        .route("/v1/admin/tasks/cleanup", post(tasks::create_cleanup_task))
        .layer(cors)
        .with_state(state)
}
