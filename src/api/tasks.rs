use crate::api::AppState;
use crate::domain::Address;
use crate::error::AppError;
use crate::orchestration::Task;
use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskListQuery {
    #[serde(rename = "type")]
    pub task_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReduceTaskRequest {
    pub token: Option<String>,
    pub owner: Option<String>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeduplicateTaskRequest {
    #[serde(default)]
    pub update: bool,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupTaskRequest {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDto {
    pub id: String,
    pub task_type: String,
    pub param: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    pub running: bool,
    pub last_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<Task> for TaskDto {
    fn from(task: Task) -> Self {
        Self {
            id: task.id.to_string(),
            task_type: task.task_type,
            param: task.param,
            state: task.state,
            running: task.running,
            last_status: task.last_status.to_string(),
            last_error: task.last_error,
            created_at: task.created_at.as_i64(),
            updated_at: task.updated_at.as_i64(),
        }
    }
}

fn optional_address(raw: Option<String>) -> Option<Address> {
    raw.filter(|s| !s.trim().is_empty()).map(Address::new)
}

pub async fn list_tasks(
    Query(params): Query<TaskListQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<TaskDto>>, AppError> {
    let tasks = state.tasks.list_tasks(params.task_type.as_deref()).await?;
    Ok(Json(tasks.into_iter().map(TaskDto::from).collect()))
}

pub async fn create_reduce_task(
    State(state): State<AppState>,
    Json(request): Json<ReduceTaskRequest>,
) -> Result<Json<TaskDto>, AppError> {
    let task = state
        .tasks
        .create_reduce_task(
            optional_address(request.token),
            optional_address(request.owner),
            request.force,
        )
        .await?;
    Ok(Json(task.into()))
}

pub async fn create_deduplicate_task(
    State(state): State<AppState>,
    Json(request): Json<DeduplicateTaskRequest>,
) -> Result<Json<TaskDto>, AppError> {
    let task = state
        .tasks
        .create_deduplicate_task(request.update, request.force)
        .await?;
    Ok(Json(task.into()))
}

pub async fn create_cleanup_task(
    State(state): State<AppState>,
    Json(request): Json<CleanupTaskRequest>,
) -> Result<Json<TaskDto>, AppError> {
    let task = state.tasks.create_cleanup_task(request.force).await?;
    Ok(Json(task.into()))
}
