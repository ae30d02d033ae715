use async_trait::async_trait;
use futures::stream::BoxStream;

use super::TaskError;

/// A long-running administrative job over an opaque scope parameter.
///
/// `run_long_task` yields resumable cursors. The runner persists each one, so
/// a restarted task resumes from the last yielded cursor.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn task_type(&self) -> &'static str;

    /// Whether a task with `param` may start now. Overlapping scopes must
    /// not run side by side.
    async fn is_able_to_run(&self, param: &str) -> Result<bool, TaskError>;

    fn run_long_task(
        &self,
        from: Option<String>,
        param: String,
    ) -> BoxStream<'_, Result<String, TaskError>>;
}
