use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::SchedulerResult;

/// 任务执行入口：调度器触发回调与手动run-now都经由该端口
///
/// 单次执行内部的失败不得向调用方传播，实现方自行落库并记日志，
/// 保证一个任务的异常不会影响调度时钟或其他任务。
#[async_trait]
pub trait TaskExecutionService: Send + Sync {
    /// 执行一次任务尝试
    ///
    /// `execution_id`为Some时复用预创建的执行记录（run-now场景），
    /// 否则由执行器自行创建Running记录。
    async fn run(&self, task_id: i64, attempt: i32, execution_id: Option<i64>);

    /// 终止一次正在运行的执行，目标是整个进程组
    ///
    /// 执行不存在或已结束时返回false且不产生任何副作用。
    async fn stop_execution(&self, execution_id: i64) -> bool;
}

/// 执行器回连调度器的句柄：重试登记与熔断摘除
#[async_trait]
pub trait SchedulerHandle: Send + Sync {
    /// 以date触发机制登记一次一次性重试，job键含执行id避免互相覆盖
    async fn schedule_retry(
        &self,
        task_id: i64,
        execution_id: i64,
        attempt: i32,
        run_at: DateTime<Utc>,
    ) -> SchedulerResult<()>;

    /// 摘除任务的在册job，熔断触发后调用；job不存在时为no-op
    async fn unschedule(&self, task_id: i64);
}
