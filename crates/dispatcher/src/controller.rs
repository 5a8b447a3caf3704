//! 任务控制门面
//!
//! 对上层（CRUD接口、命令行）暴露的调度控制面：登记、摘除、
//! 暂停、恢复、立即执行与终止执行。状态变更先落库再操作job
//! 注册表，保证重启后恢复的job与库里状态一致。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use kumo_core::{
    ExecutionRepository, SchedulerError, SchedulerResult, Task, TaskExecution,
    TaskExecutionService, TaskRepository, TaskStatus,
};
use tracing::info;

use crate::scheduler::TaskScheduler;

pub struct TaskController {
    task_repo: Arc<dyn TaskRepository>,
    execution_repo: Arc<dyn ExecutionRepository>,
    scheduler: Arc<TaskScheduler>,
    executor: Arc<dyn TaskExecutionService>,
}

impl TaskController {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        execution_repo: Arc<dyn ExecutionRepository>,
        scheduler: Arc<TaskScheduler>,
        executor: Arc<dyn TaskExecutionService>,
    ) -> Self {
        Self {
            task_repo,
            execution_repo,
            scheduler,
            executor,
        }
    }

    /// 按任务当前配置登记job，已有job会被替换
    pub fn schedule_task(&self, task: &Task) -> SchedulerResult<()> {
        self.scheduler.add_job(task)
    }

    pub fn unschedule_task(&self, task_id: i64) {
        self.scheduler.remove_job(task_id);
    }

    /// 暂停任务：状态落库为paused并中止触发循环
    pub async fn pause_task(&self, task_id: i64) -> SchedulerResult<()> {
        let mut task = self.require_task(task_id).await?;
        task.status = TaskStatus::Paused;
        self.task_repo.update(&task).await?;
        self.scheduler.pause_job(task_id);
        info!(task_id, "任务已暂停");
        Ok(())
    }

    /// 恢复任务：状态落库为active并按最新触发器配置重新登记job。
    /// 熔断暂停的任务也由此恢复，连续失败计数在下次成功时清零。
    pub async fn resume_task(&self, task_id: i64) -> SchedulerResult<()> {
        let mut task = self.require_task(task_id).await?;
        task.status = TaskStatus::Active;
        self.task_repo.update(&task).await?;
        self.scheduler.add_job(&task)?;
        info!(task_id, "任务已恢复");
        Ok(())
    }

    pub fn next_run_time(&self, task_id: i64) -> Option<DateTime<Utc>> {
        self.scheduler.next_run_time(task_id)
    }

    /// 立即执行一次，不影响周期job。
    ///
    /// 先创建pending执行记录再异步起跑，调用方拿到执行id后可以
    /// 马上轮询状态或发起终止。
    pub async fn run_task_now(&self, task_id: i64) -> SchedulerResult<i64> {
        let task = self.require_task(task_id).await?;
        let pending = TaskExecution::new_pending(task.id, 1);
        let created = self.execution_repo.create(&pending).await?;
        let executor = Arc::clone(&self.executor);
        let execution_id = created.id;
        tokio::spawn(async move {
            executor.run(task_id, 1, Some(execution_id)).await;
        });
        info!(task_id, execution_id, "手动执行已触发");
        Ok(execution_id)
    }

    /// 终止一次正在运行的执行；执行不存在或已结束返回false
    pub async fn stop_execution(&self, execution_id: i64) -> bool {
        self.executor.stop_execution(execution_id).await
    }

    async fn require_task(&self, task_id: i64) -> SchedulerResult<Task> {
        self.task_repo
            .get_by_id(task_id)
            .await?
            .ok_or(SchedulerError::TaskNotFound { id: task_id })
    }
}
