//! 调度器集成测试：job登记表语义与触发分发行为

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kumo_core::{ExecutionStatus, SchedulerHandle, TaskStatus};
use kumo_dispatcher::{TaskController, TaskScheduler};
use kumo_testing_utils::{
    MockExecutionRepository, MockTaskRepository, RecordingExecutionService, TaskBuilder,
};

fn scheduler_with(
    task_repo: Arc<MockTaskRepository>,
) -> (Arc<TaskScheduler>, Arc<RecordingExecutionService>) {
    let executor = Arc::new(RecordingExecutionService::new());
    let scheduler = Arc::new(TaskScheduler::new(executor.clone(), task_repo, 20));
    (scheduler, executor)
}

#[tokio::test]
async fn test_add_job_is_idempotent() {
    let repo = Arc::new(MockTaskRepository::new());
    let (scheduler, _) = scheduler_with(repo);
    let task = TaskBuilder::new()
        .with_id(1)
        .with_trigger("interval", r#"{"unit": "hours", "value": 1}"#)
        .build();

    scheduler.add_job(&task).unwrap();
    scheduler.add_job(&task).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(scheduler.job_count(), 1);
    assert!(scheduler.next_run_time(1).is_some());
    scheduler.shutdown();
}

#[tokio::test]
async fn test_paused_task_is_not_registered() {
    let repo = Arc::new(MockTaskRepository::new());
    let (scheduler, _) = scheduler_with(repo);
    let task = TaskBuilder::new()
        .with_id(2)
        .with_trigger("interval", r#"{"unit": "hours", "value": 1}"#)
        .paused()
        .build();

    scheduler.add_job(&task).unwrap();

    assert_eq!(scheduler.job_count(), 0);
    assert!(scheduler.next_run_time(2).is_none());
}

#[tokio::test]
async fn test_immediate_trigger_is_not_registered() {
    let repo = Arc::new(MockTaskRepository::new());
    let (scheduler, _) = scheduler_with(repo);
    let task = TaskBuilder::new()
        .with_id(3)
        .with_trigger("immediate", "")
        .build();

    scheduler.add_job(&task).unwrap();

    assert_eq!(scheduler.job_count(), 0);
}

#[tokio::test]
async fn test_invalid_trigger_is_rejected_and_not_registered() {
    let repo = Arc::new(MockTaskRepository::new());
    let (scheduler, _) = scheduler_with(repo);
    let task = TaskBuilder::new()
        .with_id(4)
        .with_trigger("interval", "not json")
        .build();

    assert!(scheduler.add_job(&task).is_err());
    assert_eq!(scheduler.job_count(), 0);
}

#[tokio::test]
async fn test_interval_job_fires_repeatedly() {
    let repo = Arc::new(MockTaskRepository::new());
    let (scheduler, executor) = scheduler_with(repo);
    let task = TaskBuilder::new()
        .with_id(5)
        .with_trigger("interval", r#"{"unit": "seconds", "value": 1}"#)
        .build();

    scheduler.add_job(&task).unwrap();
    tokio::time::sleep(Duration::from_millis(2500)).await;
    scheduler.shutdown();

    let runs = executor.runs();
    assert!(runs.len() >= 2, "expected at least 2 fires, got {runs:?}");
    assert!(runs.iter().all(|r| *r == (5, 1, None)));
}

#[tokio::test]
async fn test_removed_job_stops_firing() {
    let repo = Arc::new(MockTaskRepository::new());
    let (scheduler, executor) = scheduler_with(repo);
    let task = TaskBuilder::new()
        .with_id(6)
        .with_trigger("interval", r#"{"unit": "seconds", "value": 1}"#)
        .build();

    scheduler.add_job(&task).unwrap();
    scheduler.remove_job(6);
    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert_eq!(executor.run_count(), 0);
    assert!(scheduler.next_run_time(6).is_none());
}

#[tokio::test]
async fn test_expired_date_trigger_fires_exactly_once() {
    let repo = Arc::new(MockTaskRepository::new());
    let (scheduler, executor) = scheduler_with(repo);
    let task = TaskBuilder::new()
        .with_id(7)
        .with_trigger("date", "2020-01-01T00:00:00Z")
        .build();

    scheduler.add_job(&task).unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    scheduler.shutdown();

    assert_eq!(executor.runs(), vec![(7, 1, None)]);
}

#[tokio::test]
async fn test_pause_and_resume_job() {
    let repo = Arc::new(MockTaskRepository::new());
    let (scheduler, _) = scheduler_with(repo);
    let task = TaskBuilder::new()
        .with_id(8)
        .with_trigger("interval", r#"{"unit": "hours", "value": 1}"#)
        .build();

    scheduler.add_job(&task).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(scheduler.next_run_time(8).is_some());

    scheduler.pause_job(8);
    assert!(scheduler.next_run_time(8).is_none());
    assert_eq!(scheduler.job_count(), 1);

    scheduler.resume_job(8);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(scheduler.next_run_time(8).is_some());
    scheduler.shutdown();
}

#[tokio::test]
async fn test_scheduled_retry_fires_with_attempt_number() {
    let repo = Arc::new(MockTaskRepository::new());
    let (scheduler, executor) = scheduler_with(repo);

    scheduler
        .schedule_retry(9, 101, 2, Utc::now())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(executor.runs(), vec![(9, 2, None)]);
    // 重试job触发后自清理
    assert_eq!(scheduler.retry_job_count(), 0);
}

#[tokio::test]
async fn test_load_jobs_skips_broken_tasks() {
    let tasks = vec![
        TaskBuilder::new()
            .with_id(1)
            .with_trigger("interval", r#"{"unit": "minutes", "value": 30}"#)
            .build(),
        TaskBuilder::new()
            .with_id(2)
            .with_trigger("cron", "0 3 * * *")
            .build(),
        TaskBuilder::new()
            .with_id(3)
            .with_trigger("interval", "broken")
            .build(),
    ];
    let repo = Arc::new(MockTaskRepository::with_tasks(tasks));
    let (scheduler, _) = scheduler_with(repo);

    let registered = scheduler.load_jobs().await.unwrap();

    assert_eq!(registered, 2);
    assert_eq!(scheduler.job_count(), 2);
    scheduler.shutdown();
}

#[tokio::test]
async fn test_controller_run_now_reuses_pending_execution() {
    let task = TaskBuilder::new()
        .with_id(11)
        .with_trigger("immediate", "")
        .build();
    let task_repo = Arc::new(MockTaskRepository::with_tasks(vec![task]));
    let execution_repo = Arc::new(MockExecutionRepository::new());
    let executor = Arc::new(RecordingExecutionService::new());
    let scheduler = Arc::new(TaskScheduler::new(
        executor.clone(),
        task_repo.clone(),
        20,
    ));
    let controller = TaskController::new(
        task_repo,
        execution_repo.clone(),
        scheduler,
        executor.clone(),
    );

    let execution_id = controller.run_task_now(11).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let row = execution_repo.get_sync(execution_id).unwrap();
    assert_eq!(row.status, ExecutionStatus::Pending);
    assert_eq!(executor.runs(), vec![(11, 1, Some(execution_id))]);
}

#[tokio::test]
async fn test_controller_run_now_unknown_task() {
    let task_repo = Arc::new(MockTaskRepository::new());
    let execution_repo = Arc::new(MockExecutionRepository::new());
    let executor = Arc::new(RecordingExecutionService::new());
    let scheduler = Arc::new(TaskScheduler::new(
        executor.clone(),
        task_repo.clone(),
        20,
    ));
    let controller = TaskController::new(task_repo, execution_repo.clone(), scheduler, executor);

    assert!(controller.run_task_now(404).await.is_err());
    assert_eq!(execution_repo.count(), 0);
}

#[tokio::test]
async fn test_controller_pause_persists_status() {
    let task = TaskBuilder::new()
        .with_id(12)
        .with_trigger("interval", r#"{"unit": "hours", "value": 1}"#)
        .build();
    let task_repo = Arc::new(MockTaskRepository::with_tasks(vec![task.clone()]));
    let execution_repo = Arc::new(MockExecutionRepository::new());
    let executor = Arc::new(RecordingExecutionService::new());
    let scheduler = Arc::new(TaskScheduler::new(
        executor.clone(),
        task_repo.clone(),
        20,
    ));
    let controller =
        TaskController::new(task_repo.clone(), execution_repo, scheduler.clone(), executor);

    controller.schedule_task(&task).unwrap();
    controller.pause_task(12).await.unwrap();

    assert_eq!(task_repo.get_sync(12).unwrap().status, TaskStatus::Paused);
    assert!(controller.next_run_time(12).is_none());

    controller.resume_task(12).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(task_repo.get_sync(12).unwrap().status, TaskStatus::Active);
    assert!(controller.next_run_time(12).is_some());
    scheduler.shutdown();
}
