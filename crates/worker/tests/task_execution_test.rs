//! 执行器端到端测试：用真实子进程覆盖完整的执行状态机

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kumo_core::config::ExecutorConfig;
use kumo_core::{
    ExecutionRepository, ExecutionStatus, PythonEnvironment, Task, TaskExecution,
    TaskExecutionService, TaskStatus,
};
use kumo_testing_utils::{
    MockEnvironmentRepository, MockExecutionRepository, MockProjectRepository,
    MockSystemRepository, MockTaskRepository, PrefixCipher, ProjectBuilder,
    RecordingSchedulerHandle, TaskBuilder,
};
use kumo_worker::{ConcurrencyGate, ExecutorPorts, ProcessSupervisor, TaskExecutor};

struct Fixture {
    executor: Arc<TaskExecutor>,
    supervisor: Arc<ProcessSupervisor>,
    task_repo: MockTaskRepository,
    execution_repo: MockExecutionRepository,
    environment_repo: MockEnvironmentRepository,
    system_repo: MockSystemRepository,
    scheduler: Arc<RecordingSchedulerHandle>,
    _log_dir: tempfile::TempDir,
}

fn fixture(tasks: Vec<Task>) -> Fixture {
    let log_dir = tempfile::tempdir().unwrap();
    let config = ExecutorConfig {
        task_log_dir: log_dir.path().to_string_lossy().into_owned(),
        termination_grace_seconds: 1,
        python_fallback: "/bin/echo".to_string(),
        ..ExecutorConfig::default()
    };

    let task_repo = MockTaskRepository::with_tasks(tasks);
    let execution_repo = MockExecutionRepository::new();
    let project_repo = MockProjectRepository::with_projects(vec![ProjectBuilder::new().build()]);
    let environment_repo = MockEnvironmentRepository::new();
    let system_repo = MockSystemRepository::new();
    let scheduler = Arc::new(RecordingSchedulerHandle::new());

    let supervisor = Arc::new(ProcessSupervisor::new(&config));
    let executor = Arc::new(TaskExecutor::new(
        config.clone(),
        Arc::new(ConcurrencyGate::new(config.max_concurrent_tasks)),
        supervisor.clone(),
        ExecutorPorts {
            task_repo: Arc::new(task_repo.clone()),
            execution_repo: Arc::new(execution_repo.clone()),
            project_repo: Arc::new(project_repo),
            environment_repo: Arc::new(environment_repo.clone()),
            system_repo: Arc::new(system_repo.clone()),
            cipher: Arc::new(PrefixCipher),
        },
    ));
    executor.bind_scheduler(scheduler.clone());

    Fixture {
        executor,
        supervisor,
        task_repo,
        execution_repo,
        environment_repo,
        system_repo,
        scheduler,
        _log_dir: log_dir,
    }
}

#[tokio::test]
async fn test_successful_execution_records_output() {
    let task = TaskBuilder::new()
        .with_id(1)
        .with_command("sh -c 'echo hello world'")
        .build();
    let fx = fixture(vec![task]);

    fx.executor.run(1, 1, None).await;

    let rows = fx.execution_repo.executions_for_task(1);
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.status, ExecutionStatus::Success);
    assert_eq!(row.attempt, 1);
    assert!(row.duration.is_some());
    assert!(row.output.as_deref().unwrap().contains("hello world"));
    assert!(row
        .log_file
        .as_deref()
        .unwrap()
        .ends_with(&TaskExecution::log_file_name(1, row.id)));
    assert!(fx.scheduler.retries().is_empty());
}

#[tokio::test]
async fn test_failure_increments_consecutive_failures() {
    let task = TaskBuilder::new()
        .with_id(2)
        .with_command("sh -c 'exit 3'")
        .with_failure_threshold(3)
        .build();
    let fx = fixture(vec![task]);

    fx.executor.run(2, 1, None).await;

    let rows = fx.execution_repo.executions_for_task(2);
    assert_eq!(rows[0].status, ExecutionStatus::Failed);

    let task = fx.task_repo.get_sync(2).unwrap();
    assert_eq!(task.consecutive_failures, 1);
    assert_eq!(task.status, TaskStatus::Active);
    // retry_count为0，失败后不登记重试
    assert!(fx.scheduler.retries().is_empty());
    assert!(fx.scheduler.unscheduled().is_empty());
}

#[tokio::test]
async fn test_circuit_breaker_pauses_task_at_threshold() {
    let task = TaskBuilder::new()
        .with_id(3)
        .with_command("sh -c 'exit 1'")
        .with_failure_threshold(1)
        .build();
    let fx = fixture(vec![task]);

    fx.executor.run(3, 1, None).await;

    let task = fx.task_repo.get_sync(3).unwrap();
    assert_eq!(task.consecutive_failures, 1);
    assert_eq!(task.status, TaskStatus::Paused);
    assert_eq!(fx.scheduler.unscheduled(), vec![3]);
}

#[tokio::test]
async fn test_success_resets_consecutive_failures() {
    let mut task = TaskBuilder::new()
        .with_id(4)
        .with_command("sh -c 'exit 0'")
        .build();
    task.consecutive_failures = 2;
    let fx = fixture(vec![task]);

    fx.executor.run(4, 1, None).await;

    assert_eq!(fx.task_repo.get_sync(4).unwrap().consecutive_failures, 0);
}

#[tokio::test]
async fn test_timeout_terminates_process_group() {
    let task = TaskBuilder::new()
        .with_id(5)
        .with_command("sh -c 'sleep 30'")
        .with_timeout(1)
        .build();
    let fx = fixture(vec![task]);

    fx.executor.run(5, 1, None).await;

    let rows = fx.execution_repo.executions_for_task(5);
    let row = &rows[0];
    assert_eq!(row.status, ExecutionStatus::Timeout);
    assert!(row.output.as_deref().unwrap().ends_with("[Timeout after 1s]"));
    // 超时应在限额附近结束，而不是等满sleep时长
    assert!(row.duration.unwrap() < 10.0);
    assert!(fx.supervisor.registered_ids().is_empty());
}

#[tokio::test]
async fn test_failed_attempt_schedules_retry() {
    let task = TaskBuilder::new()
        .with_id(6)
        .with_command("sh -c 'exit 1'")
        .with_retry(1, 1)
        .build();
    let fx = fixture(vec![task]);

    let before = Utc::now();
    fx.executor.run(6, 1, None).await;

    let rows = fx.execution_repo.executions_for_task(6);
    assert_eq!(rows[0].status, ExecutionStatus::Failed);

    let retries = fx.scheduler.retries();
    assert_eq!(retries.len(), 1);
    let (task_id, execution_id, attempt, run_at) = retries[0];
    assert_eq!(task_id, 6);
    assert_eq!(execution_id, rows[0].id);
    assert_eq!(attempt, 2);
    assert!(run_at >= before + chrono::Duration::seconds(1));
}

#[tokio::test]
async fn test_final_attempt_does_not_schedule_retry() {
    let task = TaskBuilder::new()
        .with_id(7)
        .with_command("sh -c 'exit 1'")
        .with_retry(1, 1)
        .build();
    let fx = fixture(vec![task]);

    // attempt 2已是最后一次尝试（retry_count=1）
    fx.executor.run(7, 2, None).await;

    assert!(fx.scheduler.retries().is_empty());
}

#[tokio::test]
async fn test_run_now_reuses_pending_execution_row() {
    let task = TaskBuilder::new()
        .with_id(8)
        .with_command("sh -c 'exit 0'")
        .build();
    let fx = fixture(vec![task]);
    let pending = fx
        .execution_repo
        .create(&TaskExecution::new_pending(8, 1))
        .await
        .unwrap();

    fx.executor.run(8, 1, Some(pending.id)).await;

    // 复用预创建的记录，不产生第二条
    assert_eq!(fx.execution_repo.count(), 1);
    let row = fx.execution_repo.get_sync(pending.id).unwrap();
    assert_eq!(row.status, ExecutionStatus::Success);
}

#[tokio::test]
async fn test_stop_running_execution() {
    let task = TaskBuilder::new()
        .with_id(9)
        .with_command("sh -c 'sleep 30'")
        .build();
    let fx = fixture(vec![task]);

    let executor = fx.executor.clone();
    let handle = tokio::spawn(async move { executor.run(9, 1, None).await });

    // 等进程真正跑起来再发终止
    let mut waited = 0;
    while fx.supervisor.registered_ids().is_empty() && waited < 50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        waited += 1;
    }
    let execution_id = fx.supervisor.registered_ids()[0];
    assert!(fx.executor.stop_execution(execution_id).await);

    handle.await.unwrap();

    let row = fx.execution_repo.get_sync(execution_id).unwrap();
    assert_eq!(row.status, ExecutionStatus::Stopped);
    assert!(row
        .output
        .as_deref()
        .unwrap()
        .ends_with("[System] Execution stopped by user."));
    // 外部终止不计失败，不触发重试
    assert_eq!(fx.task_repo.get_sync(9).unwrap().consecutive_failures, 0);
    assert!(fx.scheduler.retries().is_empty());
}

#[tokio::test]
async fn test_stop_unknown_execution_returns_false() {
    let fx = fixture(vec![]);
    assert!(!fx.executor.stop_execution(404).await);
}

#[tokio::test]
async fn test_secret_decrypt_failure_skips_variable() {
    let task = TaskBuilder::new()
        .with_id(10)
        .with_command("sh -c 'test \"$GOOD\" = ok && test -z \"$BAD\"'")
        .build();
    let fx = fixture(vec![task]);
    fx.system_repo.add_env_var("GOOD", "enc:ok", true);
    // 缺enc:前缀，解密失败后该变量不注入
    fx.system_repo.add_env_var("BAD", "oops", true);

    fx.executor.run(10, 1, None).await;

    let rows = fx.execution_repo.executions_for_task(10);
    assert_eq!(rows[0].status, ExecutionStatus::Success);
}

#[tokio::test]
async fn test_proxy_vars_injected_when_enabled() {
    let task = TaskBuilder::new()
        .with_id(11)
        .with_command("sh -c 'test \"$http_proxy\" = http://proxy:8080 && test \"$HTTPS_PROXY\" = http://proxy:8080'")
        .build();
    let fx = fixture(vec![task]);
    fx.system_repo.set_config("proxy.enabled", "true");
    fx.system_repo.set_config("proxy.url", "http://proxy:8080");

    fx.executor.run(11, 1, None).await;

    let rows = fx.execution_repo.executions_for_task(11);
    assert_eq!(rows[0].status, ExecutionStatus::Success);
}

#[tokio::test]
async fn test_interpreter_falls_back_when_path_missing() {
    let task = TaskBuilder::new()
        .with_id(12)
        .with_command("python run.py")
        .with_env_id(7)
        .build();
    let fx = fixture(vec![task]);
    fx.environment_repo.insert(PythonEnvironment {
        id: 7,
        path: "/nonexistent/venv/bin/python".to_string(),
    });

    // fallback配置为/bin/echo，python token被替换后直接成功
    fx.executor.run(12, 1, None).await;

    let rows = fx.execution_repo.executions_for_task(12);
    assert_eq!(rows[0].status, ExecutionStatus::Success);
    assert!(rows[0].output.as_deref().unwrap().contains("run.py"));
}

#[tokio::test]
async fn test_missing_project_marks_execution_failed() {
    let task = TaskBuilder::new()
        .with_id(13)
        .with_project_id(999)
        .build();
    let fx = fixture(vec![task]);

    fx.executor.run(13, 1, None).await;

    let rows = fx.execution_repo.executions_for_task(13);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, ExecutionStatus::Failed);
    assert!(rows[0].output.is_some());
}

#[tokio::test]
async fn test_spawn_failure_marks_execution_failed() {
    let task = TaskBuilder::new()
        .with_id(14)
        .with_command("/nonexistent/binary --flag")
        .build();
    let fx = fixture(vec![task]);

    fx.executor.run(14, 1, None).await;

    let rows = fx.execution_repo.executions_for_task(14);
    assert_eq!(rows[0].status, ExecutionStatus::Failed);
    assert!(rows[0].output.is_some());
    assert!(fx.supervisor.registered_ids().is_empty());
}

#[tokio::test]
async fn test_unknown_task_is_skipped_without_rows() {
    let fx = fixture(vec![]);
    fx.executor.run(404, 1, None).await;
    assert_eq!(fx.execution_repo.count(), 0);
}
