//! 仓储与服务端口的内存mock实现

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use kumo_core::{
    EnvironmentRepository, ExecutionRepository, ExecutionStatsUpdate, GlobalVariable, Project,
    ProjectRepository, PythonEnvironment, SchedulerError, SchedulerHandle, SchedulerResult,
    SecretCipher, SystemRepository, Task, TaskExecution, TaskRepository, TaskStatus,
};

/// TaskRepository的内存mock
#[derive(Debug, Clone, Default)]
pub struct MockTaskRepository {
    tasks: Arc<Mutex<HashMap<i64, Task>>>,
}

impl MockTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        let map = tasks.into_iter().map(|t| (t.id, t)).collect();
        Self {
            tasks: Arc::new(Mutex::new(map)),
        }
    }

    pub fn insert(&self, task: Task) {
        self.tasks.lock().unwrap().insert(task.id, task);
    }

    pub fn get_sync(&self, id: i64) -> Option<Task> {
        self.tasks.lock().unwrap().get(&id).cloned()
    }
}

#[async_trait]
impl TaskRepository for MockTaskRepository {
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Task>> {
        Ok(self.tasks.lock().unwrap().get(&id).cloned())
    }

    async fn get_active_tasks(&self) -> SchedulerResult<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .tasks
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.status == TaskStatus::Active)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.id);
        Ok(tasks)
    }

    async fn update(&self, task: &Task) -> SchedulerResult<()> {
        self.tasks.lock().unwrap().insert(task.id, task.clone());
        Ok(())
    }
}

/// ExecutionRepository的内存mock，额外暴露批量峰值写入的检视接口
#[derive(Debug, Clone, Default)]
pub struct MockExecutionRepository {
    executions: Arc<Mutex<HashMap<i64, TaskExecution>>>,
    next_id: Arc<Mutex<i64>>,
    stats_updates: Arc<Mutex<Vec<ExecutionStatsUpdate>>>,
}

impl MockExecutionRepository {
    pub fn new() -> Self {
        Self {
            executions: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(Mutex::new(1)),
            stats_updates: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn get_sync(&self, id: i64) -> Option<TaskExecution> {
        self.executions.lock().unwrap().get(&id).cloned()
    }

    /// 按task_id取全部执行，按attempt排序
    pub fn executions_for_task(&self, task_id: i64) -> Vec<TaskExecution> {
        let mut list: Vec<TaskExecution> = self
            .executions
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.task_id == task_id)
            .cloned()
            .collect();
        list.sort_by_key(|e| (e.attempt, e.id));
        list
    }

    pub fn count(&self) -> usize {
        self.executions.lock().unwrap().len()
    }

    /// 历史上收到的所有批量峰值写入条目
    pub fn stats_updates(&self) -> Vec<ExecutionStatsUpdate> {
        self.stats_updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExecutionRepository for MockExecutionRepository {
    async fn create(&self, execution: &TaskExecution) -> SchedulerResult<TaskExecution> {
        let mut next_id = self.next_id.lock().unwrap();
        let mut created = execution.clone();
        created.id = *next_id;
        *next_id += 1;
        self.executions
            .lock()
            .unwrap()
            .insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<TaskExecution>> {
        Ok(self.executions.lock().unwrap().get(&id).cloned())
    }

    async fn update(&self, execution: &TaskExecution) -> SchedulerResult<()> {
        self.executions
            .lock()
            .unwrap()
            .insert(execution.id, execution.clone());
        Ok(())
    }

    async fn batch_update_stats(&self, updates: &[ExecutionStatsUpdate]) -> SchedulerResult<()> {
        let mut executions = self.executions.lock().unwrap();
        for update in updates {
            if let Some(execution) = executions.get_mut(&update.execution_id) {
                execution.max_cpu_percent = Some(update.max_cpu_percent);
                execution.max_memory_mb = Some(update.max_memory_mb);
            }
        }
        self.stats_updates.lock().unwrap().extend_from_slice(updates);
        Ok(())
    }
}

/// ProjectRepository的内存mock
#[derive(Debug, Clone, Default)]
pub struct MockProjectRepository {
    projects: Arc<Mutex<HashMap<i64, Project>>>,
}

impl MockProjectRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_projects(projects: Vec<Project>) -> Self {
        let map = projects.into_iter().map(|p| (p.id, p)).collect();
        Self {
            projects: Arc::new(Mutex::new(map)),
        }
    }
}

#[async_trait]
impl ProjectRepository for MockProjectRepository {
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Project>> {
        Ok(self.projects.lock().unwrap().get(&id).cloned())
    }
}

/// EnvironmentRepository的内存mock
#[derive(Debug, Clone, Default)]
pub struct MockEnvironmentRepository {
    environments: Arc<Mutex<HashMap<i64, PythonEnvironment>>>,
}

impl MockEnvironmentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, environment: PythonEnvironment) {
        self.environments
            .lock()
            .unwrap()
            .insert(environment.id, environment);
    }
}

#[async_trait]
impl EnvironmentRepository for MockEnvironmentRepository {
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<PythonEnvironment>> {
        Ok(self.environments.lock().unwrap().get(&id).cloned())
    }
}

/// SystemRepository的内存mock：全局变量与键值配置
#[derive(Debug, Clone, Default)]
pub struct MockSystemRepository {
    env_vars: Arc<Mutex<Vec<GlobalVariable>>>,
    configs: Arc<Mutex<HashMap<String, String>>>,
}

impl MockSystemRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_env_var(&self, key: &str, value: &str, is_secret: bool) {
        self.env_vars.lock().unwrap().push(GlobalVariable {
            key: key.to_string(),
            value: value.to_string(),
            is_secret,
        });
    }

    pub fn set_config(&self, key: &str, value: &str) {
        self.configs
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }
}

#[async_trait]
impl SystemRepository for MockSystemRepository {
    async fn get_env_vars(&self) -> SchedulerResult<Vec<GlobalVariable>> {
        Ok(self.env_vars.lock().unwrap().clone())
    }

    async fn get_config(&self, key: &str) -> SchedulerResult<Option<String>> {
        Ok(self.configs.lock().unwrap().get(key).cloned())
    }
}

/// 前缀密文mock：密文须以"enc:"开头，否则解密报错
///
/// 用于验证执行器对解密失败的非致命降级路径。
#[derive(Debug, Default, Clone)]
pub struct PrefixCipher;

impl SecretCipher for PrefixCipher {
    fn decrypt(&self, ciphertext: &str) -> SchedulerResult<String> {
        ciphertext
            .strip_prefix("enc:")
            .map(|s| s.to_string())
            .ok_or_else(|| SchedulerError::Secret("密文缺少enc:前缀".to_string()))
    }
}

/// 记录型执行服务mock：捕获调度器的触发调用，不真正跑进程
#[derive(Debug, Clone, Default)]
pub struct RecordingExecutionService {
    runs: Arc<Mutex<Vec<(i64, i32, Option<i64>)>>>,
    run_duration_ms: u64,
}

impl RecordingExecutionService {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每次run调用模拟执行耗时，用于验证分发池限流
    pub fn with_run_duration_ms(mut self, millis: u64) -> Self {
        self.run_duration_ms = millis;
        self
    }

    /// (task_id, attempt, execution_id)
    pub fn runs(&self) -> Vec<(i64, i32, Option<i64>)> {
        self.runs.lock().unwrap().clone()
    }

    pub fn run_count(&self) -> usize {
        self.runs.lock().unwrap().len()
    }
}

#[async_trait]
impl kumo_core::TaskExecutionService for RecordingExecutionService {
    async fn run(&self, task_id: i64, attempt: i32, execution_id: Option<i64>) {
        self.runs
            .lock()
            .unwrap()
            .push((task_id, attempt, execution_id));
        if self.run_duration_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.run_duration_ms)).await;
        }
    }

    async fn stop_execution(&self, _execution_id: i64) -> bool {
        false
    }
}

/// 记录型调度器句柄mock：捕获重试登记与熔断摘除调用
#[derive(Debug, Clone, Default)]
pub struct RecordingSchedulerHandle {
    retries: Arc<Mutex<Vec<(i64, i64, i32, DateTime<Utc>)>>>,
    unscheduled: Arc<Mutex<Vec<i64>>>,
}

impl RecordingSchedulerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// (task_id, execution_id, attempt, run_at)
    pub fn retries(&self) -> Vec<(i64, i64, i32, DateTime<Utc>)> {
        self.retries.lock().unwrap().clone()
    }

    pub fn unscheduled(&self) -> Vec<i64> {
        self.unscheduled.lock().unwrap().clone()
    }
}

#[async_trait]
impl SchedulerHandle for RecordingSchedulerHandle {
    async fn schedule_retry(
        &self,
        task_id: i64,
        execution_id: i64,
        attempt: i32,
        run_at: DateTime<Utc>,
    ) -> SchedulerResult<()> {
        self.retries
            .lock()
            .unwrap()
            .push((task_id, execution_id, attempt, run_at));
        Ok(())
    }

    async fn unschedule(&self, task_id: i64) {
        self.unscheduled.lock().unwrap().push(task_id);
    }
}
