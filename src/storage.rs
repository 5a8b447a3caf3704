//! 独立运行模式的内存存储
//!
//! 单进程部署不依赖外部数据库，任务与执行记录保存在进程内存里，
//! 重启即清空。所有仓储端口都基于同一套RwLock保护的HashMap实现，
//! 支持执行器与监控循环的并发访问。

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use kumo_core::{
    EnvironmentRepository, ExecutionRepository, ExecutionStatsUpdate, GlobalVariable, Project,
    ProjectRepository, PythonEnvironment, SchedulerResult, SystemRepository, Task, TaskExecution,
    TaskRepository,
};

#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<i64, Task>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, task: Task) {
        self.tasks.write().unwrap().insert(task.id, task);
    }

    pub fn len(&self) -> usize {
        self.tasks.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.read().unwrap().is_empty()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskStore {
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Task>> {
        Ok(self.tasks.read().unwrap().get(&id).cloned())
    }

    async fn get_active_tasks(&self) -> SchedulerResult<Vec<Task>> {
        let mut active: Vec<Task> = self
            .tasks
            .read()
            .unwrap()
            .values()
            .filter(|task| task.is_active())
            .cloned()
            .collect();
        active.sort_by_key(|task| task.id);
        Ok(active)
    }

    async fn update(&self, task: &Task) -> SchedulerResult<()> {
        self.tasks.write().unwrap().insert(task.id, task.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryExecutionStore {
    executions: RwLock<HashMap<i64, TaskExecution>>,
    next_id: AtomicI64,
}

impl InMemoryExecutionStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            executions: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        })
    }
}

#[async_trait]
impl ExecutionRepository for InMemoryExecutionStore {
    async fn create(&self, execution: &TaskExecution) -> SchedulerResult<TaskExecution> {
        let mut created = execution.clone();
        created.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.executions
            .write()
            .unwrap()
            .insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<TaskExecution>> {
        Ok(self.executions.read().unwrap().get(&id).cloned())
    }

    async fn update(&self, execution: &TaskExecution) -> SchedulerResult<()> {
        self.executions
            .write()
            .unwrap()
            .insert(execution.id, execution.clone());
        Ok(())
    }

    async fn batch_update_stats(&self, updates: &[ExecutionStatsUpdate]) -> SchedulerResult<()> {
        let mut executions = self.executions.write().unwrap();
        for update in updates {
            if let Some(execution) = executions.get_mut(&update.execution_id) {
                execution.max_cpu_percent = Some(update.max_cpu_percent);
                execution.max_memory_mb = Some(update.max_memory_mb);
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryProjectStore {
    projects: RwLock<HashMap<i64, Project>>,
}

impl InMemoryProjectStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, project: Project) {
        self.projects.write().unwrap().insert(project.id, project);
    }
}

#[async_trait]
impl ProjectRepository for InMemoryProjectStore {
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Project>> {
        Ok(self.projects.read().unwrap().get(&id).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryEnvironmentStore {
    environments: RwLock<HashMap<i64, PythonEnvironment>>,
}

impl InMemoryEnvironmentStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, environment: PythonEnvironment) {
        self.environments
            .write()
            .unwrap()
            .insert(environment.id, environment);
    }
}

#[async_trait]
impl EnvironmentRepository for InMemoryEnvironmentStore {
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<PythonEnvironment>> {
        Ok(self.environments.read().unwrap().get(&id).cloned())
    }
}

#[derive(Default)]
pub struct InMemorySystemStore {
    env_vars: RwLock<Vec<GlobalVariable>>,
    configs: RwLock<HashMap<String, String>>,
}

impl InMemorySystemStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_env_var(&self, variable: GlobalVariable) {
        self.env_vars.write().unwrap().push(variable);
    }

    pub fn set_config(&self, key: &str, value: &str) {
        self.configs
            .write()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }
}

#[async_trait]
impl SystemRepository for InMemorySystemStore {
    async fn get_env_vars(&self) -> SchedulerResult<Vec<GlobalVariable>> {
        Ok(self.env_vars.read().unwrap().clone())
    }

    async fn get_config(&self, key: &str) -> SchedulerResult<Option<String>> {
        Ok(self.configs.read().unwrap().get(key).cloned())
    }
}
