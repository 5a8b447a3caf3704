//! 应用装配与生命周期
//!
//! 把配置、存储、并发门、进程监督器、执行器、调度器和资源监控
//! 装配成一个可运行的进程。执行器与调度器互相引用，先各自构造
//! 再通过句柄绑定打通回连。

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use kumo_core::{
    AppConfig, EnvironmentRepository, ExecutionRepository, GlobalVariable, PlainTextCipher,
    Project, ProjectRepository, PythonEnvironment, SystemRepository, Task, TaskRepository,
};
use kumo_dispatcher::{TaskController, TaskScheduler};
use kumo_worker::{ConcurrencyGate, ExecutorPorts, ProcessSupervisor, ResourceMonitor, TaskExecutor};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::info;

use crate::storage::{
    InMemoryEnvironmentStore, InMemoryExecutionStore, InMemoryProjectStore, InMemorySystemStore,
    InMemoryTaskStore,
};

/// 启动时从JSON文件加载的种子数据
#[derive(Debug, Default, Deserialize)]
pub struct SeedData {
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub environments: Vec<PythonEnvironment>,
    #[serde(default)]
    pub env_vars: Vec<GlobalVariable>,
}

impl SeedData {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("读取任务文件失败: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("解析任务文件失败: {}", path.display()))
    }
}

pub struct Application {
    tasks: Arc<InMemoryTaskStore>,
    projects: Arc<InMemoryProjectStore>,
    environments: Arc<InMemoryEnvironmentStore>,
    system: Arc<InMemorySystemStore>,
    supervisor: Arc<ProcessSupervisor>,
    scheduler: Arc<TaskScheduler>,
    controller: TaskController,
    monitor: Mutex<ResourceMonitor>,
}

impl Application {
    pub fn new(config: AppConfig) -> Self {
        let tasks = InMemoryTaskStore::new();
        let executions = InMemoryExecutionStore::new();
        let projects = InMemoryProjectStore::new();
        let environments = InMemoryEnvironmentStore::new();
        let system = InMemorySystemStore::new();

        let task_repo: Arc<dyn TaskRepository> = tasks.clone();
        let execution_repo: Arc<dyn ExecutionRepository> = executions.clone();
        let project_repo: Arc<dyn ProjectRepository> = projects.clone();
        let environment_repo: Arc<dyn EnvironmentRepository> = environments.clone();
        let system_repo: Arc<dyn SystemRepository> = system.clone();

        let gate = Arc::new(ConcurrencyGate::new(config.executor.max_concurrent_tasks));
        let supervisor = Arc::new(ProcessSupervisor::new(&config.executor));

        let executor = Arc::new(TaskExecutor::new(
            config.executor.clone(),
            gate,
            supervisor.clone(),
            ExecutorPorts {
                task_repo: task_repo.clone(),
                execution_repo: execution_repo.clone(),
                project_repo,
                environment_repo,
                system_repo,
                cipher: Arc::new(PlainTextCipher),
            },
        ));

        let scheduler = Arc::new(TaskScheduler::new(
            executor.clone(),
            task_repo.clone(),
            config.scheduler.max_concurrent_dispatches,
        ));
        executor.bind_scheduler(scheduler.clone());

        let controller = TaskController::new(
            task_repo,
            execution_repo.clone(),
            scheduler.clone(),
            executor,
        );

        let monitor = Mutex::new(ResourceMonitor::new(
            config.monitor.clone(),
            supervisor.clone(),
            execution_repo,
        ));

        Self {
            tasks,
            projects,
            environments,
            system,
            supervisor,
            scheduler,
            controller,
            monitor,
        }
    }

    /// 写入种子数据并立即触发其中的immediate任务
    pub async fn seed(&self, data: SeedData) -> Result<()> {
        for project in data.projects {
            self.projects.insert(project);
        }
        for environment in data.environments {
            self.environments.insert(environment);
        }
        for variable in data.env_vars {
            self.system.add_env_var(variable);
        }

        let mut immediate_ids = Vec::new();
        for task in data.tasks {
            if task.trigger_type == "immediate" && task.is_active() {
                immediate_ids.push(task.id);
            }
            self.tasks.insert(task);
        }
        info!(count = self.tasks.len(), "种子任务已加载");

        for task_id in immediate_ids {
            self.controller.run_task_now(task_id).await?;
        }
        Ok(())
    }

    /// 启动资源监控并登记所有active任务的job
    pub async fn start(&self) -> Result<()> {
        self.monitor.lock().await.start();
        self.scheduler.load_jobs().await?;
        Ok(())
    }

    pub fn controller(&self) -> &TaskController {
        &self.controller
    }

    /// 优雅关闭：停止调度，终止在跑的进程组，收尾监控循环
    pub async fn shutdown(&self) {
        self.scheduler.shutdown();
        for execution_id in self.supervisor.registered_ids() {
            info!(execution_id, "关闭前终止在跑的执行");
            self.supervisor.terminate(execution_id);
        }
        self.monitor.lock().await.stop().await;
    }
}
