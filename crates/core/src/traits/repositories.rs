use async_trait::async_trait;

use crate::errors::SchedulerResult;
use crate::models::{GlobalVariable, Project, PythonEnvironment, Task, TaskExecution};

/// 资源峰值的批量写回条目
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionStatsUpdate {
    pub execution_id: i64,
    pub max_cpu_percent: f64,
    pub max_memory_mb: f64,
}

/// 任务仓储端口：实现方必须支持多个执行并发调用
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Task>>;

    async fn get_active_tasks(&self) -> SchedulerResult<Vec<Task>>;

    async fn update(&self, task: &Task) -> SchedulerResult<()>;
}

/// 执行记录仓储端口
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    /// 创建执行记录并分配id，返回落库后的完整记录
    async fn create(&self, execution: &TaskExecution) -> SchedulerResult<TaskExecution>;

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<TaskExecution>>;

    async fn update(&self, execution: &TaskExecution) -> SchedulerResult<()>;

    /// 一次事务批量写回多条执行的资源峰值，供监控循环周期性flush
    async fn batch_update_stats(&self, updates: &[ExecutionStatsUpdate]) -> SchedulerResult<()>;
}

/// 项目解析端口
#[async_trait]
pub trait ProjectRepository: Send + Sync {
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Project>>;
}

/// 解释器环境解析端口
#[async_trait]
pub trait EnvironmentRepository: Send + Sync {
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<PythonEnvironment>>;
}

/// 系统配置端口：全局变量与键值配置（代理开关等）
#[async_trait]
pub trait SystemRepository: Send + Sync {
    async fn get_env_vars(&self) -> SchedulerResult<Vec<GlobalVariable>>;

    async fn get_config(&self, key: &str) -> SchedulerResult<Option<String>>;
}

/// 密文解密端口，注入secret变量前调用
pub trait SecretCipher: Send + Sync {
    fn decrypt(&self, ciphertext: &str) -> SchedulerResult<String>;
}

/// 明文直通实现，独立运行模式与测试使用
#[derive(Debug, Default, Clone)]
pub struct PlainTextCipher;

impl SecretCipher for PlainTextCipher {
    fn decrypt(&self, ciphertext: &str) -> SchedulerResult<String> {
        Ok(ciphertext.to_string())
    }
}
