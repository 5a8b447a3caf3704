//! Kumo调度引擎核心类型
//!
//! 数据模型、错误分类、配置加载以及各层之间的端口trait。
//! 其余crate只通过这里定义的trait互相协作，不直接依赖彼此的实现。

pub mod config;
pub mod errors;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use errors::{SchedulerError, SchedulerResult};
pub use models::{
    ExecutionStatus, GlobalVariable, Project, PythonEnvironment, Task, TaskExecution, TaskStatus,
};
pub use traits::repositories::PlainTextCipher;
pub use traits::{
    EnvironmentRepository, ExecutionRepository, ExecutionStatsUpdate, ProjectRepository,
    SchedulerHandle, SecretCipher, SystemRepository, TaskExecutionService, TaskRepository,
};
