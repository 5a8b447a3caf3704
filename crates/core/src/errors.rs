use thiserror::Error;

/// 调度引擎错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("无效的触发器配置: {kind} - {message}")]
    InvalidTrigger { kind: String, message: String },

    #[error("进程启动失败: {0}")]
    ProcessSpawn(String),

    #[error("无效的命令: {0}")]
    InvalidCommand(String),

    #[error("任务未找到: {id}")]
    TaskNotFound { id: i64 },

    #[error("执行记录未找到: {id}")]
    ExecutionNotFound { id: i64 },

    #[error("项目未找到: {id}")]
    ProjectNotFound { id: i64 },

    #[error("密文解密失败: {0}")]
    Secret(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
