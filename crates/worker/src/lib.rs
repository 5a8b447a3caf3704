//! Kumo执行层
//!
//! 并发准入（信号量门）、进程组监督、资源峰值采样与任务执行器。
//! 调度层只通过 [`kumo_core::TaskExecutionService`] 进入这里。

pub mod concurrency;
pub mod executor;
pub mod process;
pub mod resource_monitor;

pub use concurrency::{ConcurrencyGate, ExecutionPermit};
pub use executor::{ExecutorPorts, TaskExecutor};
pub use process::{ProcessSupervisor, SpawnedProcess, WaitOutcome};
pub use resource_monitor::ResourceMonitor;
