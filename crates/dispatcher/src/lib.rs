//! 任务调度器
//!
//! 负责把任务的触发器配置翻译成后台job：解析interval/cron/date/
//! immediate四类触发器，维护任务id到job的注册表，按触发时刻经
//! 分发池限流后交给执行服务。重试job由执行侧通过
//! [`kumo_core::SchedulerHandle`] 回写登记。

pub mod controller;
pub mod scheduler;
pub mod trigger;

pub use controller::TaskController;
pub use scheduler::TaskScheduler;
pub use trigger::{IntervalUnit, Trigger};
