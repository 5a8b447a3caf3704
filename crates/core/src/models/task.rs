use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 任务生命周期状态：只有Active任务会被调度器注册
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Active,
    Paused,
    Error,
}

/// 任务定义：一条可周期性或一次性执行的命令及其可靠性策略
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub name: String,
    pub status: TaskStatus,
    /// shell风格命令字符串，按词法切分执行，不经过shell解释
    pub command: String,
    pub project_id: i64,
    /// 关联的Python解释器环境，None表示使用系统python
    pub env_id: Option<i64>,
    pub description: String,

    /// 触发器类型：interval / cron / date / immediate
    pub trigger_type: String,
    /// 触发器配置：interval为JSON结构，cron为表达式，date为ISO时间串
    pub trigger_value: String,

    /// 失败后自动重试次数
    pub retry_count: i32,
    /// 重试间隔（秒）
    pub retry_delay: i64,
    /// 单次执行超时（秒）
    pub timeout: i64,
    /// 优先级提示，当前调度器不做抢占式排序
    pub priority: i32,

    /// 连续失败计数，成功后归零
    pub consecutive_failures: i32,
    /// 熔断阈值：连续失败达到该值后任务自动转为Paused
    pub failure_threshold: i32,

    /// 注入给子进程的限速提示（毫秒）
    pub request_interval_ms: Option<i64>,
    /// 注入给子进程的限速提示（每秒请求数）
    pub max_requests_per_second: Option<i64>,
    /// 注入给子进程的资源上限提示（CPU百分比）
    pub max_cpu_percent: Option<f64>,
    /// 注入给子进程的资源上限提示（内存MB）
    pub max_memory_mb: Option<f64>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn is_active(&self) -> bool {
        self.status == TaskStatus::Active
    }

    /// 生效的执行超时，未配置时回落到默认1小时
    pub fn effective_timeout(&self) -> i64 {
        if self.timeout > 0 {
            self.timeout
        } else {
            3600
        }
    }

    /// 生效的熔断阈值，未配置时回落到默认5次
    pub fn effective_failure_threshold(&self) -> i32 {
        if self.failure_threshold > 0 {
            self.failure_threshold
        } else {
            5
        }
    }
}
