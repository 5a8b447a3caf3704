use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 执行状态机：Pending/Running为非终态，其余为终态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Success,
    Failed,
    Timeout,
    Stopped,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Success
                | ExecutionStatus::Failed
                | ExecutionStatus::Timeout
                | ExecutionStatus::Stopped
        )
    }
}

/// 一次具体的任务执行尝试
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecution {
    pub id: i64,
    pub task_id: i64,
    pub status: ExecutionStatus,
    /// 尝试序号，首次为1，重试递增
    pub attempt: i32,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// 执行耗时（秒）
    pub duration: Option<f64>,
    /// 进程stdout/stderr合并后的追加日志文件路径
    pub log_file: Option<String>,
    /// 日志前4KB的回读片段，便于列表页直接展示
    pub output: Option<String>,
    /// 运行期CPU峰值，完成后冻结
    pub max_cpu_percent: Option<f64>,
    /// 运行期内存峰值（MB），完成后冻结
    pub max_memory_mb: Option<f64>,
}

impl TaskExecution {
    /// 创建一条新的Running执行记录（id由存储层分配）
    pub fn new_running(task_id: i64, attempt: i32) -> Self {
        Self {
            id: 0,
            task_id,
            status: ExecutionStatus::Running,
            attempt,
            start_time: Utc::now(),
            end_time: None,
            duration: None,
            log_file: None,
            output: None,
            max_cpu_percent: None,
            max_memory_mb: None,
        }
    }

    /// 创建一条等待执行的Pending记录（手动run-now场景预先落库）
    pub fn new_pending(task_id: i64, attempt: i32) -> Self {
        Self {
            status: ExecutionStatus::Pending,
            ..Self::new_running(task_id, attempt)
        }
    }

    /// 进入终态：补齐结束时间与耗时
    pub fn finish(&mut self, status: ExecutionStatus) {
        let now = Utc::now();
        self.status = status;
        self.end_time = Some(now);
        self.duration = Some((now - self.start_time).num_milliseconds() as f64 / 1000.0);
    }

    /// 按任务与执行id确定性地生成日志文件名，便于外部tail定位
    pub fn log_file_name(task_id: i64, execution_id: i64) -> String {
        format!("task_{task_id}_exec_{execution_id}.log")
    }
}
