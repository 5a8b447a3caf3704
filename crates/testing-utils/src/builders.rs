//! 测试数据构造器：带合理默认值，按需覆盖

use chrono::Utc;

use kumo_core::{Project, Task, TaskStatus};

/// Task测试构造器
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new() -> Self {
        Self {
            task: Task {
                id: 1,
                name: "test_task".to_string(),
                status: TaskStatus::Active,
                command: "sh -c 'exit 0'".to_string(),
                project_id: 1,
                env_id: None,
                description: String::new(),
                trigger_type: "immediate".to_string(),
                trigger_value: String::new(),
                retry_count: 0,
                retry_delay: 60,
                timeout: 3600,
                priority: 0,
                consecutive_failures: 0,
                failure_threshold: 5,
                request_interval_ms: None,
                max_requests_per_second: None,
                max_cpu_percent: None,
                max_memory_mb: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.task.id = id;
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.task.name = name.to_string();
        self
    }

    pub fn with_command(mut self, command: &str) -> Self {
        self.task.command = command.to_string();
        self
    }

    pub fn with_project_id(mut self, project_id: i64) -> Self {
        self.task.project_id = project_id;
        self
    }

    pub fn with_env_id(mut self, env_id: i64) -> Self {
        self.task.env_id = Some(env_id);
        self
    }

    pub fn with_trigger(mut self, trigger_type: &str, trigger_value: &str) -> Self {
        self.task.trigger_type = trigger_type.to_string();
        self.task.trigger_value = trigger_value.to_string();
        self
    }

    pub fn with_retry(mut self, retry_count: i32, retry_delay: i64) -> Self {
        self.task.retry_count = retry_count;
        self.task.retry_delay = retry_delay;
        self
    }

    pub fn with_timeout(mut self, timeout: i64) -> Self {
        self.task.timeout = timeout;
        self
    }

    pub fn with_failure_threshold(mut self, threshold: i32) -> Self {
        self.task.failure_threshold = threshold;
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.task.status = status;
        self
    }

    pub fn paused(mut self) -> Self {
        self.task.status = TaskStatus::Paused;
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

impl Default for TaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Project测试构造器
pub struct ProjectBuilder {
    project: Project,
}

impl ProjectBuilder {
    pub fn new() -> Self {
        Self {
            project: Project {
                id: 1,
                name: "test_project".to_string(),
                path: "/tmp".to_string(),
                work_dir: "./".to_string(),
                output_dir: None,
            },
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.project.id = id;
        self
    }

    pub fn with_path(mut self, path: &str) -> Self {
        self.project.path = path.to_string();
        self
    }

    pub fn with_work_dir(mut self, work_dir: &str) -> Self {
        self.project.work_dir = work_dir.to_string();
        self
    }

    pub fn with_output_dir(mut self, output_dir: &str) -> Self {
        self.project.output_dir = Some(output_dir.to_string());
        self
    }

    pub fn build(self) -> Project {
        self.project
    }
}

impl Default for ProjectBuilder {
    fn default() -> Self {
        Self::new()
    }
}
