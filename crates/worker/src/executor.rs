use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::AsyncReadExt;
use tracing::{debug, error, info, warn};

use kumo_core::config::ExecutorConfig;
use kumo_core::{
    EnvironmentRepository, ExecutionRepository, ExecutionStatus, Project, ProjectRepository,
    SchedulerError, SchedulerHandle, SchedulerResult, SecretCipher, SystemRepository, Task,
    TaskExecution, TaskExecutionService, TaskRepository, TaskStatus,
};

use crate::concurrency::ConcurrencyGate;
use crate::process::{ProcessSupervisor, WaitOutcome};

/// 执行记录output片段的上限字节数
const OUTPUT_SNIPPET_BYTES: u64 = 4096;

/// 执行器依赖的持久化与解析端口集合
pub struct ExecutorPorts {
    pub task_repo: Arc<dyn TaskRepository>,
    pub execution_repo: Arc<dyn ExecutionRepository>,
    pub project_repo: Arc<dyn ProjectRepository>,
    pub environment_repo: Arc<dyn EnvironmentRepository>,
    pub system_repo: Arc<dyn SystemRepository>,
    pub cipher: Arc<dyn SecretCipher>,
}

/// 任务执行器：编排单次执行尝试的完整状态机
///
/// PENDING → RUNNING → {SUCCESS, FAILED, TIMEOUT, STOPPED}
///
/// 任何逃逸出主体的错误都在最外层兜底：执行记录强制置为Failed、
/// 错误文本写入output，并发槽位许可在所有路径上随作用域归还。
pub struct TaskExecutor {
    config: ExecutorConfig,
    gate: Arc<ConcurrencyGate>,
    supervisor: Arc<ProcessSupervisor>,
    ports: ExecutorPorts,
    /// 重试与熔断摘除回连的调度器句柄，应用装配阶段绑定
    scheduler: OnceLock<Arc<dyn SchedulerHandle>>,
}

impl TaskExecutor {
    pub fn new(
        config: ExecutorConfig,
        gate: Arc<ConcurrencyGate>,
        supervisor: Arc<ProcessSupervisor>,
        ports: ExecutorPorts,
    ) -> Self {
        Self {
            config,
            gate,
            supervisor,
            ports,
            scheduler: OnceLock::new(),
        }
    }

    /// 绑定调度器句柄；未绑定时失败的执行不登记重试（只记日志）
    pub fn bind_scheduler(&self, scheduler: Arc<dyn SchedulerHandle>) {
        if self.scheduler.set(scheduler).is_err() {
            warn!("调度器句柄重复绑定，保留首次绑定");
        }
    }

    /// 单次执行尝试的主体，错误向上抛给run()的兜底处理
    async fn execute_attempt(
        &self,
        task_id: i64,
        attempt: i32,
        execution_id: Option<i64>,
        slot: &mut Option<TaskExecution>,
    ) -> SchedulerResult<()> {
        // run-now场景复用预创建的记录：翻转为Running并刷新起始时间
        let execution = match execution_id {
            Some(id) => {
                let mut execution = self
                    .ports
                    .execution_repo
                    .get_by_id(id)
                    .await?
                    .ok_or(SchedulerError::ExecutionNotFound { id })?;
                execution.status = ExecutionStatus::Running;
                execution.start_time = Utc::now();
                execution.attempt = attempt;
                self.ports.execution_repo.update(&execution).await?;
                Some(execution)
            }
            None => None,
        };

        let task_id = execution
            .as_ref()
            .map(|e| e.task_id)
            .unwrap_or(task_id);

        let Some(task) = self.ports.task_repo.get_by_id(task_id).await? else {
            warn!("任务 {} 不存在，跳过本次执行", task_id);
            if let Some(mut execution) = execution {
                execution.finish(ExecutionStatus::Failed);
                execution.output = Some(format!("任务 {task_id} 不存在"));
                self.ports.execution_repo.update(&execution).await?;
            }
            return Ok(());
        };

        // 调度器触发场景：此处才创建执行记录
        let mut execution = match execution {
            Some(execution) => execution,
            None => {
                self.ports
                    .execution_repo
                    .create(&TaskExecution::new_running(task.id, attempt))
                    .await?
            }
        };
        *slot = Some(execution.clone());

        let project = self
            .ports
            .project_repo
            .get_by_id(task.project_id)
            .await?
            .ok_or(SchedulerError::ProjectNotFound {
                id: task.project_id,
            })?;
        let cwd = resolve_work_dir(&project);

        let mut env = self.build_child_env(&task, &project).await;
        let interpreter = self.resolve_interpreter(&task, &mut env).await;
        let tokens = build_command_tokens(&task.command, &interpreter)?;

        info!(
            "执行任务 {} (ID: {}): {:?} @ {}",
            task.name,
            task.id,
            tokens,
            cwd.display()
        );

        // 日志文件按任务id+执行id确定性命名，外部tail无需查库即可定位
        let log_dir = PathBuf::from(&self.config.task_log_dir);
        std::fs::create_dir_all(&log_dir)?;
        let log_path = log_dir.join(TaskExecution::log_file_name(task.id, execution.id));
        execution.log_file = Some(log_path.to_string_lossy().into_owned());
        self.ports.execution_repo.update(&execution).await?;
        *slot = Some(execution.clone());

        let process = self.supervisor.spawn(&tokens, &cwd, env, &log_path)?;
        self.supervisor.register(execution.id, process);

        let timeout_secs = task.effective_timeout();
        let outcome = self
            .supervisor
            .wait_with_timeout(execution.id, Duration::from_secs(timeout_secs as u64))
            .await?;

        let status = match outcome {
            WaitOutcome::Exited(code) => {
                if self.supervisor.was_termination_requested(execution.id) {
                    info!("任务 {} 执行 {} 被外部终止", task.id, execution.id);
                    ExecutionStatus::Stopped
                } else if code == Some(0) {
                    ExecutionStatus::Success
                } else {
                    ExecutionStatus::Failed
                }
            }
            WaitOutcome::TimedOut => {
                warn!(
                    "任务 {} 执行 {} 超时（{}秒），终止进程组",
                    task.id, execution.id, timeout_secs
                );
                self.supervisor.terminate(execution.id);
                ExecutionStatus::Timeout
            }
            WaitOutcome::Missing => {
                return Err(SchedulerError::Internal(format!(
                    "执行 {} 的进程句柄丢失",
                    execution.id
                )));
            }
        };

        self.supervisor.unregister(execution.id);
        execution.finish(status);

        // 冻结资源峰值并清理监控侧状态
        if let Some((max_cpu, max_mem)) = self.supervisor.get_stats(execution.id) {
            execution.max_cpu_percent = Some(max_cpu);
            execution.max_memory_mb = Some(max_mem);
            self.supervisor.clear_stats(execution.id);
        }

        let mut output = read_output_snippet(&log_path).await;
        match status {
            ExecutionStatus::Timeout => {
                output.push_str(&format!("\n[Timeout after {timeout_secs}s]"));
            }
            ExecutionStatus::Stopped => {
                output.push_str("\n[System] Execution stopped by user.");
            }
            _ => {}
        }
        execution.output = Some(output);
        self.ports.execution_repo.update(&execution).await?;
        *slot = Some(execution.clone());

        self.apply_reliability_policy(task, &execution, attempt, status)
            .await?;
        Ok(())
    }

    /// 终态后的可靠性处理：熔断计数与一次性重试登记
    async fn apply_reliability_policy(
        &self,
        mut task: Task,
        execution: &TaskExecution,
        attempt: i32,
        status: ExecutionStatus,
    ) -> SchedulerResult<()> {
        match status {
            ExecutionStatus::Failed | ExecutionStatus::Timeout => {
                task.consecutive_failures += 1;
                self.ports.task_repo.update(&task).await?;

                let threshold = task.effective_failure_threshold();
                if task.consecutive_failures >= threshold {
                    task.status = TaskStatus::Paused;
                    self.ports.task_repo.update(&task).await?;
                    warn!(
                        "[熔断] 任务 {} 连续失败 {} 次（阈值 {}），已自动暂停",
                        task.id, task.consecutive_failures, threshold
                    );
                    if let Some(scheduler) = self.scheduler.get() {
                        scheduler.unschedule(task.id).await;
                    }
                }

                if attempt <= task.retry_count {
                    let delay = if task.retry_delay > 0 {
                        task.retry_delay
                    } else {
                        60
                    };
                    let run_at = Utc::now() + chrono::Duration::seconds(delay);
                    if let Some(scheduler) = self.scheduler.get() {
                        info!(
                            "任务 {} 失败，{}秒后执行第 {}/{} 次尝试",
                            task.id,
                            delay,
                            attempt + 1,
                            task.retry_count + 1
                        );
                        if let Err(e) = scheduler
                            .schedule_retry(task.id, execution.id, attempt + 1, run_at)
                            .await
                        {
                            error!("任务 {} 重试登记失败: {}", task.id, e);
                        }
                    } else {
                        warn!("未绑定调度器，任务 {} 的重试无法登记", task.id);
                    }
                }
            }
            ExecutionStatus::Success => {
                if task.consecutive_failures > 0 {
                    task.consecutive_failures = 0;
                    self.ports.task_repo.update(&task).await?;
                    info!("任务 {} 执行成功，连续失败计数清零", task.id);
                }
            }
            // 外部终止不计入失败，也不触发重试
            _ => {}
        }
        Ok(())
    }

    /// 构建子进程环境：继承父环境并注入全局变量、代理、输出目录与限额提示
    async fn build_child_env(&self, task: &Task, project: &Project) -> HashMap<String, String> {
        let mut env: HashMap<String, String> = std::env::vars().collect();
        // 强制子进程无缓冲输出，日志才能实时tail
        env.insert("PYTHONUNBUFFERED".to_string(), "1".to_string());

        match self.ports.system_repo.get_env_vars().await {
            Ok(vars) => {
                for var in vars {
                    let value = if var.is_secret {
                        match self.ports.cipher.decrypt(&var.value) {
                            Ok(plaintext) => plaintext,
                            Err(e) => {
                                error!("全局变量 {} 解密失败，跳过注入: {}", var.key, e);
                                continue;
                            }
                        }
                    } else {
                        var.value
                    };
                    env.insert(var.key, value);
                }
            }
            Err(e) => error!("读取全局环境变量失败: {}", e),
        }

        if let Ok(Some(enabled)) = self.ports.system_repo.get_config("proxy.enabled").await {
            if enabled == "true" {
                if let Ok(Some(proxy_url)) = self.ports.system_repo.get_config("proxy.url").await {
                    if !proxy_url.is_empty() {
                        for key in [
                            "http_proxy",
                            "https_proxy",
                            "all_proxy",
                            "HTTP_PROXY",
                            "HTTPS_PROXY",
                            "ALL_PROXY",
                        ] {
                            env.insert(key.to_string(), proxy_url.clone());
                        }
                        debug!("已注入全局代理: {}", proxy_url);
                    }
                }
            }
        }

        if let Some(output_dir) = &project.output_dir {
            for key in ["OUTPUT_DIR", "DATA_DIR", "BASE_DATA_DIR"] {
                env.insert(key.to_string(), output_dir.clone());
            }
            if !Path::new(output_dir).exists() {
                if let Err(e) = std::fs::create_dir_all(output_dir) {
                    warn!("创建输出目录 {} 失败: {}", output_dir, e);
                }
            }
        }

        if let Some(interval) = task.request_interval_ms.filter(|v| *v > 0) {
            env.insert("REQUEST_INTERVAL_MS".to_string(), interval.to_string());
        }
        if let Some(rps) = task.max_requests_per_second.filter(|v| *v > 0) {
            env.insert("MAX_REQUESTS_PER_SECOND".to_string(), rps.to_string());
        }
        if let Some(cpu) = task.max_cpu_percent.filter(|v| *v > 0.0) {
            env.insert("MAX_CPU_PERCENT".to_string(), cpu.to_string());
        }
        if let Some(mem) = task.max_memory_mb.filter(|v| *v > 0.0) {
            env.insert("MAX_MEMORY_MB".to_string(), mem.to_string());
        }

        env
    }

    /// 解析解释器路径；环境的解释器在磁盘上不存在时回退到系统python
    /// （容器/宿主机路径错位的兼容处理），存在时把bin目录前置到PATH
    async fn resolve_interpreter(&self, task: &Task, env: &mut HashMap<String, String>) -> String {
        let fallback = self.config.python_fallback.clone();
        let Some(env_id) = task.env_id else {
            return fallback;
        };

        match self.ports.environment_repo.get_by_id(env_id).await {
            Ok(Some(python_env)) => {
                if Path::new(&python_env.path).exists() {
                    if let Some(bin_dir) = Path::new(&python_env.path).parent() {
                        let old_path = env.get("PATH").cloned().unwrap_or_default();
                        env.insert(
                            "PATH".to_string(),
                            format!("{}:{}", bin_dir.display(), old_path),
                        );
                    }
                    python_env.path
                } else {
                    warn!(
                        "解释器 {} 不存在，回退到系统 {}",
                        python_env.path, fallback
                    );
                    fallback
                }
            }
            Ok(None) => {
                warn!("环境 {} 不存在，使用系统解释器", env_id);
                fallback
            }
            Err(e) => {
                error!("查询环境 {} 失败: {}", env_id, e);
                fallback
            }
        }
    }
}

#[async_trait]
impl TaskExecutionService for TaskExecutor {
    async fn run(&self, task_id: i64, attempt: i32, execution_id: Option<i64>) {
        let acquire_timeout = Duration::from_secs(self.config.acquire_timeout_seconds);
        let Some(_permit) = self.gate.acquire(acquire_timeout).await else {
            warn!("任务 {} 本次触发被跳过: 无可用并发槽位", task_id);
            return;
        };

        let mut slot: Option<TaskExecution> = None;
        if let Err(e) = self
            .execute_attempt(task_id, attempt, execution_id, &mut slot)
            .await
        {
            error!("任务 {} 执行异常: {}", task_id, e);
            // 最外层兜底：无论卡在哪一步，执行记录都要到达终态
            if let Some(mut execution) = slot {
                self.supervisor.unregister(execution.id);
                self.supervisor.clear_stats(execution.id);
                if !execution.status.is_terminal() {
                    execution.finish(ExecutionStatus::Failed);
                    execution.output = Some(e.to_string());
                    if let Err(update_err) = self.ports.execution_repo.update(&execution).await {
                        error!("执行 {} 兜底落库失败: {}", execution.id, update_err);
                    }
                }
            }
        }
        // _permit随作用域drop，槽位在所有路径上恰好释放一次
    }

    async fn stop_execution(&self, execution_id: i64) -> bool {
        self.supervisor.terminate(execution_id)
    }
}

fn resolve_work_dir(project: &Project) -> PathBuf {
    let mut cwd = PathBuf::from(&project.path);
    if !project.work_dir.is_empty() && project.work_dir != "./" {
        cwd.push(&project.work_dir);
    }
    cwd
}

/// 按shell词法切分命令；首token为python时替换为解析出的解释器路径
fn build_command_tokens(command: &str, interpreter: &str) -> SchedulerResult<Vec<String>> {
    let mut tokens = shell_words::split(command)
        .map_err(|e| SchedulerError::InvalidCommand(format!("{command}: {e}")))?;
    if tokens.is_empty() {
        return Err(SchedulerError::InvalidCommand("命令为空".to_string()));
    }
    if tokens[0] == "python" {
        tokens[0] = interpreter.to_string();
    }
    Ok(tokens)
}

/// 回读日志前4KB作为output片段，不可读时落回提示文本
async fn read_output_snippet(log_path: &Path) -> String {
    match tokio::fs::File::open(log_path).await {
        Ok(file) => {
            let mut buf = Vec::new();
            match file.take(OUTPUT_SNIPPET_BYTES).read_to_end(&mut buf).await {
                Ok(_) => String::from_utf8_lossy(&buf).into_owned(),
                Err(_) => "See log file.".to_string(),
            }
        }
        Err(_) => "See log file.".to_string(),
    }
}
