use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

/// 应用配置，TOML文件 + KUMO_前缀环境变量覆盖
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub executor: ExecutorConfig,
    pub monitor: MonitorConfig,
    pub scheduler: SchedulerConfig,
    pub log: LogConfig,
}

/// 执行器与进程管理配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// 全局并发上限：同时执行的任务进程数
    pub max_concurrent_tasks: usize,
    /// 并发槽位等待超时（秒），超时后本次触发直接放弃
    pub acquire_timeout_seconds: u64,
    /// 任务日志文件目录
    pub task_log_dir: String,
    /// 解释器缺失时的回退命令
    pub python_fallback: String,
    /// SIGTERM后升级为SIGKILL的宽限期（秒）
    pub termination_grace_seconds: u64,
    /// 进程注册表和指标缓存的条目上限，超出后最旧先逐出
    pub max_cache_entries: usize,
}

/// 资源监控配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub enabled: bool,
    /// 采样间隔（秒）
    pub sample_interval_seconds: u64,
    /// 单条执行的峰值落库间隔（秒）
    pub flush_interval_seconds: u64,
    /// 每多少个采样tick做一次缓存回收
    pub cache_reclaim_ticks: u64,
}

/// 调度器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 触发分发并发上限，独立于执行并发门
    pub max_concurrent_dispatches: usize,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    /// text或json
    pub format: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            executor: ExecutorConfig::default(),
            monitor: MonitorConfig::default(),
            scheduler: SchedulerConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 20,
            acquire_timeout_seconds: 30,
            task_log_dir: "./logs/tasks".to_string(),
            python_fallback: "python".to_string(),
            termination_grace_seconds: 5,
            max_cache_entries: 1000,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_interval_seconds: 2,
            flush_interval_seconds: 10,
            cache_reclaim_ticks: 60,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_dispatches: 20,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl AppConfig {
    /// 加载配置：文件可缺省，环境变量KUMO_段__键覆盖文件值
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(
                File::with_name(path)
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        let config: AppConfig = builder
            .add_source(Environment::with_prefix("KUMO").separator("__"))
            .build()
            .context("构建配置源失败")?
            .try_deserialize()
            .context("解析配置失败")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.executor.max_concurrent_tasks > 0,
            "executor.max_concurrent_tasks 必须大于0"
        );
        anyhow::ensure!(
            self.scheduler.max_concurrent_dispatches > 0,
            "scheduler.max_concurrent_dispatches 必须大于0"
        );
        anyhow::ensure!(
            self.monitor.sample_interval_seconds > 0,
            "monitor.sample_interval_seconds 必须大于0"
        );
        anyhow::ensure!(
            !self.executor.task_log_dir.is_empty(),
            "executor.task_log_dir 不能为空"
        );
        anyhow::ensure!(
            matches!(self.log.format.as_str(), "text" | "json"),
            "log.format 只支持 text 或 json"
        );
        Ok(())
    }
}
