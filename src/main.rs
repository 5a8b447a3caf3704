use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use kumo_core::AppConfig;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod app;
mod storage;

use app::{Application, SeedData};

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let matches = Command::new("kumo-scheduler")
        .version("1.0.0")
        .about("Kumo任务调度与执行引擎")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径"),
        )
        .arg(
            Arg::new("tasks")
                .short('t')
                .long("tasks")
                .value_name("FILE")
                .help("启动时加载的任务种子文件(JSON)"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，缺省时取配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，缺省时取配置文件")
                .value_parser(["text", "json"]),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config");
    let tasks_path = matches.get_one::<String>("tasks");

    // 加载配置
    let config = AppConfig::load(config_path.map(String::as_str))
        .context("加载配置失败")?;

    // 初始化日志系统，命令行参数优先于配置文件
    let log_level = matches
        .get_one::<String>("log-level")
        .unwrap_or(&config.log.level)
        .clone();
    let log_format = matches
        .get_one::<String>("log-format")
        .unwrap_or(&config.log.format)
        .clone();
    init_logging(&log_level, &log_format)?;

    info!("启动Kumo任务调度引擎");
    if let Some(path) = config_path {
        info!("配置文件: {path}");
    }

    // 装配应用
    let app = Arc::new(Application::new(config));

    if let Some(path) = tasks_path {
        let seed = SeedData::load(Path::new(path))?;
        app.seed(seed).await?;
    }

    app.start().await?;

    // 等待关闭信号
    wait_for_shutdown_signal().await;

    info!("收到关闭信号，开始优雅关闭...");
    match tokio::time::timeout(Duration::from_secs(30), app.shutdown()).await {
        Ok(()) => info!("应用已优雅关闭"),
        Err(_) => warn!("应用关闭超时，强制退出"),
    }

    info!("Kumo任务调度引擎已退出");
    Ok(())
}

/// 初始化日志系统
fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        "text" => {
            registry
                .with(tracing_subscriber::fmt::layer())
                .try_init()
                .context("初始化文本日志格式失败")?;
        }
        _ => {
            return Err(anyhow::anyhow!("不支持的日志格式: {log_format}"));
        }
    }

    Ok(())
}

/// 等待关闭信号
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("安装Ctrl+C信号处理器失败");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("安装SIGTERM信号处理器失败")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}
