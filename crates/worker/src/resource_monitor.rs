use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use kumo_core::config::MonitorConfig;
use kumo_core::ExecutionRepository;

use crate::process::ProcessSupervisor;

/// 资源监控器：单个后台循环为所有在册执行采样CPU/内存
///
/// 峰值的落库按执行各自的flush间隔聚合成一次批量写，避免每tick
/// 每执行一条写入；单个进程的采样失败只丢弃该条缓存，不中断循环。
pub struct ResourceMonitor {
    config: MonitorConfig,
    supervisor: Arc<ProcessSupervisor>,
    execution_repo: Arc<dyn ExecutionRepository>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    monitor_handle: Option<tokio::task::JoinHandle<()>>,
}

impl ResourceMonitor {
    pub fn new(
        config: MonitorConfig,
        supervisor: Arc<ProcessSupervisor>,
        execution_repo: Arc<dyn ExecutionRepository>,
    ) -> Self {
        Self {
            config,
            supervisor,
            execution_repo,
            shutdown_tx: None,
            monitor_handle: None,
        }
    }

    /// 启动后台采样循环
    pub fn start(&mut self) {
        if !self.config.enabled {
            info!("资源监控已禁用");
            return;
        }
        if self.monitor_handle.is_some() {
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let supervisor = self.supervisor.clone();
        let execution_repo = self.execution_repo.clone();
        let config = self.config.clone();

        let handle = tokio::spawn(async move {
            let mut sample_interval =
                interval(Duration::from_secs(config.sample_interval_seconds.max(1)));
            let flush_interval = Duration::from_secs(config.flush_interval_seconds);
            let mut tick_count: u64 = 0;

            loop {
                tokio::select! {
                    _ = sample_interval.tick() => {
                        tick_count += 1;
                        if config.cache_reclaim_ticks > 0
                            && tick_count % config.cache_reclaim_ticks == 0
                        {
                            supervisor.reclaim_caches();
                        }
                        Self::sample_pass(&supervisor);
                        Self::flush_pass(&supervisor, &execution_repo, flush_interval).await;
                    }
                    _ = &mut shutdown_rx => {
                        info!("资源监控收到关闭信号");
                        break;
                    }
                }
            }
            info!("资源监控循环已退出");
        });

        self.monitor_handle = Some(handle);
        info!(
            "资源监控已启动，采样间隔 {}s，落库间隔 {}s",
            self.config.sample_interval_seconds, self.config.flush_interval_seconds
        );
    }

    /// 协作式停止：发关闭信号并有界等待循环退出
    pub async fn stop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(handle) = self.monitor_handle.take() {
            if tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .is_err()
            {
                warn!("资源监控循环未在限期内退出");
            }
        }
        info!("资源监控已停止");
    }

    fn sample_pass(supervisor: &ProcessSupervisor) {
        for execution_id in supervisor.registered_ids() {
            // 采样失败（进程刚退出等）由sample_metrics内部降级处理
            if let Some((cpu, mem_mb)) = supervisor.sample_metrics(execution_id) {
                supervisor.update_stats(execution_id, cpu, mem_mb);
            }
        }
    }

    async fn flush_pass(
        supervisor: &ProcessSupervisor,
        execution_repo: &Arc<dyn ExecutionRepository>,
        flush_interval: Duration,
    ) {
        let due = supervisor.take_due_flushes(flush_interval);
        if due.is_empty() {
            return;
        }
        match execution_repo.batch_update_stats(&due).await {
            Ok(()) => debug!("批量写回 {} 条执行峰值", due.len()),
            Err(e) => error!("批量写回执行峰值失败: {}", e),
        }
    }
}
