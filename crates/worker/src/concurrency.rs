use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

/// 并发控制门：用信号量限制同时执行的任务进程数
///
/// 槽位以RAII许可的形式发放，许可在任何退出路径上drop即归还，
/// 保证acquire/release严格一一配对。
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    active: Arc<AtomicUsize>,
    max_concurrent: usize,
}

/// 一个执行槽位许可，drop时归还
pub struct ExecutionPermit {
    _permit: OwnedSemaphorePermit,
    active: Arc<AtomicUsize>,
    max_concurrent: usize,
}

impl Drop for ExecutionPermit {
    fn drop(&mut self) {
        let remaining = self.active.fetch_sub(1, Ordering::SeqCst) - 1;
        debug!("释放执行槽位，当前活跃: {}/{}", remaining, self.max_concurrent);
    }
}

impl ConcurrencyGate {
    pub fn new(max_concurrent: usize) -> Self {
        info!("并发控制门初始化，max_concurrent={}", max_concurrent);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            active: Arc::new(AtomicUsize::new(0)),
            max_concurrent,
        }
    }

    /// 在超时窗口内获取一个执行槽位
    ///
    /// 超时返回None，调用方必须放弃本次执行且不产生任何副作用。
    /// 公平性遵循底层信号量的FIFO近似行为，不作契约保证。
    pub async fn acquire(&self, timeout: Duration) -> Option<ExecutionPermit> {
        match tokio::time::timeout(timeout, self.semaphore.clone().acquire_owned()).await {
            Ok(Ok(permit)) => {
                let current = self.active.fetch_add(1, Ordering::SeqCst) + 1;
                debug!("获取执行槽位，当前活跃: {}/{}", current, self.max_concurrent);
                Some(ExecutionPermit {
                    _permit: permit,
                    active: self.active.clone(),
                    max_concurrent: self.max_concurrent,
                })
            }
            // 信号量已关闭或等待超时
            _ => None,
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn available_slots(&self) -> usize {
        self.max_concurrent - self.active_count()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}
