use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::OpenOptions;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::process::{Child, Command};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use kumo_core::config::ExecutorConfig;
use kumo_core::{ExecutionStatsUpdate, SchedulerError, SchedulerResult};

/// 一个已启动的任务进程：子进程句柄与其进程组id
///
/// process_group(0)让子进程成为组长，终止时对整组发信号，
/// 确保它fork出来的后代（如chromedriver）一并被清理。
pub struct SpawnedProcess {
    pub pid: u32,
    pub pgid: i32,
    child: Arc<AsyncMutex<Child>>,
    terminate_requested: Arc<AtomicBool>,
}

/// 进程等待结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// 进程退出，携带退出码（被信号杀死时为None）
    Exited(Option<i32>),
    /// 等待超过上限，进程仍在运行
    TimedOut,
    /// 该执行未注册
    Missing,
}

struct ProcessEntry {
    pid: u32,
    pgid: i32,
    child: Arc<AsyncMutex<Child>>,
    terminate_requested: Arc<AtomicBool>,
}

#[derive(Debug, Clone, Default)]
struct ExecutionStats {
    max_cpu: f64,
    max_mem_mb: f64,
    last_flush: Option<Instant>,
}

/// 进程监督器：在飞进程注册表 + 进程组启停 + 指标采样缓存
///
/// 注册表、运行峰值和采样缓存被执行器（注册/注销）和监控循环
/// （采样/回收）并发修改，各自由独立互斥锁保护。
pub struct ProcessSupervisor {
    processes: Mutex<HashMap<i64, ProcessEntry>>,
    /// execution_id -> 运行期资源峰值；BTreeMap保证逐出时最旧（id最小）优先
    stats: Mutex<BTreeMap<i64, ExecutionStats>>,
    /// 已完成预热采样的执行集合，首次CPU增量无意义需丢弃
    metrics_primed: Mutex<BTreeSet<i64>>,
    system: Mutex<System>,
    termination_grace: Duration,
    max_cache_entries: usize,
}

impl ProcessSupervisor {
    pub fn new(config: &ExecutorConfig) -> Self {
        Self {
            processes: Mutex::new(HashMap::new()),
            stats: Mutex::new(BTreeMap::new()),
            metrics_primed: Mutex::new(BTreeSet::new()),
            system: Mutex::new(System::new()),
            termination_grace: Duration::from_secs(config.termination_grace_seconds),
            max_cache_entries: config.max_cache_entries,
        }
    }

    /// 启动任务进程：词法切分后的参数向量，stdout/stderr合并追加到日志文件
    pub fn spawn(
        &self,
        tokens: &[String],
        cwd: &Path,
        env: HashMap<String, String>,
        log_path: &Path,
    ) -> SchedulerResult<SpawnedProcess> {
        let program = tokens
            .first()
            .ok_or_else(|| SchedulerError::InvalidCommand("命令为空".to_string()))?;

        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;
        let log_file_err = log_file.try_clone()?;

        let mut cmd = Command::new(program);
        cmd.args(&tokens[1..])
            .current_dir(cwd)
            .env_clear()
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(log_file_err))
            .kill_on_drop(true);
        // 独立进程组，终止时对整组发信号
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd
            .spawn()
            .map_err(|e| SchedulerError::ProcessSpawn(format!("{program}: {e}")))?;
        let pid = child
            .id()
            .ok_or_else(|| SchedulerError::ProcessSpawn("无法获取子进程pid".to_string()))?;

        Ok(SpawnedProcess {
            pid,
            pgid: pid as i32,
            child: Arc::new(AsyncMutex::new(child)),
            terminate_requested: Arc::new(AtomicBool::new(false)),
        })
    }

    /// 注册在飞进程，执行id到进程句柄一对一绑定
    pub fn register(&self, execution_id: i64, process: SpawnedProcess) {
        debug!("注册进程 {} (执行 {})", process.pid, execution_id);
        let mut processes = self.processes.lock().unwrap();
        processes.insert(
            execution_id,
            ProcessEntry {
                pid: process.pid,
                pgid: process.pgid,
                child: process.child,
                terminate_requested: process.terminate_requested,
            },
        );
    }

    /// 注销进程并丢弃其指标缓存；运行峰值由调用方快照后单独清理
    pub fn unregister(&self, execution_id: i64) {
        self.processes.lock().unwrap().remove(&execution_id);
        self.metrics_primed.lock().unwrap().remove(&execution_id);
        debug!("注销进程 (执行 {})", execution_id);
    }

    pub fn registered_ids(&self) -> Vec<i64> {
        self.processes.lock().unwrap().keys().copied().collect()
    }

    /// 等待进程退出，到达超时上限即返回TimedOut而不杀进程
    pub async fn wait_with_timeout(
        &self,
        execution_id: i64,
        timeout: Duration,
    ) -> SchedulerResult<WaitOutcome> {
        let child = {
            let processes = self.processes.lock().unwrap();
            match processes.get(&execution_id) {
                Some(entry) => entry.child.clone(),
                None => return Ok(WaitOutcome::Missing),
            }
        };

        match tokio::time::timeout(timeout, async {
            let mut guard = child.lock().await;
            guard.wait().await
        })
        .await
        {
            Ok(Ok(status)) => Ok(WaitOutcome::Exited(status.code())),
            Ok(Err(e)) => Err(SchedulerError::Internal(format!("等待进程退出失败: {e}"))),
            Err(_) => Ok(WaitOutcome::TimedOut),
        }
    }

    /// 终止整个进程组：SIGTERM后在宽限期内未消亡则升级为SIGKILL
    ///
    /// 执行未注册或进程组已消亡时返回false；发信号失败只记日志，
    /// "进程可能已经退出"对调用方而言是非致命的信息性结果。
    pub fn terminate(&self, execution_id: i64) -> bool {
        let (pgid, flag) = {
            let processes = self.processes.lock().unwrap();
            match processes.get(&execution_id) {
                Some(entry) => (entry.pgid, entry.terminate_requested.clone()),
                None => return false,
            }
        };

        flag.store(true, Ordering::SeqCst);
        let group = Pid::from_raw(pgid);
        match killpg(group, Signal::SIGTERM) {
            Ok(()) => {
                info!("已向进程组 {} 发送SIGTERM (执行 {})", pgid, execution_id);
                let grace = self.termination_grace;
                tokio::spawn(async move {
                    tokio::time::sleep(grace).await;
                    // 宽限期后进程组仍存在则无条件强杀
                    if killpg(group, None).is_ok() {
                        warn!("进程组 {} 在宽限期 {:?} 后仍存活，升级为SIGKILL", pgid, grace);
                        let _ = killpg(group, Signal::SIGKILL);
                    }
                });
                true
            }
            Err(nix::errno::Errno::ESRCH) => {
                debug!("进程组 {} 已不存在 (执行 {})", pgid, execution_id);
                false
            }
            Err(e) => {
                warn!("终止进程组 {} 失败: {} (执行 {})", pgid, e, execution_id);
                false
            }
        }
    }

    /// 该执行是否收到过外部终止请求，用于把终态归类为Stopped
    pub fn was_termination_requested(&self, execution_id: i64) -> bool {
        let processes = self.processes.lock().unwrap();
        processes
            .get(&execution_id)
            .map(|entry| entry.terminate_requested.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// 非阻塞检查进程是否仍在运行
    pub fn is_running(&self, execution_id: i64) -> bool {
        let child = {
            let processes = self.processes.lock().unwrap();
            match processes.get(&execution_id) {
                Some(entry) => entry.child.clone(),
                None => return false,
            }
        };
        let running = match child.try_lock() {
            Ok(mut guard) => matches!(guard.try_wait(), Ok(None)),
            // 句柄正被wait持有，等待中即运行中
            Err(_) => true,
        };
        running
    }

    /// 非阻塞采样该执行的CPU%与常驻内存(MB)
    ///
    /// 首次调用只做预热（CPU增量无意义）返回None；进程已消亡时
    /// 丢弃缓存条目并返回None，不影响其他执行的采样。
    pub fn sample_metrics(&self, execution_id: i64) -> Option<(f64, f64)> {
        let pid = {
            let processes = self.processes.lock().unwrap();
            processes.get(&execution_id)?.pid
        };
        let sys_pid = sysinfo::Pid::from_u32(pid);

        let mut system = self.system.lock().unwrap();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[sys_pid]),
            true,
            ProcessRefreshKind::nothing().with_cpu().with_memory(),
        );

        let Some(process) = system.process(sys_pid) else {
            debug!("采样时进程已退出 (执行 {})", execution_id);
            self.metrics_primed.lock().unwrap().remove(&execution_id);
            return None;
        };

        let mut primed = self.metrics_primed.lock().unwrap();
        if primed.insert(execution_id) {
            // 预热采样，下一次开始返回有效增量
            return None;
        }

        let cpu = process.cpu_usage() as f64;
        let mem_mb = process.memory() as f64 / (1024.0 * 1024.0);
        Some((cpu, mem_mb))
    }

    /// 单调更新运行期峰值
    pub fn update_stats(&self, execution_id: i64, cpu: f64, mem_mb: f64) {
        let mut stats = self.stats.lock().unwrap();
        let entry = stats.entry(execution_id).or_default();
        if cpu > entry.max_cpu {
            entry.max_cpu = cpu;
        }
        if mem_mb > entry.max_mem_mb {
            entry.max_mem_mb = mem_mb;
        }
    }

    pub fn get_stats(&self, execution_id: i64) -> Option<(f64, f64)> {
        let stats = self.stats.lock().unwrap();
        stats
            .get(&execution_id)
            .map(|entry| (entry.max_cpu, entry.max_mem_mb))
    }

    pub fn clear_stats(&self, execution_id: i64) {
        self.stats.lock().unwrap().remove(&execution_id);
    }

    /// 取出所有到达落库间隔的峰值，打包为一次批量写
    pub fn take_due_flushes(&self, flush_interval: Duration) -> Vec<ExecutionStatsUpdate> {
        let now = Instant::now();
        let mut stats = self.stats.lock().unwrap();
        let mut due = Vec::new();
        for (&execution_id, entry) in stats.iter_mut() {
            let is_due = match entry.last_flush {
                Some(last) => now.duration_since(last) >= flush_interval,
                None => true,
            };
            if is_due {
                entry.last_flush = Some(now);
                due.push(ExecutionStatsUpdate {
                    execution_id,
                    max_cpu_percent: entry.max_cpu,
                    max_memory_mb: entry.max_mem_mb,
                });
            }
        }
        due
    }

    /// 回收陈旧缓存：已注销执行的条目全部丢弃，并施加硬性容量上限
    pub fn reclaim_caches(&self) {
        let running: BTreeSet<i64> = {
            let processes = self.processes.lock().unwrap();
            processes.keys().copied().collect()
        };

        let mut stats = self.stats.lock().unwrap();
        stats.retain(|id, _| running.contains(id));
        let mut reclaimed = 0usize;
        while stats.len() > self.max_cache_entries {
            stats.pop_first();
            reclaimed += 1;
        }
        drop(stats);

        let mut primed = self.metrics_primed.lock().unwrap();
        primed.retain(|id| running.contains(id));

        if reclaimed > 0 {
            debug!("缓存回收：逐出 {} 条最旧峰值记录", reclaimed);
        }
    }
}
