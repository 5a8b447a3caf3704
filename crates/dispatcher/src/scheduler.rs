//! job注册表与触发循环
//!
//! 每个在册任务对应一个后台tokio任务（job循环）：计算下一次触发
//! 时刻、睡到点、取分发池许可后把执行交给执行服务。执行在独立的
//! spawn里进行，执行侧的panic或耗时不会拖慢调度时钟。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kumo_core::{
    SchedulerHandle, SchedulerResult, Task, TaskExecutionService, TaskRepository,
};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::trigger::Trigger;

struct JobEntry {
    trigger: Trigger,
    next_run: Arc<RwLock<Option<DateTime<Utc>>>>,
    /// None表示job已暂停，触发器配置保留等待resume
    handle: Option<JoinHandle<()>>,
}

pub struct TaskScheduler {
    executor: Arc<dyn TaskExecutionService>,
    task_repo: Arc<dyn TaskRepository>,
    /// 分发池：限制同一时刻进入执行服务的触发数量
    dispatch_slots: Arc<Semaphore>,
    jobs: Mutex<HashMap<i64, JobEntry>>,
    /// 一次性重试job，键为 retry_{task_id}_{execution_id}
    retry_jobs: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl TaskScheduler {
    pub fn new(
        executor: Arc<dyn TaskExecutionService>,
        task_repo: Arc<dyn TaskRepository>,
        max_concurrent_dispatches: usize,
    ) -> Self {
        Self {
            executor,
            task_repo,
            dispatch_slots: Arc::new(Semaphore::new(max_concurrent_dispatches)),
            jobs: Mutex::new(HashMap::new()),
            retry_jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// 登记任务的周期job。同一任务重复调用时先摘除旧job再登记，
    /// 任意时刻一个任务至多一个在册job。
    ///
    /// 非active任务与immediate触发器不登记，直接返回Ok。
    pub fn add_job(&self, task: &Task) -> SchedulerResult<()> {
        self.remove_job(task.id);

        if !task.is_active() {
            debug!(task_id = task.id, status = ?task.status, "任务非active，跳过job登记");
            return Ok(());
        }

        let trigger = match Trigger::parse(&task.trigger_type, &task.trigger_value) {
            Ok(trigger) => trigger,
            Err(e) => {
                error!(task_id = task.id, error = %e, "触发器配置无效，job未登记");
                return Err(e);
            }
        };

        if matches!(trigger, Trigger::Immediate) {
            debug!(task_id = task.id, "immediate触发器不登记周期job");
            return Ok(());
        }

        let next_run = Arc::new(RwLock::new(None));
        let handle = self.spawn_job_loop(task.id, trigger.clone(), Arc::clone(&next_run));
        self.jobs.lock().unwrap().insert(
            task.id,
            JobEntry {
                trigger,
                next_run,
                handle: Some(handle),
            },
        );
        info!(
            task_id = task.id,
            trigger_type = %task.trigger_type,
            "任务job已登记"
        );
        Ok(())
    }

    fn spawn_job_loop(
        &self,
        task_id: i64,
        trigger: Trigger,
        next_run: Arc<RwLock<Option<DateTime<Utc>>>>,
    ) -> JoinHandle<()> {
        let executor = Arc::clone(&self.executor);
        let dispatch_slots = Arc::clone(&self.dispatch_slots);
        tokio::spawn(async move {
            loop {
                let now = Utc::now();
                let Some(fire_at) = trigger.next_fire(now) else {
                    warn!(task_id, "无法计算下一次触发时刻，job循环退出");
                    break;
                };
                *next_run.write().unwrap() = Some(fire_at);

                let delay = (fire_at - now).to_std().unwrap_or_default();
                tokio::time::sleep(delay).await;

                let permit = match Arc::clone(&dispatch_slots).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let executor = Arc::clone(&executor);
                tokio::spawn(async move {
                    let _permit = permit;
                    executor.run(task_id, 1, None).await;
                });

                if trigger.fires_once() {
                    debug!(task_id, "一次性触发器已触发，job循环退出");
                    break;
                }
            }
            *next_run.write().unwrap() = None;
        })
    }

    /// 摘除任务的在册job。job不存在时为no-op。
    pub fn remove_job(&self, task_id: i64) {
        if let Some(entry) = self.jobs.lock().unwrap().remove(&task_id) {
            if let Some(handle) = entry.handle {
                handle.abort();
            }
            info!(task_id, "任务job已摘除");
        }
    }

    /// 暂停job：中止触发循环但保留触发器配置，等待resume
    pub fn pause_job(&self, task_id: i64) {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(entry) = jobs.get_mut(&task_id) {
            if let Some(handle) = entry.handle.take() {
                handle.abort();
            }
            *entry.next_run.write().unwrap() = None;
            info!(task_id, "任务job已暂停");
        }
    }

    /// 恢复已暂停的job，从当前时刻重新计算触发时刻
    pub fn resume_job(&self, task_id: i64) {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(entry) = jobs.get_mut(&task_id) {
            if entry.handle.is_none() {
                let handle = self.spawn_job_loop(
                    task_id,
                    entry.trigger.clone(),
                    Arc::clone(&entry.next_run),
                );
                entry.handle = Some(handle);
                info!(task_id, "任务job已恢复");
            }
        }
    }

    /// 任务下一次触发时刻；未登记或已暂停时返回None
    pub fn next_run_time(&self, task_id: i64) -> Option<DateTime<Utc>> {
        let jobs = self.jobs.lock().unwrap();
        let entry = jobs.get(&task_id)?;
        entry.handle.as_ref()?;
        let next_run = *entry.next_run.read().unwrap();
        next_run
    }

    pub fn job_count(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    /// 进程启动时从仓储加载所有active任务并登记job。
    /// 单个任务的触发器配置错误只记日志，不影响其余任务。
    pub async fn load_jobs(&self) -> SchedulerResult<usize> {
        let tasks = self.task_repo.get_active_tasks().await?;
        let total = tasks.len();
        let mut registered = 0usize;
        for task in &tasks {
            match self.add_job(task) {
                Ok(()) => registered += 1,
                Err(e) => {
                    warn!(task_id = task.id, error = %e, "任务加载失败，已跳过");
                }
            }
        }
        info!(total, registered, "任务job加载完成");
        Ok(registered)
    }

    fn register_retry(
        &self,
        task_id: i64,
        execution_id: i64,
        attempt: i32,
        run_at: DateTime<Utc>,
    ) {
        let key = format!("retry_{task_id}_{execution_id}");
        let executor = Arc::clone(&self.executor);
        let dispatch_slots = Arc::clone(&self.dispatch_slots);
        let retry_jobs = Arc::clone(&self.retry_jobs);
        let job_key = key.clone();
        // 自清理要求job先出现在注册表里，就绪信号挡住提前触发
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            if ready_rx.await.is_err() {
                return;
            }
            let delay = (run_at - Utc::now()).to_std().unwrap_or_default();
            tokio::time::sleep(delay).await;
            // 触发即自清理，执行期间不再受shutdown的abort影响
            retry_jobs.lock().unwrap().remove(&job_key);
            let _permit = Arc::clone(&dispatch_slots).acquire_owned().await.ok();
            executor.run(task_id, attempt, None).await;
        });
        {
            let mut retries = self.retry_jobs.lock().unwrap();
            if let Some(old) = retries.insert(key.clone(), handle) {
                old.abort();
            }
        }
        let _ = ready_tx.send(());
        info!(task_id, execution_id, attempt, run_at = %run_at, job = %key, "重试job已登记");
    }

    pub fn retry_job_count(&self) -> usize {
        self.retry_jobs.lock().unwrap().len()
    }

    /// 中止所有job循环与待触发的重试job
    pub fn shutdown(&self) {
        let mut jobs = self.jobs.lock().unwrap();
        for (_, entry) in jobs.drain() {
            if let Some(handle) = entry.handle {
                handle.abort();
            }
        }
        drop(jobs);
        let mut retries = self.retry_jobs.lock().unwrap();
        for (_, handle) in retries.drain() {
            handle.abort();
        }
        info!("调度器已停止，所有job已摘除");
    }
}

#[async_trait]
impl SchedulerHandle for TaskScheduler {
    async fn schedule_retry(
        &self,
        task_id: i64,
        execution_id: i64,
        attempt: i32,
        run_at: DateTime<Utc>,
    ) -> SchedulerResult<()> {
        self.register_retry(task_id, execution_id, attempt, run_at);
        Ok(())
    }

    async fn unschedule(&self, task_id: i64) {
        self.remove_job(task_id);
    }
}
