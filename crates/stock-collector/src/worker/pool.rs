//! 워커 풀.
//!
//! 고정 수의 실행자가 하나의 bounded 큐를 공유합니다. 실행자는 작업을 꺼내
//! `Running`으로 표시하고 수집기를 호출한 뒤 결과 채널로 `TaskResult`를 보냅니다.
//! 종료 상태(`Completed`/`Failed`)는 단일 결과 처리 태스크만 기록합니다.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use super::job::{FetchJob, JobStatus, StockFetcher, TaskResult};
use crate::error::{CollectorError, Result};

/// 작업당 제한 시간.
pub const JOB_TIMEOUT: Duration = Duration::from_secs(120);

/// 워커 풀 통계.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub workers: usize,
    pub queue_size: usize,
    pub queue_capacity: usize,
    pub total_tasks: usize,
    pub pending_tasks: usize,
    pub running_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
}

struct PoolHandles {
    executors: Vec<JoinHandle<()>>,
    processor: JoinHandle<()>,
}

struct PoolInner {
    workers: usize,
    capacity: usize,
    job_timeout: Duration,
    retention: Option<Duration>,
    fetcher: Arc<dyn StockFetcher>,
    sender: Mutex<Option<mpsc::Sender<FetchJob>>>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<FetchJob>>>,
    registry: Mutex<HashMap<String, FetchJob>>,
    cancel: CancellationToken,
}

/// 종목 수집 워커 풀.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
    handles: Mutex<Option<PoolHandles>>,
}

impl WorkerPool {
    /// 실행자 수와 수집기로 풀을 생성합니다. 큐 용량은 실행자 수의 2배입니다.
    ///
    /// 생성만 하고 `start` 전까지는 작업을 처리하지 않습니다.
    pub fn new(workers: usize, fetcher: Arc<dyn StockFetcher>) -> Self {
        let workers = workers.max(1);
        let capacity = workers * 2;
        let (sender, receiver) = mpsc::channel(capacity);

        Self {
            inner: Arc::new(PoolInner {
                workers,
                capacity,
                job_timeout: JOB_TIMEOUT,
                retention: None,
                fetcher,
                sender: Mutex::new(Some(sender)),
                receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
                registry: Mutex::new(HashMap::new()),
                cancel: CancellationToken::new(),
            }),
            handles: Mutex::new(None),
        }
    }

    /// 작업당 제한 시간을 변경합니다. `start` 이전에만 유효합니다.
    #[must_use]
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.job_timeout = timeout;
        }
        self
    }

    /// 종료된 작업 보존 기간. `None`이면 계속 보존합니다.
    #[must_use]
    pub fn with_retention(mut self, retention: Option<Duration>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.retention = retention;
        }
        self
    }

    /// 실행자 수.
    pub fn workers(&self) -> usize {
        self.inner.workers
    }

    /// 실행자와 결과 처리 태스크를 시작합니다.
    pub fn start(&self) {
        let mut handles = lock(&self.handles);
        if handles.is_some() {
            warn!("워커 풀이 이미 실행 중입니다");
            return;
        }
        if self.inner.cancel.is_cancelled() {
            warn!("종료된 워커 풀은 다시 시작할 수 없습니다");
            return;
        }

        info!(workers = self.inner.workers, "워커 풀 시작");

        let (result_tx, result_rx) = mpsc::channel(self.inner.capacity);

        let executors = (0..self.inner.workers)
            .map(|id| {
                let inner = Arc::clone(&self.inner);
                let results = result_tx.clone();
                tokio::spawn(async move { inner.run_executor(id, results).await })
            })
            .collect();
        drop(result_tx);

        let inner = Arc::clone(&self.inner);
        let processor = tokio::spawn(async move { inner.run_processor(result_rx).await });

        *handles = Some(PoolHandles {
            executors,
            processor,
        });
    }

    /// 작업을 등록하고 큐에 넣습니다. 큐가 가득 차면 기다리지 않고 실패합니다.
    pub fn submit(&self, job: FetchJob) -> Result<()> {
        if self.inner.cancel.is_cancelled() {
            return Err(CollectorError::ShuttingDown);
        }
        let sender = lock(&self.inner.sender)
            .clone()
            .ok_or(CollectorError::ShuttingDown)?;

        {
            let mut registry = self.inner.lock_registry();
            if registry.contains_key(&job.job_id) {
                return Err(CollectorError::InvalidInput(format!(
                    "duplicate job id: {}",
                    job.job_id
                )));
            }
            registry.insert(job.job_id.clone(), job.clone());
        }

        let job_id = job.job_id.clone();
        let symbol = job.symbol.clone();

        match sender.try_send(job) {
            Ok(()) => {
                debug!(job_id = %job_id, symbol = %symbol, "작업 제출");
                Ok(())
            }
            Err(err) => {
                self.inner.lock_registry().remove(&job_id);
                match err {
                    TrySendError::Full(_) => {
                        warn!(job_id = %job_id, symbol = %symbol, "작업 큐 포화");
                        Err(CollectorError::QueueFull)
                    }
                    TrySendError::Closed(_) => Err(CollectorError::ShuttingDown),
                }
            }
        }
    }

    /// 풀을 종료합니다.
    ///
    /// 진행 중인 작업은 취소되어 종료 상태가 기록된 뒤 반환합니다.
    /// 큐에 남은 Pending 작업은 그대로 남습니다.
    pub async fn stop(&self) {
        info!("워커 풀 종료 중");

        self.inner.cancel.cancel();
        lock(&self.inner.sender).take();

        let handles = lock(&self.handles).take();
        if let Some(handles) = handles {
            for executor in handles.executors {
                if let Err(e) = executor.await {
                    error!(error = %e, "실행자 태스크 비정상 종료");
                }
            }
            if let Err(e) = handles.processor.await {
                error!(error = %e, "결과 처리 태스크 비정상 종료");
            }
        }

        info!("워커 풀 종료 완료");
    }

    /// 실행 중인지 확인.
    pub fn is_running(&self) -> bool {
        lock(&self.handles).is_some() && !self.inner.cancel.is_cancelled()
    }

    /// 상태별 작업 수와 큐 현황.
    pub fn stats(&self) -> WorkerStats {
        let registry = self.inner.lock_registry();
        let mut stats = WorkerStats {
            workers: self.inner.workers,
            queue_capacity: self.inner.capacity,
            total_tasks: registry.len(),
            ..WorkerStats::default()
        };

        for job in registry.values() {
            match job.status {
                JobStatus::Pending => stats.pending_tasks += 1,
                JobStatus::Running => stats.running_tasks += 1,
                JobStatus::Completed => stats.completed_tasks += 1,
                JobStatus::Failed => stats.failed_tasks += 1,
            }
        }
        // 큐에 있는 작업은 모두 Pending으로 등록되어 있음 (종료 후 남은 작업 포함)
        stats.queue_size = stats.pending_tasks;
        stats
    }

    /// 전체 작업 스냅샷 (생성 순).
    pub fn get_all_tasks(&self) -> Vec<FetchJob> {
        self.snapshot(|_| true)
    }

    /// ID가 `prefix`로 시작하는 작업 스냅샷.
    pub fn tasks_by_prefix(&self, prefix: &str) -> Vec<FetchJob> {
        self.snapshot(|job| job.job_id.starts_with(prefix))
    }

    /// 단일 작업 조회.
    pub fn get_task(&self, job_id: &str) -> Option<FetchJob> {
        self.inner.lock_registry().get(job_id).cloned()
    }

    /// 보존 기간이 지난 종료 작업을 제거합니다.
    pub fn evict_expired(&self) -> usize {
        self.evict_expired_at(Utc::now())
    }

    /// `now` 기준으로 보존 기간이 지난 종료 작업을 제거합니다.
    pub fn evict_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut registry = self.inner.lock_registry();
        self.inner.evict_locked(&mut registry, now)
    }

    fn snapshot(&self, filter: impl Fn(&FetchJob) -> bool) -> Vec<FetchJob> {
        let mut jobs: Vec<FetchJob> = self
            .inner
            .lock_registry()
            .values()
            .filter(|job| filter(job))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });
        jobs
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.inner.workers)
            .field("capacity", &self.inner.capacity)
            .field("job_timeout", &self.inner.job_timeout)
            .field("retention", &self.inner.retention)
            .finish()
    }
}

impl PoolInner {
    fn lock_registry(&self) -> MutexGuard<'_, HashMap<String, FetchJob>> {
        lock(&self.registry)
    }

    async fn run_executor(&self, id: usize, results: mpsc::Sender<TaskResult>) {
        debug!(worker_id = id, "실행자 시작");

        loop {
            let next = {
                let mut receiver = self.receiver.lock().await;
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => None,
                    job = receiver.recv() => job,
                }
            };

            let Some(job) = next else { break };

            let span = stock_core::symbol_span!("fetch_job", job.symbol, job.job_id);
            let result = self.execute(&job).instrument(span).await;

            // 결과 처리기는 모든 송신자가 닫힐 때까지 수신하므로 전송은 실패하지 않습니다
            if results.send(result).await.is_err() {
                error!(worker_id = id, job_id = %job.job_id, "결과 채널이 닫혔습니다");
                break;
            }
        }

        debug!(worker_id = id, "실행자 종료");
    }

    async fn execute(&self, job: &FetchJob) -> TaskResult {
        self.mark_running(&job.job_id);
        debug!("작업 실행");

        let started = Instant::now();
        let cancel = self.cancel.child_token();
        let fetch = AssertUnwindSafe(self.fetcher.fetch_stock_daily(
            &job.symbol,
            job.preferred_provider.as_deref(),
            &cancel,
        ))
        .catch_unwind();

        let fetched = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CollectorError::Cancelled),
            res = tokio::time::timeout(self.job_timeout, fetch) => match res {
                Ok(Ok(fetched)) => fetched,
                Ok(Err(panic)) => {
                    let message = panic_message(panic.as_ref());
                    error!(panic = %message, "수집 중 panic 발생");
                    Err(CollectorError::Panicked(message))
                }
                Err(_) => Err(CollectorError::Timeout(self.job_timeout)),
            }
        };

        TaskResult::from_fetch(job, fetched, started.elapsed())
    }

    fn mark_running(&self, job_id: &str) {
        if let Some(job) = self.lock_registry().get_mut(job_id) {
            if job.status == JobStatus::Pending {
                job.status = JobStatus::Running;
            }
        }
    }

    async fn run_processor(&self, mut results: mpsc::Receiver<TaskResult>) {
        while let Some(result) = results.recv().await {
            self.apply(result);
        }
        debug!("결과 처리 태스크 종료");
    }

    fn apply(&self, result: TaskResult) {
        let mut registry = self.lock_registry();

        match registry.get_mut(&result.job_id) {
            Some(job) if !job.status.is_terminal() => {
                job.finished_at = Some(result.completed_at);
                job.result = result.outcome;
                if result.success {
                    job.status = JobStatus::Completed;
                    info!(
                        job_id = %result.job_id,
                        symbol = %result.symbol,
                        records = result.record_count,
                        elapsed_ms = result.duration.as_millis() as u64,
                        "작업 완료"
                    );
                } else {
                    job.status = JobStatus::Failed;
                    job.error = result.error;
                    error!(
                        job_id = %result.job_id,
                        symbol = %result.symbol,
                        error = job.error.as_deref().unwrap_or_default(),
                        "작업 실패"
                    );
                }
            }
            Some(_) => {
                warn!(job_id = %result.job_id, "이미 종료된 작업의 결과 무시");
            }
            None => {
                debug!(job_id = %result.job_id, "등록되지 않은 작업의 결과 무시");
            }
        }

        self.evict_locked(&mut registry, Utc::now());
    }

    fn evict_locked(&self, registry: &mut HashMap<String, FetchJob>, now: DateTime<Utc>) -> usize {
        let Some(retention) = self.retention else {
            return 0;
        };
        let Ok(retention) = chrono::Duration::from_std(retention) else {
            return 0;
        };

        let before = registry.len();
        registry.retain(|_, job| match job.finished_at {
            Some(finished) if job.status.is_terminal() => now - finished <= retention,
            _ => true,
        });

        let evicted = before - registry.len();
        if evicted > 0 {
            debug!(evicted = evicted, "만료된 작업 제거");
        }
        evicted
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
