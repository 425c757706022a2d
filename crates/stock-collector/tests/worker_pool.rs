//! 워커 풀 동작 테스트.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stock_collector::{
    CollectorError, FetchJob, FetchOutcome, JobStatus, Result, StockFetcher, WorkerPool,
    JOB_TIMEOUT,
};
use tokio_util::sync::CancellationToken;

/// 종목 코드에 따라 동작을 바꾸는 수집기.
///
/// - `block*`: 취소될 때까지 대기
/// - `slow*`: 10분 대기
/// - `savefail*`: 수집 성공, 저장 실패
/// - `missing*`: 수집 실패
/// - `panic*`: panic
/// - 그 외: 성공
#[derive(Default)]
struct ScriptedFetcher {
    started: AtomicUsize,
}

#[async_trait]
impl StockFetcher for ScriptedFetcher {
    async fn fetch_stock_daily(
        &self,
        symbol: &str,
        _provider_hint: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome> {
        self.started.fetch_add(1, Ordering::SeqCst);

        if symbol.starts_with("block") {
            cancel.cancelled().await;
            return Err(CollectorError::Cancelled);
        }
        if symbol.starts_with("slow") {
            tokio::time::sleep(Duration::from_secs(600)).await;
        }
        if symbol.starts_with("panic") {
            panic!("decimal overflow while parsing {symbol}");
        }
        if symbol.starts_with("missing") {
            return Err(CollectorError::Data(stock_data::DataError::AllProvidersFailed {
                symbol: symbol.to_string(),
                last_error: "HTTP status 404".into(),
            }));
        }

        let mut outcome = FetchOutcome {
            provider: "fake".into(),
            record_count: 20,
            ..FetchOutcome::empty(symbol)
        };
        if symbol.starts_with("savefail") {
            outcome.save_error = Some("database unavailable".into());
        } else {
            outcome.saved = true;
            outcome.rows_affected = 20;
        }
        Ok(outcome)
    }
}

async fn wait_until(pool: &WorkerPool, done: impl Fn(&WorkerPool) -> bool) {
    for _ in 0..500 {
        if done(pool) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached: {:?}", pool.stats());
}

#[tokio::test]
async fn test_backpressure_on_unstarted_pool() {
    let pool = WorkerPool::new(3, Arc::new(ScriptedFetcher::default()));

    for i in 0..6 {
        pool.submit(FetchJob::new(format!("job_{i}"), "2330", None))
            .unwrap();
    }
    let err = pool
        .submit(FetchJob::new("job_6", "2330", None))
        .unwrap_err();

    assert!(matches!(err, CollectorError::QueueFull));
    let stats = pool.stats();
    assert_eq!(stats.workers, 3);
    assert_eq!(stats.queue_size, 6);
    assert_eq!(stats.pending_tasks, 6);
}

#[tokio::test]
async fn test_jobs_reach_terminal_states() {
    let fetcher = Arc::new(ScriptedFetcher::default());
    let pool = WorkerPool::new(2, fetcher.clone());
    pool.start();

    pool.submit(FetchJob::new("ok", "2330", Some("fubon".into())))
        .unwrap();
    pool.submit(FetchJob::new("missing", "missing-9999", None))
        .unwrap();
    pool.submit(FetchJob::new("savefail", "savefail-2317", None))
        .unwrap();

    wait_until(&pool, |p| {
        let s = p.stats();
        s.completed_tasks + s.failed_tasks == 3
    })
    .await;

    let ok = pool.get_task("ok").unwrap();
    assert_eq!(ok.status, JobStatus::Completed);
    assert!(ok.error.is_none());
    assert_eq!(ok.result.as_ref().unwrap().rows_affected, 20);
    assert!(ok.finished_at.is_some());

    let missing = pool.get_task("missing").unwrap();
    assert_eq!(missing.status, JobStatus::Failed);
    assert!(missing.result.is_none());
    assert!(missing.error.unwrap().contains("All providers failed"));

    // 저장 실패: 실패로 기록하되 수집 결과는 유지
    let savefail = pool.get_task("savefail").unwrap();
    assert_eq!(savefail.status, JobStatus::Failed);
    assert!(savefail.error.unwrap().contains("database unavailable"));
    assert_eq!(savefail.result.unwrap().record_count, 20);

    pool.stop().await;
    assert_eq!(fetcher.started.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_stop_drains_running_jobs() {
    let fetcher = Arc::new(ScriptedFetcher::default());
    let pool = WorkerPool::new(3, fetcher.clone());
    pool.start();

    for i in 0..3 {
        pool.submit(FetchJob::new(format!("block_{i}"), format!("block-{i}"), None))
            .unwrap();
    }

    wait_until(&pool, |p| p.stats().running_tasks == 3).await;

    pool.stop().await;

    let jobs = pool.get_all_tasks();
    assert_eq!(jobs.len(), 3);
    for job in jobs {
        assert_eq!(job.status, JobStatus::Failed, "{}", job.job_id);
        assert_eq!(job.error.as_deref(), Some("job cancelled"));
    }
    assert_eq!(fetcher.started.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_stop_abandons_pending_jobs() {
    let pool = WorkerPool::new(1, Arc::new(ScriptedFetcher::default()));
    pool.start();

    pool.submit(FetchJob::new("running", "block-1", None)).unwrap();
    wait_until(&pool, |p| p.stats().running_tasks == 1).await;
    pool.submit(FetchJob::new("queued", "2330", None)).unwrap();

    pool.stop().await;

    assert_eq!(pool.get_task("running").unwrap().status, JobStatus::Failed);
    assert_eq!(pool.get_task("queued").unwrap().status, JobStatus::Pending);

    let stats = pool.stats();
    assert_eq!(stats.pending_tasks, 1);
    assert_eq!(stats.queue_size, 1);
}

#[tokio::test]
async fn test_fetcher_panic_fails_job_and_keeps_executor() {
    let fetcher = Arc::new(ScriptedFetcher::default());
    let pool = WorkerPool::new(1, fetcher.clone());
    pool.start();

    pool.submit(FetchJob::new("p", "panic-2330", None)).unwrap();
    pool.submit(FetchJob::new("q", "2317", None)).unwrap();

    wait_until(&pool, |p| {
        let s = p.stats();
        s.completed_tasks + s.failed_tasks == 2
    })
    .await;

    let panicked = pool.get_task("p").unwrap();
    assert_eq!(panicked.status, JobStatus::Failed);
    assert!(panicked.error.unwrap().contains("decimal overflow"));

    // 같은 실행자가 다음 작업을 계속 처리
    assert_eq!(pool.get_task("q").unwrap().status, JobStatus::Completed);
    assert_eq!(fetcher.started.load(Ordering::SeqCst), 2);

    pool.stop().await;
    assert_eq!(pool.stats().queue_size, 0);
}

#[tokio::test(start_paused = true)]
async fn test_job_deadline_fails_slow_fetch() {
    let pool = WorkerPool::new(1, Arc::new(ScriptedFetcher::default()));
    pool.start();

    pool.submit(FetchJob::new("slow", "slow-2330", None)).unwrap();

    tokio::time::sleep(JOB_TIMEOUT + Duration::from_secs(1)).await;
    wait_until(&pool, |p| p.stats().failed_tasks == 1).await;

    let job = pool.get_task("slow").unwrap();
    assert!(job.error.unwrap().contains("timed out"));

    pool.stop().await;
}
