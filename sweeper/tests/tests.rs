use async_trait::async_trait;
use log::LevelFilter;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use sweeper::{Job, JobResult, PeriodicTask, PeriodicTaskOptions, TaskError};

fn setup_logger() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(LevelFilter::Debug)
        .try_init();
}

#[derive(Debug, Default)]
struct CountingJob {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Job for CountingJob {
    fn name(&self) -> &str {
        "counting"
    }

    async fn run(&self) -> JobResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(2)
    }
}

#[derive(Debug)]
struct FailingJob;

#[async_trait]
impl Job for FailingJob {
    fn name(&self) -> &str {
        "failing"
    }

    async fn run(&self) -> JobResult {
        Err("store unreachable".into())
    }
}

#[derive(Debug)]
struct SlowJob;

#[async_trait]
impl Job for SlowJob {
    fn name(&self) -> &str {
        "slow"
    }

    async fn run(&self) -> JobResult {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(0)
    }
}

fn fast_options() -> PeriodicTaskOptions {
    PeriodicTaskOptions {
        interval: Duration::from_millis(20),
        initial_delay: Duration::ZERO,
        run_timeout: Duration::from_millis(200),
    }
}

#[tokio::test]
async fn test_job_runs_periodically() {
    setup_logger();
    let calls = Arc::new(AtomicUsize::new(0));
    let task = PeriodicTask::start_with_opt(
        CountingJob {
            calls: Arc::clone(&calls),
        },
        fast_options(),
    );

    tokio::time::sleep(Duration::from_millis(150)).await;

    assert!(calls.load(Ordering::SeqCst) >= 3, "job should have run several times");
    assert!(task.runs() >= 3);
    assert_eq!(task.failures(), 0);
    assert_eq!(task.processed(), task.runs() * 2);
}

#[tokio::test]
async fn test_run_now_returns_job_result() {
    setup_logger();
    let opt = PeriodicTaskOptions {
        interval: Duration::from_secs(3600),
        ..fast_options()
    };
    let task = PeriodicTask::start_with_opt(CountingJob::default(), opt);

    assert_eq!(task.run_now().await, Ok(2));
    assert_eq!(task.run_now().await, Ok(2));
    // one scheduled run at start plus the two requested
    assert_eq!(task.runs(), 3);
}

#[tokio::test]
async fn test_failures_are_counted_and_reported() {
    setup_logger();
    let opt = PeriodicTaskOptions {
        interval: Duration::from_secs(3600),
        ..fast_options()
    };
    let task = PeriodicTask::start_with_opt(FailingJob, opt);

    let result = task.run_now().await;
    assert!(matches!(result, Err(TaskError::Failed(ref name, ref msg)) if name == "failing" && msg.contains("unreachable")));
    assert!(task.failures() >= 1);
    assert_eq!(task.processed(), 0);
}

#[tokio::test]
async fn test_run_timeout_is_enforced() {
    setup_logger();
    let opt = PeriodicTaskOptions {
        interval: Duration::from_secs(3600),
        initial_delay: Duration::from_secs(3600),
        run_timeout: Duration::from_millis(50),
    };
    let task = PeriodicTask::start_with_opt(SlowJob, opt);
    task.stop();

    // a stopped task never runs the job
    assert_eq!(
        task.run_now().await,
        Err(TaskError::Stopped("slow".to_string()))
    );

    let opt = PeriodicTaskOptions {
        interval: Duration::from_secs(3600),
        initial_delay: Duration::ZERO,
        run_timeout: Duration::from_millis(50),
    };
    let task = PeriodicTask::start_with_opt(SlowJob, opt);
    // the first scheduled run times out, then the requested one does too
    let result = task.run_now().await;
    assert!(matches!(result, Err(TaskError::TimedOut(_, _))));
}

#[tokio::test]
async fn test_drop_stops_job() {
    setup_logger();
    let calls = Arc::new(AtomicUsize::new(0));
    let task = PeriodicTask::start_with_opt(
        CountingJob {
            calls: Arc::clone(&calls),
        },
        fast_options(),
    );
    tokio::time::sleep(Duration::from_millis(60)).await;
    drop(task);
    tokio::time::sleep(Duration::from_millis(20)).await;

    let after_drop = calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(calls.load(Ordering::SeqCst), after_drop);
}

#[tokio::test]
async fn test_run_now_during_initial_delay() {
    setup_logger();
    let calls = Arc::new(AtomicUsize::new(0));
    let opt = PeriodicTaskOptions {
        interval: Duration::from_secs(3600),
        initial_delay: Duration::from_secs(3600),
        run_timeout: Duration::from_millis(200),
    };
    let task = PeriodicTask::start_with_opt(
        CountingJob {
            calls: Arc::clone(&calls),
        },
        opt,
    );

    let result = tokio::time::timeout(Duration::from_secs(2), task.run_now())
        .await
        .expect("requested run should not wait for the initial delay");
    assert_eq!(result, Ok(2));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(task.runs(), 1);

    task.stop();
    assert_eq!(
        task.run_now().await,
        Err(TaskError::Stopped("counting".to_string()))
    );
}

#[tokio::test]
async fn test_zero_interval_is_raised_to_minimum() {
    setup_logger();
    let calls = Arc::new(AtomicUsize::new(0));
    let opt = PeriodicTaskOptions {
        interval: Duration::ZERO,
        ..fast_options()
    };
    let task = PeriodicTask::start_with_opt(
        CountingJob {
            calls: Arc::clone(&calls),
        },
        opt,
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(calls.load(Ordering::SeqCst) >= 1);
    assert_eq!(task.run_now().await, Ok(2));
    assert!(sweeper::MIN_INTERVAL > Duration::ZERO);
}
