//! End-to-end scheduling against a real local webhook receiver.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{extract::State, http::StatusCode, routing::post, Router};
use chrono::Utc;
use cronhook_core::config::SchedulerConfig;
use cronhook_core::{JobId, RegisterJob};
use cronhook_scheduler::db::init_db;
use cronhook_scheduler::{
    JobEvent, JobStore, PauseReason, ReqwestTransport, SchedulerService, SqliteHistoryStore,
    SqliteJobStore, SystemClock,
};
use rusqlite::Connection;

#[derive(Clone)]
struct Receiver {
    hits: Arc<AtomicUsize>,
    status: StatusCode,
}

async fn hook(State(rx): State<Receiver>) -> StatusCode {
    rx.hits.fetch_add(1, Ordering::SeqCst);
    rx.status
}

async fn spawn_receiver(status: StatusCode) -> (SocketAddr, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new().route("/hook", post(hook)).with_state(Receiver {
        hits: hits.clone(),
        status,
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    (addr, hits)
}

fn service(config: &SchedulerConfig) -> (SchedulerService, Arc<SqliteJobStore>) {
    let conn = Connection::open_in_memory().unwrap();
    init_db(&conn).unwrap();
    let jobs = Arc::new(SqliteJobStore::new(conn));
    let conn = Connection::open_in_memory().unwrap();
    init_db(&conn).unwrap();
    let history = Arc::new(SqliteHistoryStore::new(conn));

    let service = SchedulerService::new(
        jobs.clone(),
        history,
        Arc::new(ReqwestTransport::new()),
        Arc::new(SystemClock),
        config,
    )
    .unwrap();
    (service, jobs)
}

fn every_second(addr: SocketAddr) -> RegisterJob {
    let now = Utc::now();
    RegisterJob {
        title: "every second".into(),
        cron_expr: "* * * * * *".into(),
        is_recurring: true,
        start_at: Some(now),
        end_at: Some(now + chrono::Duration::hours(1)),
        webhook_url: format!("http://{addr}/hook"),
        ..Default::default()
    }
}

#[tokio::test]
async fn every_second_job_accumulates_history() {
    let (addr, hits) = spawn_receiver(StatusCode::OK).await;
    let (service, _) = service(&SchedulerConfig::default());
    let job = service.register(every_second(addr)).unwrap();

    service.start();
    tokio::time::sleep(Duration::from_millis(2500)).await;
    service.shutdown().await;

    let samples = service.history_for_job(job.id, 100).unwrap();
    assert!(samples.len() >= 2, "got {} samples", samples.len());
    assert!(samples.iter().all(|s| s.status_code == 200));
    assert!(samples.windows(2).all(|w| w[0].fired_at >= w[1].fired_at));
    assert!(hits.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn paused_job_leaves_the_index_and_stops_firing() {
    let (addr, hits) = spawn_receiver(StatusCode::OK).await;
    let (service, _) = service(&SchedulerConfig::default());
    let job = service.register(every_second(addr)).unwrap();

    service.start();
    tokio::time::sleep(Duration::from_millis(1200)).await;
    service.pause(job.id).unwrap();
    assert!(!service.index().contains(job.id));

    // let any dispatch launched before the pause land
    tokio::time::sleep(Duration::from_millis(300)).await;
    let before = hits.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(hits.load(Ordering::SeqCst), before);
    assert!(!service.index().contains(job.id));

    service.shutdown().await;
}

#[tokio::test]
async fn resume_resets_failures_and_reindexes() {
    let (addr, _) = spawn_receiver(StatusCode::OK).await;
    let (service, jobs) = service(&SchedulerConfig::default());
    let job = service.register(every_second(addr)).unwrap();

    service.pause(job.id).unwrap();
    for _ in 0..7 {
        jobs.increment_failures(job.id, Utc::now()).unwrap();
    }
    assert_eq!(service.get(job.id).unwrap().failure_count, 7);

    let resumed = service.resume(job.id).unwrap();
    assert_eq!(resumed.failure_count, 0);
    assert_eq!(service.get(job.id).unwrap().failure_count, 0);
    assert!(resumed.active);
    let due = service.index().due_at(job.id).unwrap();
    assert!(due >= Utc::now() - chrono::Duration::seconds(1));
}

#[tokio::test]
async fn failing_webhook_is_auto_paused() {
    let (addr, hits) = spawn_receiver(StatusCode::INTERNAL_SERVER_ERROR).await;
    let config = SchedulerConfig {
        failure_threshold: 2,
        ..Default::default()
    };
    let (service, _) = service(&config);

    let paused: Arc<Mutex<Vec<(JobId, PauseReason)>>> = Arc::default();
    let sink = paused.clone();
    service.listeners().register(Arc::new(move |e: &JobEvent| {
        if let JobEvent::Paused { job, reason } = e {
            sink.lock().unwrap().push((job.id, *reason));
        }
    }));

    let job = service.register(every_second(addr)).unwrap();
    service.start();
    tokio::time::sleep(Duration::from_millis(4500)).await;
    service.shutdown().await;

    let stored = service.get(job.id).unwrap();
    assert!(!stored.active);
    assert!(!service.index().contains(job.id));
    assert_eq!(
        *paused.lock().unwrap(),
        vec![(job.id, PauseReason::FailureThreshold)]
    );
    // two failures reach the threshold; the pausing tick sends nothing
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert_eq!(service.history_for_job(job.id, 100).unwrap().len(), 2);
}
