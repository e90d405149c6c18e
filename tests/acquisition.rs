use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use bmspoll::{
    AcquisitionConfig, AcquisitionOrchestrator, DeliveryError, DeliveryReceipt, FakeArgs,
    ReportSink, SessionEnd, SessionReport,
};

#[derive(Debug, Default)]
struct CountingSink {
    posted: AtomicUsize,
    devices_seen: AtomicUsize,
}

#[async_trait]
impl ReportSink for CountingSink {
    async fn post(&self, report: &SessionReport) -> Result<DeliveryReceipt, DeliveryError> {
        self.posted.fetch_add(1, Ordering::SeqCst);
        self.devices_seen.fetch_add(report.len(), Ordering::SeqCst);
        Ok(DeliveryReceipt::accepted().with_next_interval(Duration::from_secs(120)))
    }
}

fn orchestrator(fixture: &str, sink: Arc<CountingSink>) -> AcquisitionOrchestrator {
    let fake_args = FakeArgs::builder()
        .scan_fixture(fixture)
        .expect("fixture should parse")
        .chunk_size(9)
        .build();
    AcquisitionOrchestrator::new(
        bmspoll::fake_hardware_client(fake_args),
        sink,
        AcquisitionConfig::default(),
    )
}

#[tokio::test(start_paused = true)]
async fn rounds_repeat_on_the_interval_the_receiver_asks_for() {
    let sink = Arc::new(CountingSink::default());
    let orchestrator = orchestrator(
        "hci0|AA:01|xiaoxiang-1|-43;hci0|AA:02|xiaoxiang-2|-50|device-error",
        Arc::clone(&sink),
    );
    let cancel = CancellationToken::new();
    let started_at = tokio::time::Instant::now();
    let mut waits = Vec::new();
    let mut ends = Vec::new();

    orchestrator
        .run_forever(cancel.clone(), |summary| {
            waits.push(summary.next_wait());
            ends.extend(summary.sessions().iter().map(|session| session.end()));
            if waits.len() == 2 {
                cancel.cancel();
            }
        })
        .await;

    assert_eq!(vec![Duration::from_secs(120); 2], waits);
    assert_eq!(vec![SessionEnd::ReachedTickLimit; 4], ends);
    assert_eq!(2, sink.posted.load(Ordering::SeqCst));
    assert_eq!(2, sink.devices_seen.load(Ordering::SeqCst));
    assert!(started_at.elapsed() >= Duration::from_secs(120));
    assert!(started_at.elapsed() < Duration::from_secs(240));
}

#[tokio::test(start_paused = true)]
async fn cancelled_before_discovery_delivers_nothing() {
    let sink = Arc::new(CountingSink::default());
    let orchestrator = orchestrator("hci0|AA:01|speaker|-43", Arc::clone(&sink));
    let cancel = CancellationToken::new();
    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(45)).await;
            cancel.cancel();
        })
    };

    let mut rounds = 0;
    orchestrator.run_forever(cancel, |_| rounds += 1).await;
    canceller.await.expect("canceller should finish");

    assert_eq!(0, rounds);
    assert_eq!(0, sink.posted.load(Ordering::SeqCst));
}
