//! Fire-and-forget request audit trail.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use netbill_db::models::audit::NewAuditLog;
use netbill_db::repositories::audit_repo::AuditRepository;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::metrics::Metrics;

pub const AUDIT_CHANNEL_CAPACITY: usize = 1024;
const DRAIN_GRACE: Duration = Duration::from_secs(5);

#[async_trait]
pub trait AuditSink: Send + Sync + 'static {
    async fn write(&self, entry: &NewAuditLog) -> Result<()>;
}

#[async_trait]
impl AuditSink for AuditRepository {
    async fn write(&self, entry: &NewAuditLog) -> Result<()> {
        self.insert(entry).await
    }
}

#[derive(Clone)]
pub struct AuditService {
    tx: mpsc::Sender<NewAuditLog>,
    metrics: Arc<Metrics>,
}

impl AuditService {
    /// Spawns the single writer task.
    pub fn start<S: AuditSink>(
        sink: S,
        metrics: Arc<Metrics>,
        shutdown: broadcast::Receiver<()>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(AUDIT_CHANNEL_CAPACITY);
        let handle = tokio::spawn(run_writer(sink, rx, shutdown));
        (Self { tx, metrics }, handle)
    }

    pub fn record(&self, entry: NewAuditLog) {
        match self.tx.try_send(entry) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(entry)) => {
                Metrics::incr(&self.metrics.audit_dropped);
                warn!("Audit channel full, dropping record for {} {}", entry.method, entry.path);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Audit writer stopped; record discarded");
            }
        }
    }
}

async fn write_one<S: AuditSink>(sink: &S, entry: &NewAuditLog) {
    if let Err(e) = sink.write(entry).await {
        warn!("Failed to write audit log for request {}: {:#}", entry.request_id, e);
    }
}

async fn run_writer<S: AuditSink>(
    sink: S,
    mut rx: mpsc::Receiver<NewAuditLog>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            entry = rx.recv() => match entry {
                Some(entry) => write_one(&sink, &entry).await,
                None => return,
            },
            _ = shutdown.recv() => break,
        }
    }

    rx.close();
    let drained = tokio::time::timeout(DRAIN_GRACE, async {
        let mut count = 0usize;
        while let Some(entry) = rx.recv().await {
            write_one(&sink, &entry).await;
            count += 1;
        }
        count
    })
    .await;
    match drained {
        Ok(count) => info!("Audit writer drained {} pending records", count),
        Err(_) => warn!("Audit writer drain exceeded {:?}; remaining records dropped", DRAIN_GRACE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct MemorySink(Arc<Mutex<Vec<NewAuditLog>>>);

    #[async_trait]
    impl AuditSink for MemorySink {
        async fn write(&self, entry: &NewAuditLog) -> Result<()> {
            self.0.lock().unwrap().push(entry.clone());
            Ok(())
        }
    }

    fn entry(path: &str) -> NewAuditLog {
        NewAuditLog {
            request_id: "req-1".into(),
            tenant_id: None,
            user_id: None,
            method: "GET".into(),
            path: path.into(),
            status: 200,
            duration_ms: 3,
            ip: Some("10.0.0.1".into()),
            user_agent: None,
        }
    }

    #[tokio::test]
    async fn pending_records_are_drained_on_shutdown() {
        let sink = MemorySink::default();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (service, handle) = AuditService::start(sink.clone(), Arc::new(Metrics::new().unwrap()), shutdown_rx);

        for i in 0..10 {
            service.record(entry(&format!("/api/v1/clients/{i}")));
        }
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        assert_eq!(sink.0.lock().unwrap().len(), 10);
    }

    #[tokio::test]
    async fn records_after_shutdown_are_discarded() {
        let sink = MemorySink::default();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (service, handle) = AuditService::start(sink.clone(), Arc::new(Metrics::new().unwrap()), shutdown_rx);
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        service.record(entry("/late"));
        assert!(sink.0.lock().unwrap().is_empty());
    }
}
