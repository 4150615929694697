//! Audit sink: non-blocking dispatch of security events to the audit log.
//!
//! Callers hand events to [`AuditSink::record`], which never waits and never
//! fails. A background worker writes them with bounded retry; an event that
//! still cannot be written is logged and dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::models::audit::AuditEvent;
use crate::store::AuditStore;

const QUEUE_CAPACITY: usize = 1024;
const WRITE_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

#[derive(Clone)]
pub struct AuditSink {
    tx: mpsc::Sender<AuditEvent>,
}

impl AuditSink {
    /// Start the writer task. It exits once every sink clone is dropped and
    /// the queue is drained.
    pub fn spawn(store: Arc<dyn AuditStore>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let handle = tokio::spawn(run_writer(store, rx));
        (Self { tx }, handle)
    }

    /// Queue an event. Drops it with a warning when the queue is full or closed.
    pub fn record(&self, event: AuditEvent) {
        let kind = event.kind.as_str();
        if let Err(e) = self.tx.try_send(event) {
            warn!(kind, error = %e, "audit event dropped");
        }
    }
}

async fn run_writer(store: Arc<dyn AuditStore>, mut rx: mpsc::Receiver<AuditEvent>) {
    while let Some(event) = rx.recv().await {
        write_with_retry(store.as_ref(), &event).await;
    }
    debug!("audit writer stopped");
}

async fn write_with_retry(store: &dyn AuditStore, event: &AuditEvent) {
    for attempt in 1..=WRITE_ATTEMPTS {
        match store.append_audit_event(event).await {
            Ok(()) => return,
            Err(e) if attempt < WRITE_ATTEMPTS => {
                debug!(kind = event.kind.as_str(), attempt, error = %e, "audit write failed, retrying");
                tokio::time::sleep(RETRY_BASE_DELAY * attempt).await;
            }
            Err(e) => {
                warn!(kind = event.kind.as_str(), user_id = ?event.user_id, error = %e, "failed to record audit event");
            }
        }
    }
}
