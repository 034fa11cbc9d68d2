//! QueueProcessor - 配送ループ
//!
//! Single worker: one delivery target means extra workers would only risk
//! duplicate or reordered deliveries.
//!
//! # フロー
//! 1. destination 未設定なら長めに sleep して再確認
//! 2. `get_next_pending()`; 無ければ短く sleep
//! 3. `mark_processing()`
//! 4. artifact の存在確認（無ければ通常の失敗経路へ）
//! 5. `Delivery::deliver()` → `mark_success()` / `mark_failed()`
//! 6. 次の item の前に小さな delay

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::domain::{ItemId, QueueItem};
use crate::ports::{Delivery, DeliveryResult};
use crate::queue::QueueManager;

/// Sleep durations used by the processor loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorTiming {
    /// Pause after each attempt, success or failure.
    pub inter_item_delay: Duration,
    /// Pause when nothing is eligible.
    pub idle_poll_interval: Duration,
    /// Pause when the delivery destination is not configured.
    pub unconfigured_poll_interval: Duration,
}

impl From<&QueueConfig> for ProcessorTiming {
    fn from(config: &QueueConfig) -> Self {
        Self {
            inter_item_delay: config.inter_item_delay(),
            idle_poll_interval: config.idle_poll_interval(),
            unconfigured_poll_interval: config.unconfigured_poll_interval(),
        }
    }
}

/// What one loop iteration did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick {
    /// No delivery destination configured.
    Unconfigured,
    /// Nothing eligible.
    Idle,
    /// The item was picked, but the manager rejected one of its transitions
    /// (moved on by someone else, or purged mid-attempt).
    Skipped(ItemId),
    Delivered(ItemId),
    Failed { id: ItemId, message: String },
}

impl Tick {
    fn pause(&self, timing: &ProcessorTiming) -> Duration {
        match self {
            Tick::Unconfigured => timing.unconfigured_poll_interval,
            Tick::Idle => timing.idle_poll_interval,
            Tick::Skipped(_) | Tick::Delivered(_) | Tick::Failed { .. } => timing.inter_item_delay,
        }
    }
}

pub struct QueueProcessor {
    manager: Arc<QueueManager>,
    delivery: Arc<dyn Delivery>,
    timing: ProcessorTiming,
}

impl QueueProcessor {
    pub fn new(
        manager: Arc<QueueManager>,
        delivery: Arc<dyn Delivery>,
        timing: ProcessorTiming,
    ) -> Self {
        Self {
            manager,
            delivery,
            timing,
        }
    }

    /// Run one iteration: pick at most one item and attempt it.
    ///
    /// Never panics on a bad item; every outcome lands on the item itself.
    pub async fn tick(&self) -> Tick {
        if !self.delivery.is_configured() {
            return Tick::Unconfigured;
        }

        let Some(item) = self.manager.get_next_pending() else {
            return Tick::Idle;
        };

        let item = match self.manager.mark_processing(&item.id) {
            Ok(item) => item,
            Err(_) => return Tick::Skipped(item.id), // already logged by the manager
        };

        let result = self.attempt(&item).await;
        let recorded = if result.success {
            self.manager.mark_success(&item.id).map(|_| Tick::Delivered(item.id))
        } else {
            self.manager
                .mark_failed(&item.id, result.message.clone())
                .map(|_| Tick::Failed {
                    id: item.id,
                    message: result.message,
                })
        };
        recorded.unwrap_or(Tick::Skipped(item.id))
    }

    async fn attempt(&self, item: &QueueItem) -> DeliveryResult {
        let path = item.artifact_path.clone();

        match tokio::fs::try_exists(&path).await {
            Ok(true) => {}
            Ok(false) => {
                return DeliveryResult::failed(format!("artifact not found: {}", path.display()));
            }
            Err(e) => {
                return DeliveryResult::failed(format!(
                    "artifact not accessible: {}: {e}",
                    path.display()
                ));
            }
        }

        debug!(item_id = %item.id, path = %path.display(), attempt = item.retry_count + 1, "delivering");
        self.deliver_isolated(item.id, path).await
    }

    /// Run the collaborator on its own task so a panic inside it becomes a
    /// failed attempt instead of killing the loop.
    ///
    /// The task is tied to this future: if the loop is aborted, so is the
    /// delivery.
    async fn deliver_isolated(&self, id: ItemId, path: PathBuf) -> DeliveryResult {
        let delivery = Arc::clone(&self.delivery);
        let task = AbortOnDropHandle::new(tokio::spawn(async move {
            delivery.deliver(&path).await
        }));
        match task.await {
            Ok(result) => result,
            Err(e) => {
                error!(item_id = %id, error = %e, "delivery task aborted");
                DeliveryResult::failed(format!("delivery task aborted: {e}"))
            }
        }
    }

    /// Spawn the loop. Must be called inside a tokio runtime.
    pub fn spawn(self) -> ProcessorHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(self.run(shutdown_rx));
        ProcessorHandle { shutdown_tx, join }
    }

    async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!("queue processor started");
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let tick = self.tick().await;
            let pause = tick.pause(&self.timing);

            // shutdown is only observed between items, never mid-delivery
            let stop = tokio::select! {
                _ = shutdown_rx.changed() => true,
                _ = tokio::time::sleep(pause) => false,
            };
            if stop {
                break;
            }
        }
        info!("queue processor stopped");
    }
}

/// Handle to a running processor loop.
pub struct ProcessorHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ProcessorHandle {
    /// Ask the loop to stop at its next sleep boundary.
    pub fn request_shutdown(&self) {
        // ignore send error: the loop may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Stop the loop, waiting at most `grace` for an in-flight delivery.
    ///
    /// Returns false if the loop had to be aborted. The in-flight delivery is
    /// cancelled with it; its item stays Processing in memory and is requeued
    /// when the snapshot is next loaded.
    pub async fn shutdown(self, grace: Duration) -> bool {
        self.request_shutdown();
        let mut join = self.join;
        match tokio::time::timeout(grace, &mut join).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!(error = %e, "queue processor task failed");
                true
            }
            Err(_) => {
                warn!(grace_ms = grace.as_millis() as u64, "in-flight delivery exceeded grace period, aborting");
                join.abort();
                // wait for the cancelled loop to be dropped, which aborts the delivery task
                let _ = join.await;
                false
            }
        }
    }
}
