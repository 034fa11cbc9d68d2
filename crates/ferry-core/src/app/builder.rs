//! ServiceBuilder - サービスの構築とワイヤリング
//!
//! # 起動時検証（Fail-fast）
//! - config の検証
//! - delivery の登録確認
//! - tokio runtime の中で呼ばれているか

use std::sync::Arc;

use tracing::info;

use super::{ProcessorHandle, ProcessorTiming, QueueProcessor};
use crate::config::{ConfigError, QueueConfig};
use crate::error::{QueueError, StoreError};
use crate::ports::{Clock, Delivery, SystemClock};
use crate::queue::{MaintenanceSchedule, QueueManager, QueueStore, RetryPolicy};

/// BuildError はサービス構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("no delivery collaborator set")]
    MissingDelivery,

    #[error("service must be built inside a tokio runtime")]
    NoRuntime,
}

/// # 使用例
/// ```ignore
/// let service = ServiceBuilder::new(config)
///     .delivery(Arc::new(DirectoryDelivery::new("/srv/outbox")))
///     .build()?;
/// // ...
/// service.shutdown().await?;
/// ```
pub struct ServiceBuilder {
    config: QueueConfig,
    delivery: Option<Arc<dyn Delivery>>,
    clock: Arc<dyn Clock>,
}

impl ServiceBuilder {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            delivery: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn delivery(mut self, delivery: Arc<dyn Delivery>) -> Self {
        self.delivery = Some(delivery);
        self
    }

    /// Override the wall clock (tests).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Load the queue, start maintenance and spawn the processor.
    pub fn build(self) -> Result<DeliveryService, BuildError> {
        self.config.validate()?;
        let delivery = self.delivery.ok_or(BuildError::MissingDelivery)?;
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(BuildError::NoRuntime);
        }

        let config = self.config;
        let manager = Arc::new(open_manager(&config, self.clock)?);
        manager.start_maintenance(MaintenanceSchedule::from(&config));

        let processor = QueueProcessor::new(
            Arc::clone(&manager),
            delivery,
            ProcessorTiming::from(&config),
        )
        .spawn();

        info!(
            snapshot = %config.snapshot_path().display(),
            pending = manager.get_stats().pending,
            "delivery service started"
        );
        Ok(DeliveryService {
            config,
            manager,
            processor,
        })
    }
}

/// Open a manager over the configured snapshot without starting anything.
///
/// One-shot commands use this directly and call `flush()` themselves. Fails
/// with `StoreError::Locked` while a running service owns the snapshot.
pub fn open_manager(
    config: &QueueConfig,
    clock: Arc<dyn Clock>,
) -> Result<QueueManager, StoreError> {
    QueueManager::open(
        QueueStore::new(config.snapshot_path()),
        RetryPolicy::new(config.base_retry_delay(), config.max_retries),
        clock,
    )
}

/// A running queue: manager with its maintenance task plus the processor.
pub struct DeliveryService {
    config: QueueConfig,
    manager: Arc<QueueManager>,
    processor: ProcessorHandle,
}

impl DeliveryService {
    pub fn manager(&self) -> &Arc<QueueManager> {
        &self.manager
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Stop the processor within the grace period, then stop maintenance and
    /// write the final snapshot.
    pub async fn shutdown(self) -> Result<(), QueueError> {
        let clean = self.processor.shutdown(self.config.shutdown_grace()).await;
        self.manager.shutdown().await?;
        info!(clean, "delivery service stopped");
        Ok(())
    }
}
