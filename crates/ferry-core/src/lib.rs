//! ferry-core
//!
//! Persistent delivery queue: artifacts are enqueued, kept in a JSON snapshot
//! across restarts and handed to a `Delivery` collaborator one at a time, with
//! exponential backoff and a retry ceiling.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, status, item, stats, events）
//! - **ports**: 外部との境界（Clock, Delivery）
//! - **queue**: snapshot store, retry policy, QueueManager
//! - **app**: QueueProcessor と ServiceBuilder
//! - **impls**: ports の実装（DirectoryDelivery）
//! - **config** / **error**: 設定とエラー型

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod ports;
pub mod queue;

pub use app::{DeliveryService, QueueProcessor, ServiceBuilder};
pub use config::QueueConfig;
pub use domain::{ItemId, ItemStatus, OwnerMetadata, QueueItem, QueueStats};
pub use error::{QueueError, StoreError};
pub use queue::{QueueManager, QueueStore, RetryPolicy};
