//! App - アプリケーション層
//!
//! queue と ports を組み合わせて配送サービスを組み立てます。
//!
//! # 主要コンポーネント
//! - **ServiceBuilder**: サービスの構築とワイヤリング
//! - **QueueProcessor**: 配送ループ（pick → processing → deliver → sent / failed）
//! - **DeliveryService**: 起動中のサービス（graceful shutdown を持つ）

pub mod builder;
pub mod processor;

pub use self::builder::{BuildError, DeliveryService, ServiceBuilder, open_manager};
pub use self::processor::{ProcessorHandle, ProcessorTiming, QueueProcessor, Tick};
