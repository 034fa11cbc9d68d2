//! Ports - 外部との境界
//!
//! - **Clock**: 現在時刻
//! - **Delivery**: artifact の配送（ネットワークプロトコルは外側の実装が持つ）

pub mod clock;
pub mod delivery;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::delivery::{Delivery, DeliveryResult};
