//! Impls - ports の実装（開発用）
//!
//! # 含まれる実装
//! - **DirectoryDelivery**: ディレクトリへのファイル配置による配送
//!
//! ネットワーク越しの配送は別クレートに置きます。

pub mod dir_delivery;

pub use self::dir_delivery::DirectoryDelivery;
