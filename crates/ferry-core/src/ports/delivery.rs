//! Delivery port - 受信側への配送
//!
//! The queue never talks to the network itself. A `Delivery` implementation
//! owns the protocol, the handshake and its own timeouts; the processor only
//! hands it a path and records the outcome.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub success: bool,
    pub message: String,
}

impl DeliveryResult {
    pub fn delivered(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait Delivery: Send + Sync {
    /// Whether a destination is set up at all. The processor idles while this
    /// is false instead of burning retries.
    fn is_configured(&self) -> bool {
        true
    }

    /// Attempt to deliver the artifact at `artifact_path`.
    ///
    /// Failures are reported in the result, not as a panic or error; the
    /// artifact itself must not be modified or removed.
    async fn deliver(&self, artifact_path: &Path) -> DeliveryResult;
}
