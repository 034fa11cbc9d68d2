//! DirectoryDelivery - ファイル配置による配送
//!
//! artifact を target ディレクトリへコピーします。受信側が途中のファイルを
//! 拾わないように、一時名で書いてから rename します。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::ports::{Delivery, DeliveryResult};

const PARTIAL_SUFFIX: &str = ".partial";

#[derive(Debug, Clone, Default)]
pub struct DirectoryDelivery {
    target: Option<PathBuf>,
}

impl DirectoryDelivery {
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self {
            target: Some(target.into()),
        }
    }

    /// A delivery with no destination; the processor idles until one is set.
    pub fn unconfigured() -> Self {
        Self::default()
    }

    pub fn target(&self) -> Option<&Path> {
        self.target.as_deref()
    }

    async fn copy_into(target: &Path, artifact_path: &Path) -> Result<PathBuf, String> {
        let file_name = artifact_path
            .file_name()
            .ok_or_else(|| format!("artifact has no file name: {}", artifact_path.display()))?;

        tokio::fs::create_dir_all(target)
            .await
            .map_err(|e| format!("cannot create {}: {e}", target.display()))?;

        let dest = target.join(file_name);
        let mut partial_name = file_name.to_os_string();
        partial_name.push(PARTIAL_SUFFIX);
        let partial = target.join(partial_name);

        if let Err(e) = tokio::fs::copy(artifact_path, &partial).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(format!("copy to {} failed: {e}", partial.display()));
        }
        if let Err(e) = tokio::fs::rename(&partial, &dest).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(format!("rename to {} failed: {e}", dest.display()));
        }
        Ok(dest)
    }
}

#[async_trait]
impl Delivery for DirectoryDelivery {
    fn is_configured(&self) -> bool {
        self.target.is_some()
    }

    async fn deliver(&self, artifact_path: &Path) -> DeliveryResult {
        let Some(target) = self.target.as_deref() else {
            return DeliveryResult::failed("no destination directory configured");
        };

        match Self::copy_into(target, artifact_path).await {
            Ok(dest) => {
                debug!(dest = %dest.display(), "artifact dropped");
                DeliveryResult::delivered(format!("stored at {}", dest.display()))
            }
            Err(message) => DeliveryResult::failed(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn copies_artifact_and_leaves_source() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("study.dcm");
        std::fs::write(&source, b"DICM-data").unwrap();
        let outbox = dir.path().join("outbox").join("nested");

        let result = DirectoryDelivery::new(&outbox).deliver(&source).await;

        assert!(result.success, "{}", result.message);
        assert_eq!(std::fs::read(outbox.join("study.dcm")).unwrap(), b"DICM-data");
        assert!(!outbox.join("study.dcm.partial").exists());
        assert!(source.exists());
    }

    #[tokio::test]
    async fn missing_source_is_a_failed_result() {
        let dir = tempfile::tempdir().unwrap();
        let outbox = dir.path().join("outbox");

        let result = DirectoryDelivery::new(&outbox)
            .deliver(&dir.path().join("gone.dcm"))
            .await;

        assert!(!result.success);
        assert!(result.message.contains("copy"));
        assert!(!outbox.join("gone.dcm.partial").exists());
    }

    #[tokio::test]
    async fn unconfigured_reports_itself() {
        let delivery = DirectoryDelivery::unconfigured();
        assert!(!delivery.is_configured());
        assert!(!delivery.deliver(Path::new("a.dcm")).await.success);
    }
}
