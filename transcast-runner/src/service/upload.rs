//! Artifact upload service
//!
//! Copies a finished artifact to cloud storage. Destination credentials are
//! applied to the upload process only and never to this process.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};
use transcast_core::domain::pipeline::StorageDestination;

/// Upload failure
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Failed to run uploader: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Upload to {remote} failed with exit code {code:?}: {stderr}")]
    Failed {
        remote: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Artifact path has no file name: {0}")]
    InvalidPath(String),
}

/// Service trait for uploading artifacts
#[async_trait]
pub trait UploadService: Send + Sync {
    /// Uploads `local` to the destination's bucket under its file name
    async fn upload(&self, destination: &StorageDestination, local: &Path)
    -> Result<(), UploadError>;
}

/// rclone implementation of UploadService
///
/// Uses on-the-fly remotes (`:<backend>:<bucket>/<file>`) so no rclone
/// configuration file is needed; the backend reads its credentials from the
/// destination's environment overrides.
pub struct RcloneUploadService {
    binary: String,
}

impl RcloneUploadService {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn remote(destination: &StorageDestination, file_name: &str) -> String {
        format!(
            ":{}:{}/{}",
            destination.name,
            destination.bucket.trim_end_matches('/'),
            file_name
        )
    }
}

#[async_trait]
impl UploadService for RcloneUploadService {
    async fn upload(
        &self,
        destination: &StorageDestination,
        local: &Path,
    ) -> Result<(), UploadError> {
        let file_name = local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| UploadError::InvalidPath(local.display().to_string()))?;
        let remote = Self::remote(destination, &file_name);

        debug!("Uploading {} to {}", local.display(), remote);

        let output = Command::new(&self.binary)
            .args(["--log-level", "ERROR", "copyto"])
            .arg(local)
            .arg(&remote)
            .envs(&destination.env)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(UploadError::Failed {
                remote,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        info!("Uploaded {} to {}", file_name, remote);
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::testing::write_script;
    use std::collections::BTreeMap;

    fn destination(env: &[(&str, &str)]) -> StorageDestination {
        StorageDestination {
            name: "s3".to_string(),
            bucket: "media/".to_string(),
            env: env
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[tokio::test]
    async fn test_upload_uses_scoped_env() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("calls.txt");
        let uploader = write_script(
            dir.path(),
            "rclone.sh",
            &format!(r#"echo "$4 $5 $UPLOAD_TOKEN" > {}"#, log.display()),
        );
        let artifact = dir.path().join("abc.mp4");
        std::fs::write(&artifact, b"data").unwrap();

        RcloneUploadService::new(uploader)
            .upload(&destination(&[("UPLOAD_TOKEN", "secret")]), &artifact)
            .await
            .unwrap();

        let call = std::fs::read_to_string(&log).unwrap();
        assert_eq!(
            call.trim(),
            format!("{} :s3:media/abc.mp4 secret", artifact.display())
        );
        assert!(std::env::var("UPLOAD_TOKEN").is_err());
    }

    #[tokio::test]
    async fn test_upload_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let uploader = write_script(
            dir.path(),
            "rclone.sh",
            r#"echo "bucket does not exist" >&2; exit 3"#,
        );

        let err = RcloneUploadService::new(uploader)
            .upload(&destination(&[]), &dir.path().join("abc.mp4"))
            .await
            .unwrap_err();

        match err {
            UploadError::Failed { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "bucket does not exist");
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
