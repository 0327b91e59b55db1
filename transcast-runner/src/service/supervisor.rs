//! Process supervisor
//!
//! Launches one encoder process per output and owns it until exit:
//! - Spawns with piped standard streams in the work directory
//! - Discards stdout and streams stderr into the output's log while waiting
//! - Stops on request: quit command first, kill after a timeout
//! - Persists the completion record, then uploads a successful artifact
//!
//! Live processes are tracked by output id. An entry disappears when its
//! process exits or when it is stopped. Uploads are skipped or abandoned once
//! the owning pipeline's expiry token fires.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use transcast_core::domain::pipeline::{Output, StorageDestination};
use transcast_core::domain::status::CompletionRecord;
use uuid::Uuid;

use crate::config::Config;
use crate::repository::{LogWriter, RecordStore};
use crate::service::upload::UploadService;

/// Launch failure
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Output {0} has no runnable command")]
    NotLaunchable(Uuid),

    #[error("Output {0} is already running")]
    AlreadyRunning(Uuid),
}

#[derive(Debug, Clone)]
struct LiveProcess {
    pid: Option<u32>,
    token: CancellationToken,
}

type LiveMap = Arc<Mutex<HashMap<Uuid, LiveProcess>>>;

/// Spawns and watches encoder processes
pub struct Supervisor {
    encoder: String,
    work_dir: PathBuf,
    kill_timeout: Duration,
    records: Arc<dyn RecordStore>,
    uploader: Arc<dyn UploadService>,
    live: LiveMap,
}

impl Supervisor {
    pub fn new(
        config: &Config,
        records: Arc<dyn RecordStore>,
        uploader: Arc<dyn UploadService>,
    ) -> Self {
        Self {
            encoder: config.encoder.clone(),
            work_dir: config.work_dir.clone(),
            kill_timeout: config.kill_timeout,
            records,
            uploader,
            live: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Launches the encoder for an output
    ///
    /// Returns once the process is spawned. The handle resolves to the
    /// completion record after the process exited, its record was written and
    /// any uploads finished or were abandoned because `expiry` fired. A spawn
    /// failure is not an error here: it resolves to a record without exit code.
    pub fn launch(
        &self,
        output: &Output,
        expiry: CancellationToken,
    ) -> Result<JoinHandle<CompletionRecord>, SupervisorError> {
        let command = output
            .command
            .as_ref()
            .filter(|_| output.errors.is_empty())
            .ok_or(SupervisorError::NotLaunchable(output.id))?;

        let mut live = lock(&self.live);
        if live.contains_key(&output.id) {
            return Err(SupervisorError::AlreadyRunning(output.id));
        }

        let job = OutputJob {
            output_id: output.id,
            artifact: output
                .target
                .as_ref()
                .and_then(|t| t.local_file())
                .map(|file| self.work_dir.join(file)),
            storage: output.storage.clone(),
            kill_timeout: self.kill_timeout,
            records: self.records.clone(),
            uploader: self.uploader.clone(),
            live: self.live.clone(),
            expiry,
        };

        let spawned = Command::new(&self.encoder)
            .args(&command.args)
            .current_dir(&self.work_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false)
            .spawn();

        match spawned {
            Ok(child) => {
                let pid = child.id();
                let token = CancellationToken::new();
                live.insert(
                    output.id,
                    LiveProcess {
                        pid,
                        token: token.clone(),
                    },
                );
                info!("Launched output {} (pid {:?})", output.id, pid);
                debug!("Running command: {}", command.rendered);
                Ok(tokio::spawn(job.supervise(child, token)))
            }
            Err(e) => {
                error!("Failed to launch encoder for output {}: {}", output.id, e);
                Ok(tokio::spawn(job.record_spawn_failure(e)))
            }
        }
    }

    /// Requests a graceful stop of an output's process
    ///
    /// Clears the live entry immediately and returns whether there was one.
    /// Termination itself happens in the background.
    pub fn stop(&self, output_id: Uuid) -> bool {
        match lock(&self.live).remove(&output_id) {
            Some(process) => {
                info!("Stopping output {} (pid {:?})", output_id, process.pid);
                process.token.cancel();
                true
            }
            None => false,
        }
    }

    /// OS process id of a live output
    pub fn pid(&self, output_id: Uuid) -> Option<u32> {
        lock(&self.live).get(&output_id).and_then(|p| p.pid)
    }

    pub fn is_running(&self, output_id: Uuid) -> bool {
        lock(&self.live).contains_key(&output_id)
    }

    /// Stops every live process, used on shutdown
    pub fn stop_all(&self) -> usize {
        let drained: Vec<(Uuid, LiveProcess)> = lock(&self.live).drain().collect();
        for (output_id, process) in &drained {
            debug!("Stopping output {} on shutdown", output_id);
            process.token.cancel();
        }
        drained.len()
    }
}

fn lock(live: &LiveMap) -> MutexGuard<'_, HashMap<Uuid, LiveProcess>> {
    live.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Everything the supervisory task of one output needs
struct OutputJob {
    output_id: Uuid,
    artifact: Option<PathBuf>,
    storage: Vec<StorageDestination>,
    kill_timeout: Duration,
    records: Arc<dyn RecordStore>,
    uploader: Arc<dyn UploadService>,
    live: LiveMap,
    expiry: CancellationToken,
}

impl OutputJob {
    async fn supervise(self, mut child: Child, token: CancellationToken) -> CompletionRecord {
        let stdin = child.stdin.take();
        let log: LogWriter = match self.records.open_log(self.output_id).await {
            Ok(log) => log,
            Err(e) => {
                error!("Failed to open log of output {}: {:#}", self.output_id, e);
                Box::new(tokio::io::sink())
            }
        };
        let stdout_task = tokio::spawn(pump(child.stdout.take(), tokio::io::sink()));
        let stderr_task = tokio::spawn(pump(child.stderr.take(), log));

        let (status, cancelled) = tokio::select! {
            status = child.wait() => (status, false),
            _ = token.cancelled() => (terminate(&mut child, stdin, self.kill_timeout).await, true),
        };

        let exit_code = match status {
            Ok(status) => status.code(),
            Err(e) => {
                error!("Error waiting for output {}: {}", self.output_id, e);
                None
            }
        };

        let _ = stdout_task.await;
        let _ = stderr_task.await;

        let record = CompletionRecord::new(exit_code, cancelled);
        if let Err(e) = self.records.complete(self.output_id, &record).await {
            error!(
                "Failed to persist completion record for output {}: {:#}",
                self.output_id, e
            );
        }
        self.settle(record).await
    }

    async fn record_spawn_failure(self, err: io::Error) -> CompletionRecord {
        let log = format!("Failed to launch encoder: {}\n", err);
        let record = CompletionRecord::new(None, false);
        if let Err(e) = self.records.write(self.output_id, &record, log.as_bytes()).await {
            error!(
                "Failed to persist completion record for output {}: {:#}",
                self.output_id, e
            );
        }
        self.settle(record).await
    }

    async fn settle(self, record: CompletionRecord) -> CompletionRecord {
        lock(&self.live).remove(&self.output_id);

        if record.succeeded() {
            info!("Output {} finished", self.output_id);
            if let Some(artifact) = &self.artifact {
                self.upload(artifact).await;
            }
        } else {
            warn!(
                "Output {} failed with exit code {:?}",
                self.output_id, record.exit_code
            );
        }

        record
    }

    async fn upload(&self, artifact: &Path) {
        for destination in &self.storage {
            if self.expiry.is_cancelled() {
                info!("Skipping upload of output {}, pipeline expired", self.output_id);
                return;
            }
            info!(
                "Uploading output {} to {}/{}",
                self.output_id, destination.name, destination.bucket
            );
            tokio::select! {
                result = self.uploader.upload(destination, artifact) => {
                    if let Err(e) = result {
                        warn!("Upload of output {} failed: {}", self.output_id, e);
                    }
                }
                _ = self.expiry.cancelled() => {
                    info!("Abandoned upload of output {}, pipeline expired", self.output_id);
                    return;
                }
            }
        }
    }
}

/// Quit command first, kill if the encoder does not exit in time
async fn terminate(
    child: &mut Child,
    stdin: Option<ChildStdin>,
    kill_timeout: Duration,
) -> io::Result<ExitStatus> {
    if let Some(mut stdin) = stdin {
        // Encoder's interactive quit: finalize the container and exit 0
        if let Err(e) = stdin.write_all(b"q\n").await {
            debug!("Could not send quit command: {}", e);
        }
        let _ = stdin.flush().await;
    }

    match tokio::time::timeout(kill_timeout, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!(
                "Encoder (pid {:?}) ignored quit request for {:?}, killing",
                child.id(),
                kill_timeout
            );
            child.kill().await?;
            child.wait().await
        }
    }
}

/// Copies a process stream into `sink` until end of stream
async fn pump<R, W>(stream: Option<R>, mut sink: W)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if let Some(mut stream) = stream {
        if let Err(e) = tokio::io::copy(&mut stream, &mut sink).await {
            debug!("Stopped reading process stream: {}", e);
        }
    }
    if let Err(e) = sink.flush().await {
        debug!("Could not flush process stream: {}", e);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::repository::FsRecordStore;
    use crate::service::upload::UploadError;
    use crate::testing::write_script;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use transcast_core::domain::pipeline::{EncoderCommand, Params, Target};
    use transcast_core::domain::status::OutputStatus;

    #[derive(Default)]
    struct RecordingUploader {
        calls: Mutex<Vec<(String, PathBuf)>>,
        delay: Duration,
    }

    #[async_trait]
    impl UploadService for RecordingUploader {
        async fn upload(
            &self,
            destination: &StorageDestination,
            local: &Path,
        ) -> Result<(), UploadError> {
            self.calls
                .lock()
                .unwrap()
                .push((destination.name.clone(), local.to_path_buf()));
            tokio::time::sleep(self.delay).await;
            Ok(())
        }
    }

    struct Harness {
        dir: tempfile::TempDir,
        store: Arc<FsRecordStore>,
        uploader: Arc<RecordingUploader>,
        supervisor: Supervisor,
    }

    async fn harness(encoder: &str) -> Harness {
        harness_with_upload_delay(encoder, Duration::ZERO).await
    }

    async fn harness_with_upload_delay(encoder: &str, delay: Duration) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::new(dir.path());
        config.encoder = encoder.to_string();
        config.kill_timeout = Duration::from_millis(300);

        let store = Arc::new(FsRecordStore::new(dir.path()).await.unwrap());
        let uploader = Arc::new(RecordingUploader {
            delay,
            ..RecordingUploader::default()
        });
        let supervisor = Supervisor::new(&config, store.clone(), uploader.clone());

        Harness {
            dir,
            store,
            uploader,
            supervisor,
        }
    }

    /// Output whose command runs `script` through `sh`
    fn scripted_output(h: &Harness, body: &str, storage: &[&str]) -> Output {
        let script = write_script(h.dir.path(), &format!("{}.sh", Uuid::new_v4()), body);
        Output {
            id: Uuid::new_v4(),
            container: "mp4".to_string(),
            params: Params::new(),
            channels: Vec::new(),
            storage: storage
                .iter()
                .map(|name| StorageDestination {
                    name: name.to_string(),
                    bucket: "media".to_string(),
                    env: BTreeMap::new(),
                })
                .collect(),
            target: Some(Target::File {
                path: "out.mp4".to_string(),
            }),
            errors: Vec::new(),
            command: Some(EncoderCommand {
                rendered: format!("sh {}", script),
                args: vec![script],
            }),
        }
    }

    #[tokio::test]
    async fn test_clean_exit_is_recorded() {
        let h = harness("sh").await;
        let output = scripted_output(&h, "echo 'frame=1' >&2; echo 'done' >&2; exit 0", &[]);

        let record = h
            .supervisor
            .launch(&output, CancellationToken::new())
            .unwrap()
            .await
            .unwrap();

        assert_eq!(record.exit_code, Some(0));
        assert!(!record.cancelled);
        assert_eq!(h.store.read(output.id).await.unwrap(), Some(record.clone()));
        assert_eq!(
            h.store.tail(output.id, 20).await.unwrap(),
            Some(vec!["frame=1".to_string(), "done".to_string()])
        );
        assert_eq!(OutputStatus::of(&output, Some(&record)), OutputStatus::Finished);
        assert!(!h.supervisor.is_running(output.id));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_error() {
        let h = harness("sh").await;
        let output = scripted_output(&h, "echo 'Unknown encoder' >&2; exit 3", &["s3"]);

        let record = h
            .supervisor
            .launch(&output, CancellationToken::new())
            .unwrap()
            .await
            .unwrap();

        assert_eq!(record.exit_code, Some(3));
        assert_eq!(OutputStatus::of(&output, Some(&record)), OutputStatus::Error);
        // Failed artifacts are never uploaded
        assert!(h.uploader.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_runs_in_work_dir_and_uploads_artifact() {
        let h = harness("sh").await;
        let output = scripted_output(&h, "echo data > out.mp4", &["s3", "gcs"]);

        let record = h
            .supervisor
            .launch(&output, CancellationToken::new())
            .unwrap()
            .await
            .unwrap();

        assert!(record.succeeded());
        let artifact = h.dir.path().join("out.mp4");
        assert!(artifact.exists());
        assert_eq!(
            *h.uploader.calls.lock().unwrap(),
            vec![("s3".to_string(), artifact.clone()), ("gcs".to_string(), artifact)]
        );
    }

    #[tokio::test]
    async fn test_log_streams_while_running() {
        let h = harness("sh").await;
        let output = scripted_output(&h, "echo 'frame=1' >&2; read cmd; exit 0", &[]);

        let handle = h
            .supervisor
            .launch(&output, CancellationToken::new())
            .unwrap();

        let mut lines = None;
        for _ in 0..50 {
            lines = h.store.tail(output.id, 5).await.unwrap();
            if lines.as_deref().is_some_and(|l| !l.is_empty()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(lines, Some(vec!["frame=1".to_string()]));
        assert!(h.store.read(output.id).await.unwrap().is_none());

        h.supervisor.stop(output.id);
        assert_eq!(handle.await.unwrap().exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_expired_pipeline_skips_upload() {
        let h = harness("sh").await;
        let output = scripted_output(&h, "echo data > out.mp4", &["s3"]);
        let expiry = CancellationToken::new();
        expiry.cancel();

        let record = h.supervisor.launch(&output, expiry).unwrap().await.unwrap();

        assert!(record.succeeded());
        assert!(h.uploader.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expiry_abandons_upload_in_flight() {
        let h = harness_with_upload_delay("sh", Duration::from_secs(30)).await;
        let output = scripted_output(&h, "echo data > out.mp4", &["s3", "gcs"]);
        let expiry = CancellationToken::new();

        let handle = h.supervisor.launch(&output, expiry.clone()).unwrap();
        for _ in 0..50 {
            if !h.uploader.calls.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        expiry.cancel();

        let record = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(record.succeeded());
        // The second destination is never attempted
        assert_eq!(h.uploader.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stop_sends_quit_command() {
        let h = harness("sh").await;
        let output = scripted_output(&h, "read cmd; echo \"received $cmd\" >&2; exit 0", &[]);

        let handle = h
            .supervisor
            .launch(&output, CancellationToken::new())
            .unwrap();
        assert!(h.supervisor.is_running(output.id));
        assert!(h.supervisor.pid(output.id).is_some());

        assert!(h.supervisor.stop(output.id));
        assert!(!h.supervisor.is_running(output.id));
        assert!(!h.supervisor.stop(output.id));

        let record = handle.await.unwrap();
        assert_eq!(record.exit_code, Some(0));
        assert!(record.cancelled);
        assert_eq!(
            h.store.tail(output.id, 1).await.unwrap(),
            Some(vec!["received q".to_string()])
        );
    }

    #[tokio::test]
    async fn test_stop_kills_unresponsive_process() {
        let h = harness("sh").await;
        let output = scripted_output(&h, "exec sleep 30", &[]);

        let handle = h
            .supervisor
            .launch(&output, CancellationToken::new())
            .unwrap();
        h.supervisor.stop(output.id);

        let record = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.exit_code, None);
        assert!(record.cancelled);
        assert_eq!(OutputStatus::of(&output, Some(&record)), OutputStatus::Error);
    }

    #[tokio::test]
    async fn test_spawn_failure_becomes_record() {
        let h = harness("/nonexistent/encoder").await;
        let output = scripted_output(&h, "exit 0", &[]);

        let record = h
            .supervisor
            .launch(&output, CancellationToken::new())
            .unwrap()
            .await
            .unwrap();

        assert_eq!(record.exit_code, None);
        let log = h.store.tail(output.id, 5).await.unwrap().unwrap();
        assert!(log[0].starts_with("Failed to launch encoder"));
        assert!(!h.supervisor.is_running(output.id));
    }

    #[tokio::test]
    async fn test_unresolved_output_is_not_launched() {
        let h = harness("sh").await;
        let mut output = scripted_output(&h, "exit 0", &[]);
        output.command = None;

        assert!(matches!(
            h.supervisor.launch(&output, CancellationToken::new()),
            Err(SupervisorError::NotLaunchable(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_launch_is_rejected() {
        let h = harness("sh").await;
        let output = scripted_output(&h, "read cmd; exit 0", &[]);

        let handle = h
            .supervisor
            .launch(&output, CancellationToken::new())
            .unwrap();
        assert!(matches!(
            h.supervisor.launch(&output, CancellationToken::new()),
            Err(SupervisorError::AlreadyRunning(_))
        ));

        assert_eq!(h.supervisor.stop_all(), 1);
        assert!(handle.await.unwrap().cancelled);
    }
}
