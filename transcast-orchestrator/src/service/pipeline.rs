//! Pipeline Service
//!
//! Business logic for pipeline management. Creation runs strictly in order:
//! parse, probe, synthesize, persist, launch. Nothing is persisted when the
//! request or the probe is rejected, and nothing is launched when the
//! snapshot cannot be stored.

use serde_json::Value;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use transcast_core::command::{CommandSynthesizer, StreamPresence};
use transcast_core::domain::pipeline::{Params, Pipeline};
use transcast_core::dto::pipeline::{OutputReport, PipelineCreated, PipelineSummary};
use transcast_core::parser::{ParseOptions, SpecError, parse_pipeline};
use transcast_core::ports::PortAllocator;
use tokio_util::sync::CancellationToken;
use transcast_runner::service::{OutputTracker, ProbeError, ProbeService, Supervisor};
use uuid::Uuid;

use crate::repository::pipeline_repository;
use crate::service::lifecycle::{LifecycleManager, wait_done};

/// Service error type
#[derive(Debug)]
pub enum PipelineError {
    NotFound(Uuid),
    ValidationError(SpecError),
    ProbeError(ProbeError),
    DatabaseError(sqlx::Error),
    InternalError(String),
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        PipelineError::DatabaseError(err)
    }
}

impl From<SpecError> for PipelineError {
    fn from(err: SpecError) -> Self {
        PipelineError::ValidationError(err)
    }
}

impl From<ProbeError> for PipelineError {
    fn from(err: ProbeError) -> Self {
        PipelineError::ProbeError(err)
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        PipelineError::InternalError(format!("{:#}", err))
    }
}

/// Timing knobs of the pipeline service
#[derive(Debug, Clone)]
pub struct Timings {
    /// Pause between signalling a stop and reporting
    pub stop_grace: Duration,
    /// Upper bound on the wait for a purged pipeline's cleanup
    pub purge_timeout: Duration,
}

/// Pipeline service
pub struct PipelineService {
    pool: SqlitePool,
    prober: Arc<dyn ProbeService>,
    synthesizer: CommandSynthesizer,
    supervisor: Arc<Supervisor>,
    tracker: OutputTracker,
    lifecycle: LifecycleManager,
    ports: Arc<PortAllocator>,
    parse_options: ParseOptions,
    timings: Timings,
}

impl PipelineService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: SqlitePool,
        prober: Arc<dyn ProbeService>,
        synthesizer: CommandSynthesizer,
        supervisor: Arc<Supervisor>,
        tracker: OutputTracker,
        lifecycle: LifecycleManager,
        ports: Arc<PortAllocator>,
        parse_options: ParseOptions,
        timings: Timings,
    ) -> Self {
        Self {
            pool,
            prober,
            synthesizer,
            supervisor,
            tracker,
            lifecycle,
            ports,
            parse_options,
            timings,
        }
    }

    /// Create a pipeline and launch its outputs
    pub async fn create_pipeline(&self, request: Value) -> Result<PipelineCreated, PipelineError> {
        let options = self.parse_options.clone();
        let ports = self.ports.clone();
        // Port search blocks for up to its search window
        let mut pipeline =
            tokio::task::spawn_blocking(move || parse_pipeline(&request, &options, &ports))
                .await
                .map_err(|e| PipelineError::InternalError(format!("Parser task failed: {}", e)))??;

        let probe = match self.prober.probe(&pipeline.input.source, &Params::new()).await {
            Ok(probe) => probe,
            Err(e) => {
                tracing::warn!("Probe of {} failed: {}", pipeline.input.source, e);
                self.release_ports(&pipeline);
                return Err(e.into());
            }
        };
        let streams = StreamPresence::from_probe(&probe);
        tracing::debug!(
            "Input {} has video: {}, audio: {}",
            pipeline.input.source,
            streams.has_video,
            streams.has_audio
        );

        self.synthesizer.synthesize_pipeline(&mut pipeline, streams);

        if let Err(e) = pipeline_repository::insert(&self.pool, &pipeline).await {
            self.release_ports(&pipeline);
            return Err(e.into());
        }

        tracing::info!(
            "Starting jobs for pipeline: {} with ttl of {}",
            pipeline.id,
            pipeline.ttl
        );

        // Fired on purge, so that outputs abandon their uploads
        let expire_now = CancellationToken::new();
        let mut handles = Vec::new();
        for output in pipeline.launchable_outputs() {
            match self.supervisor.launch(output, expire_now.clone()) {
                Ok(handle) => handles.push(handle),
                Err(e) => tracing::warn!("Output {} was not launched: {}", output.id, e),
            }
        }

        let created = PipelineCreated::from(&pipeline);
        self.lifecycle.watch(pipeline, handles, expire_now);
        Ok(created)
    }

    /// Get per-output reports of a pipeline
    pub async fn get_pipeline(&self, id: Uuid) -> Result<Vec<OutputReport>, PipelineError> {
        let pipeline = self.find(id).await?;
        self.reports(&pipeline).await
    }

    /// List all pipelines
    pub async fn list_pipelines(&self) -> Result<Vec<PipelineSummary>, PipelineError> {
        let pipelines = pipeline_repository::list_all(&self.pool).await?;
        Ok(pipelines.iter().map(PipelineSummary::from).collect())
    }

    /// Stop every running output of a pipeline
    ///
    /// Waits the stop grace period only if something was actually stopped.
    pub async fn stop_pipeline(&self, id: Uuid) -> Result<Vec<OutputReport>, PipelineError> {
        let pipeline = self.find(id).await?;

        let stopped = self.stop_outputs(&pipeline);
        if stopped > 0 {
            tracing::info!("Stopped {} outputs of pipeline {}", stopped, id);
            tokio::time::sleep(self.timings.stop_grace).await;
        } else {
            tracing::debug!("Pipeline {} has no running outputs", id);
        }

        self.reports(&pipeline).await
    }

    /// Stop a pipeline and delete it with all its artifacts right away
    pub async fn purge_pipeline(&self, id: Uuid) -> Result<(), PipelineError> {
        let pipeline = self.find(id).await?;
        self.stop_outputs(&pipeline);

        match self.lifecycle.expire_now(id) {
            Some(done) => {
                if !wait_done(done, self.timings.purge_timeout).await {
                    return Err(PipelineError::InternalError(format!(
                        "Pipeline {} did not finish cleanup within {:?}",
                        id, self.timings.purge_timeout
                    )));
                }
            }
            // Persisted by an earlier process and never resumed
            None => self.lifecycle.cleanup(&pipeline).await?,
        }

        tracing::info!("Pipeline {} purged", id);
        Ok(())
    }

    /// Probe a source on behalf of a caller
    pub async fn probe(&self, source: &str, params: &Params) -> Result<Value, PipelineError> {
        Ok(self.prober.probe(source, params).await?)
    }

    async fn find(&self, id: Uuid) -> Result<Pipeline, PipelineError> {
        pipeline_repository::find_by_id(&self.pool, id)
            .await?
            .ok_or(PipelineError::NotFound(id))
    }

    /// Output reports, with the pid of every output still running here
    async fn reports(&self, pipeline: &Pipeline) -> Result<Vec<OutputReport>, PipelineError> {
        let mut reports = self.tracker.reports(pipeline).await?;
        for report in &mut reports {
            report.pid = self.supervisor.pid(report.id);
        }
        Ok(reports)
    }

    fn stop_outputs(&self, pipeline: &Pipeline) -> usize {
        pipeline
            .outputs
            .iter()
            .filter(|output| self.supervisor.stop(output.id))
            .count()
    }

    fn release_ports(&self, pipeline: &Pipeline) {
        for port in pipeline
            .outputs
            .iter()
            .filter_map(|o| o.target.as_ref().and_then(|t| t.udp_port()))
        {
            self.ports.release(port);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use async_trait::async_trait;
    use serde_json::json;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use transcast_core::domain::pipeline::StorageDestination;
    use transcast_core::domain::status::OutputStatus;
    use transcast_runner::Config as RunnerConfig;
    use transcast_runner::repository::FsRecordStore;
    use transcast_runner::service::{UploadError, UploadService};

    struct FakeProbe {
        streams: Value,
        fail: bool,
    }

    #[async_trait]
    impl ProbeService for FakeProbe {
        async fn probe(&self, _source: &str, _params: &Params) -> Result<Value, ProbeError> {
            if self.fail {
                return Err(ProbeError::Failed {
                    code: Some(1),
                    stderr: vec!["in.mp4: No such file or directory".to_string()],
                });
            }
            Ok(json!({ "streams": self.streams.clone() }))
        }
    }

    struct NoUpload;

    #[async_trait]
    impl UploadService for NoUpload {
        async fn upload(&self, _: &StorageDestination, _: &Path) -> Result<(), UploadError> {
            Ok(())
        }
    }

    /// Stands in for a large artifact on a slow link
    struct SlowUpload;

    #[async_trait]
    impl UploadService for SlowUpload {
        async fn upload(&self, _: &StorageDestination, _: &Path) -> Result<(), UploadError> {
            tokio::time::sleep(Duration::from_secs(3)).await;
            Ok(())
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        work_dir: std::path::PathBuf,
        pool: SqlitePool,
        ports: Arc<PortAllocator>,
        service: PipelineService,
    }

    /// Service whose encoder is a shell script with `body`
    async fn harness(body: &str, probe_fails: bool) -> Harness {
        harness_with_uploader(body, probe_fails, Arc::new(NoUpload)).await
    }

    async fn harness_with_uploader(
        body: &str,
        probe_fails: bool,
        uploader: Arc<dyn UploadService>,
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let pool = test_pool(&dir).await;

        let encoder = dir.path().join("encoder.sh");
        std::fs::write(&encoder, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&encoder, std::fs::Permissions::from_mode(0o755)).unwrap();

        let work_dir = dir.path().join("work");
        let mut runner = RunnerConfig::new(&work_dir);
        runner.encoder = encoder.to_string_lossy().into_owned();
        runner.kill_timeout = Duration::from_millis(300);

        let store = Arc::new(FsRecordStore::new(&work_dir).await.unwrap());
        let ports = Arc::new(PortAllocator::default());
        let supervisor = Arc::new(Supervisor::new(&runner, store.clone(), uploader));
        let service = PipelineService::new(
            pool.clone(),
            Arc::new(FakeProbe {
                streams: json!([{"codec_type": "video"}, {"codec_type": "audio"}]),
                fail: probe_fails,
            }),
            CommandSynthesizer::new(runner.encoder.clone()),
            supervisor,
            OutputTracker::new(store.clone(), runner.output_lines),
            LifecycleManager::new(pool.clone(), store, ports.clone()),
            ports.clone(),
            ParseOptions::default(),
            Timings {
                stop_grace: Duration::from_millis(500),
                purge_timeout: Duration::from_secs(5),
            },
        );

        Harness {
            _dir: dir,
            work_dir,
            pool,
            ports,
            service,
        }
    }

    fn request(ttl: u64) -> Value {
        json!({
            "input_file": {"source": "in.mp4"},
            "outputs": [{
                "container": "mp4",
                "channels": [
                    {"stream_type": "video", "codec": "copy"},
                    {"stream_type": "audio", "codec": "copy"}
                ]
            }],
            "ttl": ttl
        })
    }

    async fn wait_for_status(h: &Harness, id: Uuid, status: OutputStatus) -> Vec<OutputReport> {
        for _ in 0..100 {
            let reports = h.service.get_pipeline(id).await.unwrap();
            if reports.iter().all(|r| r.status == status) {
                return reports;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("pipeline {} never reached {}", id, status);
    }

    #[tokio::test]
    async fn test_create_runs_to_finished() {
        // The last argument is the target; write it like an encoder would
        let h = harness(r#"for last; do :; done; echo data > "$last"; echo 'done' >&2"#, false).await;

        let created = h.service.create_pipeline(request(0)).await.unwrap();
        assert_eq!(created.outputs.len(), 1);
        let target = created.outputs[0].clone().unwrap();
        assert!(target.ends_with(".mp4"));

        let reports = wait_for_status(&h, created.id, OutputStatus::Finished).await;
        let report = &reports[0];
        assert_eq!(report.command_retcode, Some(0));
        assert_eq!(report.command_output, Some(vec!["done".to_string()]));
        assert!(
            report
                .command
                .as_deref()
                .unwrap()
                .ends_with(&format!("-i in.mp4 -map 0:v -map 0:a -acodec copy -vcodec copy {}", target))
        );
        assert!(h.work_dir.join(&target).exists());
    }

    #[tokio::test]
    async fn test_failing_encoder_reports_error() {
        let h = harness("echo 'Unknown encoder' >&2; exit 1", false).await;

        let created = h.service.create_pipeline(request(0)).await.unwrap();

        let reports = wait_for_status(&h, created.id, OutputStatus::Error).await;
        assert_eq!(reports[0].command_retcode, Some(1));
        assert_eq!(
            reports[0].command_output,
            Some(vec!["Unknown encoder".to_string()])
        );
    }

    #[tokio::test]
    async fn test_validation_error_persists_nothing() {
        let h = harness("exit 0", false).await;

        let err = h
            .service
            .create_pipeline(json!({"input_file": {"source": "in.mp4"}, "outputs": [{}]}))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::ValidationError(SpecError::MissingField(_))));
        assert!(h.service.list_pipelines().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_probe_failure_persists_nothing() {
        let h = harness("exit 0", true).await;

        let err = h
            .service
            .create_pipeline(json!({
                "input_file": {"source": "in.mp4"},
                "outputs": [{"container": "mpegts"}]
            }))
            .await
            .unwrap_err();

        match err {
            PipelineError::ProbeError(e) => {
                assert_eq!(e.description(), vec!["in.mp4: No such file or directory"])
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(pipeline_repository::list_all(&h.pool).await.unwrap().is_empty());
        assert_eq!(h.ports.reserved_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_pipeline_is_not_found() {
        let h = harness("exit 0", false).await;
        let id = Uuid::new_v4();

        assert!(matches!(
            h.service.get_pipeline(id).await,
            Err(PipelineError::NotFound(_))
        ));
        assert!(matches!(
            h.service.stop_pipeline(id).await,
            Err(PipelineError::NotFound(_))
        ));
        assert!(matches!(
            h.service.purge_pipeline(id).await,
            Err(PipelineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_stop_running_output() {
        // Behaves like the encoder's interactive quit
        let h = harness("read cmd; echo \"quit on $cmd\" >&2; exit 0", false).await;
        let created = h.service.create_pipeline(request(0)).await.unwrap();
        let reports = h.service.get_pipeline(created.id).await.unwrap();
        assert_eq!(reports[0].status, OutputStatus::Running);
        assert!(reports[0].pid.is_some());

        let reports = h.service.stop_pipeline(created.id).await.unwrap();
        assert_eq!(reports[0].status, OutputStatus::Finished);
        assert!(reports[0].pid.is_none());
        assert!(reports[0].cancelled);
        assert_eq!(reports[0].command_output, Some(vec!["quit on q".to_string()]));

        // Nothing left to stop
        let again = h.service.stop_pipeline(created.id).await.unwrap();
        assert_eq!(again[0].status, OutputStatus::Finished);
    }

    #[tokio::test]
    async fn test_ttl_expiry_makes_pipeline_unqueryable() {
        let h = harness(r#"for last; do :; done; echo data > "$last""#, false).await;
        let created = h.service.create_pipeline(request(1)).await.unwrap();
        let artifact = h.work_dir.join(created.outputs[0].as_ref().unwrap());

        wait_for_status(&h, created.id, OutputStatus::Finished).await;
        assert!(artifact.exists());

        let mut gone = false;
        for _ in 0..60 {
            if matches!(
                h.service.get_pipeline(created.id).await,
                Err(PipelineError::NotFound(_))
            ) {
                gone = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(gone);
        assert!(!artifact.exists());
    }

    #[tokio::test]
    async fn test_purge_removes_running_pipeline() {
        let h = harness("read cmd; exit 0", false).await;
        let created = h.service.create_pipeline(request(0)).await.unwrap();

        h.service.purge_pipeline(created.id).await.unwrap();

        assert!(matches!(
            h.service.get_pipeline(created.id).await,
            Err(PipelineError::NotFound(_))
        ));
        assert!(h.service.list_pipelines().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_port_exhaustion_blocks_only_that_output() {
        let h = harness("exit 0", false).await;
        let socket = std::net::UdpSocket::bind(("0.0.0.0", 0)).unwrap();
        let port = socket.local_addr().unwrap().port();
        let mut service = h.service;
        service.ports = Arc::new(PortAllocator::with_range(port..=port, Duration::from_millis(20)));

        let created = service
            .create_pipeline(json!({
                "input_file": {"source": "in.mp4"},
                "outputs": [{"container": "mpegts"}, {"container": "mkv"}],
                "ttl": 0
            }))
            .await
            .unwrap();

        assert!(created.outputs[0].is_none());
        assert!(created.outputs[1].is_some());

        let reports = service.get_pipeline(created.id).await.unwrap();
        assert_eq!(reports[0].status, OutputStatus::Error);
        assert!(reports[0].command.is_none());
        assert!(!reports[0].errors.is_empty());
    }

    #[tokio::test]
    async fn test_purge_abandons_slow_upload() {
        let h = harness_with_uploader(
            r#"for last; do :; done; echo data > "$last"; read cmd; exit 0"#,
            false,
            Arc::new(SlowUpload),
        )
        .await;
        let mut service = h.service;
        // Same bound as production: kill timeout plus stop grace
        service.timings.purge_timeout = Duration::from_millis(800);

        let mut req = request(0);
        req["outputs"][0]["storage"] = json!([{"name": "s3", "bucket": "media"}]);
        let created = service.create_pipeline(req).await.unwrap();
        let artifact = h.work_dir.join(created.outputs[0].as_ref().unwrap());
        for _ in 0..50 {
            if artifact.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        // The encoder exits 0 on quit, leaving an artifact that would upload
        service.purge_pipeline(created.id).await.unwrap();

        assert!(matches!(
            service.get_pipeline(created.id).await,
            Err(PipelineError::NotFound(_))
        ));
        assert!(!artifact.exists());
    }

    #[tokio::test]
    async fn test_registry_failure_launches_nothing() {
        let h = harness("touch launched; exit 0", false).await;
        sqlx::query("DROP TABLE pipelines")
            .execute(&h.pool)
            .await
            .unwrap();

        let err = h
            .service
            .create_pipeline(json!({
                "input_file": {"source": "in.mp4"},
                "outputs": [{"container": "mpegts"}],
                "ttl": 0
            }))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::DatabaseError(_)));
        assert_eq!(h.ports.reserved_count(), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!h.work_dir.join("launched").exists());
        let records = std::fs::read_dir(&h.work_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
            .count();
        assert_eq!(records, 0);
    }
}
