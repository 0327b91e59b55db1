//! Lifecycle Service
//!
//! One coordinating task per pipeline waits for every output task to finish
//! (uploads included), keeps the pipeline for its ttl and then deletes the
//! snapshot, the completion records and the artifacts. A ttl of zero keeps the
//! pipeline until it is expired explicitly.
//!
//! Pending expiries live in a table keyed by pipeline id. Each entry holds an
//! "expire now" token and a signal that flips once cleanup is done. The token
//! is shared with the pipeline's output tasks, which abandon uploads when it
//! fires.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use transcast_core::domain::pipeline::Pipeline;
use transcast_core::domain::status::CompletionRecord;
use transcast_core::ports::PortAllocator;
use transcast_runner::repository::RecordStore;
use uuid::Uuid;

use crate::repository::pipeline_repository;

struct Expiry {
    expire_now: CancellationToken,
    done: watch::Receiver<bool>,
}

type ExpiryTable = Arc<Mutex<HashMap<Uuid, Expiry>>>;

/// Schedules and performs pipeline deletion
#[derive(Clone)]
pub struct LifecycleManager {
    pool: SqlitePool,
    records: Arc<dyn RecordStore>,
    ports: Arc<PortAllocator>,
    table: ExpiryTable,
}

impl LifecycleManager {
    pub fn new(pool: SqlitePool, records: Arc<dyn RecordStore>, ports: Arc<PortAllocator>) -> Self {
        Self {
            pool,
            records,
            ports,
            table: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Starts the coordinating task of a pipeline
    ///
    /// `outputs` are the supervisory tasks of its launched outputs, started
    /// with `expire_now` as their expiry token.
    pub fn watch(
        &self,
        pipeline: Pipeline,
        outputs: Vec<JoinHandle<CompletionRecord>>,
        expire_now: CancellationToken,
    ) {
        let (done_tx, done_rx) = watch::channel(false);
        lock(&self.table).insert(
            pipeline.id,
            Expiry {
                expire_now: expire_now.clone(),
                done: done_rx,
            },
        );

        let manager = self.clone();
        tokio::spawn(async move {
            for handle in outputs {
                if let Err(e) = handle.await {
                    tracing::error!("Output task of pipeline {} failed: {}", pipeline.id, e);
                }
            }
            tracing::info!("All outputs of pipeline {} completed", pipeline.id);

            if pipeline.ttl > 0 {
                tracing::debug!(
                    "Deleting pipeline {} in {} seconds",
                    pipeline.id,
                    pipeline.ttl
                );
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(pipeline.ttl)) => {}
                    _ = expire_now.cancelled() => {
                        tracing::debug!("Pipeline {} expired early", pipeline.id);
                    }
                }
            } else {
                expire_now.cancelled().await;
            }

            if let Err(e) = manager.cleanup(&pipeline).await {
                tracing::error!("Failed to clean up pipeline {}: {:#}", pipeline.id, e);
            }
            lock(&manager.table).remove(&pipeline.id);
            let _ = done_tx.send(true);
        });
    }

    /// Re-arms expiry for pipelines persisted by an earlier process
    ///
    /// Their outputs are no longer supervised, so the ttl counts from now.
    pub fn resume(&self, pipelines: Vec<Pipeline>) -> usize {
        let mut resumed = 0;
        for pipeline in pipelines {
            if !self.is_tracked(pipeline.id) {
                self.watch(pipeline, Vec::new(), CancellationToken::new());
                resumed += 1;
            }
        }
        resumed
    }

    /// Skips the remaining wait of a pipeline
    ///
    /// Returns a signal that becomes `true` once cleanup finished, or `None`
    /// if no coordinating task owns the pipeline.
    pub fn expire_now(&self, pipeline_id: Uuid) -> Option<watch::Receiver<bool>> {
        let table = lock(&self.table);
        let expiry = table.get(&pipeline_id)?;
        expiry.expire_now.cancel();
        Some(expiry.done.clone())
    }

    pub fn is_tracked(&self, pipeline_id: Uuid) -> bool {
        lock(&self.table).contains_key(&pipeline_id)
    }

    /// Deletes a pipeline's snapshot, records and artifacts, and frees its ports
    ///
    /// Safe to run more than once.
    pub async fn cleanup(&self, pipeline: &Pipeline) -> Result<()> {
        pipeline_repository::delete(&self.pool, pipeline.id)
            .await
            .context("Failed to delete pipeline snapshot")?;

        for output in &pipeline.outputs {
            tracing::debug!("Deleting output: {}", output.id);
            self.records.remove(output.id).await?;

            if let Some(target) = &output.target {
                if let Some(file) = target.local_file() {
                    self.records.remove_artifact(file).await?;
                }
                if let Some(port) = target.udp_port() {
                    self.ports.release(port);
                }
            }
        }

        tracing::info!("Done deleting pipeline: {}", pipeline.id);
        Ok(())
    }
}

fn lock(table: &ExpiryTable) -> MutexGuard<'_, HashMap<Uuid, Expiry>> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Waits for a cleanup signal, bounded by `limit`
pub async fn wait_done(mut done: watch::Receiver<bool>, limit: Duration) -> bool {
    matches!(
        tokio::time::timeout(limit, done.wait_for(|finished| *finished)).await,
        Ok(Ok(_))
    )
}
