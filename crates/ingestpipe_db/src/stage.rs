//! Stage Manager (spec.md section 4.6).
//!
//! Owns one internal-stage namespace per run: `prefix + pseudo-random
//! suffix`. Uploads compressed artifacts in parallel, purges them after a
//! successful COPY, and can prune stale namespaces left behind by runs that
//! crashed before cleanup.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::Row;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::client::WarehouseClient;
use crate::error::DbError;

const DEFAULT_PARALLEL_UPLOADS: u32 = 4;
const REGISTRY_TABLE: &str = "ingestpipe_stage_registry";

#[derive(Debug, Error)]
pub enum StageManagerError {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("upload of {path} failed: {source}")]
    Upload {
        path: String,
        #[source]
        source: DbError,
    },
}

type Result<T> = std::result::Result<T, StageManagerError>;

/// One uploaded artifact's stage path, recorded so the pipeline can purge
/// it after a successful COPY.
#[derive(Debug, Clone)]
pub struct StagedArtifact {
    pub local_path: String,
    pub stage_path: String,
}

pub struct StageManager<'a> {
    client: &'a WarehouseClient,
    namespace: String,
    parallel_uploads: u32,
}

impl<'a> StageManager<'a> {
    /// Creates a namespace `<prefix>_<uuid-suffix>` and records it in the
    /// stage registry so a later run can prune it if this one never calls
    /// [`Self::purge`].
    pub async fn create(client: &'a WarehouseClient, prefix: &str) -> Result<Self> {
        let namespace = format!("{}_{}", prefix, Uuid::new_v4().simple());
        client
            .exec(&format!("CREATE STAGE IF NOT EXISTS @{}", namespace))
            .await?;
        Self::ensure_registry_table(client).await?;
        client
            .exec(&format!(
                "INSERT INTO {} (namespace, created_at) VALUES ('{}', now())",
                REGISTRY_TABLE, namespace
            ))
            .await?;
        info!(namespace = %namespace, "stage namespace created");
        Ok(Self {
            client,
            namespace,
            parallel_uploads: DEFAULT_PARALLEL_UPLOADS,
        })
    }

    pub fn with_parallel_uploads(mut self, parallel_uploads: u32) -> Self {
        self.parallel_uploads = parallel_uploads;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Uploads `local_paths` to this namespace, `parallel_uploads` at a
    /// time, recording each resulting stage path.
    pub async fn put(&self, local_paths: &[impl AsRef<Path>]) -> Result<Vec<StagedArtifact>> {
        let mut staged = Vec::with_capacity(local_paths.len());
        for chunk in local_paths.chunks(self.parallel_uploads.max(1) as usize) {
            let mut futures = Vec::with_capacity(chunk.len());
            for path in chunk {
                let local_path = path.as_ref().display().to_string();
                let stage_path = format!("{}/{}", self.namespace, file_name(path.as_ref()));
                futures.push(async move {
                    self.client
                        .stage_put(&local_path, &stage_path, self.parallel_uploads)
                        .await
                        .map(|_| StagedArtifact {
                            local_path: local_path.clone(),
                            stage_path,
                        })
                        .map_err(|source| StageManagerError::Upload {
                            path: local_path,
                            source,
                        })
                });
            }
            for result in futures::future::join_all(futures).await {
                staged.push(result?);
            }
        }
        Ok(staged)
    }

    /// Removes uploaded artifacts after a successful COPY. Failure to purge
    /// is a warning, not an error (spec.md section 4.6).
    pub async fn purge(&self, artifacts: &[StagedArtifact]) {
        for artifact in artifacts {
            if let Err(err) = self.client.stage_remove(&artifact.stage_path).await {
                warn!(stage_path = %artifact.stage_path, error = %err, "failed to purge stage artifact");
            }
        }
        if let Err(err) = self
            .client
            .exec(&format!(
                "DELETE FROM {} WHERE namespace = '{}'",
                REGISTRY_TABLE, self.namespace
            ))
            .await
        {
            warn!(namespace = %self.namespace, error = %err, "failed to clear stage registry entry");
        }
    }

    /// Drops any registered namespace older than `max_age`, run once at
    /// startup to reclaim stages from crashed runs (spec.md section 4.6,
    /// "Stale prefixes older than K hours may be pruned at startup").
    pub async fn prune_stale(client: &WarehouseClient, max_age: Duration) -> Result<usize> {
        Self::ensure_registry_table(client).await?;
        let rows = client
            .query(&format!(
                "SELECT namespace, created_at FROM {}",
                REGISTRY_TABLE
            ))
            .await?;

        let cutoff = Utc::now() - chrono::Duration::from_std(max_age).unwrap_or_default();
        let mut pruned = 0usize;
        for row in rows {
            let namespace: String = row.try_get("namespace").map_err(DbError::from)?;
            let created_at: DateTime<Utc> = row.try_get("created_at").map_err(DbError::from)?;
            if created_at < cutoff {
                if let Err(err) = client.exec(&format!("DROP STAGE IF EXISTS @{}", namespace)).await
                {
                    warn!(namespace = %namespace, error = %err, "failed to drop stale stage namespace");
                    continue;
                }
                client
                    .exec(&format!(
                        "DELETE FROM {} WHERE namespace = '{}'",
                        REGISTRY_TABLE, namespace
                    ))
                    .await?;
                pruned += 1;
            }
        }
        if pruned > 0 {
            info!(pruned, "pruned stale stage namespaces");
        }
        Ok(pruned)
    }

    async fn ensure_registry_table(client: &WarehouseClient) -> Result<()> {
        client
            .exec(&format!(
                "CREATE TABLE IF NOT EXISTS {} (namespace TEXT PRIMARY KEY, created_at TIMESTAMPTZ NOT NULL)",
                REGISTRY_TABLE
            ))
            .await?;
        Ok(())
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "artifact".to_string())
}
