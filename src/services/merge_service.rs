use crate::config::{MIB, MergeConfig, MergeOrder, ReduceStrategy, SplitMode, part_size_in_range};
use crate::error::{MergeError, Result};
use crate::models::{ArtifactResponse, Delivery, FoldOptions, MergeOptions, MergeOutcome};
use crate::services::manifest::build_manifest;
use crate::services::merger::{self, Inspection, Source};
use crate::services::reducer::{Accumulator, Reducer};
use crate::services::session::{Artifact, MergeSession};
use crate::services::splitter::split_file;
use crate::services::stager::{StagedFile, stage_stream};
use crate::services::storage::{RemoteObject, RemoteStore};
use crate::utils::hash::calculate_file_hash;
use crate::utils::temp;
use crate::utils::validation::{file_stem, output_file_name, sanitize_filename};
use chrono::Utc;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tracing::{info, warn};
use uuid::Uuid;

/// Options of one finalisation with every default resolved
#[derive(Debug, Clone)]
struct Resolved {
    order: MergeOrder,
    strategy: ReduceStrategy,
    part_size: u64,
    split: SplitMode,
    upload_remote: bool,
    count_pages: bool,
    output_name: String,
}

pub struct MergeService {
    config: MergeConfig,
    remote: Option<Arc<dyn RemoteStore>>,
}

impl MergeService {
    pub fn new(config: MergeConfig, remote: Option<Arc<dyn RemoteStore>>) -> Self {
        Self { config, remote }
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    pub fn remote(&self) -> Option<&Arc<dyn RemoteStore>> {
        self.remote.as_ref()
    }

    /// Copies one upload into the session and, unless page counting is
    /// skipped, opens it once to record its page count or its problem.
    pub async fn stage<R: AsyncRead + Unpin>(
        &self,
        session: &mut MergeSession,
        file_name: &str,
        reader: R,
        skip_page_count: Option<bool>,
    ) -> Result<Uuid> {
        let display_name = sanitize_filename(file_name);
        let sequence = session.next_sequence();
        let mut staged = stage_stream(
            session.workdir(),
            &display_name,
            sequence,
            reader,
            self.config.stage_block_size,
            self.config.max_file_size,
        )
        .await?;

        if !skip_page_count.unwrap_or(self.config.skip_page_count) {
            staged.inspection = inspect_blocking(&staged).await?;
        }

        match &staged.inspection {
            Inspection::Encrypted => {
                warn!("🔒 '{}' is encrypted, merge disabled until removed", display_name)
            }
            Inspection::Unreadable { reason } => {
                warn!("⚠️  '{}' is unreadable ({}), merge disabled until removed", display_name, reason)
            }
            Inspection::Skipped if !staged.looks_like_pdf => {
                warn!("⚠️  '{}' does not start like a PDF", display_name)
            }
            _ => {}
        }

        let id = staged.id;
        session.staged.push_back(staged);
        Ok(id)
    }

    pub fn remove_staged(&self, session: &mut MergeSession, file_id: Uuid) -> Option<StagedFile> {
        let removed = session.remove_staged(file_id)?;
        info!(
            "🗑️  Removed '{}' from session {} ({} bytes freed)",
            removed.display_name, session.id, removed.size
        );
        Some(removed)
    }

    /// Merges everything staged so far into the session accumulator.
    pub async fn fold(&self, session: &mut MergeSession, options: FoldOptions) -> Result<()> {
        ensure_not_blocked(session)?;
        if session.staged.is_empty() {
            return Ok(());
        }

        let order = options.order.unwrap_or(self.config.merge_order);
        let strategy = options.strategy.unwrap_or(self.config.reduce_strategy);
        let count_pages = !options.skip_page_count.unwrap_or(self.config.skip_page_count);

        order_pending(&mut session.staged, order);
        session.clear_outcome();
        reduce(session, Reducer::new(strategy, count_pages)).await?;

        if let Some(acc) = &session.accumulator {
            info!(
                "🧮 Session {} folded: {} source(s), {} bytes",
                session.id,
                acc.sources.len(),
                acc.size
            );
        }
        Ok(())
    }

    /// Reduces every staged file to one document and hands it over.
    pub async fn finalize(
        &self,
        session: &mut MergeSession,
        options: MergeOptions,
    ) -> Result<MergeOutcome> {
        let resolved = self.resolve(options)?;

        ensure_not_blocked(session)?;
        if session.staged.is_empty() && session.accumulator.is_none() {
            return Err(MergeError::NothingToMerge);
        }

        session.clear_outcome();
        order_pending(&mut session.staged, resolved.order);
        reduce(
            session,
            Reducer::new(resolved.strategy, resolved.count_pages),
        )
        .await?;

        let acc = session
            .accumulator
            .take()
            .ok_or(MergeError::NothingToMerge)?;
        if acc.size == 0 {
            return Err(MergeError::EmptyOutput);
        }

        info!(
            "📚 Session {}: {} source(s) merged into '{}' ({} bytes)",
            session.id,
            acc.sources.len(),
            resolved.output_name,
            acc.size
        );

        match self.deliver(session, &acc, &resolved).await {
            Ok(outcome) => {
                if matches!(outcome.delivery, Delivery::Single { .. }) {
                    session.artifacts.push(Artifact {
                        name: resolved.output_name.clone(),
                        path: acc.path,
                        size: acc.size,
                        content_type: mime::APPLICATION_PDF,
                    });
                }
                // Otherwise the merged file is dropped here, once split or uploaded
                session.outcome = Some(outcome.clone());
                Ok(outcome)
            }
            Err(e) => {
                // Keep the merged document so finalisation can be retried
                session.artifacts.clear();
                session.accumulator = Some(acc);
                Err(e)
            }
        }
    }

    fn resolve(&self, options: MergeOptions) -> Result<Resolved> {
        let part_size_mb = match options.part_size_mb {
            Some(mb) if !part_size_in_range(mb) => {
                return Err(MergeError::InvalidOptions(format!(
                    "part size must be between {} and {} MiB, got {}",
                    crate::config::MIN_PART_SIZE_MB,
                    crate::config::MAX_PART_SIZE_MB,
                    mb
                )));
            }
            Some(mb) => mb,
            None => self.config.part_size_mb,
        };

        Ok(Resolved {
            order: options.order.unwrap_or(self.config.merge_order),
            strategy: options.strategy.unwrap_or(self.config.reduce_strategy),
            part_size: part_size_mb * MIB,
            split: options.split.unwrap_or_default(),
            upload_remote: options.upload_remote.unwrap_or(self.config.upload_to_remote),
            count_pages: !options.skip_page_count.unwrap_or(self.config.skip_page_count),
            output_name: output_file_name(options.output_name.as_deref()),
        })
    }

    async fn deliver(
        &self,
        session: &mut MergeSession,
        acc: &Accumulator,
        resolved: &Resolved,
    ) -> Result<MergeOutcome> {
        let mut warnings = Vec::new();

        if resolved.upload_remote {
            match &self.remote {
                Some(store) => {
                    match self
                        .deliver_remote(store.as_ref(), session.id, &resolved.output_name, &acc.path)
                        .await
                    {
                        Ok((object, sha256)) => {
                            info!("☁️  '{}' uploaded as {}", resolved.output_name, object.key);
                            return Ok(outcome(
                                resolved,
                                acc,
                                sha256,
                                Delivery::Remote {
                                    key: object.key,
                                    url: object.url,
                                    expires_in_secs: self.config.remote_url_ttl_secs,
                                },
                                warnings,
                            ));
                        }
                        Err(e) => {
                            warn!("⚠️  Remote delivery failed, falling back to local: {}", e);
                            warnings.push(format!("{}; delivered locally instead", e));
                        }
                    }
                }
                None => {
                    warn!("⚠️  Remote delivery requested but no remote store is configured");
                    warnings.push(
                        "remote delivery requested but no remote store is configured; delivered locally instead"
                            .to_string(),
                    );
                }
            }
        }

        let split = match resolved.split {
            SplitMode::Always => true,
            SplitMode::Never => false,
            SplitMode::Auto => acc.size > self.config.split_threshold_bytes(),
        };

        if split {
            self.deliver_parts(session, acc, resolved, warnings).await
        } else {
            self.deliver_single(session.id, acc, resolved, warnings).await
        }
    }

    async fn deliver_remote(
        &self,
        store: &dyn RemoteStore,
        session_id: Uuid,
        output_name: &str,
        path: &Path,
    ) -> Result<(RemoteObject, String)> {
        let sha256 = calculate_file_hash(path, self.config.stage_block_size).await?;
        let key = format!("merged/{}/{}", session_id, output_name);

        let size = store
            .upload_path(&key, path)
            .await
            .map_err(|e| MergeError::RemoteUpload(e.to_string()))?;

        let ttl = Duration::from_secs(self.config.remote_url_ttl_secs);
        let url = match store.presigned_url(&key, ttl).await {
            Ok(url) => url,
            Err(e) => {
                if let Err(cleanup) = store.delete(&key).await {
                    warn!("Failed to delete unreachable object {}: {}", key, cleanup);
                }
                return Err(MergeError::RemoteUpload(e.to_string()));
            }
        };

        Ok((RemoteObject { key, size, url }, sha256))
    }

    async fn deliver_single(
        &self,
        session_id: Uuid,
        acc: &Accumulator,
        resolved: &Resolved,
        warnings: Vec<String>,
    ) -> Result<MergeOutcome> {
        let sha256 = calculate_file_hash(&acc.path, self.config.stage_block_size).await?;
        let file = ArtifactResponse::new(
            session_id,
            &resolved.output_name,
            acc.size,
            &mime::APPLICATION_PDF,
        );
        Ok(outcome(resolved, acc, sha256, Delivery::Single { file }, warnings))
    }

    async fn deliver_parts(
        &self,
        session: &mut MergeSession,
        acc: &Accumulator,
        resolved: &Resolved,
        warnings: Vec<String>,
    ) -> Result<MergeOutcome> {
        let base_name = file_stem(&resolved.output_name).to_string();
        let block_size = self.config.stage_block_size;

        let split = split_file(
            &acc.path,
            resolved.part_size,
            session.workdir(),
            &base_name,
            block_size,
        )
        .await?;
        let bundle = build_manifest(
            &split,
            &resolved.output_name,
            &base_name,
            resolved.part_size,
            session.workdir(),
            block_size,
        )
        .await?;

        let sha256 = split.sha256.clone();
        let id = session.id;
        let mut parts = Vec::with_capacity(split.parts.len());
        for part in split.parts {
            let artifact = Artifact {
                name: part.file_name,
                path: part.path,
                size: part.len,
                content_type: mime::APPLICATION_OCTET_STREAM,
            };
            parts.push(ArtifactResponse::new(
                id,
                &artifact.name,
                artifact.size,
                &artifact.content_type,
            ));
            session.artifacts.push(artifact);
        }

        let mut files = Vec::with_capacity(bundle.files.len());
        for file in bundle.files {
            let content_type = if file.file_name.ends_with(".json") {
                mime::APPLICATION_JSON
            } else {
                mime::TEXT_PLAIN_UTF_8
            };
            let artifact = Artifact {
                name: file.file_name,
                path: file.path,
                size: file.size,
                content_type,
            };
            files.push(ArtifactResponse::new(
                id,
                &artifact.name,
                artifact.size,
                &artifact.content_type,
            ));
            session.artifacts.push(artifact);
        }

        info!(
            "📦 '{}' delivered as {} part(s) of up to {} bytes",
            resolved.output_name,
            parts.len(),
            resolved.part_size
        );

        Ok(outcome(
            resolved,
            acc,
            sha256,
            Delivery::Parts {
                part_size: resolved.part_size,
                parts,
                files,
                manifest: bundle.manifest,
            },
            warnings,
        ))
    }

    /// Moves every artifact of the session into `out_dir`, returning the new paths.
    pub fn export_artifacts(&self, session: &mut MergeSession, out_dir: &Path) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(out_dir)?;
        let mut exported = Vec::with_capacity(session.artifacts.len());
        for artifact in session.artifacts.drain(..) {
            let dest = out_dir.join(&artifact.name);
            temp::persist(artifact.path, &dest)?;
            exported.push(dest);
        }
        Ok(exported)
    }
}

fn outcome(
    resolved: &Resolved,
    acc: &Accumulator,
    sha256: String,
    delivery: Delivery,
    warnings: Vec<String>,
) -> MergeOutcome {
    MergeOutcome {
        output_name: resolved.output_name.clone(),
        total_size: acc.size,
        pages: acc.pages,
        sha256,
        sources: acc.sources.clone(),
        delivery,
        warnings,
        finished_at: Utc::now(),
    }
}

fn ensure_not_blocked(session: &MergeSession) -> Result<()> {
    let names = session.blocking_names();
    if names.is_empty() {
        Ok(())
    } else {
        Err(MergeError::Blocked { names })
    }
}

/// Upload order, or display name ignoring case with ties kept in upload
/// order. Intermediate results (sequence 0) always stay in front.
pub fn order_pending(pending: &mut VecDeque<StagedFile>, order: MergeOrder) {
    let files = pending.make_contiguous();
    match order {
        MergeOrder::Upload => files.sort_by_key(|f| f.sequence),
        MergeOrder::Name => files.sort_by(|a, b| {
            (a.sequence != 0)
                .cmp(&(b.sequence != 0))
                .then_with(|| {
                    a.display_name
                        .to_lowercase()
                        .cmp(&b.display_name.to_lowercase())
                })
                .then_with(|| a.sequence.cmp(&b.sequence))
        }),
    }
}

async fn inspect_blocking(staged: &StagedFile) -> Result<Inspection> {
    let name = staged.display_name.clone();
    let path = staged.path.to_path_buf();
    let inspection =
        tokio::task::spawn_blocking(move || merger::inspect(Source { name: &name, path: &path }))
            .await?;
    Ok(inspection)
}

/// Runs the reducer on a blocking thread and puts the resulting state back
/// into the session, whether the reduction succeeded or not.
async fn reduce(session: &mut MergeSession, reducer: Reducer) -> Result<()> {
    let mut acc = session.accumulator.take();
    let mut pending = std::mem::take(&mut session.staged);
    let dir = session.workdir().to_path_buf();

    let (acc, pending, result) = tokio::task::spawn_blocking(move || {
        let result = reducer.run(&mut acc, &mut pending, &dir);
        (acc, pending, result)
    })
    .await?;

    session.accumulator = acc;
    session.staged = pending;
    result
}
