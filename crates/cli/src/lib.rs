pub mod cli;

use anyhow::Result;
use deckhand_core::DeckhandConfig;
use deckhand_pipeline::{
    CancelToken, FileRunRecordStore, InMemoryBuilder, InMemoryCluster, MemoryRunRecordStore,
    PipelineContext, RecordingProvisioner,
};
use deckhand_runtime::{DockerBuilder, DockerProvisioner, KubectlCluster};
use std::sync::Arc;
use tracing::debug;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Wires the pipeline seams to real backends, or to in-memory ones for
/// `--dry-run`. Shell commands run for real either way.
pub fn pipeline_context(
    config: DeckhandConfig,
    dry_run: bool,
    cancel: CancelToken,
) -> Result<PipelineContext> {
    let context = if dry_run {
        debug!("Using in-memory cluster, builder and provisioner");
        PipelineContext::new(
            config,
            Arc::new(InMemoryCluster::new()),
            Arc::new(InMemoryBuilder::new()),
            Arc::new(RecordingProvisioner::new()),
            Arc::new(MemoryRunRecordStore::new()),
        )
    } else {
        let records = Arc::new(FileRunRecordStore::new(config.state_dir.clone()));
        let cluster = Arc::new(KubectlCluster::new(config.kubectl.clone()));
        PipelineContext::new(
            config,
            cluster,
            Arc::new(DockerBuilder::connect()?),
            Arc::new(DockerProvisioner::connect()?),
            records,
        )
    };
    Ok(context.with_cancel(cancel))
}
