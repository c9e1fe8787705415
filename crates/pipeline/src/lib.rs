pub mod build;
pub mod cancel;
pub mod cluster;
pub mod error;
pub mod executor;
pub mod fingerprint;
pub mod git;
pub mod output;
pub mod pipeline;
pub mod provision;
pub mod reconcile;
pub mod record;

pub use build::{BuildBackend, BuildRequest, BuildResult, InMemoryBuilder};
pub use cancel::CancelToken;
pub use cluster::{ApplyOutcome, ClusterApi, InMemoryCluster, ObjectRef, WorkloadStatus};
pub use error::{ExecError, PipelineError, RemovalFailure};
pub use executor::{ExecTarget, PhaseExecutor, PhaseOutcome, PhaseRun, ENV_FILE_VAR};
pub use output::{CaptureSink, MaskingSink, OutputSink, Stream, TracingSink};
pub use pipeline::{Action, Coordinator, PipelineContext, PipelineState, RunOptions, RunSummary};
pub use provision::{ContainerHandle, Provisioner, ProvisionRequest, RecordingProvisioner};
pub use record::{
    FileRunRecordStore, MemoryRunRecordStore, RecordStatus, RunRecord, RunRecordStore,
};
