//! Asynchronous build orchestration: submission, per-kind queues, worker slots, retries,
//! batch fan-out, and scratch cleanup.

mod batch;
mod broker;
mod build;
mod pipeline;
mod policy;
mod reaper;
mod registry;
mod store;
mod types;
mod worker;

pub use batch::{BatchFailure, BatchHandler, BatchPayload, BatchReport, BatchSubmission, fan_out};
pub use broker::{Broker, Consumer, Delivery, Envelope};
pub use build::BuildHandler;
pub use pipeline::{PipelineConfig, TaskPipeline};
pub use policy::{RetryDecision, RetryPolicy};
pub use reaper::{
    CleanupError, CleanupHandler, REAPED_EXTENSIONS, ReapJob, ReapJobContext, ReapReport,
    ReaperConfig, process_reap_job, reap,
};
pub use registry::{HandlerRegistry, TaskHandler, TaskInvocation};
pub use store::TaskStore;
pub use types::{PipelineError, TaskExhausted, TaskFailure, TaskKind, TaskRecord, TaskState};
pub use worker::{WorkerConfig, WorkerPool, WorkerPoolHandle};
