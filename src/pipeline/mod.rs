//! Pipeline components: worker pool, the three stages, naming, walk, run state.
//!
//! Discovery (walk + classify) → bounded queue → extraction (dump) → bounded queue →
//! delivery (upload). Each stage is a [`pool::WorkerPool`]; a stage's queue closes only
//! after every producer feeding it has finished.

pub mod classify;
pub mod context;
pub mod delivery;
pub mod discovery;
pub mod extraction;
pub mod naming;
pub mod orchestrator;
pub mod pool;
pub mod report;
pub mod walk;

pub use classify::{Classify, MachOClassifier, arch_tag};
pub use context::{PipelineTuning, RunControl};
pub use delivery::{Delivery, EndpointOutcome, ExternalUploader, Upload};
pub use discovery::{Discovery, ExclusionRules, check_scan_targets, dedupe_targets, run_discovery, scan_targets};
pub use extraction::{Dump, Extraction, ExternalDumper};
pub use naming::{artifact_name, create_artifact, mangle};
pub use orchestrator::{Stages, run_pipeline, run_upload_only};
pub use pool::WorkerPool;
pub use report::{RunStats, report_run};
pub use walk::{WalkOutcome, walk_files, walk_top_level};
