pub mod curation;
pub mod error;
pub mod evidence_store;
pub mod merge;
pub mod run;
pub mod snapshot;
pub mod tables;

pub use error::StoreError;
pub use evidence_store::{EvidenceStore, NewGene};
pub use merge::MergePolicy;
pub use run::{PipelineRun, RunHandle, RunStatus};
