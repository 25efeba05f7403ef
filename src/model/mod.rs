pub mod evidence;
pub mod gene;
pub mod payload;

pub use evidence::{AnnotationRecord, EvidenceRecord, PayloadKind, UpsertOutcome};
pub use gene::Gene;
pub use payload::Payload;
