use crate::model::Payload;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One assertion about a gene from one source. At most one active record
/// exists per `(gene, source)`; refreshes go through the merger rather than
/// overwriting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub gene_id: u64,
    pub source: String,
    pub payload: Payload,
    /// Per-source classification string. Only classification-based sources
    /// set this.
    pub classification: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    /// Monotonic counter used for optimistic stale-write detection.
    pub version: u64,
    /// Soft-delete marker, set when the source is retired.
    pub retired: bool,
}

/// Rich per-gene scientific annotation that does not contribute to the
/// score (constraint metrics, expression vectors, variant summaries).
/// Replaced wholesale on refresh, never merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    pub gene_id: u64,
    pub source: String,
    pub payload: Payload,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Routes a driver's output into the evidence or the annotation store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Evidence,
    Annotation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}
