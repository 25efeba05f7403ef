use crate::model::{Gene, Payload, PayloadKind, UpsertOutcome};
use crate::sources::context::DriverContext;
use crate::sources::error::DriverError;
use crate::store::StoreError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrepareReport {
    pub items_loaded: usize,
}

/// Outcome tally of one batch execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchReport {
    pub fn error_rate(&self) -> f64 {
        if self.attempted == 0 {
            0.0
        } else {
            self.failed as f64 / self.attempted as f64
        }
    }
}

/// Where batch results land as they arrive. The orchestrator hands drivers
/// a sink wired into the evidence store; tests substitute collectors.
pub trait EvidenceSink: Send + Sync {
    fn accept(
        &self,
        gene: &Gene,
        source: &str,
        kind: PayloadKind,
        payload: Payload,
        classification: Option<String>,
    ) -> Result<UpsertOutcome, StoreError>;
}

/// The uniform per-source contract. Drivers are stateless apart from
/// pre-loaded bulk data and the shared service handles they are injected
/// with; `fetch_one` must be safe to call concurrently.
pub trait SourceDriver: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this driver's payloads are scored evidence or plain
    /// annotations.
    fn kind(&self) -> PayloadKind;

    /// Optional warm-up: bulk download and parse, cache priming. May block
    /// for tens of seconds. Idempotent.
    fn prepare(&self, _ctx: &DriverContext) -> Result<PrepareReport, DriverError> {
        Ok(PrepareReport::default())
    }

    fn fetch_one(&self, gene: &Gene, ctx: &DriverContext) -> Result<Payload, DriverError>;

    /// Preferred path: pushes results into `sink` as they arrive. Bulk
    /// drivers iterate their pre-loaded data in-process; per-gene drivers
    /// run `fetch_one` through the bounded worker pool.
    fn fetch_batch(
        &self,
        genes: &[Gene],
        sink: &dyn EvidenceSink,
        ctx: &DriverContext,
    ) -> Result<BatchReport, DriverError>;

    /// Guard used by the cache and the merger to reject empty or error
    /// bodies.
    fn is_valid(&self, payload: &Payload) -> bool {
        match payload {
            Payload::Null => false,
            Payload::Object(map) => !map.is_empty(),
            Payload::Array(items) => !items.is_empty(),
            _ => true,
        }
    }
}
