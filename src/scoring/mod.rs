pub mod engine;
pub mod percentile;
pub mod tracks;

pub use engine::{EvidenceGroup, EvidenceTier, GeneScoreRow, ScoreBands, ScoringEngine};
