pub mod error;
pub mod hgnc_index;
pub mod normalizer;

pub use error::NormalizeError;
pub use hgnc_index::{HgncIndex, HgncRecord};
pub use normalizer::{GeneNormalizer, Resolution};
