pub mod batch;
pub mod clingen;
pub mod clinvar;
pub mod context;
pub mod error;
pub mod factory;
pub mod gencc;
pub mod gnomad;
pub mod gtex;
pub mod hpo;
pub mod internal;
pub mod literature;
pub mod panelapp;
pub mod pubtator;
pub mod traits;
pub mod uniprot;

pub use context::DriverContext;
pub use error::DriverError;
pub use factory::{DriverFactory, DriverServices};
pub use traits::{BatchReport, EvidenceSink, PrepareReport, SourceDriver};
