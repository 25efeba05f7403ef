pub mod app;
pub mod error;

pub use app::{App, GeneDetail, GeneFilter, Page, Pagination, SortBy};
pub use error::ApiError;
