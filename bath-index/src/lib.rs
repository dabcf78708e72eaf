pub mod build;
pub mod catalog;
pub mod error;

pub use build::build_dataset;
pub use catalog::{clean, load_catalog, parse_catalog, CatalogEntry, CatalogRecord, CleanReport};
pub use error::IndexError;
